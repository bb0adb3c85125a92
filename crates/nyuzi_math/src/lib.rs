//! A small `f32` vector/matrix library, built only to cover what the Nyuzi
//! renderer, its demos, and vertex shaders need: affine/projective transforms
//! and their usual vector algebra. Not a generic math crate.

mod mat4;
mod vec2;
mod vec3;
mod vec4;

pub use mat4::Mat4;
pub use vec2::Vec2;
pub use vec3::Vec3;
pub use vec4::Vec4;
