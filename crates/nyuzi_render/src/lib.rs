//! A sort-middle, tile-based, perspective-correct software rasterizer built
//! on the 16-lane SIMD types in `nyuzi_simd`. Geometry is shaded and binned
//! into per-tile queues, then every tile is rasterized and filled
//! independently — the three phases are the renderer's `parallel_execute`
//! join points (spec §5).

mod context;
mod filler;
mod interp;
mod rasterizer;
mod shader;
mod surface;
mod texture;

pub use context::{CullMode, DrawState, RenderContext};
pub use interp::{LinearInterpolator, ParameterInterpolator};
pub use shader::Shader;
pub use surface::{PixelFormat, Surface, QUAD_SIZE, TILE_SIZE};
pub use texture::Texture;
