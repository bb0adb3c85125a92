use nyuzi_render::{CullMode, DrawState, PixelFormat, RenderContext, Shader, Surface, Texture};
use nyuzi_simd::{Mask16, VecF32x16};

/// A minimal shader: vertex attributes *are* the clip-space position
/// (4 floats, passed straight through), and every pixel gets the constant
/// RGBA color baked into the draw's uniform bytes.
struct ConstantColorShader;

impl Shader for ConstantColorShader {
    fn num_attribs(&self) -> usize {
        4
    }
    fn num_params(&self) -> usize {
        4
    }
    fn shade_vertices(&self, out_params: &mut [VecF32x16], in_attribs: &[VecF32x16], _uniforms: &[u8], _mask: Mask16) {
        for i in 0..4 {
            out_params[i] = in_attribs[i];
        }
    }
    fn shade_pixels(&self, out_color: &mut [VecF32x16; 4], _in_params: &[VecF32x16], uniforms: &[u8], _textures: &[Option<&Texture>; 4], _mask: Mask16) {
        for c in 0..4 {
            out_color[c] = VecF32x16::splat(uniforms[c] as f32 / 255.0);
        }
    }
}

/// A full-screen triangle in clip space at constant depth `z`, CCW in
/// screen space (second vertex to the right, third vertex down).
fn big_triangle_attribs(z: f32) -> [f32; 12] {
    [-2.0, -2.0, z, 1.0, 2.0, -2.0, z, 1.0, -2.0, 2.0, z, 1.0]
}

#[test]
fn depth_test_picks_the_nearer_triangle_regardless_of_submission_order() {
    let shader = ConstantColorShader;
    let near_attribs = big_triangle_attribs(0.8);
    let far_attribs = big_triangle_attribs(0.2);
    let indices = [0u32, 1, 2];
    let red = [255u8, 0, 0, 255];
    let blue = [0u8, 0, 255, 255];

    let mut ctx = RenderContext::new(64, 64);
    // Submit the nearer (red) triangle first, then the farther (blue) one
    // second: with depth testing on, submission order must not matter.
    ctx.submit_draw_command(DrawState {
        attribs: &near_attribs,
        attribs_stride: 4,
        vertex_count: 3,
        indices: &indices,
        uniforms: &red,
        shader: &shader,
        textures: [None; 4],
        depth_enabled: true,
        blend_enabled: false,
        culling: CullMode::None,
    });
    ctx.submit_draw_command(DrawState {
        attribs: &far_attribs,
        attribs_stride: 4,
        vertex_count: 3,
        indices: &indices,
        uniforms: &blue,
        shader: &shader,
        textures: [None; 4],
        depth_enabled: true,
        blend_enabled: false,
        culling: CullMode::None,
    });

    let mut color = Surface::new(64, 64, PixelFormat::Rgba8888);
    let mut depth = Surface::new(64, 64, PixelFormat::Float);
    ctx.finish(&mut color, Some(&mut depth));

    let block = color.read_block(0, 0);
    assert_eq!(block.lane(0) as u32, 0xff0000ff, "nearer (red) triangle must win the depth test");
}

#[test]
fn backface_culling_drops_the_wrong_winding() {
    let shader = ConstantColorShader;
    // This vertex order is CW on screen (y grows downward): walking
    // v0 -> v1 -> v2 turns clockwise once mapped into raster space.
    let attribs = [-2.0f32, -2.0, 0.5, 1.0, -2.0, 2.0, 0.5, 1.0, 2.0, -2.0, 0.5, 1.0];
    let indices = [0u32, 1, 2];
    let white = [255u8, 255, 255, 255];

    let mut ctx = RenderContext::new(64, 64);
    ctx.submit_draw_command(DrawState {
        attribs: &attribs,
        attribs_stride: 4,
        vertex_count: 3,
        indices: &indices,
        uniforms: &white,
        shader: &shader,
        textures: [None; 4],
        depth_enabled: false,
        blend_enabled: false,
        culling: CullMode::Cw,
    });

    let mut color = Surface::new(64, 64, PixelFormat::Rgba8888);
    color.clear_tile(0, 0, 0xff000000);
    ctx.finish(&mut color, None);

    let block = color.read_block(0, 0);
    assert_eq!(block.lane(0) as u32, 0xff000000, "CW-wound triangle must be dropped when culling CW faces");
}
