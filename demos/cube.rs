//! Spinning cube demo: renders a rotating, per-vertex-colored cube through
//! `nyuzi_render` and writes each frame out as a PPM, standing in for the
//! Nyuzi firmware's own interactive `3D-renderer/main.cpp` demo (which
//! drives the same model/view/projection/Gourand-shaded pipeline straight
//! to a framebuffer rather than a file).
//!
//! Usage: `demo-cube [output-dir] [frame-count]`

use std::env;
use std::fs;
use std::path::PathBuf;

use nyuzi_math::{Mat4, Vec3};
use nyuzi_render::{CullMode, DrawState, PixelFormat, RenderContext, Shader, Surface, Texture};
use nyuzi_simd::{Mask16, VecF32x16};

const WIDTH: usize = 256;
const HEIGHT: usize = 256;

/// Unit cube, one color per face baked into the vertex so each face reads as
/// a flat (but Gourand-interpolated across a face's diagonal) color.
#[rustfmt::skip]
const VERTICES: [[f32; 6]; 8] = [
    [-1.0, -1.0, -1.0, 1.0, 0.2, 0.2],
    [ 1.0, -1.0, -1.0, 0.2, 1.0, 0.2],
    [ 1.0,  1.0, -1.0, 0.2, 0.2, 1.0],
    [-1.0,  1.0, -1.0, 1.0, 1.0, 0.2],
    [-1.0, -1.0,  1.0, 1.0, 0.2, 1.0],
    [ 1.0, -1.0,  1.0, 0.2, 1.0, 1.0],
    [ 1.0,  1.0,  1.0, 0.9, 0.9, 0.9],
    [-1.0,  1.0,  1.0, 0.3, 0.3, 0.3],
];

#[rustfmt::skip]
const INDICES: [u32; 36] = [
    0, 1, 2, 0, 2, 3, // back
    5, 4, 7, 5, 7, 6, // front
    4, 0, 3, 4, 3, 7, // left
    1, 5, 6, 1, 6, 2, // right
    3, 2, 6, 3, 6, 7, // top
    4, 5, 1, 4, 1, 0, // bottom
];

/// Transforms position attributes by a model-view-projection matrix packed
/// into the draw's uniform bytes (row-major `f32`, 64 bytes), then passes
/// the vertex color straight through to the rasterizer's interpolators.
struct CubeShader;

fn unpack_mvp(uniforms: &[u8]) -> Mat4 {
    let mut rows = [[0.0f32; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            let offset = (r * 4 + c) * 4;
            rows[r][c] = f32::from_le_bytes(uniforms[offset..offset + 4].try_into().unwrap());
        }
    }
    Mat4 { rows }
}

impl Shader for CubeShader {
    fn num_attribs(&self) -> usize {
        6 // x, y, z, r, g, b
    }

    fn num_params(&self) -> usize {
        7 // clip x, y, z, w, r, g, b
    }

    fn shade_vertices(&self, out_params: &mut [VecF32x16], in_attribs: &[VecF32x16], uniforms: &[u8], mask: Mask16) {
        let mvp = unpack_mvp(uniforms);
        for lane in mask.lanes() {
            let x = in_attribs[0].lane(lane);
            let y = in_attribs[1].lane(lane);
            let z = in_attribs[2].lane(lane);
            let clip = mvp.transform_point4(Vec3::new(x, y, z).extend(1.0));
            for (p, v) in [clip.x, clip.y, clip.z, clip.w].into_iter().enumerate() {
                let mut arr = out_params[p].to_array();
                arr[lane] = v;
                out_params[p] = VecF32x16::from_array(arr);
            }
            for (a, p) in [(3, 4), (4, 5), (5, 6)] {
                let mut arr = out_params[p].to_array();
                arr[lane] = in_attribs[a].lane(lane);
                out_params[p] = VecF32x16::from_array(arr);
            }
        }
    }

    fn shade_pixels(&self, out_color: &mut [VecF32x16; 4], in_params: &[VecF32x16], _uniforms: &[u8], _textures: &[Option<&Texture>; 4], _mask: Mask16) {
        out_color[0] = in_params[0]; // r
        out_color[1] = in_params[1]; // g
        out_color[2] = in_params[2]; // b
        out_color[3] = VecF32x16::splat(1.0);
    }
}

fn pack_mvp(m: Mat4) -> [u8; 64] {
    let mut bytes = [0u8; 64];
    for r in 0..4 {
        for c in 0..4 {
            let offset = (r * 4 + c) * 4;
            bytes[offset..offset + 4].copy_from_slice(&m.rows[r][c].to_le_bytes());
        }
    }
    bytes
}

fn write_ppm(path: &PathBuf, surface: &Surface) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(surface.width() * surface.height() * 3 + 32);
    out.extend_from_slice(format!("P6\n{} {}\n255\n", surface.width(), surface.height()).as_bytes());
    for pixel in surface.as_bytes().chunks_exact(4) {
        out.extend_from_slice(&pixel[0..3]); // drop alpha; 0xAABBGGRR is R,G,B,A little-endian
    }
    fs::write(path, out)
}

fn main() -> std::io::Result<()> {
    let mut args = env::args().skip(1);
    let out_dir = args.next().unwrap_or_else(|| "demo-cube-frames".to_string());
    let frame_count: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(8);

    fs::create_dir_all(&out_dir)?;

    let attribs: Vec<f32> = VERTICES.iter().flatten().copied().collect();
    let shader = CubeShader;
    let projection = Mat4::perspective(60f32.to_radians(), WIDTH as f32 / HEIGHT as f32, 0.1, 100.0);
    let view = Mat4::look_at(Vec3::new(0.0, 1.5, 4.0), Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0));

    for frame in 0..frame_count {
        let angle = frame as f32 / frame_count as f32 * std::f32::consts::TAU;
        let model = Mat4::rotation_y(angle);
        let mvp = projection * view * model;
        let uniforms = pack_mvp(mvp);

        let mut ctx = RenderContext::new(WIDTH, HEIGHT);
        ctx.set_clear_color(16, 16, 24);
        ctx.submit_draw_command(DrawState {
            attribs: &attribs,
            attribs_stride: 6,
            vertex_count: VERTICES.len(),
            indices: &INDICES,
            uniforms: &uniforms,
            shader: &shader,
            textures: [None; 4],
            depth_enabled: true,
            blend_enabled: false,
            culling: CullMode::Cw,
        });

        let mut color = Surface::new(WIDTH, HEIGHT, PixelFormat::Rgba8888);
        let mut depth = Surface::new(WIDTH, HEIGHT, PixelFormat::Float);
        ctx.finish(&mut color, Some(&mut depth));

        write_ppm(&PathBuf::from(&out_dir).join(format!("frame{frame:03}.ppm")), &color)?;
    }

    println!("wrote {frame_count} frames to {out_dir}");
    Ok(())
}
