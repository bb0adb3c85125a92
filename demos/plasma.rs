//! Sum-of-sines "plasma" pixel shader demo, grounded in
//! `original_source/software/apps/plasma/plasma.cpp`: a full-screen quad
//! whose pixel shader sums four sine waves of screen position and time and
//! looks the result up in a 512-entry color palette. The original drives
//! this straight into a memory-mapped framebuffer from four hardware
//! threads; here it's one `RenderContext::finish` call per frame, written
//! out as a PPM sequence.
//!
//! Usage: `demo-plasma [output-dir] [frame-count]`

use std::env;
use std::fs;
use std::path::PathBuf;

use nyuzi_render::{CullMode, DrawState, PixelFormat, RenderContext, Shader, Surface, Texture};
use nyuzi_simd::{Mask16, VecF32x16};

const WIDTH: usize = 256;
const HEIGHT: usize = 256;
const NUM_PALETTE_ENTRIES: usize = 512;

fn build_palette() -> [u32; NUM_PALETTE_ENTRIES] {
    let mut palette = [0u32; NUM_PALETTE_ENTRIES];
    for (i, entry) in palette.iter_mut().enumerate() {
        let r = (128.0 + 127.0 * (std::f32::consts::PI * i as f32 / (NUM_PALETTE_ENTRIES as f32 / 8.0)).sin()) as u32;
        let g = (128.0 + 127.0 * (std::f32::consts::PI * i as f32 / (NUM_PALETTE_ENTRIES as f32 / 4.0)).sin()) as u32;
        let b = (128.0 + 127.0 * (std::f32::consts::PI * i as f32 / (NUM_PALETTE_ENTRIES as f32 / 2.0)).sin()) as u32;
        *entry = r | (g << 8) | (b << 16) | (0xffu32 << 24); // 0xAABBGGRR
    }
    palette
}

/// A full-screen quad: clip-space position passes through unchanged, object
/// space (x, y) is carried as an extra pair of parameters for the pixel
/// shader's plasma math.
struct PlasmaShader;

fn unpack_time(uniforms: &[u8]) -> f32 {
    f32::from_le_bytes(uniforms[0..4].try_into().unwrap())
}

fn palette_entry(uniforms: &[u8], index: usize) -> u32 {
    let offset = 4 + index.min(NUM_PALETTE_ENTRIES - 1) * 4;
    u32::from_le_bytes(uniforms[offset..offset + 4].try_into().unwrap())
}

impl Shader for PlasmaShader {
    fn num_attribs(&self) -> usize {
        2 // x, y in [-1, 1]
    }

    fn num_params(&self) -> usize {
        6 // clip x, y, z, w, object x, object y
    }

    fn shade_vertices(&self, out_params: &mut [VecF32x16], in_attribs: &[VecF32x16], _uniforms: &[u8], mask: Mask16) {
        for lane in mask.lanes() {
            let x = in_attribs[0].lane(lane);
            let y = in_attribs[1].lane(lane);
            for (p, v) in [(0, x), (1, y), (2, 0.0), (3, 1.0), (4, x), (5, y)] {
                let mut arr = out_params[p].to_array();
                arr[lane] = v;
                out_params[p] = VecF32x16::from_array(arr);
            }
        }
    }

    fn shade_pixels(&self, out_color: &mut [VecF32x16; 4], in_params: &[VecF32x16], uniforms: &[u8], _textures: &[Option<&Texture>; 4], mask: Mask16) {
        let t = unpack_time(uniforms);
        let xv = in_params[4];
        let yv = in_params[5];

        // Host `sin` in place of the original's fixed-point polynomial
        // approximation (`fast_sinfv`) — no accuracy constraint here, only
        // the same four-term sum-of-sines shape.
        let mut intensity = (xv * VecF32x16::splat(3.5) + VecF32x16::splat(t)).map(f32::sin);
        intensity = intensity + ((yv - VecF32x16::splat(t)) * VecF32x16::splat(1.75)).map(f32::sin);
        intensity = intensity + ((xv + yv * VecF32x16::splat(0.3) + VecF32x16::splat(t)) * VecF32x16::splat(1.75)).map(f32::sin);
        let radius = (xv * xv + yv * yv).map(f32::sqrt);
        intensity = intensity + (radius * VecF32x16::splat(0.7) + VecF32x16::splat(t)).map(f32::sin);

        let mut r = VecF32x16::splat(0.0);
        let mut g = VecF32x16::splat(0.0);
        let mut b = VecF32x16::splat(0.0);
        for lane in mask.lanes() {
            let index = ((intensity.lane(lane) * (NUM_PALETTE_ENTRIES as f32 / 8.0) + NUM_PALETTE_ENTRIES as f32 / 2.0) as i32).clamp(0, NUM_PALETTE_ENTRIES as i32 - 1) as usize;
            let entry = palette_entry(uniforms, index);
            let mut arr = r.to_array();
            arr[lane] = (entry & 0xff) as f32 / 255.0;
            r = VecF32x16::from_array(arr);
            let mut arr = g.to_array();
            arr[lane] = ((entry >> 8) & 0xff) as f32 / 255.0;
            g = VecF32x16::from_array(arr);
            let mut arr = b.to_array();
            arr[lane] = ((entry >> 16) & 0xff) as f32 / 255.0;
            b = VecF32x16::from_array(arr);
        }
        out_color[0] = r;
        out_color[1] = g;
        out_color[2] = b;
        out_color[3] = VecF32x16::splat(1.0);
    }
}

fn build_uniforms(time: f32, palette: &[u32; NUM_PALETTE_ENTRIES]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + NUM_PALETTE_ENTRIES * 4);
    bytes.extend_from_slice(&time.to_le_bytes());
    for entry in palette {
        bytes.extend_from_slice(&entry.to_le_bytes());
    }
    bytes
}

fn write_ppm(path: &PathBuf, surface: &Surface) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(surface.width() * surface.height() * 3 + 32);
    out.extend_from_slice(format!("P6\n{} {}\n255\n", surface.width(), surface.height()).as_bytes());
    for pixel in surface.as_bytes().chunks_exact(4) {
        out.extend_from_slice(&pixel[0..3]);
    }
    fs::write(path, out)
}

fn main() -> std::io::Result<()> {
    let mut args = env::args().skip(1);
    let out_dir = args.next().unwrap_or_else(|| "demo-plasma-frames".to_string());
    let frame_count: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(8);

    fs::create_dir_all(&out_dir)?;

    let palette = build_palette();
    let shader = PlasmaShader;
    #[rustfmt::skip]
    let attribs: [f32; 8] = [
        -1.0, -1.0,
         1.0, -1.0,
         1.0,  1.0,
        -1.0,  1.0,
    ];
    let indices = [0u32, 1, 2, 0, 2, 3];

    for frame in 0..frame_count {
        let time = frame as f32 / 15.0;
        let uniforms = build_uniforms(time, &palette);

        let mut ctx = RenderContext::new(WIDTH, HEIGHT);
        ctx.submit_draw_command(DrawState {
            attribs: &attribs,
            attribs_stride: 2,
            vertex_count: 4,
            indices: &indices,
            uniforms: &uniforms,
            shader: &shader,
            textures: [None; 4],
            depth_enabled: false,
            blend_enabled: false,
            culling: CullMode::None,
        });

        let mut color = Surface::new(WIDTH, HEIGHT, PixelFormat::Rgba8888);
        ctx.finish(&mut color, None);

        write_ppm(&PathBuf::from(&out_dir).join(format!("frame{frame:03}.ppm")), &color)?;
    }

    println!("wrote {frame_count} frames to {out_dir}");
    Ok(())
}
