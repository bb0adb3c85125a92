use nyuzi_simd::{Mask16, VecF32x16, VecI32x16};

use crate::interp::{LinearInterpolator, ParameterInterpolator};
use crate::shader::Shader;
use crate::surface::{Surface, QUAD_SIZE};
use crate::texture::Texture;

const QUAD_LANES: usize = QUAD_SIZE * QUAD_SIZE;

/// Per-lane screen-space offset of a 4×4 quad's pixel centers from its
/// upper-left corner, in the same row-major lane order as
/// [`crate::surface::Surface`]'s block layout.
fn quad_offsets() -> ([f32; QUAD_LANES], [f32; QUAD_LANES]) {
    let mut ox = [0.0f32; QUAD_LANES];
    let mut oy = [0.0f32; QUAD_LANES];
    for lane in 0..QUAD_LANES {
        ox[lane] = (lane % QUAD_SIZE) as f32 + 0.5;
        oy[lane] = (lane / QUAD_SIZE) as f32 + 0.5;
    }
    (ox, oy)
}

/// The per-tile shading delegate: holds one triangle's setup state (screen
/// positions, the 1/z interpolator, and up to 16 parameter interpolators)
/// and fills masked 4×4 quads against it (spec §4.6).
pub struct TriangleFiller<'a, 'shader> {
    x: [f32; 3],
    y: [f32; 3],
    z: [f32; 3],
    one_over_z: Option<LinearInterpolator>,
    params: Vec<ParameterInterpolator>,
    shader: &'shader dyn Shader,
    uniforms: &'shader [u8],
    textures: [Option<&'a Texture<'a>>; 4],
    depth_enabled: bool,
    blend_enabled: bool,
}

impl<'a, 'shader> TriangleFiller<'a, 'shader> {
    pub fn new(
        shader: &'shader dyn Shader,
        uniforms: &'shader [u8],
        textures: [Option<&'a Texture<'a>>; 4],
        depth_enabled: bool,
        blend_enabled: bool,
    ) -> Self {
        Self {
            x: [0.0; 3],
            y: [0.0; 3],
            z: [0.0; 3],
            one_over_z: None,
            params: Vec::with_capacity(16),
            shader,
            uniforms,
            textures,
            depth_enabled,
            blend_enabled,
        }
    }

    /// Stores the triangle's screen-space vertices and the 1/z
    /// interpolator. `z` values equal across all three vertices mean the
    /// triangle needs no perspective correction (`need_perspective` is then
    /// implicitly false — see [`TriangleFiller::needs_perspective`]).
    pub fn set_up_triangle(&mut self, x: [f32; 3], y: [f32; 3], z: [f32; 3]) {
        self.x = x;
        self.y = y;
        self.z = z;
        self.params.clear();
        self.one_over_z =
            if z[0] == z[1] && z[1] == z[2] { None } else { Some(LinearInterpolator::new(x, y, [1.0 / z[0], 1.0 / z[1], 1.0 / z[2]])) };
    }

    /// Appends one parameter interpolator, in the order the shader expects
    /// to read it back from `in_params` during `shade_pixels`.
    pub fn set_up_param(&mut self, c: [f32; 3]) {
        let one_over_z = self.needs_perspective().then(|| [1.0 / self.z[0], 1.0 / self.z[1], 1.0 / self.z[2]]);
        self.params.push(ParameterInterpolator::new(self.x, self.y, c, one_over_z));
    }

    fn needs_perspective(&self) -> bool {
        self.one_over_z.is_some()
    }

    /// Shades, depth-tests, blends, and writes back one 4×4 quad whose
    /// upper-left is `(left, top)`.
    pub fn fill_masked(&self, color: &mut Surface, mut depth: Option<&mut Surface>, left: usize, top: usize, mask: Mask16) {
        if mask.none() {
            return;
        }
        let (ox, oy) = quad_offsets();
        let x = VecF32x16::from_array(std::array::from_fn(|lane| left as f32 + ox[lane]));
        let y = VecF32x16::from_array(std::array::from_fn(|lane| top as f32 + oy[lane]));

        let z_pixel = match &self.one_over_z {
            Some(li) => li.eval(x, y).reciprocal(),
            None => VecF32x16::splat(self.z[0]),
        };

        let mut mask = mask;
        if self.depth_enabled {
            if let Some(depth) = depth.as_deref() {
                let existing_bits = depth.read_block(left, top);
                let existing = VecF32x16::from_array(std::array::from_fn(|lane| f32::from_bits(existing_bits.lane(lane) as u32)));
                mask = mask & z_pixel.cmp_gt(existing);
            }
        }
        if mask.none() {
            return;
        }
        if self.depth_enabled {
            if let Some(depth) = depth.as_deref_mut() {
                let z_bits = VecI32x16::from_array(std::array::from_fn(|lane| z_pixel.lane(lane).to_bits() as i32));
                depth.write_block_masked(left, top, mask, z_bits);
            }
        }

        let z_for_params = self.needs_perspective().then_some(z_pixel);
        let in_params: Vec<VecF32x16> = self.params.iter().map(|p| p.eval(x, y, z_for_params)).collect();

        let mut out_color = [VecF32x16::splat(0.0); 4];
        self.shader.shade_pixels(&mut out_color, &in_params, self.uniforms, &self.textures, mask);

        let src = out_color.map(|c| c.clamp(0.0, 1.0) * VecF32x16::splat(255.0));
        let src_r = VecI32x16::from_array(std::array::from_fn(|l| src[0].lane(l) as i32));
        let src_g = VecI32x16::from_array(std::array::from_fn(|l| src[1].lane(l) as i32));
        let src_b = VecI32x16::from_array(std::array::from_fn(|l| src[2].lane(l) as i32));
        let src_a = VecI32x16::from_array(std::array::from_fn(|l| src[3].lane(l) as i32));

        let any_translucent = mask.lanes().any(|l| src_a.lane(l) < 255);

        let mut out = [0i32; 16];
        if self.blend_enabled && any_translucent {
            let dst = color.read_block(left, top);
            for lane in mask.lanes() {
                let (dr, dg, db) = unpack_rgb(dst.lane(lane) as u32);
                let sa = src_a.lane(lane).clamp(0, 255);
                let r = blend_channel(src_r.lane(lane), dr, sa);
                let g = blend_channel(src_g.lane(lane), dg, sa);
                let b = blend_channel(src_b.lane(lane), db, sa);
                out[lane] = 0xff000000u32 as i32 | r | (g << 8) | (b << 16);
            }
        } else {
            for lane in mask.lanes() {
                let r = src_r.lane(lane).clamp(0, 255);
                let g = src_g.lane(lane).clamp(0, 255);
                let b = src_b.lane(lane).clamp(0, 255);
                out[lane] = 0xff000000u32 as i32 | r | (g << 8) | (b << 16);
            }
        }

        color.write_block_masked(left, top, mask, VecI32x16::from_array(out));
    }
}

fn unpack_rgb(p: u32) -> (i32, i32, i32) {
    ((p & 0xff) as i32, ((p >> 8) & 0xff) as i32, ((p >> 16) & 0xff) as i32)
}

/// `saturate(((src<<8) + dst*(255-alpha)) >> 8)`, premultiplied-alpha blend
/// of one channel (spec §4.6 step 7).
fn blend_channel(src: i32, dst: i32, alpha: i32) -> i32 {
    (((src << 8) + dst * (255 - alpha)) >> 8).clamp(0, 255)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::PixelFormat;

    struct ConstColorShader {
        color: [f32; 4],
    }

    impl Shader for ConstColorShader {
        fn num_attribs(&self) -> usize {
            0
        }
        fn num_params(&self) -> usize {
            0
        }
        fn shade_vertices(&self, _out_params: &mut [VecF32x16], _in_attribs: &[VecF32x16], _uniforms: &[u8], _mask: Mask16) {}
        fn shade_pixels(&self, out_color: &mut [VecF32x16; 4], _in_params: &[VecF32x16], _uniforms: &[u8], _textures: &[Option<&Texture>; 4], _mask: Mask16) {
            for c in 0..4 {
                out_color[c] = VecF32x16::splat(self.color[c]);
            }
        }
    }

    #[test]
    fn opaque_fill_writes_straight_through() {
        let shader = ConstColorShader { color: [0.0, 1.0, 0.0, 1.0] };
        let mut filler = TriangleFiller::new(&shader, &[], [None; 4], false, false);
        filler.set_up_triangle([0.0, 64.0, 0.0], [0.0, 0.0, 64.0], [1.0, 1.0, 1.0]);
        let mut color = Surface::new(64, 64, PixelFormat::Rgba8888);
        filler.fill_masked(&mut color, None, 0, 0, Mask16::ALL);
        let block = color.read_block(0, 0);
        assert_eq!(block.lane(0) as u32, 0xff00ff00);
    }

    #[test]
    fn blend_matches_premultiplied_alpha_formula() {
        let shader = ConstColorShader { color: [0.0, 1.0, 0.0, 0.5] };
        let mut filler = TriangleFiller::new(&shader, &[], [None; 4], false, true);
        filler.set_up_triangle([0.0, 64.0, 0.0], [0.0, 0.0, 64.0], [1.0, 1.0, 1.0]);
        let mut color = Surface::new(64, 64, PixelFormat::Rgba8888);
        color.clear_tile(0, 0, 0xff0000ff); // opaque red, 0xAABBGGRR layout
        filler.fill_masked(&mut color, None, 0, 0, Mask16::ALL);
        let block = color.read_block(0, 0);
        let p = block.lane(0) as u32;
        let r = p & 0xff;
        let g = (p >> 8) & 0xff;
        let b = (p >> 16) & 0xff;
        assert_eq!(r, 127);
        assert_eq!(g, 255);
        assert_eq!(b, 0);
    }
}
