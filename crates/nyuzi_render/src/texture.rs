use nyuzi_simd::{Mask16, VecF32x16, VecI32x16};

use crate::surface::{PixelFormat, Surface};

const MAX_MIPS: usize = 8;

/// A mip pyramid (up to [`MAX_MIPS`] levels) sampled bilinearly or nearest,
/// reading through [`Surface`] (spec §4.3).
pub struct Texture<'a> {
    mips: [Option<Surface<'a>>; MAX_MIPS],
    bilinear: bool,
    base_mip_bits: u32,
}

impl<'a> Texture<'a> {
    pub fn new(bilinear: bool) -> Self {
        Self { mips: std::array::from_fn(|_| None), bilinear, base_mip_bits: 0 }
    }

    pub fn set_bilinear(&mut self, bilinear: bool) {
        self.bilinear = bilinear;
    }

    /// Binds `surface` to `level`. Setting level 0 clears every higher
    /// level and recomputes `base_mip_bits`; asserts `surface`'s dimensions
    /// match `base_width >> level`.
    pub fn set_mip_surface(&mut self, level: usize, surface: Surface<'a>) {
        assert!(level < MAX_MIPS, "mip level {level} out of range");
        if level == 0 {
            assert!(surface.width().is_power_of_two() && surface.height().is_power_of_two(), "texture dimensions must be powers of two");
            self.base_mip_bits = surface.width().leading_zeros() + 1;
            for slot in self.mips.iter_mut().skip(1) {
                *slot = None;
            }
        } else if let Some(base) = &self.mips[0] {
            let expected = base.width() >> level;
            assert_eq!(surface.width(), expected.max(1), "mip {level} width mismatch with base >> {level}");
        }
        self.mips[level] = Some(surface);
    }

    fn max_level(&self) -> usize {
        self.mips.iter().rposition(Option::is_some).unwrap_or(0)
    }

    /// `clz(1/|du|) - base_mip_bits`, clamped to `[0, max_level]` (spec
    /// §4.3). `base_mip_bits = clz(base_width) + 1` folds in the base
    /// surface's size, so `du` here is normalized `[0,1)` texture-space
    /// delta, not a texel-space one. Reimplemented over IEEE exponent bits
    /// rather than a literal integer `clz` of a fixed-point reciprocal,
    /// since `floor(log2(x))` is exactly what the exponent field already
    /// stores for a normalized `f32`.
    fn level_from_du(&self, du: f32) -> usize {
        if du <= 0.0 {
            return 0;
        }
        let floor_log2_du = (((du.to_bits() >> 23) & 0xff) as i32) - 127;
        let level = floor_log2_du + (32 - self.base_mip_bits as i32);
        level.clamp(0, self.max_level() as i32) as usize
    }

    /// Samples 16 texels at normalized `(u, v)` coordinates.
    ///
    /// Mip selection uses `max(|du|, |dv|)` across the quad's adjacent
    /// lanes rather than just `u_1 - u_0`, which is only correct for
    /// horizontally-aligned quads (the source's approximation; SPEC_FULL
    /// resolves the open question in favor of the orientation-independent
    /// form).
    pub fn read_pixels(&self, u: VecF32x16, v: VecF32x16, mask: Mask16, out: &mut [VecF32x16; 4]) {
        let base = self.mips[0].as_ref().expect("texture has no base mip bound");
        let du = (u.lane(1) - u.lane(0)).abs();
        let dv = (v.lane(4) - v.lane(0)).abs();
        let level = self.level_from_du(du.max(dv));
        let surface = self.mips[level].as_ref().unwrap_or(base);

        if self.bilinear {
            self.sample_bilinear(surface, u, v, mask, out);
        } else {
            self.sample_nearest(surface, u, v, mask, out);
        }
    }

    fn wrap_unit(x: f32) -> f32 {
        let f = x.fract();
        if f < 0.0 {
            f + 1.0
        } else {
            f
        }
    }

    fn texel_coords(surface: &Surface, u: f32, v: f32) -> (i32, i32) {
        let wu = Self::wrap_unit(u);
        let wv = 1.0 - Self::wrap_unit(v);
        let tx = ((wu * surface.width() as f32) as i32).rem_euclid(surface.width() as i32);
        let ty = ((wv * surface.height() as f32) as i32).rem_euclid(surface.height() as i32);
        (tx, ty)
    }

    fn sample_nearest(&self, surface: &Surface, u: VecF32x16, v: VecF32x16, mask: Mask16, out: &mut [VecF32x16; 4]) {
        let mut tx = [0i32; 16];
        let mut ty = [0i32; 16];
        for lane in mask.lanes() {
            let (x, y) = Self::texel_coords(surface, u.lane(lane), v.lane(lane));
            tx[lane] = x;
            ty[lane] = y;
        }
        surface.read_pixels(VecI32x16::from_array(tx), VecI32x16::from_array(ty), mask, out);
    }

    fn sample_bilinear(&self, surface: &Surface, u: VecF32x16, v: VecF32x16, mask: Mask16, out: &mut [VecF32x16; 4]) {
        let w = surface.width() as i32;
        let h = surface.height() as i32;
        let mut tl = [VecF32x16::splat(0.0); 4];
        let mut tr = [VecF32x16::splat(0.0); 4];
        let mut bl = [VecF32x16::splat(0.0); 4];
        let mut br = [VecF32x16::splat(0.0); 4];
        let mut wu = [0.0f32; 16];
        let mut wv = [0.0f32; 16];
        let mut tx0 = [0i32; 16];
        let mut ty0 = [0i32; 16];
        let mut tx1 = [0i32; 16];
        let mut ty1 = [0i32; 16];

        for lane in mask.lanes() {
            let uu = Self::wrap_unit(u.lane(lane)) * w as f32;
            let vv = (1.0 - Self::wrap_unit(v.lane(lane))) * h as f32;
            let x0 = uu.floor();
            let y0 = vv.floor();
            wu[lane] = uu - x0;
            wv[lane] = vv - y0;
            tx0[lane] = (x0 as i32).rem_euclid(w);
            ty0[lane] = (y0 as i32).rem_euclid(h);
            tx1[lane] = (tx0[lane] + 1).rem_euclid(w);
            ty1[lane] = (ty0[lane] + 1).rem_euclid(h);
        }

        surface.read_pixels(VecI32x16::from_array(tx0), VecI32x16::from_array(ty0), mask, &mut tl);
        surface.read_pixels(VecI32x16::from_array(tx1), VecI32x16::from_array(ty0), mask, &mut tr);
        surface.read_pixels(VecI32x16::from_array(tx0), VecI32x16::from_array(ty1), mask, &mut bl);
        surface.read_pixels(VecI32x16::from_array(tx1), VecI32x16::from_array(ty1), mask, &mut br);

        for channel in 0..4 {
            let mut result = [0.0f32; 16];
            for lane in mask.lanes() {
                let w_tl = (1.0 - wu[lane]) * (1.0 - wv[lane]);
                let w_tr = wu[lane] * (1.0 - wv[lane]);
                let w_bl = (1.0 - wu[lane]) * wv[lane];
                let w_br = wu[lane] * wv[lane];
                result[lane] = tl[channel].lane(lane) * w_tl
                    + tr[channel].lane(lane) * w_tr
                    + bl[channel].lane(lane) * w_bl
                    + br[channel].lane(lane) * w_br;
            }
            out[channel] = VecF32x16::from_array(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: usize) -> Surface<'static> {
        let mut s = Surface::new(size, size, PixelFormat::Rgba8888);
        for y in 0..size {
            for x in 0..size {
                let v = if (x + y) % 2 == 0 { 0xffffffffu32 } else { 0xff000000u32 };
                s.write_block_masked(x - x % 4, y - y % 4, nyuzi_simd::Mask16::from_bits(1 << ((y % 4) * 4 + x % 4)), VecI32x16::splat(v as i32));
            }
        }
        s
    }

    #[test]
    fn set_mip_zero_resets_higher_levels() {
        let mut tex = Texture::new(false);
        tex.set_mip_surface(0, checkerboard(8));
        tex.set_mip_surface(1, checkerboard(4));
        assert!(tex.mips[1].is_some());
        tex.set_mip_surface(0, checkerboard(8));
        assert!(tex.mips[1].is_none());
    }

    #[test]
    fn nearest_sample_matches_unpacked_texel_at_center() {
        let mut tex = Texture::new(false);
        let mut s = Surface::new(8, 8, PixelFormat::Rgba8888);
        s.write_block_masked(0, 0, Mask16::ALL, VecI32x16::splat(0x11223344));
        s.write_block_masked(4, 0, Mask16::ALL, VecI32x16::splat(0x11223344));
        s.write_block_masked(0, 4, Mask16::ALL, VecI32x16::splat(0x11223344));
        s.write_block_masked(4, 4, Mask16::ALL, VecI32x16::splat(0x11223344));
        tex.set_mip_surface(0, s);
        let u = VecF32x16::splat(0.5 / 8.0);
        let v = VecF32x16::splat(1.0 - 0.5 / 8.0);
        let mut out = [VecF32x16::splat(0.0); 4];
        tex.read_pixels(u, v, Mask16::ALL, &mut out);
        assert!((out[0].lane(0) - (0x44 as f32 / 255.0)).abs() < 1e-5);
    }
}
