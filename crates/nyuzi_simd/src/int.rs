use std::ops::{Add, BitAnd, BitOr, BitXor, Index, IndexMut, Mul, Sub};

use crate::{Mask16, VecF32x16};

pub const LANES: usize = 16;

/// A 16-lane vector of `i32` elements, bit-reinterpretable as either signed
/// or unsigned depending on which op is called — matches the hardware,
/// which has no distinct unsigned register class, only unsigned variants of
/// compare/shift/multiply instructions (spec §4.9: `CMPGT_U` vs `CMPGT_I`,
/// `SHR` (logical) vs `ASHR` (arithmetic), `MULH_U` vs `MULH_I`).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct VecI32x16(pub [i32; LANES]);

impl VecI32x16 {
    pub const fn splat(v: i32) -> Self {
        Self([v; LANES])
    }

    pub const fn from_array(v: [i32; LANES]) -> Self {
        Self(v)
    }

    pub const fn to_array(self) -> [i32; LANES] {
        self.0
    }

    pub fn lane(self, i: usize) -> i32 {
        self.0[i]
    }

    pub fn map(self, f: impl Fn(i32) -> i32) -> Self {
        let mut out = [0i32; LANES];
        for i in 0..LANES {
            out[i] = f(self.0[i]);
        }
        Self(out)
    }

    fn zip(self, rhs: Self, f: impl Fn(i32, i32) -> i32) -> Self {
        let mut out = [0i32; LANES];
        for i in 0..LANES {
            out[i] = f(self.0[i], rhs.0[i]);
        }
        Self(out)
    }

    pub fn wrapping_add(self, rhs: Self) -> Self {
        self.zip(rhs, i32::wrapping_add)
    }

    pub fn wrapping_sub(self, rhs: Self) -> Self {
        self.zip(rhs, i32::wrapping_sub)
    }

    pub fn wrapping_mul(self, rhs: Self) -> Self {
        self.zip(rhs, i32::wrapping_mul)
    }

    /// `MULH_I`: high 32 bits of a signed 64-bit product.
    pub fn mulh_signed(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| (((a as i64) * (b as i64)) >> 32) as i32)
    }

    /// `MULH_U`: high 32 bits of an unsigned 64-bit product.
    pub fn mulh_unsigned(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| (((a as u32 as u64) * (b as u32 as u64)) >> 32) as i32)
    }

    /// `SHR`: logical (unsigned) right shift.
    pub fn shr_logical(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| ((a as u32) >> (b as u32 & 31)) as i32)
    }

    /// `ASHR`: arithmetic (sign-extending) right shift.
    pub fn shr_arithmetic(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a >> (b as u32 & 31))
    }

    pub fn shl(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| ((a as u32) << (b as u32 & 31)) as i32)
    }

    pub fn clz(self) -> Self {
        self.map(|a| (a as u32).leading_zeros() as i32)
    }

    pub fn ctz(self) -> Self {
        self.map(|a| if a == 0 { 32 } else { (a as u32).trailing_zeros() as i32 })
    }

    pub fn sext8(self) -> Self {
        self.map(|a| (a as i8) as i32)
    }

    pub fn sext16(self) -> Self {
        self.map(|a| (a as i16) as i32)
    }

    /// `SHUFFLE`: lane `i` of the result is lane `indices[i] & 0xf` of
    /// `self`, a full cross-lane permute (spec §4.9).
    pub fn shuffle(self, indices: Self) -> Self {
        let mut out = [0i32; LANES];
        for i in 0..LANES {
            out[i] = self.0[(indices.0[i] as usize) & 0xf];
        }
        Self(out)
    }

    /// `GETLANE`: extract one lane as a scalar.
    pub fn get_lane(self, lane: i32) -> i32 {
        self.0[(lane as usize) & 0xf]
    }

    pub fn cmp_eq(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| a == b)
    }

    pub fn cmp_ne(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| a != b)
    }

    pub fn cmp_gt_signed(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| a > b)
    }

    pub fn cmp_ge_signed(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| a >= b)
    }

    pub fn cmp_lt_signed(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| a < b)
    }

    pub fn cmp_le_signed(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| a <= b)
    }

    pub fn cmp_gt_unsigned(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| (a as u32) > (b as u32))
    }

    pub fn cmp_ge_unsigned(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| (a as u32) >= (b as u32))
    }

    pub fn cmp_lt_unsigned(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| (a as u32) < (b as u32))
    }

    pub fn cmp_le_unsigned(self, rhs: Self) -> Mask16 {
        self.cmp(rhs, |a, b| (a as u32) <= (b as u32))
    }

    fn cmp(self, rhs: Self, f: impl Fn(i32, i32) -> bool) -> Mask16 {
        let mut mask = Mask16::NONE;
        for i in 0..LANES {
            mask.set_bit(i, f(self.0[i], rhs.0[i]));
        }
        mask
    }

    /// `select(mask, a, b)`: lane `i` is `a[i]` where `mask` bit `i` is set,
    /// `b[i]` otherwise.
    pub fn select(mask: Mask16, a: Self, b: Self) -> Self {
        let mut out = [0i32; LANES];
        for i in 0..LANES {
            out[i] = if mask.bit(i) { a.0[i] } else { b.0[i] };
        }
        Self(out)
    }

    /// `FTOI`/int-from-float truncation toward zero, used by the pixel
    /// shader path and by `RECIPROCAL`'s sibling conversions.
    pub fn from_float_trunc(v: VecF32x16) -> Self {
        v.map(|f| f as i32).into()
    }

    pub fn to_float(self) -> VecF32x16 {
        VecF32x16(self.0.map(|v| v as f32))
    }
}

impl From<[i32; LANES]> for VecI32x16 {
    fn from(v: [i32; LANES]) -> Self {
        Self(v)
    }
}

impl Index<usize> for VecI32x16 {
    type Output = i32;
    fn index(&self, i: usize) -> &i32 {
        &self.0[i]
    }
}

impl IndexMut<usize> for VecI32x16 {
    fn index_mut(&mut self, i: usize) -> &mut i32 {
        &mut self.0[i]
    }
}

impl Add for VecI32x16 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.wrapping_add(rhs)
    }
}

impl Sub for VecI32x16 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.wrapping_sub(rhs)
    }
}

impl Mul for VecI32x16 {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        self.wrapping_mul(rhs)
    }
}

impl BitAnd for VecI32x16 {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a & b)
    }
}

impl BitOr for VecI32x16 {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a | b)
    }
}

impl BitXor for VecI32x16 {
    type Output = Self;
    fn bitxor(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a ^ b)
    }
}

/// Gather 32-bit little-endian words from `mem` at `byte_offsets`, one per
/// lane. Lanes where `mask` is clear are left as `0`. This is the safe,
/// slice-indexed replacement for the hardware's pointer-vector gather
/// (`DESIGN NOTES`, "pointer-based surface addressing").
pub fn gather_u32(mem: &[u8], byte_offsets: VecI32x16, mask: Mask16) -> VecI32x16 {
    let mut out = [0i32; LANES];
    for lane in 0..LANES {
        if mask.bit(lane) {
            let off = byte_offsets.0[lane] as usize;
            out[lane] = i32::from_le_bytes(mem[off..off + 4].try_into().unwrap());
        }
    }
    VecI32x16(out)
}

/// Scatter 32-bit little-endian words into `mem` at `byte_offsets`. Lanes
/// where `mask` is clear leave the destination untouched.
pub fn scatter_u32(mem: &mut [u8], byte_offsets: VecI32x16, values: VecI32x16, mask: Mask16) {
    for lane in 0..LANES {
        if mask.bit(lane) {
            let off = byte_offsets.0[lane] as usize;
            mem[off..off + 4].copy_from_slice(&values.0[lane].to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shuffle_selects_lanes_modulo_16() {
        let v = VecI32x16::from_array(std::array::from_fn(|i| i as i32));
        let idx = VecI32x16::splat(0x1f); // & 0xf == 15
        assert_eq!(v.shuffle(idx), VecI32x16::splat(15));
    }

    #[test]
    fn unsigned_vs_signed_compare_differ_on_negative() {
        let a = VecI32x16::splat(-1);
        let b = VecI32x16::splat(0);
        assert!(a.cmp_lt_signed(b).all());
        assert!(a.cmp_gt_unsigned(b).all());
    }

    #[test]
    fn select_picks_masked_lanes() {
        let a = VecI32x16::splat(1);
        let b = VecI32x16::splat(2);
        let mask = Mask16::from_bits(0b0000_0000_0000_0011);
        let r = VecI32x16::select(mask, a, b);
        assert_eq!(r.lane(0), 1);
        assert_eq!(r.lane(1), 1);
        assert_eq!(r.lane(2), 2);
    }

    #[test]
    fn gather_scatter_round_trip_masked() {
        let mut mem = vec![0u8; 256];
        let values = VecI32x16::from_array(std::array::from_fn(|i| i as i32 * 10));
        let offsets = VecI32x16::from_array(std::array::from_fn(|i| (i * 4) as i32));
        let mask = Mask16::from_bits(0b1010_1010_1010_1010);
        scatter_u32(&mut mem, offsets, values, mask);
        let gathered = gather_u32(&mem, offsets, Mask16::ALL);
        for lane in 0..16 {
            if mask.bit(lane) {
                assert_eq!(gathered.lane(lane), lane as i32 * 10);
            } else {
                assert_eq!(gathered.lane(lane), 0);
            }
        }
    }

    #[test]
    fn mulh_matches_64_bit_reference() {
        let a = VecI32x16::splat(i32::MAX);
        let b = VecI32x16::splat(2);
        assert_eq!(a.mulh_signed(b).lane(0), (((i32::MAX as i64) * 2) >> 32) as i32);
        assert_eq!(a.mulh_unsigned(b).lane(0), (((i32::MAX as u32 as u64) * 2) >> 32) as i32);
    }
}
