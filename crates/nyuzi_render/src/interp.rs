use nyuzi_simd::VecF32x16;

/// A plane `c(x, y) = gx*x + gy*y + c00` in screen space, solved from three
/// `(x, y, c)` samples via Cramer's rule (spec §4.5).
#[derive(Clone, Copy, Debug)]
pub struct LinearInterpolator {
    pub gx: f32,
    pub gy: f32,
    pub c00: f32,
}

impl LinearInterpolator {
    pub fn new(x: [f32; 3], y: [f32; 3], c: [f32; 3]) -> Self {
        let x10 = x[1] - x[0];
        let x20 = x[2] - x[0];
        let y10 = y[1] - y[0];
        let y20 = y[2] - y[0];
        let c10 = c[1] - c[0];
        let c20 = c[2] - c[0];
        let det = x10 * y20 - y10 * x20;
        let gx = (c10 * y20 - y10 * c20) / det;
        let gy = (x10 * c20 - c10 * x20) / det;
        let c00 = c[0] - x[0] * gx - y[0] * gy;
        Self { gx, gy, c00 }
    }

    pub fn eval(&self, x: VecF32x16, y: VecF32x16) -> VecF32x16 {
        x * VecF32x16::splat(self.gx) + y * VecF32x16::splat(self.gy) + VecF32x16::splat(self.c00)
    }

    pub fn eval_scalar(&self, x: f32, y: f32) -> f32 {
        self.gx * x + self.gy * y + self.c00
    }
}

/// One interpolated shader parameter across a triangle: either a constant
/// (all three vertex values equal — no plane needed), or a plane evaluated
/// in `1/z`-scaled coordinates and corrected back to screen space at each
/// quad (spec §4.5's perspective-correct interpolation).
#[derive(Clone, Copy, Debug)]
pub enum ParameterInterpolator {
    Constant(f32),
    Plane(LinearInterpolator),
}

impl ParameterInterpolator {
    /// `c`: the parameter's value at the three vertices. `one_over_z`,
    /// when `Some`, is `1/z` at the three vertices and the plane is solved
    /// over `c/z` so that `eval` can multiply back by the interpolated `z`
    /// at each pixel; when `None` (all three vertex `z` equal) the plane is
    /// solved directly over `c` and no per-pixel correction is needed.
    pub fn new(x: [f32; 3], y: [f32; 3], c: [f32; 3], one_over_z: Option<[f32; 3]>) -> Self {
        if c[0] == c[1] && c[1] == c[2] {
            return ParameterInterpolator::Constant(c[0]);
        }
        let plane_values = match one_over_z {
            Some(z) => [c[0] * z[0], c[1] * z[1], c[2] * z[2]],
            None => c,
        };
        ParameterInterpolator::Plane(LinearInterpolator::new(x, y, plane_values))
    }

    /// `z_pixel` is the already-perspective-corrected `z` at these lanes
    /// (ignored for `Constant` and for planes built with `one_over_z: None`
    /// — callers pass `None` for `needs_perspective` in that case).
    pub fn eval(&self, x: VecF32x16, y: VecF32x16, z_pixel: Option<VecF32x16>) -> VecF32x16 {
        match self {
            ParameterInterpolator::Constant(v) => VecF32x16::splat(*v),
            ParameterInterpolator::Plane(li) => {
                let raw = li.eval(x, y);
                match z_pixel {
                    Some(z) => raw * z,
                    None => raw,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_interpolator_reproduces_vertex_values() {
        let x = [0.0, 10.0, 0.0];
        let y = [0.0, 0.0, 10.0];
        let c = [1.0, 4.0, 7.0];
        let li = LinearInterpolator::new(x, y, c);
        for i in 0..3 {
            let v = li.eval_scalar(x[i], y[i]);
            assert!((v - c[i]).abs() < 1e-4, "vertex {i}: {v} != {}", c[i]);
        }
    }

    #[test]
    fn constant_parameter_skips_plane_solve() {
        let p = ParameterInterpolator::new([0.0, 1.0, 2.0], [0.0, 1.0, 0.0], [5.0, 5.0, 5.0], None);
        assert!(matches!(p, ParameterInterpolator::Constant(v) if v == 5.0));
    }

    #[test]
    fn perspective_plane_corrects_back_to_screen_space() {
        let x = [0.0, 10.0, 0.0];
        let y = [0.0, 0.0, 10.0];
        let z = [1.0, 2.0, 4.0];
        let one_over_z = [1.0 / z[0], 1.0 / z[1], 1.0 / z[2]];
        let c = [2.0, 4.0, 8.0]; // c/z is constant (== 2.0) at all three vertices
        let p = ParameterInterpolator::new(x, y, c, Some(one_over_z));
        let z_pixel = VecF32x16::splat(z[0]);
        let v = p.eval(VecF32x16::splat(x[0]), VecF32x16::splat(y[0]), Some(z_pixel));
        assert!((v.lane(0) - c[0]).abs() < 1e-3);
    }
}
