use nyuzi_simd::{Mask16, VecF32x16};

use crate::texture::Texture;

/// The programmable halves of a draw: vertex shading (attributes → clip-
/// space position plus interpolated parameters) and pixel shading
/// (parameters → color). Reexpressed from the source's abstract-base
/// `VertexShader`/`PixelShader` classes as a capability pair carried by the
/// draw state rather than a class hierarchy the application subclasses
/// (spec §9) — these are the only two dynamic-dispatch call sites in the
/// whole pipeline.
pub trait Shader: Sync {
    /// Attribute slots consumed per vertex.
    fn num_attribs(&self) -> usize;
    /// Parameter slots produced per vertex; the first four must be
    /// clip-space `(x, y, z, w)`.
    fn num_params(&self) -> usize;

    /// Shades 16 vertices at once: `in_attribs[a]` holds attribute slot `a`
    /// across all 16 lanes, `out_params[p]` receives parameter slot `p`.
    /// Lanes with `mask` bit clear are padding and may be ignored.
    fn shade_vertices(&self, out_params: &mut [VecF32x16], in_attribs: &[VecF32x16], uniforms: &[u8], mask: Mask16);

    /// Shades 16 pixels (a quad): `in_params[p]` holds interpolated
    /// parameter slot `p` (position already stripped), `textures` are the
    /// four bound texture slots, `out_color` receives `[r, g, b, a]`.
    fn shade_pixels(
        &self,
        out_color: &mut [VecF32x16; 4],
        in_params: &[VecF32x16],
        uniforms: &[u8],
        textures: &[Option<&Texture>; 4],
        mask: Mask16,
    );
}
