use std::sync::atomic::{AtomicU64, Ordering};

use nyuzi_common::{log_debug, LogCategory, SliceArray};
use nyuzi_jobs::JobSystem;
use nyuzi_simd::{Mask16, VecF32x16};

use crate::filler::TriangleFiller;
use crate::rasterizer::{rasterize_tile, EdgeSet};
use crate::shader::Shader;
use crate::surface::{Surface, TILE_SIZE};
use crate::texture::Texture;

fn category() -> LogCategory {
    LogCategory::new("render")
}

/// Triangle winding / culling mode (spec §4.8 "Apply culling mode").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CullMode {
    None,
    Cw,
    Ccw,
}

/// A value record carrying everything one `submit_draw_command` needs: the
/// vertex attribute and index buffers, uniform blob, shader pair, texture
/// bindings, and per-draw state (spec §3.1 DrawState/RenderState). Attribute
/// and parameter buffers are vertex-major: vertex `v`'s attribute `a` is at
/// `attribs[v * attribs_stride + a]`.
pub struct DrawState<'a> {
    pub attribs: &'a [f32],
    pub attribs_stride: usize,
    pub vertex_count: usize,
    pub indices: &'a [u32],
    pub uniforms: &'a [u8],
    pub shader: &'a dyn Shader,
    pub textures: [Option<&'a Texture<'a>>; 4],
    pub depth_enabled: bool,
    pub blend_enabled: bool,
    pub culling: CullMode,
}

/// A triangle after vertex shading, clipping, and setup: sequence number
/// (submission order), the draw it belongs to, its three post-divide
/// screen-space positions, and its interpolated parameters with position
/// stripped (spec §3.1 Triangle). Triangles live in per-tile queues and are
/// dropped wholesale when the frame's queues are cleared at `finish()`.
#[derive(Clone)]
struct Triangle {
    sequence: u64,
    draw: usize,
    x: [f32; 3],
    y: [f32; 3],
    z: [f32; 3],
    ccw: bool,
    /// One entry per non-position parameter, each holding that parameter's
    /// value at the three vertices.
    params: Vec<[f32; 3]>,
}

const SHARED_TILE_BUCKET_SIZE: usize = 64;

/// Sort-middle tile-based render context (spec §4.8): accumulates draw
/// commands, then on `finish()` shades vertices, clips, bins triangles into
/// tile queues, and fills every tile — all three phases are
/// `parallel_execute` join points (spec §5).
pub struct RenderContext<'a> {
    target_width: usize,
    target_height: usize,
    tile_columns: usize,
    tile_rows: usize,
    clear_color: u32,
    wireframe: bool,
    draws: Vec<DrawState<'a>>,
    next_sequence: AtomicU64,
    jobs: JobSystem,
}

impl<'a> RenderContext<'a> {
    pub fn new(target_width: usize, target_height: usize) -> Self {
        assert_eq!(target_width % TILE_SIZE, 0, "render target width must be a multiple of the tile size");
        assert_eq!(target_height % TILE_SIZE, 0, "render target height must be a multiple of the tile size");
        Self {
            target_width,
            target_height,
            tile_columns: target_width / TILE_SIZE,
            tile_rows: target_height / TILE_SIZE,
            clear_color: 0xff000000,
            wireframe: false,
            draws: Vec::new(),
            next_sequence: AtomicU64::new(0),
            jobs: JobSystem::with_default_workers(),
        }
    }

    pub fn set_clear_color(&mut self, r: u8, g: u8, b: u8) {
        self.clear_color = 0xff000000 | (r as u32) | (g as u32) << 8 | (b as u32) << 16;
    }

    pub fn enable_wireframe_mode(&mut self, on: bool) {
        self.wireframe = on;
    }

    pub fn submit_draw_command(&mut self, draw: DrawState<'a>) {
        self.draws.push(draw);
    }

    /// Executes every queued draw against `target`, then clears the queue.
    /// The frame's tile queues are local to this call, so there is nothing
    /// persistent to reset afterward beyond the draw list itself (spec §4.8
    /// step 4 "reset draw queue then slab allocator" — here the "slab" is
    /// simply these locals going out of scope).
    pub fn finish(&mut self, target: &mut Surface, mut depth: Option<&mut Surface>) {
        let tile_count = self.tile_columns * self.tile_rows;
        let tile_queues: Vec<SliceArray<Triangle>> = (0..tile_count).map(|_| SliceArray::new(SHARED_TILE_BUCKET_SIZE)).collect();

        for draw_index in 0..self.draws.len() {
            self.setup_draw(draw_index, &tile_queues);
        }

        log_debug!(category(), "finish: {} draws, {} tiles", self.draws.len(), tile_count);

        let jobs = &self.jobs;
        let color_ptr = target as *mut Surface as usize;
        let depth_ptr = depth.as_deref_mut().map(|d| d as *mut Surface as usize);
        let wireframe = self.wireframe;
        let clear_color = self.clear_color;
        let draws = &self.draws;
        let tile_columns = self.tile_columns;

        jobs.parallel_execute(tile_count, |tile_index| {
            let tile_col = tile_index % tile_columns;
            let tile_row = tile_index / tile_columns;
            let left = tile_col * TILE_SIZE;
            let top = tile_row * TILE_SIZE;

            // SAFETY: every tile owns a disjoint (left, top) rectangle of
            // both surfaces (spec §5's tile partitioning), so reconstructing
            // one `&mut Surface` per tile from the shared base pointer never
            // hands out overlapping mutable views despite many worker
            // threads doing it concurrently — the same disjoint-range
            // argument `FrameArena::alloc_slice` relies on.
            let color_ref: &mut Surface = unsafe { &mut *(color_ptr as *mut Surface) };
            let depth_ref: Option<&mut Surface> = depth_ptr.map(|p| unsafe { &mut *(p as *mut Surface) });

            if wireframe {
                wireframe_tile(color_ref, depth_ref, &tile_queues[tile_index], draws, left, top, clear_color);
            } else {
                fill_tile(color_ref, depth_ref, &tile_queues[tile_index], draws, left, top, clear_color);
            }
        });

        self.draws.clear();
    }

    fn setup_draw(&self, draw_index: usize, tile_queues: &[SliceArray<Triangle>]) {
        let draw = &self.draws[draw_index];
        let num_params = draw.shader.num_params();
        let num_attribs = draw.shader.num_attribs();
        assert!(num_params >= 4, "shader must output at least clip-space x,y,z,w");

        let mut vertex_params = vec![0.0f32; draw.vertex_count * num_params];
        shade_vertices(draw, num_attribs, num_params, &mut vertex_params, &self.jobs);

        let num_triangles = draw.indices.len() / 3;
        let base_sequence = self.next_sequence.fetch_add(num_triangles as u64, Ordering::Relaxed);
        let target_w = self.target_width;
        let target_h = self.target_height;
        let tile_columns = self.tile_columns;
        let tile_rows = self.tile_rows;

        self.jobs.parallel_execute(num_triangles, |tri| {
            let seq = base_sequence + tri as u64;
            let i0 = draw.indices[tri * 3] as usize;
            let i1 = draw.indices[tri * 3 + 1] as usize;
            let i2 = draw.indices[tri * 3 + 2] as usize;
            let verts = [vertex(&vertex_params, num_params, i0), vertex(&vertex_params, num_params, i1), vertex(&vertex_params, num_params, i2)];

            for clipped in clip_near_plane(&verts) {
                enqueue_triangle(draw_index, draw, seq, &clipped, target_w, target_h, tile_columns, tile_rows, tile_queues);
            }
        });
    }
}

fn vertex(buf: &[f32], stride: usize, index: usize) -> Vec<f32> {
    buf[index * stride..(index + 1) * stride].to_vec()
}

/// Parallel-executes vertex shading in groups of 16 (spec §4.8 step 2b).
fn shade_vertices(draw: &DrawState, num_attribs: usize, num_params: usize, out: &mut [f32], jobs: &JobSystem) {
    let groups = draw.vertex_count.div_ceil(16);
    let out_ptr = out.as_mut_ptr() as usize;
    let out_len = out.len();
    jobs.parallel_execute(groups, |group| {
        let base = group * 16;
        let mut mask = Mask16::NONE;
        let mut in_attribs = vec![VecF32x16::splat(0.0); num_attribs];
        for lane in 0..16 {
            let v = base + lane;
            if v >= draw.vertex_count {
                continue;
            }
            mask.set_bit(lane, true);
            for a in 0..num_attribs {
                let mut arr = in_attribs[a].to_array();
                arr[lane] = draw.attribs[v * draw.attribs_stride + a];
                in_attribs[a] = VecF32x16::from_array(arr);
            }
        }
        let mut out_params = vec![VecF32x16::splat(0.0); num_params];
        draw.shader.shade_vertices(&mut out_params, &in_attribs, draw.uniforms, mask);

        // SAFETY: each group writes a disjoint [base, base+16) range of
        // vertices (modulo the last group's padding, which is masked out
        // on the read side above), so concurrent groups never alias.
        let out = unsafe { std::slice::from_raw_parts_mut(out_ptr as *mut f32, out_len) };
        for lane in mask.lanes() {
            let v = base + lane;
            for p in 0..num_params {
                out[v * num_params + p] = out_params[p].lane(lane);
            }
        }
    });
}

/// Near-plane (`w < 1`) clipping with the Sutherland-Hodgman special cases
/// from spec §4.8; returns zero, one, or two triangles, each a flat
/// `Vec<f32>` of three vertices' `num_params` values.
fn clip_near_plane(verts: &[Vec<f32>; 3]) -> Vec<[Vec<f32>; 3]> {
    let w = [verts[0][3], verts[1][3], verts[2][3]];
    let clip_mask = (w[0] < 1.0) as u8 | ((w[1] < 1.0) as u8) << 1 | ((w[2] < 1.0) as u8) << 2;

    let intersect = |a: &[f32], b: &[f32]| -> Vec<f32> {
        let t = (b[3] - 1.0) / (b[3] - a[3]);
        b.iter().zip(a.iter()).map(|(&bv, &av)| bv + (av - bv) * t).collect()
    };

    match clip_mask {
        0 => vec![[verts[0].clone(), verts[1].clone(), verts[2].clone()]],
        7 => vec![],
        1 | 2 | 4 => {
            let ci = clip_mask.trailing_zeros() as usize;
            let oi1 = (ci + 1) % 3;
            let oi2 = (ci + 2) % 3;
            let p1 = intersect(&verts[ci], &verts[oi1]);
            let p2 = intersect(&verts[ci], &verts[oi2]);
            vec![[verts[oi1].clone(), verts[oi2].clone(), p2.clone()], [verts[oi1].clone(), p2, p1]]
        }
        3 | 5 | 6 => {
            // the single clear bit identifies the surviving vertex
            let k = (!clip_mask & 0x7).trailing_zeros() as usize;
            let ci1 = (k + 1) % 3;
            let ci2 = (k + 2) % 3;
            let p1 = intersect(&verts[ci1], &verts[k]);
            let p2 = intersect(&verts[ci2], &verts[k]);
            vec![[verts[k].clone(), p1, p2]]
        }
        _ => unreachable!(),
    }
}

#[allow(clippy::too_many_arguments)]
fn enqueue_triangle(
    draw_index: usize,
    draw: &DrawState,
    sequence: u64,
    verts: &[Vec<f32>; 3],
    target_w: usize,
    target_h: usize,
    tile_columns: usize,
    tile_rows: usize,
    tile_queues: &[SliceArray<Triangle>],
) {
    let num_params = verts[0].len();
    let mut sx = [0.0f32; 3];
    let mut sy = [0.0f32; 3];
    let mut sz = [0.0f32; 3];
    for i in 0..3 {
        let w = verts[i][3];
        let x = verts[i][0] / w;
        let y = verts[i][1] / w;
        sx[i] = x * target_w as f32 / 2.0 + target_w as f32 / 2.0;
        sy[i] = -y * target_h as f32 / 2.0 + target_h as f32 / 2.0;
        sz[i] = verts[i][2];
    }

    let cross = (sx[1] - sx[0]) * (sy[2] - sy[0]) - (sy[1] - sy[0]) * (sx[2] - sx[0]);
    if cross == 0.0 {
        return; // degenerate / edge-on
    }
    let ccw = cross < 0.0; // screen space y grows downward, so CCW area is negative
    match draw.culling {
        CullMode::Cw if !ccw => return,
        CullMode::Ccw if ccw => return,
        _ => {}
    }

    let params: Vec<[f32; 3]> = (4..num_params).map(|p| [verts[0][p], verts[1][p], verts[2][p]]).collect();

    let min_x = sx.iter().cloned().fold(f32::INFINITY, f32::min).max(0.0);
    let max_x = sx.iter().cloned().fold(f32::NEG_INFINITY, f32::max).min(target_w as f32);
    let min_y = sy.iter().cloned().fold(f32::INFINITY, f32::min).max(0.0);
    let max_y = sy.iter().cloned().fold(f32::NEG_INFINITY, f32::max).min(target_h as f32);
    if min_x >= max_x || min_y >= max_y {
        return;
    }

    let tile_x0 = (min_x as usize) / TILE_SIZE;
    let tile_x1 = ((max_x as usize).min(target_w - 1)) / TILE_SIZE;
    let tile_y0 = (min_y as usize) / TILE_SIZE;
    let tile_y1 = ((max_y as usize).min(target_h - 1)) / TILE_SIZE;

    let triangle = Triangle { sequence, draw: draw_index, x: sx, y: sy, z: sz, ccw, params };
    for ty in tile_y0..=tile_y1.min(tile_rows - 1) {
        for tx in tile_x0..=tile_x1.min(tile_columns - 1) {
            tile_queues[ty * tile_columns + tx].append(triangle.clone());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn fill_tile(color: &mut Surface, mut depth: Option<&mut Surface>, queue: &SliceArray<Triangle>, draws: &[DrawState], left: usize, top: usize, clear_color: u32) {
    color.clear_tile(left, top, clear_color);
    if let Some(depth) = depth.as_deref_mut() {
        depth.clear_tile(left, top, 0xff800000u32); // -infinity
    }

    let mut triangles = queue.to_vec();
    triangles.sort_by_key(|t| t.sequence);

    for tri in &triangles {
        let draw = &draws[tri.draw];
        let edges = EdgeSet::new(tri.x, tri.y, tri.ccw);
        if !tile_overlaps(&edges, left as f32, top as f32) {
            continue;
        }
        let mut filler = TriangleFiller::new(draw.shader, draw.uniforms, draw.textures, draw.depth_enabled, draw.blend_enabled);
        filler.set_up_triangle(tri.x, tri.y, tri.z);
        for p in &tri.params {
            filler.set_up_param(*p);
        }
        rasterize_tile(&edges, &filler, color, depth.as_deref_mut(), left, top);
    }

    color.flush_tile(left, top);
}

/// A coarse re-test of the tile against the triangle's exact edge
/// equations: the bounding box used for binning is conservative, so a tile
/// a triangle overlaps in bbox terms may still not actually be touched.
fn tile_overlaps(edges: &EdgeSet, left: f32, top: f32) -> bool {
    !edges.tile_fully_outside(left, top, TILE_SIZE as f32)
}

fn wireframe_tile(color: &mut Surface, _depth: Option<&mut Surface>, queue: &SliceArray<Triangle>, _draws: &[DrawState], left: usize, top: usize, clear_color: u32) {
    color.clear_tile(left, top, clear_color);
    let mut triangles = queue.to_vec();
    triangles.sort_by_key(|t| t.sequence);
    for tri in &triangles {
        draw_wire_triangle(color, tri, left, top);
    }
    color.flush_tile(left, top);
}

fn draw_wire_triangle(color: &mut Surface, tri: &Triangle, left: usize, top: usize) {
    let edges = [(0, 1), (1, 2), (2, 0)];
    for (a, b) in edges {
        draw_line_clipped(color, (tri.x[a], tri.y[a]), (tri.x[b], tri.y[b]), left, top, 0xffffffff);
    }
}

/// Cohen-Sutherland clip of a line segment against the tile rectangle,
/// then a Bresenham-style walk writing single pixels (spec §4.8
/// `wireframe_tile`).
fn draw_line_clipped(color: &mut Surface, p0: (f32, f32), p1: (f32, f32), left: usize, top: usize, argb: u32) {
    let rect = (left as f32, top as f32, (left + TILE_SIZE) as f32, (top + TILE_SIZE) as f32);
    if let Some(((x0, y0), (x1, y1))) = cohen_sutherland_clip(p0, p1, rect) {
        let (mut x0, mut y0, x1, y1) = (x0 as i32, y0 as i32, x1 as i32, y1 as i32);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            if x0 >= left as i32 && x0 < (left + TILE_SIZE) as i32 && y0 >= top as i32 && y0 < (top + TILE_SIZE) as i32 {
                let block_left = x0 as usize - (x0 as usize % 4);
                let block_top = y0 as usize - (y0 as usize % 4);
                let lane = ((y0 as usize % 4) * 4) + (x0 as usize % 4);
                color.write_block_masked(block_left, block_top, Mask16::from_bits(1 << lane), nyuzi_simd::VecI32x16::splat(argb as i32));
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }
}

const INSIDE: u8 = 0;
const LEFT: u8 = 1;
const RIGHT: u8 = 2;
const BOTTOM: u8 = 4;
const TOP: u8 = 8;

fn out_code(x: f32, y: f32, rect: (f32, f32, f32, f32)) -> u8 {
    let (xmin, ymin, xmax, ymax) = rect;
    let mut code = INSIDE;
    if x < xmin {
        code |= LEFT;
    } else if x > xmax {
        code |= RIGHT;
    }
    if y < ymin {
        code |= TOP;
    } else if y > ymax {
        code |= BOTTOM;
    }
    code
}

fn cohen_sutherland_clip(mut p0: (f32, f32), mut p1: (f32, f32), rect: (f32, f32, f32, f32)) -> Option<((f32, f32), (f32, f32))> {
    let (xmin, ymin, xmax, ymax) = rect;
    let mut code0 = out_code(p0.0, p0.1, rect);
    let mut code1 = out_code(p1.0, p1.1, rect);
    loop {
        if code0 | code1 == 0 {
            return Some((p0, p1));
        } else if code0 & code1 != 0 {
            return None;
        } else {
            let code_out = if code0 != 0 { code0 } else { code1 };
            let (x, y);
            if code_out & BOTTOM != 0 {
                x = p0.0 + (p1.0 - p0.0) * (ymax - p0.1) / (p1.1 - p0.1);
                y = ymax;
            } else if code_out & TOP != 0 {
                x = p0.0 + (p1.0 - p0.0) * (ymin - p0.1) / (p1.1 - p0.1);
                y = ymin;
            } else if code_out & RIGHT != 0 {
                y = p0.1 + (p1.1 - p0.1) * (xmax - p0.0) / (p1.0 - p0.0);
                x = xmax;
            } else {
                y = p0.1 + (p1.1 - p0.1) * (xmin - p0.0) / (p1.0 - p0.0);
                x = xmin;
            }
            if code_out == code0 {
                p0 = (x, y);
                code0 = out_code(p0.0, p0.1, rect);
            } else {
                p1 = (x, y);
                code1 = out_code(p1.0, p1.1, rect);
            }
        }
    }
}
