//! Software Occlusion Rasterizer
//!
//! Projects occluder boxes into a low-resolution depth buffer; visibility
//! queries test an AABB's nearest projected depth against that buffer. The
//! spatial system consumes this through a plain callback and never calls the
//! rasterizer itself; each rendering view drives its own rasterizer view.
//!
//! Conservatism rules: occluders write their *farthest* per-face depth over
//! exactly the pixels their silhouette covers; queries test the *nearest*
//! corner depth over the full screen bounds of the box. False "visible" is
//! possible, false "occluded" is not.

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::core::bounds::BoundingBox;

pub const DEFAULT_WIDTH: u32 = 256;
pub const DEFAULT_HEIGHT: u32 = 128;

/// Shared pool of depth buffers, keyed by resolution. One buffer is checked
/// out per rasterizer view per frame.
#[derive(Default)]
pub struct DepthBufferPool {
    free: Mutex<FxHashMap<(u32, u32), Vec<Vec<f32>>>>,
}

impl DepthBufferPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, width: u32, height: u32) -> Vec<f32> {
        let mut free = self.free.lock();
        free.entry((width, height))
            .or_default()
            .pop()
            .unwrap_or_else(|| vec![1.0; (width * height) as usize])
    }

    fn release(&self, width: u32, height: u32, buffer: Vec<f32>) {
        self.free.lock().entry((width, height)).or_default().push(buffer);
    }
}

/// One view's occlusion state. Thread-bound: create one per rendering view.
pub struct RasterizerView {
    width: u32,
    height: u32,
    view_projection: Mat4,
    depth: Option<Vec<f32>>,
    in_scene: bool,
    occluder_count: u32,
}

impl RasterizerView {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            view_projection: Mat4::IDENTITY,
            depth: None,
            in_scene: false,
            occluder_count: 0,
        }
    }

    /// Clears the buffer and latches the view-projection for this frame's
    /// occluders and queries.
    pub fn begin_scene(&mut self, pool: &DepthBufferPool, view_projection: Mat4) {
        let mut buffer = self
            .depth
            .take()
            .unwrap_or_else(|| pool.acquire(self.width, self.height));
        buffer.fill(1.0);
        self.depth = Some(buffer);
        self.view_projection = view_projection;
        self.in_scene = true;
        self.occluder_count = 0;
    }

    /// Finishes occluder submission; queries are valid until the next
    /// `begin_scene`.
    pub fn end_scene(&mut self) {
        self.in_scene = false;
    }

    /// Returns the buffer to the pool. Queries become trivially "visible".
    pub fn release(&mut self, pool: &DepthBufferPool) {
        if let Some(buffer) = self.depth.take() {
            pool.release(self.width, self.height, buffer);
        }
    }

    #[must_use]
    pub fn occluder_count(&self) -> u32 {
        self.occluder_count
    }

    /// Rasterizes a world-space box as an occluder.
    pub fn add_occluder_box(&mut self, aabb: &BoundingBox) {
        debug_assert!(self.in_scene, "occluders must be added inside a scene");
        let Some(corners) = self.project_corners(aabb) else {
            return; // crosses the near plane; unusable as occluder
        };
        let Some(depth) = self.depth.as_mut() else {
            return;
        };

        // 6 faces, 2 triangles each; corner order: [min|max per axis bit].
        const FACES: [[usize; 4]; 6] = [
            [0, 1, 3, 2], // -x
            [4, 6, 7, 5], // +x
            [0, 4, 5, 1], // -y
            [2, 3, 7, 6], // +y
            [0, 2, 6, 4], // -z
            [1, 5, 7, 3], // +z
        ];

        for face in FACES {
            let quad = [
                corners[face[0]],
                corners[face[1]],
                corners[face[2]],
                corners[face[3]],
            ];
            // The occluder stays conservative by writing the face's farthest
            // depth for every covered pixel.
            let face_depth = quad.iter().map(|c| c.z).fold(0.0f32, f32::max);
            rasterize_triangle(
                depth,
                self.width,
                self.height,
                [quad[0], quad[1], quad[2]],
                face_depth,
            );
            rasterize_triangle(
                depth,
                self.width,
                self.height,
                [quad[0], quad[2], quad[3]],
                face_depth,
            );
        }
        self.occluder_count += 1;
    }

    /// Whether any part of `aabb` could be visible past the occluders.
    #[must_use]
    pub fn is_visible(&self, aabb: &BoundingBox) -> bool {
        let Some(depth) = self.depth.as_ref() else {
            return true;
        };
        let Some(corners) = self.project_corners(aabb) else {
            return true; // crossing the near plane counts as visible
        };

        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        let mut nearest = f32::INFINITY;
        for c in corners {
            min_x = min_x.min(c.x);
            max_x = max_x.max(c.x);
            min_y = min_y.min(c.y);
            max_y = max_y.max(c.y);
            nearest = nearest.min(c.z);
        }

        let x0 = (min_x.floor().max(0.0)) as u32;
        let x1 = (max_x.ceil().min(self.width as f32 - 1.0)) as u32;
        let y0 = (min_y.floor().max(0.0)) as u32;
        let y1 = (max_y.ceil().min(self.height as f32 - 1.0)) as u32;
        if x0 > x1 || y0 > y1 {
            return false; // fully off screen
        }

        const EPSILON: f32 = 1e-4;
        for y in y0..=y1 {
            let row = (y * self.width) as usize;
            for x in x0..=x1 {
                if nearest <= depth[row + x as usize] + EPSILON {
                    return true;
                }
            }
        }
        false
    }

    /// Projects the 8 corners into screen space. `None` when any corner lies
    /// behind the near plane.
    fn project_corners(&self, aabb: &BoundingBox) -> Option<[Vec3; 8]> {
        let (min, max) = (aabb.min, aabb.max);
        let mut out = [Vec3::ZERO; 8];
        for (i, corner) in out.iter_mut().enumerate() {
            let p = Vec3::new(
                if i & 4 != 0 { max.x } else { min.x },
                if i & 2 != 0 { max.y } else { min.y },
                if i & 1 != 0 { max.z } else { min.z },
            );
            let clip: Vec4 = self.view_projection * p.extend(1.0);
            if clip.w <= 1e-6 {
                return None;
            }
            let ndc = clip.xyz() / clip.w;
            *corner = Vec3::new(
                (ndc.x * 0.5 + 0.5) * self.width as f32,
                (0.5 - ndc.y * 0.5) * self.height as f32,
                // The view projection is reverse-Z (near = 1); the software
                // buffer stores 0 = near, 1 = far.
                1.0 - ndc.z,
            );
        }
        Some(out)
    }
}

fn rasterize_triangle(depth: &mut [f32], width: u32, height: u32, v: [Vec3; 3], face_depth: f32) {
    let area = edge(v[0], v[1], v[2]);
    if area.abs() < 1e-6 {
        return;
    }
    // Both windings rasterize; backfaces of a closed box are redundant but
    // harmless, and skipping the winding test keeps mirrored transforms safe.
    let (a, b, c) = if area > 0.0 {
        (v[0], v[1], v[2])
    } else {
        (v[0], v[2], v[1])
    };

    let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
    let max_x = a.x.max(b.x).max(c.x).ceil().min(width as f32 - 1.0) as u32;
    let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
    let max_y = a.y.max(b.y).max(c.y).ceil().min(height as f32 - 1.0) as u32;
    if min_x > max_x || min_y > max_y {
        return;
    }

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = Vec3::new(x as f32 + 0.5, y as f32 + 0.5, 0.0);
            let w0 = edge(b, c, p);
            let w1 = edge(c, a, p);
            let w2 = edge(a, b, p);
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let index = (y * width + x) as usize;
            if face_depth < depth[index] {
                depth[index] = face_depth;
            }
        }
    }
}

#[inline]
fn edge(a: Vec3, b: Vec3, p: Vec3) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn look_down_neg_z() -> Mat4 {
        Mat4::perspective_infinite_reverse_rh(60.0_f32.to_radians(), 2.0, 0.1)
    }

    fn make_view(pool: &DepthBufferPool) -> RasterizerView {
        let mut view = RasterizerView::new(DEFAULT_WIDTH, DEFAULT_HEIGHT);
        view.begin_scene(pool, look_down_neg_z());
        view
    }

    #[test]
    fn empty_scene_everything_visible() {
        let pool = DepthBufferPool::new();
        let mut view = make_view(&pool);
        view.end_scene();
        assert!(view.is_visible(&BoundingBox {
            min: Vec3::new(-1.0, -1.0, -20.0),
            max: Vec3::new(1.0, 1.0, -18.0),
        }));
    }

    #[test]
    fn box_behind_large_occluder_is_hidden() {
        let pool = DepthBufferPool::new();
        let mut view = make_view(&pool);
        // A wall in front of the camera.
        view.add_occluder_box(&BoundingBox {
            min: Vec3::new(-50.0, -50.0, -10.5),
            max: Vec3::new(50.0, 50.0, -10.0),
        });
        view.end_scene();

        // Small box well behind the wall.
        assert!(!view.is_visible(&BoundingBox {
            min: Vec3::new(-1.0, -1.0, -40.0),
            max: Vec3::new(1.0, 1.0, -38.0),
        }));
        // Box in front of the wall stays visible.
        assert!(view.is_visible(&BoundingBox {
            min: Vec3::new(-1.0, -1.0, -5.0),
            max: Vec3::new(1.0, 1.0, -4.0),
        }));
    }

    #[test]
    fn occluder_crossing_near_plane_is_ignored() {
        let pool = DepthBufferPool::new();
        let mut view = make_view(&pool);
        view.add_occluder_box(&BoundingBox {
            min: Vec3::new(-1.0, -1.0, -5.0),
            max: Vec3::new(1.0, 1.0, 5.0), // extends behind the camera
        });
        assert_eq!(view.occluder_count(), 0);
        view.end_scene();

        assert!(view.is_visible(&BoundingBox {
            min: Vec3::new(-1.0, -1.0, -20.0),
            max: Vec3::new(1.0, 1.0, -18.0),
        }));
    }

    #[test]
    fn buffers_recycle_through_the_pool() {
        let pool = DepthBufferPool::new();
        let mut view = make_view(&pool);
        view.end_scene();
        view.release(&pool);
        assert_eq!(pool.free.lock().get(&(DEFAULT_WIDTH, DEFAULT_HEIGHT)).unwrap().len(), 1);

        // Reacquire and make sure it is cleared.
        view.begin_scene(&pool, look_down_neg_z());
        assert!(view.is_visible(&BoundingBox {
            min: Vec3::new(-1.0, -1.0, -20.0),
            max: Vec3::new(1.0, 1.0, -18.0),
        }));
    }
}
