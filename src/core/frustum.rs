//! View Frustum
//!
//! Culling planes derived from a view-projection matrix, with sphere and
//! AABB tests. Projections are reverse-Z engine-wide; a finite reverse-Z
//! projection contributes a usable far plane, while the infinite variant's
//! far plane is degenerate and dropped at construction, so tests only ever
//! visit planes that actually cull.

use glam::{Mat4, Vec3, Vec4};

use super::bounds::{BoundingBox, BoundingSphere};

/// One half-space: points with `normal · p + distance >= 0` are inside.
#[derive(Clone, Copy, Debug, Default)]
struct Plane {
    normal: Vec3,
    distance: f32,
}

impl Plane {
    /// Builds a normalized plane from the raw `ax + by + cz + d` equation.
    /// Degenerate normals (the far plane of an infinite projection) yield
    /// `None` and are excluded from the frustum.
    fn from_equation(equation: Vec4) -> Option<Self> {
        let normal = equation.truncate();
        let length_sq = normal.length_squared();
        if length_sq < 1e-12 {
            return None;
        }
        let inv_length = length_sq.sqrt().recip();
        Some(Self {
            normal: normal * inv_length,
            distance: equation.w * inv_length,
        })
    }

    #[inline]
    fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// The AABB corner furthest along the plane normal. If even that corner
    /// is outside, the whole box is.
    #[inline]
    fn furthest_corner(&self, aabb: &BoundingBox) -> Vec3 {
        Vec3::select(self.normal.cmpge(Vec3::ZERO), aabb.max, aabb.min)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Frustum {
    planes: [Plane; 6],
    count: usize,
}

impl Frustum {
    /// Extracts the culling planes from a combined view-projection matrix.
    ///
    /// Transposing turns the matrix rows into columns; every half-space is
    /// the sum or difference of the `w` column with one axis column.
    /// Reverse-Z swaps the depth pair: near is `w - z`, far is the bare `z`
    /// column (degenerate, and therefore dropped, for infinite projections).
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let t = m.transpose();
        let (x, y, z, w) = (t.x_axis, t.y_axis, t.z_axis, t.w_axis);
        let equations = [
            w + x, // left
            w - x, // right
            w + y, // bottom
            w - y, // top
            w - z, // near (reverse-Z)
            z,     // far (reverse-Z)
        ];

        let mut planes = [Plane::default(); 6];
        let mut count = 0;
        for equation in equations {
            if let Some(plane) = Plane::from_equation(equation) {
                planes[count] = plane;
                count += 1;
            }
        }
        Self { planes, count }
    }

    #[inline]
    fn active_planes(&self) -> &[Plane] {
        &self.planes[..self.count]
    }

    #[must_use]
    pub fn intersects_sphere(&self, sphere: &BoundingSphere) -> bool {
        self.active_planes()
            .iter()
            .all(|plane| plane.signed_distance(sphere.center) >= -sphere.radius)
    }

    #[must_use]
    pub fn intersects_box(&self, aabb: &BoundingBox) -> bool {
        self.active_planes()
            .iter()
            .all(|plane| plane.signed_distance(plane.furthest_corner(aabb)) >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frustum() -> Frustum {
        // Camera at origin looking down -Z.
        let proj = Mat4::perspective_infinite_reverse_rh(60.0_f32.to_radians(), 1.0, 0.1);
        Frustum::from_matrix(proj)
    }

    #[test]
    fn infinite_projection_drops_the_far_plane() {
        let f = test_frustum();
        assert_eq!(f.count, 5);

        let finite = Frustum::from_matrix(Mat4::perspective_rh(
            60.0_f32.to_radians(),
            1.0,
            100.0,
            0.1, // reverse-Z: near and far swapped
        ));
        assert_eq!(finite.count, 6);
    }

    #[test]
    fn sphere_in_front_is_inside() {
        let f = test_frustum();
        assert!(f.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, -5.0), 1.0)));
    }

    #[test]
    fn sphere_behind_is_outside() {
        let f = test_frustum();
        assert!(!f.intersects_sphere(&BoundingSphere::new(Vec3::new(0.0, 0.0, 5.0), 1.0)));
    }

    #[test]
    fn box_straddling_plane_is_inside() {
        let f = test_frustum();
        let aabb = BoundingBox {
            min: Vec3::new(-0.5, -0.5, -1.0),
            max: Vec3::new(0.5, 0.5, 1.0),
        };
        assert!(f.intersects_box(&aabb));
    }

    #[test]
    fn box_far_off_axis_is_outside() {
        let f = test_frustum();
        let aabb = BoundingBox {
            min: Vec3::new(100.0, 100.0, -2.0),
            max: Vec3::new(101.0, 101.0, -1.0),
        };
        assert!(!f.intersects_box(&aabb));
    }
}
