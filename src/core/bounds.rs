//! Bounding Volumes
//!
//! Axis-aligned boxes, spheres, and the combined box+sphere record the
//! spatial system stores per object. Boxes transform conservatively (all
//! eight corners), spheres by max-axis scale.

use glam::{Affine3A, Vec3, Vec3A};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// An inverted box that unions correctly with any point.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    #[inline]
    #[must_use]
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    #[must_use]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    #[must_use]
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[must_use]
    pub fn expanded_to_include(&self, point: Vec3) -> Self {
        Self {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    #[inline]
    #[must_use]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Conservative AABB of this box under `matrix`.
    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        let corners = [
            Vec3::new(self.min.x, self.min.y, self.min.z),
            Vec3::new(self.min.x, self.min.y, self.max.z),
            Vec3::new(self.min.x, self.max.y, self.min.z),
            Vec3::new(self.min.x, self.max.y, self.max.z),
            Vec3::new(self.max.x, self.min.y, self.min.z),
            Vec3::new(self.max.x, self.min.y, self.max.z),
            Vec3::new(self.max.x, self.max.y, self.min.z),
            Vec3::new(self.max.x, self.max.y, self.max.z),
        ];

        let mut new_min = Vec3::splat(f32::INFINITY);
        let mut new_max = Vec3::splat(f32::NEG_INFINITY);

        for point in corners {
            let transformed = matrix.transform_point3(point);
            new_min = new_min.min(transformed);
            new_max = new_max.max(transformed);
        }

        Self {
            min: new_min,
            max: new_max,
        }
    }

    /// Distance from `p` to the closest point of the box, squared.
    #[must_use]
    pub fn distance_squared(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(self.min, self.max);
        (p - clamped).length_squared()
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    #[inline]
    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    #[inline]
    #[must_use]
    pub fn overlaps_box(&self, aabb: &BoundingBox) -> bool {
        aabb.distance_squared(self.center) <= self.radius * self.radius
    }

    #[inline]
    #[must_use]
    pub fn overlaps_sphere(&self, other: &BoundingSphere) -> bool {
        let r = self.radius + other.radius;
        self.center.distance_squared(other.center) <= r * r
    }

    /// Sphere under an affine transform; radius scales by the largest axis.
    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        let center = matrix.transform_point3(self.center);
        let scale = Vec3A::new(
            matrix.matrix3.x_axis.length(),
            matrix.matrix3.y_axis.length(),
            matrix.matrix3.z_axis.length(),
        )
        .max_element();
        Self {
            center,
            radius: self.radius * scale,
        }
    }
}

/// Combined box + sphere bounds, the per-object record of the spatial system.
///
/// The sphere is derived from the box but cached: sphere tests are the cheap
/// first reject in every query.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoxSphereBounds {
    pub aabb: BoundingBox,
    pub sphere: BoundingSphere,
}

impl BoxSphereBounds {
    #[must_use]
    pub fn from_box(aabb: BoundingBox) -> Self {
        let center = aabb.center();
        let radius = aabb.half_extents().length();
        Self {
            aabb,
            sphere: BoundingSphere::new(center, radius),
        }
    }

    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        Self::from_box(self.aabb.transform(matrix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_and_contains() {
        let a = BoundingBox {
            min: Vec3::ZERO,
            max: Vec3::ONE,
        };
        let b = BoundingBox {
            min: Vec3::splat(2.0),
            max: Vec3::splat(3.0),
        };
        let u = a.union(&b);
        assert!(u.contains_point(Vec3::splat(0.5)));
        assert!(u.contains_point(Vec3::splat(2.5)));
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn transform_is_conservative() {
        let aabb = BoundingBox {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        };
        let m = Affine3A::from_rotation_z(std::f32::consts::FRAC_PI_4);
        let t = aabb.transform(&m);
        // A rotated unit cube needs a larger AABB in x/y.
        assert!(t.max.x > 1.0 && t.max.y > 1.0);
        assert!((t.max.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sphere_from_box() {
        let bounds = BoxSphereBounds::from_box(BoundingBox {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        });
        assert_eq!(bounds.sphere.center, Vec3::ZERO);
        assert!((bounds.sphere.radius - 3.0f32.sqrt()).abs() < 1e-6);
    }
}
