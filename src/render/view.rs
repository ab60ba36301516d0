//! Views & Cameras
//!
//! A view is a rendering configuration: main camera, optional culling
//! camera, viewport, render pipeline, and the swap chain or render-target
//! set it draws into. Views are addressed by key and live across frames;
//! their view/projection matrices (including the stereo pair) are cached
//! when the camera changes.

use glam::{Affine3A, Mat4, Vec3};

use crate::core::frustum::Frustum;
use crate::gal::handles::{SwapChainHandle, TextureHandle};

slotmap::new_key_type! {
    /// Stable key addressing a view in the render world.
    pub struct ViewKey;
}

/// Usage hint of a camera/view. Decides whether objects seen by it count as
/// directly or only indirectly visible.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CameraUsageHint {
    #[default]
    None,
    /// The main camera the scene is rendered from. One per world.
    MainView,
    EditorView,
    /// Renders into an offscreen target consumed elsewhere.
    RenderTarget,
    /// Culling-only camera, for debugging the culling system.
    Culling,
    Shadow,
    Reflection,
    Thumbnail,
}

#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub transform: Affine3A,
    pub fov_y_degrees: f32,
    pub near: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            transform: Affine3A::IDENTITY,
            fov_y_degrees: 60.0,
            near: 0.1,
        }
    }
}

impl Camera {
    #[must_use]
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let view = Mat4::look_at_rh(position, target, up);
        Self {
            transform: Affine3A::from_mat4(view.inverse()),
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.transform.translation.into()
    }

    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from(self.transform).inverse()
    }

    /// Reverse-Z infinite perspective.
    #[must_use]
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_infinite_reverse_rh(self.fov_y_degrees.to_radians(), aspect, self.near)
    }
}

/// Cached per-frame camera matrices, including the stereo variant.
#[derive(Clone, Copy, Debug, Default)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// `[left, right]`; both equal `view_projection` for mono rendering.
    pub stereo_view_projection: [Mat4; 2],
    pub frustum: Frustum,
}

impl CameraMatrices {
    #[must_use]
    pub fn compute(camera: &Camera, aspect: f32, stereo_eye_separation: Option<f32>) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix(aspect);
        let view_projection = projection * view;

        let stereo_view_projection = if let Some(separation) = stereo_eye_separation {
            let right = camera.transform.matrix3.x_axis;
            let offset = Vec3::from(right) * (separation * 0.5);
            let left_view = Mat4::from(
                Affine3A::from_translation(-offset) * camera.transform,
            )
            .inverse();
            let right_view = Mat4::from(
                Affine3A::from_translation(offset) * camera.transform,
            )
            .inverse();
            [projection * left_view, projection * right_view]
        } else {
            [view_projection, view_projection]
        };

        Self {
            view,
            projection,
            view_projection,
            stereo_view_projection,
            frustum: Frustum::from_matrix(view_projection),
        }
    }
}

/// What the pipeline's sink pass binds.
#[derive(Clone, Debug)]
pub enum ViewTarget {
    SwapChain {
        handle: SwapChainHandle,
        /// Resolved backbuffer texture; tracks the acquired image.
        backbuffer: TextureHandle,
        depth_stencil: Option<TextureHandle>,
    },
    /// Offscreen target set: up to eight colors plus depth-stencil.
    Targets {
        colors: smallvec::SmallVec<[TextureHandle; 8]>,
        depth_stencil: Option<TextureHandle>,
    },
}

impl ViewTarget {
    /// Color target behind `index`, when bound.
    #[must_use]
    pub fn color(&self, index: usize) -> Option<TextureHandle> {
        match self {
            Self::SwapChain { backbuffer, .. } => (index == 0).then_some(*backbuffer),
            Self::Targets { colors, .. } => colors.get(index).copied(),
        }
    }

    #[must_use]
    pub fn depth_stencil(&self) -> Option<TextureHandle> {
        match self {
            Self::SwapChain { depth_stencil, .. } | Self::Targets { depth_stencil, .. } => {
                *depth_stencil
            }
        }
    }
}

/// Viewport rectangle in pixels.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ViewportRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ViewportRect {
    #[inline]
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

pub struct View {
    pub name: String,
    pub camera: Camera,
    /// Culling runs from this camera when set (debugging aid).
    pub cull_camera: Option<Camera>,
    /// LOD selection camera; defaults to the main camera.
    pub lod_camera: Option<Camera>,
    pub viewport: ViewportRect,
    pub target: ViewTarget,
    pub usage: CameraUsageHint,
    /// The pipeline rendering this view, owned by the render world.
    pub pipeline: super::pipeline::RenderPipelineHandle,
    /// Eye separation in meters; `None` renders mono.
    pub stereo_eye_separation: Option<f32>,
    pub(crate) matrices: CameraMatrices,
    /// Properties published by passes through `read_back_properties`.
    pub read_back: rustc_hash::FxHashMap<crate::core::interner::Symbol, f32>,
}

impl View {
    #[must_use]
    pub fn new(name: &str, camera: Camera, viewport: ViewportRect, target: ViewTarget) -> Self {
        let matrices = CameraMatrices::compute(&camera, viewport.aspect(), None);
        Self {
            name: name.to_owned(),
            camera,
            cull_camera: None,
            lod_camera: None,
            viewport,
            target,
            usage: CameraUsageHint::None,
            pipeline: super::pipeline::RenderPipelineHandle::INVALID,
            stereo_eye_separation: None,
            matrices,
            read_back: rustc_hash::FxHashMap::default(),
        }
    }

    /// Refreshes the cached matrices; called by the frontend at frame start.
    pub fn update_matrices(&mut self) {
        self.matrices = CameraMatrices::compute(
            &self.camera,
            self.viewport.aspect(),
            self.stereo_eye_separation,
        );
    }

    #[inline]
    #[must_use]
    pub fn matrices(&self) -> &CameraMatrices {
        &self.matrices
    }

    /// Frustum used for culling: the cull camera's when present.
    #[must_use]
    pub fn cull_frustum(&self) -> Frustum {
        if let Some(cull) = &self.cull_camera {
            let m = CameraMatrices::compute(cull, self.viewport.aspect(), None);
            m.frustum
        } else {
            self.matrices.frustum
        }
    }

    /// The camera LOD selection measures distance from.
    #[must_use]
    pub fn lod_camera(&self) -> &Camera {
        self.lod_camera.as_ref().unwrap_or(&self.camera)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_places_camera() {
        let camera = Camera::look_at(Vec3::new(0.0, 0.0, -5.0), Vec3::ZERO, Vec3::Y);
        assert!((camera.position() - Vec3::new(0.0, 0.0, -5.0)).length() < 1e-5);

        // A point at the origin lands in front of the camera.
        let view = camera.view_matrix();
        let p = view * Vec3::ZERO.extend(1.0);
        assert!(p.z < 0.0, "target should be in front (negative view z)");
    }

    #[test]
    fn stereo_matrices_differ_per_eye() {
        let camera = Camera::look_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0), Vec3::Y);
        let mono = CameraMatrices::compute(&camera, 1.0, None);
        assert_eq!(mono.stereo_view_projection[0], mono.stereo_view_projection[1]);

        let stereo = CameraMatrices::compute(&camera, 1.0, Some(0.064));
        assert_ne!(
            stereo.stereo_view_projection[0],
            stereo.stereo_view_projection[1]
        );
    }
}
