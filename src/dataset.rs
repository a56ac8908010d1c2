// Point dataset and per-frame render context types (CPU side)

use bevy::prelude::*;
use glam::Vec3;

/// Number of floats per point position (x, y, z).
pub const XYZ_NUM_ELEMENTS: usize = 3;
/// Number of floats per point color (r, g, b).
pub const RGB_NUM_ELEMENTS: usize = 3;
/// Number of floats per point sprite index.
pub const INDEX_NUM_ELEMENTS: usize = 1;

/// Camera projection kind supplied by the host render loop.
///
/// Perspective cameras get size attenuation and depth fog; orthographic
/// cameras render constant-size points with fog disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraKind {
    #[default]
    Perspective,
    Orthographic,
}

impl CameraKind {
    pub fn is_3d(self) -> bool {
        self == CameraKind::Perspective
    }
}

/// Sprite atlas metadata: one shared texture holding a grid of sub-images,
/// one sub-image per sprite index. All dimensions are in pixels.
#[derive(Debug, Clone)]
pub struct SpriteAtlas {
    /// The atlas texture. Handle identity is used for change detection.
    pub image: Handle<Image>,
    pub image_width: f32,
    pub image_height: f32,
    pub sprite_width: f32,
    pub sprite_height: f32,
}

impl SpriteAtlas {
    /// Atlas width in sub-image units (sprites per row).
    pub fn cols(&self) -> f32 {
        if self.sprite_width > 0.0 {
            self.image_width / self.sprite_width
        } else {
            1.0
        }
    }

    /// Atlas height in sub-image units (sprites per column).
    pub fn rows(&self) -> f32 {
        if self.sprite_height > 0.0 {
            self.image_height / self.sprite_height
        } else {
            1.0
        }
    }
}

/// The dataset collaborator's view of the point set.
///
/// A missing atlas is the normal plain-circle case, not an error. Sprite
/// indices default to zero when absent.
#[derive(Debug, Clone, Default)]
pub struct PointDataset {
    pub point_count: usize,
    /// Per-point index into the sprite atlas, when sprites are used.
    pub sprite_indices: Option<Vec<u32>>,
    pub atlas: Option<SpriteAtlas>,
}

impl PointDataset {
    pub fn new(point_count: usize) -> Self {
        Self {
            point_count,
            sprite_indices: None,
            atlas: None,
        }
    }

    pub fn with_atlas(mut self, atlas: SpriteAtlas, sprite_indices: Vec<u32>) -> Self {
        self.atlas = Some(atlas);
        self.sprite_indices = Some(sprite_indices);
        self
    }

    /// Sprite index of point `i` as stored in the vertex-index attribute.
    pub fn sprite_index(&self, i: usize) -> u32 {
        self.sprite_indices
            .as_ref()
            .and_then(|v| v.get(i).copied())
            .unwrap_or(0)
    }
}

/// Per-frame state supplied by the host render loop.
///
/// `point_colors` holds 3 floats per point, `scale_factors` 1 float per
/// point. The nearest/farthest camera-space Z span the visible point set and
/// drive the fog distances in 3-D mode.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub camera: CameraKind,
    pub background_color: Vec3,
    pub nearest_point_z: f32,
    pub farthest_point_z: f32,
    pub point_colors: Vec<f32>,
    pub scale_factors: Vec<f32>,
}

impl FrameContext {
    pub fn point_count(&self) -> usize {
        self.scale_factors.len()
    }
}

/// Create an example point set: a flat position array over a cube-shaped
/// grid plus a dataset describing it. Useful for demos and tests.
pub fn create_test_points(count: usize) -> (Vec<f32>, PointDataset) {
    let grid_size = (count as f32).cbrt().ceil().max(1.0) as usize;
    let spacing = 0.1;
    let offset = -(grid_size as f32 * spacing) / 2.0;

    let mut positions = Vec::with_capacity(count * XYZ_NUM_ELEMENTS);
    for i in 0..count {
        let x = (i % grid_size) as f32 * spacing + offset;
        let y = ((i / grid_size) % grid_size) as f32 * spacing + offset;
        let z = (i / (grid_size * grid_size)) as f32 * spacing + offset;
        positions.push(x);
        positions.push(y);
        positions.push(z);
    }

    (positions, PointDataset::new(count))
}
