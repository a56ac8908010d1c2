// Material pair for the point cloud: one visual configuration, one picking
// configuration, sharing a uniform shape but never aliasing state.

use bevy::render::render_resource::{
    BlendComponent, BlendFactor, BlendOperation, BlendState, ShaderType,
};
use glam::{Vec3, Vec4};

use crate::dataset::SpriteAtlas;

/// Which shading configuration the next draw uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassKind {
    /// Anti-aliased sprite/circle output with fog.
    #[default]
    Visual,
    /// Flat per-point id colors for hit-test readback. No fog, no blending.
    Picking,
}

/// Uniform record shared by both materials (GPU uniform).
///
/// The atlas texture itself is a separate binding; `image_width` and
/// `image_height` are the atlas dimensions in sub-image units, defaulting to
/// a 1x1 UV scale when no sprite metadata is present. The shader skips fog
/// whenever `fog_far <= fog_near`, which is how the disabled (infinite)
/// 2-D fog state is encoded.
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, ShaderType)]
#[repr(C)]
pub struct PointSpriteUniforms {
    pub fog_color: Vec4,
    pub fog_near: f32,
    pub fog_far: f32,
    pub image_width: f32,
    pub image_height: f32,
    pub point_size: f32,
    pub point_count: u32,
    pub is_image: u32,
    pub size_attenuation: u32,
}

impl Default for PointSpriteUniforms {
    fn default() -> Self {
        Self {
            fog_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            fog_near: f32::INFINITY,
            fog_far: f32::INFINITY,
            image_width: 1.0,
            image_height: 1.0,
            point_size: 1.0,
            point_count: 0,
            is_image: 0,
            size_attenuation: 0,
        }
    }
}

impl PointSpriteUniforms {
    /// Build the shared uniform shape for a fresh geometry.
    pub fn for_atlas(atlas: Option<&SpriteAtlas>, point_count: usize) -> Self {
        let mut uniforms = Self {
            point_count: point_count as u32,
            ..Default::default()
        };
        if let Some(atlas) = atlas {
            uniforms.image_width = atlas.cols();
            uniforms.image_height = atlas.rows();
            uniforms.is_image = 1;
        }
        uniforms
    }

    pub fn set_fog(&mut self, color: Vec3, near: f32, far: f32) {
        self.fog_color = color.extend(1.0);
        self.fog_near = near;
        self.fog_far = far;
    }
}

/// The two shading configurations over the shared geometry.
///
/// Both records start from the same uniform shape but are independent copies,
/// so per-frame mutation of one never leaks into the other.
#[derive(Debug, Clone, Copy)]
pub struct MaterialPair {
    pub visual: PointSpriteUniforms,
    pub picking: PointSpriteUniforms,
    pub active: PassKind,
}

impl MaterialPair {
    pub fn new(shared: PointSpriteUniforms) -> Self {
        Self {
            visual: shared,
            picking: shared,
            active: PassKind::Visual,
        }
    }
}

/// Blend state for a pass variant.
///
/// Image-backed visual points draw as opaque alpha-cutout quads; circular
/// visual points use multiplicative blending so their soft edges darken the
/// background instead of writing hard silhouettes. Picking always draws
/// opaque so readback sees exact id colors.
pub fn blend_state(pass: PassKind, has_image: bool) -> Option<BlendState> {
    match (pass, has_image) {
        (PassKind::Visual, false) => Some(BlendState {
            color: BlendComponent {
                src_factor: BlendFactor::Dst,
                dst_factor: BlendFactor::Zero,
                operation: BlendOperation::Add,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::Zero,
                operation: BlendOperation::Add,
            },
        }),
        _ => None,
    }
}

/// Depth-write policy for a pass variant. Blended circles leave the depth
/// buffer untouched; cutout sprites and picking draws are depth-tested and
/// depth-written like opaque geometry.
pub fn depth_write(pass: PassKind, has_image: bool) -> bool {
    match pass {
        PassKind::Visual => has_image,
        PassKind::Picking => true,
    }
}
