// Host-facing visualizer: owns the CPU-side point geometry and material
// pair, reacts to position/dataset changes, and queues per-frame draw passes
// that the render world drains.

use bevy::asset::AssetId;
use bevy::prelude::*;
use tracing::{debug, trace};

use crate::dataset::{FrameContext, PointDataset, SpriteAtlas, INDEX_NUM_ELEMENTS, XYZ_NUM_ELEMENTS};
use crate::frame_params::{fog_distances, point_size_for};
use crate::geometry::{buffer_action, BufferAction, PointGeometry};
use crate::materials::{MaterialPair, PassKind, PointSpriteUniforms};

/// Callback resolving a point index to its display label. Accepted for
/// interface compatibility with label-rendering hosts; this visualizer does
/// not draw labels.
pub type LabelAccessor = Box<dyn Fn(usize) -> String + Send + Sync>;

/// The contract a scatter-plot host drives every frame.
///
/// All entry points are defensive: calling any of them before geometry
/// exists, or after `dispose`, is a no-op.
pub trait ScatterVisualizer {
    /// Record the scene container entity the point primitive attaches to.
    fn set_scene(&mut self, container: Entity);
    /// Positions changed wholesale. `None` or an empty slice means the
    /// no-points state and releases the geometry.
    fn on_point_positions_changed(&mut self, positions: Option<&[f32]>, dataset: &PointDataset);
    /// Queue the visual draw for this frame.
    fn on_render(&mut self, ctx: &FrameContext);
    /// Queue the picking draw for this frame.
    fn on_picking_render(&mut self, ctx: &FrameContext);
    /// Viewport resized. Point sprites are resolution independent.
    fn on_resize(&mut self, _width: u32, _height: u32) {}
    /// Label accessor changed. This visualizer renders no labels.
    fn on_set_label_accessor(&mut self, _accessor: Option<LabelAccessor>) {}
    /// Release all geometry and detach from the scene. Idempotent.
    fn dispose(&mut self);
}

/// One queued draw: which pass, a snapshot of its uniforms, and the
/// attribute arrays that changed since the last upload.
#[derive(Debug, Clone)]
pub struct PassUpload {
    pub kind: PassKind,
    pub uniforms: PointSpriteUniforms,
    pub colors: Option<Vec<f32>>,
    pub scale_factors: Option<Vec<f32>>,
}

/// Everything the render world pulls out of the visualizer once per frame.
#[derive(Debug, Default, Clone)]
pub struct FrameUploads {
    pub positions: Option<Vec<f32>>,
    pub sprite_indices: Option<Vec<f32>>,
    pub passes: Vec<PassUpload>,
}

/// Point-sprite scatter visualizer.
///
/// CPU state only; GPU buffers and pipelines live in the render world and
/// are keyed off `build_id`, which increments whenever the geometry is
/// rebuilt (capacity growth or sprite-image change).
#[derive(Resource, Default)]
pub struct SpritePointVisualizer {
    scene: Option<Entity>,
    anchor: Option<Entity>,
    geometry: Option<PointGeometry>,
    materials: Option<MaterialPair>,
    atlas: Option<SpriteAtlas>,
    build_id: u64,
    pending_passes: Vec<PassUpload>,
}

impl SpritePointVisualizer {
    pub fn build_id(&self) -> u64 {
        self.build_id
    }

    pub fn capacity(&self) -> usize {
        self.geometry.as_ref().map_or(0, |g| g.capacity())
    }

    pub fn point_count(&self) -> usize {
        self.geometry.as_ref().map_or(0, |g| g.point_count())
    }

    pub fn has_geometry(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn has_image(&self) -> bool {
        self.atlas.is_some()
    }

    pub fn atlas_image(&self) -> Option<AssetId<Image>> {
        self.atlas.as_ref().map(|a| a.image.id())
    }

    pub fn scene(&self) -> Option<Entity> {
        self.scene
    }

    pub fn anchor(&self) -> Option<Entity> {
        self.anchor
    }

    pub(crate) fn set_anchor(&mut self, anchor: Option<Entity>) {
        self.anchor = anchor;
    }

    pub fn materials(&self) -> Option<&MaterialPair> {
        self.materials.as_ref()
    }

    /// Move this frame's pending uploads out for the render world.
    pub fn drain_frame(&mut self) -> FrameUploads {
        let mut uploads = FrameUploads {
            passes: std::mem::take(&mut self.pending_passes),
            ..Default::default()
        };
        if let Some(geometry) = self.geometry.as_mut() {
            uploads.positions = geometry.positions.take_upload();
            uploads.sprite_indices = geometry.sprite_indices.take_upload();
        }
        uploads
    }

    /// Release geometry and materials but keep the scene binding, so a later
    /// position update can re-attach.
    fn dispose_geometry(&mut self) {
        if self.geometry.is_some() {
            debug!("releasing point-sprite geometry");
        }
        self.geometry = None;
        self.materials = None;
        self.atlas = None;
        self.pending_passes.clear();
    }

    fn build_geometry(&mut self, point_count: usize, dataset: &PointDataset) {
        let mut geometry = PointGeometry::new(point_count);

        let mut sprite_indices = Vec::with_capacity(point_count * INDEX_NUM_ELEMENTS);
        for i in 0..point_count {
            sprite_indices.push(dataset.sprite_index(i) as f32);
        }
        geometry.sprite_indices.set(sprite_indices);

        self.atlas = dataset.atlas.clone();
        self.materials = Some(MaterialPair::new(PointSpriteUniforms::for_atlas(
            self.atlas.as_ref(),
            point_count,
        )));
        self.geometry = Some(geometry);
        self.build_id += 1;
        debug!(
            point_count,
            has_image = self.atlas.is_some(),
            build_id = self.build_id,
            "built point-sprite geometry"
        );
    }
}

impl ScatterVisualizer for SpritePointVisualizer {
    fn set_scene(&mut self, container: Entity) {
        self.scene = Some(container);
    }

    fn on_point_positions_changed(&mut self, positions: Option<&[f32]>, dataset: &PointDataset) {
        let Some(positions) = positions.filter(|p| !p.is_empty()) else {
            self.dispose_geometry();
            return;
        };
        let new_count = positions.len() / XYZ_NUM_ELEMENTS;
        let new_image = dataset.atlas.as_ref().map(|a| a.image.id());

        if let Some(geometry) = self.geometry.as_ref() {
            let action = buffer_action(
                geometry.capacity(),
                self.atlas_image().as_ref(),
                new_count,
                new_image.as_ref(),
            );
            if action == BufferAction::Rebuild {
                self.dispose_geometry();
            }
        }
        if self.geometry.is_none() {
            self.build_geometry(new_count, dataset);
        }
        if let Some(geometry) = self.geometry.as_mut() {
            geometry.set_positions(positions.to_vec());
            let count = geometry.point_count() as u32;
            if let Some(materials) = self.materials.as_mut() {
                materials.visual.point_count = count;
                materials.picking.point_count = count;
            }
        }
    }

    fn on_render(&mut self, ctx: &FrameContext) {
        let (Some(geometry), Some(materials)) = (self.geometry.as_mut(), self.materials.as_mut())
        else {
            trace!("render with no geometry, skipping");
            return;
        };
        let n = geometry.point_count();
        let has_image = self.atlas.is_some();

        let (fog_near, fog_far) =
            fog_distances(ctx.camera, n, ctx.nearest_point_z, ctx.farthest_point_z);
        materials.visual.set_fog(ctx.background_color, fog_near, fog_far);
        materials.visual.size_attenuation = ctx.camera.is_3d() as u32;
        materials.visual.point_size = point_size_for(has_image, n, ctx.camera);
        materials.visual.point_count = n as u32;
        materials.active = PassKind::Visual;

        geometry.colors.set(ctx.point_colors.clone());
        geometry.scale_factors.set(ctx.scale_factors.clone());

        self.pending_passes.push(PassUpload {
            kind: PassKind::Visual,
            uniforms: materials.visual,
            colors: geometry.colors.take_upload(),
            scale_factors: geometry.scale_factors.take_upload(),
        });
    }

    fn on_picking_render(&mut self, ctx: &FrameContext) {
        let (Some(geometry), Some(materials)) = (self.geometry.as_mut(), self.materials.as_mut())
        else {
            trace!("picking render with no geometry, skipping");
            return;
        };
        let n = geometry.point_count();
        let has_image = self.atlas.is_some();

        // Picking is never fogged; id colors must reach the target exactly.
        materials
            .picking
            .set_fog(ctx.background_color, f32::INFINITY, f32::INFINITY);
        materials.picking.size_attenuation = ctx.camera.is_3d() as u32;
        materials.picking.point_size = point_size_for(has_image, n, ctx.camera);
        materials.picking.point_count = n as u32;
        materials.active = PassKind::Picking;

        let id_colors = geometry.picking_colors().to_vec();
        geometry.colors.set(id_colors);
        geometry.scale_factors.set(ctx.scale_factors.clone());

        self.pending_passes.push(PassUpload {
            kind: PassKind::Picking,
            uniforms: materials.picking,
            colors: geometry.colors.take_upload(),
            scale_factors: geometry.scale_factors.take_upload(),
        });
    }

    fn dispose(&mut self) {
        self.dispose_geometry();
        self.scene = None;
    }
}

/// Marker for the child entity representing the point primitive in the
/// host's scene graph.
#[derive(Component)]
pub struct ScatterPointsAnchor;

/// Keep an anchor entity parented under the scene container exactly while
/// geometry exists.
pub fn sync_scene_attachment(
    mut commands: Commands,
    mut visualizer: ResMut<SpritePointVisualizer>,
    anchors: Query<Entity, With<ScatterPointsAnchor>>,
) {
    let attached = visualizer.scene().is_some() && visualizer.has_geometry();
    match (attached, visualizer.anchor()) {
        (true, None) => {
            if let Some(container) = visualizer.scene() {
                let anchor = commands
                    .spawn((
                        ScatterPointsAnchor,
                        Name::new("scatter_points"),
                        ChildOf(container),
                    ))
                    .id();
                visualizer.set_anchor(Some(anchor));
            }
        }
        (false, Some(anchor)) => {
            if anchors.contains(anchor) {
                commands.entity(anchor).despawn();
            }
            visualizer.set_anchor(None);
        }
        _ => {}
    }
}
