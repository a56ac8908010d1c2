// Point-sprite scatter rendering for Bevy
//
// Draws a scatter plot as GPU point sprites (textured quads or procedural
// circles) with density-based sizing, depth fog and an offscreen picking
// pass that encodes point indices as colors.

pub mod dataset;
pub mod frame_params;
pub mod geometry;
pub mod materials;
pub mod render;
pub mod visualizer;

pub use dataset::{
    create_test_points, CameraKind, FrameContext, PointDataset, SpriteAtlas, INDEX_NUM_ELEMENTS,
    RGB_NUM_ELEMENTS, XYZ_NUM_ELEMENTS,
};
pub use frame_params::{
    fog_distances, fog_multiplier, point_size_for, FOG_POINT_THRESHOLD, MIN_POINT_SIZE,
    ORTHO_SIZE_DIVISOR, POINT_SIZE_LOG_BASE, POINT_SIZE_SCALE, SPRITE_POINT_SIZE,
};
pub use geometry::{
    buffer_action, decode_picking_color, picking_color, picking_color_table, AttributeBuffer,
    BufferAction, PointGeometry,
};
pub use materials::{MaterialPair, PassKind, PointSpriteUniforms};
pub use render::{PickTarget, PointSpritePipeline, PointSpritePipelineKey, ScatterGpuBuffers};
pub use visualizer::{
    sync_scene_attachment, LabelAccessor, ScatterPointsAnchor, ScatterVisualizer,
    SpritePointVisualizer,
};

use bevy::{
    asset::embedded_asset,
    core_pipeline::core_3d::graph::{Core3d, Node3d},
    prelude::*,
    render::{
        render_graph::{RenderGraphExt, ViewNodeRunner},
        render_resource::SpecializedRenderPipelines,
        ExtractSchedule, Render, RenderApp, RenderSystems,
    },
};

use render::{
    extract_scatter_state, prepare_pick_target, prepare_scatter_bind_groups,
    prepare_scatter_buffers, prepare_scatter_pipelines, ExtractedScatterState, ScatterSpriteLabel,
    ScatterSpriteNode,
};

// Embed the shader into the binary so the crate works without an assets dir
pub struct EmbeddedShadersPlugin;

impl Plugin for EmbeddedShadersPlugin {
    fn build(&self, app: &mut App) {
        embedded_asset!(app, "../assets/shaders/point_sprite.wgsl");
    }
}

/// Main plugin: host-facing visualizer resource in the main world plus the
/// extraction, preparation and draw systems in the render world.
pub struct ScatterSpritePlugin;

impl Plugin for ScatterSpritePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(EmbeddedShadersPlugin)
            .init_resource::<SpritePointVisualizer>()
            .add_systems(PostUpdate, sync_scene_attachment);

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<SpecializedRenderPipelines<PointSpritePipeline>>()
            .init_resource::<ExtractedScatterState>()
            .add_systems(ExtractSchedule, extract_scatter_state)
            .add_systems(
                Render,
                prepare_scatter_pipelines.in_set(RenderSystems::Prepare),
            )
            .add_systems(
                Render,
                (prepare_scatter_buffers, prepare_pick_target)
                    .in_set(RenderSystems::PrepareResources),
            )
            .add_systems(
                Render,
                prepare_scatter_bind_groups.in_set(RenderSystems::PrepareBindGroups),
            )
            .add_render_graph_node::<ViewNodeRunner<ScatterSpriteNode>>(Core3d, ScatterSpriteLabel)
            .add_render_graph_edges(
                Core3d,
                (
                    Node3d::EndMainPass,
                    ScatterSpriteLabel,
                    Node3d::StartMainPassPostProcessing,
                ),
            );
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };
        render_app.init_resource::<PointSpritePipeline>();
    }
}
