// Render-world half of the scatter visualizer.
//
// Extraction drains the main-world visualizer once per frame; prepare systems
// keep the GPU buffers, specialized pipelines and bind groups in step; a view
// node draws the queued passes after the main opaque pass.

use bevy::{
    asset::{load_embedded_asset, AssetId},
    core_pipeline::core_3d::CORE_3D_DEPTH_FORMAT,
    prelude::*,
    render::{
        render_asset::RenderAssets,
        render_graph::{RenderLabel, ViewNode},
        render_resource::{
            binding_types::{sampler, storage_buffer_read_only_sized, texture_2d, uniform_buffer},
            BindGroup, BindGroupEntries, BindGroupLayout, BindGroupLayoutEntries, Buffer,
            BufferDescriptor, BufferUsages, CachedRenderPipelineId, ColorTargetState, ColorWrites,
            CompareFunction, DepthBiasState, DepthStencilState, Extent3d, FragmentState, LoadOp,
            MultisampleState, Operations, PipelineCache, PrimitiveState, PrimitiveTopology,
            RenderPassColorAttachment, RenderPassDepthStencilAttachment, RenderPassDescriptor,
            RenderPipelineDescriptor, SamplerBindingType, ShaderStages, SpecializedRenderPipeline,
            SpecializedRenderPipelines, StencilFaceState, StencilState, StoreOp, Texture,
            TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType, TextureUsages,
            TextureView, VertexState,
        },
        renderer::{RenderDevice, RenderQueue},
        texture::{FallbackImage, GpuImage},
        view::{ExtractedView, Msaa, ViewDepthTexture, ViewTarget, ViewUniform, ViewUniformOffset, ViewUniforms},
        MainWorld,
    },
};
use tracing::debug;

use crate::dataset::{RGB_NUM_ELEMENTS, XYZ_NUM_ELEMENTS};
use crate::materials::{self, PassKind, PointSpriteUniforms};
use crate::visualizer::{FrameUploads, SpritePointVisualizer};

/// Snapshot of the visualizer pulled into the render world each frame.
#[derive(Resource, Default)]
pub struct ExtractedScatterState {
    pub build_id: u64,
    pub capacity: usize,
    pub point_count: usize,
    pub has_geometry: bool,
    pub has_image: bool,
    pub image: Option<AssetId<Image>>,
    pub uploads: FrameUploads,
}

/// Drain the main-world visualizer. Runs in `ExtractSchedule` so it can
/// mutate `MainWorld` directly (pending uploads move, they are not cloned).
pub fn extract_scatter_state(
    mut main_world: ResMut<MainWorld>,
    mut extracted: ResMut<ExtractedScatterState>,
) {
    let mut visualizer = main_world.resource_mut::<SpritePointVisualizer>();
    extracted.build_id = visualizer.build_id();
    extracted.capacity = visualizer.capacity();
    extracted.point_count = visualizer.point_count();
    extracted.has_geometry = visualizer.has_geometry();
    extracted.has_image = visualizer.has_image();
    extracted.image = visualizer.atlas_image();
    extracted.uploads = visualizer.drain_frame();
}

/// GPU buffers backing the point geometry, sized to the geometry capacity.
///
/// The visual color data and the static picking-color table live in separate
/// buffers so both passes of one frame see their own colors regardless of
/// queue-write ordering.
#[derive(Resource, Clone)]
pub struct ScatterGpuBuffers {
    pub build_id: u64,
    pub capacity: usize,
    pub point_count: u32,
    pub position_buffer: Buffer,
    pub color_buffer: Buffer,
    pub pick_color_buffer: Buffer,
    pub scale_buffer: Buffer,
    pub sprite_index_buffer: Buffer,
    pub visual_uniforms: Buffer,
    pub picking_uniforms: Buffer,
}

fn create_storage_buffer(
    render_device: &RenderDevice,
    label: &str,
    floats: usize,
) -> Buffer {
    render_device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size: (floats.max(1) * std::mem::size_of::<f32>()) as u64,
        usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn create_uniform_buffer(render_device: &RenderDevice, label: &str) -> Buffer {
    render_device.create_buffer(&BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<PointSpriteUniforms>() as u64,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Create or recreate the GPU buffers when the geometry build changes, then
/// push this frame's pending array and uniform updates.
pub fn prepare_scatter_buffers(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    mut extracted: ResMut<ExtractedScatterState>,
    buffers: Option<Res<ScatterGpuBuffers>>,
) {
    if !extracted.has_geometry {
        if buffers.is_some() {
            debug!("dropping scatter GPU buffers");
            commands.remove_resource::<ScatterGpuBuffers>();
        }
        return;
    }

    let mut buffers = match buffers {
        Some(b) if b.build_id == extracted.build_id => b.as_ref().clone(),
        _ => {
            let capacity = extracted.capacity;
            debug!(capacity, build_id = extracted.build_id, "creating scatter GPU buffers");
            ScatterGpuBuffers {
                build_id: extracted.build_id,
                capacity,
                point_count: extracted.point_count as u32,
                position_buffer: create_storage_buffer(
                    &render_device,
                    "scatter_position_buffer",
                    capacity * XYZ_NUM_ELEMENTS,
                ),
                color_buffer: create_storage_buffer(
                    &render_device,
                    "scatter_color_buffer",
                    capacity * RGB_NUM_ELEMENTS,
                ),
                pick_color_buffer: create_storage_buffer(
                    &render_device,
                    "scatter_pick_color_buffer",
                    capacity * RGB_NUM_ELEMENTS,
                ),
                scale_buffer: create_storage_buffer(
                    &render_device,
                    "scatter_scale_buffer",
                    capacity,
                ),
                sprite_index_buffer: create_storage_buffer(
                    &render_device,
                    "scatter_sprite_index_buffer",
                    capacity,
                ),
                visual_uniforms: create_uniform_buffer(&render_device, "scatter_visual_uniforms"),
                picking_uniforms: create_uniform_buffer(&render_device, "scatter_picking_uniforms"),
            }
        }
    };
    buffers.point_count = extracted.point_count as u32;

    if let Some(positions) = extracted.uploads.positions.take() {
        render_queue.write_buffer(&buffers.position_buffer, 0, bytemuck::cast_slice(&positions));
    }
    if let Some(indices) = extracted.uploads.sprite_indices.take() {
        render_queue.write_buffer(
            &buffers.sprite_index_buffer,
            0,
            bytemuck::cast_slice(&indices),
        );
    }

    for pass in &mut extracted.uploads.passes {
        let (color_target, uniform_target) = match pass.kind {
            PassKind::Visual => (&buffers.color_buffer, &buffers.visual_uniforms),
            PassKind::Picking => (&buffers.pick_color_buffer, &buffers.picking_uniforms),
        };
        if let Some(colors) = pass.colors.take() {
            render_queue.write_buffer(color_target, 0, bytemuck::cast_slice(&colors));
        }
        if let Some(scales) = pass.scale_factors.take() {
            render_queue.write_buffer(&buffers.scale_buffer, 0, bytemuck::cast_slice(&scales));
        }
        render_queue.write_buffer(uniform_target, 0, bytemuck::bytes_of(&pass.uniforms));
    }

    commands.insert_resource(buffers);
}

/// Shared pipeline state: bind group layout and the embedded shader.
#[derive(Resource)]
pub struct PointSpritePipeline {
    pub bind_group_layout: BindGroupLayout,
    pub shader: Handle<Shader>,
}

impl FromWorld for PointSpritePipeline {
    fn from_world(world: &mut World) -> Self {
        let asset_server = world.resource::<AssetServer>();
        let render_device = world.resource::<RenderDevice>();

        let bind_group_layout = render_device.create_bind_group_layout(
            Some("point_sprite_bind_group_layout"),
            &BindGroupLayoutEntries::sequential(
                ShaderStages::VERTEX_FRAGMENT,
                (
                    // @binding(0): View uniform
                    uniform_buffer::<ViewUniform>(true),
                    // @binding(1): Point sprite uniforms
                    uniform_buffer::<PointSpriteUniforms>(false),
                    // @binding(2): Position buffer
                    storage_buffer_read_only_sized(false, None),
                    // @binding(3): Color buffer
                    storage_buffer_read_only_sized(false, None),
                    // @binding(4): Scale factor buffer
                    storage_buffer_read_only_sized(false, None),
                    // @binding(5): Sprite index buffer
                    storage_buffer_read_only_sized(false, None),
                    // @binding(6): Sprite atlas texture
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    // @binding(7): Atlas sampler
                    sampler(SamplerBindingType::Filtering),
                ),
            ),
        );

        let shader = load_embedded_asset!(asset_server, "../assets/shaders/point_sprite.wgsl");

        Self {
            bind_group_layout,
            shader,
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone)]
pub struct PointSpritePipelineKey {
    pub pass: PassKind,
    pub has_image: bool,
    pub hdr: bool,
    pub msaa_samples: u32,
}

impl SpecializedRenderPipeline for PointSpritePipeline {
    type Key = PointSpritePipelineKey;

    fn specialize(&self, key: Self::Key) -> RenderPipelineDescriptor {
        let mut shader_defs = vec![];
        if key.has_image {
            shader_defs.push("HAS_IMAGE".into());
        }
        if key.pass == PassKind::Picking {
            shader_defs.push("PICK_PASS".into());
        }

        // Picking renders to its own Rgba8Unorm target so readback pixels
        // decode to exact indices; the visual pass goes to the screen.
        let target_format = match key.pass {
            PassKind::Picking => TextureFormat::Rgba8Unorm,
            PassKind::Visual => {
                if key.hdr {
                    ViewTarget::TEXTURE_FORMAT_HDR
                } else {
                    TextureFormat::Rgba8UnormSrgb
                }
            }
        };

        RenderPipelineDescriptor {
            label: Some("point_sprite_pipeline".into()),
            layout: vec![self.bind_group_layout.clone()],
            vertex: VertexState {
                shader: self.shader.clone(),
                shader_defs: shader_defs.clone(),
                entry_point: Some("vertex".into()),
                buffers: vec![],
            },
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                cull_mode: None,
                front_face: wgpu::FrontFace::Cw,
                ..default()
            },
            depth_stencil: Some(DepthStencilState {
                format: CORE_3D_DEPTH_FORMAT,
                depth_write_enabled: materials::depth_write(key.pass, key.has_image),
                // Reverse-Z: greater = closer
                depth_compare: CompareFunction::GreaterEqual,
                stencil: StencilState {
                    front: StencilFaceState::IGNORE,
                    back: StencilFaceState::IGNORE,
                    read_mask: 0,
                    write_mask: 0,
                },
                bias: DepthBiasState {
                    constant: 0,
                    slope_scale: 0.0,
                    clamp: 0.0,
                },
            }),
            multisample: MultisampleState {
                count: if key.pass == PassKind::Picking {
                    1
                } else {
                    key.msaa_samples
                },
                ..Default::default()
            },
            fragment: Some(FragmentState {
                shader: self.shader.clone(),
                shader_defs,
                entry_point: Some("fragment".into()),
                targets: vec![Some(ColorTargetState {
                    format: target_format,
                    blend: materials::blend_state(key.pass, key.has_image),
                    write_mask: ColorWrites::ALL,
                })],
                ..default()
            }),
            ..default()
        }
    }
}

/// Specialized pipeline ids for the current view configuration.
#[derive(Resource, Clone, Copy)]
pub struct ScatterPipelineIds {
    pub visual: CachedRenderPipelineId,
    pub picking: CachedRenderPipelineId,
}

pub fn prepare_scatter_pipelines(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    mut pipelines: ResMut<SpecializedRenderPipelines<PointSpritePipeline>>,
    pipeline: Res<PointSpritePipeline>,
    extracted: Res<ExtractedScatterState>,
    views: Query<(&ExtractedView, &Msaa), Without<Camera2d>>,
) {
    if !extracted.has_geometry {
        return;
    }
    let Some((view, msaa)) = views.iter().next() else {
        return;
    };

    let visual = pipelines.specialize(
        &pipeline_cache,
        &pipeline,
        PointSpritePipelineKey {
            pass: PassKind::Visual,
            has_image: extracted.has_image,
            hdr: view.hdr,
            msaa_samples: msaa.samples(),
        },
    );
    let picking = pipelines.specialize(
        &pipeline_cache,
        &pipeline,
        PointSpritePipelineKey {
            pass: PassKind::Picking,
            has_image: extracted.has_image,
            hdr: false,
            msaa_samples: 1,
        },
    );

    commands.insert_resource(ScatterPipelineIds { visual, picking });
}

/// Offscreen picking target: id colors plus a private depth buffer, sized to
/// the active viewport.
#[derive(Resource)]
pub struct PickTarget {
    pub texture: Texture,
    pub view: TextureView,
    pub depth_texture: Texture,
    pub depth_view: TextureView,
    pub width: u32,
    pub height: u32,
}

/// Create the picking target lazily, only on frames that queue a picking
/// pass, and recreate it when the viewport size changes.
pub fn prepare_pick_target(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    extracted: Res<ExtractedScatterState>,
    views: Query<&ExtractedView, Without<Camera2d>>,
    pick_target: Option<Res<PickTarget>>,
) {
    let wants_pick = extracted
        .uploads
        .passes
        .iter()
        .any(|p| p.kind == PassKind::Picking);
    if !wants_pick {
        return;
    }
    let Some(view) = views.iter().next() else {
        return;
    };

    let width = view.viewport.z.max(1);
    let height = view.viewport.w.max(1);
    let up_to_date = pick_target
        .as_ref()
        .is_some_and(|t| t.width == width && t.height == height);
    if up_to_date {
        return;
    }

    debug!(width, height, "creating pick render target");
    let size = Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = render_device.create_texture(&TextureDescriptor {
        label: Some("scatter_pick_target"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Rgba8Unorm,
        usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view_tex = texture.create_view(&Default::default());

    let depth_texture = render_device.create_texture(&TextureDescriptor {
        label: Some("scatter_pick_depth"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: CORE_3D_DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let depth_view = depth_texture.create_view(&Default::default());

    commands.insert_resource(PickTarget {
        texture,
        view: view_tex,
        depth_texture,
        depth_view,
        width,
        height,
    });
}

/// Per-pass bind groups over the shared layout. Rebuilt every frame; the
/// view uniform binding comes from Bevy's batched view buffer.
#[derive(Resource)]
pub struct ScatterBindGroups {
    pub visual: BindGroup,
    pub picking: BindGroup,
}

pub fn prepare_scatter_bind_groups(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline: Res<PointSpritePipeline>,
    buffers: Option<Res<ScatterGpuBuffers>>,
    extracted: Res<ExtractedScatterState>,
    view_uniforms: Res<ViewUniforms>,
    gpu_images: Res<RenderAssets<GpuImage>>,
    fallback_image: Res<FallbackImage>,
) {
    let Some(buffers) = buffers else {
        commands.remove_resource::<ScatterBindGroups>();
        return;
    };
    let Some(view_binding) = view_uniforms.uniforms.binding() else {
        return;
    };

    // Missing or not-yet-loaded atlas falls back to Bevy's 1x1 white image.
    let atlas = extracted
        .image
        .and_then(|id| gpu_images.get(id))
        .unwrap_or(&fallback_image.d2);

    let visual = render_device.create_bind_group(
        Some("scatter_visual_bind_group"),
        &pipeline.bind_group_layout,
        &BindGroupEntries::sequential((
            view_binding.clone(),
            buffers.visual_uniforms.as_entire_binding(),
            buffers.position_buffer.as_entire_binding(),
            buffers.color_buffer.as_entire_binding(),
            buffers.scale_buffer.as_entire_binding(),
            buffers.sprite_index_buffer.as_entire_binding(),
            &atlas.texture_view,
            &atlas.sampler,
        )),
    );
    let picking = render_device.create_bind_group(
        Some("scatter_picking_bind_group"),
        &pipeline.bind_group_layout,
        &BindGroupEntries::sequential((
            view_binding,
            buffers.picking_uniforms.as_entire_binding(),
            buffers.position_buffer.as_entire_binding(),
            buffers.pick_color_buffer.as_entire_binding(),
            buffers.scale_buffer.as_entire_binding(),
            buffers.sprite_index_buffer.as_entire_binding(),
            &atlas.texture_view,
            &atlas.sampler,
        )),
    );

    commands.insert_resource(ScatterBindGroups { visual, picking });
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct ScatterSpriteLabel;

/// Draws the queued passes: one instanced quad strip per pass, four vertices
/// per point.
#[derive(Default)]
pub struct ScatterSpriteNode;

impl ViewNode for ScatterSpriteNode {
    type ViewQuery = (
        &'static ViewTarget,
        &'static ViewDepthTexture,
        &'static ViewUniformOffset,
    );

    fn run<'w>(
        &self,
        _graph: &mut bevy::render::render_graph::RenderGraphContext,
        render_context: &mut bevy::render::renderer::RenderContext<'w>,
        (target, depth, view_uniform_offset): bevy::ecs::query::QueryItem<'w, 'w, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), bevy::render::render_graph::NodeRunError> {
        let (Some(buffers), Some(bind_groups), Some(pipeline_ids)) = (
            world.get_resource::<ScatterGpuBuffers>(),
            world.get_resource::<ScatterBindGroups>(),
            world.get_resource::<ScatterPipelineIds>(),
        ) else {
            return Ok(());
        };
        if buffers.point_count == 0 {
            return Ok(());
        }
        let extracted = world.resource::<ExtractedScatterState>();
        let pipeline_cache = world.resource::<PipelineCache>();
        let encoder = render_context.command_encoder();

        for pass in &extracted.uploads.passes {
            match pass.kind {
                PassKind::Visual => {
                    let Some(pipeline) = pipeline_cache.get_render_pipeline(pipeline_ids.visual)
                    else {
                        continue;
                    };
                    let mut color_attachment = target.get_color_attachment();
                    color_attachment.ops = Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    };
                    let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                        label: Some("scatter_sprite_pass"),
                        color_attachments: &[Some(color_attachment)],
                        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                            view: depth.view(),
                            depth_ops: Some(Operations {
                                load: LoadOp::Load,
                                store: StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, &bind_groups.visual, &[view_uniform_offset.offset]);
                    render_pass.draw(0..4, 0..buffers.point_count);
                }
                PassKind::Picking => {
                    let Some(pipeline) = pipeline_cache.get_render_pipeline(pipeline_ids.picking)
                    else {
                        continue;
                    };
                    let Some(pick_target) = world.get_resource::<PickTarget>() else {
                        continue;
                    };
                    // Clear to white: white decodes above any point index, so
                    // readback treats it as no hit.
                    let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                        label: Some("scatter_pick_pass"),
                        color_attachments: &[Some(RenderPassColorAttachment {
                            view: &pick_target.view,
                            resolve_target: None,
                            ops: Operations {
                                load: LoadOp::Clear(wgpu::Color::WHITE),
                                store: StoreOp::Store,
                            },
                            depth_slice: None,
                        })],
                        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                            view: &pick_target.depth_view,
                            depth_ops: Some(Operations {
                                // Reverse-Z far plane
                                load: LoadOp::Clear(0.0),
                                store: StoreOp::Discard,
                            }),
                            stencil_ops: None,
                        }),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(
                        0,
                        &bind_groups.picking,
                        &[view_uniform_offset.offset],
                    );
                    render_pass.draw(0..4, 0..buffers.point_count);
                }
            }
        }

        Ok(())
    }
}
