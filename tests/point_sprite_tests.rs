// Scatter point-sprite behavior tests: picking-color encoding, frame
// parameter formulas, geometry rebuild policy and the visualizer contract.

use bevy::prelude::Entity;
use glam::Vec3;

use scatter_sprite_render::{
    buffer_action, create_test_points, decode_picking_color, fog_distances, fog_multiplier,
    picking_color, picking_color_table, point_size_for, AttributeBuffer, BufferAction, CameraKind,
    FrameContext, MaterialPair, PassKind, PointDataset, PointSpriteUniforms, ScatterVisualizer,
    SpriteAtlas, SpritePointVisualizer, FOG_POINT_THRESHOLD, ORTHO_SIZE_DIVISOR,
    POINT_SIZE_LOG_BASE, POINT_SIZE_SCALE, SPRITE_POINT_SIZE,
};

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}

// A frame context with uniform colors and unit scale factors
fn frame_context(camera: CameraKind, point_count: usize) -> FrameContext {
    FrameContext {
        camera,
        background_color: Vec3::new(0.1, 0.2, 0.3),
        nearest_point_z: 10.0,
        farthest_point_z: 100.0,
        point_colors: vec![0.5; point_count * 3],
        scale_factors: vec![1.0; point_count],
    }
}

fn test_atlas() -> SpriteAtlas {
    SpriteAtlas {
        image: Default::default(),
        image_width: 256.0,
        image_height: 128.0,
        sprite_width: 32.0,
        sprite_height: 32.0,
    }
}

// Build a visualizer holding geometry for `count` grid points
fn visualizer_with_points(count: usize) -> SpritePointVisualizer {
    let (positions, dataset) = create_test_points(count);
    let mut visualizer = SpritePointVisualizer::default();
    visualizer.set_scene(Entity::PLACEHOLDER);
    visualizer.on_point_positions_changed(Some(&positions), &dataset);
    visualizer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picking_color_roundtrip() {
        // Indices above 2^16 exercise the high byte
        for index in [0u32, 1, 255, 256, 65535, 65536, 69999, 0x123456] {
            let rgb = picking_color(index);
            let bytes = [
                (rgb[0] * 255.0).round() as u8,
                (rgb[1] * 255.0).round() as u8,
                (rgb[2] * 255.0).round() as u8,
            ];
            assert_eq!(decode_picking_color(bytes), index);
        }
    }

    #[test]
    fn test_picking_color_channels() {
        let rgb = picking_color(0x123456);
        assert!(approx(rgb[0], 0x12 as f32 / 255.0));
        assert!(approx(rgb[1], 0x34 as f32 / 255.0));
        assert!(approx(rgb[2], 0x56 as f32 / 255.0));
    }

    #[test]
    fn test_picking_table_size_and_contents() {
        let table = picking_color_table(70000);
        assert_eq!(table.len(), 70000 * 3);
        let expected = picking_color(69999);
        assert_eq!(&table[69999 * 3..70000 * 3], &expected);
    }

    #[test]
    fn test_point_size_monotone_in_count() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let a = rng.gen_range(2usize..1_000_000);
            let b = rng.gen_range(a..=1_000_000);
            let size_a = point_size_for(false, a, CameraKind::Perspective);
            let size_b = point_size_for(false, b, CameraKind::Perspective);
            assert!(
                size_a >= size_b,
                "size must not grow with count: n={} -> {}, n={} -> {}",
                a,
                size_a,
                b,
                size_b
            );
        }
    }

    #[test]
    fn test_point_size_formula() {
        let n = 10000usize;
        let expected = POINT_SIZE_SCALE / (n as f32).ln() / POINT_SIZE_LOG_BASE.ln();
        assert!(approx(
            point_size_for(false, n, CameraKind::Perspective),
            expected
        ));
        assert!(approx(
            point_size_for(false, n, CameraKind::Orthographic),
            expected / ORTHO_SIZE_DIVISOR
        ));
        // Image-backed points ignore the density heuristic
        assert!(approx(
            point_size_for(true, n, CameraKind::Perspective),
            SPRITE_POINT_SIZE
        ));
        assert!(approx(
            point_size_for(true, 10, CameraKind::Orthographic),
            SPRITE_POINT_SIZE
        ));
    }

    #[test]
    fn test_point_size_single_point_is_finite() {
        let size = point_size_for(false, 1, CameraKind::Perspective);
        assert!(size.is_finite() && size > 0.0);
    }

    #[test]
    fn test_fog_multiplier_range() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n = rng.gen_range(0usize..20000);
            let m = fog_multiplier(n);
            assert!((1.0..=2.0).contains(&m), "multiplier out of range: {}", m);
        }
        assert!(approx(fog_multiplier(0), 2.0));
        assert!(approx(fog_multiplier(FOG_POINT_THRESHOLD), 1.0));
        assert!(approx(fog_multiplier(FOG_POINT_THRESHOLD * 10), 1.0));
        // No jump at the threshold
        let below = fog_multiplier(FOG_POINT_THRESHOLD - 1);
        assert!((below - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_fog_distances() {
        let (near, far) = fog_distances(CameraKind::Perspective, 2500, 10.0, 100.0);
        assert!(approx(near, 10.0));
        assert!(approx(far, 100.0 * 1.5));

        let (near, far) = fog_distances(CameraKind::Orthographic, 2500, 10.0, 100.0);
        assert!(near.is_infinite() && far.is_infinite());
    }

    #[test]
    fn test_buffer_action_policy() {
        // Same capacity and image: reuse, even for fewer points
        assert_eq!(buffer_action(100, Some(&1), 100, Some(&1)), BufferAction::Reuse);
        assert_eq!(buffer_action(100, Some(&1), 50, Some(&1)), BufferAction::Reuse);
        // Growth rebuilds
        assert_eq!(buffer_action(100, Some(&1), 101, Some(&1)), BufferAction::Rebuild);
        // Image identity change rebuilds in every direction
        assert_eq!(buffer_action(100, Some(&1), 100, Some(&2)), BufferAction::Rebuild);
        assert_eq!(buffer_action::<i32>(100, None, 100, Some(&1)), BufferAction::Rebuild);
        assert_eq!(buffer_action::<i32>(100, Some(&1), 100, None), BufferAction::Rebuild);
        assert_eq!(buffer_action::<i32>(100, None, 100, None), BufferAction::Reuse);
    }

    #[test]
    fn test_visualizer_reuses_and_rebuilds() {
        let mut visualizer = visualizer_with_points(100);
        let first_build = visualizer.build_id();
        assert_eq!(visualizer.point_count(), 100);
        assert_eq!(visualizer.capacity(), 100);

        // Fewer points: same allocation
        let (positions, dataset) = create_test_points(50);
        visualizer.on_point_positions_changed(Some(&positions), &dataset);
        assert_eq!(visualizer.build_id(), first_build);
        assert_eq!(visualizer.point_count(), 50);
        assert_eq!(visualizer.capacity(), 100);

        // More points than capacity: rebuild
        let (positions, dataset) = create_test_points(200);
        visualizer.on_point_positions_changed(Some(&positions), &dataset);
        assert_eq!(visualizer.build_id(), first_build + 1);
        assert_eq!(visualizer.capacity(), 200);
    }

    #[test]
    fn test_visualizer_image_change_rebuilds() {
        let mut visualizer = visualizer_with_points(100);
        let first_build = visualizer.build_id();
        assert!(!visualizer.has_image());

        let (positions, dataset) = create_test_points(100);
        let dataset = dataset.with_atlas(test_atlas(), vec![0; 100]);
        visualizer.on_point_positions_changed(Some(&positions), &dataset);
        assert_eq!(visualizer.build_id(), first_build + 1);
        assert!(visualizer.has_image());

        // Atlas dimensions land in the shared uniforms as sub-image units
        let materials = visualizer.materials().unwrap();
        assert_eq!(materials.visual.is_image, 1);
        assert!(approx(materials.visual.image_width, 8.0));
        assert!(approx(materials.visual.image_height, 4.0));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut visualizer = visualizer_with_points(10);
        visualizer.dispose();
        assert!(!visualizer.has_geometry());
        assert!(visualizer.scene().is_none());
        visualizer.dispose();
        assert!(!visualizer.has_geometry());

        // Rendering after dispose queues nothing
        visualizer.on_render(&frame_context(CameraKind::Perspective, 10));
        visualizer.on_picking_render(&frame_context(CameraKind::Perspective, 10));
        assert!(visualizer.drain_frame().passes.is_empty());
    }

    #[test]
    fn test_none_positions_release_geometry() {
        let mut visualizer = visualizer_with_points(10);
        assert!(visualizer.has_geometry());
        visualizer.on_point_positions_changed(None, &PointDataset::new(0));
        assert!(!visualizer.has_geometry());
        assert_eq!(visualizer.point_count(), 0);
    }

    #[test]
    fn test_render_before_positions_is_noop() {
        let mut visualizer = SpritePointVisualizer::default();
        visualizer.on_render(&frame_context(CameraKind::Perspective, 10));
        visualizer.on_picking_render(&frame_context(CameraKind::Perspective, 10));
        let uploads = visualizer.drain_frame();
        assert!(uploads.passes.is_empty());
        assert!(uploads.positions.is_none());
    }

    #[test]
    fn test_visual_pass_10000_points_perspective() {
        let n = 10000usize;
        let mut visualizer = visualizer_with_points(n);
        visualizer.on_render(&frame_context(CameraKind::Perspective, n));

        let uploads = visualizer.drain_frame();
        assert_eq!(uploads.passes.len(), 1);
        assert_eq!(uploads.positions.as_ref().map(Vec::len), Some(n * 3));

        let pass = &uploads.passes[0];
        assert_eq!(pass.kind, PassKind::Visual);
        assert_eq!(pass.uniforms.point_count, n as u32);
        assert_eq!(pass.uniforms.size_attenuation, 1);
        let expected_size = POINT_SIZE_SCALE / (n as f32).ln() / POINT_SIZE_LOG_BASE.ln();
        assert!(approx(pass.uniforms.point_size, expected_size));
        // At 10000 points the fog multiplier has bottomed out
        assert!(approx(pass.uniforms.fog_near, 10.0));
        assert!(approx(pass.uniforms.fog_far, 100.0));
        assert_eq!(pass.colors.as_ref().map(Vec::len), Some(n * 3));
        assert_eq!(pass.scale_factors.as_ref().map(Vec::len), Some(n));
    }

    #[test]
    fn test_visual_pass_100_points_orthographic() {
        let n = 100usize;
        let mut visualizer = visualizer_with_points(n);
        visualizer.on_render(&frame_context(CameraKind::Orthographic, n));

        let uploads = visualizer.drain_frame();
        let pass = &uploads.passes[0];
        assert_eq!(pass.uniforms.size_attenuation, 0);
        assert!(pass.uniforms.fog_near.is_infinite());
        assert!(pass.uniforms.fog_far.is_infinite());
        let expected_size = POINT_SIZE_SCALE / (n as f32).ln() / POINT_SIZE_LOG_BASE.ln()
            / ORTHO_SIZE_DIVISOR;
        assert!(approx(pass.uniforms.point_size, expected_size));
    }

    #[test]
    fn test_picking_pass_uses_id_colors() {
        let n = 300usize;
        let mut visualizer = visualizer_with_points(n);
        visualizer.on_picking_render(&frame_context(CameraKind::Perspective, n));

        let uploads = visualizer.drain_frame();
        assert_eq!(uploads.passes.len(), 1);
        let pass = &uploads.passes[0];
        assert_eq!(pass.kind, PassKind::Picking);
        assert_eq!(pass.colors.as_deref(), Some(&picking_color_table(n)[..]));
        // Picking output must never be fogged
        assert!(pass.uniforms.fog_far <= pass.uniforms.fog_near);
        assert_eq!(pass.uniforms.point_count, n as u32);
    }

    #[test]
    fn test_both_passes_in_one_frame() {
        let n = 50usize;
        let mut visualizer = visualizer_with_points(n);
        visualizer.on_render(&frame_context(CameraKind::Perspective, n));
        visualizer.on_picking_render(&frame_context(CameraKind::Perspective, n));

        let uploads = visualizer.drain_frame();
        assert_eq!(uploads.passes.len(), 2);
        assert_eq!(uploads.passes[0].kind, PassKind::Visual);
        assert_eq!(uploads.passes[1].kind, PassKind::Picking);
        // Each pass carries its own color array
        assert!(uploads.passes[0].colors.is_some());
        assert!(uploads.passes[1].colors.is_some());
        // A second drain finds nothing
        assert!(visualizer.drain_frame().passes.is_empty());
    }

    #[test]
    fn test_attribute_buffer_uploads_once_per_set() {
        let mut buffer = AttributeBuffer::default();
        assert!(buffer.take_upload().is_none());

        buffer.set(vec![1.0, 2.0, 3.0]);
        assert!(buffer.needs_upload());
        assert_eq!(buffer.take_upload().as_deref(), Some(&[1.0, 2.0, 3.0][..]));
        // The flag is consumed, the data stays readable
        assert!(buffer.take_upload().is_none());
        assert_eq!(buffer.data(), &[1.0, 2.0, 3.0]);

        buffer.set(vec![4.0]);
        assert_eq!(buffer.take_upload().as_deref(), Some(&[4.0][..]));
    }

    #[test]
    fn test_frame_context_point_count() {
        let ctx = frame_context(CameraKind::Perspective, 7);
        assert_eq!(ctx.point_count(), 7);
        assert_eq!(ctx.point_colors.len(), 21);
    }

    #[test]
    fn test_material_pair_is_cloned_not_aliased() {
        let shared = PointSpriteUniforms::for_atlas(None, 42);
        let mut materials = MaterialPair::new(shared);
        materials.visual.point_size = 99.0;
        materials.visual.fog_near = 1.0;
        assert!(approx(materials.picking.point_size, 1.0));
        assert!(materials.picking.fog_near.is_infinite());
        assert_eq!(materials.picking.point_count, 42);
    }

    #[test]
    fn test_pipeline_state_policy() {
        use scatter_sprite_render::materials::{blend_state, depth_write};

        // Circles blend multiplicatively and skip the depth write
        assert!(blend_state(PassKind::Visual, false).is_some());
        assert!(!depth_write(PassKind::Visual, false));
        // Sprites are alpha-cutout: opaque pipeline state
        assert!(blend_state(PassKind::Visual, true).is_none());
        assert!(depth_write(PassKind::Visual, true));
        // Picking is always opaque and depth-tested
        assert!(blend_state(PassKind::Picking, false).is_none());
        assert!(blend_state(PassKind::Picking, true).is_none());
        assert!(depth_write(PassKind::Picking, false));
    }
}
