// Per-frame scalar parameters: point size and depth fog.
//
// Both are pure functions of the camera kind, the point count and the
// camera-space depth span, recomputed every frame by the visualizer.

use crate::dataset::CameraKind;

/// Numerator of the density-based point size heuristic.
pub const POINT_SIZE_SCALE: f32 = 200.0;
/// Log base of the density falloff.
pub const POINT_SIZE_LOG_BASE: f32 = 8.0;
/// Orthographic (2-D) views shrink points by this factor.
pub const ORTHO_SIZE_DIVISOR: f32 = 1.5;
/// Fixed on-screen size for image-backed (sprite atlas) points.
pub const SPRITE_POINT_SIZE: f32 = 30.0;
/// Lower clamp applied in the shader after size attenuation.
pub const MIN_POINT_SIZE: f32 = 5.0;
/// Point count at which the fog-far multiplier bottoms out.
pub const FOG_POINT_THRESHOLD: usize = 5000;

/// Base point size for this frame.
///
/// Image-backed points use a fixed size; plain circles shrink inverse
/// logarithmically as the point count grows, `200 / ln(n) / ln(8)`, so dense
/// clouds stay readable. Orthographic views get the additional shrink
/// factor. The count is clamped to 2 so a single point never divides by
/// `ln(1)`.
pub fn point_size_for(has_image: bool, point_count: usize, camera: CameraKind) -> f32 {
    if has_image {
        return SPRITE_POINT_SIZE;
    }
    let n = (point_count as f32).max(2.0);
    let scaled = POINT_SIZE_SCALE / n.ln() / POINT_SIZE_LOG_BASE.ln();
    if camera.is_3d() {
        scaled
    } else {
        scaled / ORTHO_SIZE_DIVISOR
    }
}

/// Multiplier applied to the farthest point depth to place the fog far
/// plane. Ranges over (1, 2]: sparse clouds push fog far out, clouds at or
/// above the threshold put it exactly at the farthest point.
pub fn fog_multiplier(point_count: usize) -> f32 {
    2.0 - point_count.min(FOG_POINT_THRESHOLD) as f32 / FOG_POINT_THRESHOLD as f32
}

/// Fog near/far distances for this frame. Orthographic views disable fog by
/// pushing both planes to infinity; the shader treats `far <= near` as
/// fog-off.
pub fn fog_distances(
    camera: CameraKind,
    point_count: usize,
    nearest_point_z: f32,
    farthest_point_z: f32,
) -> (f32, f32) {
    if camera.is_3d() {
        (nearest_point_z, farthest_point_z * fog_multiplier(point_count))
    } else {
        (f32::INFINITY, f32::INFINITY)
    }
}
