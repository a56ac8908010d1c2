// Geometry buffers for the point cloud (CPU side)
//
// Owns the per-point attribute arrays that back the GPU buffers: position,
// color, scale factor and sprite/vertex index, plus the picking-color table.
// Arrays are only ever replaced wholesale; each replacement raises a dirty
// flag that the upload stage consumes before the next draw.

use crate::dataset::{RGB_NUM_ELEMENTS, XYZ_NUM_ELEMENTS};

/// A single per-point attribute array with a pending-upload marker.
///
/// `set` replaces the backing array and marks it dirty; `take_upload` hands
/// the data to the GPU upload stage exactly once per replacement.
#[derive(Debug, Clone, Default)]
pub struct AttributeBuffer {
    data: Vec<f32>,
    needs_upload: bool,
}

impl AttributeBuffer {
    pub fn set(&mut self, values: Vec<f32>) {
        self.data = values;
        self.needs_upload = true;
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn needs_upload(&self) -> bool {
        self.needs_upload
    }

    /// Consume the pending-upload marker, returning the data to push to the
    /// GPU, or `None` when nothing changed since the last upload.
    pub fn take_upload(&mut self) -> Option<Vec<f32>> {
        if self.needs_upload {
            self.needs_upload = false;
            Some(self.data.clone())
        } else {
            None
        }
    }
}

/// Outcome of the rebuild-vs-reuse decision for a position update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAction {
    /// Existing geometry has enough capacity and the sprite image is
    /// unchanged; rebind arrays in place.
    Reuse,
    /// Capacity is insufficient or the sprite image identity changed;
    /// dispose GPU resources and build fresh geometry.
    Rebuild,
}

/// Pure decision function for geometry invalidation.
///
/// Capacity is never shrunk: a smaller incoming point count reuses the
/// existing allocation. The image comparison is by identity token, not
/// content.
pub fn buffer_action<I: PartialEq>(
    old_capacity: usize,
    old_image: Option<&I>,
    new_point_count: usize,
    new_image: Option<&I>,
) -> BufferAction {
    if old_capacity < new_point_count || old_image != new_image {
        BufferAction::Rebuild
    } else {
        BufferAction::Reuse
    }
}

/// Encode a point index as an RGB picking color, 8 bits per channel.
pub fn picking_color(index: u32) -> [f32; 3] {
    [
        ((index >> 16) & 0xff) as f32 / 255.0,
        ((index >> 8) & 0xff) as f32 / 255.0,
        (index & 0xff) as f32 / 255.0,
    ]
}

/// Invert `picking_color` from an 8-bit-per-channel readback pixel.
pub fn decode_picking_color(rgb: [u8; 3]) -> u32 {
    ((rgb[0] as u32) << 16) | ((rgb[1] as u32) << 8) | rgb[2] as u32
}

/// Build the full picking-color table: 3 floats per point, slot `i` encodes
/// index `i`.
pub fn picking_color_table(point_count: usize) -> Vec<f32> {
    let mut table = Vec::with_capacity(point_count * RGB_NUM_ELEMENTS);
    for i in 0..point_count {
        table.extend_from_slice(&picking_color(i as u32));
    }
    table
}

/// CPU-side geometry for the point cloud.
///
/// All four attribute arrays share the same point-count capacity. The sprite
/// index array is populated once at build time; position is rebound on every
/// position update; color and scale factor are overwritten every frame from
/// the render context (or, for picking, from the precomputed table).
#[derive(Debug, Default)]
pub struct PointGeometry {
    capacity: usize,
    point_count: usize,
    pub positions: AttributeBuffer,
    pub colors: AttributeBuffer,
    pub scale_factors: AttributeBuffer,
    pub sprite_indices: AttributeBuffer,
    picking_colors: Vec<f32>,
}

impl PointGeometry {
    pub fn new(point_count: usize) -> Self {
        Self {
            capacity: point_count,
            point_count,
            positions: AttributeBuffer::default(),
            colors: AttributeBuffer::default(),
            scale_factors: AttributeBuffer::default(),
            sprite_indices: AttributeBuffer::default(),
            picking_colors: picking_color_table(point_count),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Rebind the position array. The point count may be at most the
    /// geometry capacity; the caller is responsible for having rebuilt the
    /// geometry when it is not.
    pub fn set_positions(&mut self, positions: Vec<f32>) {
        self.point_count = positions.len() / XYZ_NUM_ELEMENTS;
        self.positions.set(positions);
    }

    pub fn picking_colors(&self) -> &[f32] {
        &self.picking_colors
    }
}
