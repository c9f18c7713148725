use glam::{Mat4, Vec3};

pub const MIN_INSTANCE_COUNT: u32 = 1;
pub const MAX_INSTANCE_COUNT: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceRecord {
    pub transform: Mat4,
    /// Seconds added to the shared playback time for this copy.
    pub time_offset: f32,
}

/// Per-instance vertex data uploaded to the VAT pipeline.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub time_offset: f32,
    pub _padding: [f32; 3],
}

impl InstanceRaw {
    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 16,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 32,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 48,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: 64,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32,
                },
            ],
        }
    }
}

impl From<&InstanceRecord> for InstanceRaw {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            model: record.transform.to_cols_array_2d(),
            time_offset: record.time_offset,
            _padding: [0.0; 3],
        }
    }
}

/// Square grid of copies sharing one mesh and one pair of textures. Phase
/// offsets grow along the row + column diagonal, so the copies ripple.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceLayout {
    grid_size: u32,
    spacing: f32,
    records: Vec<InstanceRecord>,
}

impl Default for InstanceLayout {
    fn default() -> Self {
        Self::single()
    }
}

impl InstanceLayout {
    /// One copy at the origin with no phase offset.
    pub fn single() -> Self {
        Self::build(1, 0.0, 0.0)
    }

    /// `count` is clamped to `[1, 10000]`.
    pub fn build(count: u32, spacing: f32, anim_duration: f32) -> Self {
        let count = count.clamp(MIN_INSTANCE_COUNT, MAX_INSTANCE_COUNT);
        let spacing = if spacing.is_finite() { spacing } else { 0.0 };
        let anim_duration = if anim_duration.is_finite() { anim_duration.max(0.0) } else { 0.0 };
        let grid_size = (count as f64).sqrt().ceil() as u32;
        let center_offset = (grid_size - 1) as f32 * spacing * 0.5;
        let diagonal_span = (2 * grid_size).saturating_sub(2);

        let records = (0..count)
            .map(|i| {
                let row = i / grid_size;
                let col = i % grid_size;
                let x = col as f32 * spacing - center_offset;
                let z = row as f32 * spacing - center_offset;
                // A single cell has no diagonal to spread over.
                let time_offset = if diagonal_span == 0 {
                    0.0
                } else {
                    (row + col) as f32 / diagonal_span as f32 * anim_duration
                };
                InstanceRecord { transform: Mat4::from_translation(Vec3::new(x, 0.0, z)), time_offset }
            })
            .collect();

        Self { grid_size, spacing, records }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[InstanceRecord] {
        &self.records
    }

    pub fn transforms(&self) -> Vec<Mat4> {
        self.records.iter().map(|record| record.transform).collect()
    }

    pub fn time_offsets(&self) -> Vec<f32> {
        self.records.iter().map(|record| record.time_offset).collect()
    }

    /// Half-width of the grid on the XZ plane, for camera framing.
    pub fn half_extent(&self) -> f32 {
        (self.grid_size.saturating_sub(1)) as f32 * self.spacing.abs() * 0.5
    }

    pub fn to_raw(&self) -> Vec<InstanceRaw> {
        self.records.iter().map(InstanceRaw::from).collect()
    }
}
