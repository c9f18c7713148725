//! The VAT decode contract.
//!
//! Everything here mirrors `assets/shaders/vat.wgsl` one function at a time.
//! The GPU program is what actually animates the mesh; the CPU side exists so
//! the contract can be tested and so `vat_check` can inspect exported data
//! without a GPU.

use crate::mesh::VatVertex;
use crate::metadata::VatMetadata;
use crate::texture::VatTexture;
use glam::{UVec2, Vec2, Vec3, Vec4};

bitflags::bitflags! {
    /// Mode switches shared with the shader as a single `u32`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DecodeFlags: u32 {
        const PACKED = 1 << 0;
        const FLIP_V = 1 << 1;
        const USE_OFFSET = 1 << 2;
        const USE_NORMAL_TEXTURE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    #[default]
    Shaded,
    /// `(coord.x, coord.y * 10, frame / numFrames)`
    Coordinate,
    /// `normal * 0.5 + 0.5`
    Normal,
    /// Raw position texel RGB.
    RawSample,
}

impl DebugMode {
    pub const ALL: [DebugMode; 4] =
        [DebugMode::Shaded, DebugMode::Coordinate, DebugMode::Normal, DebugMode::RawSample];

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        match self {
            DebugMode::Shaded => 0,
            DebugMode::Coordinate => 1,
            DebugMode::Normal => 2,
            DebugMode::RawSample => 3,
        }
    }

    pub fn next(self) -> Self {
        Self::ALL[(self.index() as usize + 1) % Self::ALL.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            DebugMode::Shaded => "Shaded",
            DebugMode::Coordinate => "Baked coordinate / frame",
            DebugMode::Normal => "Normals",
            DebugMode::RawSample => "Raw position sample",
        }
    }
}

/// Whole-record snapshot of everything the decode program reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    pub num_frames: u32,
    pub fps: f32,
    pub pos_min: Vec3,
    pub pos_max: Vec3,
    pub texture_size: UVec2,
    pub flags: DecodeFlags,
    pub debug_mode: DebugMode,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self::from_metadata(&VatMetadata::default(), UVec2::ONE, DecodeFlags::PACKED, DebugMode::Shaded)
    }
}

impl DecodeParams {
    pub fn from_metadata(
        metadata: &VatMetadata,
        texture_size: UVec2,
        flags: DecodeFlags,
        debug_mode: DebugMode,
    ) -> Self {
        Self {
            num_frames: metadata.num_frames.max(1),
            fps: metadata.fps,
            pos_min: metadata.pos_min,
            pos_max: metadata.pos_max,
            texture_size: texture_size.max(UVec2::ONE),
            flags,
            debug_mode,
        }
    }

    pub fn duration(&self) -> f32 {
        self.num_frames as f32 / self.fps
    }

    pub fn frame_at(&self, time: f32, phase: f32) -> u32 {
        frame_index(time, phase, self.fps, self.num_frames)
    }
}

/// `floor(((time + phase) * fps) mod numFrames)` with a non-negative wrap.
pub fn frame_index(time: f32, phase: f32, fps: f32, num_frames: u32) -> u32 {
    debug_assert!(num_frames > 0, "frame count must be validated before decoding");
    let frames = num_frames.max(1);
    let wrapped = ((time + phase) * fps).rem_euclid(frames as f32);
    if !wrapped.is_finite() {
        return 0;
    }
    // rem_euclid may round up to exactly `frames` for tiny negative inputs.
    (wrapped.floor() as u32).min(frames - 1)
}

/// Texture coordinate holding `frame` for a vertex whose frame-0 data lives at `coord`.
pub fn frame_sample_uv(coord: Vec2, frame: u32, num_frames: u32, flip_v: bool) -> Vec2 {
    let band_height = 1.0 / num_frames.max(1) as f32;
    let v = coord.y + frame as f32 * band_height;
    Vec2::new(coord.x, if flip_v { 1.0 - v } else { v })
}

/// Point-sampled texel for `uv`, clamped to the texture edge.
pub fn texel_coords(uv: Vec2, size: UVec2) -> UVec2 {
    let size = size.max(UVec2::ONE);
    let scaled = (uv * size.as_vec2()).floor();
    let max = (size - UVec2::ONE).as_vec2();
    scaled.clamp(Vec2::ZERO, max).as_uvec2()
}

pub fn dequantize(raw: Vec3, packed: bool, pos_min: Vec3, pos_max: Vec3) -> Vec3 {
    if packed {
        pos_min + (pos_max - pos_min) * raw
    } else {
        raw
    }
}

pub fn compose_position(rest: Vec3, decoded: Vec3, use_offset: bool) -> Vec3 {
    if use_offset {
        rest + decoded
    } else {
        decoded
    }
}

/// Unpacks a signed unit vector stored as `n * 0.5 + 0.5`.
pub fn decode_normal(raw: Vec3, rest: Vec3) -> Vec3 {
    let normal = (raw * 2.0 - Vec3::ONE).normalize_or_zero();
    if normal == Vec3::ZERO {
        rest
    } else {
        normal
    }
}

pub fn debug_color(
    mode: DebugMode,
    coord: Vec2,
    frame: u32,
    num_frames: u32,
    normal: Vec3,
    raw: Vec3,
) -> Option<Vec3> {
    match mode {
        DebugMode::Shaded => None,
        DebugMode::Coordinate => {
            Some(Vec3::new(coord.x, coord.y * 10.0, frame as f32 / num_frames.max(1) as f32))
        }
        DebugMode::Normal => Some(normal * 0.5 + Vec3::splat(0.5)),
        DebugMode::RawSample => Some(raw),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedVertex {
    pub frame: u32,
    pub sample_uv: Vec2,
    pub texel: UVec2,
    pub raw: Vec4,
    pub position: Vec3,
    pub normal: Vec3,
}

/// CPU mirror of the vertex stage.
pub struct CpuDecoder<'a> {
    params: &'a DecodeParams,
    positions: &'a VatTexture,
    normals: Option<&'a VatTexture>,
}

impl<'a> CpuDecoder<'a> {
    pub fn new(params: &'a DecodeParams, positions: &'a VatTexture, normals: Option<&'a VatTexture>) -> Self {
        Self { params, positions, normals }
    }

    pub fn decode(&self, vertex: &VatVertex, time: f32, phase: f32) -> DecodedVertex {
        let frame = self.params.frame_at(time, phase);
        self.decode_frame(vertex, frame)
    }

    pub fn decode_frame(&self, vertex: &VatVertex, frame: u32) -> DecodedVertex {
        let params = self.params;
        let coord = Vec2::from_array(vertex.uv2);
        let sample_uv =
            frame_sample_uv(coord, frame, params.num_frames, params.flags.contains(DecodeFlags::FLIP_V));
        let texel = texel_coords(sample_uv, self.positions.size());
        let raw = self.positions.fetch(texel.x, texel.y);
        let decoded = dequantize(
            raw.truncate(),
            params.flags.contains(DecodeFlags::PACKED),
            params.pos_min,
            params.pos_max,
        );
        let rest_position = Vec3::from_array(vertex.position);
        let use_offset = params.flags.contains(DecodeFlags::USE_OFFSET);
        let position = compose_position(rest_position, decoded, use_offset);

        let rest_normal = Vec3::from_array(vertex.normal);
        let normal = match self.normals {
            Some(normals) if params.flags.contains(DecodeFlags::USE_NORMAL_TEXTURE) => {
                decode_normal(normals.sample_nearest(sample_uv).truncate(), rest_normal)
            }
            _ => rest_normal,
        };

        DecodedVertex { frame, sample_uv, texel, raw, position, normal }
    }
}

/// Uniform block consumed by `vat.wgsl`. Field order matches the WGSL struct.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VatUniforms {
    pub pos_min: [f32; 4],
    pub pos_max: [f32; 4],
    /// `(width, height, 1 / width, 1 / height)`
    pub texture_size: [f32; 4],
    pub time: f32,
    pub fps: f32,
    pub num_frames: u32,
    pub flags: u32,
    pub debug_mode: u32,
    pub _padding: [u32; 3],
}

impl VatUniforms {
    pub fn new(params: &DecodeParams, time: f32) -> Self {
        let size = params.texture_size.as_vec2();
        Self {
            pos_min: params.pos_min.extend(0.0).to_array(),
            pos_max: params.pos_max.extend(0.0).to_array(),
            texture_size: [size.x, size.y, 1.0 / size.x, 1.0 / size.y],
            time,
            fps: params.fps,
            num_frames: params.num_frames,
            flags: params.flags.bits(),
            debug_mode: params.debug_mode.index(),
            _padding: [0; 3],
        }
    }
}

const _: () = assert!(std::mem::size_of::<VatUniforms>() == 80);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_loop_boundary_wraps_to_zero() {
        assert_eq!(frame_index(2.0, 0.0, 2.0, 4), 0);
        assert_eq!(frame_index(4.0, 0.0, 2.0, 4), 0);
        assert_eq!(frame_index(1.0, 0.0, 2.0, 4), 2);
    }

    #[test]
    fn phase_offset_shifts_frame() {
        assert_eq!(frame_index(0.0, 0.5, 2.0, 4), 1);
        assert_eq!(frame_index(1.5, 0.5, 2.0, 4), 0);
    }

    #[test]
    fn tiny_negative_input_stays_in_range() {
        assert_eq!(frame_index(-1e-9, 0.0, 24.0, 48), 47);
    }

    #[test]
    fn flip_v_is_an_involution() {
        let coord = Vec2::new(0.3, 0.05);
        let flipped = frame_sample_uv(coord, 3, 8, true);
        let plain = frame_sample_uv(coord, 3, 8, false);
        assert!((1.0 - flipped.y - plain.y).abs() < 1e-6);
        assert_eq!(flipped.x, plain.x);
    }

    #[test]
    fn texel_coords_clamp_to_edges() {
        let size = UVec2::new(4, 8);
        assert_eq!(texel_coords(Vec2::new(0.0, 0.0), size), UVec2::new(0, 0));
        assert_eq!(texel_coords(Vec2::new(1.0, 1.0), size), UVec2::new(3, 7));
        assert_eq!(texel_coords(Vec2::new(-0.2, 0.5), size), UVec2::new(0, 4));
        assert_eq!(texel_coords(Vec2::new(0.49, 0.126), size), UVec2::new(1, 1));
    }

    #[test]
    fn dequantize_hits_bounds_at_extremes() {
        let min = Vec3::new(-2.0, 0.0, 1.0);
        let max = Vec3::new(2.0, 4.0, 1.0);
        assert_eq!(dequantize(Vec3::ZERO, true, min, max), min);
        assert_eq!(dequantize(Vec3::ONE, true, min, max), max);
        let raw = Vec3::new(0.25, -3.0, 7.0);
        assert_eq!(dequantize(raw, false, min, max), raw);
    }

    #[test]
    fn offset_mode_adds_rest_pose() {
        let rest = Vec3::new(1.0, 2.0, 3.0);
        let decoded = Vec3::new(0.5, 0.5, 0.5);
        assert_eq!(compose_position(rest, decoded, true), Vec3::new(1.5, 2.5, 3.5));
        assert_eq!(compose_position(rest, decoded, false), decoded);
    }

    #[test]
    fn gray_normal_falls_back_to_rest() {
        assert_eq!(decode_normal(Vec3::splat(0.5), Vec3::Y), Vec3::Y);
        let up = decode_normal(Vec3::new(0.5, 1.0, 0.5), Vec3::X);
        assert!((up - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn debug_colors_follow_mode_table() {
        let coord = Vec2::new(0.25, 0.05);
        let color = debug_color(DebugMode::Coordinate, coord, 2, 4, Vec3::Y, Vec3::ZERO).expect("color");
        assert!((color - Vec3::new(0.25, 0.5, 0.5)).length() < 1e-6);
        let normal = debug_color(DebugMode::Normal, coord, 0, 4, Vec3::Y, Vec3::ZERO).expect("color");
        assert_eq!(normal, Vec3::new(0.5, 1.0, 0.5));
        assert!(debug_color(DebugMode::Shaded, coord, 0, 4, Vec3::Y, Vec3::ZERO).is_none());
    }

    #[test]
    fn debug_mode_cycles_through_all_modes() {
        let mut mode = DebugMode::Shaded;
        for expected in [DebugMode::Coordinate, DebugMode::Normal, DebugMode::RawSample, DebugMode::Shaded] {
            mode = mode.next();
            assert_eq!(mode, expected);
        }
        assert_eq!(DebugMode::from_index(4), None);
    }

    #[test]
    fn uniforms_pack_flags_and_size() {
        let params = DecodeParams {
            texture_size: UVec2::new(256, 128),
            flags: DecodeFlags::PACKED | DecodeFlags::FLIP_V,
            ..DecodeParams::default()
        };
        let uniforms = VatUniforms::new(&params, 1.5);
        assert_eq!(uniforms.flags, 0b11);
        assert_eq!(uniforms.texture_size, [256.0, 128.0, 1.0 / 256.0, 1.0 / 128.0]);
        assert_eq!(uniforms.time, 1.5);
    }

    const VAT_SHADER: &str = include_str!("../assets/shaders/vat.wgsl");

    #[test]
    fn shader_flag_constants_match_decode_flags() {
        let pattern = regex::Regex::new(r"const FLAG_(\w+): u32 = (\d+)u;").expect("pattern");
        let shader_flags: Vec<(String, u32)> = pattern
            .captures_iter(VAT_SHADER)
            .map(|caps| (caps[1].to_string(), caps[2].parse().expect("flag value")))
            .collect();
        assert_eq!(shader_flags.len(), DecodeFlags::all().iter().count());
        for (name, bits) in shader_flags {
            let flag = DecodeFlags::from_name(&name).unwrap_or_else(|| panic!("unknown shader flag {name}"));
            assert_eq!(flag.bits(), bits, "FLAG_{name}");
        }
    }

    #[test]
    fn shader_debug_cases_cover_every_mode() {
        for mode in DebugMode::ALL.into_iter().skip(1) {
            let case = format!("case {}u:", mode.index());
            assert!(VAT_SHADER.contains(&case), "missing {case}");
        }
    }

    #[test]
    fn uniform_layout_matches_shader_struct() {
        assert_eq!(std::mem::offset_of!(VatUniforms, texture_size), 32);
        assert_eq!(std::mem::offset_of!(VatUniforms, time), 48);
        assert_eq!(std::mem::offset_of!(VatUniforms, num_frames), 56);
        assert_eq!(std::mem::offset_of!(VatUniforms, flags), 60);
        assert_eq!(std::mem::offset_of!(VatUniforms, debug_mode), 64);

        let start = VAT_SHADER.find("struct VatUniforms {").expect("shader struct");
        let body = &VAT_SHADER[start..];
        let body = &body[..body.find("};").expect("struct end")];
        let fields: Vec<&str> = body
            .lines()
            .skip(1)
            .filter_map(|line| line.trim().split(':').next())
            .filter(|name| !name.is_empty() && !name.starts_with('_'))
            .collect();
        assert_eq!(
            fields,
            ["pos_min", "pos_max", "texture_size", "time", "fps", "num_frames", "flags", "debug_mode"]
        );
    }

    proptest! {
        #[test]
        fn frame_always_in_range(
            time in 0.0f32..1.0e6,
            fps in 0.01f32..240.0,
            num_frames in 1u32..4096,
        ) {
            let frame = frame_index(time, 0.0, fps, num_frames);
            prop_assert!(frame < num_frames);
        }

        #[test]
        fn dequantized_positions_stay_in_bounds(
            raw in prop::array::uniform3(0.0f32..=1.0),
            min in prop::array::uniform3(-100.0f32..100.0),
            extent in prop::array::uniform3(0.0f32..50.0),
        ) {
            let min = Vec3::from_array(min);
            let max = min + Vec3::from_array(extent);
            let pos = dequantize(Vec3::from_array(raw), true, min, max);
            let tolerance = Vec3::splat(1e-3);
            prop_assert!(pos.cmpge(min - tolerance).all());
            prop_assert!(pos.cmple(max + tolerance).all());
        }
    }
}
