//! Calibration metadata for baked vertex animation textures.
//!
//! Two textual formats are accepted: a flat JSON object using the same field
//! names as [`VatMetadata`], and the line-oriented material dump written by
//! game-engine VAT exporters (`- _boundMinX: -1.25`). Parsing never fails on a
//! single bad field; the field is simply absent from the resulting
//! [`MetadataPatch`] and the previous value survives when the patch is applied.

use crate::error::{VatError, VatResult};
use glam::Vec3;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_NUM_FRAMES: u32 = 1;
pub const DEFAULT_FPS: f32 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VatMethod {
    Soft,
    Rigid,
    Fluid,
}

impl VatMethod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "soft" => Some(VatMethod::Soft),
            "rigid" => Some(VatMethod::Rigid),
            "fluid" => Some(VatMethod::Fluid),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VatMethod::Soft => "soft",
            VatMethod::Rigid => "rigid",
            VatMethod::Fluid => "fluid",
        }
    }
}

/// Validated calibration record. Instances are never edited in place; applying
/// a patch yields a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct VatMetadata {
    pub num_frames: u32,
    pub fps: f32,
    pub pos_min: Vec3,
    pub pos_max: Vec3,
    pub normal_min: Option<Vec3>,
    pub normal_max: Option<Vec3>,
    pub method: Option<VatMethod>,
    pub packed: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Default for VatMetadata {
    fn default() -> Self {
        Self {
            num_frames: DEFAULT_NUM_FRAMES,
            fps: DEFAULT_FPS,
            pos_min: Vec3::splat(-1.0),
            pos_max: Vec3::splat(1.0),
            normal_min: None,
            normal_max: None,
            method: None,
            packed: None,
            width: None,
            height: None,
        }
    }
}

/// Partially extracted metadata. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataPatch {
    /// Kept signed so that zero or negative counts reach validation.
    pub num_frames: Option<i64>,
    pub fps: Option<f32>,
    pub pos_min: Option<Vec3>,
    pub pos_max: Option<Vec3>,
    pub normal_min: Option<Vec3>,
    pub normal_max: Option<Vec3>,
    pub method: Option<VatMethod>,
    pub packed: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        *self == MetadataPatch::default()
    }

    pub fn present_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.num_frames.is_some() {
            fields.push("numFrames");
        }
        if self.fps.is_some() {
            fields.push("fps");
        }
        if self.pos_min.is_some() {
            fields.push("posMin");
        }
        if self.pos_max.is_some() {
            fields.push("posMax");
        }
        if self.normal_min.is_some() {
            fields.push("normalMin");
        }
        if self.normal_max.is_some() {
            fields.push("normalMax");
        }
        if self.method.is_some() {
            fields.push("method");
        }
        if self.packed.is_some() {
            fields.push("packed");
        }
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataIssue {
    pub field: &'static str,
    pub reason: String,
}

impl fmt::Display for MetadataIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Outcome of merging a patch into a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied: Vec<&'static str>,
    pub issues: Vec<MetadataIssue>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn summary(&self) -> String {
        let applied =
            if self.applied.is_empty() { "no fields".to_string() } else { self.applied.join(", ") };
        if self.issues.is_empty() {
            format!("applied {applied}")
        } else {
            let issues: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
            format!("applied {applied}; rejected {}", issues.join("; "))
        }
    }

    fn reject(&mut self, field: &'static str, reason: impl Into<String>) {
        self.issues.push(MetadataIssue { field, reason: reason.into() });
    }
}

impl VatMetadata {
    pub fn from_patch(patch: &MetadataPatch) -> (Self, ApplyReport) {
        VatMetadata::default().merged(patch)
    }

    /// Animation loop length in seconds.
    pub fn duration(&self) -> f32 {
        self.num_frames as f32 / self.fps
    }

    /// Builds a new record from `self` with every present, valid field of
    /// `patch` applied. Fields absent from the patch keep their prior value.
    pub fn merged(&self, patch: &MetadataPatch) -> (Self, ApplyReport) {
        let mut next = self.clone();
        let mut report = ApplyReport::default();

        if let Some(frames) = patch.num_frames {
            if frames <= 0 {
                next.num_frames = DEFAULT_NUM_FRAMES;
                report.reject("numFrames", format!("{frames} is not positive; using {DEFAULT_NUM_FRAMES}"));
            } else {
                match u32::try_from(frames) {
                    Ok(frames) => {
                        next.num_frames = frames;
                        report.applied.push("numFrames");
                    }
                    Err(_) => report.reject("numFrames", format!("{frames} frames is out of range")),
                }
            }
        }

        if let Some(fps) = patch.fps {
            if fps.is_finite() && fps > 0.0 {
                next.fps = fps;
                report.applied.push("fps");
            } else {
                report.reject("fps", format!("{fps} is not a positive frame rate"));
            }
        }

        if patch.pos_min.is_some() || patch.pos_max.is_some() {
            let min = patch.pos_min.unwrap_or(self.pos_min);
            let max = patch.pos_max.unwrap_or(self.pos_max);
            if !min.is_finite() || !max.is_finite() {
                report.reject("posMin/posMax", "bounds must be finite");
            } else if max.cmplt(min).any() {
                report.reject("posMin/posMax", format!("max {max} is below min {min} on some axis"));
            } else {
                next.pos_min = min;
                next.pos_max = max;
                if patch.pos_min.is_some() {
                    report.applied.push("posMin");
                }
                if patch.pos_max.is_some() {
                    report.applied.push("posMax");
                }
            }
        }

        if let Some(value) = patch.normal_min {
            next.normal_min = Some(value);
            report.applied.push("normalMin");
        }
        if let Some(value) = patch.normal_max {
            next.normal_max = Some(value);
            report.applied.push("normalMax");
        }
        if let Some(method) = patch.method {
            next.method = Some(method);
            report.applied.push("method");
        }
        if let Some(packed) = patch.packed {
            next.packed = Some(packed);
            report.applied.push("packed");
        }
        if let Some(width) = patch.width {
            next.width = Some(width);
            report.applied.push("width");
        }
        if let Some(height) = patch.height {
            next.height = Some(height);
            report.applied.push("height");
        }

        (next, report)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataFormat {
    /// Flat JSON object with `numFrames`, `posMin`, ...
    Generic,
    /// Line-oriented `- _boundMinX: 0.5` material dump.
    MaterialDump,
}

pub fn detect_format(text: &str) -> MetadataFormat {
    let has_document_marker = text.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("---") || trimmed.starts_with("%YAML")
    });
    if has_document_marker || material_field_name_pattern().is_match(text) {
        MetadataFormat::MaterialDump
    } else {
        MetadataFormat::Generic
    }
}

/// Parses either metadata format. Only a malformed generic document is an
/// error; missing or malformed individual fields are left out of the patch.
pub fn parse_metadata(text: &str) -> VatResult<MetadataPatch> {
    match detect_format(text) {
        MetadataFormat::MaterialDump => Ok(parse_material_dump(text)),
        MetadataFormat::Generic => parse_generic(text),
    }
}

pub fn load_metadata_file(path: impl AsRef<Path>) -> VatResult<MetadataPatch> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|err| VatError::load_from(path.display(), err))?;
    parse_metadata(&text).map_err(|err| match err {
        VatError::Parse(msg) => VatError::parse(format!("{}: {msg}", path.display())),
        other => other,
    })
}

// A `_bound*` or `_frameCount` key at the start of a line, optionally as a list item.
fn material_field_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:-\s*)?(?:_bound\w*|_framecount)\s*:").expect("field name pattern is valid")
    })
}

fn material_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let name = r"(_bound(?:min|max)[xyz]|_framecount|_houdinifps)";
        let number = r"([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)";
        Regex::new(&format!(r"(?i)-\s*{name}\s*:\s*{number}")).expect("material field pattern is valid")
    })
}

pub fn parse_material_dump(text: &str) -> MetadataPatch {
    // min xyz, max xyz
    let mut bounds: [Option<f32>; 6] = [None; 6];
    let mut frame_count: Option<f64> = None;
    let mut fps: Option<f32> = None;

    for caps in material_field_pattern().captures_iter(text) {
        let name = caps[1].to_ascii_lowercase();
        let Ok(value) = caps[2].parse::<f64>() else {
            continue;
        };
        let slot = match name.as_str() {
            "_boundminx" => Some(0),
            "_boundminy" => Some(1),
            "_boundminz" => Some(2),
            "_boundmaxx" => Some(3),
            "_boundmaxy" => Some(4),
            "_boundmaxz" => Some(5),
            "_framecount" => {
                frame_count.get_or_insert(value);
                None
            }
            "_houdinifps" => {
                fps.get_or_insert(value as f32);
                None
            }
            _ => None,
        };
        if let Some(index) = slot {
            bounds[index].get_or_insert(value as f32);
        }
    }

    let triple = |a: Option<f32>, b: Option<f32>, c: Option<f32>| match (a, b, c) {
        (Some(x), Some(y), Some(z)) => Some(Vec3::new(x, y, z)),
        _ => None,
    };

    MetadataPatch {
        num_frames: frame_count.filter(|v| v.is_finite()).map(|v| v.round() as i64),
        fps,
        pos_min: triple(bounds[0], bounds[1], bounds[2]),
        pos_max: triple(bounds[3], bounds[4], bounds[5]),
        ..MetadataPatch::default()
    }
}

pub fn parse_generic(text: &str) -> VatResult<MetadataPatch> {
    let root: Value = serde_json::from_str(text)
        .map_err(|err| VatError::parse(format!("invalid metadata document: {err}")))?;
    let object =
        root.as_object().ok_or_else(|| VatError::parse("metadata document must be an object"))?;

    let num_frames = object.get("numFrames").and_then(|value| {
        value.as_i64().or_else(|| value.as_f64().filter(|v| v.is_finite()).map(|v| v.round() as i64))
    });
    let fps = object.get("fps").and_then(Value::as_f64).map(|v| v as f32);
    let vec3 = |key: &str| object.get(key).and_then(value_to_vec3);
    let dimension = |key: &str| {
        object.get(key).and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
    };

    Ok(MetadataPatch {
        num_frames,
        fps,
        pos_min: vec3("posMin"),
        pos_max: vec3("posMax"),
        normal_min: vec3("normalMin"),
        normal_max: vec3("normalMax"),
        method: object.get("method").and_then(Value::as_str).and_then(VatMethod::parse),
        packed: object.get("packed").and_then(Value::as_bool),
        width: dimension("width"),
        height: dimension("height"),
    })
}

fn value_to_vec3(value: &Value) -> Option<Vec3> {
    let items = value.as_array()?;
    if items.len() != 3 {
        return None;
    }
    let x = items[0].as_f64()? as f32;
    let y = items[1].as_f64()? as f32;
    let z = items[2].as_f64()? as f32;
    Some(Vec3::new(x, y, z))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DUMP: &str = "%YAML 1.1
--- !u!21 &2100000
Material:
  m_Name: crowd_vat
  m_SavedProperties:
    m_Floats:
    - _boundMaxX: 2.5
    - _boundMaxY: 3.0
    - _BoundMaxZ: 1.5e0
    - _boundMinX: -2.5
    - _boundMinY: 0
    - _boundMinZ: -.5
    - _frameCount: 47.6
    - _houdiniFPS: 24.0
";

    #[test]
    fn detects_material_dump_markers() {
        assert_eq!(detect_format(FULL_DUMP), MetadataFormat::MaterialDump);
        assert_eq!(detect_format("- _frameCount: 3"), MetadataFormat::MaterialDump);
        assert_eq!(detect_format("{\"numFrames\": 3}"), MetadataFormat::Generic);
        assert_eq!(detect_format("_boundMinX: -1.5\n"), MetadataFormat::MaterialDump);
        let generic = r#"{"numFrames": 3, "note": "exported with _boundMin and _frameCount: 3 baked"}"#;
        assert_eq!(detect_format(generic), MetadataFormat::Generic);
        assert_eq!(parse_metadata(generic).expect("generic").num_frames, Some(3));
    }

    #[test]
    fn material_dump_extracts_all_fields() {
        let patch = parse_metadata(FULL_DUMP).expect("dump parses");
        assert_eq!(patch.num_frames, Some(48));
        assert_eq!(patch.fps, Some(24.0));
        assert_eq!(patch.pos_min, Some(Vec3::new(-2.5, 0.0, -0.5)));
        assert_eq!(patch.pos_max, Some(Vec3::new(2.5, 3.0, 1.5)));
    }

    #[test]
    fn first_occurrence_of_a_field_wins() {
        let patch = parse_material_dump("- _frameCount: 10\n- _frameCount: 20\n");
        assert_eq!(patch.num_frames, Some(10));
    }

    #[test]
    fn generic_skips_malformed_fields() {
        let text =
            r#"{"numFrames": 12, "fps": "fast", "posMin": [0, 0], "posMax": [1, 2, 3], "method": "Rigid"}"#;
        let patch = parse_generic(text).expect("generic parses");
        assert_eq!(patch.num_frames, Some(12));
        assert_eq!(patch.fps, None);
        assert_eq!(patch.pos_min, None);
        assert_eq!(patch.pos_max, Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(patch.method, Some(VatMethod::Rigid));
    }

    #[test]
    fn generic_rejects_non_object_documents() {
        assert!(matches!(parse_generic("[1, 2, 3]"), Err(VatError::Parse(_))));
        assert!(matches!(parse_generic("{ not json"), Err(VatError::Parse(_))));
    }

    #[test]
    fn merge_rejects_non_positive_frame_count() {
        let prior = VatMetadata { num_frames: 30, ..VatMetadata::default() };
        let patch = MetadataPatch { num_frames: Some(0), ..MetadataPatch::default() };
        let (next, report) = prior.merged(&patch);
        assert_eq!(next.num_frames, DEFAULT_NUM_FRAMES);
        assert!(!report.is_clean());
        assert_eq!(report.issues[0].field, "numFrames");
    }

    #[test]
    fn merge_rejects_out_of_range_frame_count() {
        let prior = VatMetadata { num_frames: 30, ..VatMetadata::default() };
        let patch = parse_material_dump("- _frameCount: 1e12\n- _houdiniFPS: 24\n");
        assert_eq!(patch.num_frames, Some(1_000_000_000_000));
        let (next, report) = prior.merged(&patch);
        assert_eq!(next.num_frames, 30);
        assert_eq!(next.fps, 24.0);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].field, "numFrames");
    }

    #[test]
    fn merge_keeps_prior_bounds_when_inverted() {
        let prior = VatMetadata::default();
        let patch = MetadataPatch { pos_max: Some(Vec3::new(1.0, -5.0, 1.0)), ..MetadataPatch::default() };
        let (next, report) = prior.merged(&patch);
        assert_eq!(next.pos_max, prior.pos_max);
        assert_eq!(report.issues.len(), 1);
    }

    #[test]
    fn merge_accepts_degenerate_bounds() {
        let patch = MetadataPatch {
            pos_min: Some(Vec3::ONE),
            pos_max: Some(Vec3::ONE),
            ..MetadataPatch::default()
        };
        let (next, report) = VatMetadata::default().merged(&patch);
        assert!(report.is_clean());
        assert_eq!(next.pos_min, next.pos_max);
    }

    #[test]
    fn duration_is_frames_over_fps() {
        let meta = VatMetadata { num_frames: 48, fps: 24.0, ..VatMetadata::default() };
        assert!((meta.duration() - 2.0).abs() < f32::EPSILON);
    }
}
