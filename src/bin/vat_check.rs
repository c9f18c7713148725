use anyhow::{Context, Result};
use clap::Parser;
use glam::{Vec2, Vec3};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use vat_player::decode::{CpuDecoder, DebugMode, DecodeFlags, DecodeParams};
use vat_player::mesh::{VatMesh, VatVertex};
use vat_player::metadata::{load_metadata_file, VatMetadata};
use vat_player::texture::VatTexture;

/// Checks an exported VAT set without a GPU and traces decoded vertices.
#[derive(Parser, Debug)]
#[command(name = "vat_check", version)]
struct Args {
    /// Calibration metadata (JSON or material dump).
    #[arg(long)]
    metadata: PathBuf,

    /// Position texture.
    #[arg(long)]
    texture: PathBuf,

    /// Optional normal texture.
    #[arg(long)]
    normals: Option<PathBuf>,

    /// glTF mesh whose TEXCOORD_1 is checked and traced.
    #[arg(long)]
    mesh: Option<PathBuf>,

    /// Vertex index to trace; repeatable.
    #[arg(long = "vertex")]
    vertices: Vec<usize>,

    /// Playback time (seconds) reported alongside the per-frame table.
    #[arg(long, default_value_t = 0.0)]
    time: f32,

    /// Add decoded values to the rest pose.
    #[arg(long)]
    offset: bool,

    /// Longest per-frame table printed for each traced vertex.
    #[arg(long, default_value_t = 256)]
    max_frames: u32,

    /// Emit a JSON report instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Serialize)]
struct Finding {
    severity: Severity,
    message: String,
}

impl Finding {
    fn error(message: String) -> Self {
        Self { severity: Severity::Error, message }
    }

    fn warning(message: String) -> Self {
        Self { severity: Severity::Warning, message }
    }
}

#[derive(Debug, Serialize)]
struct FrameSample {
    frame: u32,
    texel: [u32; 2],
    position: [f32; 3],
    normal: [f32; 3],
}

#[derive(Debug, Serialize)]
struct VertexTrace {
    vertex: usize,
    coord: [f32; 2],
    frame_at_time: u32,
    position_at_time: [f32; 3],
    frames: Vec<FrameSample>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    num_frames: u32,
    fps: f32,
    duration: f32,
    texture_size: [u32; 2],
    encoding: &'static str,
    flip_v: bool,
    findings: Vec<Finding>,
    traces: Vec<VertexTrace>,
}

impl CheckReport {
    fn errors(&self) -> usize {
        self.findings.iter().filter(|finding| finding.severity == Severity::Error).count()
    }
}

fn main() {
    let args = Args::parse();
    match run(&args) {
        Ok(report) => {
            if report.errors() > 0 {
                process::exit(2);
            }
        }
        Err(err) => {
            eprintln!("vat_check error: {err:?}");
            process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<CheckReport> {
    let patch = load_metadata_file(&args.metadata)?;
    let positions = VatTexture::load(&args.texture)?;
    let normals = args.normals.as_ref().map(VatTexture::load).transpose()?;
    let mesh = args.mesh.as_ref().map(VatMesh::load_gltf).transpose()?;

    let (metadata, apply) = VatMetadata::from_patch(&patch);
    let mut findings: Vec<Finding> = apply
        .issues
        .iter()
        .map(|issue| Finding::error(format!("metadata {issue}")))
        .collect();
    findings.extend(check(&metadata, &positions, normals.as_ref(), mesh.as_ref()));

    let report = build_report(&metadata, &positions, normals.as_ref(), mesh.as_ref(), args, findings);
    if args.json {
        let text = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{text}");
    } else {
        print_report(&report);
    }
    Ok(report)
}

fn check(
    metadata: &VatMetadata,
    positions: &VatTexture,
    normals: Option<&VatTexture>,
    mesh: Option<&VatMesh>,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    if positions.height() % metadata.num_frames != 0 {
        findings.push(Finding::error(format!(
            "texture height {} is not a multiple of numFrames {}",
            positions.height(),
            metadata.num_frames
        )));
    }
    if let Some(width) = metadata.width.filter(|width| *width != positions.width()) {
        findings.push(Finding::error(format!(
            "metadata width {width} does not match texture width {}",
            positions.width()
        )));
    }
    if let Some(height) = metadata.height.filter(|height| *height != positions.height()) {
        findings.push(Finding::error(format!(
            "metadata height {height} does not match texture height {}",
            positions.height()
        )));
    }
    if metadata.pos_max.cmplt(metadata.pos_min).any() {
        findings.push(Finding::error(format!(
            "bounds max {} is below min {}",
            metadata.pos_max, metadata.pos_min
        )));
    }
    if let Some(normals) = normals {
        if normals.size() != positions.size() {
            findings.push(Finding::error(format!(
                "normal texture is {} but position texture is {}",
                normals.size(),
                positions.size()
            )));
        }
    }
    if let Some(mesh) = mesh {
        if !mesh.has_vertex_coords() {
            findings.push(Finding::error(format!(
                "mesh '{}' has no TEXCOORD_1 vertex coordinates",
                mesh.label()
            )));
        } else {
            let outside = mesh.vertices_outside_first_band(metadata.num_frames);
            if !outside.is_empty() {
                findings.push(Finding::warning(format!(
                    "{} vertices have coordinates outside frame band 0 (first: {})",
                    outside.len(),
                    outside[0]
                )));
            }
        }
    }
    if let Some(packed) = metadata.packed.filter(|packed| *packed != positions.encoding().is_packed()) {
        findings.push(Finding::warning(format!(
            "metadata says packed={packed} but the file extension selects {} decoding",
            positions.encoding().label()
        )));
    }
    findings
}

// Without a mesh, vertex N is assumed to own texture column N.
fn lookup_vertex(mesh: Option<&VatMesh>, index: usize, positions: &VatTexture) -> Option<VatVertex> {
    match mesh {
        Some(mesh) => mesh.vertices().get(index).copied(),
        None => {
            let size = positions.size().as_vec2();
            if index as f32 >= size.x {
                return None;
            }
            let coord = Vec2::new((index as f32 + 0.5) / size.x, 0.5 / size.y);
            Some(VatVertex::new(Vec3::ZERO, Vec3::Y, Vec2::ZERO, coord))
        }
    }
}

fn build_report(
    metadata: &VatMetadata,
    positions: &VatTexture,
    normals: Option<&VatTexture>,
    mesh: Option<&VatMesh>,
    args: &Args,
    mut findings: Vec<Finding>,
) -> CheckReport {
    let encoding = positions.encoding();
    let mut flags = DecodeFlags::empty();
    flags.set(DecodeFlags::PACKED, encoding.is_packed());
    flags.set(DecodeFlags::FLIP_V, encoding.default_flip_v());
    flags.set(DecodeFlags::USE_OFFSET, args.offset);
    flags.set(DecodeFlags::USE_NORMAL_TEXTURE, normals.is_some());
    let params = DecodeParams::from_metadata(metadata, positions.size(), flags, DebugMode::Shaded);
    let decoder = CpuDecoder::new(&params, positions, normals);

    let listed_frames = params.num_frames.min(args.max_frames);
    if listed_frames < params.num_frames {
        findings.push(Finding::warning(format!(
            "listing the first {listed_frames} of {} frames; raise --max-frames for more",
            params.num_frames
        )));
    }

    let requested = if args.vertices.is_empty() { vec![0] } else { args.vertices.clone() };
    let mut traces = Vec::new();
    for index in requested {
        let Some(vertex) = lookup_vertex(mesh, index, positions) else {
            findings.push(Finding::warning(format!("vertex {index} does not exist")));
            continue;
        };
        let at_time = decoder.decode(&vertex, args.time, 0.0);
        let frames = (0..listed_frames)
            .map(|frame| {
                let decoded = decoder.decode_frame(&vertex, frame);
                FrameSample {
                    frame,
                    texel: decoded.texel.to_array(),
                    position: decoded.position.to_array(),
                    normal: decoded.normal.to_array(),
                }
            })
            .collect();
        traces.push(VertexTrace {
            vertex: index,
            coord: vertex.uv2,
            frame_at_time: at_time.frame,
            position_at_time: at_time.position.to_array(),
            frames,
        });
    }

    CheckReport {
        num_frames: params.num_frames,
        fps: params.fps,
        duration: params.duration(),
        texture_size: positions.size().to_array(),
        encoding: encoding.label(),
        flip_v: encoding.default_flip_v(),
        findings,
        traces,
    }
}

fn print_report(report: &CheckReport) {
    println!(
        "{} frames @ {} fps ({:.3}s), texture {}x{}, {} encoding, flipV {}",
        report.num_frames,
        report.fps,
        report.duration,
        report.texture_size[0],
        report.texture_size[1],
        report.encoding,
        report.flip_v
    );
    for finding in &report.findings {
        let tag = match finding.severity {
            Severity::Warning => "WARN",
            Severity::Error => "ERROR",
        };
        println!("{tag} {}", finding.message);
    }
    for trace in &report.traces {
        println!(
            "vertex {} coord ({:.4}, {:.4}): frame {} -> {:?}",
            trace.vertex, trace.coord[0], trace.coord[1], trace.frame_at_time, trace.position_at_time
        );
        for sample in &trace.frames {
            println!(
                "  frame {:>4} texel ({}, {}) position {:?} normal {:?}",
                sample.frame, sample.texel[0], sample.texel[1], sample.position, sample.normal
            );
        }
    }
    if report.findings.is_empty() {
        println!("OK");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(width: u32, height: u32) -> VatTexture {
        let pixels = vec![128; (width * height * 4) as usize];
        VatTexture::from_rgba8("trace.png", width, height, pixels).expect("texture")
    }

    fn args() -> Args {
        Args::try_parse_from(["vat_check", "--metadata", "m.json", "--texture", "t.png"]).expect("args")
    }

    #[test]
    fn height_not_multiple_of_frames_is_an_error() {
        let metadata = VatMetadata { num_frames: 3, ..VatMetadata::default() };
        let findings = check(&metadata, &texture(2, 4), None, None);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn dimension_mismatch_and_packed_disagreement_are_reported() {
        let metadata =
            VatMetadata { num_frames: 2, width: Some(8), packed: Some(false), ..VatMetadata::default() };
        let findings = check(&metadata, &texture(2, 4), None, None);
        let severities: Vec<Severity> = findings.iter().map(|finding| finding.severity).collect();
        assert_eq!(severities, vec![Severity::Error, Severity::Warning]);
    }

    #[test]
    fn mesh_free_trace_walks_every_frame() {
        let metadata = VatMetadata { num_frames: 2, fps: 2.0, ..VatMetadata::default() };
        let report = build_report(&metadata, &texture(2, 4), None, None, &args(), Vec::new());
        assert_eq!(report.errors(), 0);
        assert_eq!(report.traces.len(), 1);
        let trace = &report.traces[0];
        assert_eq!(trace.frames.len(), 2);
        assert_eq!(trace.frames[0].texel, [0, 0]);
        assert_eq!(trace.frames[1].texel, [0, 2]);
    }

    #[test]
    fn frame_table_is_capped() {
        let metadata = VatMetadata { num_frames: 4, ..VatMetadata::default() };
        let mut args = args();
        args.max_frames = 2;
        let report = build_report(&metadata, &texture(1, 4), None, None, &args, Vec::new());
        assert_eq!(report.traces[0].frames.len(), 2);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].severity, Severity::Warning);
        assert_eq!(report.errors(), 0);
    }

    #[test]
    fn out_of_range_vertex_is_a_warning() {
        let metadata = VatMetadata::default();
        let mut args = args();
        args.vertices = vec![10];
        let report = build_report(&metadata, &texture(2, 1), None, None, &args, Vec::new());
        assert!(report.traces.is_empty());
        assert_eq!(report.findings[0].severity, Severity::Warning);
    }
}
