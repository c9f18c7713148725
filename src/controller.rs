//! Playback orchestration.
//!
//! [`PlaybackController`] owns every piece of VAT state: the loaded mesh and
//! textures, the calibration record, mode switches, instancing parameters and
//! the playback clock. Mutations only touch the staged side. [`PlaybackController::tick`]
//! publishes a fresh [`RenderState`] as one record before the clock advances,
//! so the renderer never observes new bounds with an old frame count.

use crate::decode::{DebugMode, DecodeFlags, DecodeParams};
use crate::error::{VatError, VatResult};
use crate::instancing::{InstanceLayout, MAX_INSTANCE_COUNT, MIN_INSTANCE_COUNT};
use crate::loader::{LoadCompletion, LoadedAsset};
use crate::material::SourceMaterial;
use crate::mesh::VatMesh;
use crate::metadata::{parse_metadata, ApplyReport, MetadataPatch, VatMetadata};
use crate::texture::{TextureEncoding, VatTexture};
use crate::time::PlaybackClock;
use glam::{UVec2, Vec3};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSlot {
    Mesh,
    PositionTexture,
    NormalTexture,
    Metadata,
}

impl LoadSlot {
    pub const ALL: [LoadSlot; 4] =
        [LoadSlot::Mesh, LoadSlot::PositionTexture, LoadSlot::NormalTexture, LoadSlot::Metadata];

    fn index(self) -> usize {
        match self {
            LoadSlot::Mesh => 0,
            LoadSlot::PositionTexture => 1,
            LoadSlot::NormalTexture => 2,
            LoadSlot::Metadata => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LoadSlot::Mesh => "mesh",
            LoadSlot::PositionTexture => "position texture",
            LoadSlot::NormalTexture => "normal texture",
            LoadSlot::Metadata => "metadata",
        }
    }
}

/// Identifies one load request. Only the newest ticket of a slot may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    pub slot: LoadSlot,
    pub generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LoadGenerations {
    latest: [u64; LoadSlot::ALL.len()],
}

impl LoadGenerations {
    pub fn issue(&mut self, slot: LoadSlot) -> LoadTicket {
        let latest = &mut self.latest[slot.index()];
        *latest += 1;
        LoadTicket { slot, generation: *latest }
    }

    pub fn latest(&self, slot: LoadSlot) -> u64 {
        self.latest[slot.index()]
    }

    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        self.latest(ticket.slot) == ticket.generation
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Applied,
    /// A newer request for the same slot was issued; the result was dropped.
    Stale,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    /// `None` follows the position texture's extension.
    pub flip_v: Option<bool>,
    pub use_offset: bool,
    pub use_normal_texture: bool,
    pub debug_mode: DebugMode,
    /// `None` follows the position texture's extension.
    pub encoding_override: Option<TextureEncoding>,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            flip_v: None,
            use_offset: false,
            use_normal_texture: true,
            debug_mode: DebugMode::Shaded,
            encoding_override: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstancingSettings {
    pub enabled: bool,
    pub count: u32,
    pub spacing: f32,
}

impl Default for InstancingSettings {
    fn default() -> Self {
        Self { enabled: false, count: 100, spacing: 3.0 }
    }
}

/// Everything the renderer reads for one frame. Replaced wholesale on publish.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub active: bool,
    pub params: DecodeParams,
    pub instances: Arc<InstanceLayout>,
    pub mesh: Option<Arc<VatMesh>>,
    pub positions: Option<Arc<VatTexture>>,
    pub normals: Option<Arc<VatTexture>>,
    pub material: SourceMaterial,
    pub revision: u64,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            active: false,
            params: DecodeParams::default(),
            instances: Arc::new(InstanceLayout::single()),
            mesh: None,
            positions: None,
            normals: None,
            material: SourceMaterial::default(),
            revision: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameInputs {
    pub state: Arc<RenderState>,
    /// Playback time already wrapped into one loop.
    pub time: f32,
    pub playing: bool,
}

// Key deciding whether the instance layout must be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LayoutKey {
    enabled: bool,
    count: u32,
    spacing: f32,
    duration: f32,
}

pub struct PlaybackController {
    generations: LoadGenerations,
    clock: PlaybackClock,
    metadata: VatMetadata,
    modes: ModeSettings,
    instancing: InstancingSettings,
    mesh: Option<Arc<VatMesh>>,
    positions: Option<Arc<VatTexture>>,
    normals: Option<Arc<VatTexture>>,
    active: bool,
    material: SourceMaterial,
    layout: Arc<InstanceLayout>,
    layout_key: Option<LayoutKey>,
    staged_revision: u64,
    published: Arc<RenderState>,
    status: String,
    // Largest 2D texture side the GPU device accepts, once known.
    max_texture_dimension: Option<u32>,
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(ModeSettings::default(), InstancingSettings::default(), PlaybackClock::default())
    }
}

impl PlaybackController {
    pub fn new(modes: ModeSettings, instancing: InstancingSettings, clock: PlaybackClock) -> Self {
        Self {
            generations: LoadGenerations::default(),
            clock,
            metadata: VatMetadata::default(),
            modes,
            instancing,
            mesh: None,
            positions: None,
            normals: None,
            active: false,
            material: SourceMaterial::default(),
            layout: Arc::new(InstanceLayout::single()),
            layout_key: None,
            staged_revision: 1,
            published: Arc::new(RenderState::default()),
            status: "Load a mesh, a position texture and metadata to begin".to_string(),
            max_texture_dimension: None,
        }
    }

    // ---- loading -------------------------------------------------------

    pub fn begin_load(&mut self, slot: LoadSlot) -> LoadTicket {
        let ticket = self.generations.issue(slot);
        tracing::debug!(slot = slot.label(), generation = ticket.generation, "load requested");
        ticket
    }

    pub fn generations(&self) -> &LoadGenerations {
        &self.generations
    }

    pub fn finish_load(&mut self, completion: LoadCompletion) -> LoadOutcome {
        let LoadCompletion { ticket, path, result } = completion;
        if !self.generations.is_current(ticket) {
            tracing::debug!(
                slot = ticket.slot.label(),
                generation = ticket.generation,
                latest = self.generations.latest(ticket.slot),
                path = %path.display(),
                "discarding stale load"
            );
            return LoadOutcome::Stale;
        }
        let asset = match result {
            Ok(asset) => asset,
            Err(err) => {
                self.report_error(&err);
                return LoadOutcome::Failed(err.status_message());
            }
        };
        if asset.slot() != ticket.slot {
            let err = VatError::load(format!(
                "{} load returned a {}",
                ticket.slot.label(),
                asset.slot().label()
            ));
            self.report_error(&err);
            return LoadOutcome::Failed(err.status_message());
        }

        let name = path.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default();
        match asset {
            LoadedAsset::Mesh(mesh) => self.set_mesh(mesh),
            LoadedAsset::PositionTexture(texture) => {
                if let Err(err) = self.set_position_texture(texture) {
                    return LoadOutcome::Failed(err.status_message());
                }
            }
            LoadedAsset::NormalTexture(texture) => {
                if let Err(err) = self.set_normal_texture(texture) {
                    return LoadOutcome::Failed(err.status_message());
                }
            }
            LoadedAsset::Metadata(patch) => {
                let report = self.apply_metadata_patch(&patch);
                self.set_status(format!("Metadata {name}: {}", report.summary()));
            }
        }
        LoadOutcome::Applied
    }

    pub fn set_mesh(&mut self, mesh: VatMesh) {
        let summary = format!(
            "Mesh {} ({} vertices{})",
            mesh.label(),
            mesh.vertices().len(),
            if mesh.has_vertex_coords() { "" } else { ", no TEXCOORD_1" }
        );
        self.mesh = Some(Arc::new(mesh));
        self.set_status(format!("Loaded {summary}"));
        self.resources_changed();
    }

    /// Rejects a texture the GPU cannot hold; the previous texture stays bound.
    pub fn set_position_texture(&mut self, texture: VatTexture) -> VatResult<()> {
        if let Err(err) = self.check_texture_fits("position texture", &texture) {
            self.report_error(&err);
            return Err(err);
        }
        let summary = format!(
            "Loaded position texture {} ({}x{}, {})",
            texture.label(),
            texture.width(),
            texture.height(),
            texture.encoding().label()
        );
        self.positions = Some(Arc::new(texture));
        self.check_calibration_against_texture();
        self.set_status(summary);
        self.resources_changed();
        Ok(())
    }

    pub fn set_normal_texture(&mut self, texture: VatTexture) -> VatResult<()> {
        if let Err(err) = self.check_texture_fits("normal texture", &texture) {
            self.report_error(&err);
            return Err(err);
        }
        let summary =
            format!("Loaded normal texture {} ({}x{})", texture.label(), texture.width(), texture.height());
        self.normals = Some(Arc::new(texture));
        self.set_status(summary);
        self.mark_dirty();
        Ok(())
    }

    pub fn max_texture_dimension(&self) -> Option<u32> {
        self.max_texture_dimension
    }

    /// Records the device limit and unbinds textures already staged above it.
    pub fn set_max_texture_dimension(&mut self, max: u32) {
        self.max_texture_dimension = Some(max);
        let material = self.material.limited_to(Some(max));
        if material != self.material {
            self.material = material;
            self.mark_dirty();
        }
        if let Some(normals) = self.normals.clone() {
            if let Err(err) = self.check_texture_fits("normal texture", &normals) {
                self.normals = None;
                self.report_error(&err);
                self.mark_dirty();
            }
        }
        if let Some(positions) = self.positions.clone() {
            if let Err(err) = self.check_texture_fits("position texture", &positions) {
                self.positions = None;
                self.report_error(&err);
                self.resources_changed();
            }
        }
    }

    fn check_texture_fits(&self, what: &str, texture: &VatTexture) -> VatResult<()> {
        match self.max_texture_dimension {
            Some(max) if texture.width() > max || texture.height() > max => Err(VatError::validation(format!(
                "{what} {} is {}x{}, above the GPU limit of {max} texels per side",
                texture.label(),
                texture.width(),
                texture.height()
            ))),
            _ => Ok(()),
        }
    }

    pub fn clear_normal_texture(&mut self) {
        // Any in-flight normal load would otherwise resurrect the cleared slot.
        self.generations.issue(LoadSlot::NormalTexture);
        if self.normals.take().is_some() {
            self.set_status("Normal texture cleared");
            self.mark_dirty();
        }
    }

    // Re-validates an active session after its mesh or position texture changed.
    fn resources_changed(&mut self) {
        if self.active {
            if let Err(err) = self.check_activation() {
                self.active = false;
                self.report_error(&err);
                tracing::warn!("VAT playback deactivated");
            } else if let Some(mesh) = &self.mesh {
                self.material = mesh.material().limited_to(self.max_texture_dimension);
            }
            self.mark_dirty();
        } else {
            self.auto_activate();
        }
    }

    // ---- metadata ------------------------------------------------------

    pub fn metadata(&self) -> &VatMetadata {
        &self.metadata
    }

    /// Applies each present field onto the current record. Rejected fields
    /// keep their prior value and are listed in the report.
    pub fn apply_metadata_patch(&mut self, patch: &MetadataPatch) -> ApplyReport {
        let (next, report) = self.metadata.merged(patch);
        for issue in &report.issues {
            tracing::warn!(field = issue.field, reason = %issue.reason, "metadata field rejected");
        }
        tracing::info!(applied = ?report.applied, "metadata applied");
        if next != self.metadata {
            self.metadata = next;
            self.check_calibration_against_texture();
            self.mark_dirty();
        }
        report
    }

    /// Parses `text` in either metadata format and applies it. A malformed
    /// document changes nothing.
    pub fn apply_metadata_text(&mut self, text: &str) -> VatResult<ApplyReport> {
        match parse_metadata(text) {
            Ok(patch) => {
                let report = self.apply_metadata_patch(&patch);
                self.set_status(format!("Metadata: {}", report.summary()));
                Ok(report)
            }
            Err(err) => {
                self.report_error(&err);
                Err(err)
            }
        }
    }

    pub fn set_num_frames(&mut self, num_frames: i64) -> ApplyReport {
        self.apply_metadata_patch(&MetadataPatch { num_frames: Some(num_frames), ..MetadataPatch::default() })
    }

    pub fn set_fps(&mut self, fps: f32) -> ApplyReport {
        self.apply_metadata_patch(&MetadataPatch { fps: Some(fps), ..MetadataPatch::default() })
    }

    pub fn set_bounds(&mut self, pos_min: Vec3, pos_max: Vec3) -> ApplyReport {
        self.apply_metadata_patch(&MetadataPatch {
            pos_min: Some(pos_min),
            pos_max: Some(pos_max),
            ..MetadataPatch::default()
        })
    }

    fn check_calibration_against_texture(&self) {
        let Some(texture) = &self.positions else {
            return;
        };
        if texture.height() % self.metadata.num_frames != 0 {
            tracing::warn!(
                height = texture.height(),
                num_frames = self.metadata.num_frames,
                "texture height is not a multiple of the frame count"
            );
        }
        if let Some(packed) = self.metadata.packed {
            if packed != texture.encoding().is_packed() {
                tracing::warn!(
                    metadata_packed = packed,
                    extension = texture.encoding().label(),
                    "metadata disagrees with the texture extension; press P to override the encoding"
                );
            }
        }
    }

    // ---- activation ----------------------------------------------------

    fn check_activation(&self) -> VatResult<()> {
        let mesh = self
            .mesh
            .as_ref()
            .ok_or_else(|| VatError::validation("load a mesh before starting VAT playback"))?;
        if self.positions.is_none() {
            return Err(VatError::validation("load a position texture before starting VAT playback"));
        }
        if !mesh.has_vertex_coords() {
            return Err(VatError::validation(format!(
                "mesh '{}' has no second UV channel (TEXCOORD_1) with baked vertex coordinates",
                mesh.label()
            )));
        }
        Ok(())
    }

    /// Starts VAT playback. On failure nothing changes and the status line
    /// explains what is missing.
    pub fn activate(&mut self) -> VatResult<()> {
        if let Err(err) = self.check_activation() {
            self.report_error(&err);
            return Err(err);
        }
        if let Some(mesh) = &self.mesh {
            self.material = mesh.material().limited_to(self.max_texture_dimension);
        }
        self.active = true;
        self.mark_dirty();
        self.set_status(format!(
            "VAT playback active: {} frames @ {} fps, {} encoding",
            self.metadata.num_frames,
            self.metadata.fps,
            self.effective_encoding().label()
        ));
        Ok(())
    }

    /// Activates once both the mesh and the position texture are present.
    pub fn auto_activate(&mut self) -> bool {
        if self.active || self.mesh.is_none() || self.positions.is_none() {
            return self.active;
        }
        self.activate().is_ok()
    }

    pub fn deactivate(&mut self) {
        if self.active {
            self.active = false;
            self.mark_dirty();
            self.set_status("VAT playback stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    // ---- modes ---------------------------------------------------------

    pub fn modes(&self) -> &ModeSettings {
        &self.modes
    }

    pub fn effective_encoding(&self) -> TextureEncoding {
        self.modes
            .encoding_override
            .or_else(|| self.positions.as_ref().map(|texture| texture.encoding()))
            .unwrap_or(TextureEncoding::Packed)
    }

    pub fn effective_flip_v(&self) -> bool {
        self.modes.flip_v.unwrap_or_else(|| {
            self.positions.as_ref().map(|texture| texture.encoding().default_flip_v()).unwrap_or(false)
        })
    }

    pub fn set_flip_v(&mut self, flip_v: Option<bool>) {
        self.modes.flip_v = flip_v;
        self.mark_dirty();
        self.set_status(format!("Flip V: {}", on_off(self.effective_flip_v())));
    }

    pub fn toggle_flip_v(&mut self) {
        let next = !self.effective_flip_v();
        self.set_flip_v(Some(next));
    }

    pub fn set_use_offset(&mut self, use_offset: bool) {
        self.modes.use_offset = use_offset;
        self.mark_dirty();
        self.set_status(if use_offset { "Offset mode: rest + decoded" } else { "Offset mode: absolute" });
    }

    pub fn toggle_use_offset(&mut self) {
        self.set_use_offset(!self.modes.use_offset);
    }

    pub fn set_use_normal_texture(&mut self, enabled: bool) {
        self.modes.use_normal_texture = enabled;
        self.mark_dirty();
        let note = if enabled && self.normals.is_none() { " (no normal texture loaded)" } else { "" };
        self.set_status(format!("Normal texture: {}{note}", on_off(enabled)));
    }

    pub fn toggle_normal_texture(&mut self) {
        self.set_use_normal_texture(!self.modes.use_normal_texture);
    }

    pub fn set_debug_mode(&mut self, mode: DebugMode) {
        self.modes.debug_mode = mode;
        self.mark_dirty();
        self.set_status(format!("Debug view: {}", mode.label()));
    }

    pub fn cycle_debug_mode(&mut self) {
        self.set_debug_mode(self.modes.debug_mode.next());
    }

    pub fn set_encoding_override(&mut self, encoding: Option<TextureEncoding>) {
        self.modes.encoding_override = encoding;
        self.mark_dirty();
        let source = if encoding.is_some() { "override" } else { "from extension" };
        self.set_status(format!("Encoding: {} ({source})", self.effective_encoding().label()));
    }

    pub fn cycle_encoding_override(&mut self) {
        self.set_encoding_override(TextureEncoding::cycle_override(self.modes.encoding_override));
    }

    // ---- instancing ----------------------------------------------------

    pub fn instancing(&self) -> &InstancingSettings {
        &self.instancing
    }

    pub fn set_instancing_enabled(&mut self, enabled: bool) {
        self.instancing.enabled = enabled;
        self.mark_dirty();
        self.set_status(format!("Instancing: {}", on_off(enabled)));
    }

    pub fn toggle_instancing(&mut self) {
        self.set_instancing_enabled(!self.instancing.enabled);
    }

    /// Count is clamped when the layout is built.
    pub fn set_instance_count(&mut self, count: u32) {
        self.instancing.count = count;
        self.mark_dirty();
        let instances = count.clamp(MIN_INSTANCE_COUNT, MAX_INSTANCE_COUNT);
        self.set_status(format!("Instances: {instances}"));
    }

    pub fn set_instance_spacing(&mut self, spacing: f32) {
        self.instancing.spacing = spacing;
        self.mark_dirty();
        self.set_status(format!("Instance spacing: {spacing}"));
    }

    fn layout_key(&self) -> LayoutKey {
        LayoutKey {
            enabled: self.instancing.enabled,
            count: self.instancing.count,
            spacing: self.instancing.spacing,
            duration: self.metadata.duration(),
        }
    }

    fn staged_layout(&mut self) -> Arc<InstanceLayout> {
        let key = self.layout_key();
        if self.layout_key != Some(key) {
            let layout = if key.enabled {
                InstanceLayout::build(key.count, key.spacing, key.duration)
            } else {
                InstanceLayout::single()
            };
            tracing::debug!(instances = layout.len(), grid = layout.grid_size(), "instance layout rebuilt");
            self.layout = Arc::new(layout);
            self.layout_key = Some(key);
        }
        Arc::clone(&self.layout)
    }

    // ---- transport -----------------------------------------------------

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn play(&mut self) {
        self.clock.play();
        self.set_status("Playing");
    }

    pub fn pause(&mut self) {
        self.clock.pause();
        self.set_status("Paused");
    }

    pub fn toggle_playback(&mut self) {
        if self.clock.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn reset(&mut self) {
        self.clock.reset();
        self.set_status("Time reset");
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.clock.set_speed(speed);
        self.set_status(format!("Speed: {:.2}x", self.clock.speed()));
    }

    // ---- publication ---------------------------------------------------

    fn mark_dirty(&mut self) {
        self.staged_revision += 1;
    }

    /// Decode parameters as they will be published on the next tick.
    pub fn staged_params(&self) -> DecodeParams {
        let mut flags = DecodeFlags::empty();
        flags.set(DecodeFlags::PACKED, self.effective_encoding().is_packed());
        flags.set(DecodeFlags::FLIP_V, self.effective_flip_v());
        flags.set(DecodeFlags::USE_OFFSET, self.modes.use_offset);
        flags.set(DecodeFlags::USE_NORMAL_TEXTURE, self.modes.use_normal_texture && self.normals.is_some());
        let size = self.positions.as_ref().map(|texture| texture.size()).unwrap_or(UVec2::ONE);
        DecodeParams::from_metadata(&self.metadata, size, flags, self.modes.debug_mode)
    }

    pub fn published(&self) -> &Arc<RenderState> {
        &self.published
    }

    fn publish(&mut self) {
        if self.published.revision == self.staged_revision {
            return;
        }
        let state = RenderState {
            active: self.active,
            params: self.staged_params(),
            instances: self.staged_layout(),
            mesh: self.mesh.clone(),
            positions: self.positions.clone(),
            normals: self.normals.clone(),
            material: self.material.clone(),
            revision: self.staged_revision,
        };
        self.published = Arc::new(state);
    }

    /// Publishes staged state, then advances the clock by `elapsed_seconds`.
    pub fn tick(&mut self, elapsed_seconds: f32) -> FrameInputs {
        self.publish();
        self.clock.advance(elapsed_seconds);
        let duration = self.published.params.duration();
        FrameInputs {
            state: Arc::clone(&self.published),
            time: self.clock.wrapped_time(duration),
            playing: self.clock.is_playing(),
        }
    }

    // ---- status --------------------------------------------------------

    pub fn status(&self) -> &str {
        &self.status
    }

    fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        tracing::info!("{}", self.status);
    }

    pub fn report_error(&mut self, err: &VatError) {
        self.status = err.status_message();
        tracing::warn!(kind = err.kind_label(), "{err}");
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
