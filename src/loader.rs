//! Off-thread resource loading.
//!
//! Requests are executed on a single background worker and their results are
//! collected with [`AssetLoader::drain`] at the start of each render tick. The
//! loader never touches playback state; each completion carries the ticket the
//! controller issued so stale results can be told apart from current ones.

use crate::controller::{LoadSlot, LoadTicket};
use crate::error::{VatError, VatResult};
use crate::mesh::VatMesh;
use crate::metadata::{load_metadata_file, MetadataPatch};
use crate::texture::VatTexture;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const MESH_EXTENSIONS: &[&str] = &["gltf", "glb"];
const METADATA_EXTENSIONS: &[&str] = &["json", "mat", "yaml", "yml", "asset", "txt"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "exr", "hdr", "jpg", "jpeg", "tga", "bmp", "tif", "tiff", "webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub slot: LoadSlot,
    pub path: PathBuf,
}

impl LoadRequest {
    pub fn new(slot: LoadSlot, path: impl Into<PathBuf>) -> Self {
        Self { slot, path: path.into() }
    }

    /// Picks a slot for a file dropped onto the window. Images whose stem
    /// mentions `norm` go to the normal slot.
    pub fn classify(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        let slot = if MESH_EXTENSIONS.contains(&ext.as_str()) {
            LoadSlot::Mesh
        } else if METADATA_EXTENSIONS.contains(&ext.as_str()) {
            LoadSlot::Metadata
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            let stem = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if stem.contains("norm") {
                LoadSlot::NormalTexture
            } else {
                LoadSlot::PositionTexture
            }
        } else {
            return None;
        };
        Some(Self::new(slot, path))
    }
}

#[derive(Debug)]
pub enum LoadedAsset {
    Mesh(VatMesh),
    PositionTexture(VatTexture),
    NormalTexture(VatTexture),
    Metadata(MetadataPatch),
}

impl LoadedAsset {
    pub fn slot(&self) -> LoadSlot {
        match self {
            LoadedAsset::Mesh(_) => LoadSlot::Mesh,
            LoadedAsset::PositionTexture(_) => LoadSlot::PositionTexture,
            LoadedAsset::NormalTexture(_) => LoadSlot::NormalTexture,
            LoadedAsset::Metadata(_) => LoadSlot::Metadata,
        }
    }
}

#[derive(Debug)]
pub struct LoadCompletion {
    pub ticket: LoadTicket,
    pub path: PathBuf,
    pub result: VatResult<LoadedAsset>,
}

struct LoadJob {
    ticket: LoadTicket,
    request: LoadRequest,
}

/// Loads a resource on the calling thread.
pub fn load_blocking(request: &LoadRequest) -> VatResult<LoadedAsset> {
    let path = request.path.as_path();
    match request.slot {
        LoadSlot::Mesh => VatMesh::load_gltf(path).map(LoadedAsset::Mesh),
        LoadSlot::PositionTexture => VatTexture::load(path).map(LoadedAsset::PositionTexture),
        LoadSlot::NormalTexture => VatTexture::load(path).map(LoadedAsset::NormalTexture),
        LoadSlot::Metadata => load_metadata_file(path).map(LoadedAsset::Metadata),
    }
}

fn run_load_job(job: LoadJob) -> LoadCompletion {
    let LoadJob { ticket, request } = job;
    let started = Instant::now();
    let result = load_blocking(&request);
    tracing::debug!(
        slot = request.slot.label(),
        path = %request.path.display(),
        ok = result.is_ok(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "load finished"
    );
    LoadCompletion { ticket, path: request.path, result }
}

pub struct AssetLoader {
    tx: Option<mpsc::Sender<LoadJob>>,
    rx: Option<mpsc::Receiver<LoadCompletion>>,
    // Completions produced inline when no worker is available.
    ready: VecDeque<LoadCompletion>,
    in_flight: usize,
}

impl Default for AssetLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetLoader {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<LoadJob>();
        let (result_tx, result_rx) = mpsc::channel();
        let builder = thread::Builder::new().name("vat-asset-loader".to_string());
        match builder.spawn(move || {
            while let Ok(job) = rx.recv() {
                if result_tx.send(run_load_job(job)).is_err() {
                    break;
                }
            }
        }) {
            Ok(_) => Self { tx: Some(tx), rx: Some(result_rx), ready: VecDeque::new(), in_flight: 0 },
            Err(err) => {
                tracing::warn!(error = %err, "failed to spawn asset loader thread; loading inline");
                Self::inline()
            }
        }
    }

    /// Loader that completes every request synchronously inside `request`.
    pub fn inline() -> Self {
        Self { tx: None, rx: None, ready: VecDeque::new(), in_flight: 0 }
    }

    pub fn request(&mut self, ticket: LoadTicket, request: LoadRequest) {
        debug_assert_eq!(ticket.slot, request.slot, "ticket issued for a different slot");
        let mut job = LoadJob { ticket, request };
        if let Some(tx) = &self.tx {
            match tx.send(job) {
                Ok(()) => {
                    self.in_flight += 1;
                    return;
                }
                Err(err) => job = err.0,
            }
            tracing::warn!("asset loader thread stopped; loading inline");
            self.tx = None;
        }
        self.ready.push_back(run_load_job(job));
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight + self.ready.len()
    }

    pub fn drain(&mut self) -> Vec<LoadCompletion> {
        let mut completions: Vec<LoadCompletion> = self.ready.drain(..).collect();
        if let Some(rx) = &self.rx {
            while let Ok(completion) = rx.try_recv() {
                self.in_flight = self.in_flight.saturating_sub(1);
                completions.push(completion);
            }
        }
        completions
    }

    /// Blocks until every outstanding request has completed or `timeout`
    /// elapses. Used by headless callers that have no render loop.
    pub fn wait(&mut self, timeout: Duration) -> VatResult<Vec<LoadCompletion>> {
        let deadline = Instant::now() + timeout;
        let mut completions: Vec<LoadCompletion> = self.ready.drain(..).collect();
        while self.in_flight > 0 {
            let Some(rx) = &self.rx else {
                break;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(completion) => {
                    self.in_flight -= 1;
                    completions.push(completion);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(VatError::load(format!(
                        "{} load(s) still pending after {timeout:?}",
                        self.in_flight
                    )));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(VatError::load("asset loader thread stopped"));
                }
            }
        }
        Ok(completions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_files_are_classified_by_extension() {
        let slot = |path: &str| LoadRequest::classify(path).map(|request| request.slot);
        assert_eq!(slot("hero.glb"), Some(LoadSlot::Mesh));
        assert_eq!(slot("hero.GLTF"), Some(LoadSlot::Mesh));
        assert_eq!(slot("hero_data.json"), Some(LoadSlot::Metadata));
        assert_eq!(slot("hero.mat"), Some(LoadSlot::Metadata));
        assert_eq!(slot("hero_pos.exr"), Some(LoadSlot::PositionTexture));
        assert_eq!(slot("hero_norm.png"), Some(LoadSlot::NormalTexture));
        assert_eq!(slot("hero_Normals.png"), Some(LoadSlot::NormalTexture));
        assert_eq!(slot("notes.pdf"), None);
        assert_eq!(slot("README"), None);
    }

    #[test]
    fn worker_reports_missing_files_as_load_errors() {
        let mut loader = AssetLoader::new();
        let ticket = LoadTicket { slot: LoadSlot::Metadata, generation: 1 };
        loader.request(ticket, LoadRequest::new(LoadSlot::Metadata, "missing/metadata.json"));
        let completions = loader.wait(Duration::from_secs(10)).expect("load completes");
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].ticket, ticket);
        assert!(matches!(completions[0].result, Err(VatError::Load(_))));
        assert_eq!(loader.in_flight(), 0);
    }

    #[test]
    fn inline_loader_completes_on_request() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meta.json");
        std::fs::write(&path, r#"{"numFrames": 8, "fps": 30}"#).expect("write metadata");

        let mut loader = AssetLoader::inline();
        let ticket = LoadTicket { slot: LoadSlot::Metadata, generation: 3 };
        loader.request(ticket, LoadRequest::new(LoadSlot::Metadata, &path));
        assert_eq!(loader.in_flight(), 1);
        let completions = loader.drain();
        assert_eq!(completions.len(), 1);
        match &completions[0].result {
            Ok(LoadedAsset::Metadata(patch)) => assert_eq!(patch.num_frames, Some(8)),
            other => panic!("unexpected completion {other:?}"),
        }
    }
}
