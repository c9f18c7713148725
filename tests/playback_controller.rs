use glam::{Vec2, Vec3};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vat_player::controller::{LoadOutcome, LoadSlot, PlaybackController};
use vat_player::decode::DecodeFlags;
use vat_player::loader::{AssetLoader, LoadCompletion, LoadRequest, LoadedAsset};
use vat_player::mesh::{VatMesh, VatVertex};
use vat_player::texture::VatTexture;

fn mesh(label: &str, with_coords: bool) -> VatMesh {
    let vertices = vec![
        VatVertex::new(Vec3::ZERO, Vec3::Y, Vec2::ZERO, Vec2::new(0.25, 0.0)),
        VatVertex::new(Vec3::X, Vec3::Y, Vec2::ZERO, Vec2::new(0.75, 0.0)),
        VatVertex::new(Vec3::Z, Vec3::Y, Vec2::ZERO, Vec2::new(0.75, 0.0)),
    ];
    VatMesh::from_parts(label, vertices, vec![0, 1, 2], with_coords)
}

fn texture() -> VatTexture {
    VatTexture::from_rgba8("walk_pos.png", 2, 4, vec![200; 2 * 4 * 4]).expect("texture")
}

fn metadata_fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/metadata/houdini_material.mat")
}

#[test]
fn older_load_finishing_last_is_discarded() {
    let mut controller = PlaybackController::default();
    let first = controller.begin_load(LoadSlot::Mesh);
    let second = controller.begin_load(LoadSlot::Mesh);

    let newer = LoadCompletion {
        ticket: second,
        path: PathBuf::from("newer.glb"),
        result: Ok(LoadedAsset::Mesh(mesh("newer", true))),
    };
    let older = LoadCompletion {
        ticket: first,
        path: PathBuf::from("older.glb"),
        result: Ok(LoadedAsset::Mesh(mesh("older", true))),
    };
    assert_eq!(controller.finish_load(newer), LoadOutcome::Applied);
    assert_eq!(controller.finish_load(older), LoadOutcome::Stale);

    let inputs = controller.tick(0.0);
    let published = inputs.state.mesh.as_ref().expect("mesh published");
    assert_eq!(published.label(), "newer");
}

#[test]
fn staged_changes_appear_only_after_tick() {
    let mut controller = PlaybackController::default();
    controller.set_num_frames(8);
    controller.set_fps(4.0);
    assert_eq!(controller.published().params.num_frames, 1);

    let inputs = controller.tick(0.0);
    assert_eq!(inputs.state.params.num_frames, 8);
    assert_eq!(inputs.state.params.fps, 4.0);
}

#[test]
fn mesh_without_vertex_coordinates_never_activates() {
    let mut controller = PlaybackController::default();
    controller.set_mesh(mesh("plain", false));
    controller.set_position_texture(texture()).expect("fits");
    assert!(!controller.is_active());
    assert!(controller.status().contains("TEXCOORD_1"));

    let inputs = controller.tick(0.016);
    assert!(!inputs.state.active);
}

#[test]
fn complete_resources_activate_playback() {
    let mut controller = PlaybackController::default();
    controller.set_position_texture(texture()).expect("fits");
    assert!(!controller.is_active());
    controller.set_mesh(mesh("crowd", true));
    assert!(controller.is_active());

    let inputs = controller.tick(0.0);
    assert!(inputs.state.active);
    assert!(inputs.state.params.flags.contains(DecodeFlags::PACKED));
    assert!(!inputs.state.params.flags.contains(DecodeFlags::FLIP_V));
    assert_eq!(inputs.state.params.texture_size.to_array(), [2, 4]);
}

#[test]
fn same_metadata_twice_gives_identical_parameters() {
    let text = std::fs::read_to_string(metadata_fixture()).expect("read fixture");
    let mut controller = PlaybackController::default();
    controller.apply_metadata_text(&text).expect("apply once");
    let first = controller.tick(0.0).state.params;
    controller.apply_metadata_text(&text).expect("apply twice");
    let second = controller.tick(0.0).state.params;
    assert_eq!(first, second);
    assert_eq!(second.num_frames, 48);
}

#[test]
fn paused_clock_holds_time() {
    let mut controller = PlaybackController::default();
    controller.set_num_frames(4);
    controller.set_fps(2.0);
    let start = controller.tick(0.5).time;
    assert_eq!(start, 0.0);
    controller.play();
    let _ = controller.tick(0.5);
    let inputs = controller.tick(0.0);
    assert!((inputs.time - 0.5).abs() < 1e-6);
    assert!(inputs.playing);
}

#[test]
fn worker_loads_metadata_off_thread() {
    let mut controller = PlaybackController::default();
    let mut loader = AssetLoader::new();
    let ticket = controller.begin_load(LoadSlot::Metadata);
    loader.request(ticket, LoadRequest::new(LoadSlot::Metadata, metadata_fixture()));

    let completions = loader.wait(Duration::from_secs(10)).expect("load finishes");
    assert_eq!(completions.len(), 1);
    for completion in completions {
        assert_eq!(controller.finish_load(completion), LoadOutcome::Applied);
    }
    assert_eq!(controller.metadata().num_frames, 48);
    let state = controller.tick(0.0).state;
    assert_eq!(state.params.num_frames, 48);
    assert!(Arc::ptr_eq(&state, controller.published()));
}
