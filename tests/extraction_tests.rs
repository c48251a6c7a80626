//! Extraction builder: artifact classification against code volumes,
//! synthetic Dockerfile assembly, and the staleness short-circuits.

mod common;

use chrono::{Duration, Utc};
use common::{orchestrator, FakeEngine, FakeStore};
use std::io::Read as _;
use tempfile::TempDir;

const EXTRACTIONS: &str = r#"
{
    // a comment
    "CodeVolumes": [
        {
            "Directory": "src",
            "MountedAt": "/han"
        }
    ],
    "Extractions": [
        {
            "Repository": "extractTest",
            "Tag": "test1",
            "RunIn": "someimage",
            "MergeWith": "someotherimage",
            "Artifacts": [
                {"BuiltPath": "/opt/somebuild/product", "DestinationDir": "/place/to/put/it"}
            ]
        },
        {
            "Repository": "extractTest",
            "Tag": "test2",
            "RunIn": "someimage",
            "MergeWith": "someotherimage",
            "Artifacts": [
                {"BuiltPath": "/han/foobie.tgz", "DestinationDir": "/dest/foobie.tgz"}
            ]
        }
    ]
}
"#;

fn extraction_fixture() -> (TempDir, std::sync::Arc<FakeEngine>) {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/foobie.tgz"), b"payload").unwrap();

    let engine = FakeEngine::new();
    engine.add_image("someimage", Utc::now());
    engine.add_image("someotherimage", Utc::now());
    (dir, engine)
}

/// Reads (names, dockerfile text) out of a submitted build context.
fn context_entries(context: &[u8]) -> (Vec<String>, String) {
    let mut archive = tar::Archive::new(context);
    let mut names = Vec::new();
    let mut dockerfile = String::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().to_string();
        if name == "Dockerfile" {
            entry.read_to_string(&mut dockerfile).unwrap();
        }
        names.push(name);
    }
    (names, dockerfile)
}

#[tokio::test]
async fn source_tree_artifact_skips_the_engine_copy() {
    let (dir, engine) = extraction_fixture();
    let store = FakeStore::new();

    let mut core = orchestrator(&dir, EXTRACTIONS, engine.clone(), store, "user")
        .await
        .unwrap();
    core.build_target("extractTest:test2").await.unwrap();

    // The artifact came off the host; no copy-from-container happened.
    assert!(engine.calls_with_prefix("copy").is_empty());

    let state = engine.state.lock().unwrap();
    let (tag, context) = state
        .build_contexts
        .iter()
        .find(|(t, _)| t == "extractTest:test2")
        .expect("no build context submitted");
    assert_eq!(tag, "extractTest:test2");
    let (names, dockerfile) = context_entries(context);
    assert!(names.contains(&"han/foobie.tgz".to_string()));
    assert_eq!(
        dockerfile,
        "FROM someotherimage\nCOPY /han/foobie.tgz /dest/foobie.tgz\n"
    );
}

#[tokio::test]
async fn container_artifact_is_fetched_and_reemitted() {
    let (dir, engine) = extraction_fixture();
    let store = FakeStore::new();

    // The engine serves a one-file tar for the in-container artifact.
    let mut inner = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(4);
    header.set_mode(0o755);
    header.set_mtime(1_700_000_000);
    header.set_entry_type(tar::EntryType::Regular);
    inner
        .append_data(&mut header, "product", b"bits".as_slice())
        .unwrap();
    engine
        .state
        .lock()
        .unwrap()
        .archives
        .insert("/opt/somebuild/product".to_string(), inner.into_inner().unwrap());

    let mut core = orchestrator(&dir, EXTRACTIONS, engine.clone(), store, "user")
        .await
        .unwrap();
    core.build_target("extractTest:test1").await.unwrap();

    assert_eq!(engine.calls_with_prefix("copy").len(), 1);

    // The retrieval container ran /bin/true in the source image and was
    // cleaned up afterwards.
    let specs = engine.run_specs();
    assert_eq!(specs[0].0.image, "someimage");
    assert_eq!(specs[0].1, vec!["/bin/true".to_string()]);
    assert!(!engine.calls_with_prefix("rm").is_empty());

    let state = engine.state.lock().unwrap();
    let (_, context) = state
        .build_contexts
        .iter()
        .find(|(t, _)| t == "extractTest:test1")
        .expect("no build context submitted");
    let (names, dockerfile) = context_entries(context);
    assert!(names.contains(&"product".to_string()));
    assert!(dockerfile.starts_with("FROM someotherimage\n"));
    assert!(dockerfile.contains("COPY product /place/to/put/it/product\n"));
}

#[tokio::test]
async fn destination_under_a_code_volume_is_rejected() {
    let (dir, engine) = extraction_fixture();
    let store = FakeStore::new();

    let config = EXTRACTIONS.replace("/dest/foobie.tgz", "/han/out/foobie.tgz");
    let mut core = orchestrator(&dir, &config, engine.clone(), store, "user")
        .await
        .unwrap();
    let err = core.build_target("extractTest:test2").await.unwrap_err();
    assert!(err
        .to_string()
        .contains("should not be copying things into the source directories"));
    assert!(engine.calls_with_prefix("build").is_empty());
}

#[tokio::test]
async fn fresh_extraction_is_left_alone() {
    let (dir, engine) = extraction_fixture();
    let store = FakeStore::new();

    // Newer than the source artifact written just now.
    engine.add_image("extractTest:test2", Utc::now() + Duration::hours(1));

    let mut core = orchestrator(&dir, EXTRACTIONS, engine.clone(), store, "user")
        .await
        .unwrap();
    core.build_target("extractTest:test2").await.unwrap();
    assert!(engine.calls_with_prefix("build").is_empty());
}

#[tokio::test]
async fn newer_source_artifact_forces_a_rebuild() {
    let (dir, engine) = extraction_fixture();
    let store = FakeStore::new();

    // Older than the source artifact written just now.
    engine.add_image("extractTest:test2", Utc::now() - Duration::hours(1));

    let mut core = orchestrator(&dir, EXTRACTIONS, engine.clone(), store, "user")
        .await
        .unwrap();
    core.build_target("extractTest:test2").await.unwrap();
    assert_eq!(engine.calls_with_prefix("build extractTest:test2").len(), 1);
}

#[cfg(feature = "container-mtime-ood")]
#[tokio::test]
async fn engine_reported_artifact_mtime_can_force_a_rebuild() {
    let (dir, engine) = extraction_fixture();
    let store = FakeStore::new();

    // Tag exists and is newer than everything on the host, but the
    // artifact inside the image is newer still.
    let tag_time = Utc::now() + chrono::Duration::hours(1);
    engine.add_image("extractTest:test1", tag_time);

    let inside = std::time::SystemTime::from(tag_time + chrono::Duration::hours(1))
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let mut inner = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(4);
    header.set_mode(0o755);
    header.set_mtime(inside);
    header.set_entry_type(tar::EntryType::Regular);
    inner
        .append_data(&mut header, "product", b"bits".as_slice())
        .unwrap();
    engine
        .state
        .lock()
        .unwrap()
        .archives
        .insert("/opt/somebuild/product".to_string(), inner.into_inner().unwrap());

    let mut core = orchestrator(&dir, EXTRACTIONS, engine.clone(), store, "user")
        .await
        .unwrap();
    core.build_target("extractTest:test1").await.unwrap();
    assert_eq!(engine.calls_with_prefix("build extractTest:test1").len(), 1);
}
