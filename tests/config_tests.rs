//! Configuration wiring: name resolution, duplicate detection, bare-tag
//! acceptance, and the structural invariants enforced at load time.

mod common;

use chrono::Utc;
use common::{dockerfile_dir, orchestrator, FakeEngine, FakeStore};
use tempfile::TempDir;

async fn wire(config: &str, engine: std::sync::Arc<FakeEngine>) -> pickett::Result<pickett::Orchestrator> {
    let dir = TempDir::new().unwrap();
    dockerfile_dir(&dir, "mydir");
    orchestrator(&dir, config, engine, FakeStore::new(), "user").await
}

#[tokio::test]
async fn duplicate_node_names_are_rejected() {
    let engine = FakeEngine::new();
    let err = wire(
        r#"
        {
            "Containers": [
                {"Repository": "blah", "Tag": "bletch", "Directory": "mydir"},
                {"Repository": "blah", "Tag": "bletch", "Directory": "mydir"}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("already in use"));
}

#[tokio::test]
async fn container_dependencies_must_resolve() {
    let engine = FakeEngine::new();
    let err = wire(
        r#"
        {
            "Containers": [
                {"Repository": "blah", "Tag": "bletch", "Directory": "mydir",
                 "DependsOn": ["nowhere:tobe"]}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("nowhere:tobe"));
}

#[tokio::test]
async fn missing_dockerfile_is_a_configuration_error() {
    let engine = FakeEngine::new();
    let err = wire(
        r#"
        {
            "Containers": [
                {"Repository": "blah", "Tag": "bletch", "Directory": "elsewhere"}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Dockerfile"));
}

#[tokio::test]
async fn compile_run_in_must_be_a_buildable_node() {
    let engine = FakeEngine::new();
    // The image exists in the engine, but compiles need a graph node.
    engine.add_image("plain:image", Utc::now());
    let err = wire(
        r#"
        {
            "GoBuilds": [
                {"Repository": "test", "Tag": "nashville",
                 "RunIn": "plain:image", "Packages": ["p1"]}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("plain:image"));
}

#[tokio::test]
async fn extraction_accepts_bare_tags_the_engine_knows() {
    let engine = FakeEngine::new();
    engine.add_image("someimage", Utc::now());
    engine.add_image("someotherimage", Utc::now());
    let core = wire(
        r#"
        {
            "Extractions": [
                {"Repository": "extractTest", "Tag": "test1",
                 "RunIn": "someimage", "MergeWith": "someotherimage",
                 "Artifacts": [{"BuiltPath": "/a", "DestinationDir": "/b"}]}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap();
    let (buildable, _) = core.entry_points();
    assert!(buildable.contains(&"extractTest:test1".to_string()));
}

#[tokio::test]
async fn extraction_rejects_names_nobody_can_produce() {
    let engine = FakeEngine::new();
    engine.add_image("someotherimage", Utc::now());
    let err = wire(
        r#"
        {
            "Extractions": [
                {"Repository": "extractTest", "Tag": "test1",
                 "RunIn": "someimage", "MergeWith": "someotherimage",
                 "Artifacts": [{"BuiltPath": "/a", "DestinationDir": "/b"}]}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("someimage"));
    assert!(err.to_string().contains("pull"));
}

#[tokio::test]
async fn extraction_node_run_in_must_be_a_compile() {
    let engine = FakeEngine::new();
    engine.add_image("someotherimage", Utc::now());
    let err = wire(
        r#"
        {
            "Containers": [
                {"Repository": "blah", "Tag": "bletch", "Directory": "mydir"}
            ],
            "Extractions": [
                {"Repository": "extractTest", "Tag": "test1",
                 "RunIn": "blah:bletch", "MergeWith": "someotherimage",
                 "Artifacts": [{"BuiltPath": "/a", "DestinationDir": "/b"}]}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("compile node"));
}

#[tokio::test]
async fn services_must_consume_siblings_that_exist() {
    let engine = FakeEngine::new();
    engine.add_image("part3-image", Utc::now());
    let err = wire(
        r#"
        {
            "Topologies": {
                "graph": [
                    {"Name": "part3", "RunIn": "part3-image",
                     "EntryPoint": ["/bin/x"], "Consumes": ["part9"]}
                ]
            }
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("part9"));
}

#[tokio::test]
async fn commit_on_exit_input_must_be_consumed() {
    let engine = FakeEngine::new();
    engine.add_image("part1-image", Utc::now());
    engine.add_image("part2-image", Utc::now());
    let err = wire(
        r#"
        {
            "Topologies": {
                "graph": [
                    {"Name": "part1", "RunIn": "part1-image", "EntryPoint": ["/bin/a"]},
                    {"Name": "part2", "RunIn": "part2-image", "EntryPoint": ["/bin/b"],
                     "CommitOnExit": {"part1": "after:part1"}}
                ]
            }
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("not consumed"));
}

#[tokio::test]
async fn commit_on_exit_results_are_buildable_nodes() {
    let engine = FakeEngine::new();
    engine.add_image("part1-image", Utc::now());
    engine.add_image("part2-image", Utc::now());
    let core = wire(
        r#"
        {
            "Topologies": {
                "graph": [
                    {"Name": "part1", "RunIn": "part1-image", "EntryPoint": ["/bin/a"]},
                    {"Name": "part2", "RunIn": "part2-image", "EntryPoint": ["/bin/b"],
                     "Consumes": ["part1"],
                     "CommitOnExit": {"part1": "after:part1"}}
                ]
            }
        }
        "#,
        engine,
    )
    .await
    .unwrap();
    let (buildable, runnable) = core.entry_points();
    assert!(buildable.contains(&"after:part1".to_string()));
    assert_eq!(runnable.len(), 2);
}

#[tokio::test]
async fn consume_cycles_are_rejected() {
    let engine = FakeEngine::new();
    engine.add_image("a-image", Utc::now());
    engine.add_image("b-image", Utc::now());
    let err = wire(
        r#"
        {
            "Topologies": {
                "graph": [
                    {"Name": "a", "RunIn": "a-image", "EntryPoint": ["/bin/a"],
                     "Consumes": ["b"]},
                    {"Name": "b", "RunIn": "b-image", "EntryPoint": ["/bin/b"],
                     "Consumes": ["a"]}
                ]
            }
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[tokio::test]
async fn dependency_cycles_are_rejected() {
    let dir = TempDir::new().unwrap();
    dockerfile_dir(&dir, "adir");
    dockerfile_dir(&dir, "bdir");
    let engine = FakeEngine::new();
    let err = orchestrator(
        &dir,
        r#"
        {
            "Containers": [
                {"Repository": "img", "Tag": "a", "Directory": "adir",
                 "DependsOn": ["img:b"]},
                {"Repository": "img", "Tag": "b", "Directory": "bdir",
                 "DependsOn": ["img:a"]}
            ]
        }
        "#,
        engine,
        FakeStore::new(),
        "user",
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[tokio::test]
async fn empty_and_malformed_names_are_rejected() {
    let engine = FakeEngine::new();
    let err = wire(
        r#"
        {
            "Containers": [
                {"Repository": "blah", "Tag": "  ", "Directory": "mydir"}
            ]
        }
        "#,
        engine,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("required"));
}

#[tokio::test]
async fn compiles_need_at_least_one_package() {
    let dir = TempDir::new().unwrap();
    dockerfile_dir(&dir, "mydir");
    let engine = FakeEngine::new();
    let err = orchestrator(
        &dir,
        r#"
        {
            "Containers": [
                {"Repository": "blah", "Tag": "bletch", "Directory": "mydir"}
            ],
            "GoBuilds": [
                {"Repository": "test", "Tag": "nashville", "RunIn": "blah:bletch",
                 "Packages": []}
            ]
        }
        "#,
        engine,
        FakeStore::new(),
        "user",
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("at least one source package"));
}
