//! Shared test doubles: an in-memory container engine and coordination
//! store with scripted behaviors and a recorded call log.

// Each test binary compiles its own copy; not all of them use every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use pickett::engine::{
    BuildOptions, ContainerEngine, ContainerFacts, ContainerSummary, ImageFacts, ImageSummary,
    RunOutcome, RunSpec,
};
use pickett::store::CoordStore;
use pickett::{Error, ImageTag, Orchestrator, OrchestratorOptions, Result, Stamp, Workspace};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =============================================================================
// Fake Engine
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeImage {
    pub id: String,
    pub created: Stamp,
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub running: bool,
    pub created: Stamp,
    pub exit: i64,
    pub ip: String,
    pub ports: Vec<u16>,
}

#[derive(Default)]
pub struct EngineState {
    /// Images by tag and by id.
    pub images: BTreeMap<String, FakeImage>,
    /// Images that refuse removal with a conflict.
    pub images_in_use: Vec<String>,
    /// Containers by name.
    pub containers: BTreeMap<String, FakeContainer>,
    /// Scripted output for waited runs, keyed by joined argv.
    pub run_outputs: BTreeMap<String, String>,
    /// Scripted exit codes for waited runs, keyed by joined argv.
    pub run_exits: BTreeMap<String, i64>,
    /// Scripted hard failures, keyed by joined argv.
    pub run_failures: BTreeMap<String, String>,
    /// Tar payloads served by copy-from-container, keyed by path.
    pub archives: BTreeMap<String, Vec<u8>>,
    /// Build contexts received, in order: (tag, tar bytes).
    pub build_contexts: Vec<(String, Vec<u8>)>,
    /// Full run requests, in order: (spec, argv).
    pub run_specs: Vec<(RunSpec, Vec<String>)>,
    /// Flat operation log, e.g. `run blah:bletch go install p1`.
    pub calls: Vec<String>,
    next_id: u64,
}

impl EngineState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_image(&self, tag: &str, created: Stamp) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("img");
        state.images.insert(
            tag.to_string(),
            FakeImage {
                id: id.clone(),
                created,
            },
        );
        state.images.insert(id.clone(), FakeImage { id, created });
    }

    pub fn add_container(&self, name: &str, image: &str, running: bool, created: Stamp) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("cont");
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id,
                name: name.to_string(),
                image: image.to_string(),
                running,
                created,
                exit: 0,
                ip: "172.17.0.9".to_string(),
                ports: vec![],
            },
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn run_specs(&self) -> Vec<(RunSpec, Vec<String>)> {
        self.state.lock().unwrap().run_specs.clone()
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.state.lock().unwrap().images.contains_key(tag)
    }

    fn find_container(state: &EngineState, name_or_id: &str) -> Option<FakeContainer> {
        state.containers.get(name_or_id).cloned().or_else(|| {
            state
                .containers
                .values()
                .find(|c| c.id == name_or_id)
                .cloned()
        })
    }

    fn facts(container: &FakeContainer) -> ContainerFacts {
        ContainerFacts {
            id: container.id.clone(),
            name: container.name.clone(),
            running: container.running,
            created: container.created,
            exit_status: container.exit,
            ip: container.ip.clone(),
            ports: container.ports.clone(),
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn build(
        &self,
        _options: &BuildOptions,
        context: Vec<u8>,
        result_tag: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("build {result_tag}"));
        state.build_contexts.push((result_tag.to_string(), context));
        let id = state.next_id("img");
        let image = FakeImage {
            id: id.clone(),
            created: Utc::now(),
        };
        state.images.insert(result_tag.to_string(), image.clone());
        state.images.insert(id, image);
        Ok(())
    }

    async fn run(&self, spec: &RunSpec, argv: &[String]) -> Result<RunOutcome> {
        let key = argv.join(" ");
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("run {} {}", spec.image, key));
        state.run_specs.push((spec.clone(), argv.to_vec()));

        if let Some(message) = state.run_failures.get(&key).cloned() {
            return Err(Error::EngineApi {
                operation: "run".to_string(),
                status: 500,
                message,
            });
        }
        if !state.images.contains_key(&spec.image) && !spec.image.starts_with("img-") {
            return Err(Error::NoSuchImage(spec.image.clone()));
        }

        let id = state.next_id("cont");
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("fake_{id}"));
        if state.containers.contains_key(&name) {
            return Err(Error::EngineApi {
                operation: "create container".to_string(),
                status: 409,
                message: format!("name {name} already in use"),
            });
        }

        let exit = state.run_exits.get(&key).copied().unwrap_or(0);
        let ports: Vec<u16> = spec.ports.keys().copied().collect();
        let container = FakeContainer {
            id: id.clone(),
            name: name.clone(),
            image: spec.image.clone(),
            running: !spec.wait,
            created: Utc::now(),
            exit,
            ip: "172.17.0.9".to_string(),
            ports,
        };
        state.containers.insert(name, container);

        let output = if spec.wait && !spec.attach {
            Some(state.run_outputs.get(&key).cloned().unwrap_or_default())
        } else {
            None
        };
        Ok(RunOutcome {
            container_id: id,
            exit_status: spec.wait.then_some(exit),
            output,
        })
    }

    async fn commit(&self, container: &str, tag: Option<&ImageTag>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(match tag {
            Some(t) => format!("commit {container} {t}"),
            None => format!("commit {container}"),
        });
        if FakeEngine::find_container(&state, container).is_none() {
            return Err(Error::NoSuchContainer(container.to_string()));
        }
        let id = state.next_id("img");
        let image = FakeImage {
            id: id.clone(),
            created: Utc::now(),
        };
        state.images.insert(id.clone(), image.clone());
        if let Some(tag) = tag {
            state.images.insert(tag.to_string(), image);
        }
        Ok(id)
    }

    async fn tag_image(&self, image_id: &str, _force: bool, tag: &ImageTag) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("tag {image_id} {tag}"));
        let Some(image) = state.images.get(image_id).cloned() else {
            return Err(Error::NoSuchImage(image_id.to_string()));
        };
        state.images.insert(tag.to_string(), image);
        Ok(())
    }

    async fn stop(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop {container}"));
        let Some(found) = FakeEngine::find_container(&state, container) else {
            return Err(Error::NoSuchContainer(container.to_string()));
        };
        state.containers.get_mut(&found.name).unwrap().running = false;
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rm {container}"));
        let Some(found) = FakeEngine::find_container(&state, container) else {
            return Err(Error::NoSuchContainer(container.to_string()));
        };
        state.containers.remove(&found.name);
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rmi {image}"));
        if state.images_in_use.iter().any(|i| i == image) {
            return Err(Error::ImageInUse(image.to_string()));
        }
        let Some(found) = state.images.get(image).cloned() else {
            return Err(Error::NoSuchImage(image.to_string()));
        };
        // Removing by id or tag takes every alias of the image with it.
        state.images.retain(|_, v| v.id != found.id);
        Ok(())
    }

    async fn inspect_image(&self, name: &str) -> Result<ImageFacts> {
        let state = self.state.lock().unwrap();
        match state.images.get(name) {
            Some(image) => Ok(ImageFacts {
                id: image.id.clone(),
                created: image.created,
            }),
            None => Err(Error::NoSuchImage(name.to_string())),
        }
    }

    async fn inspect_container(&self, name_or_id: &str) -> Result<ContainerFacts> {
        let state = self.state.lock().unwrap();
        match FakeEngine::find_container(&state, name_or_id) {
            Some(container) => Ok(FakeEngine::facts(&container)),
            None => Err(Error::NoSuchContainer(name_or_id.to_string())),
        }
    }

    async fn copy_from_container(&self, container: &str, path: &str) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("copy {container} {path}"));
        state
            .archives
            .get(path)
            .cloned()
            .ok_or_else(|| Error::EngineApi {
                operation: "copy from container".to_string(),
                status: 404,
                message: format!("no such path {path}"),
            })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .values()
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                running: c.running,
            })
            .collect())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter(|(key, image)| **key != image.id)
            .map(|(tag, image)| ImageSummary {
                id: image.id.clone(),
                tags: vec![tag.clone()],
            })
            .collect())
    }
}

// =============================================================================
// Fake Store
// =============================================================================

#[derive(Default)]
pub struct FakeStore {
    pub entries: Mutex<BTreeMap<String, String>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl CoordStore for FakeStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().remove(key))
    }

    async fn delete_all(&self, key: &str) -> Result<()> {
        let prefix = format!("{key}/");
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|k, _| k != key && !k.starts_with(&prefix));
        Ok(())
    }

    async fn children(&self, key: &str) -> Result<Option<Vec<String>>> {
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let entries = self.entries.lock().unwrap();
        let mut names: Vec<String> = Vec::new();
        for k in entries.keys() {
            if let Some(rest) = k.strip_prefix(&prefix) {
                let first = rest.split('/').next().unwrap_or(rest).to_string();
                if !names.contains(&first) {
                    names.push(first);
                }
            }
        }
        if names.is_empty() {
            return Ok(None);
        }
        Ok(Some(names))
    }
}

// =============================================================================
// Fixture Helpers
// =============================================================================

/// Writes the configuration into the temp dir and wires an orchestrator
/// against the fakes, with path translation off.
pub async fn orchestrator(
    dir: &TempDir,
    config: &str,
    engine: Arc<FakeEngine>,
    store: Arc<FakeStore>,
    root_name: &str,
) -> Result<Orchestrator> {
    let config_path = dir.path().join("Pickett.json");
    std::fs::write(&config_path, config).unwrap();
    let workspace = Workspace::new(&config_path)?;
    Orchestrator::from_config_text(
        config,
        workspace,
        engine,
        store,
        OrchestratorOptions {
            root_name: root_name.to_string(),
            translator: None,
            run_volume: None,
        },
    )
    .await
}

/// Creates `dir` (relative to the fixture root) containing a minimal
/// Dockerfile, so container nodes pass wiring validation.
pub fn dockerfile_dir(dir: &TempDir, name: &str) {
    let path = dir.path().join(name);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("Dockerfile"), "FROM scratch\n").unwrap();
}

/// Rewrites a file's modification time, so staleness orderings can be
/// constructed exactly.
pub fn set_mtime(path: &Path, stamp: Stamp) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    let times = std::fs::FileTimes::new().set_modified(std::time::SystemTime::from(stamp));
    file.set_times(times).unwrap();
}

/// Latest mtime in a directory tree, converted the way the orchestrator
/// converts filesystem timestamps.
pub fn tree_mtime(path: &Path) -> Stamp {
    fn walk(path: &Path, best: &mut Option<Stamp>) {
        let meta = std::fs::metadata(path).unwrap();
        if meta.is_dir() {
            for entry in std::fs::read_dir(path).unwrap() {
                walk(&entry.unwrap().path(), best);
            }
        } else {
            let t: Stamp = meta.modified().unwrap().into();
            if best.map_or(true, |b| t > b) {
                *best = Some(t);
            }
        }
    }
    let mut best = None;
    walk(path, &mut best);
    best.expect("tree has no files")
}
