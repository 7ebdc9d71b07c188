use crate::model::Task;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = ".smartdo";
pub const TASKS_FILE: &str = "tasks.yml";
pub const SETTINGS_FILE: &str = "settings.yml";
pub const LOG_FILE: &str = "smartdo.log";

/// Bumped when the file layout changes; older files are upgraded on open.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScope {
    Project,
    Global,
}

#[derive(Debug, Clone)]
pub struct DataLocation {
    pub dir: PathBuf,
    pub scope: StoreScope,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("i/o error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid task file {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("store is not writable")]
    ReadOnly,
}

/// Durable task records keyed by id. One current record per id.
pub trait TaskStore {
    fn get_all(&self) -> Result<Vec<Task>, StoreError>;
    /// Inserts or replaces the record with `task.id`.
    fn put(&mut self, task: &Task) -> Result<(), StoreError>;
    fn delete(&mut self, id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct StoreFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Task records kept in a single YAML file.
#[derive(Debug)]
pub struct YamlStore {
    path: PathBuf,
    file: StoreFile,
}

/// Volatile store for tests and dry runs. `failing()` rejects every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: Vec<Task>,
    read_only: bool,
}

impl StoreScope {
    pub fn label(&self) -> &'static str {
        match self {
            StoreScope::Project => "project",
            StoreScope::Global => "global",
        }
    }
}

impl DataLocation {
    pub fn tasks_path(&self) -> PathBuf {
        self.dir.join(TASKS_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }
}

impl YamlStore {
    /// Opens the file at `path`, creating it when absent and upgrading older
    /// layouts in place.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut unranked = Vec::new();
        let file = if path.exists() {
            let data = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            if data.trim().is_empty() {
                StoreFile::default()
            } else {
                let yaml_err = |source: serde_yaml::Error| StoreError::Yaml {
                    path: path.clone(),
                    source,
                };
                let raw: serde_yaml::Value = serde_yaml::from_str(&data).map_err(yaml_err)?;
                unranked = records_without_order(&raw);
                let mut file: StoreFile = serde_yaml::from_value(raw).map_err(yaml_err)?;
                for &index in &unranked {
                    if let Some(task) = file.tasks.get_mut(index) {
                        task.order = index as f64;
                    }
                }
                file
            }
        } else {
            StoreFile::default()
        };

        let mut store = YamlStore { path, file };
        if !unranked.is_empty() {
            tracing::info!(
                path = %store.path.display(),
                count = unranked.len(),
                "ranked records by file position"
            );
            store.write()?;
        }
        if store.file.version < SCHEMA_VERSION || !store.path.exists() {
            tracing::info!(
                path = %store.path.display(),
                from = store.file.version,
                to = SCHEMA_VERSION,
                "upgrading task store"
            );
            store.file.version = SCHEMA_VERSION;
            store.write()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let serialized = serde_yaml::to_string(&self.file).map_err(|source| StoreError::Yaml {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, serialized).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Positions of task records that carry no `order` key.
fn records_without_order(raw: &serde_yaml::Value) -> Vec<usize> {
    raw.get("tasks")
        .and_then(serde_yaml::Value::as_sequence)
        .map(|records| {
            records
                .iter()
                .enumerate()
                .filter(|(_, record)| record.get("order").is_none())
                .map(|(index, _)| index)
                .collect()
        })
        .unwrap_or_default()
}

impl TaskStore for YamlStore {
    fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.file.tasks.clone())
    }

    fn put(&mut self, task: &Task) -> Result<(), StoreError> {
        match self.file.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => self.file.tasks.push(task.clone()),
        }
        self.write()
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.file.tasks.len();
        self.file.tasks.retain(|t| t.id != id);
        if self.file.tasks.len() == before {
            return Ok(());
        }
        self.write()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        MemoryStore {
            tasks,
            read_only: false,
        }
    }

    pub fn failing() -> Self {
        MemoryStore {
            tasks: Vec::new(),
            read_only: true,
        }
    }
}

impl TaskStore for MemoryStore {
    fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.clone())
    }

    fn put(&mut self, task: &Task) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => self.tasks.push(task.clone()),
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.tasks.retain(|t| t.id != id);
        Ok(())
    }
}

/// Creates `.smartdo/` in the current directory with an empty task file.
pub fn init_project_store() -> Result<DataLocation> {
    let cwd = env::current_dir()?;
    let dir = cwd.join(DATA_DIR);
    fs::create_dir_all(&dir).context("failed to create .smartdo directory")?;
    let location = DataLocation {
        dir,
        scope: StoreScope::Project,
    };
    YamlStore::open(location.tasks_path())
        .with_context(|| format!("creating {:?}", location.tasks_path()))?;
    Ok(location)
}

/// Nearest project store at or above `start`, else the per-user store.
pub fn locate_data(start: &Path) -> Result<DataLocation> {
    if let Some(dir) = find_project_dir(start) {
        return Ok(DataLocation {
            dir,
            scope: StoreScope::Project,
        });
    }
    Ok(DataLocation {
        dir: global_data_dir()?,
        scope: StoreScope::Global,
    })
}

fn find_project_dir(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(DATA_DIR);
        if candidate.join(TASKS_FILE).exists() {
            return Some(candidate);
        }
        dir = current.parent();
    }
    None
}

fn global_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "smartdo").context("locating data directory")?;
    Ok(dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task(id: &str, order: f64) -> Task {
        Task::new(id.into(), format!("task {id}"), None, order)
    }

    #[test]
    fn open_creates_versioned_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(TASKS_FILE);
        let store = YamlStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.get_all().unwrap().is_empty());
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("version: 1"));
    }

    #[test]
    fn put_replaces_by_id_and_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TASKS_FILE);
        let mut store = YamlStore::open(&path).unwrap();
        store.put(&task("a", 0.0)).unwrap();
        store.put(&task("b", 1.0)).unwrap();
        let mut changed = task("a", -4.0);
        changed.completed = true;
        store.put(&changed).unwrap();

        let reopened = YamlStore::open(&path).unwrap();
        let tasks = reopened.get_all().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "a");
        assert!(tasks[0].completed);
        assert_eq!(tasks[0].order, -4.0);
    }

    #[test]
    fn delete_removes_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TASKS_FILE);
        let mut store = YamlStore::open(&path).unwrap();
        store.put(&task("a", 0.0)).unwrap();
        store.delete("a").unwrap();
        store.delete("never-existed").unwrap();
        assert!(YamlStore::open(&path).unwrap().get_all().unwrap().is_empty());
    }

    #[test]
    fn unversioned_file_is_upgraded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TASKS_FILE);
        fs::write(
            &path,
            "tasks:\n- id: old\n  text: carried over\n  created_at: 1700000000000\n",
        )
        .unwrap();
        let store = YamlStore::open(&path).unwrap();
        let tasks = store.get_all().unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(fs::read_to_string(&path).unwrap().contains("version: 1"));
    }

    #[test]
    fn records_without_order_are_ranked_by_position() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TASKS_FILE);
        fs::write(
            &path,
            "version: 1\ntasks:\n\
             - id: a\n  text: first\n  created_at: 1700000000000\n\
             - id: b\n  text: second\n  created_at: 1700000000000\n  order: -7.5\n\
             - id: c\n  text: third\n  created_at: 1700000000000\n",
        )
        .unwrap();

        let store = YamlStore::open(&path).unwrap();
        let orders: Vec<f64> = store.get_all().unwrap().iter().map(|t| t.order).collect();
        assert_eq!(orders, vec![0.0, -7.5, 2.0]);

        let reopened = YamlStore::open(&path).unwrap();
        let orders: Vec<f64> = reopened.get_all().unwrap().iter().map(|t| t.order).collect();
        assert_eq!(orders, vec![0.0, -7.5, 2.0]);
        assert!(fs::read_to_string(&path).unwrap().contains("order: 2"));
    }

    #[test]
    fn empty_file_gets_a_container() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TASKS_FILE);
        fs::write(&path, "").unwrap();
        let store = YamlStore::open(&path).unwrap();
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(TASKS_FILE);
        fs::write(&path, "tasks: [this is: not valid").unwrap();
        assert!(matches!(
            YamlStore::open(&path),
            Err(StoreError::Yaml { .. })
        ));
    }

    #[test]
    fn project_dir_is_found_from_nested_directory() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join(DATA_DIR);
        YamlStore::open(data.join(TASKS_FILE)).unwrap();
        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        let location = locate_data(&nested).unwrap();
        assert_eq!(location.scope, StoreScope::Project);
        assert_eq!(location.dir, data);
    }

    #[test]
    fn failing_store_rejects_writes() {
        let mut store = MemoryStore::failing();
        assert!(matches!(store.put(&task("a", 0.0)), Err(StoreError::ReadOnly)));
        assert!(store.delete("a").is_err());
    }
}
