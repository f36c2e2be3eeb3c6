// Persistence sinks for the trigger registry

use crate::errors::StorageError;
use crate::models::ScheduleSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, instrument};

/// SpecSink loads and saves the ordered trigger registry
#[async_trait]
pub trait SpecSink: Send + Sync {
    /// Load all persisted specs in registry order
    async fn load(&self) -> Result<Vec<ScheduleSpec>, StorageError>;

    /// Replace the persisted registry with `specs`
    async fn save(&self, specs: &[ScheduleSpec]) -> Result<(), StorageError>;
}

/// On-disk document layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    triggers: Vec<ScheduleSpec>,
}

/// JsonFileSink stores the registry as a pretty-printed JSON document
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SpecSink for JsonFileSink {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Vec<ScheduleSpec>, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Registry file does not exist yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let document: RegistryDocument = serde_json::from_slice(&bytes)?;
        debug!(count = document.triggers.len(), "Registry loaded");
        Ok(document.triggers)
    }

    #[instrument(skip(self, specs), fields(path = %self.path.display(), count = specs.len()))]
    async fn save(&self, specs: &[ScheduleSpec]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let document = RegistryDocument {
            triggers: specs.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&document)?;

        // Write-then-rename so readers never observe a half-written file
        let temp = self.temp_path();
        tokio::fs::write(&temp, &json).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        debug!("Registry saved");
        Ok(())
    }
}

/// MemorySink keeps the registry in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    specs: Mutex<Vec<ScheduleSpec>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_specs(specs: Vec<ScheduleSpec>) -> Self {
        Self {
            specs: Mutex::new(specs),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail, simulating an unavailable backing store
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> Vec<ScheduleSpec> {
        self.specs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SpecSink for MemorySink {
    async fn load(&self) -> Result<Vec<ScheduleSpec>, StorageError> {
        Ok(self.persisted())
    }

    async fn save(&self, specs: &[ScheduleSpec]) -> Result<(), StorageError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "memory sink configured to fail".to_string(),
            ));
        }
        *self
            .specs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = specs.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("triggers.json"));
        assert!(sink.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_order() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("nested").join("triggers.json"));
        let specs = vec![
            ScheduleSpec::new("b", "http://svc/b", "0 * * * * ?"),
            ScheduleSpec::new("a", "http://svc/a", "*/5 * * * *")
                .with_method(HttpMethod::Get)
                .with_header("X-Token", "t")
                .with_enabled(false),
        ];

        sink.save(&specs).await.unwrap();
        let loaded = sink.load().await.unwrap();
        assert_eq!(loaded, specs);
        assert!(!dir.path().join("nested").join("triggers.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("triggers.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let sink = JsonFileSink::new(path);
        assert!(matches!(sink.load().await, Err(StorageError::InvalidJson(_))));
    }

    #[tokio::test]
    async fn test_memory_sink_failure_mode() {
        let sink = MemorySink::new();
        sink.set_fail_saves(true);
        assert!(sink.save(&[]).await.is_err());
        assert_eq!(sink.save_count(), 0);
        sink.set_fail_saves(false);
        sink.save(&[]).await.unwrap();
        assert_eq!(sink.save_count(), 1);
    }
}
