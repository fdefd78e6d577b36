//! Durable state: config, heartbeat record and claim marker.
//!
//! Every write replaces the whole document. `FileStore` writes a uniquely
//! named sibling temp file, syncs it, and renames it over the target, so a
//! concurrent reader sees either the old record or the new one, never a torn
//! write, and overlapping writers never share a temp file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::GuardianConfig;
use crate::heartbeat::HeartbeatRecord;
use crate::pipeline::ClaimMarker;
use crate::sdk::GuardianError;

pub const CONFIG_FILE: &str = "config.json";
pub const HEARTBEAT_FILE: &str = "heartbeat.json";
pub const CLAIM_FILE: &str = "claim.json";

pub trait GuardianStore: Send + Sync {
    fn load_config(&self) -> Result<Option<GuardianConfig>, GuardianError>;
    fn save_config(&self, config: &GuardianConfig) -> Result<(), GuardianError>;

    fn load_heartbeat(&self) -> Result<Option<HeartbeatRecord>, GuardianError>;
    fn save_heartbeat(&self, record: &HeartbeatRecord) -> Result<(), GuardianError>;

    fn load_claim_marker(&self) -> Result<Option<ClaimMarker>, GuardianError>;
    fn save_claim_marker(&self, marker: &ClaimMarker) -> Result<(), GuardianError>;
    fn clear_claim_marker(&self) -> Result<(), GuardianError>;

    /// Config that must exist and validate for the operation to proceed.
    fn require_config(&self) -> Result<GuardianConfig, GuardianError> {
        let config = self
            .load_config()?
            .ok_or_else(|| GuardianError::ConfigMissing(CONFIG_FILE.into()))?;
        config.validate()?;
        Ok(config)
    }
}

/// JSON documents in one data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, GuardianError> {
        let path = self.dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GuardianError::Storage(format!("{}: {e}", path.display())));
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| GuardianError::Storage(format!("{}: {e}", path.display())))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), GuardianError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let tmp = self
            .dir
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec_pretty(value)?;
        if let Err(e) = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &path)) {
            if let Err(cleanup) = fs::remove_file(&tmp)
                && cleanup.kind() != ErrorKind::NotFound
            {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "temp file left behind");
            }
            return Err(GuardianError::Storage(format!("{}: {e}", path.display())));
        }
        self.sync_dir()
    }

    fn remove(&self, name: &str) -> Result<(), GuardianError> {
        match fs::remove_file(self.dir.join(name)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            Err(_) => Ok(()),
            Ok(()) => self.sync_dir(),
        }
    }

    /// Make the rename itself durable.
    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), GuardianError> {
        fs::File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), GuardianError> {
        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl GuardianStore for FileStore {
    fn load_config(&self) -> Result<Option<GuardianConfig>, GuardianError> {
        let config: Option<GuardianConfig> = self.read(CONFIG_FILE)?;
        if let Some(c) = &config {
            c.validate()?;
        }
        Ok(config)
    }

    fn save_config(&self, config: &GuardianConfig) -> Result<(), GuardianError> {
        self.write(CONFIG_FILE, config)
    }

    fn load_heartbeat(&self) -> Result<Option<HeartbeatRecord>, GuardianError> {
        self.read(HEARTBEAT_FILE)
    }

    fn save_heartbeat(&self, record: &HeartbeatRecord) -> Result<(), GuardianError> {
        self.write(HEARTBEAT_FILE, record)
    }

    fn load_claim_marker(&self) -> Result<Option<ClaimMarker>, GuardianError> {
        self.read(CLAIM_FILE)
    }

    fn save_claim_marker(&self, marker: &ClaimMarker) -> Result<(), GuardianError> {
        self.write(CLAIM_FILE, marker)
    }

    fn clear_claim_marker(&self) -> Result<(), GuardianError> {
        self.remove(CLAIM_FILE)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    config: Option<GuardianConfig>,
    heartbeat: Option<HeartbeatRecord>,
    marker: Option<ClaimMarker>,
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn with_config(config: GuardianConfig) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                config: Some(config),
                ..Default::default()
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, GuardianError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| GuardianError::Storage("memory store poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

impl GuardianStore for MemoryStore {
    fn load_config(&self) -> Result<Option<GuardianConfig>, GuardianError> {
        self.with_state(|s| s.config.clone())
    }

    fn save_config(&self, config: &GuardianConfig) -> Result<(), GuardianError> {
        self.with_state(|s| s.config = Some(config.clone()))
    }

    fn load_heartbeat(&self) -> Result<Option<HeartbeatRecord>, GuardianError> {
        self.with_state(|s| s.heartbeat.clone())
    }

    fn save_heartbeat(&self, record: &HeartbeatRecord) -> Result<(), GuardianError> {
        self.with_state(|s| s.heartbeat = Some(record.clone()))
    }

    fn load_claim_marker(&self) -> Result<Option<ClaimMarker>, GuardianError> {
        self.with_state(|s| s.marker.clone())
    }

    fn save_claim_marker(&self, marker: &ClaimMarker) -> Result<(), GuardianError> {
        self.with_state(|s| s.marker = Some(marker.clone()))
    }

    fn clear_claim_marker(&self) -> Result<(), GuardianError> {
        self.with_state(|s| s.marker = None)
    }
}
