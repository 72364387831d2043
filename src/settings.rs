use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::protocol::{size_guard::DEFAULT_SIZE_CEILING, DeliveryMode};

pub const DATA_DIR_ENV: &str = "TASKBRIDGE_DATA_DIR";
pub const DEBUG_ENV: &str = "TASKBRIDGE_DEBUG";
const DEFAULT_DATA_DIR: &str = "taskbridge-data";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub task_url: String,
    /// Origin completion messages must come from.
    pub expected_origin: String,
    pub load_timeout_ms: u64,
    pub completion_timeout_ms: u64,
    pub override_grace_ms: u64,
    pub size_ceiling_bytes: usize,
    pub embedded_data_prefix: String,
    pub delivery_mode: DeliveryMode,
    pub auto_advance_delay_ms: u64,
    pub archive_raw_data: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            task_url: "https://kelvinlim.github.io/eyegaze/".into(),
            expected_origin: "https://kelvinlim.github.io".into(),
            load_timeout_ms: 15_000,
            completion_timeout_ms: 600_000,
            override_grace_ms: 120_000,
            size_ceiling_bytes: DEFAULT_SIZE_CEILING,
            embedded_data_prefix: "EYEGAZE".into(),
            delivery_mode: DeliveryMode::Both,
            auto_advance_delay_ms: 3_000,
            archive_raw_data: true,
        }
    }
}

impl BridgeSettings {
    /// Short timers for local runs.
    pub fn debug() -> Self {
        Self {
            load_timeout_ms: 2_000,
            completion_timeout_ms: 20_000,
            override_grace_ms: 5_000,
            auto_advance_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn override_grace(&self) -> Duration {
        Duration::from_millis(self.override_grace_ms)
    }

    pub fn auto_advance_delay(&self) -> Duration {
        Duration::from_millis(self.auto_advance_delay_ms)
    }

    pub fn data_key(&self, suffix: &str) -> String {
        format!("{}_{}", self.embedded_data_prefix, suffix)
    }
}

pub fn debug_mode() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<BridgeSettings>,
}

impl SettingsStore {
    /// Reads `path`, falling back to `fallback` when the file is missing or unparsable.
    pub fn new(path: PathBuf, fallback: BridgeSettings) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings in {}: {err}", path.display());
                fallback
            })
        } else {
            fallback
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> BridgeSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: BridgeSettings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, BridgeSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BridgeSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &BridgeSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
