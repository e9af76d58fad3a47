use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{BResult, BeaconError};

/// Small JSON record on disk. Missing or unreadable files load as `T::default()`.
#[derive(Clone, Debug)]
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFile {
            path: path.into(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn load(&self) -> T {
        if !self.path.exists() {
            return T::default();
        }
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Failed to read {}: {}", self.path.display(), e);
                return T::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Ignoring malformed {}: {}", self.path.display(), e);
                T::default()
            }
        }
    }

    pub fn save(&self, value: &T) -> BResult<()> {
        let json = serde_json::to_string(value)
            .map_err(|e| BeaconError::Storage(format!("serialize {}: {}", self.path.display(), e)))?;
        fs::write(&self.path, json)
            .map_err(|e| BeaconError::Storage(format!("write {}: {}", self.path.display(), e)))
    }

    /// Save, logging instead of failing; used where a lost write only costs
    /// freshness.
    pub fn save_or_log(&self, value: &T) {
        if let Err(e) = self.save(value) {
            log::error!("{}", e);
        }
    }
}

/// Last good position, read back when gpsd has nothing to offer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedFix {
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
}

impl CachedFix {
    pub fn is_degenerate(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// `name,sender` -> RFC 3339 time of the last send
pub type MessageTracking = BTreeMap<String, String>;
