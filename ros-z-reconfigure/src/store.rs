//! Durable key/value storage for parameter values.
//!
//! Keys are `<owner>/<param>` (see [`crate::names::param_key`]); values
//! keep their type tag so a restore can reject an entry whose type no
//! longer matches the declared schema.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{ReconfigureError, Result};
use crate::value::ParamValue;

pub trait ParamStore: Send + Sync + 'static {
    /// `Ok(None)` for a key that was never written.
    fn get(&self, key: &str) -> Result<Option<ParamValue>>;

    fn set(&self, key: &str, value: &ParamValue) -> Result<()>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryParamStore {
    entries: RwLock<HashMap<String, ParamValue>>,
}

impl MemoryParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ParamStore for MemoryParamStore {
    fn get(&self, key: &str) -> Result<Option<ParamValue>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &ParamValue) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Store backed by a single JSON document, rewritten on every `set`.
///
/// ```json
/// { "/ns/driver/int_name": { "int": 88 } }
/// ```
#[derive(Debug)]
pub struct JsonFileParamStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, ParamValue>>,
}

impl JsonFileParamStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => Self::decode_entries(&path, &text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(ReconfigureError::Persistence(format!(
                    "{}: {}",
                    path.display(),
                    e
                )));
            }
        };
        debug!(
            "[STORE] Opened {} with {} entries",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// A malformed document is an error; a single entry that does not
    /// decode as a value is skipped so the others still load.
    fn decode_entries(path: &Path, text: &str) -> Result<BTreeMap<String, ParamValue>> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)
            .map_err(|e| ReconfigureError::Persistence(format!("{}: {}", path.display(), e)))?;
        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            match serde_json::from_value::<ParamValue>(value) {
                Ok(value) => {
                    entries.insert(key, value);
                }
                Err(e) => warn!(
                    "[STORE] Skipping undecodable entry '{}' in {}: {}",
                    key,
                    path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, ParamValue>) -> Result<()> {
        let text = serde_json::to_string_pretty(entries).map_err(ReconfigureError::persistence)?;
        // Write to a sibling file first so a crash never leaves a truncated document.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(ReconfigureError::persistence)?;
        std::fs::rename(&tmp, &self.path).map_err(ReconfigureError::persistence)
    }
}

impl ParamStore for JsonFileParamStore {
    fn get(&self, key: &str) -> Result<Option<ParamValue>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &ParamValue) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|old| old.same_as(value)) {
            return Ok(());
        }
        entries.insert(key.to_string(), value.clone());
        self.flush(&entries)
    }
}
