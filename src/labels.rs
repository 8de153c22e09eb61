use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::AppError;

pub const MAX_LABEL_CHARS: usize = 50;

/// Display labels for relay indices, persisted as one JSON object.
///
/// Every successful [`LabelStore::set`] rewrites the whole file while holding
/// the store lock, so concurrent updates never interleave their writes.
pub struct LabelStore {
    path: PathBuf,
    count: usize,
    labels: Mutex<FxHashMap<u32, String>>,
}

impl LabelStore {
    /// Loads persisted labels for `count` relays and merges them over the defaults.
    pub fn open<P: AsRef<Path>>(path: P, count: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut labels: FxHashMap<u32, String> = (0..count as u32)
            .map(|i| (i, Self::default_label(i)))
            .collect();

        for (index, text) in Self::load(&path) {
            if (index as usize) < count {
                labels.insert(index, text);
            } else {
                warn!("ignoring persisted label for unknown relay {index}");
            }
        }

        Self {
            path,
            count,
            labels: Mutex::new(labels),
        }
    }

    /// Reads the persisted mapping. Absence yields an empty map; a file that is
    /// not a JSON object is logged and also yields an empty map. Entries with a
    /// non-numeric key or a non-string value are skipped individually.
    pub fn load(path: &Path) -> FxHashMap<u32, String> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return FxHashMap::default(),
            Err(e) => {
                error!("Error loading labels from {}: {e}", path.display());
                return FxHashMap::default();
            }
        };

        let raw: BTreeMap<String, Value> = match serde_json::from_str(&contents) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Error loading labels from {}: {e}", path.display());
                return FxHashMap::default();
            }
        };

        let labels: FxHashMap<u32, String> = raw
            .into_iter()
            .filter_map(|(key, value)| {
                let Ok(index) = key.parse::<u32>() else {
                    warn!("ignoring persisted label with non-numeric key {key:?}");
                    return None;
                };
                match value {
                    Value::String(text) => Some((index, text)),
                    other => {
                        warn!("ignoring persisted label {index}: expected a string, found {other}");
                        None
                    }
                }
            })
            .collect();
        info!("Labels loaded from {}", path.display());
        labels
    }

    pub fn default_label(index: u32) -> String {
        format!("Relay {index}")
    }

    /// Trims and truncates a user supplied label.
    pub fn normalize(raw: &str) -> Result<String, AppError> {
        let text: String = raw.trim().chars().take(MAX_LABEL_CHARS).collect();
        if text.is_empty() {
            return Err(AppError::InvalidLabel("Label cannot be empty".into()));
        }
        Ok(text)
    }

    pub fn get(&self, index: u32) -> String {
        self.labels
            .lock()
            .get(&index)
            .cloned()
            .unwrap_or_else(|| Self::default_label(index))
    }

    pub fn all(&self) -> BTreeMap<u32, String> {
        self.labels
            .lock()
            .iter()
            .map(|(i, text)| (*i, text.clone()))
            .collect()
    }

    /// Stores a label and persists the full mapping.
    ///
    /// A failed persist is logged only; the in-memory label stays updated.
    pub fn set(&self, index: u32, raw: &str) -> Result<String, AppError> {
        if index as usize >= self.count {
            return Err(AppError::out_of_range(index, self.count));
        }
        let text = Self::normalize(raw)?;

        let mut labels = self.labels.lock();
        labels.insert(index, text.clone());
        match self.persist(&labels) {
            Ok(()) => info!("Labels saved to {}", self.path.display()),
            Err(e) => error!("Error saving labels: {e}"),
        }

        Ok(text)
    }

    fn persist(&self, labels: &FxHashMap<u32, String>) -> Result<(), AppError> {
        let ordered: BTreeMap<u32, &String> = labels.iter().map(|(i, t)| (*i, t)).collect();
        let json = serde_json::to_string_pretty(&ordered)
            .map_err(|e| AppError::Storage(format!("encode labels: {e}")))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)
            .map_err(|e| AppError::Storage(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::Storage(format!("rename to {}: {e}", self.path.display())))
    }
}
