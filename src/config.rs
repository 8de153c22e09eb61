use std::{fs, io, path::Path, path::PathBuf, time::Duration};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

const DEFAULT_CHIP: &str = "/dev/gpiochip0";
const DEFAULT_RELAY_LINES: [u32; 7] = [19, 6, 5, 22, 27, 17, 4];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            unix_socket: None,
            host: Some("0.0.0.0:3000".to_string()),
            path: String::new(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PinConfig {
    #[serde(default = "default_chip")]
    pub chip: String,
    pub line: u32,
}

impl PinConfig {
    pub fn new(chip: impl Into<String>, line: u32) -> Self {
        Self {
            chip: chip.into(),
            line,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default = "default_relays")]
    pub relays: Vec<PinConfig>,
    /// Button lines keyed by the relay index they toggle.
    #[serde(default)]
    pub buttons: FxHashMap<u32, PinConfig>,
    #[serde(default = "default_labels_file")]
    pub labels_file: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub force_simulation: bool,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            relays: default_relays(),
            buttons: FxHashMap::default(),
            labels_file: default_labels_file(),
            debounce_ms: default_debounce_ms(),
            force_simulation: false,
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))
    }

    /// Like [`AppConfig::load_from_file`], but a missing file yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        match fs::metadata(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            _ => Self::load_from_file(path),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_chip() -> String {
    DEFAULT_CHIP.to_string()
}

fn default_relays() -> Vec<PinConfig> {
    DEFAULT_RELAY_LINES
        .iter()
        .map(|line| PinConfig::new(DEFAULT_CHIP, *line))
        .collect()
}

fn default_labels_file() -> PathBuf {
    PathBuf::from("gpio-labels.json")
}

fn default_debounce_ms() -> u64 {
    50
}

fn default_broadcast_capacity() -> usize {
    64
}
