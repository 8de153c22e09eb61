use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::config::{AppConfig, PinConfig};
use crate::error::AppError;

/// Static mapping from logical relay index to physical line, plus the
/// optional button line tied to each relay index.
#[derive(Debug, Clone)]
pub struct PinMap {
    relays: Vec<PinConfig>,
    buttons: BTreeMap<u32, PinConfig>,
}

impl PinMap {
    pub fn new(
        relays: Vec<PinConfig>,
        buttons: impl IntoIterator<Item = (u32, PinConfig)>,
    ) -> Result<Self, AppError> {
        let buttons: BTreeMap<u32, PinConfig> = buttons.into_iter().collect();

        if let Some(index) = buttons.keys().find(|i| **i as usize >= relays.len()) {
            return Err(AppError::Config(format!(
                "button {index} has no matching relay (configured relays: {})",
                relays.len()
            )));
        }

        let mut seen = HashSet::new();
        for pin in relays.iter().chain(buttons.values()) {
            if !seen.insert(pin) {
                return Err(AppError::Config(format!(
                    "line {} on {} is configured more than once",
                    pin.line, pin.chip
                )));
            }
        }

        Ok(Self { relays, buttons })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        Self::new(
            config.relays.clone(),
            config.buttons.iter().map(|(i, p)| (*i, p.clone())),
        )
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn is_valid_index(&self, index: u32) -> bool {
        (index as usize) < self.relays.len()
    }

    pub fn pin_for(&self, index: u32) -> Result<&PinConfig, AppError> {
        self.relays
            .get(index as usize)
            .ok_or_else(|| AppError::out_of_range(index, self.len()))
    }

    pub fn button_for(&self, index: u32) -> Option<&PinConfig> {
        self.buttons.get(&index)
    }

    /// Parses a raw path segment into a configured index.
    pub fn parse_index(&self, raw: &str) -> Result<u32, AppError> {
        raw.trim()
            .parse::<u32>()
            .ok()
            .filter(|index| self.is_valid_index(*index))
            .ok_or_else(|| AppError::out_of_range(raw, self.len()))
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.relays.len()).map(|i| i as u32)
    }

    pub fn relays(&self) -> impl Iterator<Item = (u32, &PinConfig)> {
        self.relays.iter().enumerate().map(|(i, p)| (i as u32, p))
    }

    pub fn buttons(&self) -> impl Iterator<Item = (u32, &PinConfig)> {
        self.buttons.iter().map(|(i, p)| (*i, p))
    }

    pub fn chips(&self) -> BTreeSet<&str> {
        self.relays
            .iter()
            .chain(self.buttons.values())
            .map(|p| p.chip.as_str())
            .collect()
    }
}
