use std::collections::BTreeMap;

use log::info;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::AppError;
use crate::gpio::{GpioBackend, HIGH, LOW, LineDriver, Mode, epoch_millis};
use crate::labels::LabelStore;
use crate::pinmap::PinMap;

#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub index: u32,
    pub pin: u32,
    pub state: Option<u8>,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStates {
    pub states: BTreeMap<u32, Option<u8>>,
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    Api,
    Button,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub index: u32,
    pub state: u8,
    pub mode: Mode,
    pub source: ChangeSource,
    pub timestamp_ms: u64,
}

/// The context object every request handler and button watcher goes through.
pub struct RelayService<B: GpioBackend> {
    pins: PinMap,
    driver: LineDriver<B>,
    labels: LabelStore,
    events: broadcast::Sender<StateChange>,
}

impl<B: GpioBackend> RelayService<B> {
    pub fn new(
        pins: PinMap,
        driver: LineDriver<B>,
        labels: LabelStore,
        broadcast_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            pins,
            driver,
            labels,
            events,
        }
    }

    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    pub fn mode(&self) -> Mode {
        self.driver.active_mode()
    }

    pub fn get_state(&self, index: u32) -> Result<RelayStatus, AppError> {
        let pin = self.pins.pin_for(index)?;
        let state = self.driver.read(index)?;

        Ok(RelayStatus {
            index,
            pin: pin.line,
            state,
            mode: self.driver.mode_of(index)?,
        })
    }

    pub fn set_state(&self, index: u32, state: u8) -> Result<RelayStatus, AppError> {
        let pin = self.pins.pin_for(index)?;
        self.driver.write(index, state)?;
        let mode = self.driver.mode_of(index)?;
        self.log_change(index, state, mode);
        self.publish(index, state, mode, ChangeSource::Api);

        Ok(RelayStatus {
            index,
            pin: pin.line,
            state: Some(state),
            mode,
        })
    }

    /// Flips one relay; an unreadable line counts as LOW.
    pub fn toggle(&self, index: u32) -> Result<u8, AppError> {
        self.pins.pin_for(index)?;
        let state = self.driver.modify(index, |current| match current {
            Some(HIGH) => LOW,
            _ => HIGH,
        })?;
        let mode = self.driver.mode_of(index)?;
        self.log_change(index, state, mode);
        self.publish(index, state, mode, ChangeSource::Button);

        Ok(state)
    }

    /// Every configured relay; a line that cannot be read reports `None`.
    pub fn get_all_states(&self) -> RelayStates {
        let states = self
            .pins
            .indices()
            .map(|index| (index, self.driver.read(index).ok().flatten()))
            .collect();

        RelayStates {
            states,
            mode: self.mode(),
        }
    }

    pub fn get_label(&self, index: u32) -> Result<String, AppError> {
        self.pins.pin_for(index)?;
        Ok(self.labels.get(index))
    }

    pub fn labels(&self) -> BTreeMap<u32, String> {
        self.labels.all()
    }

    pub fn set_label(&self, index: u32, text: &str) -> Result<String, AppError> {
        self.pins.pin_for(index)?;
        let label = self.labels.set(index, text)?;
        info!("Relay {index} label updated to: {label}");
        Ok(label)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        info!("Cleaning up GPIO...");
        self.driver.shutdown();
    }

    fn log_change(&self, index: u32, state: u8, mode: Mode) {
        let level = if state == HIGH { "HIGH" } else { "LOW" };
        match mode {
            Mode::Hardware => info!("Relay {index} set to {level}"),
            Mode::Simulation => info!("[simulation] Relay {index} set to {level}"),
        }
    }

    fn publish(&self, index: u32, state: u8, mode: Mode, source: ChangeSource) {
        // no subscribers is not an error
        let _ = self.events.send(StateChange {
            index,
            state,
            mode,
            source,
            timestamp_ms: epoch_millis(),
        });
    }
}
