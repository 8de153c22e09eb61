use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::PinConfig;
use crate::error::AppError;
use crate::pinmap::PinMap;

pub const LOW: u8 = 0;
pub const HIGH: u8 = 1;

const SUPPORTED_OS: &[&str] = &["linux"];
const SUPPORTED_ARCH: &[&str] = &["arm", "aarch64"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Hardware,
    Simulation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Serialize)]
pub struct EdgeEvent {
    pub index: u32,
    pub edge: Edge,
    pub timestamp_ms: u64,
}

pub type EdgeSender = mpsc::UnboundedSender<EdgeEvent>;
pub type EdgeReceiver = mpsc::UnboundedReceiver<EdgeEvent>;

/// Raw access to physical lines. Outputs and inputs are keyed by relay index.
pub trait GpioBackend: Send + Sync {
    /// Claims `pin` as an output driven LOW.
    fn claim_output(&self, index: u32, pin: &PinConfig) -> Result<(), AppError>;
    /// Claims `pin` as a pulled-up, falling-edge input and forwards its edges to `events`.
    fn claim_input(
        &self,
        index: u32,
        pin: &PinConfig,
        debounce: Duration,
        events: EdgeSender,
    ) -> Result<(), AppError>;
    fn read_value(&self, index: u32) -> Result<u8, AppError>;
    fn write_value(&self, index: u32, value: u8) -> Result<(), AppError>;
    fn release_output(&self, index: u32) -> Result<(), AppError>;
    fn release_input(&self, index: u32) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        }
    }

    pub fn is_eligible(&self) -> bool {
        SUPPORTED_OS.contains(&self.os) && SUPPORTED_ARCH.contains(&self.arch)
    }
}

/// An input line that was successfully armed, with the receiving end of its edges.
pub struct ButtonLine {
    pub index: u32,
    pub pin: PinConfig,
    pub events: EdgeReceiver,
}

/// What a single relay index is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Hardware,
    Simulated(u8),
}

/// Reads and writes relay lines, either through a [`GpioBackend`] or purely in
/// memory. The variant is chosen once at construction.
///
/// In the hardware variant each index carries its own backing tag: a line that
/// failed to initialise keeps working on simulated state while its neighbours
/// stay hardware-backed. Every index sits behind its own mutex.
pub enum LineDriver<B: GpioBackend> {
    Hardware {
        backend: Arc<B>,
        lines: Vec<Mutex<Backing>>,
        inputs: Mutex<Vec<u32>>,
    },
    Simulated {
        lines: Vec<Mutex<u8>>,
    },
}

impl<B: GpioBackend> LineDriver<B> {
    pub fn simulated(count: usize) -> Self {
        LineDriver::Simulated {
            lines: (0..count).map(|_| Mutex::new(LOW)).collect(),
        }
    }

    /// Claims every configured line on `backend`. Lines that fail to claim are
    /// logged and fall back to simulation individually.
    pub fn hardware(
        backend: Arc<B>,
        pins: &PinMap,
        debounce: Duration,
    ) -> (Self, Vec<ButtonLine>) {
        let lines = pins
            .relays()
            .map(|(index, pin)| match backend.claim_output(index, pin) {
                Ok(()) => {
                    info!("Relay {index} initialized on {} line {}", pin.chip, pin.line);
                    Mutex::new(Backing::Hardware)
                }
                Err(e) => {
                    warn!(
                        "Error initializing relay {index} ({} line {}): {e}",
                        pin.chip, pin.line
                    );
                    Mutex::new(Backing::Simulated(LOW))
                }
            })
            .collect();

        let mut inputs = Vec::new();
        let mut buttons = Vec::new();
        for (index, pin) in pins.buttons() {
            let (tx, rx) = mpsc::unbounded_channel();
            match backend.claim_input(index, pin, debounce, tx) {
                Ok(()) => {
                    info!("Button {index} armed on {} line {}", pin.chip, pin.line);
                    inputs.push(index);
                    buttons.push(ButtonLine {
                        index,
                        pin: pin.clone(),
                        events: rx,
                    });
                }
                Err(e) => {
                    warn!(
                        "Error arming button {index} ({} line {}): {e}",
                        pin.chip, pin.line
                    );
                }
            }
        }

        let driver = LineDriver::Hardware {
            backend,
            lines,
            inputs: Mutex::new(inputs),
        };
        (driver, buttons)
    }

    /// Picks the variant for this process: hardware when the platform is
    /// eligible and `acquire` yields a backend, simulation otherwise.
    pub fn detect<F>(
        pins: &PinMap,
        platform: &Platform,
        debounce: Duration,
        acquire: F,
    ) -> (Self, Vec<ButtonLine>)
    where
        F: FnOnce() -> Result<B, AppError>,
    {
        if !platform.is_eligible() {
            info!(
                "Platform {}/{} has no supported GPIO, simulation mode enabled",
                platform.os, platform.arch
            );
            return (Self::simulated(pins.len()), Vec::new());
        }

        match acquire() {
            Ok(backend) => Self::hardware(Arc::new(backend), pins, debounce),
            Err(e) => {
                warn!("GPIO access unavailable: {e}");
                info!("Running in simulation mode");
                (Self::simulated(pins.len()), Vec::new())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LineDriver::Hardware { lines, .. } => lines.len(),
            LineDriver::Simulated { lines } => lines.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn out_of_range(&self, index: u32) -> AppError {
        AppError::out_of_range(index, self.len())
    }

    fn check_state(state: u8) -> Result<(), AppError> {
        if state > HIGH {
            return Err(AppError::InvalidState("Use 0 (LOW) or 1 (HIGH)".into()));
        }
        Ok(())
    }

    /// Single write attempt; backend failures surface as `HardwareFault`.
    pub fn write(&self, index: u32, state: u8) -> Result<(), AppError> {
        match self {
            LineDriver::Simulated { lines } => {
                let line = lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                Self::check_state(state)?;
                *line.lock() = state;
            }
            LineDriver::Hardware { backend, lines, .. } => {
                let line = lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                Self::check_state(state)?;
                let mut backing = line.lock();
                Self::write_backing(backend, index, &mut backing, state)?;
            }
        }
        Ok(())
    }

    /// Current state, or `None` when the backend could not read the line.
    pub fn read(&self, index: u32) -> Result<Option<u8>, AppError> {
        match self {
            LineDriver::Simulated { lines } => {
                let line = lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                Ok(Some(*line.lock()))
            }
            LineDriver::Hardware { backend, lines, .. } => {
                let line = lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                let backing = line.lock();
                Ok(Self::read_backing(backend, index, &backing))
            }
        }
    }

    /// Reads and writes one line under a single lock hold. `next` receives the
    /// current state and returns the state to write.
    pub fn modify<F>(&self, index: u32, next: F) -> Result<u8, AppError>
    where
        F: FnOnce(Option<u8>) -> u8,
    {
        match self {
            LineDriver::Simulated { lines } => {
                let line = lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                let mut value = line.lock();
                let state = next(Some(*value));
                Self::check_state(state)?;
                *value = state;
                Ok(state)
            }
            LineDriver::Hardware { backend, lines, .. } => {
                let line = lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                let mut backing = line.lock();
                let state = next(Self::read_backing(backend, index, &backing));
                Self::check_state(state)?;
                Self::write_backing(backend, index, &mut backing, state)?;
                Ok(state)
            }
        }
    }

    fn write_backing(
        backend: &B,
        index: u32,
        backing: &mut Backing,
        state: u8,
    ) -> Result<(), AppError> {
        match backing {
            Backing::Hardware => backend.write_value(index, state),
            Backing::Simulated(value) => {
                *value = state;
                Ok(())
            }
        }
    }

    fn read_backing(backend: &B, index: u32, backing: &Backing) -> Option<u8> {
        match backing {
            Backing::Simulated(value) => Some(*value),
            Backing::Hardware => match backend.read_value(index) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Error reading relay {index}: {e}");
                    None
                }
            },
        }
    }

    pub fn mode_of(&self, index: u32) -> Result<Mode, AppError> {
        match self {
            LineDriver::Simulated { lines } => {
                lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                Ok(Mode::Simulation)
            }
            LineDriver::Hardware { lines, .. } => {
                let line = lines.get(index as usize).ok_or_else(|| self.out_of_range(index))?;
                Ok(match *line.lock() {
                    Backing::Hardware => Mode::Hardware,
                    Backing::Simulated(_) => Mode::Simulation,
                })
            }
        }
    }

    /// Process-wide mode: hardware as soon as one line is hardware-backed.
    /// This is an approximation when lines are mixed; use [`LineDriver::mode_of`]
    /// for the truth about a single line.
    pub fn active_mode(&self) -> Mode {
        match self {
            LineDriver::Simulated { .. } => Mode::Simulation,
            LineDriver::Hardware { lines, .. } => {
                if lines.iter().any(|l| *l.lock() == Backing::Hardware) {
                    Mode::Hardware
                } else {
                    Mode::Simulation
                }
            }
        }
    }

    /// Drives every hardware output LOW and releases all claims. A failure on
    /// one line is logged and the sweep moves on; a line that could not be
    /// released stays hardware-backed.
    pub fn shutdown(&self) {
        let LineDriver::Hardware {
            backend,
            lines,
            inputs,
        } = self
        else {
            return;
        };

        for (index, line) in lines.iter().enumerate() {
            let index = index as u32;
            let mut backing = line.lock();
            if *backing != Backing::Hardware {
                continue;
            }
            if let Err(e) = backend.write_value(index, LOW) {
                warn!("Error driving relay {index} low during cleanup: {e}");
            }
            match backend.release_output(index) {
                Ok(()) => *backing = Backing::Simulated(LOW),
                Err(e) => warn!("Error releasing relay {index}: {e}"),
            }
        }

        for index in inputs.lock().drain(..) {
            if let Err(e) = backend.release_input(index) {
                warn!("Error releasing button {index}: {e}");
            }
        }
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
