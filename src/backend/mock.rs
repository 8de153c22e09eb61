use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::PinConfig;
use crate::error::AppError;
use crate::gpio::{Edge, EdgeEvent, EdgeSender, GpioBackend, LOW, epoch_millis};

/// In-memory backend with fault and edge injection.
#[derive(Default)]
pub struct MockGpioBackend {
    outputs: RwLock<FxHashMap<u32, u8>>, // keyed by relay index
    inputs: RwLock<FxHashMap<u32, EdgeSender>>,
    released: Mutex<FxHashMap<u32, u8>>,
    faults: RwLock<MockFaults>,
}

#[derive(Default)]
struct MockFaults {
    claim_output: FxHashSet<u32>,
    claim_input: FxHashSet<u32>,
    read: FxHashSet<u32>,
    write: FxHashSet<u32>,
    release: FxHashSet<u32>,
}

impl MockGpioBackend {
    pub fn fail_claim_output(&self, index: u32) {
        self.faults.write().claim_output.insert(index);
    }

    pub fn fail_claim_input(&self, index: u32) {
        self.faults.write().claim_input.insert(index);
    }

    pub fn fail_read(&self, index: u32) {
        self.faults.write().read.insert(index);
    }

    pub fn fail_write(&self, index: u32) {
        self.faults.write().write.insert(index);
    }

    pub fn fail_release(&self, index: u32) {
        self.faults.write().release.insert(index);
    }

    pub fn clear_faults(&self) {
        *self.faults.write() = MockFaults::default();
    }

    /// Value currently driven on a claimed output.
    pub fn output_value(&self, index: u32) -> Option<u8> {
        self.outputs.read().get(&index).copied()
    }

    /// Last value an output held when it was released.
    pub fn released_value(&self, index: u32) -> Option<u8> {
        self.released.lock().get(&index).copied()
    }

    pub fn is_input_claimed(&self, index: u32) -> bool {
        self.inputs.read().contains_key(&index)
    }

    /// Delivers a raw edge on a claimed input. Returns false when nobody listens.
    pub fn inject_edge(&self, index: u32, edge: Edge) -> bool {
        match self.inputs.read().get(&index) {
            Some(tx) => tx
                .send(EdgeEvent {
                    index,
                    edge,
                    timestamp_ms: epoch_millis(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// A button press on an active-low input.
    pub fn press(&self, index: u32) -> bool {
        self.inject_edge(index, Edge::Falling)
    }

    fn fault<F>(&self, index: u32, op: &str, set: F) -> Result<(), AppError>
    where
        F: Fn(&MockFaults) -> &FxHashSet<u32>,
    {
        let faults = self.faults.read();
        if set(&faults).contains(&index) {
            return Err(AppError::HardwareFault(format!(
                "{op} line {index}: injected fault"
            )));
        }
        Ok(())
    }
}

impl GpioBackend for MockGpioBackend {
    fn claim_output(&self, index: u32, _pin: &PinConfig) -> Result<(), AppError> {
        self.fault(index, "claim output", |f| &f.claim_output)?;
        let mut outputs = self.outputs.write();
        if outputs.contains_key(&index) {
            return Err(AppError::HardwareFault(format!("line {index} is busy")));
        }
        outputs.insert(index, LOW);
        Ok(())
    }

    fn claim_input(
        &self,
        index: u32,
        _pin: &PinConfig,
        _debounce: Duration,
        events: EdgeSender,
    ) -> Result<(), AppError> {
        self.fault(index, "claim input", |f| &f.claim_input)?;
        self.inputs.write().insert(index, events);
        Ok(())
    }

    fn read_value(&self, index: u32) -> Result<u8, AppError> {
        self.fault(index, "get value", |f| &f.read)?;
        self.outputs
            .read()
            .get(&index)
            .copied()
            .ok_or_else(|| AppError::HardwareFault(format!("line {index} not claimed")))
    }

    fn write_value(&self, index: u32, value: u8) -> Result<(), AppError> {
        self.fault(index, "set value", |f| &f.write)?;
        let mut outputs = self.outputs.write();
        let slot = outputs
            .get_mut(&index)
            .ok_or_else(|| AppError::HardwareFault(format!("line {index} not claimed")))?;
        *slot = value;
        Ok(())
    }

    fn release_output(&self, index: u32) -> Result<(), AppError> {
        self.fault(index, "release", |f| &f.release)?;
        let value = self
            .outputs
            .write()
            .remove(&index)
            .ok_or_else(|| AppError::HardwareFault(format!("line {index} not claimed")))?;
        self.released.lock().insert(index, value);
        Ok(())
    }

    fn release_input(&self, index: u32) -> Result<(), AppError> {
        self.fault(index, "release", |f| &f.release)?;
        self.inputs
            .write()
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| AppError::HardwareFault(format!("button line {index} not claimed")))
    }
}
