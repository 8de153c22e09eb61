use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock};
use rustc_hash::FxHashMap;

use crate::config::PinConfig;
use crate::error::AppError;
use crate::gpio::{Edge, EdgeEvent, EdgeSender, GpioBackend, LOW};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

/// Character-device GPIO through libgpiod.
pub struct LibgpiodBackend {
    outputs: RwLock<FxHashMap<u32, OutputHandle>>, // keyed by relay index
    inputs: RwLock<FxHashMap<u32, EdgeListener>>,
}

struct OutputHandle {
    line: u32,
    gpiod_handle: FairMutex<GpiodHandle>,
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, AppError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, AppError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| AppError::HardwareFault(format!("open chip {path}: {e}")))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg = request::Config::new()
            .map_err(|e| AppError::HardwareFault(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::HardwareFault(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::HardwareFault(format!("request lines: {e}")))
    }
}

/// Forwards falling edges of one input line to a channel until dropped or
/// until the receiving side goes away.
struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(index: u32, gpiod_handle: GpiodHandle, events: EdgeSender) -> Result<Self, AppError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| AppError::HardwareFault(format!("event buffer: {e}")))?;

        let handle = std::thread::spawn(move || {
            let req = &gpiod_handle.request;

            while !cancel_flag.load(Ordering::Relaxed) {
                let has_event =
                    match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("wait edge events error for button {index}: {e}");
                            yield_now();
                            continue;
                        }
                    };
                if !has_event {
                    continue;
                }

                let edges = match req.read_edge_events(&mut buffer) {
                    Ok(evts) => evts,
                    Err(e) => {
                        warn!("read edge events error for button {index}: {e}");
                        yield_now();
                        continue;
                    }
                };
                for evt in edges {
                    let Ok(evt) = evt else { continue };
                    let edge = match evt.event_type() {
                        Ok(line::EdgeKind::Rising) => Edge::Rising,
                        Ok(line::EdgeKind::Falling) => Edge::Falling,
                        Err(_) => continue,
                    };

                    let event = EdgeEvent {
                        index,
                        edge,
                        timestamp_ms: evt.timestamp().as_millis() as u64,
                    };
                    if events.send(event).is_err() {
                        debug!("button {index} has no watcher, stopping listener");
                        return;
                    }
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl LibgpiodBackend {
    /// Acquires GPIO access. Fails when none of `chips` can be opened.
    pub fn open<'a>(chips: impl IntoIterator<Item = &'a str>) -> Result<Self, AppError> {
        let mut opened = 0;
        let mut last_err = None;
        for chip in chips {
            match GpiodHandle::open_chip(chip) {
                Ok(_) => opened += 1,
                Err(e) => {
                    warn!("{e}");
                    last_err = Some(e);
                }
            }
        }

        if opened == 0 {
            return Err(last_err
                .unwrap_or_else(|| AppError::HardwareFault("no GPIO chips configured".into())));
        }

        Ok(Self {
            outputs: RwLock::new(FxHashMap::default()),
            inputs: RwLock::new(FxHashMap::default()),
        })
    }

    fn make_output_settings() -> Result<line::Settings, AppError> {
        let mut ls = line::Settings::new()
            .map_err(|e| AppError::HardwareFault(format!("libgpiod settings: {e}")))?;
        ls.set_direction(line::Direction::Output)
            .map_err(|e| AppError::HardwareFault(format!("set direction: {e}")))?;
        ls.set_drive(line::Drive::PushPull)
            .map_err(|e| AppError::HardwareFault(format!("set drive: {e}")))?;
        ls.set_output_value(to_line_value(LOW))
            .map_err(|e| AppError::HardwareFault(format!("set output value: {e}")))?;
        Ok(ls)
    }

    fn make_input_settings(debounce: Duration) -> Result<line::Settings, AppError> {
        let mut ls = line::Settings::new()
            .map_err(|e| AppError::HardwareFault(format!("libgpiod settings: {e}")))?;
        ls.set_direction(line::Direction::Input)
            .map_err(|e| AppError::HardwareFault(format!("set direction: {e}")))?;
        ls.set_bias(Some(line::Bias::PullUp))
            .map_err(|e| AppError::HardwareFault(format!("set bias: {e}")))?;
        ls.set_edge_detection(Some(line::Edge::Falling))
            .map_err(|e| AppError::HardwareFault(format!("set edge detection: {e}")))?;
        ls.set_debounce_period(debounce);
        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg = line::Config::new()
            .map_err(|e| AppError::HardwareFault(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| AppError::HardwareFault(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

fn to_line_value(value: u8) -> line::Value {
    match value {
        0 => line::Value::InActive,
        _ => line::Value::Active,
    }
}

impl GpioBackend for LibgpiodBackend {
    fn claim_output(&self, index: u32, pin: &PinConfig) -> Result<(), AppError> {
        let mut outputs = self.outputs.write();
        if outputs.contains_key(&index) {
            return Err(AppError::HardwareFault(format!("relay {index} already claimed")));
        }

        let line_cfg = Self::make_line_config(pin.line, Self::make_output_settings()?)?;
        let gpiod_handle = GpiodHandle::new(&pin.chip, &line_cfg)?;
        outputs.insert(
            index,
            OutputHandle {
                line: pin.line,
                gpiod_handle: FairMutex::new(gpiod_handle),
            },
        );
        Ok(())
    }

    fn claim_input(
        &self,
        index: u32,
        pin: &PinConfig,
        debounce: Duration,
        events: EdgeSender,
    ) -> Result<(), AppError> {
        let mut inputs = self.inputs.write();
        if inputs.contains_key(&index) {
            return Err(AppError::HardwareFault(format!("button {index} already claimed")));
        }

        let line_cfg = Self::make_line_config(pin.line, Self::make_input_settings(debounce)?)?;
        let gpiod_handle = GpiodHandle::new(&pin.chip, &line_cfg)?;
        inputs.insert(index, EdgeListener::new(index, gpiod_handle, events)?);
        Ok(())
    }

    fn read_value(&self, index: u32) -> Result<u8, AppError> {
        let outputs = self.outputs.read();
        let handle = outputs
            .get(&index)
            .ok_or_else(|| AppError::HardwareFault(format!("relay {index} not claimed")))?;

        let value = handle
            .gpiod_handle
            .lock()
            .request
            .value(handle.line)
            .map_err(|e| AppError::HardwareFault(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => 0,
            line::Value::Active => 1,
        })
    }

    fn write_value(&self, index: u32, value: u8) -> Result<(), AppError> {
        let outputs = self.outputs.read();
        let handle = outputs
            .get(&index)
            .ok_or_else(|| AppError::HardwareFault(format!("relay {index} not claimed")))?;

        handle
            .gpiod_handle
            .lock()
            .request
            .set_value(handle.line, to_line_value(value))
            .map_err(|e| AppError::HardwareFault(format!("set value: {e}")))?;
        Ok(())
    }

    fn release_output(&self, index: u32) -> Result<(), AppError> {
        // dropping the request hands the line back to the kernel
        self.outputs
            .write()
            .remove(&index)
            .map(drop)
            .ok_or_else(|| AppError::HardwareFault(format!("relay {index} not claimed")))
    }

    fn release_input(&self, index: u32) -> Result<(), AppError> {
        self.inputs
            .write()
            .remove(&index)
            .map(drop)
            .ok_or_else(|| AppError::HardwareFault(format!("button {index} not claimed")))
    }
}
