pub mod backend;
pub mod buttons;
pub mod config;
pub mod error;
pub mod gpio;
pub mod labels;
pub mod pinmap;
pub mod routes;
pub mod service;

pub use buttons::ButtonWatcher;
pub use config::{AppConfig, HttpConfig, PinConfig};
pub use error::AppError;
pub use gpio::{
    Backing, ButtonLine, Edge, EdgeEvent, GpioBackend, HIGH, LOW, LineDriver, Mode, Platform,
};
pub use labels::LabelStore;
pub use pinmap::PinMap;
pub use routes::AppState;
pub use service::{ChangeSource, RelayService, RelayStates, RelayStatus, StateChange};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
