use log::info;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};

use relayd::{
    AppConfig, AppState, ButtonLine, ButtonWatcher, GpioBackend, LabelStore, LineDriver, PinMap,
    RelayService,
};

#[cfg(feature = "hardware-gpio")]
use relayd::{LibgpiodBackend, Platform};
#[cfg(not(feature = "hardware-gpio"))]
use relayd::MockGpioBackend;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("RELAYD_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(
        AppConfig::load_or_default(&config_path)
            .unwrap_or_else(|e| panic!("Failed to load config: {e}")),
    );
    let pins = PinMap::from_config(&config).unwrap_or_else(|e| panic!("Invalid pin map: {e}"));

    #[cfg(feature = "hardware-gpio")]
    {
        let (driver, buttons) = if config.force_simulation {
            info!("Simulation forced by configuration");
            (LineDriver::simulated(pins.len()), Vec::new())
        } else {
            LineDriver::detect(&pins, &Platform::current(), config.debounce(), || {
                LibgpiodBackend::open(pins.chips())
            })
        };
        serve::<LibgpiodBackend>(config, pins, driver, buttons).await
    }

    #[cfg(not(feature = "hardware-gpio"))]
    {
        info!("Built without hardware GPIO support, simulation mode enabled");
        let driver = LineDriver::simulated(pins.len());
        serve::<MockGpioBackend>(config, pins, driver, Vec::new()).await
    }
}

async fn serve<B: GpioBackend + 'static>(
    config: Arc<AppConfig>,
    pins: PinMap,
    driver: LineDriver<B>,
    buttons: Vec<ButtonLine>,
) -> std::io::Result<()> {
    let labels = LabelStore::open(&config.labels_file, pins.len());
    let relays: Vec<String> = pins
        .relays()
        .map(|(i, p)| format!("{i}={}:{}", p.chip, p.line))
        .collect();

    let service = Arc::new(RelayService::new(
        pins,
        driver,
        labels,
        config.broadcast_capacity,
    ));
    info!("Mode: {:?}", service.mode());
    info!("Controlling relays: {}", relays.join(", "));

    ButtonWatcher::spawn(service.clone(), buttons, config.debounce());

    let app_state = AppState {
        service: service.clone(),
    };

    let http_cfg = config.http.clone();
    let server = HttpServer::new(move || {
        let scope_path = http_cfg.path.clone();
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    })
    .client_request_timeout(Duration::from_secs(config.http.timeout));

    let bind_addrs: String;
    let http_cfg = config.http.clone();
    let server = match (&http_cfg.unix_socket, &http_cfg.host) {
        (Some(socket_path), Some(host)) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = format!("{} and {}", socket_path, host);

            server.bind_uds(socket_path)?.bind_auto_h2c(host)?
        }
        (Some(socket_path), None) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = socket_path.clone();

            server.bind_uds(socket_path)?
        }
        (None, Some(host)) => {
            bind_addrs = host.clone();

            server.bind_auto_h2c(host)?
        }
        _ => {
            panic!("Config error: either 'unix_socket' or 'host' must be specified")
        }
    };

    info!("Relay controller running on {}...", bind_addrs);

    let result = server.run().await;
    service.shutdown();
    result
}
