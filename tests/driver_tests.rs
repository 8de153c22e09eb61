use std::sync::Arc;
use std::thread;
use std::time::Duration;

use relayd::{
    AppError, ChangeSource, LabelStore, LineDriver, MockGpioBackend, Mode, PinConfig, PinMap,
    Platform, RelayService,
};
use tempfile::{TempDir, tempdir};

const DEBOUNCE: Duration = Duration::from_millis(50);

fn sample_pins() -> PinMap {
    PinMap::new(
        vec![
            PinConfig::new("/dev/gpiochip0", 19),
            PinConfig::new("/dev/gpiochip0", 6),
            PinConfig::new("/dev/gpiochip0", 5),
        ],
        [
            (0, PinConfig::new("/dev/gpiochip0", 26)),
            (2, PinConfig::new("/dev/gpiochip0", 21)),
        ],
    )
    .expect("valid pin map")
}

fn hardware_service(
    backend: Arc<MockGpioBackend>,
) -> (RelayService<MockGpioBackend>, TempDir) {
    let pins = sample_pins();
    let dir = tempdir().unwrap();
    let labels = LabelStore::open(dir.path().join("gpio-labels.json"), pins.len());
    let (driver, _) = LineDriver::hardware(backend, &pins, DEBOUNCE);
    (RelayService::new(pins, driver, labels, 16), dir)
}

#[test]
fn platform_allow_list() {
    let pi = Platform {
        os: "linux",
        arch: "aarch64",
    };
    assert!(pi.is_eligible());
    assert!(Platform { os: "linux", arch: "arm" }.is_eligible());
    assert!(!Platform { os: "linux", arch: "x86_64" }.is_eligible());
    assert!(!Platform { os: "macos", arch: "aarch64" }.is_eligible());
}

#[test]
fn ineligible_platform_never_acquires_hardware() {
    let pins = sample_pins();
    let platform = Platform {
        os: "linux",
        arch: "x86_64",
    };
    let (driver, buttons) =
        LineDriver::detect(&pins, &platform, DEBOUNCE, || -> Result<MockGpioBackend, AppError> {
            panic!("hardware must not be acquired")
        });

    assert!(matches!(driver, LineDriver::Simulated { .. }));
    assert!(buttons.is_empty());
    assert_eq!(driver.active_mode(), Mode::Simulation);
}

#[test]
fn unavailable_hardware_falls_back_to_simulation() {
    let pins = sample_pins();
    let platform = Platform {
        os: "linux",
        arch: "arm",
    };
    let (driver, buttons) = LineDriver::<MockGpioBackend>::detect(&pins, &platform, DEBOUNCE, || {
        Err(AppError::HardwareFault("permission denied".into()))
    });

    assert!(matches!(driver, LineDriver::Simulated { .. }));
    assert!(buttons.is_empty());
    for index in 0..3 {
        assert_eq!(driver.mode_of(index).unwrap(), Mode::Simulation);
        assert_eq!(driver.read(index).unwrap(), Some(0));
    }
}

#[test]
fn hardware_init_claims_every_line_low() {
    let pins = sample_pins();
    let backend = Arc::new(MockGpioBackend::default());
    let (driver, buttons) = LineDriver::hardware(backend.clone(), &pins, DEBOUNCE);

    assert_eq!(driver.active_mode(), Mode::Hardware);
    for index in 0..3 {
        assert_eq!(backend.output_value(index), Some(0));
        assert_eq!(driver.mode_of(index).unwrap(), Mode::Hardware);
    }
    let armed: Vec<u32> = buttons.iter().map(|b| b.index).collect();
    assert_eq!(armed, vec![0, 2]);
    assert!(backend.is_input_claimed(0));
    assert!(backend.is_input_claimed(2));
}

#[test]
fn detect_uses_acquired_backend() {
    let pins = sample_pins();
    let platform = Platform {
        os: "linux",
        arch: "aarch64",
    };
    let (driver, buttons) =
        LineDriver::detect(&pins, &platform, DEBOUNCE, || Ok(MockGpioBackend::default()));

    assert!(matches!(driver, LineDriver::Hardware { .. }));
    assert_eq!(buttons.len(), 2);
    assert_eq!(driver.active_mode(), Mode::Hardware);
}

#[test]
fn failed_line_init_falls_back_per_line() {
    let pins = sample_pins();
    let backend = Arc::new(MockGpioBackend::default());
    backend.fail_claim_output(1);
    backend.fail_claim_input(2);
    let (driver, buttons) = LineDriver::hardware(backend.clone(), &pins, DEBOUNCE);

    assert_eq!(driver.mode_of(0).unwrap(), Mode::Hardware);
    assert_eq!(driver.mode_of(1).unwrap(), Mode::Simulation);
    assert_eq!(driver.mode_of(2).unwrap(), Mode::Hardware);
    assert_eq!(driver.active_mode(), Mode::Hardware);

    driver.write(1, 1).unwrap();
    assert_eq!(driver.read(1).unwrap(), Some(1));
    assert_eq!(backend.output_value(1), None);

    let armed: Vec<u32> = buttons.iter().map(|b| b.index).collect();
    assert_eq!(armed, vec![0]);
}

#[test]
fn aggregate_mode_is_simulation_when_no_line_is_hardware() {
    let pins = sample_pins();
    let backend = Arc::new(MockGpioBackend::default());
    for index in 0..3 {
        backend.fail_claim_output(index);
    }
    let (driver, _) = LineDriver::hardware(backend, &pins, DEBOUNCE);

    assert!(matches!(driver, LineDriver::Hardware { .. }));
    assert_eq!(driver.active_mode(), Mode::Simulation);
}

#[test]
fn write_read_round_trip_on_both_variants() {
    let backend = Arc::new(MockGpioBackend::default());
    let pins = sample_pins();
    let (hardware, _) = LineDriver::hardware(backend.clone(), &pins, DEBOUNCE);
    let simulated = LineDriver::<MockGpioBackend>::simulated(pins.len());

    for driver in [&hardware, &simulated] {
        for index in 0..3 {
            for state in [1, 0, 1] {
                driver.write(index, state).unwrap();
                assert_eq!(driver.read(index).unwrap(), Some(state));
            }
        }
    }
    assert_eq!(backend.output_value(2), Some(1));
}

#[test]
fn invalid_writes_leave_state_untouched() {
    let backend = Arc::new(MockGpioBackend::default());
    let pins = sample_pins();
    let (driver, _) = LineDriver::hardware(backend.clone(), &pins, DEBOUNCE);
    driver.write(0, 1).unwrap();

    assert!(matches!(driver.write(0, 2), Err(AppError::InvalidState(_))));
    assert!(matches!(driver.write(3, 1), Err(AppError::OutOfRange { .. })));
    assert!(matches!(driver.read(3), Err(AppError::OutOfRange { .. })));
    assert!(matches!(driver.mode_of(3), Err(AppError::OutOfRange { .. })));

    backend.fail_write(0);
    assert!(matches!(driver.write(0, 0), Err(AppError::HardwareFault(_))));
    assert_eq!(driver.read(0).unwrap(), Some(1));

    backend.clear_faults();
    driver.write(0, 0).unwrap();
    assert_eq!(backend.output_value(0), Some(0));
}

#[test]
fn service_set_state_echoes_pin_and_mode() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.fail_claim_output(1);
    let (service, _dir) = hardware_service(backend);

    let status = service.set_state(0, 1).unwrap();
    assert_eq!((status.index, status.pin, status.state), (0, 19, Some(1)));
    assert_eq!(status.mode, Mode::Hardware);

    let status = service.set_state(1, 1).unwrap();
    assert_eq!(status.mode, Mode::Simulation);

    let again = service.set_state(1, 1).unwrap();
    assert_eq!(again.state, Some(1));
    assert_eq!(service.get_state(1).unwrap().state, Some(1));
}

#[test]
fn service_rejects_out_of_range_without_mutation() {
    let (service, _dir) = hardware_service(Arc::new(MockGpioBackend::default()));

    assert!(matches!(service.set_state(3, 1), Err(AppError::OutOfRange { .. })));
    assert!(matches!(service.get_state(3), Err(AppError::OutOfRange { .. })));
    assert!(matches!(service.toggle(7), Err(AppError::OutOfRange { .. })));
    assert!(matches!(service.set_label(3, "x"), Err(AppError::OutOfRange { .. })));
    assert!(matches!(service.get_label(3), Err(AppError::OutOfRange { .. })));

    let all = service.get_all_states();
    assert!(all.states.values().all(|s| *s == Some(0)));
    assert_eq!(all.states.len(), 3);
}

#[test]
fn get_all_states_isolates_read_failures() {
    let backend = Arc::new(MockGpioBackend::default());
    let (service, _dir) = hardware_service(backend.clone());
    service.set_state(0, 1).unwrap();
    service.set_state(2, 1).unwrap();
    backend.fail_read(1);

    let all = service.get_all_states();
    assert_eq!(all.states.get(&0), Some(&Some(1)));
    assert_eq!(all.states.get(&1), Some(&None));
    assert_eq!(all.states.get(&2), Some(&Some(1)));
    assert_eq!(all.mode, Mode::Hardware);

    assert_eq!(service.get_state(1).unwrap().state, None);
}

#[test]
fn toggle_flips_and_treats_unknown_as_low() {
    let backend = Arc::new(MockGpioBackend::default());
    let (service, _dir) = hardware_service(backend.clone());

    assert_eq!(service.toggle(0).unwrap(), 1);
    assert_eq!(service.toggle(0).unwrap(), 0);

    service.set_state(1, 1).unwrap();
    backend.fail_read(1);
    assert_eq!(service.toggle(1).unwrap(), 1);
    assert_eq!(backend.output_value(1), Some(1));
}

#[test]
fn state_changes_are_published() {
    let (service, _dir) = hardware_service(Arc::new(MockGpioBackend::default()));
    let mut rx = service.subscribe();

    service.set_state(2, 1).unwrap();
    service.toggle(2).unwrap();

    let first = rx.try_recv().unwrap();
    assert_eq!((first.index, first.state, first.source), (2, 1, ChangeSource::Api));
    let second = rx.try_recv().unwrap();
    assert_eq!((second.index, second.state, second.source), (2, 0, ChangeSource::Button));
}

#[test]
fn shutdown_drives_low_and_releases_everything() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.fail_claim_output(1);
    let (service, _dir) = hardware_service(backend.clone());
    service.set_state(0, 1).unwrap();
    service.set_state(2, 1).unwrap();
    backend.fail_release(0);

    service.shutdown();

    // relay 0 failed to release but the sweep carried on
    assert_eq!(backend.output_value(0), Some(0));
    assert_eq!(backend.released_value(0), None);
    assert_eq!(backend.released_value(1), None);
    assert_eq!(backend.released_value(2), Some(0));
    assert_eq!(backend.output_value(2), None);
    assert!(backend.is_input_claimed(0));
    assert!(!backend.is_input_claimed(2));
}

#[test]
fn unreleased_line_stays_hardware_after_shutdown() {
    let backend = Arc::new(MockGpioBackend::default());
    let pins = sample_pins();
    let (driver, _) = LineDriver::hardware(backend.clone(), &pins, DEBOUNCE);
    backend.fail_release(1);

    driver.shutdown();

    assert_eq!(driver.mode_of(0).unwrap(), Mode::Simulation);
    assert_eq!(driver.mode_of(1).unwrap(), Mode::Hardware);
    assert_eq!(driver.mode_of(2).unwrap(), Mode::Simulation);
    assert_eq!(driver.active_mode(), Mode::Hardware);

    // a later sweep retries the line that is still claimed
    backend.clear_faults();
    driver.shutdown();
    assert_eq!(backend.released_value(1), Some(0));
    assert_eq!(driver.active_mode(), Mode::Simulation);
}

#[test]
fn concurrent_toggles_are_serialized_per_line() {
    let backend = Arc::new(MockGpioBackend::default());
    let (service, _dir) = hardware_service(backend.clone());

    // 8 workers x 25 toggles on one line is an even count
    thread::scope(|scope| {
        for _ in 0..8 {
            let service = &service;
            scope.spawn(move || {
                for _ in 0..25 {
                    service.toggle(0).unwrap();
                    service.toggle(2).unwrap();
                }
            });
        }
    });

    assert_eq!(service.get_state(0).unwrap().state, Some(0));
    assert_eq!(service.get_state(2).unwrap().state, Some(0));
    assert_eq!(backend.output_value(0), Some(0));
    assert_eq!(backend.output_value(2), Some(0));
}

#[test]
fn concurrent_toggles_on_simulated_lines() {
    let pins = sample_pins();
    let driver = LineDriver::<MockGpioBackend>::simulated(pins.len());

    thread::scope(|scope| {
        for _ in 0..6 {
            let driver = &driver;
            scope.spawn(move || {
                for _ in 0..51 {
                    driver
                        .modify(1, |current| if current == Some(1) { 0 } else { 1 })
                        .unwrap();
                }
            });
        }
    });

    // 306 flips total
    assert_eq!(driver.read(1).unwrap(), Some(0));
}
