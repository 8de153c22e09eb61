use std::sync::Arc;
use std::time::Duration;

use actix_web::rt;
use log::{debug, error, info};
use tokio::task::JoinHandle;

use crate::gpio::{ButtonLine, Edge, GpioBackend};
use crate::service::RelayService;

/// Turns debounced button presses into relay toggles, one task per button.
pub struct ButtonWatcher;

impl ButtonWatcher {
    pub fn spawn<B: GpioBackend + 'static>(
        service: Arc<RelayService<B>>,
        buttons: Vec<ButtonLine>,
        debounce: Duration,
    ) -> Vec<JoinHandle<()>> {
        buttons
            .into_iter()
            .map(|button| {
                let service = service.clone();
                rt::spawn(Self::watch(service, button, debounce))
            })
            .collect()
    }

    /// A falling edge opens a debounce window; edges arriving inside it are
    /// folded into that one press, which fires a single toggle.
    pub async fn watch<B: GpioBackend>(
        service: Arc<RelayService<B>>,
        mut button: ButtonLine,
        debounce: Duration,
    ) {
        let index = button.index;
        info!(
            "Watching button {index} on {} line {}",
            button.pin.chip, button.pin.line
        );

        while let Some(event) = button.events.recv().await {
            if event.edge != Edge::Falling {
                continue;
            }

            tokio::time::sleep(debounce).await;
            let mut coalesced = 0usize;
            while button.events.try_recv().is_ok() {
                coalesced += 1;
            }
            if coalesced > 0 {
                debug!("button {index}: {coalesced} bouncing edges ignored");
            }

            match service.toggle(index) {
                Ok(state) => info!("Button {index} toggled relay to {state}"),
                Err(e) => error!("Button {index} failed to toggle relay: {e}"),
            }
        }

        debug!("button {index} released, watcher stopped");
    }
}
