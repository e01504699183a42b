use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::engine::queue::AssignmentJob;
use crate::engine::release::{LoggingRelease, PaymentRelease};
use crate::models::event::DeliveryEvent;
use crate::observability::metrics::Metrics;
use crate::store::DeliveryStore;

pub struct AppState {
    pub config: Config,
    pub store: DeliveryStore,
    pub clock: Arc<dyn Clock>,
    pub payments: Arc<dyn PaymentRelease>,
    pub assignment_tx: mpsc::Sender<AssignmentJob>,
    pub events_tx: broadcast::Sender<DeliveryEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        config: Config,
        clock: Arc<dyn Clock>,
        payments: Arc<dyn PaymentRelease>,
    ) -> (Self, mpsc::Receiver<AssignmentJob>) {
        let (assignment_tx, assignment_rx) = mpsc::channel(config.assignment_queue_size);
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        (
            Self {
                config,
                store: DeliveryStore::new(),
                clock,
                payments,
                assignment_tx,
                events_tx,
                metrics: Metrics::new(),
            },
            assignment_rx,
        )
    }

    pub fn with_config(config: Config) -> (Self, mpsc::Receiver<AssignmentJob>) {
        Self::new(config, Arc::new(SystemClock), Arc::new(LoggingRelease))
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn publish(&self, event: DeliveryEvent) {
        if self.events_tx.send(event).is_err() {
            tracing::trace!("no subscribers for delivery event");
        }
    }
}
