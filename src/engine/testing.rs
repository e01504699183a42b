//! Fixtures shared by the engine's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::clock::ManualClock;
use crate::config::Config;
use crate::engine::arbiter::accept;
use crate::engine::assignment::create_opportunities;
use crate::engine::delivery::{confirm_delivery, confirm_receipt};
use crate::engine::queue::AssignmentJob;
use crate::engine::release::{PaymentRelease, ReleaseError};
use crate::models::opportunity::SelectionPolicy;
use crate::models::order::{build_order_number, Order, OrderStatus, ReleaseState};
use crate::models::picker::{GeoPoint, Picker, PickerStatus, PickerType};
use crate::state::AppState;
use crate::store::RiderSnapshot;

pub const CAMPUS_GATE: GeoPoint = GeoPoint {
    lat: 6.5244,
    lng: 3.3792,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

/// Payment gateway double that counts calls and fails or hangs on request.
#[derive(Default)]
pub struct RecordingRelease {
    calls: DashMap<Uuid, usize>,
    failures_left: AtomicUsize,
    hangs_left: AtomicUsize,
}

impl RecordingRelease {
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls never answer.
    pub fn hang_next(&self, n: usize) {
        self.hangs_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self, order_id: Uuid) -> usize {
        self.calls.get(&order_id).map(|count| *count).unwrap_or(0)
    }
}

impl PaymentRelease for RecordingRelease {
    fn release_funds(&self, order_id: Uuid) -> BoxFuture<'static, Result<(), ReleaseError>> {
        *self.calls.entry(order_id).or_insert(0) += 1;
        if take_one(&self.hangs_left) {
            return Box::pin(future::pending());
        }
        let fail = take_one(&self.failures_left);

        Box::pin(async move {
            if fail {
                Err(ReleaseError("gateway unavailable".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub payments: Arc<RecordingRelease>,
    jobs: Option<mpsc::Receiver<AssignmentJob>>,
}

impl Harness {
    pub fn take_jobs(&mut self) -> mpsc::Receiver<AssignmentJob> {
        self.jobs.take().expect("assignment receiver already taken")
    }

    pub fn try_next_job(&mut self) -> Option<AssignmentJob> {
        self.jobs.as_mut()?.try_recv().ok()
    }
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let payments = Arc::new(RecordingRelease::default());
    let (state, jobs) = AppState::new(config, clock.clone(), payments.clone());

    Harness {
        state: Arc::new(state),
        clock,
        payments,
        jobs: Some(jobs),
    }
}

/// A PAID single-vendor order picking up at `pickup`. Not stored.
pub fn order_at(pickup: GeoPoint) -> Order {
    let id = Uuid::new_v4();
    Order {
        id,
        order_number: build_order_number(id, t0()),
        status: OrderStatus::Paid,
        customer_name: "Amaka".to_string(),
        total_amount: 12_500,
        shipping_fee: 800,
        vendor_ids: vec![Uuid::new_v4()],
        pickup,
        dropoff: GeoPoint {
            lat: 6.5158,
            lng: 3.3896,
        },
        customer_confirmation_code: None,
        accepted_opportunity_id: None,
        assignment_round: 0,
        last_assignment: None,
        release_state: ReleaseState::NotDue,
        release_attempts: 0,
        next_release_attempt_at: None,
        created_at: t0(),
        updated_at: t0(),
        paid_at: Some(t0()),
        completed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
    }
}

pub fn paid_order(state: &AppState) -> Order {
    let order = order_at(CAMPUS_GATE);
    state.store.insert_order(order.clone());
    order
}

/// Registers `n` available pickers near the campus gate, named so that
/// name order matches registration order.
pub fn register_pickers(state: &AppState, n: usize) -> Vec<Picker> {
    (0..n)
        .map(|i| {
            let picker = Picker {
                id: Uuid::new_v4(),
                name: format!("picker-{i:02}"),
                phone: format!("+23480000000{i:02}"),
                picker_type: PickerType::Picker,
                location: GeoPoint {
                    lat: CAMPUS_GATE.lat + 0.001 * i as f64,
                    lng: CAMPUS_GATE.lng,
                },
                status: PickerStatus::Available,
                completed_deliveries: 0,
                updated_at: t0(),
            };
            state.store.insert_picker(picker.clone());
            picker
        })
        .collect()
}

pub fn rider(name: &str) -> RiderSnapshot {
    RiderSnapshot {
        rider_name: name.to_string(),
        rider_phone: "+2348031234567".to_string(),
        pickup_time: "14:30".to_string(),
    }
}

/// Drives a fresh order to DELIVERED and returns its id and the customer's
/// confirmation code.
pub fn delivered_order(state: &AppState) -> (Uuid, String) {
    let pickers = register_pickers(state, 1);
    let order = paid_order(state);
    let opportunities = create_opportunities(
        state,
        order.id,
        SelectionPolicy::Manual {
            picker_ids: vec![pickers[0].id],
        }
        .into(),
    )
    .unwrap();

    let won = accept(state, &opportunities[0].opportunity_code, rider("Chidi")).unwrap();
    let delivered = confirm_delivery(state, &won.acceptance.delivery_confirmation_code).unwrap();
    (order.id, delivered.customer_confirmation_code)
}

/// Drives a fresh order all the way to COMPLETED and returns its id.
pub async fn completed_order(state: &Arc<AppState>) -> Uuid {
    let (order_id, customer_code) = delivered_order(state);
    confirm_receipt(state, &customer_code).await.unwrap();
    order_id
}
