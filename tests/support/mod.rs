#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use chrono::{TimeZone, Utc};
use courier_handoff::api::rest::router;
use courier_handoff::clock::ManualClock;
use courier_handoff::config::Config;
use courier_handoff::engine::queue::AssignmentJob;
use courier_handoff::engine::release::{PaymentRelease, ReleaseError};
use courier_handoff::models::picker::{GeoPoint, Picker, PickerStatus, PickerType};
use courier_handoff::state::AppState;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const CAMPUS_GATE: GeoPoint = GeoPoint {
    lat: 6.5244,
    lng: 3.3792,
};

#[derive(Default)]
pub struct RecordingRelease {
    calls: DashMap<Uuid, usize>,
    failures_left: AtomicUsize,
}

impl RecordingRelease {
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self, order_id: Uuid) -> usize {
        self.calls.get(&order_id).map(|count| *count).unwrap_or(0)
    }
}

impl PaymentRelease for RecordingRelease {
    fn release_funds(&self, order_id: Uuid) -> BoxFuture<'static, Result<(), ReleaseError>> {
        *self.calls.entry(order_id).or_insert(0) += 1;
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        Box::pin(async move {
            if fail {
                Err(ReleaseError("gateway unavailable".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

pub struct TestApp {
    pub app: axum::Router,
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub payments: Arc<RecordingRelease>,
    pub jobs: mpsc::Receiver<AssignmentJob>,
}

pub fn setup() -> TestApp {
    setup_with(Config::default())
}

pub fn setup_with(config: Config) -> TestApp {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
    ));
    let payments = Arc::new(RecordingRelease::default());
    let (state, jobs) = AppState::new(config, clock.clone(), payments.clone());
    let state = Arc::new(state);

    TestApp {
        app: router(state.clone()),
        state,
        clock,
        payments,
        jobs,
    }
}

pub fn add_pickers(state: &AppState, n: usize) -> Vec<Picker> {
    (0..n)
        .map(|i| {
            let picker = Picker {
                id: Uuid::new_v4(),
                name: format!("rider-{i:02}"),
                phone: format!("+23481000000{i:02}"),
                picker_type: PickerType::Picker,
                location: CAMPUS_GATE,
                status: PickerStatus::Available,
                completed_deliveries: 0,
                updated_at: Utc::now(),
            };
            state.store.insert_picker(picker.clone());
            picker
        })
        .collect()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
