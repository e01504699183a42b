mod support;

use std::sync::Arc;

use courier_handoff::engine::arbiter::accept;
use courier_handoff::engine::assignment::create_opportunities;
use courier_handoff::engine::delivery::{mark_paid, place_order, NewOrder};
use courier_handoff::error::{AppError, ResolvedReason};
use courier_handoff::models::opportunity::{OpportunityStatus, SelectionPolicy};
use courier_handoff::models::order::OrderStatus;
use courier_handoff::state::AppState;
use courier_handoff::store::RiderSnapshot;
use tokio::sync::Barrier;
use uuid::Uuid;

use support::{add_pickers, setup, CAMPUS_GATE};

const RIDERS: usize = 16;

async fn paid_order(state: &AppState) -> Uuid {
    let order = place_order(
        state,
        NewOrder {
            customer_name: "Halima".to_string(),
            total_amount: 9_000,
            shipping_fee: 700,
            vendor_ids: vec![Uuid::new_v4()],
            pickup: CAMPUS_GATE,
            dropoff: CAMPUS_GATE,
        },
    )
    .unwrap();
    mark_paid(state, order.id).await.unwrap();
    order.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_accepts_produce_exactly_one_winner() {
    let t = setup();
    add_pickers(&t.state, RIDERS);

    for _ in 0..25 {
        let order_id = paid_order(&t.state).await;
        let opportunities =
            create_opportunities(&t.state, order_id, SelectionPolicy::AllEligible.into()).unwrap();
        assert_eq!(opportunities.len(), RIDERS);

        let barrier = Arc::new(Barrier::new(RIDERS));
        let handles: Vec<_> = opportunities
            .iter()
            .enumerate()
            .map(|(i, opportunity)| {
                let state = t.state.clone();
                let barrier = barrier.clone();
                let code = opportunity.opportunity_code.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    accept(
                        &state,
                        &code,
                        RiderSnapshot {
                            rider_name: format!("rider {i}"),
                            rider_phone: "+2348030000000".to_string(),
                            pickup_time: "now".to_string(),
                        },
                    )
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(outcome) => {
                    winners += 1;
                    assert_eq!(outcome.other_opportunities_cancelled, RIDERS - 1);
                }
                Err(AppError::AlreadyResolved(ResolvedReason::AcceptedByOther)) => {}
                Err(other) => panic!("unexpected accept error: {other}"),
            }
        }
        assert_eq!(winners, 1);

        let rows = t.state.store.opportunities_for(order_id);
        let accepted = rows
            .iter()
            .filter(|row| row.status == OpportunityStatus::Accepted)
            .count();
        let cancelled = rows
            .iter()
            .filter(|row| row.status == OpportunityStatus::Cancelled)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(cancelled, RIDERS - 1);
        assert_eq!(
            t.state.store.order(order_id).unwrap().status,
            OrderStatus::InTransit
        );

        // Free everyone up for the next round.
        for picker in t.state.store.pickers() {
            t.state.store.update_picker(picker.id, |p| {
                p.status = courier_handoff::models::picker::PickerStatus::Available
            });
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_code_accepted_twice_concurrently_has_one_winner() {
    let t = setup();
    add_pickers(&t.state, 1);
    let order_id = paid_order(&t.state).await;
    let code = create_opportunities(&t.state, order_id, SelectionPolicy::AllEligible.into())
        .unwrap()[0]
        .opportunity_code
        .clone();

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let state = t.state.clone();
            let barrier = barrier.clone();
            let code = code.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                accept(
                    &state,
                    &code,
                    RiderSnapshot {
                        rider_name: format!("double tap {i}"),
                        rider_phone: "+2348030000000".to_string(),
                        pickup_time: "now".to_string(),
                    },
                )
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(AppError::AlreadyResolved(ResolvedReason::AlreadyAccepted)) => {}
            Err(other) => panic!("unexpected accept error: {other}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(t.state.store.acceptance_count(), 1);
}
