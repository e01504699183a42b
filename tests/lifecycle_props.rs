mod support;

use chrono::Duration;
use courier_handoff::engine::arbiter::accept;
use courier_handoff::engine::assignment::create_opportunities;
use courier_handoff::engine::delivery::{
    cancel_order, confirm_delivery, confirm_receipt, mark_paid, mark_picked_up, place_order,
    NewOrder,
};
use courier_handoff::engine::sweeper::sweep_once;
use courier_handoff::models::opportunity::{OpportunityStatus, SelectionPolicy};
use courier_handoff::store::RiderSnapshot;
use proptest::prelude::*;
use uuid::Uuid;

use support::{add_pickers, setup, CAMPUS_GATE};

#[derive(Debug, Clone)]
enum Op {
    Pay,
    OpenRound,
    Accept(usize),
    Advance(i64),
    Sweep,
    Pickup,
    ConfirmDelivery,
    ConfirmReceipt,
    Cancel,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Pay),
        Just(Op::OpenRound),
        (0usize..3).prop_map(Op::Accept),
        (1i64..15).prop_map(Op::Advance),
        Just(Op::Sweep),
        Just(Op::Pickup),
        Just(Op::ConfirmDelivery),
        Just(Op::ConfirmReceipt),
        Just(Op::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn order_status_never_moves_backwards(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let t = setup();
            add_pickers(&t.state, 3);
            let order_id = place_order(
                &t.state,
                NewOrder {
                    customer_name: "Zainab".to_string(),
                    total_amount: 5_000,
                    shipping_fee: 400,
                    vendor_ids: vec![Uuid::new_v4()],
                    pickup: CAMPUS_GATE,
                    dropoff: CAMPUS_GATE,
                },
            )
            .unwrap()
            .id;

            let mut codes: Vec<String> = Vec::new();
            let mut delivery_code: Option<String> = None;
            let mut customer_code: Option<String> = None;
            let mut last_rank = t.state.store.order(order_id).unwrap().status.rank();

            for op in ops {
                // Every call may legitimately fail; only the invariants matter.
                match op {
                    Op::Pay => {
                        let _ = mark_paid(&t.state, order_id).await;
                    }
                    Op::OpenRound => {
                        if let Ok(round) =
                            create_opportunities(&t.state, order_id, SelectionPolicy::AllEligible.into())
                        {
                            codes = round.into_iter().map(|o| o.opportunity_code).collect();
                        }
                    }
                    Op::Accept(i) => {
                        if let Some(code) = codes.get(i) {
                            let rider = RiderSnapshot {
                                rider_name: "Prop".to_string(),
                                rider_phone: "+2348030000000".to_string(),
                                pickup_time: "soon".to_string(),
                            };
                            if let Ok(won) = accept(&t.state, code, rider) {
                                delivery_code = Some(won.acceptance.delivery_confirmation_code);
                            }
                        }
                    }
                    Op::Advance(minutes) => t.clock.advance(Duration::minutes(minutes)),
                    Op::Sweep => {
                        sweep_once(&t.state).await;
                    }
                    Op::Pickup => {
                        if let Some(code) = &delivery_code {
                            let _ = mark_picked_up(&t.state, code);
                        }
                    }
                    Op::ConfirmDelivery => {
                        if let Some(code) = &delivery_code {
                            if let Ok(done) = confirm_delivery(&t.state, code) {
                                customer_code = Some(done.customer_confirmation_code);
                            }
                        }
                    }
                    Op::ConfirmReceipt => {
                        if let Some(code) = &customer_code {
                            let _ = confirm_receipt(&t.state, code).await;
                        }
                    }
                    Op::Cancel => {
                        let _ = cancel_order(&t.state, order_id, None);
                    }
                }

                let order = t.state.store.order(order_id).unwrap();
                let rank = order.status.rank();
                assert!(rank >= last_rank, "status regressed to {:?}", order.status);
                last_rank = rank;

                let accepted = t
                    .state
                    .store
                    .opportunities_for(order_id)
                    .iter()
                    .filter(|o| o.status == OpportunityStatus::Accepted)
                    .count();
                assert!(accepted <= 1);
                assert!(t.payments.calls(order_id) <= 1);
            }
        });
    }
}
