//! Lock order: order entry first, then at most one guard in any other map.
//! Opportunity rows change only by compare-and-set on `Pending`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::codes::{CodePurpose, CodeRegistry};
use crate::error::{AppError, PreconditionReason, ResolvedReason};
use crate::models::acceptance::{CustomerReceiptConfirmation, DeliveryAcceptance};
use crate::models::opportunity::{AssignmentRequest, DeliveryOpportunity, OpportunityStatus};
use crate::models::order::{Order, OrderStatus, ReleaseState};
use crate::models::picker::Picker;

const MAX_RELEASE_BACKOFF_SECS: i64 = 3_600;

#[derive(Debug, Clone)]
pub struct RiderSnapshot {
    pub rider_name: String,
    pub rider_phone: String,
    pub pickup_time: String,
}

#[derive(Debug, Clone)]
pub struct AcceptanceCommit {
    pub acceptance: DeliveryAcceptance,
    pub order: Order,
    pub cancelled: Vec<DeliveryOpportunity>,
}

#[derive(Debug, Clone)]
pub struct DeliveryCommit {
    pub order: Order,
    pub acceptance: DeliveryAcceptance,
    pub customer_confirmation_code: String,
    pub already_confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct ReceiptCommit {
    pub order: Order,
    pub already_confirmed: bool,
    pub release_due: bool,
}

#[derive(Debug, Clone)]
pub struct CancelCommit {
    pub order: Order,
    pub cancelled: Vec<DeliveryOpportunity>,
    pub changed: bool,
    pub assigned_picker: Option<Uuid>,
}

#[derive(Default)]
pub struct DeliveryStore {
    orders: DashMap<Uuid, Order>,
    opportunities: DashMap<Uuid, DeliveryOpportunity>,
    order_opportunities: DashMap<Uuid, Vec<Uuid>>,
    acceptances: DashMap<Uuid, DeliveryAcceptance>,
    receipts: DashMap<Uuid, CustomerReceiptConfirmation>,
    pickers: DashMap<Uuid, Picker>,
    reassigned_rounds: DashMap<Uuid, u32>,
    codes: CodeRegistry,
}

impl DeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `tx` while holding the order's row lock.
    fn transact<T>(
        &self,
        order_id: Uuid,
        tx: impl FnOnce(&mut Order) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        tx(order.value_mut())
    }

    pub fn insert_order(&self, order: Order) {
        self.orders.insert(order.id, order);
    }

    pub fn order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.get(&order_id).map(|entry| entry.value().clone())
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn opportunity(&self, opportunity_id: Uuid) -> Option<DeliveryOpportunity> {
        self.opportunities
            .get(&opportunity_id)
            .map(|entry| entry.value().clone())
    }

    pub fn opportunity_by_code(&self, code: &str) -> Option<DeliveryOpportunity> {
        let id = self.codes.resolve(code, CodePurpose::Opportunity)?;
        self.opportunity(id)
    }

    pub fn opportunity_count(&self) -> usize {
        self.opportunities.len()
    }

    pub fn opportunities_for(&self, order_id: Uuid) -> Vec<DeliveryOpportunity> {
        let ids = self
            .order_opportunities
            .get(&order_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        ids.into_iter().filter_map(|id| self.opportunity(id)).collect()
    }

    pub fn acceptance(&self, order_id: Uuid) -> Option<DeliveryAcceptance> {
        self.acceptances.get(&order_id).map(|entry| entry.value().clone())
    }

    pub fn acceptance_count(&self) -> usize {
        self.acceptances.len()
    }

    pub fn receipt(&self, order_id: Uuid) -> Option<CustomerReceiptConfirmation> {
        self.receipts.get(&order_id).map(|entry| entry.value().clone())
    }

    pub fn receipt_count(&self) -> usize {
        self.receipts.len()
    }

    pub fn resolve_code(&self, code: &str, purpose: CodePurpose) -> Option<Uuid> {
        self.codes.resolve(code, purpose)
    }

    pub fn code_purpose(&self, code: &str) -> Option<CodePurpose> {
        self.codes.purpose_of(code)
    }

    pub fn insert_picker(&self, picker: Picker) {
        self.pickers.insert(picker.id, picker);
    }

    pub fn picker(&self, picker_id: Uuid) -> Option<Picker> {
        self.pickers.get(&picker_id).map(|entry| entry.value().clone())
    }

    pub fn pickers(&self) -> Vec<Picker> {
        self.pickers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn picker_count(&self) -> usize {
        self.pickers.len()
    }

    pub fn update_picker(&self, picker_id: Uuid, update: impl FnOnce(&mut Picker)) -> Option<Picker> {
        let mut picker = self.pickers.get_mut(&picker_id)?;
        update(picker.value_mut());
        Some(picker.clone())
    }

    pub fn mark_paid(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<(Order, bool), AppError> {
        self.transact(order_id, |order| match order.status {
            OrderStatus::PendingPayment => {
                order.transition(OrderStatus::Paid, now)?;
                Ok((order.clone(), true))
            }
            OrderStatus::Cancelled => Err(AppError::InvalidState(format!(
                "order {} was cancelled",
                order.order_number
            ))),
            _ => Ok((order.clone(), false)),
        })
    }

    pub fn open_round(
        &self,
        order_id: Uuid,
        pickers: &[Picker],
        request: &AssignmentRequest,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeliveryOpportunity>, AppError> {
        self.transact(order_id, |order| {
            if !order.is_assignable() {
                return Err(AppError::InvalidState(format!(
                    "order {} is {:?} and cannot be assigned",
                    order.order_number, order.status
                )));
            }

            let existing = self
                .order_opportunities
                .get(&order.id)
                .map(|ids| ids.clone())
                .unwrap_or_default();

            let live_round = existing.iter().any(|id| {
                self.opportunities
                    .get(id)
                    .is_some_and(|opportunity| opportunity.is_live(now))
            });
            if live_round {
                return Err(AppError::InvalidState(format!(
                    "order {} already has a live round of opportunities",
                    order.order_number
                )));
            }

            let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
                AppError::Internal(format!("opportunity ttl {ttl} overflows the clock"))
            })?;

            let mut reserved: Vec<(Uuid, String, &Picker)> = Vec::with_capacity(pickers.len());
            for picker in pickers {
                let id = Uuid::new_v4();
                match self.codes.issue(CodePurpose::Opportunity, id) {
                    Ok(code) => reserved.push((id, code, picker)),
                    Err(err) => {
                        for (_, code, _) in &reserved {
                            self.codes.release(code);
                        }
                        return Err(err);
                    }
                }
            }

            for id in &existing {
                self.expire_if_due(*id, now);
            }

            let round = order.assignment_round + 1;
            let opportunities: Vec<DeliveryOpportunity> = reserved
                .into_iter()
                .map(|(id, code, picker)| DeliveryOpportunity {
                    id,
                    order_id: order.id,
                    opportunity_code: code,
                    picker_id: picker.id,
                    picker_type: picker.picker_type,
                    status: OpportunityStatus::Pending,
                    round,
                    policy: request.policy.name().to_string(),
                    created_at: now,
                    expires_at,
                    resolved_at: None,
                })
                .collect();

            for opportunity in &opportunities {
                self.opportunities.insert(opportunity.id, opportunity.clone());
            }
            self.order_opportunities
                .entry(order.id)
                .or_default()
                .extend(opportunities.iter().map(|opportunity| opportunity.id));

            order.assignment_round = round;
            order.last_assignment = Some(request.clone());
            order.updated_at = now;

            Ok(opportunities)
        })
    }

    /// Safe without the order lock.
    pub fn expire_if_due(&self, opportunity_id: Uuid, now: DateTime<Utc>) -> Option<DeliveryOpportunity> {
        let mut opportunity = self.opportunities.get_mut(&opportunity_id)?;
        if opportunity.status != OpportunityStatus::Pending || !opportunity.is_past_expiry(now) {
            return None;
        }

        opportunity.status = OpportunityStatus::Expired;
        opportunity.resolved_at = Some(now);
        Some(opportunity.clone())
    }

    pub fn pending_past_expiry(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.opportunities
            .iter()
            .filter(|entry| {
                entry.status == OpportunityStatus::Pending && entry.is_past_expiry(now)
            })
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn round_exhausted(&self, order_id: Uuid, now: DateTime<Utc>) -> bool {
        let Some(order) = self.order(order_id) else {
            return false;
        };
        order.is_assignable()
            && !self
                .opportunities_for(order_id)
                .iter()
                .any(|opportunity| opportunity.is_live(now))
    }

    pub fn reassignment_candidates(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let candidates: Vec<Uuid> = self
            .orders
            .iter()
            .filter(|entry| entry.assignment_round > 0 && entry.is_assignable())
            .map(|entry| *entry.key())
            .collect();

        candidates
            .into_iter()
            .filter(|order_id| self.round_exhausted(*order_id, now))
            .collect()
    }

    /// Only the first caller per round gets the order back.
    pub fn claim_reassignment(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<Option<Order>, AppError> {
        self.transact(order_id, |order| {
            if order.assignment_round == 0 || !order.is_assignable() {
                return Ok(None);
            }
            let live = self
                .order_opportunities
                .get(&order.id)
                .map(|ids| ids.clone())
                .unwrap_or_default()
                .iter()
                .any(|id| {
                    self.opportunities
                        .get(id)
                        .is_some_and(|opportunity| opportunity.is_live(now))
                });
            if live {
                return Ok(None);
            }

            let round = order.assignment_round;
            let previous = self.reassigned_rounds.insert(order.id, round);
            if previous == Some(round) {
                return Ok(None);
            }
            Ok(Some(order.clone()))
        })
    }

    /// First commit per order wins; siblings are cancelled in the same transaction.
    pub fn commit_acceptance(
        &self,
        opportunity_id: Uuid,
        rider: RiderSnapshot,
        auto_in_transit: bool,
        now: DateTime<Utc>,
    ) -> Result<AcceptanceCommit, AppError> {
        let order_id = self
            .opportunities
            .get(&opportunity_id)
            .map(|opportunity| opportunity.order_id)
            .ok_or_else(|| AppError::NotFound(format!("opportunity {opportunity_id} not found")))?;

        self.transact(order_id, |order| {
            if order.status == OrderStatus::Cancelled {
                return Err(AppError::InvalidState(format!(
                    "order {} was cancelled",
                    order.order_number
                )));
            }
            if let Some(winner) = order.accepted_opportunity_id {
                let reason = if winner == opportunity_id {
                    ResolvedReason::AlreadyAccepted
                } else {
                    ResolvedReason::AcceptedByOther
                };
                return Err(AppError::AlreadyResolved(reason));
            }
            if !order.is_assignable() {
                return Err(AppError::InvalidState(format!(
                    "order {} is {:?} and cannot be accepted",
                    order.order_number, order.status
                )));
            }

            let code = self.codes.issue(CodePurpose::DeliveryConfirmation, order.id)?;

            let picker_id = {
                let Some(mut own) = self.opportunities.get_mut(&opportunity_id) else {
                    self.codes.release(&code);
                    return Err(AppError::NotFound(format!(
                        "opportunity {opportunity_id} not found"
                    )));
                };
                if let Some(reason) = own.status.resolved_reason(false) {
                    self.codes.release(&code);
                    return Err(AppError::AlreadyResolved(reason));
                }
                if own.is_past_expiry(now) {
                    own.status = OpportunityStatus::Expired;
                    own.resolved_at = Some(now);
                    self.codes.release(&code);
                    return Err(AppError::Expired);
                }

                own.status = OpportunityStatus::Accepted;
                own.resolved_at = Some(now);
                own.picker_id
            };

            let cancelled = self.cancel_pending_siblings(order.id, Some(opportunity_id), now);

            order.accepted_opportunity_id = Some(opportunity_id);
            if order.status == OrderStatus::Paid {
                order.transition(OrderStatus::Assigned, now)?;
            }
            if auto_in_transit {
                order.transition(OrderStatus::InTransit, now)?;
            }
            order.updated_at = now;

            let acceptance = DeliveryAcceptance {
                id: Uuid::new_v4(),
                order_id: order.id,
                opportunity_id,
                picker_id,
                rider_name: rider.rider_name,
                rider_phone: rider.rider_phone,
                pickup_time: rider.pickup_time,
                accepted_at: now,
                delivery_confirmation_code: code,
                delivered_at: None,
            };
            self.acceptances.insert(order.id, acceptance.clone());

            Ok(AcceptanceCommit {
                acceptance,
                order: order.clone(),
                cancelled,
            })
        })
    }

    fn cancel_pending_siblings(
        &self,
        order_id: Uuid,
        keep: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Vec<DeliveryOpportunity> {
        let ids = self
            .order_opportunities
            .get(&order_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let mut cancelled = Vec::new();
        for id in ids.into_iter().filter(|id| Some(*id) != keep) {
            if let Some(mut sibling) = self.opportunities.get_mut(&id) {
                if sibling.status == OpportunityStatus::Pending {
                    sibling.status = OpportunityStatus::Cancelled;
                    sibling.resolved_at = Some(now);
                    cancelled.push(sibling.clone());
                }
            }
        }
        cancelled
    }

    pub fn mark_picked_up(
        &self,
        order_id: Uuid,
        delivery_code: &str,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        self.transact(order_id, |order| {
            let matches = self
                .acceptances
                .get(&order.id)
                .is_some_and(|acceptance| acceptance.delivery_confirmation_code == delivery_code);
            if !matches {
                return Err(AppError::PreconditionFailed(PreconditionReason::InvalidCode));
            }

            match order.status {
                OrderStatus::Assigned => order.transition(OrderStatus::InTransit, now)?,
                OrderStatus::InTransit | OrderStatus::Delivered | OrderStatus::Completed => {}
                OrderStatus::Cancelled => {
                    return Err(AppError::PreconditionFailed(PreconditionReason::OrderCancelled));
                }
                other => {
                    return Err(AppError::InvalidState(format!(
                        "order {} is {other:?}",
                        order.order_number
                    )));
                }
            }
            Ok(order.clone())
        })
    }

    pub fn confirm_delivery(
        &self,
        order_id: Uuid,
        delivery_code: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryCommit, AppError> {
        self.transact(order_id, |order| {
            let mut acceptance = self
                .acceptances
                .get_mut(&order.id)
                .filter(|acceptance| acceptance.delivery_confirmation_code == delivery_code)
                .ok_or(AppError::PreconditionFailed(PreconditionReason::InvalidCode))?;

            if acceptance.delivered_at.is_some() {
                let customer_code = self
                    .receipts
                    .get(&order.id)
                    .map(|receipt| receipt.customer_confirmation_code.clone())
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "order {} delivered without a receipt record",
                            order.order_number
                        ))
                    })?;
                return Ok(DeliveryCommit {
                    order: order.clone(),
                    acceptance: acceptance.clone(),
                    customer_confirmation_code: customer_code,
                    already_confirmed: true,
                });
            }

            match order.status {
                OrderStatus::InTransit => {}
                OrderStatus::Assigned => {
                    return Err(AppError::PreconditionFailed(PreconditionReason::NotPickedUp));
                }
                OrderStatus::Cancelled => {
                    return Err(AppError::PreconditionFailed(PreconditionReason::OrderCancelled));
                }
                other => {
                    return Err(AppError::InvalidState(format!(
                        "order {} is {other:?}",
                        order.order_number
                    )));
                }
            }

            let customer_code = self.codes.issue(CodePurpose::CustomerConfirmation, order.id)?;

            order.transition(OrderStatus::Delivered, now)?;
            order.customer_confirmation_code = Some(customer_code.clone());
            acceptance.delivered_at = Some(now);

            self.receipts.insert(
                order.id,
                CustomerReceiptConfirmation {
                    order_id: order.id,
                    customer_confirmation_code: customer_code.clone(),
                    issued_at: now,
                    confirmed_at: None,
                    already_confirmed: false,
                },
            );

            Ok(DeliveryCommit {
                order: order.clone(),
                acceptance: acceptance.clone(),
                customer_confirmation_code: customer_code,
                already_confirmed: false,
            })
        })
    }

    pub fn confirm_receipt(
        &self,
        order_id: Uuid,
        customer_code: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReceiptCommit, AppError> {
        self.transact(order_id, |order| {
            let mut receipt = self
                .receipts
                .get_mut(&order.id)
                .filter(|receipt| receipt.customer_confirmation_code == customer_code)
                .ok_or(AppError::PreconditionFailed(PreconditionReason::InvalidCode))?;

            if receipt.confirmed_at.is_some() {
                return Ok(ReceiptCommit {
                    order: order.clone(),
                    already_confirmed: true,
                    release_due: false,
                });
            }

            match order.status {
                OrderStatus::Delivered => {}
                OrderStatus::Cancelled => {
                    return Err(AppError::PreconditionFailed(PreconditionReason::OrderCancelled));
                }
                _ => {
                    return Err(AppError::PreconditionFailed(PreconditionReason::NotYetDelivered));
                }
            }

            order.transition(OrderStatus::Completed, now)?;
            order.release_state = ReleaseState::InFlight;
            order.release_attempts += 1;
            order.next_release_attempt_at = Some(now + lease);
            receipt.confirmed_at = Some(now);
            receipt.already_confirmed = true;

            Ok(ReceiptCommit {
                order: order.clone(),
                already_confirmed: false,
                release_due: true,
            })
        })
    }

    /// A stale `attempt` (reclaimed after its lease) records nothing.
    pub fn finish_release(
        &self,
        order_id: Uuid,
        attempt: u32,
        released: bool,
        retry_base: Duration,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        self.transact(order_id, |order| {
            if order.release_state != ReleaseState::InFlight {
                return Err(AppError::InvalidState(format!(
                    "order {} has no release in flight",
                    order.order_number
                )));
            }
            if order.release_attempts != attempt {
                return Err(AppError::InvalidState(format!(
                    "release attempt {attempt} for order {} was superseded by attempt {}",
                    order.order_number, order.release_attempts
                )));
            }

            if released {
                order.release_state = ReleaseState::Released;
                order.next_release_attempt_at = None;
            } else {
                order.release_state = ReleaseState::PendingRetry;
                order.next_release_attempt_at =
                    Some(now + release_backoff(retry_base, order.release_attempts));
            }
            order.updated_at = now;
            Ok(order.clone())
        })
    }

    /// Also reclaims an IN_FLIGHT release whose lease ran out.
    pub fn claim_release_retry(
        &self,
        order_id: Uuid,
        force: bool,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<u32>, AppError> {
        self.transact(order_id, |order| {
            let claimable = match order.release_state {
                ReleaseState::PendingRetry => {
                    force || order.next_release_attempt_at.is_none_or(|at| at <= now)
                }
                ReleaseState::InFlight => order.next_release_attempt_at.is_some_and(|at| at <= now),
                _ => false,
            };

            if !claimable {
                if force {
                    return Err(AppError::InvalidState(format!(
                        "order {} release is {:?}, nothing to retry",
                        order.order_number, order.release_state
                    )));
                }
                return Ok(None);
            }

            if order.release_state == ReleaseState::InFlight {
                warn!(
                    order_id = %order.id,
                    attempt = order.release_attempts,
                    "release lease expired; reclaiming"
                );
            }
            order.release_state = ReleaseState::InFlight;
            order.release_attempts += 1;
            order.next_release_attempt_at = Some(now + lease);
            order.updated_at = now;
            Ok(Some(order.release_attempts))
        })
    }

    pub fn releases_due(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.orders
            .iter()
            .filter(|entry| match entry.release_state {
                ReleaseState::PendingRetry => entry.next_release_attempt_at.is_none_or(|at| at <= now),
                ReleaseState::InFlight => entry.next_release_attempt_at.is_some_and(|at| at <= now),
                _ => false,
            })
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CancelCommit, AppError> {
        self.transact(order_id, |order| {
            let assigned_picker = self
                .acceptances
                .get(&order.id)
                .map(|acceptance| acceptance.picker_id);

            if order.status == OrderStatus::Cancelled {
                return Ok(CancelCommit {
                    order: order.clone(),
                    cancelled: Vec::new(),
                    changed: false,
                    assigned_picker,
                });
            }
            if !order.status.can_transition_to(OrderStatus::Cancelled) {
                return Err(AppError::InvalidState(format!(
                    "order {} is {:?} and can no longer be cancelled",
                    order.order_number, order.status
                )));
            }

            let cancelled = self.cancel_pending_siblings(order.id, None, now);
            order.transition(OrderStatus::Cancelled, now)?;
            order.cancellation_reason = reason;

            Ok(CancelCommit {
                order: order.clone(),
                cancelled,
                changed: true,
                assigned_picker,
            })
        })
    }
}

/// `base * 2^(attempts - 1)`, capped at one hour.
pub fn release_backoff(base: Duration, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let secs = base
        .num_seconds()
        .max(1)
        .saturating_mul(1_i64 << exponent)
        .min(MAX_RELEASE_BACKOFF_SECS);
    Duration::seconds(secs)
}
