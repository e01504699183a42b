use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ResolvedReason;
use crate::models::picker::PickerType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Pending,
    Accepted,
    Cancelled,
    Expired,
}

impl OpportunityStatus {
    /// `sibling_won` separates losing a race from the order being cancelled.
    pub fn resolved_reason(&self, sibling_won: bool) -> Option<ResolvedReason> {
        match self {
            OpportunityStatus::Pending => None,
            OpportunityStatus::Accepted => Some(ResolvedReason::AlreadyAccepted),
            OpportunityStatus::Cancelled if sibling_won => Some(ResolvedReason::AcceptedByOther),
            OpportunityStatus::Cancelled => Some(ResolvedReason::Cancelled),
            OpportunityStatus::Expired => Some(ResolvedReason::Expired),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SelectionPolicy {
    AllEligible,
    Nearby {
        #[serde(default)]
        radius_km: Option<f64>,
    },
    HighValue {
        #[serde(default)]
        min_completed: Option<u32>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Manual {
        picker_ids: Vec<Uuid>,
    },
    RandomSingle,
}

impl SelectionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionPolicy::AllEligible => "all_eligible",
            SelectionPolicy::Nearby { .. } => "nearby",
            SelectionPolicy::HighValue { .. } => "high_value",
            SelectionPolicy::Manual { .. } => "manual",
            SelectionPolicy::RandomSingle => "random_single",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "all_eligible" => Some(SelectionPolicy::AllEligible),
            "nearby" => Some(SelectionPolicy::Nearby { radius_km: None }),
            "high_value" => Some(SelectionPolicy::HighValue {
                min_completed: None,
                limit: None,
            }),
            "random_single" => Some(SelectionPolicy::RandomSingle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentRequest {
    #[serde(flatten)]
    pub policy: SelectionPolicy,
    #[serde(default)]
    pub picker_type: Option<PickerType>,
}

impl From<SelectionPolicy> for AssignmentRequest {
    fn from(policy: SelectionPolicy) -> Self {
        Self {
            policy,
            picker_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOpportunity {
    pub id: Uuid,
    pub order_id: Uuid,
    pub opportunity_code: String,
    pub picker_id: Uuid,
    pub picker_type: PickerType,
    pub status: OpportunityStatus,
    pub round: u32,
    pub policy: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DeliveryOpportunity {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == OpportunityStatus::Pending && !self.is_past_expiry(now)
    }
}
