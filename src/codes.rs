use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;

pub const MAX_ISSUE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    Opportunity,
    DeliveryConfirmation,
    CustomerConfirmation,
}

impl CodePurpose {
    pub fn prefix(&self) -> &'static str {
        match self {
            CodePurpose::Opportunity => "opp_",
            CodePurpose::DeliveryConfirmation => "dlv_",
            CodePurpose::CustomerConfirmation => "rcv_",
        }
    }
}

pub fn generate_code(purpose: CodePurpose) -> String {
    format!("{}{}", purpose.prefix(), Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy)]
struct IssuedCode {
    purpose: CodePurpose,
    owner: Uuid,
}

#[derive(Default)]
pub struct CodeRegistry {
    issued: DashMap<String, IssuedCode>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, purpose: CodePurpose, owner: Uuid) -> Result<String, AppError> {
        self.issue_with(purpose, owner, generate_code)
    }

    fn issue_with(
        &self,
        purpose: CodePurpose,
        owner: Uuid,
        mut generate: impl FnMut(CodePurpose) -> String,
    ) -> Result<String, AppError> {
        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let code = generate(purpose);
            match self.issued.entry(code.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(IssuedCode { purpose, owner });
                    return Ok(code);
                }
                Entry::Occupied(_) => {
                    tracing::warn!(?purpose, attempt, "code collision, regenerating");
                }
            }
        }

        tracing::error!(?purpose, "code generation kept colliding; entropy source suspect");
        Err(AppError::Internal(format!(
            "could not issue a unique {purpose:?} code after {MAX_ISSUE_ATTEMPTS} attempts"
        )))
    }

    pub fn release(&self, code: &str) {
        self.issued.remove(code);
    }

    pub fn resolve(&self, code: &str, purpose: CodePurpose) -> Option<Uuid> {
        self.issued
            .get(code)
            .filter(|issued| issued.purpose == purpose)
            .map(|issued| issued.owner)
    }

    pub fn purpose_of(&self, code: &str) -> Option<CodePurpose> {
        self.issued.get(code).map(|issued| issued.purpose)
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}
