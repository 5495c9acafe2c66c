//! Financial-health checklist types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecklistItemType {
    EmergencyFund,
    HealthInsurance,
    TermInsurance,
    EpfPpf,
    BasicSavingsHabit,
    NoHighInterestDebt,
}

impl ChecklistItemType {
    /// Wire name, also used as the path segment in `/checklist/:itemType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmergencyFund => "EMERGENCY_FUND",
            Self::HealthInsurance => "HEALTH_INSURANCE",
            Self::TermInsurance => "TERM_INSURANCE",
            Self::EpfPpf => "EPF_PPF",
            Self::BasicSavingsHabit => "BASIC_SAVINGS_HABIT",
            Self::NoHighInterestDebt => "NO_HIGH_INTEREST_DEBT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecklistStatus {
    Complete,
    Incomplete,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItemUpdate {
    pub status: ChecklistStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: Uuid,
    pub item_type: ChecklistItemType,
    pub status: ChecklistStatus,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistScore {
    pub completed: u32,
    pub total: u32,
    pub score_label: String,
    pub items: Vec<ChecklistItem>,
}
