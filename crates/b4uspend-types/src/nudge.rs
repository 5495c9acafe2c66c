//! Spending nudge check types.

use crate::ExpenseCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeCheckRequest {
    pub amount: f64,
    pub category: ExpenseCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Verdict computed server-side for a prospective expense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NudgeStatus {
    Ok,
    Warning,
    Exceeds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetImpact {
    pub category_name: String,
    pub remaining_before: f64,
    pub remaining_after: f64,
    pub percent_used_after: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalImpact {
    pub goal_name: String,
    pub affected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentOption {
    pub category: String,
    pub available: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NudgeCheckResponse {
    pub status: NudgeStatus,
    pub message: String,
    #[serde(default)]
    pub budget_impact: Option<BudgetImpact>,
    #[serde(default)]
    pub goal_impact: Vec<GoalImpact>,
    pub days_remaining_in_month: u32,
    #[serde(default)]
    pub adjustment_options: Vec<AdjustmentOption>,
}
