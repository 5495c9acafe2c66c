//! Dashboard summary.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalPreview {
    pub name: String,
    pub progress_percent: u32,
    pub saved_amount: f64,
    pub target_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub greeting: String,
    pub month_label: String,
    pub total_income: f64,
    pub total_spent: f64,
    pub total_saved: f64,
    pub remaining: f64,
    pub spend_percent: i32,
    pub health_score: u32,
    pub health_total: u32,
    #[serde(default)]
    pub active_goal: Option<GoalPreview>,
}
