//! Savings goal types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalIcon {
    Bike,
    Car,
    Home,
    Trip,
    Wedding,
    Gadget,
    EducationGoal,
    OtherGoal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalCreate {
    pub name: String,
    pub icon: GoalIcon,
    pub target_amount: f64,
    pub target_date: NaiveDate,
    #[serde(default)]
    pub initial_amount: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<GoalIcon>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionCreate {
    pub amount: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: Uuid,
    pub amount: f64,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub name: String,
    pub icon: GoalIcon,
    pub target_amount: f64,
    pub saved_amount: f64,
    pub target_date: NaiveDate,
    pub initial_amount: f64,
    pub is_active: bool,
    #[serde(default)]
    pub progress_percent: u32,
    #[serde(default)]
    pub monthly_needed: f64,
    #[serde(default)]
    pub months_remaining: u32,
    pub created_at: DateTime<Utc>,
}

/// `GET /goals/:id` adds the contribution history to the goal fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalDetail {
    #[serde(flatten)]
    pub goal: Goal,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
}
