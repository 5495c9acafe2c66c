//! User profile and onboarding types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependentType {
    JustMe,
    MeSpouse,
    MeSpouseKids,
    MeParents,
    MeSpouseParents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixedExpenseCategory {
    Rent,
    Emi,
    Bills,
    OtherFixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedExpense {
    pub category: FixedExpenseCategory,
    pub amount: f64,
}

/// The authenticated user's profile as returned by `GET /users/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub phone: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub monthly_salary: Option<f64>,
    #[serde(default)]
    pub other_income: f64,
    #[serde(default)]
    pub dependent_type: Option<DependentType>,
    pub onboarding_complete: bool,
    #[serde(default)]
    pub fixed_expenses: Vec<FixedExpense>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomeUpdate {
    pub monthly_salary: f64,
    #[serde(default)]
    pub other_income: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedExpensesUpdate {
    pub expenses: Vec<FixedExpense>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentUpdate {
    pub dependent_type: DependentType,
}
