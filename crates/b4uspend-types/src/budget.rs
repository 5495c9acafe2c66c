//! Monthly budget types.

use crate::ExpenseCategory;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCreate {
    pub month: u32,
    pub year: i32,
    pub total_income: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub category: ExpenseCategory,
    pub allocated_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetCategoriesUpdate {
    pub categories: Vec<BudgetAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCategory {
    pub category: ExpenseCategory,
    pub allocated_amount: f64,
    #[serde(default)]
    pub spent_amount: f64,
    #[serde(default)]
    pub remaining: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub month: u32,
    pub year: i32,
    pub total_income: f64,
    #[serde(default)]
    pub categories: Vec<BudgetCategory>,
}
