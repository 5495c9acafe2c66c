//! Savings challenge types.

use crate::ExpenseCategory;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeType {
    Savings,
    SpendingLimit,
    NoSpend,
    Streak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Active,
    Completed,
    Failed,
    Abandoned,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BadgeType {
    SavingsMaster,
    BudgetNinja,
    StreakChampion,
    SpendingWarrior,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub challenge_type: ChallengeType,
    #[serde(default)]
    pub target_category: Option<ExpenseCategory>,
    #[serde(default)]
    pub target_amount: Option<f64>,
    pub duration_days: u32,
    pub badge_type: BadgeType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeList {
    pub items: Vec<Challenge>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinChallengeRequest {
    pub challenge_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub challenge_id: Uuid,
    pub status: ChallengeStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub challenge: Challenge,
    pub progress_percent: f64,
    pub current_value: f64,
    pub target_value: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserChallengeList {
    pub items: Vec<UserChallenge>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub progress_percent: f64,
    pub is_current_user: bool,
    pub anonymous_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub challenge_id: Uuid,
    pub challenge_title: String,
    pub entries: Vec<LeaderboardEntry>,
    pub total_participants: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBadge {
    pub badge_type: BadgeType,
    pub earned_at: DateTime<Utc>,
    pub challenge_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub active_challenges: Vec<UserChallenge>,
    pub completed_count: u32,
    pub badges: Vec<UserBadge>,
}
