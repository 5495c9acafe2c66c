//! Endpoint catalog and the operation/tag graph derived from it.
//!
//! Every remote operation is declared once here: its name (the cache key
//! namespace), method, path template and the tags it provides (reads) or
//! invalidates (writes). `TagGraph` indexes the declarations so the client
//! and diagnostics can ask which reads a write makes stale.

use crate::dispatcher::{ApiRequest, HttpMethod};
use b4uspend_types::{Tag, TagKind};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// Declaration of one remote operation.
#[derive(Debug, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub kind: OperationKind,
    pub method: HttpMethod,
    /// Path relative to the API prefix. `{}` marks a path parameter.
    pub path: &'static str,
    /// Kind-wide tags provided (reads) or invalidated (writes).
    pub tags: &'static [TagKind],
    /// Reads only: tag kind narrowed to the path parameter (`Goals#<id>`).
    pub entity_tag: Option<TagKind>,
    /// Sent without credentials and outside the renewal protocol.
    pub public: bool,
}

impl Operation {
    const fn read(name: &'static str, path: &'static str, tags: &'static [TagKind]) -> Self {
        Self {
            name,
            kind: OperationKind::Read,
            method: HttpMethod::Get,
            path,
            tags,
            entity_tag: None,
            public: false,
        }
    }

    const fn detail(name: &'static str, path: &'static str, entity: TagKind) -> Self {
        Self {
            entity_tag: Some(entity),
            ..Self::read(name, path, &[])
        }
    }

    const fn write(
        name: &'static str,
        method: HttpMethod,
        path: &'static str,
        tags: &'static [TagKind],
    ) -> Self {
        Self {
            name,
            kind: OperationKind::Write,
            method,
            path,
            tags,
            entity_tag: None,
            public: false,
        }
    }

    const fn auth(name: &'static str, path: &'static str) -> Self {
        Self {
            public: true,
            ..Self::write(name, HttpMethod::Post, path, &[])
        }
    }

    pub fn is_read(&self) -> bool {
        self.kind == OperationKind::Read
    }

    /// Substitute path parameters in order.
    pub fn path_for(&self, params: &[&str]) -> String {
        let mut out = String::with_capacity(self.path.len() + 40);
        let mut params = params.iter();
        let mut rest = self.path;
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            if let Some(param) = params.next() {
                out.push_str(param);
            }
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Request for this operation with the given path parameters.
    pub fn request(&self, params: &[&str]) -> ApiRequest {
        let request = ApiRequest::new(self.method, self.path_for(params));
        if self.public { request.public() } else { request }
    }

    /// Concrete tags for one invocation. `entity` is the path parameter that
    /// narrows the entity tag, if the operation declares one.
    pub fn tags_for(&self, entity: Option<&str>) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.tags.iter().copied().map(Tag::kind).collect();
        if let (Some(kind), Some(id)) = (self.entity_tag, entity) {
            tags.push(Tag::entity(kind, id));
        }
        tags
    }

    fn tag_kinds(&self) -> impl Iterator<Item = TagKind> + '_ {
        self.tags.iter().copied().chain(self.entity_tag)
    }
}

use HttpMethod::{Delete, Patch, Post, Put};
use TagKind::{Budget, Challenges, Chat, Checklist, Dashboard, Expenses, Goals, MyChallenges, User};

// Auth
pub const LOGIN: Operation = Operation::auth("login", "/auth/login");
pub const REGISTER: Operation = Operation::auth("register", "/auth/register");
pub const LOGOUT: Operation = Operation::auth("logout", "/auth/logout");

// Profile
pub const GET_ME: Operation = Operation::read("get_me", "/users/me", &[User]);
pub const UPDATE_USER: Operation = Operation::write("update_user", Patch, "/users/me", &[User]);
pub const UPDATE_INCOME: Operation = Operation::write("update_income", Put, "/users/me/income", &[User]);
pub const UPDATE_FIXED_EXPENSES: Operation =
    Operation::write("update_fixed_expenses", Put, "/users/me/fixed-expenses", &[User]);
pub const UPDATE_DEPENDENTS: Operation =
    Operation::write("update_dependents", Put, "/users/me/dependents", &[User]);
pub const COMPLETE_ONBOARDING: Operation =
    Operation::write("complete_onboarding", Post, "/users/me/complete-onboarding", &[User]);

pub const GET_DASHBOARD: Operation = Operation::read("get_dashboard", "/dashboard", &[Dashboard]);

// Expenses
pub const LIST_EXPENSES: Operation = Operation::read("list_expenses", "/expenses", &[Expenses]);
pub const EXPENSE_BREAKDOWN: Operation =
    Operation::read("expense_breakdown", "/expenses/summary/breakdown", &[Expenses]);
pub const MONTHLY_SUMMARY: Operation =
    Operation::read("monthly_summary", "/expenses/summary/monthly", &[Expenses]);
pub const ADD_EXPENSE: Operation =
    Operation::write("add_expense", Post, "/expenses", &[Expenses, Dashboard, Budget]);
pub const UPDATE_EXPENSE: Operation =
    Operation::write("update_expense", Patch, "/expenses/{}", &[Expenses, Dashboard, Budget]);
pub const DELETE_EXPENSE: Operation =
    Operation::write("delete_expense", Delete, "/expenses/{}", &[Expenses, Dashboard, Budget]);

// Budget
pub const CURRENT_BUDGET: Operation = Operation::read("current_budget", "/budgets/current", &[Budget]);
pub const CREATE_BUDGET: Operation = Operation::write("create_budget", Post, "/budgets", &[Budget, Dashboard]);
pub const UPDATE_BUDGET_CATEGORIES: Operation =
    Operation::write("update_budget_categories", Put, "/budgets/{}/categories", &[Budget, Dashboard]);

// Goals
pub const LIST_GOALS: Operation = Operation::read("list_goals", "/goals", &[Goals]);
pub const GOAL_DETAIL: Operation = Operation::detail("goal_detail", "/goals/{}", Goals);
pub const CREATE_GOAL: Operation = Operation::write("create_goal", Post, "/goals", &[Goals, Dashboard]);
pub const UPDATE_GOAL: Operation = Operation::write("update_goal", Patch, "/goals/{}", &[Goals, Dashboard]);
pub const DELETE_GOAL: Operation = Operation::write("delete_goal", Delete, "/goals/{}", &[Goals, Dashboard]);
pub const ADD_CONTRIBUTION: Operation =
    Operation::write("add_contribution", Post, "/goals/{}/contributions", &[Goals, Dashboard]);

// Checklist
pub const CHECKLIST: Operation = Operation::read("checklist", "/checklist", &[Checklist]);
pub const CHECKLIST_ITEM: Operation = Operation::detail("checklist_item", "/checklist/{}", Checklist);
pub const UPDATE_CHECKLIST_ITEM: Operation =
    Operation::write("update_checklist_item", Patch, "/checklist/{}", &[Checklist, Dashboard]);

// Challenges
pub const AVAILABLE_CHALLENGES: Operation =
    Operation::read("available_challenges", "/challenges", &[Challenges]);
pub const JOIN_CHALLENGE: Operation =
    Operation::write("join_challenge", Post, "/challenges/join", &[Challenges, MyChallenges]);
pub const MY_CHALLENGES: Operation =
    Operation::read("my_challenges", "/challenges/my-challenges", &[MyChallenges]);
pub const MY_CHALLENGE_DETAIL: Operation =
    Operation::detail("my_challenge_detail", "/challenges/my-challenges/{}", MyChallenges);
pub const MY_PROGRESS: Operation = Operation::read("my_progress", "/challenges/my-progress", &[MyChallenges]);
pub const LEADERBOARD: Operation = Operation::read("leaderboard", "/challenges/{}/leaderboard", &[]);
pub const ABANDON_CHALLENGE: Operation =
    Operation::write("abandon_challenge", Delete, "/challenges/my-challenges/{}", &[MyChallenges]);

pub const CHECK_NUDGE: Operation = Operation::write("check_nudge", Post, "/nudge/check", &[]);

// Chat
pub const CHAT_HISTORY: Operation = Operation::read("chat_history", "/chat/history", &[Chat]);
pub const SEND_CHAT: Operation = Operation::write("send_chat", Post, "/chat/send", &[Chat]);
pub const CLEAR_CHAT: Operation = Operation::write("clear_chat", Delete, "/chat/history", &[Chat]);

/// Every declared operation.
pub const OPERATIONS: &[&Operation] = &[
    &LOGIN,
    &REGISTER,
    &LOGOUT,
    &GET_ME,
    &UPDATE_USER,
    &UPDATE_INCOME,
    &UPDATE_FIXED_EXPENSES,
    &UPDATE_DEPENDENTS,
    &COMPLETE_ONBOARDING,
    &GET_DASHBOARD,
    &LIST_EXPENSES,
    &EXPENSE_BREAKDOWN,
    &MONTHLY_SUMMARY,
    &ADD_EXPENSE,
    &UPDATE_EXPENSE,
    &DELETE_EXPENSE,
    &CURRENT_BUDGET,
    &CREATE_BUDGET,
    &UPDATE_BUDGET_CATEGORIES,
    &LIST_GOALS,
    &GOAL_DETAIL,
    &CREATE_GOAL,
    &UPDATE_GOAL,
    &DELETE_GOAL,
    &ADD_CONTRIBUTION,
    &CHECKLIST,
    &CHECKLIST_ITEM,
    &UPDATE_CHECKLIST_ITEM,
    &AVAILABLE_CHALLENGES,
    &JOIN_CHALLENGE,
    &MY_CHALLENGES,
    &MY_CHALLENGE_DETAIL,
    &MY_PROGRESS,
    &LEADERBOARD,
    &ABANDON_CHALLENGE,
    &CHECK_NUDGE,
    &CHAT_HISTORY,
    &SEND_CHAT,
    &CLEAR_CHAT,
];

/// Bipartite index of operations and the tag kinds linking them.
#[derive(Debug)]
pub struct TagGraph {
    operations: BTreeMap<&'static str, &'static Operation>,
    readers: BTreeMap<TagKind, Vec<&'static str>>,
}

impl TagGraph {
    pub fn from_operations(operations: &[&'static Operation]) -> Self {
        let mut by_name = BTreeMap::new();
        let mut readers: BTreeMap<TagKind, Vec<&'static str>> = BTreeMap::new();
        for &op in operations {
            debug_assert!(!by_name.contains_key(op.name), "duplicate operation {}", op.name);
            by_name.insert(op.name, op);
            if op.is_read() {
                for kind in op.tag_kinds() {
                    readers.entry(kind).or_default().push(op.name);
                }
            }
        }
        Self {
            operations: by_name,
            readers,
        }
    }

    /// Graph over the full endpoint catalog.
    pub fn standard() -> Self {
        Self::from_operations(OPERATIONS)
    }

    pub fn operation(&self, name: &str) -> Option<&'static Operation> {
        self.operations.get(name).copied()
    }

    /// Tag kinds a read provides. Empty for writes and unknown names.
    pub fn provided_by(&self, name: &str) -> Vec<TagKind> {
        match self.operation(name) {
            Some(op) if op.is_read() => op.tag_kinds().collect(),
            _ => Vec::new(),
        }
    }

    /// Tag kinds a write invalidates. Empty for reads and unknown names.
    pub fn invalidated_by(&self, name: &str) -> Vec<TagKind> {
        match self.operation(name) {
            Some(op) if !op.is_read() => op.tags.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Reads that provide a tag of this kind.
    pub fn readers_of(&self, kind: TagKind) -> &[&'static str] {
        self.readers.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reads whose cached results a successful write makes stale.
    pub fn affected_reads(&self, write: &str) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .invalidated_by(write)
            .into_iter()
            .flat_map(|kind| self.readers_of(kind).iter().copied())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl Default for TagGraph {
    fn default() -> Self {
        Self::standard()
    }
}
