//! Shared wire and state types for the B4USpend client.

mod auth;
mod budget;
mod challenge;
mod chat;
mod checklist;
mod dashboard;
mod expense;
mod goal;
mod nudge;
mod session;
mod tag;
mod user;

pub use auth::*;
pub use budget::*;
pub use challenge::*;
pub use chat::*;
pub use checklist::*;
pub use dashboard::*;
pub use expense::*;
pub use goal::*;
pub use nudge::*;
pub use session::*;
pub use tag::*;
pub use user::*;
