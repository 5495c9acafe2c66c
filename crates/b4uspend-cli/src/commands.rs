//! Command-line surface and command dispatch.

use crate::config::Config;
use crate::logging::LogFormat;
use anyhow::{bail, Result};
use b4uspend_core::{ChatSession, FinanceClient, SessionEvent, TerminationReason, DEFAULT_LEADERBOARD_LIMIT};
use b4uspend_types::{ExpenseCategory, ExpenseCreate, ExpenseQuery, MonthRef, NudgeCheckRequest, RegisterRequest};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

/// B4USpend personal finance client.
#[derive(Parser, Debug)]
#[command(name = "b4uspend")]
#[command(about = "Command-line client for the B4USpend API")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, value_name = "URL", global = true)]
    pub api_url: Option<String>,

    /// Log renewal and cache activity
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub debug: bool,

    #[arg(long, global = true)]
    pub trace: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Per-target log level, e.g. "guard=debug". Repeatable.
    #[arg(long = "log", value_name = "TARGET=LEVEL", global = true)]
    pub log_overrides: Vec<String>,

    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Sign in with phone and password
    Login {
        phone: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        phone: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in profile
    Whoami,
    Dashboard,
    Expenses {
        #[command(subcommand)]
        action: ExpenseCommand,
    },
    /// Current month's budget
    Budget,
    Goals,
    /// Financial-health checklist
    Checklist,
    Challenges {
        /// Only challenges you joined
        #[arg(long)]
        mine: bool,
        /// Leaderboard for one challenge
        #[arg(long, conflicts_with = "mine")]
        leaderboard: Option<Uuid>,
    },
    /// Ask whether a prospective expense fits the budget
    Nudge {
        amount: f64,
        category: ExpenseCategory,
        #[arg(long)]
        description: Option<String>,
    },
    Chat {
        #[command(subcommand)]
        action: ChatCommand,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ExpenseCommand {
    List {
        #[arg(long)]
        month: Option<u32>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    Add {
        amount: f64,
        category: ExpenseCategory,
        #[arg(long)]
        description: Option<String>,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Spending by category for a month
    Breakdown {
        #[arg(long)]
        month: Option<u32>,
        #[arg(long)]
        year: Option<i32>,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ChatCommand {
    History {
        #[arg(long)]
        limit: Option<u32>,
    },
    Send {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    Clear,
}

impl Command {
    /// Whether the command needs a signed-in session.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Command::Login { .. } | Command::Register { .. } | Command::Logout)
    }
}

fn this_month(month: Option<u32>, year: Option<i32>) -> MonthRef {
    let today = Local::now().date_naive();
    MonthRef {
        month: month.unwrap_or(today.month()),
        year: year.unwrap_or(today.year()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Execute one command against the client.
pub async fn run(client: &FinanceClient, config: &Config, command: Command) -> Result<()> {
    if command.requires_session() && !client.is_authenticated() {
        bail!("Not signed in. Run `b4uspend login <phone> --password <password>` first.");
    }

    match command {
        Command::Login { phone, password } => {
            let session = client.login(&phone, &password).await?;
            print_json(&session.user)?;
        }
        Command::Register {
            phone,
            name,
            password,
        } => {
            let session = client
                .register(&RegisterRequest {
                    phone,
                    name,
                    password,
                })
                .await?;
            print_json(&session.user)?;
        }
        Command::Logout => {
            client.logout().await;
            eprintln!("Signed out.");
        }
        Command::Whoami => print_json(&client.get_me().await?)?,
        Command::Dashboard => print_json(&client.dashboard().await?)?,
        Command::Expenses { action } => match action {
            ExpenseCommand::List { month, year, page } => {
                let month = this_month(month, year);
                let query = ExpenseQuery {
                    page,
                    ..ExpenseQuery::month(month.month, month.year)
                };
                print_json(&client.list_expenses(&query).await?)?;
            }
            ExpenseCommand::Add {
                amount,
                category,
                description,
                date,
            } => {
                let expense = ExpenseCreate {
                    amount,
                    category,
                    description,
                    date: date.unwrap_or_else(|| Local::now().date_naive()),
                };
                print_json(&client.add_expense(&expense).await?)?;
            }
            ExpenseCommand::Breakdown { month, year } => {
                print_json(&client.expense_breakdown(this_month(month, year)).await?)?;
            }
        },
        Command::Budget => match client.current_budget().await? {
            Some(budget) => print_json(&budget)?,
            None => eprintln!("No budget for this month yet."),
        },
        Command::Goals => print_json(&client.list_goals().await?)?,
        Command::Checklist => print_json(&client.checklist().await?)?,
        Command::Challenges { mine, leaderboard } => {
            if let Some(id) = leaderboard {
                print_json(&client.leaderboard(id, DEFAULT_LEADERBOARD_LIMIT).await?)?;
            } else if mine {
                print_json(&client.my_challenges(None).await?)?;
            } else {
                print_json(&client.available_challenges().await?)?;
            }
        }
        Command::Nudge {
            amount,
            category,
            description,
        } => {
            let check = NudgeCheckRequest {
                amount,
                category,
                description,
            };
            print_json(&client.check_nudge(&check).await?)?;
        }
        Command::Chat { action } => {
            let chat = ChatSession::new(client.clone(), config.chat_history_limit);
            match action {
                ChatCommand::History { limit } => {
                    let limit = limit.unwrap_or(config.chat_history_limit);
                    print_json(&client.chat_history(limit).await?.messages)?;
                }
                ChatCommand::Send { message } => {
                    chat.send(&message.join(" ")).await?;
                    print_json(&chat.snapshot())?;
                }
                ChatCommand::Clear => {
                    chat.clear().await?;
                    eprintln!("Chat history cleared.");
                }
            }
        }
    }
    Ok(())
}

/// Drain pending session events; report a forced logout if one happened.
pub fn termination(events: &mut broadcast::Receiver<SessionEvent>) -> Option<TerminationReason> {
    let mut terminated = None;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Terminated { reason }) => terminated = Some(reason),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return terminated,
        }
    }
}
