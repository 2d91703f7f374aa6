//! # Task Supervisor
//!
//! Self-hosted accountability agent. Twice a day it reads the user's task
//! outline and photo evidence, decides whether the day's commitments were
//! kept, and sends a small token penalty to a random address when they were
//! not.
//!
//! ## Pipeline
//!
//! ```text
//!   Scheduler / control API
//!            │
//!            ▼
//!   ┌──────────────────┐     notes:     task tree extraction
//!   │ VerificationEngine├───► evidence:  EXIF + vision classification
//!   └────────┬─────────┘
//!            │ CheckVerdict (result, message, status)
//!            ▼
//!   ┌──────────────────────┐
//!   │ EnforcementDispatcher │──► ledger: ERC-20 transfer, retried until it lands
//!   └──────────────────────┘
//! ```
//!
//! ## Modules
//! - `notes`: outline access and task tree extraction
//! - `messaging`, `evidence`: photo evidence and its classification
//! - `verify`: verdicts and the four check policies
//! - `enforcement`, `ledger`: punishment transfers
//! - `scheduler`, `supervisor`, `api`: triggers, run orchestration and control surface

pub mod api;
pub mod config;
pub mod enforcement;
pub mod evidence;
pub mod ledger;
pub mod llm;
pub mod messaging;
pub mod notes;
pub mod scheduler;
pub mod supervisor;
pub mod util;
pub mod verify;

pub use config::Config;
pub use supervisor::Supervisor;
pub use verify::{CheckKind, CheckVerdict, Outcome, VerificationEngine};
