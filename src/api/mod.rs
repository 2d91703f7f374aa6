//! HTTP control API.
//!
//! ## Endpoints
//!
//! - `GET /` - Liveness
//! - `GET /schedule` - Current morning and evening trigger times
//! - `POST /schedule/morning` - Replace the morning triggers
//! - `POST /schedule/evening` - Replace the evening triggers
//! - `POST /check-now/morning` - Run the existence check
//! - `POST /check-now/evening` - Run the completion check
//! - `POST /check-now/morning-images` - Run the morning photo check
//! - `POST /check-now/workout` - Run the workout distance check
//! - `POST /enforcement/cancel` - Stop in-flight punishment retries

mod checks;
mod routes;
mod schedule;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
