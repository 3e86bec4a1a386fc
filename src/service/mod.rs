//! Service layer module

pub mod match_service;
pub mod signin;
pub mod updater;
pub mod types;

pub use match_service::MatchService;
pub use signin::{MatchChecker, SignInChecker, SignInFlow};
pub use updater::{UpdateHandle, UpdateJob, UpdateWorker};
pub use types::*;
