//! Storage module for match record persistence

pub mod traits;
pub mod sqlite;

pub use traits::{MatchStorage, MatchRecord, FaceData, PhotoRecord, UserProfile};
pub use sqlite::SqliteStorage;
