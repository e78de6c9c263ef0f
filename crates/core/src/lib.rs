//! Core traits and types for the parley assistant
//!
//! This crate provides foundational types used across all other crates:
//! - Error taxonomy
//! - Conversation turns and session status
//! - Client/server wire protocol
//! - Bounded LRU cache with TTL expiry

pub mod cache;
pub mod conversation;
pub mod emotion;
pub mod error;
pub mod protocol;

pub use cache::{CacheStats, TtlLruCache};
pub use conversation::{SessionStatus, Turn, TurnRole};
pub use emotion::Emotion;
pub use error::{Error, Result};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
