//! Rollback session
//!
//! Provides the frame-indexed [`RollbackSession`] engine.

mod session;
mod types;

#[cfg(test)]
mod tests;

// Re-export public types
pub use session::RollbackSession;
pub use types::{RollbackError, RollbackStats};
