//! Stable exit codes for sensemaker CLI commands.

/// Session accepted, or configuration is valid.
pub const OK: i32 = 0;
/// Invalid input: unreadable session, bad config, or another error.
pub const INVALID: i32 = 1;
/// The answer was rejected at Final Review.
pub const REJECTED: i32 = 2;
/// The session ended before an answer was reviewed.
pub const ABORTED: i32 = 3;
