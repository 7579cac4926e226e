//! Stable exit codes for `shellcontrol` commands.

/// Command succeeded or the session completed.
pub const OK: i32 = 0;
/// Invalid usage, config, or other setup errors.
pub const INVALID: i32 = 1;
/// The session ended in `Aborted`.
pub const ABORTED: i32 = 3;
