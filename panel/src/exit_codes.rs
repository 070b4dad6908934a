//! Stable exit codes for panel CLI commands.

/// Command succeeded (for `panel save`: the save was published).
pub const OK: i32 = 0;
/// Invalid input or configuration, or the host could not be reached.
pub const INVALID: i32 = 1;
/// `panel save` reached the host but the save failed.
pub const SAVE_FAILED: i32 = 2;
/// `panel save` got no answer before its timeout.
pub const TIMED_OUT: i32 = 3;
