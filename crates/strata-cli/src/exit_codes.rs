//! Standard exit codes for CLI operations
//!
//! One code per error class so scripts can tell a broken unit from a network
//! failure. Usage and IO errors follow sysexits.h.

/// Success - build or edit completed
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure or a crashed build task
pub const ERROR: i32 = 1;

/// Load error - missing unit file, unreadable resource, invalid unit
pub const LOAD_ERROR: i32 = 2;

/// Reference cycle between units
pub const CYCLE_ERROR: i32 = 3;

/// Remote fetch failed, timed out or did not match its pinned digest
pub const REMOTE_ERROR: i32 = 4;

/// Two definitions of one resource, or a generator collision
pub const CONFLICT_ERROR: i32 = 5;

/// A built-in transformer could not apply
pub const TRANSFORM_ERROR: i32 = 6;

/// A patch matched nothing or could not apply
pub const PATCH_ERROR: i32 = 7;

/// A replacement source was missing or ambiguous
pub const REPLACEMENT_ERROR: i32 = 8;

/// Usage error - invalid arguments or options
pub const USAGE_ERROR: i32 = 64;

/// IO error - writing output or the unit file failed
pub const IO_ERROR: i32 = 74;
