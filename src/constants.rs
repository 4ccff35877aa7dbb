//! Constants shared by the tombstone parser and the crash matcher.

/// Segmentation fault.
pub const SIGSEGV: &str = "SIGSEGV";
/// Bus error.
pub const SIGBUS: &str = "SIGBUS";
/// Abort, usually raised by a failed check or `abort()`.
pub const SIGABRT: &str = "SIGABRT";

/// Faults below this address are most likely null pointer dereferences.
pub const MIN_CRASH_ADDRESS: u32 = 0x8000;

/// Signals that are considered security relevant by default.
pub const DEFAULT_SIGNALS: &[&str] = &[SIGSEGV, SIGBUS];

/// Abort messages of crashes that are never security relevant by default.
pub const DEFAULT_ABORT_MESSAGE_EXCLUDES: &[&str] = &["CHECK_", "CANNOT LINK EXECUTABLE"];

/// Prefix of the line instrumentation prints when a test starts.
pub const NEW_TEST_ALERT: &str = "New test starting with name: ";

