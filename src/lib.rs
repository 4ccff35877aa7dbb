//! # casr-tombstone
//! casr-tombstone extracts native crashes from Android logcat output and
//! decides which of them are security relevant.
//!
//! Crashes are read from the tombstone text that debuggerd prints to the log:
//! pid, tid, thread and process name, signal, fault address, abort message and
//! backtrace. A `Config` describes which crashes should fail a security test:
//! process names, signals, abort messages, minimal fault address and
//! backtrace frames.
//!
//! ```
//! use casr_tombstone::{config::Config, matcher, tombstone};
//!
//! let log = "DEBUG : *** *** *** pid: 1, tid: 1, name: foo >>> /system/bin/foo <<< \
//!            signal 11 (SIGSEGV), code 1 (SEGV_MAPERR), fault addr 0xdead DEBUG : backtrace:";
//! let crashes = tombstone::extract_crashes(log);
//! let config = Config::new().set_process_patterns(["foo"]).unwrap();
//! assert!(matcher::has_security_crash(&crashes, &config));
//! ```

pub mod config;
pub mod constants;
pub mod crash;
pub mod error;
pub mod matcher;
pub mod session;
pub mod tombstone;
