//! Crash record types produced by the tombstone parser.
use crate::error::*;

use log::warn;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One native crash found in the log.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq)]
pub struct CrashRecord {
    /// Pid of crashed process.
    #[serde(default)]
    pub pid: i32,
    /// Tid of crashed thread.
    #[serde(default)]
    pub tid: i32,
    /// Thread name.
    #[serde(default)]
    pub name: Option<String>,
    /// Process path or name as reported by debuggerd.
    #[serde(default)]
    pub process: Option<String>,
    /// Signal name, e.g. SIGSEGV.
    #[serde(default)]
    pub signal: Option<String>,
    /// Fault address. Serialized as a hex string without prefix.
    #[serde(rename(serialize = "faultaddress", deserialize = "faultaddress"))]
    #[serde(default, with = "hex_address")]
    pub fault_address: Option<BigUint>,
    /// Abort message. May be empty, which differs from absent.
    #[serde(rename(serialize = "abortmessage", deserialize = "abortmessage"))]
    #[serde(default)]
    pub abort_message: Option<String>,
    /// Backtrace of crashed thread, frame #00 first.
    #[serde(default)]
    pub backtrace: Vec<BacktraceFrame>,
}

/// One backtrace frame.
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BacktraceFrame {
    /// Binary module or source file.
    #[serde(default)]
    pub filename: Option<String>,
    /// Symbol with offset, e.g. `abort+164`.
    #[serde(default)]
    pub method: Option<String>,
}

impl BacktraceFrame {
    /// Create new backtrace frame.
    pub fn new(filename: Option<&str>, method: Option<&str>) -> Self {
        BacktraceFrame {
            filename: filename.map(|s| s.to_string()),
            method: method.map(|s| s.to_string()),
        }
    }
}

impl CrashRecord {
    /// Returns the file name of the process, e.g. "mediaserver" for
    /// "/system/bin/mediaserver". Empty string if process is unknown.
    pub fn process_file_name(&self) -> &str {
        match self.process.as_deref() {
            Some(process) => process.rsplit('/').next().unwrap_or(process),
            None => "",
        }
    }
}

impl fmt::Display for CrashRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "pid {} tid {} ({}) {}",
            self.pid,
            self.tid,
            self.process.as_deref().unwrap_or("<unknown>"),
            self.signal.as_deref().unwrap_or("<no signal>")
        )?;
        if let Some(addr) = &self.fault_address {
            write!(f, " fault addr {addr:#x}")?;
        }
        if let Some(message) = &self.abort_message {
            write!(f, ", abort message: {message}")?;
        }
        Ok(())
    }
}

/// Parse hexadecimal number without `0x` prefix.
pub fn parse_hex(hex: &str) -> Option<BigUint> {
    BigUint::parse_bytes(hex.as_bytes(), 16)
}

/// Read crash records from json array.
///
/// # Arguments
///
/// * `json` - json array of crash records
///
/// # Return value
///
/// Crash records. Malformed array elements are skipped.
pub fn records_from_json(json: &str) -> Result<Vec<CrashRecord>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value(value) {
            Ok(crash) => Some(crash),
            Err(err) => {
                warn!("Skipping malformed crash record {i}: {err}");
                None
            }
        })
        .collect())
}

mod hex_address {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(addr: &Option<BigUint>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match addr {
            Some(addr) => serializer.serialize_some(&format!("{addr:x}")),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<BigUint>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Unparsable address is treated as unknown.
        let hex: Option<String> = Option::deserialize(deserializer)?;
        Ok(hex.and_then(|hex| super::parse_hex(&hex)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CrashRecord {
        CrashRecord {
            pid: 123,
            tid: 456,
            name: Some("foo".to_string()),
            process: Some("/system/bin/foo".to_string()),
            signal: Some("SIGSEGV".to_string()),
            fault_address: parse_hex("dead"),
            abort_message: None,
            backtrace: vec![BacktraceFrame::new(Some("/system/lib64/libc.so"), None)],
        }
    }

    #[test]
    fn test_process_file_name() {
        let mut crash = sample();
        assert_eq!(crash.process_file_name(), "foo");
        crash.process = Some("mediaserver".to_string());
        assert_eq!(crash.process_file_name(), "mediaserver");
        crash.process = Some("/system/bin/".to_string());
        assert_eq!(crash.process_file_name(), "");
        crash.process = None;
        assert_eq!(crash.process_file_name(), "");
    }

    #[test]
    fn test_serialize_nulls() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["pid"], 123);
        assert_eq!(value["faultaddress"], "dead");
        assert!(value["abortmessage"].is_null());
        assert!(value["backtrace"][0]["method"].is_null());
        assert_eq!(value["backtrace"][0]["filename"], "/system/lib64/libc.so");

        let mut crash = sample();
        crash.abort_message = Some(String::new());
        crash.fault_address = None;
        let value = serde_json::to_value(crash).unwrap();
        assert_eq!(value["abortmessage"], "");
        assert!(value["faultaddress"].is_null());
    }

    #[test]
    fn test_records_from_json() {
        let json = r#"[
            {"pid": 1, "tid": 2, "name": "a", "process": "/system/bin/a",
             "signal": "SIGSEGV", "faultaddress": "ffffffffffffffffff",
             "abortmessage": null, "backtrace": []},
            {"pid": "not a number"},
            {"process": "b", "faultaddress": "zz"}
        ]"#;
        let records = records_from_json(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].fault_address,
            Some(BigUint::parse_bytes(b"ffffffffffffffffff", 16).unwrap())
        );
        assert_eq!(records[1].process.as_deref(), Some("b"));
        assert_eq!(records[1].fault_address, None);
        assert_eq!(records[1].pid, 0);

        assert!(records_from_json(r#"{"pid": 1}"#).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            sample().to_string(),
            "pid 123 tid 456 (/system/bin/foo) SIGSEGV fault addr 0xdead"
        );
    }
}
