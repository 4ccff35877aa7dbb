//! Tombstone module extracts native crashes that debuggerd prints to logcat.
//!
//! A crash block starts with the `*** *** ***` header line and ends with the
//! `backtrace:` line. Backtrace frames follow the block, one per line.
use crate::crash::{parse_hex, BacktraceFrame, CrashRecord};

use regex::Regex;

lazy_static::lazy_static! {
    /// Smallest blob that has the crash header and footer.
    static ref CRASH_BLOB: Regex =
        Regex::new(r"(?s)DEBUG\s+?:( [*]{3})+?.*?DEBUG\s+?:\s+?backtrace:").unwrap();
    /// pid: 123, tid: 456, name: foo  >>> /system/bin/foo <<<
    static ref PID_TID_NAME: Regex =
        Regex::new(r"pid: (\d+?), tid: (\d+?), name: ((?:[^\s]+?\s+?)*?)>>> (.*?) <<<").unwrap();
    /// signal 11 (SIGSEGV), code 1 (SEGV_MAPERR), fault addr 0xdead
    static ref FAULT_LINE: Regex = Regex::new(
        r"\w+? \d+? \((.*?)\), code -*?\d+? \(.*?\), fault addr (?:0x([[:xdigit:]]+)|-+)"
    )
    .unwrap();
    static ref ABORT_MESSAGE: Regex = Regex::new(r"(?i)Abort message: ([^\r\n]*)").unwrap();
    static ref BACKTRACE_NOTE: Regex =
        Regex::new(r"^[0-9\-\s:.]+[A-Z] DEBUG\s+:\s+NOTE: .*$").unwrap();
    /// Backtrace frame grammars in priority order. The first one that matches
    /// the whole line wins.
    static ref BACKTRACE_FRAME_GRAMMARS: Vec<Regex> = vec![
        // #00 pc 000000000004f8a4  /system/lib64/libc.so (abort+164) (BuildId: 1a2b)
        Regex::new(
            r"^[0-9\-\s:.]+[A-Z] DEBUG\s+:\s+#[0-9]+ pc [0-9a-fA-F]+  (?P<filename>[^\s]+)(\s+\((?P<method>.*)\))?\s+\(BuildId: .*\)$"
        )
        .unwrap(),
        // #00 pc 000000000004f8a4  /system/lib64/libc.so (abort+164)
        Regex::new(
            r"^[0-9\-\s:.]+[A-Z] DEBUG\s+:\s+#[0-9]+ pc [0-9a-fA-F]+  (?P<filename>[^\s]+)(\s+\((?P<method>.*)\))?$"
        )
        .unwrap(),
    ];
}

/// Extract all crashes from log text.
///
/// # Arguments
///
/// * `text` - logcat output
///
/// # Return value
///
/// Crash records in the order they appear in the log.
pub fn extract_crashes(text: &str) -> Vec<CrashRecord> {
    let mut crashes = Vec::new();
    add_all_crashes(text, &mut crashes);
    crashes
}

/// Append all crashes found in log text to `crashes`.
///
/// # Arguments
///
/// * `text` - logcat output
///
/// * `crashes` - crash records collected so far
pub fn add_all_crashes(text: &str, crashes: &mut Vec<CrashRecord>) {
    crashes.extend(extract_located_crashes(text).into_iter().map(|(_, crash)| crash));
}

/// Extract all crashes from log text together with their positions.
///
/// # Arguments
///
/// * `text` - logcat output
///
/// # Return value
///
/// Pairs of crash blob start offset in `text` and crash record, in log order.
pub fn extract_located_crashes(text: &str) -> Vec<(usize, CrashRecord)> {
    CRASH_BLOB
        .find_iter(text)
        .map(|blob| {
            let backtrace = collect_backtrace(&text[blob.end()..]);
            (blob.start(), parse_crash_blob(blob.as_str(), backtrace))
        })
        .collect()
}

/// Parse crash fields from one crash blob.
fn parse_crash_blob(blob: &str, backtrace: Vec<BacktraceFrame>) -> CrashRecord {
    let mut crash = CrashRecord {
        backtrace,
        ..Default::default()
    };

    if let Some(caps) = PID_TID_NAME.captures(blob) {
        crash.pid = caps[1].parse::<i32>().unwrap_or(0);
        crash.tid = caps[2].parse::<i32>().unwrap_or(0);
        crash.name = caps
            .get(3)
            .map(|name| name.as_str().trim())
            .filter(|name| !name.is_empty())
            .map(|name| name.to_string());
        crash.process = Some(caps[4].trim().to_string());
    }

    if let Some(caps) = FAULT_LINE.captures(blob) {
        crash.signal = Some(caps[1].to_string());
        // "fault addr --------" leaves address unknown.
        crash.fault_address = caps.get(2).and_then(|addr| parse_hex(addr.as_str()));
    }

    if let Some(caps) = ABORT_MESSAGE.captures(blob) {
        crash.abort_message = Some(caps[1].to_string());
    }

    crash
}

/// Collect backtrace frames from the lines right after the crash blob.
///
/// Scanning stops at the first line that is neither a NOTE nor a frame, so
/// unrelated lines between the footer and the frames leave the backtrace
/// empty.
///
/// # Arguments
///
/// * `tail` - log text starting at the end of the crash blob
fn collect_backtrace(tail: &str) -> Vec<BacktraceFrame> {
    // Skip the rest of the "backtrace:" line.
    let Some(start) = tail.find('\n') else {
        return Vec::new();
    };

    let mut frames = Vec::new();
    for line in tail[start + 1..].split_inclusive('\n') {
        // Unterminated last line is not scanned.
        let Some(line) = line.strip_suffix('\n') else {
            break;
        };
        let line = line.strip_suffix('\r').unwrap_or(line);
        if BACKTRACE_NOTE.is_match(line) {
            continue;
        }
        let Some(frame) = parse_backtrace_frame(line) else {
            break;
        };
        frames.push(frame);
    }
    frames
}

/// Parse one logcat line as a backtrace frame.
///
/// # Arguments
///
/// * `line` - logcat line without line terminator
///
/// # Return value
///
/// Frame if some frame grammar matches the whole line.
pub fn parse_backtrace_frame(line: &str) -> Option<BacktraceFrame> {
    let caps = BACKTRACE_FRAME_GRAMMARS
        .iter()
        .find_map(|grammar| grammar.captures(line))?;
    Some(BacktraceFrame::new(
        caps.name("filename").map(|m| m.as_str()),
        caps.name("method").map(|m| m.as_str()),
    ))
}
