//! Attribute crashes to the instrumentation tests that were running.
use crate::constants::NEW_TEST_ALERT;
use crate::crash::CrashRecord;
use crate::tombstone::extract_located_crashes;

use regex::Regex;
use serde::Serialize;

lazy_static::lazy_static! {
    /// New test starting with name: testFoo(com.android.FooTest)
    static ref NEW_TEST: Regex =
        Regex::new(&format!(r"{}(\w+?)\(.*?\)", regex::escape(NEW_TEST_ALERT))).unwrap();
}

/// Crashes that happened while one test was running.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct TestCrashes {
    /// Test name, `None` for the log before the first test.
    pub test: Option<String>,
    pub crashes: Vec<CrashRecord>,
}

impl TestCrashes {
    /// Create empty crash group for test.
    pub fn new(test: Option<&str>) -> Self {
        TestCrashes {
            test: test.map(|name| name.to_string()),
            crashes: Vec::new(),
        }
    }

    /// Log before the first test is reported only if it has crashes.
    pub fn is_reported(&self) -> bool {
        self.test.is_some() || !self.crashes.is_empty()
    }
}

/// Find test start announcements.
///
/// # Arguments
///
/// * `text` - logcat output
///
/// # Return value
///
/// Pairs of announcement line start offset and test name in log order.
pub fn test_starts(text: &str) -> Vec<(usize, &str)> {
    NEW_TEST
        .captures_iter(text)
        .filter_map(|caps| {
            let (Some(alert), Some(name)) = (caps.get(0), caps.get(1)) else {
                return None;
            };
            let line_start = text[..alert.start()].rfind('\n').map_or(0, |pos| pos + 1);
            Some((line_start, name.as_str()))
        })
        .collect()
}

/// Extract crashes per test.
///
/// Crash blobs are found in the whole log, and every crash belongs to the
/// test that was announced last before its blob start. Announcements printed
/// in the middle of a crash blob do not split it.
///
/// # Arguments
///
/// * `text` - logcat output
///
/// # Return value
///
/// Crashes grouped by test in log order. Log before the first test is
/// omitted if it has no crashes.
pub fn crashes_by_test(text: &str) -> Vec<TestCrashes> {
    let starts = test_starts(text);
    let mut groups = vec![TestCrashes::new(None)];
    groups.extend(starts.iter().map(|&(_, name)| TestCrashes::new(Some(name))));
    for (offset, crash) in extract_located_crashes(text) {
        let index = starts.partition_point(|(start, _)| *start <= offset);
        groups[index].crashes.push(crash);
    }
    groups.retain(TestCrashes::is_reported);
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tombstone::tests::{crash_lines, logcat};

    fn blob(pid: &str, process: &str) -> String {
        logcat(
            &crash_lines(pid, "main", process)
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        )
    }

    fn announce(test: &str) -> String {
        format!(
            "10-16 11:22:30.000  4321  4350 I TestRunner: {NEW_TEST_ALERT}{test}(android.security.cts.StagefrightTest)\n"
        )
    }

    #[test]
    fn test_test_starts() {
        assert!(test_starts("").is_empty());

        let text = format!("boot\n{}line\n{}", announce("testA"), announce("testB"));
        let starts = test_starts(&text);
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0], (5, "testA"));
        assert_eq!(starts[1].1, "testB");
        assert_eq!(&text[starts[1].0 - 5..starts[1].0], "line\n");
    }

    #[test]
    fn test_crashes_by_test() {
        let mut text = String::new();
        text.push_str(&announce("testBug_1234"));
        text.push_str(&blob("10", "/system/bin/mediaserver"));
        text.push_str(&announce("testBug_5678"));
        text.push_str(&announce("testBug_9999"));
        text.push_str(&blob("11", "/system/bin/surfaceflinger"));
        text.push_str(&blob("12", "/system/bin/surfaceflinger"));

        let groups = crashes_by_test(&text);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].test.as_deref(), Some("testBug_1234"));
        assert_eq!(groups[0].crashes.len(), 1);
        assert_eq!(groups[0].crashes[0].pid, 10);
        assert_eq!(groups[1].test.as_deref(), Some("testBug_5678"));
        assert!(groups[1].crashes.is_empty());
        assert_eq!(groups[2].test.as_deref(), Some("testBug_9999"));
        assert_eq!(
            groups[2].crashes.iter().map(|c| c.pid).collect::<Vec<_>>(),
            vec![11, 12]
        );

        let text = format!("{}{}", blob("1", "foo"), announce("testA"));
        let groups = crashes_by_test(&text);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].test, None);
        assert_eq!(groups[0].crashes.len(), 1);
    }

    #[test]
    fn test_announcement_inside_blob() {
        let lines = crash_lines("42", "main", "/system/bin/mediaserver");
        let (head, tail) = lines.split_at(4);
        let mut text = announce("testA");
        text.push_str(&logcat(&head.iter().map(String::as_str).collect::<Vec<_>>()));
        text.push_str(&announce("testB"));
        text.push_str(&logcat(&tail.iter().map(String::as_str).collect::<Vec<_>>()));

        let groups = crashes_by_test(&text);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].test.as_deref(), Some("testA"));
        assert_eq!(groups[0].crashes.len(), 1);
        assert_eq!(groups[0].crashes[0].pid, 42);
        assert_eq!(groups[0].crashes[0].signal.as_deref(), Some("SIGSEGV"));
        assert_eq!(groups[1].test.as_deref(), Some("testB"));
        assert!(groups[1].crashes.is_empty());
    }
}
