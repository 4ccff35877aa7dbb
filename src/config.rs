//! Filter configuration for security crash detection.
//!
//! `Config` is built once with chainable setters and then only read by the
//! matcher. Setters that compile regular expressions return `Result`, so an
//! invalid pattern is reported when the configuration is built rather than
//! when crashes are matched.
use crate::constants::{DEFAULT_ABORT_MESSAGE_EXCLUDES, DEFAULT_SIGNALS, MIN_CRASH_ADDRESS};
use crate::crash::{parse_hex, BacktraceFrame};
use crate::error::*;

use num_bigint::BigUint;
use regex::Regex;
use regex_syntax::hir::{Anchor, Hir};
use serde::{Deserialize, Serialize};

/// Crash detection configuration.
#[derive(Clone, Debug)]
pub struct Config {
    check_min_address: bool,
    min_crash_address: BigUint,
    signals: Vec<String>,
    process_patterns: Vec<Regex>,
    abort_message_includes: Vec<Regex>,
    abort_message_excludes: Vec<Regex>,
    backtrace_includes: Vec<BacktraceFilterPattern>,
    backtrace_excludes: Vec<BacktraceFilterPattern>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            check_min_address: true,
            min_crash_address: BigUint::from(MIN_CRASH_ADDRESS),
            signals: DEFAULT_SIGNALS.iter().map(|s| s.to_string()).collect(),
            process_patterns: Vec::new(),
            abort_message_includes: Vec::new(),
            abort_message_excludes: DEFAULT_ABORT_MESSAGE_EXCLUDES
                .iter()
                .map(|s| Regex::new(s).unwrap())
                .collect(),
            backtrace_includes: Vec::new(),
            backtrace_excludes: Vec::new(),
        }
    }
}

/// Compile regular expressions.
fn to_patterns<I, S>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|s| Regex::new(s.as_ref()).map_err(Error::from))
        .collect()
}

/// Compile regular expressions that must match the whole input.
fn to_full_match_patterns<I, S>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|s| {
            // Validate user pattern on its own, so error positions refer to it.
            Regex::new(s.as_ref())?;
            // Anchor parsed pattern, raw text may end with a (?x) comment.
            let hir = regex_syntax::Parser::new()
                .parse(s.as_ref())
                .map_err(|err| Error::Config(err.to_string()))?;
            let anchored = Hir::concat(vec![
                Hir::anchor(Anchor::StartText),
                hir,
                Hir::anchor(Anchor::EndText),
            ]);
            Regex::new(&anchored.to_string()).map_err(Error::from)
        })
        .collect()
}

impl Config {
    /// Create configuration with default filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from json document, see `RawConfig`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        Config::try_from(raw)
    }

    /// Set minimal fault address of a security crash.
    pub fn set_min_address(mut self, min_crash_address: BigUint) -> Self {
        self.min_crash_address = min_crash_address;
        self
    }

    /// Enable or disable the minimal fault address check.
    pub fn check_min_address(mut self, check_min_address: bool) -> Self {
        self.check_min_address = check_min_address;
        self
    }

    /// Set the signals.
    pub fn set_signals<I, S>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.signals = signals.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Append signals.
    pub fn append_signals<I, S>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.signals
            .extend(signals.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    /// Set the process patterns. A pattern must match the whole process file
    /// name.
    pub fn set_process_patterns<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.process_patterns = to_full_match_patterns(patterns)?;
        Ok(self)
    }

    /// Append the process patterns.
    pub fn append_process_patterns<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.process_patterns
            .extend(to_full_match_patterns(patterns)?);
        Ok(self)
    }

    /// Set the abort message includes.
    pub fn set_abort_message_includes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.abort_message_includes = to_patterns(patterns)?;
        Ok(self)
    }

    /// Append the abort message includes.
    pub fn append_abort_message_includes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.abort_message_includes.extend(to_patterns(patterns)?);
        Ok(self)
    }

    /// Set the abort message excludes.
    pub fn set_abort_message_excludes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.abort_message_excludes = to_patterns(patterns)?;
        Ok(self)
    }

    /// Append the abort message excludes.
    pub fn append_abort_message_excludes<I, S>(mut self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.abort_message_excludes.extend(to_patterns(patterns)?);
        Ok(self)
    }

    /// Set which backtraces should be included.
    pub fn set_backtrace_includes<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = BacktraceFilterPattern>,
    {
        self.backtrace_includes = patterns.into_iter().collect();
        self
    }

    /// Append which backtraces should be included.
    pub fn append_backtrace_includes<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = BacktraceFilterPattern>,
    {
        self.backtrace_includes.extend(patterns);
        self
    }

    /// Set which backtraces should be excluded.
    pub fn set_backtrace_excludes<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = BacktraceFilterPattern>,
    {
        self.backtrace_excludes = patterns.into_iter().collect();
        self
    }

    /// Append which backtraces should be excluded.
    pub fn append_backtrace_excludes<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = BacktraceFilterPattern>,
    {
        self.backtrace_excludes.extend(patterns);
        self
    }

    pub fn checks_min_address(&self) -> bool {
        self.check_min_address
    }

    pub fn min_crash_address(&self) -> &BigUint {
        &self.min_crash_address
    }

    pub fn signals(&self) -> &[String] {
        &self.signals
    }

    /// Process patterns, anchored to match the whole process file name.
    pub fn process_patterns(&self) -> &[Regex] {
        &self.process_patterns
    }

    pub fn abort_message_includes(&self) -> &[Regex] {
        &self.abort_message_includes
    }

    pub fn abort_message_excludes(&self) -> &[Regex] {
        &self.abort_message_excludes
    }

    pub fn backtrace_includes(&self) -> &[BacktraceFilterPattern] {
        &self.backtrace_includes
    }

    pub fn backtrace_excludes(&self) -> &[BacktraceFilterPattern] {
        &self.backtrace_excludes
    }
}

/// Patterns to filter backtrace frames on.
///
/// A missing pattern is a wildcard and matches anything, even a missing frame
/// field. A missing frame field never matches a present pattern.
#[derive(Clone, Debug)]
pub struct BacktraceFilterPattern {
    filename: Option<Regex>,
    method: Option<Regex>,
}

impl BacktraceFilterPattern {
    /// Create filter from file name and method name regular expressions.
    ///
    /// # Arguments
    ///
    /// * `filename` - regex for frame file name, `None` matches anything
    ///
    /// * `method` - regex for frame method name, `None` matches anything
    pub fn new(filename: Option<&str>, method: Option<&str>) -> Result<Self> {
        Ok(BacktraceFilterPattern {
            filename: filename.map(Regex::new).transpose()?,
            method: method.map(Regex::new).transpose()?,
        })
    }

    /// Returns true if the patterns match a backtrace frame.
    pub fn matches(&self, frame: &BacktraceFrame) -> bool {
        fn field_matches(pattern: &Option<Regex>, field: &Option<String>) -> bool {
            match (pattern, field) {
                (None, _) => true,
                (Some(pattern), Some(field)) => pattern.is_match(field),
                (Some(_), None) => false,
            }
        }
        field_matches(&self.filename, &frame.filename) && field_matches(&self.method, &frame.method)
    }
}

/// Backtrace filter pattern as it is written in the json configuration.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct RawFramePattern {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

/// Json configuration. Missing keys keep default values.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct RawConfig {
    #[serde(default)]
    pub check_min_address: Option<bool>,
    /// Hex number with or without 0x prefix.
    #[serde(default)]
    pub min_crash_address: Option<String>,
    #[serde(default)]
    pub signals: Option<Vec<String>>,
    #[serde(default)]
    pub process_patterns: Vec<String>,
    #[serde(default)]
    pub abort_message_includes: Vec<String>,
    #[serde(default)]
    pub abort_message_excludes: Option<Vec<String>>,
    #[serde(default)]
    pub backtrace_includes: Vec<RawFramePattern>,
    #[serde(default)]
    pub backtrace_excludes: Vec<RawFramePattern>,
}

fn to_frame_patterns(patterns: &[RawFramePattern]) -> Result<Vec<BacktraceFilterPattern>> {
    patterns
        .iter()
        .map(|p| BacktraceFilterPattern::new(p.filename.as_deref(), p.method.as_deref()))
        .collect()
}

impl TryFrom<RawConfig> for Config {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let mut config = Config::new()
            .set_process_patterns(&raw.process_patterns)?
            .set_abort_message_includes(&raw.abort_message_includes)?
            .set_backtrace_includes(to_frame_patterns(&raw.backtrace_includes)?)
            .set_backtrace_excludes(to_frame_patterns(&raw.backtrace_excludes)?);
        if let Some(check) = raw.check_min_address {
            config = config.check_min_address(check);
        }
        if let Some(addr) = raw.min_crash_address {
            let hex = addr.trim();
            let hex = hex
                .strip_prefix("0x")
                .or_else(|| hex.strip_prefix("0X"))
                .unwrap_or(hex);
            let Some(addr) = parse_hex(hex) else {
                return Err(Error::Config(format!(
                    "Couldn't parse min_crash_address: {addr}"
                )));
            };
            config = config.set_min_address(addr);
        }
        if let Some(signals) = raw.signals {
            config = config.set_signals(signals);
        }
        if let Some(excludes) = raw.abort_message_excludes {
            config = config.set_abort_message_excludes(excludes)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SIGABRT;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert!(config.checks_min_address());
        assert_eq!(config.min_crash_address(), &BigUint::from(0x8000u32));
        assert_eq!(config.signals(), &["SIGSEGV", "SIGBUS"]);
        assert!(config.process_patterns().is_empty());
        assert!(config.abort_message_includes().is_empty());
        assert_eq!(config.abort_message_excludes().len(), 2);
        assert!(config.abort_message_excludes()[0].is_match("CHECK_EQ failed"));
        assert!(config.abort_message_excludes()[1].is_match("CANNOT LINK EXECUTABLE \"foo\""));
        assert!(config.backtrace_includes().is_empty());
        assert!(config.backtrace_excludes().is_empty());
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .append_signals([SIGABRT])
            .set_process_patterns(["mediaserver"])
            .unwrap()
            .append_process_patterns(["media\\.codec", "surfaceflinger"])
            .unwrap()
            .check_min_address(false)
            .set_min_address(BigUint::from(0x1000u32))
            .append_abort_message_excludes(["^Unable"])
            .unwrap()
            .set_backtrace_includes([BacktraceFilterPattern::new(Some("libstagefright"), None).unwrap()]);
        assert_eq!(config.signals(), &["SIGSEGV", "SIGBUS", "SIGABRT"]);
        assert_eq!(config.process_patterns().len(), 3);
        assert!(config.process_patterns()[0].is_match("mediaserver"));
        assert!(!config.process_patterns()[0].is_match("mediaserver64"));
        assert!(!config.checks_min_address());
        assert_eq!(config.min_crash_address(), &BigUint::from(0x1000u32));
        assert_eq!(config.abort_message_excludes().len(), 3);
        assert_eq!(config.backtrace_includes().len(), 1);

        let config = config.set_signals(["SIGILL"]);
        assert_eq!(config.signals(), &["SIGILL"]);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            Config::new().set_process_patterns(["("]),
            Err(Error::Regex(_))
        ));
        // Must not be accepted by closing the anchoring group.
        assert!(Config::new().set_process_patterns([")|(.*"]).is_err());
        assert!(Config::new().append_abort_message_includes(["[a-"]).is_err());
        assert!(BacktraceFilterPattern::new(None, Some("*")).is_err());
    }

    #[test]
    fn test_process_pattern_flags() {
        let config = Config::new()
            .set_process_patterns(["(?x)media server # comment", "(?i)SURFACE.*"])
            .unwrap();
        let patterns = config.process_patterns();
        assert!(patterns[0].is_match("mediaserver"));
        assert!(!patterns[0].is_match("mediaserver64"));
        assert!(!patterns[0].is_match("media server"));
        assert!(patterns[1].is_match("surfaceflinger"));
        assert!(!patterns[1].is_match("libsurface"));
    }

    #[test]
    fn test_backtrace_filter_pattern() {
        let frame = BacktraceFrame::new(Some("/system/lib64/libc.so"), Some("abort+164"));
        let no_method = BacktraceFrame::new(Some("/system/lib64/libc.so"), None);
        let empty = BacktraceFrame::default();

        let any = BacktraceFilterPattern::new(None, None).unwrap();
        assert!(any.matches(&frame));
        assert!(any.matches(&empty));

        let libc = BacktraceFilterPattern::new(Some("libc\\.so"), None).unwrap();
        assert!(libc.matches(&frame));
        assert!(libc.matches(&no_method));
        assert!(!libc.matches(&empty));

        let abort = BacktraceFilterPattern::new(Some("libc"), Some("^abort")).unwrap();
        assert!(abort.matches(&frame));
        assert!(!abort.matches(&no_method));

        let other = BacktraceFilterPattern::new(Some("libm"), Some("abort")).unwrap();
        assert!(!other.matches(&frame));
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(
            r#"{
                "check_min_address": false,
                "min_crash_address": "0x10000",
                "signals": ["SIGSEGV"],
                "process_patterns": ["mediaserver"],
                "abort_message_excludes": [],
                "backtrace_includes": [{"filename": "libstagefright"}],
                "backtrace_excludes": [{"method": "^abort"}]
            }"#,
        )
        .unwrap();
        assert!(!config.checks_min_address());
        assert_eq!(config.min_crash_address(), &BigUint::from(0x10000u32));
        assert_eq!(config.signals(), &["SIGSEGV"]);
        assert_eq!(config.process_patterns().len(), 1);
        assert!(config.abort_message_excludes().is_empty());
        assert_eq!(config.backtrace_includes().len(), 1);
        assert_eq!(config.backtrace_excludes().len(), 1);

        // Missing keys keep defaults.
        let config = Config::from_json("{}").unwrap();
        assert!(config.checks_min_address());
        assert_eq!(config.signals(), &["SIGSEGV", "SIGBUS"]);
        assert_eq!(config.abort_message_excludes().len(), 2);

        assert!(matches!(
            Config::from_json(r#"{"min_crash_address": "xyz"}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"process_patterns": ["("]}"#),
            Err(Error::Regex(_))
        ));
        assert!(matches!(Config::from_json("42"), Err(Error::Json(_))));
    }
}
