//! Matcher module decides which crashes are security relevant.
//!
//! A crash is checked by an ordered pipeline of filter stages built from
//! `Config`. The first stage that rejects a crash stops the evaluation:
//!
//! 1. process file name fully matches some process pattern;
//! 2. signal is one of the configured signals;
//! 3. abort message (if any) matches some include and no exclude;
//! 4. fault address (if known) is not below the minimal address;
//! 5. some frame matches some backtrace include;
//! 6. no frame matches any backtrace exclude.
use crate::config::{BacktraceFilterPattern, Config};
use crate::crash::CrashRecord;

use log::debug;

/// Named filter stage.
pub struct Stage<'a> {
    name: &'static str,
    accepts: Box<dyn Fn(&CrashRecord) -> bool + 'a>,
}

impl<'a> Stage<'a> {
    pub fn new<F>(name: &'static str, accepts: F) -> Self
    where
        F: Fn(&CrashRecord) -> bool + 'a,
    {
        Stage {
            name,
            accepts: Box::new(accepts),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn accepts(&self, crash: &CrashRecord) -> bool {
        (self.accepts)(crash)
    }
}

/// Ordered filter stages for one configuration.
pub struct Pipeline<'a> {
    stages: Vec<Stage<'a>>,
}

impl<'a> Pipeline<'a> {
    /// Build filter stages from configuration.
    pub fn new(config: &'a Config) -> Self {
        let mut stages = vec![
            Stage::new("process", move |crash| process_matches(crash, config)),
            Stage::new("signal", move |crash| signal_matches(crash, config)),
            Stage::new("abort message", move |crash| {
                abort_message_matches(crash, config)
            }),
            Stage::new("fault address", move |crash| {
                fault_address_matches(crash, config)
            }),
        ];
        if !config.backtrace_includes().is_empty() {
            stages.push(Stage::new("backtrace includes", move |crash| {
                backtrace_included(crash, config)
            }));
        }
        if !config.backtrace_excludes().is_empty() {
            stages.push(Stage::new("backtrace excludes", move |crash| {
                !backtrace_excluded(crash, config)
            }));
        }
        Pipeline { stages }
    }

    /// Stage names in evaluation order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Returns the first stage that rejects the crash.
    pub fn rejected_by(&self, crash: &CrashRecord) -> Option<&'static str> {
        self.stages
            .iter()
            .find(|stage| !stage.accepts(crash))
            .map(Stage::name)
    }

    /// Returns true if every stage accepts the crash.
    pub fn accepts(&self, crash: &CrashRecord) -> bool {
        match self.rejected_by(crash) {
            Some(stage) => {
                debug!("Skipping crash ({crash}): rejected by {stage} filter");
                false
            }
            None => true,
        }
    }

    /// Keep crashes accepted by every stage, preserving order.
    pub fn filter<'c>(&self, crashes: &'c [CrashRecord]) -> Vec<&'c CrashRecord> {
        crashes.iter().filter(|crash| self.accepts(crash)).collect()
    }
}

/// Determine which crashes should fail a security test.
///
/// # Arguments
///
/// * `crashes` - crashes to check
///
/// * `config` - crash detection configuration
///
/// # Return value
///
/// Crashes serious enough to fail a security test, in input order.
pub fn filter_security_crashes<'c>(
    crashes: &'c [CrashRecord],
    config: &Config,
) -> Vec<&'c CrashRecord> {
    Pipeline::new(config).filter(crashes)
}

/// Returns true if some crash is serious enough to fail a security test.
pub fn has_security_crash(crashes: &[CrashRecord], config: &Config) -> bool {
    let pipeline = Pipeline::new(config);
    crashes.iter().any(|crash| pipeline.accepts(crash))
}

/// Process file name fully matches some process pattern. Unknown process
/// never matches.
pub fn process_matches(crash: &CrashRecord, config: &Config) -> bool {
    let file_name = crash.process_file_name();
    config
        .process_patterns()
        .iter()
        .any(|pattern| pattern.is_match(file_name))
}

/// Signal is one of the configured signals.
pub fn signal_matches(crash: &CrashRecord, config: &Config) -> bool {
    let Some(signal) = &crash.signal else {
        return false;
    };
    config.signals().iter().any(|s| s == signal)
}

/// Abort message matches some include (if any are set) and no exclude.
/// Crashes without abort message always pass.
pub fn abort_message_matches(crash: &CrashRecord, config: &Config) -> bool {
    let Some(message) = &crash.abort_message else {
        return true;
    };
    let includes = config.abort_message_includes();
    if !includes.is_empty() && !includes.iter().any(|p| p.is_match(message)) {
        return false;
    }
    !config
        .abort_message_excludes()
        .iter()
        .any(|p| p.is_match(message))
}

/// Known fault address is not below the minimal crash address.
pub fn fault_address_matches(crash: &CrashRecord, config: &Config) -> bool {
    if !config.checks_min_address() {
        return true;
    }
    match &crash.fault_address {
        Some(addr) => addr >= config.min_crash_address(),
        None => true,
    }
}

fn any_frame_matches(crash: &CrashRecord, patterns: &[BacktraceFilterPattern]) -> bool {
    crash
        .backtrace
        .iter()
        .any(|frame| patterns.iter().any(|p| p.matches(frame)))
}

/// Some frame matches some backtrace include. No includes means any backtrace
/// passes.
pub fn backtrace_included(crash: &CrashRecord, config: &Config) -> bool {
    let includes = config.backtrace_includes();
    includes.is_empty() || any_frame_matches(crash, includes)
}

/// Some frame matches some backtrace exclude.
pub fn backtrace_excluded(crash: &CrashRecord, config: &Config) -> bool {
    any_frame_matches(crash, config.backtrace_excludes())
}
