use casr_tombstone::config::Config;
use casr_tombstone::crash::CrashRecord;
use casr_tombstone::matcher::{filter_security_crashes, Pipeline};
use casr_tombstone::session::{crashes_by_test, TestCrashes};
use casr_tombstone::tombstone::extract_crashes;

use anyhow::{bail, Context, Result};
use clap::{App, Arg, ArgGroup, ArgMatches};
use log::{debug, info, warn};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use simplelog::{ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Build crash filter configuration from json file and command line options.
fn config_from_matches(matches: &ArgMatches) -> Result<Config> {
    let mut config = if let Some(path) = matches.value_of("config") {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Couldn't read config file: {path}"))?;
        Config::from_json(&json).with_context(|| format!("Invalid config file: {path}"))?
    } else {
        Config::new()
    };
    if let Some(patterns) = matches.values_of("process") {
        config = config
            .append_process_patterns(patterns)
            .with_context(|| "Invalid process pattern")?;
    }
    if let Some(signals) = matches.values_of("signal") {
        config = config.append_signals(signals);
    }
    if matches.is_present("no-min-address") {
        config = config.check_min_address(false);
    }
    if config.process_patterns().is_empty() {
        warn!("No process patterns are set, no crash will be reported as security crash");
    }
    Ok(config)
}

/// Read log text from file or stdin.
fn read_log(path: Option<&str>) -> Result<String> {
    let mut buf = Vec::new();
    if let Some(path) = path {
        if !Path::new(path).exists() {
            bail!("Input file not found: {path}");
        }
        buf = fs::read(path).with_context(|| format!("Couldn't read input file: {path}"))?;
    } else {
        io::stdin()
            .read_to_end(&mut buf)
            .with_context(|| "Couldn't read stdin")?;
    }
    // Logcat may contain broken utf-8 from native processes.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Keep only security crashes unless all crashes are requested.
fn select(crashes: Vec<CrashRecord>, config: &Config, all: bool) -> Vec<CrashRecord> {
    if all {
        crashes
    } else {
        filter_security_crashes(&crashes, config)
            .into_iter()
            .cloned()
            .collect()
    }
}

fn main() -> Result<()> {
    let matches = App::new("casr-tombstone")
        .version("0.1.0")
        .about("Extract native crashes from logcat and detect security crashes")
        .term_width(90)
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .takes_value(true)
                .value_name("FILE")
                .help("Logcat file to scan, stdin is read if not set"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .takes_value(true)
                .value_name("FILE")
                .help("Json file with crash filter configuration"),
        )
        .arg(
            Arg::new("process")
                .short('p')
                .long("process")
                .takes_value(true)
                .multiple_occurrences(true)
                .value_name("REGEX")
                .help("Process file name pattern, must match the whole name"),
        )
        .arg(
            Arg::new("signal")
                .short('s')
                .long("signal")
                .takes_value(true)
                .multiple_occurrences(true)
                .value_name("SIGNAL")
                .help("Additional signal of security crashes, e.g. SIGABRT"),
        )
        .arg(
            Arg::new("no-min-address")
                .long("no-min-address")
                .help("Do not skip crashes with fault address below the minimal address"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .help("Output all crashes, not only security crashes"),
        )
        .arg(
            Arg::new("by-test")
                .long("by-test")
                .help("Group crashes by the instrumentation test that was running"),
        )
        .arg(
            Arg::new("jobs")
                .long("jobs")
                .short('j')
                .value_name("N")
                .takes_value(true)
                .help("Number of parallel jobs for --by-test")
                .validator(|arg| {
                    if let Ok(x) = arg.parse::<u64>() {
                        if x > 0 {
                            return Ok(());
                        }
                    }
                    Err(String::from("Couldn't parse jobs value"))
                }),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .help("Path to save crashes as json"),
        )
        .arg(
            Arg::new("stdout")
                .long("stdout")
                .help("Print crashes as json to stdout"),
        )
        .group(
            ArgGroup::new("out")
                .args(&["stdout", "output"])
                .required(true),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Exit with error if a security crash is found"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .takes_value(true)
                .default_value("info")
                .possible_values(["info", "debug"])
                .help("Logging level"),
        )
        .get_matches();

    let log_level = if matches.value_of("log-level").unwrap() == "debug" {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(
        log_level,
        ConfigBuilder::new().set_time_to_local(true).build(),
        TerminalMode::Stderr,
    );

    let config = config_from_matches(&matches)?;
    let text = read_log(matches.value_of("input"))?;
    let all = matches.is_present("all");
    debug!(
        "Filter stages: {}",
        Pipeline::new(&config).stage_names().join(", ")
    );

    let (repstr, found) = if matches.is_present("by-test") {
        let jobs = if let Some(jobs) = matches.value_of("jobs") {
            jobs.parse::<usize>().unwrap()
        } else {
            std::cmp::max(1, num_cpus::get() / 2)
        };
        let groups = crashes_by_test(&text);
        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.min(groups.len()).max(1))
            .build_global();
        let (groups, counts): (Vec<TestCrashes>, Vec<usize>) = groups
            .into_par_iter()
            .map(|mut group| {
                let total = group.crashes.len();
                let security = filter_security_crashes(&group.crashes, &config).len();
                info!(
                    "{}: {total} crashes, {security} security crashes",
                    group.test.as_deref().unwrap_or("<before first test>")
                );
                group.crashes = select(std::mem::take(&mut group.crashes), &config, all);
                (group, security)
            })
            .unzip();
        let found: usize = counts.iter().sum();
        (serde_json::to_string_pretty(&groups)?, found)
    } else {
        let crashes = extract_crashes(&text);
        let security = filter_security_crashes(&crashes, &config);
        for crash in &security {
            info!("Security crash: {crash}");
        }
        info!(
            "Found {} crashes, {} security crashes",
            crashes.len(),
            security.len()
        );
        let found = security.len();
        (
            serde_json::to_string_pretty(&select(crashes, &config, all))?,
            found,
        )
    };

    if matches.is_present("stdout") {
        println!("{repstr}");
    }
    if let Some(path) = matches.value_of("output") {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Couldn't save crashes to file: {path}"))?;
        file.write_all(repstr.as_bytes())
            .with_context(|| format!("Couldn't write data to file: {path}"))?;
    }

    if matches.is_present("strict") && found > 0 {
        bail!("{found} security crashes detected");
    }
    Ok(())
}
