/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, Command, value_parser};
use log::{info, warn};
use slog::{Drain, Level, OwnedKVList, Record, slog_o};
use slog_scope::GlobalLoggerGuard;

use g3_plugin_vc::PluginVcCore;
use g3_plugin_vc::config::PluginVcSettings;

mod client;
mod echo;

const ARG_CONFIG: &str = "config";
const ARG_BYTES: &str = "bytes";
const ARG_CHUNK: &str = "chunk";
const ARG_TIMEOUT: &str = "timeout";
const ARG_VERBOSE: &str = "verbose";

fn build_cli_args() -> Command {
    Command::new("test-plugin-vc")
        .arg(
            Arg::new(ARG_CONFIG)
                .help("yaml settings file")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_parser(value_parser!(PathBuf))
                .long("config")
                .short('c'),
        )
        .arg(
            Arg::new(ARG_BYTES)
                .help("how many bytes to send through the tunnel")
                .num_args(1)
                .value_name("BYTES")
                .value_parser(value_parser!(usize))
                .default_value("1048576")
                .long("bytes"),
        )
        .arg(
            Arg::new(ARG_CHUNK)
                .help("size of each write from the client")
                .num_args(1)
                .value_name("BYTES")
                .value_parser(value_parser!(usize))
                .default_value("1500")
                .long("chunk"),
        )
        .arg(
            Arg::new(ARG_TIMEOUT)
                .help("seconds to wait for the echo to finish")
                .num_args(1)
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .default_value("60")
                .long("timeout"),
        )
        .arg(
            Arg::new(ARG_VERBOSE)
                .help("show verbose message")
                .num_args(0)
                .action(ArgAction::Count)
                .short('v'),
        )
}

struct StderrDrain;

impl Drain for StderrDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &Record, _values: &OwnedKVList) -> Result<(), slog::Never> {
        eprintln!(
            "{} {}: {}",
            record.level().as_short_str(),
            record.module(),
            record.msg()
        );
        Ok(())
    }
}

fn setup_log(verbose: u8) -> anyhow::Result<GlobalLoggerGuard> {
    let (slog_level, log_level) = match verbose {
        0 => (Level::Info, log::Level::Info),
        1 => (Level::Debug, log::Level::Debug),
        _ => (Level::Trace, log::Level::Trace),
    };
    let drain = StderrDrain.filter_level(slog_level);
    let logger = slog::Logger::root(drain.fuse(), slog_o!());

    let scope_guard = slog_scope::set_global_logger(logger);

    slog_stdlog::init_with_level(log_level)?;
    Ok(scope_guard)
}

fn main() -> anyhow::Result<()> {
    let args = build_cli_args().get_matches();

    let verbose = args.get_count(ARG_VERBOSE);
    let _logger_guard = setup_log(verbose)?;

    let mut settings = match args.get_one::<PathBuf>(ARG_CONFIG) {
        Some(path) => PluginVcSettings::load_file(path)?,
        None => PluginVcSettings::default(),
    };
    settings.runtime.check().context("invalid runtime config")?;
    settings
        .plugin_vc
        .check()
        .context("invalid plugin vc config")?;

    let total = args.get_one::<usize>(ARG_BYTES).copied().unwrap_or_default();
    let chunk = args.get_one::<usize>(ARG_CHUNK).copied().unwrap_or(1500);
    if total == 0 {
        return Err(anyhow!("nothing to send"));
    }
    if chunk == 0 {
        return Err(anyhow!("chunk size should not be zero"));
    }
    let timeout = args
        .get_one::<u64>(ARG_TIMEOUT)
        .map(|s| Duration::from_secs(*s))
        .unwrap_or(Duration::from_secs(60));

    let (processor, _rt_guard) = settings.runtime.start()?;
    info!(
        "event processor started with {} threads",
        settings.runtime.thread_number()
    );

    let echo = echo::EchoServer::new();
    let core = PluginVcCore::alloc_with_config(
        &processor,
        Arc::new(settings.plugin_vc.clone()),
        echo.clone(),
        &settings.connect,
    );
    let active = core.connect()?;
    info!("core {} connected", core.id());

    let (sender, receiver) = mpsc::channel();
    let start = Instant::now();
    let client = client::EchoClient::new(total, chunk, sender);
    client.start(&active)?;

    let r = receiver
        .recv_timeout(timeout)
        .map_err(|_| anyhow!("no echo result after {timeout:?}"))
        .and_then(|r| r);
    active.close();

    let time_used = start.elapsed();
    let wait_end = Instant::now() + Duration::from_secs(1);
    while !core.is_destroyed() && Instant::now() < wait_end {
        std::thread::sleep(Duration::from_millis(10));
    }
    if !core.is_destroyed() {
        warn!("core {} is still alive after close", core.id());
    }

    let stats = r?;
    let secs = time_used.as_secs_f64();
    info!(
        "echoed {} bytes in {time_used:?}, {} write events, {} read events, {:.2} MiB/s",
        stats.bytes,
        stats.write_events,
        stats.read_events,
        stats.bytes as f64 / 1024.0 / 1024.0 / secs.max(f64::EPSILON)
    );
    info!("echo server handled {} events", echo.handled_events());
    Ok(())
}
