mod cli;
mod error_fmt;
mod event_log;
mod monitor;
mod offline;
mod report;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use eyre::Result;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn rotation(name: Option<&str>) -> Rotation {
    match name.map(str::to_ascii_lowercase).as_deref() {
        Some("daily") => Rotation::DAILY,
        Some("hourly") => Rotation::HOURLY,
        _ => Rotation::NEVER,
    }
}

fn file_layer(logging: &crc_config::Logging) -> Result<Option<BoxedLayer>> {
    let Some(file) = logging.file.as_deref() else {
        return Ok(None);
    };
    let path = Path::new(file);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .map_or_else(|| "crc15.log".to_string(), |n| n.to_string_lossy().into_owned());
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(rotation(logging.rotation.as_deref()))
        .filename_prefix(prefix)
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    let level = logging.level.as_deref().unwrap_or("info");
    Ok(Some(
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(EnvFilter::new(level))
            .boxed(),
    ))
}

fn init_tracing(cli: &Cli, logging: &crc_config::Logging) -> Result<()> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let console = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter(&cli.log_level))
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter(&cli.log_level))
            .boxed()
    };
    layers.push(console);
    if let Some(file) = file_layer(logging)? {
        layers.push(file);
    }
    tracing_subscriber::registry().with(layers).try_init()?;
    Ok(())
}

fn run(cli: Cli, shutdown: &Arc<AtomicBool>) -> Result<()> {
    let cfg = crc_config::load_file(&cli.config)?;
    init_tracing(&cli, &cfg.logging)?;
    tracing::debug!(config = %cli.config.display(), "configuration loaded");

    match cli.cmd {
        Commands::Monitor {
            user,
            batch,
            interval,
            window,
            duration,
            emulate,
            no_log,
        } => monitor::run_monitor(
            cfg,
            monitor::MonitorOpts {
                user,
                batch,
                interval,
                window,
                duration,
                emulate,
                no_log,
            },
            shutdown,
        ),
        Commands::SelfCheck { emulate } => monitor::self_check(&cfg, emulate),
        Commands::Fit {
            log,
            window,
            interval,
            from,
        } => offline::run_fit(
            &cfg,
            &log,
            offline::FitOpts {
                window,
                interval,
                from,
            },
        ),
    }
}

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            eprintln!("warning: Ctrl-C handler not installed: {e}");
        }
    }

    if let Err(err) = run(cli, &shutdown) {
        if cli::json_mode() {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        std::process::exit(exit_code_for_error(&err));
    }
}
