use std::{
    io::{self, IsTerminal},
    path::Path,
};

use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::cli::ColorChoice;

const FILE_PREFIX: &str = "canopy";

/// Keeps the background file writer alive. Dropping it flushes pending lines.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs the global subscriber. Library code logs through the `log`
/// macros; the subscriber picks those up as well.
///
/// `RUST_LOG` overrides the verbosity-derived console filter. When `log_dir`
/// is given, everything down to debug also goes to a daily-rotated file there.
pub fn init_logging(verbosity: u8, color: ColorChoice, log_dir: Option<&Path>) -> LogGuard {
    let console_env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_filter(verbosity)));

    let use_ansi = match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stderr().is_terminal(),
    };

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(use_ansi)
        .without_time()
        .with_target(false)
        .with_level(true)
        .with_filter(console_env_filter);

    let mut file_guard = None;

    let file_layer = match log_dir {
        Some(dir) => match fs_err::create_dir_all(dir) {
            Ok(()) => match tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix(FILE_PREFIX)
                .filename_suffix("log")
                .build(dir)
            {
                Ok(appender) => {
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                    file_guard = Some(guard);

                    Some(
                        fmt::layer()
                            .with_writer(non_blocking)
                            .with_ansi(false)
                            .with_timer(UtcTime::rfc_3339())
                            .with_target(true)
                            .with_thread_names(true)
                            .with_filter(EnvFilter::new("libcanopy=debug,info")),
                    )
                }
                Err(err) => {
                    eprintln!("Warning: could not open log file in {}: {err}", dir.display());
                    None
                }
            },
            Err(err) => {
                eprintln!("Warning: {err}");
                None
            }
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}

fn console_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "info,libcanopy=debug",
        2 => "info,libcanopy=trace",
        _ => "trace",
    }
}
