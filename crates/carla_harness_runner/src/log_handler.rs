//! A log handler which writes a set of files `logs/level.txt` under the current scenario's artifacts directory, where
//! each file contains all logs of that level or more severe.
//!
//! Warnings and errors also go to stderr, whether or not a scenario is running.
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{Context, Result};
use log::Level;

// Logs are timestamped relative to installation of the handler, which touches this.
lazy_static::lazy_static! {
    static ref EPOCH: Instant = Instant::now();
    static ref FILES: Mutex<Vec<(Level, File)>> = Mutex::new(vec![]);
}

struct LogHandler;

pub fn install_log_handler() {
    log::set_max_level(log::LevelFilter::Trace);
    log::set_boxed_logger(Box::new(LogHandler)).expect("Unable to install logger");
    log::trace!("Logger installed");
}

/// Send logs to `ROOT/logs/level.txt` until the next call to this function or [stop_redirecting].
pub fn redirect_logs(root: &Path) -> Result<()> {
    let logroot = root.join("logs");
    std::fs::create_dir_all(&logroot)
        .with_context(|| format!("Creating log directory {}", logroot.display()))?;

    let files = [
        (Level::Error, "error.txt"),
        (Level::Warn, "warn.txt"),
        (Level::Info, "info.txt"),
        (Level::Debug, "debug.txt"),
        (Level::Trace, "trace.txt"),
    ]
    .into_iter()
    .map(|(l, subpath)| {
        let fullpath = logroot.join(subpath);
        File::create(&fullpath)
            .map(|f| (l, f))
            .with_context(|| format!("Opening log file {}", fullpath.display()))
    })
    .collect::<Result<Vec<_>>>()?;

    *FILES.lock().unwrap() = files;
    Ok(())
}

/// Close the log files.  Needed before a scenario's artifacts directory can be removed.
pub fn stop_redirecting() {
    FILES.lock().unwrap().clear();
}

impl log::Log for LogHandler {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn flush(&self) {}

    fn log(&self, record: &log::Record) {
        let since_epoch = chrono::TimeDelta::from_std(Instant::now() - *EPOCH)
            .unwrap_or_else(|_| chrono::TimeDelta::zero());

        let message = format!(
            "{since_epoch}: {}: {} (at target {} line {})",
            record.level(),
            record.args(),
            record.target(),
            record.line().unwrap_or(0)
        );

        if record.level() <= Level::Warn {
            eprintln!("{message}");
        }

        // Logging from inside the panic hook while a log write panicked would poison this; drop the line instead.
        let Ok(mut files) = FILES.lock() else {
            return;
        };
        for (level, file) in files.iter_mut() {
            if record.level() > *level {
                continue;
            }
            let _ = writeln!(file, "{message}");
        }
    }
}
