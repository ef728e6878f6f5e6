//! Logging setup for the primary personality. Writes to a file rather than
//! stderr/stdout — those carry the multiplexed child output once an exec is
//! underway, so anything logged there would corrupt the stream.

use std::fs::OpenOptions;
use std::io::Write as _;

use chrono::Utc;
use env_logger::{Builder, Env, Target};
use log::Level;

/// Installs the global logger. `debug` maps to the `debug` level floor;
/// otherwise only warnings and errors are kept. `log_path` is the file the
/// formatted lines are appended to.
pub fn setup(log_path: &camino::Utf8Path, debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let Ok(file) =
        OpenOptions::new().create(true).append(true).open(log_path)
    else {
        return;
    };

    Builder::from_env(Env::default().filter_or("WHARFRAT_LOG", default_level))
        .format(|buf, record| {
            let now = Utc::now().format("%y/%m/%d %H:%M:%S%.3f");
            let lvl = level_char(record.level());
            writeln!(buf, "{lvl} {now} {} {}", record.target(), record.args())
        })
        .target(Target::Pipe(Box::new(file)))
        .init();
}

fn level_char(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug => 'D',
        Level::Trace => 'T',
    }
}
