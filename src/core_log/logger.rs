use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::Level;

/// Initialize the process-wide logger with the
/// `[L YY-MM-DD HH:MM:SS] message` line shape, L being the level letter.
/// Session handlers prepend their own `ip:port-[user]` prefix.
pub fn init_logger(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let letter = level_letter(record.level());
            let timestamp = Local::now().format("%y-%m-%d %H:%M:%S");
            writeln!(buf, "[{} {}] {}", letter, timestamp, record.args())
        })
        .init();
}

fn level_letter(level: Level) -> char {
    match level {
        Level::Error => 'E',
        Level::Warn => 'W',
        Level::Info => 'I',
        Level::Debug | Level::Trace => 'D',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_letters() {
        assert_eq!(level_letter(Level::Error), 'E');
        assert_eq!(level_letter(Level::Warn), 'W');
        assert_eq!(level_letter(Level::Info), 'I');
        assert_eq!(level_letter(Level::Debug), 'D');
        assert_eq!(level_letter(Level::Trace), 'D');
    }
}
