use anyhow::Result;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

/// Logs go to stderr so stdout stays clean for tables and CSV.
pub fn setup_logger(level: LevelFilter) -> Result<()> {
    let colors = ColoredLevelConfig {
        trace: Color::Cyan,
        debug: Color::Magenta,
        info: Color::Green,
        warn: Color::Yellow,
        error: Color::Red,
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%H:%M:%S]"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr())
        .level(LevelFilter::Warn)
        .level_for("token_holders", level)
        .apply()?;

    Ok(())
}
