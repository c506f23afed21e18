use std::io::Write;

use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::command::{Cli, Commands, LogFormat};
use cli::extract::cmd_extract;
use cli::info::cmd_info;
use cli::packets::cmd_packets;

mod cli;
mod input;
pub(crate) mod timestamp;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let multi = MultiProgress::new();
    let progress = init_logging(&cli, &multi)?.then_some(&multi);

    match cli.command {
        Commands::Info(ref args) => cmd_info(args, &cli, progress)?,
        Commands::Packets(ref args) => cmd_packets(args, &cli, progress)?,
        Commands::Extract(ref args) => cmd_extract(args, &cli, progress)?,
    }

    Ok(())
}

/// Installs the logger. Returns whether progress bars are drawn, in which
/// case log lines are routed through `multi` so they don't tear the bars.
fn init_logging(cli: &Cli, multi: &MultiProgress) -> Result<bool> {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(cli.loglevel.to_level_filter());
    match cli.log_format {
        LogFormat::Plain => {
            builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = serde_json::json!({
                    "ts": buf.timestamp().to_string(),
                    "lvl": record.level().as_str(),
                    "target": record.target(),
                    "msg": record.args().to_string(),
                });
                writeln!(buf, "{line}")
            });
        }
    }

    if cli.progress {
        LogWrapper::new(multi.clone(), builder.build()).try_init()?;
        Ok(true)
    } else {
        builder.try_init()?;
        Ok(false)
    }
}
