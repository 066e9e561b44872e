use std::sync::Arc;

use clap::{Args, CommandFactory};

use chatlog::logging::{Channel, LoggingSystem};

use crate::commands::Chatlog;

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cmd {}

impl Cmd {
    pub fn run(&self, system: &Arc<LoggingSystem>) -> eyre::Result<()> {
        let config = system.config();

        println!(
            "Version:        {}",
            Chatlog::command().get_version().unwrap_or("")
        );
        println!("Log root:       {}", config.log_root.display());
        println!("UTC offset:     {}", config.utc_offset);
        println!(
            "Rotation:       {} bytes, {} backups",
            config.max_file_bytes, config.backup_count
        );
        for channel in Channel::ALL {
            println!(
                "{:<15} {}",
                format!("{}:", channel),
                system.sinks_for(channel).join(", ")
            );
        }
        Ok(())
    }
}
