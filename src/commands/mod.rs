use std::{fmt::Display, path::PathBuf, sync::Arc, time::Duration};

use chrono::FixedOffset;
use clap::{command, Parser, Subcommand};
use log::LevelFilter;

use chatlog::{
    config::Config,
    logging::{install_diagnostics, LoggingSystem},
    utils::{parse_duration, parse_utc_offset},
};

mod alert;
mod check;
mod emit;

#[derive(Subcommand, Debug)]
pub enum ChatlogCmd {
    Check(check::Cmd),

    Emit(emit::Cmd),

    Alert(alert::Cmd),
}

impl Display for ChatlogCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatlogCmd::Check(_) => write!(f, "check"),
            ChatlogCmd::Emit(cmd) => write!(f, "emit {}", cmd),
            ChatlogCmd::Alert(_) => write!(f, "alert"),
        }
    }
}

#[derive(Parser)]
#[command(version, long_version = "")]
#[command(about = "Per-entity daily logs and rate limited remote alerts.", long_about = None, disable_help_subcommand = true)]
pub struct Chatlog {
    #[arg(
        global = true,
        long,
        env = "CHATLOG_LOG_ROOT",
        help = "Directory that holds every log file. Defaults to $XDG_DATA_HOME/chatlog/logs.",
        display_order = 0
    )]
    pub log_root: Option<PathBuf>,

    #[arg(
        global = true,
        long,
        env = "CHATLOG_UTC_OFFSET",
        value_parser = parse_utc_offset,
        help = "Fixed civil timezone used for timestamps and day boundaries, e.g. +03:30.",
        display_order = 0
    )]
    pub utc_offset: Option<FixedOffset>,

    #[arg(
        global = true,
        long,
        env = "CHATLOG_ALERT_RATE_LIMIT",
        value_parser = parse_duration,
        help = "Minimum gap between two remote alerts, e.g. 5s.",
        display_order = 1
    )]
    pub alert_rate_limit: Option<Duration>,

    #[arg(
        global = true,
        long,
        help = "Do not mirror records to the console.",
        display_order = 1
    )]
    pub quiet: bool,

    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        help = "Write verbose diagnostics of the logging pipeline to stderr.",
        display_order = 999
    )]
    pub verbose: u8,

    #[command(subcommand)]
    pub cmd: ChatlogCmd,
}

impl Chatlog {
    fn diagnostics_filter(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Off,
            1 => LevelFilter::Error,
            2 => LevelFilter::Warn,
            3 => LevelFilter::Info,
            4 => LevelFilter::Debug,
            5..=u8::MAX => LevelFilter::Trace,
        }
    }

    fn setup_diagnostics(&self) {
        let level = match self.diagnostics_filter() {
            LevelFilter::Off => return,
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };

        if let Err(err) = install_diagnostics(level) {
            eprintln!("chatlog: diagnostics disabled: {:#}", err);
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(root) = &self.log_root {
            config = config.with_log_root(root);
        }
        if let Some(offset) = self.utc_offset {
            config.utc_offset = offset;
        }
        if let Some(rate_limit) = self.alert_rate_limit {
            config.alert.rate_limit = rate_limit;
        }
        config.console = !self.quiet;
        config
    }

    pub fn run(self) -> eyre::Result<()> {
        self.setup_diagnostics();

        let config = self.config();
        tracing::info!(root = %config.log_root.display(), "chatlog starting up");

        let system = LoggingSystem::initialize(config)?;
        system.install()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        tracing::debug!("running command {}", &self.cmd);
        let result = runtime.block_on(async {
            let result = self.invoke_sub_command(&system).await;
            system.shutdown().await;
            result
        });

        if let Err(msg) = &result {
            tracing::error!("failed running command {}, error={} cause={}", &self.cmd, msg, msg.root_cause());
        }

        result
    }

    async fn invoke_sub_command(&self, system: &Arc<LoggingSystem>) -> eyre::Result<()> {
        match &self.cmd {
            ChatlogCmd::Check(check) => check.run(system),
            ChatlogCmd::Emit(emit) => emit.run(system),
            ChatlogCmd::Alert(alert) => alert.run(system).await,
        }
    }
}
