use std::{fmt::Display, sync::Arc};

use clap::Args;

use chatlog::logging::{Channel, LogContext, LogRecord, LoggingSystem};

#[derive(Args, Debug)]
pub struct Cmd {
    #[arg(short, long, default_value = "general")]
    pub channel: Channel,

    #[arg(short, long, default_value = "info")]
    pub level: log::Level,

    #[arg(long)]
    pub entity_id: Option<String>,

    #[arg(long)]
    pub entity_kind: Option<String>,

    #[arg(long)]
    pub display_name: Option<String>,

    #[arg(long)]
    pub actor: Option<String>,

    #[arg(required = true, trailing_var_arg = true)]
    pub message: Vec<String>,
}

impl Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.channel, self.level)
    }
}

impl Cmd {
    pub fn run(&self, system: &Arc<LoggingSystem>) -> eyre::Result<()> {
        let context = LogContext {
            entity_id: self.entity_id.clone(),
            entity_kind: self.entity_kind.clone(),
            entity_display_name: self.display_name.clone(),
            actor_name: self.actor.clone(),
        };

        let record = LogRecord::new(self.channel, self.level, self.message.join(" "))
            .with_context(context);
        system.emit(record);
        Ok(())
    }
}
