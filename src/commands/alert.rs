use std::sync::Arc;

use clap::Args;

use chatlog::logging::{Channel, LoggingSystem};

#[derive(Args, Debug)]
pub struct Cmd {
    #[arg(long, env = "CHATLOG_ALERT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(
        long,
        env = "CHATLOG_ALERT_DESTINATION",
        value_name = "channel-id[:thread-id]"
    )]
    pub destination: Option<String>,

    #[arg(default_value = "chatlog test alert")]
    pub message: String,
}

impl Cmd {
    pub async fn run(&self, system: &Arc<LoggingSystem>) -> eyre::Result<()> {
        let started = system
            .start_remote_alert_sink(self.token.as_deref(), self.destination.as_deref())
            .await;
        if !started {
            return Err(eyre::eyre!(
                "Failed sending test alert, the remote alert sink did not start"
            ));
        }

        log::error!(target: Channel::Error.as_str(), "{}", self.message);
        Ok(())
    }
}
