mod client;

pub use client::{build_https_client, send_message_body, HttpsClient, TelegramTransport};
