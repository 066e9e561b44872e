use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Context;
use http::{header, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde_json::{json, Value};

use crate::alert::{AlertTransport, Destination, MessageFormat, OutboundMessage};
use crate::config::AlertConfig;

pub type HttpsClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// HTTPS client trusting the platform's native roots, speaking HTTP/1.1 and
/// HTTP/2.
pub fn build_https_client() -> eyre::Result<HttpsClient> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::debug!(error = %err, "skipping unreadable native certificate");
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::trace!(added, ignored, "loaded native root certificates");

    if roots.is_empty() {
        return Err(eyre::eyre!("No usable native root certificates found"));
    }

    let tls_config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::aws_lc_rs::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .context("Error with the TLS configuration")?
    .with_root_certificates(roots)
    .with_no_client_auth();

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Ok(Client::builder(TokioExecutor::new()).build(connector))
}

/// Bot API transport: `POST <api_base>/bot<token>/<method>` with a JSON body.
pub struct TelegramTransport {
    client: HttpsClient,
    api_base: String,
    token: String,
    timeout: Duration,
}

impl fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("api_base", &self.api_base)
            .field("token", &"** redacted **")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>, config: &AlertConfig) -> eyre::Result<Self> {
        Ok(Self {
            client: build_https_client()?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            timeout: config.request_timeout,
        })
    }

    fn method_uri(&self, method: &str) -> eyre::Result<Uri> {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
            .parse::<Uri>()
            // The uri embeds the token, keep it out of the error.
            .map_err(|_| eyre::eyre!("Invalid bot API uri for method {}", method))
    }

    async fn call(&self, method: &str, body: Value) -> eyre::Result<Value> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.method_uri(method)?)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .context("Failed building bot API request")?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| eyre::eyre!("{} timed out after {:?}", method, self.timeout))?
            .with_context(|| format!("{} request failed", method))?;

        let status = response.status();
        let payload = response
            .into_body()
            .collect()
            .await
            .with_context(|| format!("Failed reading {} response", method))?
            .to_bytes();

        tracing::trace!(method, %status, "bot API call finished");
        interpret_response(status, &payload).with_context(|| format!("{} rejected", method))
    }
}

pub fn send_message_body(destination: &Destination, message: &OutboundMessage) -> Value {
    let mut body = json!({
        "chat_id": destination.channel_id,
        "text": message.text,
        "disable_web_page_preview": true,
    });

    if message.format == MessageFormat::Html {
        body["parse_mode"] = json!("HTML");
    }
    if let Some(thread) = destination.thread_id {
        body["message_thread_id"] = json!(thread);
    }

    body
}

/// The bot API answers `{"ok": bool, "result": ..., "description": ...}`.
fn interpret_response(status: StatusCode, payload: &[u8]) -> eyre::Result<Value> {
    let parsed: Option<Value> = serde_json::from_slice(payload).ok();
    let ok = parsed
        .as_ref()
        .and_then(|v| v.get("ok"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if status.is_success() && ok {
        return Ok(match parsed {
            Some(Value::Object(mut fields)) => fields.remove("result").unwrap_or(Value::Null),
            _ => Value::Null,
        });
    }

    let description = parsed
        .as_ref()
        .and_then(|v| v.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(payload).chars().take(200).collect());

    Err(eyre::eyre!("status {}: {}", status, description))
}

fn bot_username(me: &Value) -> &str {
    me.get("username")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

#[async_trait]
impl AlertTransport for TelegramTransport {
    async fn verify(&self) -> eyre::Result<()> {
        let me = self.call("getMe", json!({})).await?;
        let bot = bot_username(&me);
        tracing::debug!(bot, "bot API credentials verified");
        Ok(())
    }

    async fn send(&self, destination: &Destination, message: &OutboundMessage) -> eyre::Result<()> {
        self.call("sendMessage", send_message_body(destination, message))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_message_to_a_thread() {
        let dest: Destination = "-1001:42".parse().unwrap();
        let body = send_message_body(&dest, &OutboundMessage::html("<b>x</b>".to_string()));

        assert_eq!(
            body,
            json!({
                "chat_id": "-1001",
                "text": "<b>x</b>",
                "disable_web_page_preview": true,
                "parse_mode": "HTML",
                "message_thread_id": 42,
            })
        );
    }

    #[test]
    fn plain_message_has_no_parse_mode() {
        let dest: Destination = "@ops".parse().unwrap();
        let body = send_message_body(&dest, &OutboundMessage::plain("x".to_string()));

        assert!(body.get("parse_mode").is_none());
        assert!(body.get("message_thread_id").is_none());
    }

    #[test]
    fn successful_response_yields_the_result() {
        let result = interpret_response(
            StatusCode::OK,
            br#"{"ok":true,"result":{"message_id":9}}"#,
        )
        .unwrap();
        assert_eq!(result, json!({"message_id": 9}));
    }

    #[test]
    fn api_errors_carry_the_description() {
        let err = interpret_response(
            StatusCode::BAD_REQUEST,
            br#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("can't parse entities"));
    }

    #[test]
    fn get_me_result_names_the_bot() {
        let me = interpret_response(
            StatusCode::OK,
            br#"{"ok":true,"result":{"id":1,"is_bot":true,"username":"ops_alert_bot"}}"#,
        )
        .unwrap();
        assert_eq!(bot_username(&me), "ops_alert_bot");
        assert_eq!(bot_username(&json!({"id": 1})), "unknown");
    }

    #[test]
    fn non_json_errors_are_reported_verbatim() {
        let err = interpret_response(StatusCode::BAD_GATEWAY, b"upstream down").unwrap_err();
        assert_eq!(err.to_string(), "status 502 Bad Gateway: upstream down");
    }
}
