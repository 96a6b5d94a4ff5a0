//! Signed push notifications to a Pusher-compatible event API.
//!
//! Delivery is fire-and-forget: failures are logged and never affect the
//! session. When the credentials are absent from the environment the
//! notifier is simply not constructed.

use chrono::Utc;
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use std::env;
use std::time::Duration;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct PusherConfig {
    pub app_id: String,
    pub key: String,
    pub secret: String,
    pub cluster: String,
    pub channel_prefix: String,
    pub event_final: String,
    pub event_interim: String,
    pub event_session_start: String,
}

impl PusherConfig {
    pub fn from_env() -> Option<Self> {
        let app_id = env::var("PUSHER_APP_ID").ok()?;
        let key = env::var("PUSHER_KEY").ok()?;
        let secret = env::var("PUSHER_SECRET").ok()?;
        Some(Self {
            app_id,
            key,
            secret,
            cluster: env::var("PUSHER_CLUSTER").unwrap_or_else(|_| "ap2".to_string()),
            channel_prefix: env::var("PUSHER_CHANNEL_PREFIX")
                .unwrap_or_else(|_| "call-".to_string()),
            event_final: env::var("PUSHER_EVENT_FINAL")
                .unwrap_or_else(|_| "transcription-final".to_string()),
            event_interim: env::var("PUSHER_EVENT_INTERIM")
                .unwrap_or_else(|_| "transcription-interim".to_string()),
            event_session_start: env::var("PUSHER_EVENT_SESSION_START")
                .unwrap_or_else(|_| "session-start".to_string()),
        })
    }
}

#[derive(Serialize)]
struct EventBody<'a> {
    name: &'a str,
    channels: [&'a str; 1],
    /// The payload is embedded as a JSON string, per the Pusher API.
    data: String,
}

#[derive(Serialize)]
struct TranscriptPayload<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    speaker_id: &'a str,
    text: &'a str,
    timestamp: String,
}

#[derive(Serialize)]
struct SessionStartPayload<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    caller_id: &'a str,
    callee_id: &'a str,
    timestamp: String,
}

pub struct PusherNotifier {
    config: PusherConfig,
    http: Client,
}

impl PusherNotifier {
    pub fn new(config: PusherConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub async fn publish_transcript(
        &self,
        call_id: &str,
        speaker_id: &str,
        text: &str,
        is_final: bool,
    ) {
        let payload = TranscriptPayload {
            kind: if is_final { "final" } else { "interim" },
            speaker_id,
            text,
            timestamp: iso_timestamp(),
        };
        let Ok(data) = serde_json::to_string(&payload) else {
            return;
        };
        let event = if is_final {
            self.config.event_final.clone()
        } else {
            self.config.event_interim.clone()
        };
        self.publish(&event, call_id, data).await;
    }

    pub async fn publish_session_start(&self, call_id: &str, caller_id: &str, callee_id: &str) {
        let payload = SessionStartPayload {
            kind: "session_start",
            caller_id,
            callee_id,
            timestamp: iso_timestamp(),
        };
        let Ok(data) = serde_json::to_string(&payload) else {
            return;
        };
        let event = self.config.event_session_start.clone();
        self.publish(&event, call_id, data).await;
    }

    async fn publish(&self, event: &str, call_id: &str, data: String) {
        let channel = format!("{}{}", self.config.channel_prefix, call_id);
        let body = EventBody {
            name: event,
            channels: [channel.as_str()],
            data,
        };
        let Ok(body) = serde_json::to_string(&body) else {
            return;
        };
        let url = self.signed_url(&body, Utc::now().timestamp());
        match self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(event, channel = %channel, "webhook delivered");
            }
            Ok(response) => {
                warn!(event, status = %response.status(), "webhook rejected");
            }
            Err(e) => {
                debug!(event, error = %e, "webhook call failed");
            }
        }
    }

    /// Pusher REST auth: md5 of the body, then HMAC-SHA256 with the app
    /// secret over "POST\n<path>\n<query>".
    fn signed_url(&self, body: &str, timestamp: i64) -> String {
        let body_md5 = hex::encode(Md5::digest(body.as_bytes()));
        let path = format!("/apps/{}/events", self.config.app_id);
        let query = format!(
            "auth_key={}&auth_timestamp={}&auth_version=1.0&body_md5={}",
            self.config.key, timestamp, body_md5
        );
        let to_sign = format!("POST\n{path}\n{query}");
        let signature = hmac_sha256_hex(self.config.secret.as_bytes(), &to_sign);
        format!(
            "https://api-{}.pusher.com{}?{}&auth_signature={}",
            self.config.cluster, path, query, signature
        )
    }
}

fn hmac_sha256_hex(key: &[u8], data: &str) -> String {
    match HmacSha256::new_from_slice(key) {
        Ok(mut mac) => {
            mac.update(data.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
