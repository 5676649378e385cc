//! Slack surface — Web API client and Socket Mode event loop.
//!
//! Native Bot API implementation over reqwest, plus the Socket Mode
//! WebSocket connection (tokio-tungstenite) that delivers `app_mention`
//! events to the dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::dispatcher::Dispatcher;
use crate::error::SlackError;

const API_BASE: &str = "https://slack.com/api";
/// conversations.replies page size; threads longer than this are truncated.
const THREAD_FETCH_LIMIT: u32 = 200;

/// One `app_mention` trigger event.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionEvent {
    pub channel: String,
    pub ts: String,
    pub thread_ts: Option<String>,
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
}

impl MentionEvent {
    /// The conversation thread this event belongs to: a reply keys on its
    /// parent, a root message keys on itself.
    pub fn thread_id(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// One message inside a thread, as returned by `conversations.replies`.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    pub user: Option<String>,
    pub ts: Option<String>,
    pub text: Option<String>,
}

/// Slack Web API client with a display-name cache.
pub struct SlackClient {
    http: reqwest::Client,
    bot_token: SecretString,
    app_token: SecretString,
    /// Resolved display names, keyed by user or channel id.
    name_cache: tokio::sync::Mutex<HashMap<String, String>>,
}

impl SlackClient {
    pub fn new(bot_token: SecretString, app_token: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            app_token,
            name_cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn get_json(
        &self,
        method: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, SlackError> {
        let resp = self
            .http
            .get(format!("{API_BASE}/{method}"))
            .bearer_auth(self.bot_token.expose_secret())
            .query(query)
            .send()
            .await?;
        check_api_response(method, resp.json().await?)
    }

    async fn post_json(&self, method: &str, body: &Value) -> Result<Value, SlackError> {
        let resp = self
            .http
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await?;
        check_api_response(method, resp.json().await?)
    }

    /// Post a message into a thread.
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), SlackError> {
        self.post_json(
            "chat.postMessage",
            &json!({ "channel": channel, "thread_ts": thread_ts, "text": text }),
        )
        .await?;
        Ok(())
    }

    /// Post a message without threading (audit log channel).
    pub async fn post_channel_message(&self, channel: &str, text: &str) -> Result<(), SlackError> {
        self.post_json(
            "chat.postMessage",
            &json!({ "channel": channel, "text": text }),
        )
        .await?;
        Ok(())
    }

    /// Add a reaction to a message. Idempotent: `already_reacted` is success.
    pub async fn add_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), SlackError> {
        let body = json!({ "channel": channel, "timestamp": ts, "name": name });
        match self.post_json("reactions.add", &body).await {
            Ok(_) => Ok(()),
            Err(SlackError::Api { reason, .. }) if reason == "already_reacted" => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove a reaction from a message. Idempotent: `no_reaction` is success.
    pub async fn remove_reaction(
        &self,
        channel: &str,
        ts: &str,
        name: &str,
    ) -> Result<(), SlackError> {
        let body = json!({ "channel": channel, "timestamp": ts, "name": name });
        match self.post_json("reactions.remove", &body).await {
            Ok(_) => Ok(()),
            Err(SlackError::Api { reason, .. }) if reason == "no_reaction" => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Permalink for a message (used by the audit record).
    pub async fn get_permalink(&self, channel: &str, ts: &str) -> Result<String, SlackError> {
        let resp = self
            .get_json(
                "chat.getPermalink",
                &[("channel", channel), ("message_ts", ts)],
            )
            .await?;
        resp["permalink"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SlackError::Api {
                method: "chat.getPermalink".into(),
                reason: "missing permalink field".into(),
            })
    }

    /// Fetch every message in a thread, oldest first.
    pub async fn fetch_thread(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<ThreadMessage>, SlackError> {
        let limit = THREAD_FETCH_LIMIT.to_string();
        let resp = self
            .get_json(
                "conversations.replies",
                &[("channel", channel), ("ts", thread_ts), ("limit", &limit)],
            )
            .await?;
        let Some(messages) = resp.get("messages").cloned() else {
            return Ok(Vec::new());
        };
        serde_json::from_value(messages)
            .map_err(|e| SlackError::InvalidEvent(format!("conversations.replies: {e}")))
    }

    /// Render a thread as a transcript the agent can read:
    /// `[name] (timestamp): text`, one line per message.
    pub async fn render_thread(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<String, SlackError> {
        let messages = self.fetch_thread(channel, thread_ts).await?;

        let unique_users: HashSet<&str> = messages
            .iter()
            .filter_map(|m| m.user.as_deref())
            .collect();
        let mut names = HashMap::new();
        for user_id in unique_users {
            names.insert(user_id.to_string(), self.resolve_user_name(user_id).await);
        }

        let lines: Vec<String> = messages
            .iter()
            .map(|m| {
                let name = m
                    .user
                    .as_deref()
                    .and_then(|u| names.get(u))
                    .map(String::as_str)
                    .unwrap_or("unknown");
                let ts = m.ts.as_deref().map(ts_to_rfc3339).unwrap_or_default();
                format!("[{name}] ({ts}): {}", m.text.as_deref().unwrap_or(""))
            })
            .collect();
        Ok(lines.join("\n"))
    }

    /// Resolve a user id to a display name, falling back to the id itself.
    /// Lookup failures are not cached so a later call can retry.
    pub async fn resolve_user_name(&self, user_id: &str) -> String {
        if let Some(name) = self.name_cache.lock().await.get(user_id) {
            return name.clone();
        }
        match self.get_json("users.info", &[("user", user_id)]).await {
            Ok(resp) => {
                let name = resp["user"]["real_name"]
                    .as_str()
                    .or_else(|| resp["user"]["name"].as_str())
                    .unwrap_or(user_id)
                    .to_string();
                self.name_cache
                    .lock()
                    .await
                    .insert(user_id.to_string(), name.clone());
                name
            }
            Err(e) => {
                tracing::debug!(user_id, error = %e, "User name lookup failed");
                user_id.to_string()
            }
        }
    }

    /// Resolve a channel id to its name, falling back to the id itself.
    pub async fn resolve_channel_name(&self, channel_id: &str) -> String {
        if let Some(name) = self.name_cache.lock().await.get(channel_id) {
            return name.clone();
        }
        match self
            .get_json("conversations.info", &[("channel", channel_id)])
            .await
        {
            Ok(resp) => {
                let name = resp["channel"]["name"]
                    .as_str()
                    .unwrap_or(channel_id)
                    .to_string();
                self.name_cache
                    .lock()
                    .await
                    .insert(channel_id.to_string(), name.clone());
                name
            }
            Err(e) => {
                tracing::debug!(channel_id, error = %e, "Channel name lookup failed");
                channel_id.to_string()
            }
        }
    }

    /// Open a Socket Mode connection; returns the WebSocket URL.
    async fn connections_open(&self) -> Result<String, SlackError> {
        let resp = self
            .http
            .post(format!("{API_BASE}/apps.connections.open"))
            .bearer_auth(self.app_token.expose_secret())
            .send()
            .await?;
        let body = check_api_response("apps.connections.open", resp.json().await?)?;
        body["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SlackError::SocketMode("missing WebSocket url".into()))
    }
}

fn check_api_response(method: &str, body: Value) -> Result<Value, SlackError> {
    if body["ok"].as_bool().unwrap_or(false) {
        Ok(body)
    } else {
        Err(SlackError::Api {
            method: method.to_string(),
            reason: body["error"].as_str().unwrap_or("unknown_error").to_string(),
        })
    }
}

/// Convert a Slack message timestamp ("1712345678.000200") to RFC 3339.
fn ts_to_rfc3339(ts: &str) -> String {
    let secs: f64 = match ts.parse() {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@[A-Z0-9]+>").unwrap());
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());

/// Strip `<@U…>` mention tags from a trigger message.
pub fn strip_mentions(text: &str) -> String {
    MENTION_RE.replace_all(text, "").trim().to_string()
}

/// Translate the agent's markdown output to Slack mrkdwn.
///
/// Pure and stateless: bold markers and links are the only dialect
/// differences that matter for our output.
pub fn markdown_to_mrkdwn(text: &str) -> String {
    let text = BOLD_RE.replace_all(text, "*$1*");
    LINK_RE.replace_all(&text, "<$2|$1>").to_string()
}

// ── Socket Mode event loop ──────────────────────────────────────────

/// Run the Socket Mode loop: connect, ack envelopes, hand `app_mention`
/// events to the dispatcher. Reconnects with capped backoff on disconnect.
pub async fn run_socket_mode(client: Arc<SlackClient>, dispatcher: Arc<Dispatcher>) {
    let mut backoff = Duration::from_secs(1);
    loop {
        match connect_once(&client, &dispatcher).await {
            Ok(()) => {
                // Clean disconnect (Slack refreshes connections routinely).
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                tracing::error!(error = %e, "Socket Mode connection failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }
    }
}

async fn connect_once(
    client: &Arc<SlackClient>,
    dispatcher: &Arc<Dispatcher>,
) -> Result<(), SlackError> {
    let url = client.connections_open().await?;
    let (ws, _) = connect_async(url.as_str())
        .await
        .map_err(|e| SlackError::SocketMode(e.to_string()))?;
    let (mut tx, mut rx) = ws.split();
    tracing::info!("Socket Mode connected");

    while let Some(frame) = rx.next().await {
        let frame = frame.map_err(|e| SlackError::SocketMode(e.to_string()))?;
        let Message::Text(text) = frame else { continue };
        let envelope: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable Socket Mode frame");
                continue;
            }
        };

        if let Some(envelope_id) = envelope["envelope_id"].as_str() {
            let ack = json!({ "envelope_id": envelope_id }).to_string();
            tx.send(Message::Text(ack.into()))
                .await
                .map_err(|e| SlackError::SocketMode(e.to_string()))?;
        }

        match envelope["type"].as_str() {
            Some("disconnect") => {
                tracing::info!("Socket Mode disconnect requested, reconnecting");
                return Ok(());
            }
            Some("events_api") => {
                let event = envelope["payload"]["event"].clone();
                if event["type"].as_str() != Some("app_mention") {
                    continue;
                }
                match serde_json::from_value::<MentionEvent>(event) {
                    Ok(mention) => {
                        let dispatcher = Arc::clone(dispatcher);
                        tokio::spawn(async move {
                            dispatcher.handle_mention(mention).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed app_mention event");
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}
