//! Discord-style webhook delivery.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::domain::{ChangeEntry, ChangeLogEvent};
use crate::error::ChangeLogError;

/// Discord caps embed descriptions at this many characters.
const MAX_DESCRIPTION_CHARS: usize = 4096;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to announce recorded entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSettings {
    /// Webhook endpoint, `http` or `https`.
    pub url: String,
    /// Text placed before the embed, typically a role mention such as
    /// `<@&1234>`. Empty or `"none"` disables it.
    pub mention: Option<String>,
}

impl WebhookSettings {
    /// Checks that the URL is an absolute `http(s)` URL.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::ConfigurationError`] otherwise.
    pub fn validate(&self) -> Result<Url, ChangeLogError> {
        let url = Url::parse(&self.url).map_err(|e| {
            ChangeLogError::ConfigurationError(format!("invalid WEBHOOK_URL: {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChangeLogError::ConfigurationError(format!(
                "WEBHOOK_URL must use http or https, got `{}`",
                url.scheme()
            )));
        }
        Ok(url)
    }

    fn effective_mention(&self) -> Option<&str> {
        self.mention
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case("none"))
    }
}

/// Why a webhook delivery did not go through.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The request never got a response.
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered 429.
    #[error("webhook rate limited")]
    RateLimited,

    /// The endpoint answered with another non-success status.
    #[error("webhook rejected the message with status {0}")]
    Rejected(u16),
}

/// Embed colour for a category. Unknown categories get a neutral grey.
#[must_use]
pub fn category_color(category: &str) -> u32 {
    match category {
        "fix" | "fixed" | "bugfix" => 0x00FE_E75C,
        "added" | "add" | "new" | "feature" => 0x0057_F287,
        "removed" | "remove" | "deleted" => 0x00ED_4245,
        "changed" | "change" | "update" | "updated" => 0x0058_65F2,
        "security" => 0x00EB_459E,
        _ => 0x0099_AAB5,
    }
}

fn display_category(category: &str) -> String {
    let mut chars = category.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn describe_payload(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Object(map) => ["text", "content", "message"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map_or_else(|| payload.to_string(), str::to_string),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Builds the webhook body announcing `entry`.
#[must_use]
pub fn build_payload(entry: &ChangeEntry, mention: Option<&str>) -> Value {
    let text = describe_payload(&entry.payload);
    let description: String = format!("**{}**\n\n{text}", display_category(&entry.category))
        .chars()
        .take(MAX_DESCRIPTION_CHARS)
        .collect();

    let embed = json!({
        "title": "New change-log entry",
        "description": description,
        "color": category_color(&entry.category),
        "fields": [
            { "name": "Subject", "value": entry.subject.as_str(), "inline": true },
            {
                "name": "Date",
                "value": entry.created_at.format("%b %d, %Y %H:%M UTC").to_string(),
                "inline": true
            }
        ],
        "footer": { "text": format!("changelog-book • entry #{}", entry.id) },
        "timestamp": entry.created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    });

    let mut body = json!({ "embeds": [embed] });
    if let (Some(mention), Some(map)) = (mention, body.as_object_mut()) {
        map.insert("content".to_string(), Value::String(mention.to_string()));
    }
    body
}

/// Posts recorded entries to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
    settings: WebhookSettings,
}

impl WebhookNotifier {
    /// Builds a notifier with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeLogError::ConfigurationError`] for an invalid URL or
    /// if the HTTP client cannot be constructed.
    pub fn new(settings: WebhookSettings) -> Result<Self, ChangeLogError> {
        let url = settings.validate()?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ChangeLogError::ConfigurationError(format!("cannot build webhook client: {e}"))
            })?;
        Ok(Self {
            client,
            url,
            settings,
        })
    }

    /// Sends one announcement.
    ///
    /// # Errors
    ///
    /// Returns a [`WebhookError`] if the request fails or is refused.
    pub async fn notify(&self, entry: &ChangeEntry) -> Result<(), WebhookError> {
        let body = build_payload(entry, self.settings.effective_mention());
        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(WebhookError::RateLimited),
            status if status.is_success() => {
                tracing::debug!(id = entry.id, status = status.as_u16(), "webhook delivered");
                Ok(())
            }
            status => Err(WebhookError::Rejected(status.as_u16())),
        }
    }

    /// Announces every [`ChangeLogEvent::EntryRecorded`] received on
    /// `events` until the bus closes. Failures are logged and skipped.
    pub fn spawn(self, mut events: broadcast::Receiver<ChangeLogEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChangeLogEvent::EntryRecorded { entry }) => {
                        if let Err(err) = self.notify(&entry).await {
                            tracing::warn!(id = entry.id, error = %err, "webhook delivery failed");
                        }
                    }
                    Ok(ChangeLogEvent::EntriesPruned { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "webhook notifier fell behind, entries not announced");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use chrono::{TimeZone, Utc};
    use tokio::sync::Mutex;

    use super::*;
    use crate::domain::SubjectId;

    fn entry(category: &str, payload: Value) -> ChangeEntry {
        let Ok(subject) = SubjectId::new("spawn-area") else {
            panic!("valid subject");
        };
        let Some(created_at) = Utc.with_ymd_and_hms(2024, 3, 9, 18, 5, 0).single() else {
            panic!("valid timestamp");
        };
        ChangeEntry {
            id: 42,
            subject,
            category: category.to_string(),
            payload,
            created_at,
        }
    }

    #[derive(Clone, Default)]
    struct Received {
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn receiver(status: AxumStatus) -> (String, Received) {
        let received = Received::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(r): State<Received>, axum::Json(body): axum::Json<Value>| async move {
                        r.bodies.lock().await.push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());
        let Ok(listener) = tokio::net::TcpListener::bind("127.0.0.1:0").await else {
            panic!("bind failed");
        };
        let Ok(addr) = listener.local_addr() else {
            panic!("no local addr");
        };
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/hook"), received)
    }

    fn notifier(url: String, mention: Option<&str>) -> WebhookNotifier {
        let Ok(n) = WebhookNotifier::new(WebhookSettings {
            url,
            mention: mention.map(str::to_string),
        }) else {
            panic!("valid notifier");
        };
        n
    }

    #[test]
    fn colors_follow_category() {
        assert_eq!(category_color("fix"), 0x00FE_E75C);
        assert_eq!(category_color("added"), 0x0057_F287);
        assert_eq!(category_color("removed"), 0x00ED_4245);
        assert_eq!(category_color("changed"), 0x0058_65F2);
        assert_eq!(category_color("security"), 0x00EB_459E);
        assert_eq!(category_color("misc"), 0x0099_AAB5);
    }

    #[test]
    fn payload_contains_embed_fields() {
        let body = build_payload(&entry("fix", json!({"text": "Fixed the portal"})), None);
        let embed = &body["embeds"][0];
        assert_eq!(embed["color"], json!(0x00FE_E75C));
        assert_eq!(embed["description"], json!("**Fix**\n\nFixed the portal"));
        assert_eq!(embed["fields"][0]["value"], json!("spawn-area"));
        assert_eq!(embed["fields"][1]["value"], json!("Mar 09, 2024 18:05 UTC"));
        assert_eq!(embed["timestamp"], json!("2024-03-09T18:05:00.000Z"));
        assert!(body.get("content").is_none());
    }

    #[test]
    fn mention_is_prepended_unless_disabled() {
        let with = WebhookSettings {
            url: "https://example.com/hook".into(),
            mention: Some("<@&77>".into()),
        };
        let none = WebhookSettings {
            mention: Some("none".into()),
            ..with.clone()
        };
        assert_eq!(with.effective_mention(), Some("<@&77>"));
        assert_eq!(none.effective_mention(), None);

        let body = build_payload(&entry("added", json!("x")), with.effective_mention());
        assert_eq!(body["content"], json!("<@&77>"));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let body = build_payload(&entry("fix", json!("y".repeat(10_000))), None);
        let Some(description) = body["embeds"][0]["description"].as_str() else {
            panic!("description missing");
        };
        assert_eq!(description.chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let settings = WebhookSettings {
            url: "ftp://example.com/hook".into(),
            mention: None,
        };
        assert!(matches!(
            settings.validate(),
            Err(ChangeLogError::ConfigurationError(_))
        ));
        let garbage = WebhookSettings {
            url: "not a url".into(),
            mention: None,
        };
        assert!(WebhookNotifier::new(garbage).is_err());
    }

    #[tokio::test]
    async fn delivers_to_endpoint() {
        let (url, received) = receiver(AxumStatus::NO_CONTENT).await;
        let n = notifier(url, Some("<@&1>"));
        assert!(n.notify(&entry("added", json!("New biome"))).await.is_ok());

        let bodies = received.bodies.lock().await;
        assert_eq!(bodies.len(), 1);
        let Some(body) = bodies.first() else {
            panic!("nothing delivered");
        };
        assert_eq!(body["content"], json!("<@&1>"));
    }

    #[tokio::test]
    async fn rate_limit_is_reported() {
        let (url, _received) = receiver(AxumStatus::TOO_MANY_REQUESTS).await;
        let result = notifier(url, None).notify(&entry("fix", json!("x"))).await;
        assert!(matches!(result, Err(WebhookError::RateLimited)));
    }

    #[tokio::test]
    async fn server_error_is_rejected() {
        let (url, _received) = receiver(AxumStatus::INTERNAL_SERVER_ERROR).await;
        let result = notifier(url, None).notify(&entry("fix", json!("x"))).await;
        assert!(matches!(result, Err(WebhookError::Rejected(500))));
    }

    #[tokio::test]
    async fn spawned_task_announces_recorded_entries() {
        let (url, received) = receiver(AxumStatus::NO_CONTENT).await;
        let (tx, rx) = broadcast::channel(8);
        let handle = notifier(url, None).spawn(rx);

        let _ = tx.send(ChangeLogEvent::EntryRecorded {
            entry: entry("changed", json!("Reworked spawn")),
        });
        drop(tx);
        let _ = handle.await;

        let bodies = received.bodies.lock().await;
        let Some(body) = bodies.first() else {
            panic!("nothing delivered");
        };
        assert_eq!(body["embeds"][0]["color"], json!(0x0058_65F2));
    }
}
