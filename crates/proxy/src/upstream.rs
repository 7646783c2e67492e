use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mixgate_common::ForwarderConfig;
use mixgate_projects::Project;
use reqwest::Client;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

/// The kinds of analytics calls the gateway relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Track,
    PeopleSet,
    PeopleSetOnce,
    PeopleIncrement,
    PeopleAppend,
    PeopleUnion,
    Alias,
}

impl EventKind {
    /// Path segment on the analytics backend.
    pub fn endpoint(self) -> &'static str {
        match self {
            EventKind::Track | EventKind::Alias => "track",
            _ => "engage",
        }
    }

    /// Profile operation key for people updates.
    fn people_op(self) -> Option<&'static str> {
        match self {
            EventKind::PeopleSet => Some("$set"),
            EventKind::PeopleSetOnce => Some("$set_once"),
            EventKind::PeopleIncrement => Some("$add"),
            EventKind::PeopleAppend => Some("$append"),
            EventKind::PeopleUnion => Some("$union"),
            EventKind::Track | EventKind::Alias => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Track => "track",
            EventKind::PeopleSet => "people_set",
            EventKind::PeopleSetOnce => "people_set_once",
            EventKind::PeopleIncrement => "people_increment",
            EventKind::PeopleAppend => "people_append",
            EventKind::PeopleUnion => "people_union",
            EventKind::Alias => "alias",
        }
    }
}

/// A validated ingestion call, ready to be encoded for the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Track {
        distinct_id: String,
        event: String,
        properties: Map<String, Value>,
    },
    People {
        kind: EventKind,
        distinct_id: String,
        properties: Map<String, Value>,
    },
    Alias {
        distinct_id: String,
        alias: String,
    },
}

impl Outbound {
    pub fn kind(&self) -> EventKind {
        match self {
            Outbound::Track { .. } => EventKind::Track,
            Outbound::People { kind, .. } => *kind,
            Outbound::Alias { .. } => EventKind::Alias,
        }
    }

    /// Backend message body, signed with the project's token.
    pub fn to_message(&self, token: &str) -> Value {
        match self {
            Outbound::Track {
                distinct_id,
                event,
                properties,
            } => {
                let mut props = properties.clone();
                props.insert("token".into(), json!(token));
                props.insert("distinct_id".into(), json!(distinct_id));
                props
                    .entry("time")
                    .or_insert_with(|| json!(Utc::now().timestamp_millis()));
                json!([{ "event": event, "properties": props }])
            }
            Outbound::People {
                kind,
                distinct_id,
                properties,
            } => {
                let mut msg = Map::new();
                msg.insert("$token".into(), json!(token));
                msg.insert("$distinct_id".into(), json!(distinct_id));
                if let Some(op) = kind.people_op() {
                    msg.insert(op.into(), Value::Object(properties.clone()));
                }
                Value::Array(vec![Value::Object(msg)])
            }
            Outbound::Alias { distinct_id, alias } => json!([{
                "event": "$create_alias",
                "properties": {
                    "distinct_id": distinct_id,
                    "alias": alias,
                    "token": token
                }
            }]),
        }
    }
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("project has no analytics token")]
    MissingToken,

    #[error("analytics backend unreachable: {0}")]
    Transport(String),

    #[error("analytics backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Delivers admitted calls to the analytics backend.
#[async_trait]
pub trait EventForwarder: Send + Sync {
    async fn forward(&self, project: &Project, event: &Outbound) -> Result<(), ForwardError>;
}

/// Posts events over HTTPS, choosing the base URL from the project's data
/// center.
pub struct HttpForwarder {
    config: ForwarderConfig,
    client: Client,
}

impl HttpForwarder {
    pub fn new(config: ForwarderConfig) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ForwardError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn url_for(&self, project: &Project, kind: EventKind) -> String {
        let base = self.config.endpoint_for(project.data_center.as_deref());
        format!("{}/{}", base.trim_end_matches('/'), kind.endpoint())
    }
}

#[async_trait]
impl EventForwarder for HttpForwarder {
    async fn forward(&self, project: &Project, event: &Outbound) -> Result<(), ForwardError> {
        let token = project
            .analytics_token
            .as_deref()
            .ok_or(ForwardError::MissingToken)?;
        let url = self.url_for(project, event.kind());

        let response = self
            .client
            .post(&url)
            .json(&event.to_message(token))
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForwardError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(project_id = %project.id, url = %url, kind = event.kind().as_str(), "event forwarded");
        Ok(())
    }
}
