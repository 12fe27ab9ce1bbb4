//! Listener actions and the static evaluation of a listener's routing table.
//! The load balancer does the real dispatching; this mirrors its rules so a
//! template can be checked without deploying it.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum ListenerAction {
    Forward {
        /// `Ref` of the target group.
        target_group: Value,
    },
    FixedResponse {
        status_code: u16,
        content_type: String,
        message_body: String,
    },
}

impl ListenerAction {
    pub fn forward(target_group: Value) -> Self {
        ListenerAction::Forward { target_group }
    }

    pub fn not_found() -> Self {
        ListenerAction::FixedResponse {
            status_code: 404,
            content_type: "text/plain".to_string(),
            message_body: "Not Found".to_string(),
        }
    }
}

impl Serialize for ListenerAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            ListenerAction::Forward { target_group } => json!({
                "Type": "forward",
                "TargetGroupArn": target_group,
            }),
            ListenerAction::FixedResponse { status_code, content_type, message_body } => json!({
                "Type": "fixed-response",
                "FixedResponseConfig": {
                    "StatusCode": status_code.to_string(),
                    "ContentType": content_type,
                    "MessageBody": message_body,
                },
            }),
        };
        value.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostHeaderConfig {
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleCondition {
    pub field: String,
    pub host_header_config: HostHeaderConfig,
}

impl RuleCondition {
    pub fn host_header(values: &[&str]) -> Self {
        Self {
            field: "host-header".to_string(),
            host_header_config: HostHeaderConfig {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        }
    }

    /// host names compare case-insensitively and ignore a `:port` suffix.
    /// `*` matches any run of characters, `?` exactly one.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(name, _)| name)
            .unwrap_or(host)
            .to_ascii_lowercase();
        self.host_header_config.values.iter().any(|pattern| {
            wildcard_match(pattern.to_ascii_lowercase().as_bytes(), host.as_bytes())
        })
    }
}

fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            wildcard_match(&pattern[1..], text) || (!text.is_empty() && wildcard_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => wildcard_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => wildcard_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

/// Healthy response codes: comma separated codes and `low-high` ranges, eg: `200,307,405`.
pub fn code_matches(http_code: &str, code: u16) -> bool {
    http_code.split(',').map(|c| c.trim()).any(|part| match part.split_once('-') {
        Some((low, high)) => match (low.parse::<u16>(), high.parse::<u16>()) {
            (Ok(low), Ok(high)) => low <= code && code <= high,
            _ => false,
        },
        None => part.parse::<u16>() == Ok(code),
    })
}
