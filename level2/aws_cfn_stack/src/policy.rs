use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::intrinsics::StrVal;

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// `Principal` of a resource policy statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// `"*"`, any principal.
    Any,
    /// `{ "Service": "<name>" }`
    Service(String),
}

impl Serialize for Principal {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Principal::Any => serializer.serialize_str("*"),
            Principal::Service(name) => json!({ "Service": name }).serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<StrVal>,
    /// `{ operator: { key: value } }`
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub condition: Map<String, Value>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<StrVal>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            action: actions.iter().map(|a| a.to_string()).collect(),
            resource: resources,
            condition: Map::new(),
        }
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_string_equals(mut self, key: &str, value: StrVal) -> Self {
        let entry = self.condition
            .entry("StringEquals".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), value.to_value());
        }
        self
    }

    /// Whether this statement grants `action` to a request whose condition
    /// context is `context` (condition key -> value, keys compared
    /// case-insensitively like IAM does).
    /// Only `StringEquals` conditions are understood; anything else never matches.
    pub fn allows(&self, action: &str, context: &[(&str, &str)]) -> bool {
        if self.effect != Effect::Allow {
            return false;
        }
        if !self.action.iter().any(|a| action_matches(a, action)) {
            return false;
        }
        for (operator, entries) in self.condition.iter() {
            if operator != "StringEquals" {
                return false;
            }
            let entries = match entries.as_object() {
                Some(e) => e,
                None => return false,
            };
            for (key, expected) in entries.iter() {
                let actual = context.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| *v);
                match (actual, expected) {
                    (Some(actual), Value::String(expected)) if actual == expected => {}
                    // unresolved intrinsic: compare against its canonical json text
                    (Some(actual), other) if !other.is_string() && actual == other.to_string() => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

fn action_matches(pattern: &str, action: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => action.starts_with(prefix),
        None => pattern.eq_ignore_ascii_case(action),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<PolicyStatement>) -> Self {
        Self { version: POLICY_VERSION.to_string(), statement }
    }

    /// explicit deny wins, otherwise any allowing statement grants access.
    pub fn allows(&self, action: &str, context: &[(&str, &str)]) -> bool {
        let denied = self.statement.iter().any(|s| {
            s.effect == Effect::Deny && s.action.iter().any(|a| action_matches(a, action))
        });
        !denied && self.statement.iter().any(|s| s.allows(action, context))
    }
}

/// trust policy allowing a service (eg: `lambda.amazonaws.com`) to assume a role.
pub fn create_assume_role_policy_doc(service: &str) -> PolicyDocument {
    PolicyDocument::new(vec![PolicyStatement {
        effect: Effect::Allow,
        principal: Some(Principal::Service(service.to_string())),
        action: vec!["sts:AssumeRole".to_string()],
        resource: vec![],
        condition: Map::new(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_like_iam_expects() {
        let statement = PolicyStatement::allow(&["s3:*"], vec!["arn:aws:s3:::b/*".into()])
            .with_principal(Principal::Any)
            .with_string_equals("aws:sourceVpce", "vpce-123".into());
        let doc = serde_json::to_value(PolicyDocument::new(vec![statement])).unwrap();
        assert_eq!(doc, json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": "*",
                "Action": ["s3:*"],
                "Resource": ["arn:aws:s3:::b/*"],
                "Condition": { "StringEquals": { "aws:sourceVpce": "vpce-123" } },
            }],
        }));
    }

    #[test]
    fn condition_gates_access() {
        let statement = PolicyStatement::allow(&["s3:*"], vec![])
            .with_principal(Principal::Any)
            .with_string_equals("aws:sourceVpce", "vpce-123".into());
        assert!(statement.allows("s3:GetObject", &[("aws:SourceVpce", "vpce-123")]));
        assert!(!statement.allows("s3:GetObject", &[("aws:SourceVpce", "vpce-999")]));
        assert!(!statement.allows("s3:GetObject", &[]));
        assert!(!statement.allows("ec2:DescribeVpcs", &[("aws:SourceVpce", "vpce-123")]));
    }

    #[test]
    fn assume_role_doc_names_service() {
        let doc = serde_json::to_value(create_assume_role_policy_doc("lambda.amazonaws.com")).unwrap();
        assert_eq!(doc["Statement"][0]["Principal"], json!({ "Service": "lambda.amazonaws.com" }));
        assert_eq!(doc["Statement"][0]["Action"], json!(["sts:AssumeRole"]));
    }
}
