use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A property value that is either a literal string or an intrinsic
/// function (`Ref`, `Fn::GetAtt`, `Fn::Sub`, ...) resolved by CloudFormation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StrVal {
    String(String),
    Val(Value),
}

impl Default for StrVal {
    fn default() -> Self {
        StrVal::String(String::new())
    }
}

impl StrVal {
    /// the literal value, if this is not an intrinsic.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            StrVal::String(s) => Some(s.as_str()),
            StrVal::Val(Value::String(s)) => Some(s.as_str()),
            StrVal::Val(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            StrVal::String(s) => Value::String(s.clone()),
            StrVal::Val(v) => v.clone(),
        }
    }
}

impl From<&str> for StrVal {
    fn from(value: &str) -> Self {
        StrVal::String(value.to_string())
    }
}

impl From<String> for StrVal {
    fn from(value: String) -> Self {
        StrVal::String(value)
    }
}

impl From<Value> for StrVal {
    fn from(value: Value) -> Self {
        StrVal::Val(value)
    }
}

fn single_key(key: &str, val: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), val);
    Value::Object(map)
}

/// `{ "Ref": logical_id }`
pub fn get_ref(logical_id: &str) -> Value {
    single_key("Ref", Value::String(logical_id.to_string()))
}

/// `{ "Fn::GetAtt": [logical_id, attribute] }`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    single_key("Fn::GetAtt", Value::Array(vec![
        Value::String(logical_id.to_string()),
        Value::String(attribute.to_string()),
    ]))
}

/// `{ "Fn::Sub": template }`
pub fn sub(template: &str) -> Value {
    single_key("Fn::Sub", Value::String(template.to_string()))
}

/// `arn:<partition>:s3:::<bucket>/*` for the bucket with the given logical id.
pub fn bucket_objects_arn(bucket_logical_id: &str) -> Value {
    sub(&format!("arn:${{AWS::Partition}}:s3:::${{{bucket_logical_id}}}/*"))
}

/// `arn:<partition>:s3:::<bucket>` for the bucket with the given logical id.
pub fn bucket_arn(bucket_logical_id: &str) -> Value {
    sub(&format!("arn:${{AWS::Partition}}:s3:::${{{bucket_logical_id}}}"))
}

/// Collect every logical id referenced by `Ref`, `Fn::GetAtt` or a
/// `${Name}` / `${Name.Attr}` placeholder inside `Fn::Sub`.
/// Pseudo parameters (`AWS::...`) are skipped.
pub fn referenced_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("Ref") {
                push_id(id, out);
            }
            if let Some(Value::Array(parts)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(id)) = parts.first() {
                    push_id(id, out);
                }
            }
            if let Some(Value::String(template)) = map.get("Fn::Sub") {
                for placeholder in sub_placeholders(template) {
                    let id = placeholder.split('.').next().unwrap_or_default();
                    push_id(id, out);
                }
            }
            for (_, v) in map.iter() {
                referenced_ids(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                referenced_ids(v, out);
            }
        }
        _ => {}
    }
}

fn push_id(id: &str, out: &mut Vec<String>) {
    if id.is_empty() || id.starts_with("AWS::") {
        return;
    }
    if !out.iter().any(|x| x == id) {
        out.push(id.to_string());
    }
}

fn sub_placeholders(template: &str) -> Vec<&str> {
    let mut out = vec![];
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                // ${!Literal} is an escaped placeholder
                if !after.starts_with('!') {
                    out.push(&after[..end]);
                }
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    out
}
