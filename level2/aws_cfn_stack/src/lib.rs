use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod deploy;
pub mod intrinsics;
pub mod policy;

pub use intrinsics::{get_att, get_ref, sub, StrVal};
pub use policy::{PolicyDocument, PolicyStatement, Principal};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("Validation failed on resource '{resource}'\n{reason}")]
    InvalidResource { resource: String, reason: String },
    #[error("Invalid stack name {0}\nMust only consist of alphanumeric characters and hyphens, Must start with an alphabetical character, and cannot be longer than 128 characters.")]
    InvalidStackName(String),
    #[error("Duplicate logical id '{0}'")]
    DuplicateLogicalId(String),
    #[error("Resource '{resource}' references '{target}' which is not declared in the stack")]
    DanglingReference { resource: String, target: String },
    #[error("Failed to serialize template\n{0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Stack {name} failed: {reason}")]
    StackFailed { name: String, reason: String },
    #[error("Stack {0} not found")]
    StackNotFound(String),
    #[error("CloudFormation request failed: {0}")]
    Sdk(String),
}

/// Anything that can be rendered as the `Type` + `Properties` of a
/// CloudFormation resource.
pub trait CfnResource {
    fn type_string(&self) -> &'static str;
    fn properties(&self) -> Value;
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Render a serde struct as a properties object.
pub fn to_properties<T: Serialize>(props: &T) -> Value {
    serde_json::to_value(props).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

pub struct Resource {
    /// the logical id of the resource within the template.
    pub name: String,
    pub properties: Box<dyn CfnResource>,
    pub depends_on: Vec<String>,
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource {
    pub fn new(name: impl Into<String>, properties: impl CfnResource + 'static) -> Self {
        Self {
            name: name.into(),
            properties: Box::new(properties),
            depends_on: vec![],
            deletion_policy: None,
        }
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.push(logical_id.into());
        self
    }

    /// sets both `DeletionPolicy` and `UpdateReplacePolicy`.
    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedResource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOutput {
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Value")]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedTemplate {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, SavedResource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, ResourceOutput>,
}

impl Default for SavedTemplate {
    fn default() -> Self {
        Self {
            version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: String::new(),
            resources: Default::default(),
            outputs: Default::default(),
        }
    }
}

impl SavedTemplate {
    /// all resources of the given CloudFormation type, by logical id.
    pub fn resources_of_type<'a>(&'a self, ty: &'a str) -> impl Iterator<Item = (&'a String, &'a SavedResource)> + 'a {
        self.resources.iter().filter(move |(_, r)| r.ty == ty)
    }
}

/// the account/region pair a stack is bound to, rendered as `aws://account/region`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub account: String,
    pub region: String,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "aws://{}/{}", self.account, self.region)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedStack {
    pub name: String,
    pub environment: Environment,
    pub template: SavedTemplate,
}

impl SavedStack {
    /// pretty, so if a user needs to look at the stack in the Cfn console, it looks nice
    pub fn template_body(&self) -> Result<String, StackError> {
        Ok(serde_json::to_string_pretty(&self.template)?)
    }
}

pub struct Input {
    pub stack_name: String,
    pub description: String,
    pub environment: Environment,
    pub resources: Vec<Resource>,
    pub outputs: Vec<(String, ResourceOutput)>,
}

impl Input {
    pub fn new(stack_name: &str, environment: Environment) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            description: String::new(),
            environment,
            resources: vec![],
            outputs: vec![],
        }
    }

    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn add_output(&mut self, name: &str, description: &str, value: Value) {
        self.outputs.push((name.to_string(), ResourceOutput {
            description: description.to_string(),
            value,
        }));
    }

    pub fn has_resource(&self, logical_id: &str) -> bool {
        self.resources.iter().any(|r| r.name == logical_id)
    }
}

/// Logical ids must be alphanumeric and at most 255 characters.
pub fn verify_resource_name(resource_name: &str) -> Option<String> {
    if resource_name.len() > 255 {
        return Some(format!("Invalid resource name {:?}\nmust be less than 255 characters", resource_name));
    }
    if resource_name.is_empty() {
        return Some(format!("Invalid resource name {:?}\nMust contain at least 1 character", resource_name));
    }
    if !resource_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(format!("Invalid resource name {:?}\nMust contain only alphanumeric characters [A-Za-z0-9]", resource_name));
    }
    None
}

/// A stack name can contain only alphanumeric characters (case sensitive) and hyphens.
/// It must start with an alphabetical character and can't be longer than 128 characters.
pub fn validate_stack_name(stack_name: &str) -> Result<(), StackError> {
    let invalid = || StackError::InvalidStackName(stack_name.to_string());
    match stack_name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return Err(invalid()),
    }
    if stack_name.len() > 128 {
        return Err(invalid());
    }
    if !stack_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(invalid());
    }
    Ok(())
}

fn validate_resources_to_template(resources: &[Resource]) -> Result<SavedTemplate, StackError> {
    let mut out_template = SavedTemplate::default();
    for resource in resources.iter() {
        if let Some(reason) = verify_resource_name(&resource.name) {
            return Err(StackError::InvalidResource { resource: resource.name.clone(), reason });
        }
        if let Err(reason) = resource.properties.validate() {
            return Err(StackError::InvalidResource { resource: resource.name.clone(), reason });
        }
        let saved_resource = SavedResource {
            ty: resource.properties.type_string().to_string(),
            properties: resource.properties.properties(),
            depends_on: resource.depends_on.clone(),
            deletion_policy: resource.deletion_policy,
            update_replace_policy: resource.deletion_policy,
        };
        if out_template.resources.insert(resource.name.clone(), saved_resource).is_some() {
            return Err(StackError::DuplicateLogicalId(resource.name.clone()));
        }
    }
    Ok(out_template)
}

fn check_references(template: &SavedTemplate) -> Result<(), StackError> {
    for (name, resource) in template.resources.iter() {
        let mut ids = resource.depends_on.clone();
        intrinsics::referenced_ids(&resource.properties, &mut ids);
        for id in ids {
            if !template.resources.contains_key(&id) {
                return Err(StackError::DanglingReference { resource: name.clone(), target: id });
            }
        }
    }
    for (name, output) in template.outputs.iter() {
        let mut ids = vec![];
        intrinsics::referenced_ids(&output.value, &mut ids);
        for id in ids {
            if !template.resources.contains_key(&id) {
                return Err(StackError::DanglingReference { resource: name.clone(), target: id });
            }
        }
    }
    Ok(())
}

/// Validate every declared resource and assemble the final stack.
pub fn synthesize(input: Input) -> Result<SavedStack, StackError> {
    validate_stack_name(&input.stack_name)?;
    let mut template = validate_resources_to_template(&input.resources)?;
    template.description = input.description;
    for (name, output) in input.outputs {
        if let Some(reason) = verify_resource_name(&name) {
            return Err(StackError::InvalidResource { resource: name, reason });
        }
        template.outputs.insert(name, output);
    }
    check_references(&template)?;
    tracing::debug!(stack = %input.stack_name, resources = template.resources.len(), "synthesized template");
    Ok(SavedStack {
        name: input.stack_name,
        environment: input.environment,
        template,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Dummy {
        target: Option<String>,
        valid: bool,
    }

    impl CfnResource for Dummy {
        fn type_string(&self) -> &'static str {
            "Custom::Dummy"
        }
        fn properties(&self) -> Value {
            match &self.target {
                Some(t) => json!({ "Other": get_ref(t) }),
                None => json!({}),
            }
        }
        fn validate(&self) -> Result<(), String> {
            if self.valid { Ok(()) } else { Err("dummy is invalid".into()) }
        }
    }

    fn env() -> Environment {
        Environment { account: "123456789012".into(), region: "us-east-1".into() }
    }

    fn dummy(target: Option<&str>) -> Dummy {
        Dummy { target: target.map(|t| t.to_string()), valid: true }
    }

    #[test]
    fn stack_names_follow_cfn_rules() {
        assert!(validate_stack_name("RouterStack").is_ok());
        assert!(validate_stack_name("router-stack-2").is_ok());
        assert!(validate_stack_name("2router").is_err());
        assert!(validate_stack_name("router_stack").is_err());
        assert!(validate_stack_name("").is_err());
        assert!(validate_stack_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn synthesizes_resources_and_policies() {
        let mut input = Input::new("RouterStack", env());
        input.push(Resource::new("A", dummy(None)).with_deletion_policy(DeletionPolicy::Delete));
        input.push(Resource::new("B", dummy(Some("A"))).depends_on("A"));
        input.add_output("AName", "the a", get_ref("A"));
        let stack = synthesize(input).unwrap();
        let body: Value = serde_json::from_str(&stack.template_body().unwrap()).unwrap();
        assert_eq!(body["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(body["Resources"]["A"]["DeletionPolicy"], "Delete");
        assert_eq!(body["Resources"]["A"]["UpdateReplacePolicy"], "Delete");
        assert_eq!(body["Resources"]["B"]["DependsOn"], json!(["A"]));
        assert!(body["Resources"]["B"].get("DeletionPolicy").is_none());
        assert_eq!(body["Outputs"]["AName"]["Value"], json!({"Ref": "A"}));
    }

    #[test]
    fn rejects_dangling_references() {
        let mut input = Input::new("RouterStack", env());
        input.push(Resource::new("B", dummy(Some("Missing"))));
        match synthesize(input) {
            Err(StackError::DanglingReference { resource, target }) => {
                assert_eq!(resource, "B");
                assert_eq!(target, "Missing");
            }
            other => panic!("expected dangling reference, got {:?}", other.map(|s| s.name)),
        }
    }

    #[test]
    fn rejects_duplicates_and_invalid_resources() {
        let mut input = Input::new("RouterStack", env());
        input.push(Resource::new("A", dummy(None)));
        input.push(Resource::new("A", dummy(None)));
        assert!(matches!(synthesize(input), Err(StackError::DuplicateLogicalId(_))));

        let mut input = Input::new("RouterStack", env());
        input.push(Resource::new("A", Dummy { target: None, valid: false }));
        let err = synthesize(input).err().unwrap();
        assert!(err.to_string().contains("dummy is invalid"));

        let mut input = Input::new("RouterStack", env());
        input.push(Resource::new("not-alnum", dummy(None)));
        assert!(matches!(synthesize(input), Err(StackError::InvalidResource { .. })));
    }

    #[test]
    fn environment_renders_as_uri() {
        assert_eq!(env().to_string(), "aws://123456789012/us-east-1");
    }
}
