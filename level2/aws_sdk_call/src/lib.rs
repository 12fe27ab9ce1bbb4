//! Custom resources that perform a single AWS API call while the stack is
//! deployed and expose selected fields of the response through
//! `Fn::GetAtt <resource>.<path>`. Paths flatten the response: object keys
//! and array indices joined by `.`, eg: `VpcEndpoints.0.NetworkInterfaceIds.1`.

use aws_cfn_stack::{get_att, CfnResource, PolicyStatement, Resource};
use serde_json::{json, Map, Value};

pub const SDK_CALL_TYPE: &str = "Custom::AwsSdkCall";
pub const HANDLER_CODE: &str = include_str!("handler.js");

/// Fail the call unless the array at `path` has exactly `count` items.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedCount {
    pub path: String,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct AwsSdkCall {
    /// SDK client name, eg: `EC2`.
    pub service: String,
    /// camelCase API name, eg: `describeVpcEndpoints`.
    pub action: String,
    pub parameters: Value,
    /// flattened response paths returned as attributes.
    pub output_paths: Vec<String>,
    pub expected_count: Option<ExpectedCount>,
}

impl AwsSdkCall {
    pub fn new(service: &str, action: &str, parameters: Value) -> Self {
        Self {
            service: service.to_string(),
            action: action.to_string(),
            parameters,
            output_paths: vec![],
            expected_count: None,
        }
    }

    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.output_paths.push(path.into());
        self
    }

    pub fn expect_count(mut self, path: &str, count: usize) -> Self {
        self.expected_count = Some(ExpectedCount { path: path.to_string(), count });
        self
    }

    /// the IAM action this call needs, eg: `ec2:DescribeVpcEndpoints`.
    pub fn iam_action(&self) -> String {
        let mut chars = self.action.chars();
        let action = match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        };
        format!("{}:{}", self.service.to_lowercase(), action)
    }
}

struct SdkCallResource {
    service_token: Value,
    call: AwsSdkCall,
}

impl CfnResource for SdkCallResource {
    fn type_string(&self) -> &'static str {
        SDK_CALL_TYPE
    }

    fn properties(&self) -> Value {
        let mut map = Map::new();
        map.insert("ServiceToken".to_string(), self.service_token.clone());
        map.insert("Service".to_string(), Value::String(self.call.service.clone()));
        map.insert("Action".to_string(), Value::String(self.call.action.clone()));
        map.insert("Parameters".to_string(), self.call.parameters.clone());
        map.insert("OutputPaths".to_string(), json!(self.call.output_paths));
        if let Some(expected) = &self.call.expected_count {
            // custom resource properties reach the handler as strings anyway
            map.insert("ExpectedCount".to_string(), json!({
                "Path": expected.path,
                "Count": expected.count.to_string(),
            }));
        }
        Value::Object(map)
    }

    fn validate(&self) -> Result<(), String> {
        let call = &self.call;
        if call.service.is_empty() || !call.service.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("Invalid service {:?}\nMust be a non empty alphanumeric SDK client name, eg: EC2", call.service));
        }
        match call.action.chars().next() {
            Some(c) if c.is_ascii_lowercase() => {}
            _ => return Err(format!("Invalid action {:?}\nMust be the camelCase API name, eg: describeVpcEndpoints", call.action)),
        }
        if call.output_paths.is_empty() {
            return Err("At least one output path is required".to_string());
        }
        if let Some(expected) = &call.expected_count {
            if expected.path.is_empty() {
                return Err("Expected count needs a response path".to_string());
            }
        }
        Ok(())
    }
}

/// A declared call. Attribute values only exist once CloudFormation ran it.
#[derive(Debug, Clone, PartialEq)]
pub struct SdkCallHandle {
    pub logical_id: String,
}

impl SdkCallHandle {
    /// `Fn::GetAtt <call>.<path>`
    pub fn response_field(&self, path: &str) -> Value {
        get_att(&self.logical_id, path)
    }
}

/// Collects calls sharing one provider function. The provider's role is
/// granted exactly the IAM actions of the collected calls.
pub struct SdkCallProvider {
    resource_name: String,
    calls: Vec<(String, AwsSdkCall)>,
}

impl SdkCallProvider {
    pub fn new(resource_name: &str) -> Self {
        Self { resource_name: resource_name.to_string(), calls: vec![] }
    }

    pub fn call(&mut self, logical_id: &str, call: AwsSdkCall) -> SdkCallHandle {
        tracing::debug!(logical_id, action = %call.iam_action(), "declaring sdk call");
        self.calls.push((logical_id.to_string(), call));
        SdkCallHandle { logical_id: logical_id.to_string() }
    }

    /// Declare the provider function and every collected call.
    /// Does nothing if no calls were collected.
    pub fn config(self, stackinp: &mut aws_cfn_stack::Input) {
        if self.calls.is_empty() {
            return;
        }
        let mut actions: Vec<String> = self.calls.iter().map(|(_, c)| c.iam_action()).collect();
        actions.sort();
        actions.dedup();
        let action_refs: Vec<&str> = actions.iter().map(|a| a.as_str()).collect();

        let mut function = aws_lambda::Input::inline(&self.resource_name, HANDLER_CODE);
        function.description = "performs AWS API calls on behalf of Custom::AwsSdkCall resources".to_string();
        function.statements.push(PolicyStatement::allow(&action_refs, vec!["*".into()]));
        let provider = aws_lambda::config(function, stackinp);

        for (logical_id, call) in self.calls {
            let resource = SdkCallResource { service_token: provider.service_token(), call };
            stackinp.push(Resource::new(logical_id, resource));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::{synthesize, Environment};

    fn stack_input() -> aws_cfn_stack::Input {
        aws_cfn_stack::Input::new("Test", Environment { account: "123456789012".into(), region: "us-east-1".into() })
    }

    #[test]
    fn iam_action_is_derived_from_call() {
        let call = AwsSdkCall::new("EC2", "describeNetworkInterfaces", json!({}));
        assert_eq!(call.iam_action(), "ec2:DescribeNetworkInterfaces");
    }

    #[test]
    fn chained_calls_share_a_provider() {
        let mut stack = stack_input();
        let mut provider = SdkCallProvider::new("Provider");
        let first = provider.call("First", AwsSdkCall::new("EC2", "describeVpcs", json!({}))
            .output_path("Vpcs.0.VpcId")
            .expect_count("Vpcs", 1));
        let second = provider.call("Second", AwsSdkCall::new("EC2", "describeSubnets", json!({
            "Filters": [{ "Name": "vpc-id", "Values": [first.response_field("Vpcs.0.VpcId")] }],
        })).output_path("Subnets.0.SubnetId"));
        provider.config(&mut stack);
        let stack = synthesize(stack).unwrap();

        let resources = &stack.template.resources;
        assert_eq!(resources["First"].ty, SDK_CALL_TYPE);
        assert_eq!(resources["First"].properties["ServiceToken"], json!({"Fn::GetAtt": ["Provider", "Arn"]}));
        assert_eq!(resources["First"].properties["ExpectedCount"], json!({"Path": "Vpcs", "Count": "1"}));
        assert_eq!(
            resources["Second"].properties["Parameters"]["Filters"][0]["Values"][0],
            json!({"Fn::GetAtt": ["First", "Vpcs.0.VpcId"]}),
        );
        assert!(resources["Second"].properties.get("ExpectedCount").is_none());
        assert_eq!(second.response_field("Subnets.0.SubnetId"), json!({"Fn::GetAtt": ["Second", "Subnets.0.SubnetId"]}));

        let statement = &resources["ProviderRole"].properties["Policies"][0]["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], json!(["ec2:DescribeSubnets", "ec2:DescribeVpcs"]));
    }

    #[test]
    fn calls_without_outputs_are_rejected() {
        let mut stack = stack_input();
        let mut provider = SdkCallProvider::new("Provider");
        provider.call("First", AwsSdkCall::new("EC2", "describeVpcs", json!({})));
        provider.config(&mut stack);
        assert!(synthesize(stack).is_err());
    }

    #[test]
    fn handler_fits_inline() {
        assert!(HANDLER_CODE.len() <= aws_lambda::MAX_INLINE_CODE_LEN);
    }
}
