//! Lambda functions whose source ships inline in the template (`Code.ZipFile`),
//! together with the execution role they run as. These back the custom
//! resources of the stack; user code is never deployed this way.

use aws_cfn_stack::{
    get_att,
    intrinsics::sub,
    policy::create_assume_role_policy_doc,
    to_properties,
    CfnResource,
    PolicyDocument,
    PolicyStatement,
    Resource,
};
use serde::Serialize;
use serde_json::Value;

/// CloudFormation refuses inline code larger than this.
pub const MAX_INLINE_CODE_LEN: usize = 4096;
pub const DEFAULT_RUNTIME: &str = "nodejs20.x";
const BASIC_EXECUTION_POLICY: &str = "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    pub policy_name: String,
    pub policy_document: PolicyDocument,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRole {
    pub assume_role_policy_document: PolicyDocument,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub managed_policy_arns: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<Policy>,
}

impl CfnResource for CfnRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Code {
    #[serde(rename = "ZipFile")]
    pub zip_file: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnFunction {
    pub runtime: String,
    pub handler: String,
    pub role: Value,
    pub code: Code,
    pub memory_size: u64,
    pub timeout: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CfnResource for CfnFunction {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.code.zip_file.len() > MAX_INLINE_CODE_LEN {
            return Err(format!(
                "Inline code is {} bytes\nMust be at most {} bytes",
                self.code.zip_file.len(), MAX_INLINE_CODE_LEN,
            ));
        }
        if self.memory_size < 128 || self.memory_size > 10240 {
            return Err(format!("Invalid memory size {:?}\nMust be between 128 and 10240", self.memory_size));
        }
        if self.timeout < 1 || self.timeout > 900 {
            return Err(format!("Invalid timeout {:?}\nMust be between 1 and 900", self.timeout));
        }
        Ok(())
    }
}

pub struct Input {
    /// logical name of the function. The role is named `{resource_name}Role`.
    pub resource_name: String,
    pub description: String,
    pub runtime: String,
    pub code: String,
    /// memory in MB. Defaults to 128.
    pub memory_size: u64,
    /// seconds. Defaults to 120.
    pub timeout: u32,
    /// permissions granted to the function on top of basic execution (logs).
    pub statements: Vec<PolicyStatement>,
}

impl Input {
    pub fn inline(resource_name: &str, code: &str) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            description: String::new(),
            runtime: DEFAULT_RUNTIME.to_string(),
            code: code.to_string(),
            memory_size: 128,
            timeout: 120,
            statements: vec![],
        }
    }
}

pub struct Outputs {
    pub function_logical_id: String,
    pub role_logical_id: String,
}

impl Outputs {
    /// `Fn::GetAtt <function>.Arn`, the `ServiceToken` of custom resources.
    pub fn service_token(&self) -> Value {
        get_att(&self.function_logical_id, "Arn")
    }
}

pub fn config(input: Input, stackinp: &mut aws_cfn_stack::Input) -> Outputs {
    let role_logical_id = format!("{}Role", input.resource_name);
    let description = if input.description.is_empty() { None } else { Some(input.description) };
    let policies = if input.statements.is_empty() {
        vec![]
    } else {
        vec![Policy {
            policy_name: format!("{}Policy", input.resource_name),
            policy_document: PolicyDocument::new(input.statements),
        }]
    };
    let role = CfnRole {
        assume_role_policy_document: create_assume_role_policy_doc("lambda.amazonaws.com"),
        description: description.clone(),
        managed_policy_arns: vec![sub(BASIC_EXECUTION_POLICY)],
        policies,
    };
    let function = CfnFunction {
        runtime: input.runtime,
        handler: "index.handler".to_string(),
        role: get_att(&role_logical_id, "Arn"),
        code: Code { zip_file: input.code },
        memory_size: input.memory_size,
        timeout: input.timeout,
        description,
    };
    stackinp.push(Resource::new(role_logical_id.clone(), role));
    stackinp.push(Resource::new(input.resource_name.clone(), function));
    Outputs {
        function_logical_id: input.resource_name,
        role_logical_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_cfn_stack::{synthesize, Environment};
    use serde_json::json;

    fn stack_input() -> aws_cfn_stack::Input {
        aws_cfn_stack::Input::new("Test", Environment { account: "123456789012".into(), region: "us-east-1".into() })
    }

    #[test]
    fn function_runs_as_its_own_role() {
        let mut stack = stack_input();
        let mut input = Input::inline("Handler", "exports.handler = async () => {}");
        input.statements.push(PolicyStatement::allow(&["ec2:DescribeVpcs"], vec!["*".into()]));
        let outputs = config(input, &mut stack);
        assert_eq!(outputs.service_token(), json!({"Fn::GetAtt": ["Handler", "Arn"]}));

        let stack = synthesize(stack).unwrap();
        let function = &stack.template.resources["Handler"];
        assert_eq!(function.ty, "AWS::Lambda::Function");
        assert_eq!(function.properties["Role"], json!({"Fn::GetAtt": ["HandlerRole", "Arn"]}));
        assert_eq!(function.properties["Runtime"], "nodejs20.x");
        let role = &stack.template.resources["HandlerRole"];
        assert_eq!(
            role.properties["Policies"][0]["PolicyDocument"]["Statement"][0]["Action"],
            json!(["ec2:DescribeVpcs"]),
        );
    }

    #[test]
    fn oversized_inline_code_fails_validation() {
        let mut stack = stack_input();
        config(Input::inline("Handler", &"x".repeat(MAX_INLINE_CODE_LEN + 1)), &mut stack);
        let err = synthesize(stack).err().unwrap();
        assert!(err.to_string().contains("Must be at most 4096 bytes"));
    }

    #[test]
    fn timeout_is_bounded() {
        let mut stack = stack_input();
        let mut input = Input::inline("Handler", "x");
        input.timeout = 901;
        config(input, &mut stack);
        assert!(synthesize(stack).is_err());
    }
}
