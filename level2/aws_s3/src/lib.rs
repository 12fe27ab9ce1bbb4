//! this is a higher level module for creating S3 buckets easily. Some higher level
//! functionality this provides is easily setting up static website hosting.
//! In addition to creating an S3 bucket, by default we create custom cloudformation resources
//! for cleanup. That is: a lambda function will be created that will delete the contents
//! of this S3 bucket when the cloudformation stack gets deleted. This enables easy teardown.
//! See the input section to customize this behavior.

use aws_cfn_stack::{
    get_ref,
    intrinsics::{bucket_arn, bucket_objects_arn},
    to_properties,
    CfnResource,
    DeletionPolicy,
    PolicyDocument,
    PolicyStatement,
    Principal,
    Resource,
};
use aws_vpc::EndpointHandle;
use serde::Serialize;
use serde_json::{Map, Value};

pub mod sync;

pub use sync::{sync_directory, ObjectStore, S3ObjectStore, SyncError, SyncReport};

pub const CLEANUP_CODE: &str = include_str!("cleanup.js");
pub const CLEANUP_RESOURCE_TYPE: &str = "Custom::S3AutoDeleteObjects";
/// condition key carrying the id of the VPC endpoint a request arrived through.
pub const SOURCE_VPCE_KEY: &str = "aws:sourceVpce";

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebsiteConfiguration {
    pub index_document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_document: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlockConfiguration {
    pub block_public_acls: bool,
    pub block_public_policy: bool,
    pub ignore_public_acls: bool,
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlockConfiguration {
    pub fn block_all() -> Self {
        Self {
            block_public_acls: true,
            block_public_policy: true,
            ignore_public_acls: true,
            restrict_public_buckets: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_configuration: Option<WebsiteConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_access_block_configuration: Option<PublicAccessBlockConfiguration>,
}

impl CfnResource for CfnBucket {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        match &self.bucket_name {
            Some(name) => verify_bucket_name(name),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnBucketPolicy {
    pub bucket: Value,
    pub policy_document: PolicyDocument,
}

impl CfnResource for CfnBucketPolicy {
    fn type_string(&self) -> &'static str {
        "AWS::S3::BucketPolicy"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.policy_document.statement.is_empty() {
            return Err("Bucket policy must have at least one statement".to_string());
        }
        Ok(())
    }
}

pub struct CleanupResource {
    pub lambda_logical_id: String,
    pub bucket_logical_id: String,
}

impl CfnResource for CleanupResource {
    fn type_string(&self) -> &'static str {
        CLEANUP_RESOURCE_TYPE
    }
    fn properties(&self) -> Value {
        let mut map = Map::new();
        map.insert("ServiceToken".to_string(), aws_cfn_stack::get_att(&self.lambda_logical_id, "Arn"));
        map.insert("BucketName".to_string(), get_ref(&self.bucket_logical_id));
        Value::Object(map)
    }
}

/// Bucket names: 3-63 characters of lowercase letters, digits, dots and hyphens,
/// beginning and ending with a letter or digit.
pub fn verify_bucket_name(name: &str) -> Result<(), String> {
    if name.len() < 3 || name.len() > 63 {
        return Err(format!("Invalid bucket name {:?}\nMust be between 3 and 63 characters", name));
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-') {
        return Err(format!("Invalid bucket name {:?}\nMay only contain lowercase letters, numbers, dots, and hyphens", name));
    }
    let first_last_ok = |c: Option<char>| c.map(|c| c.is_ascii_lowercase() || c.is_ascii_digit()).unwrap_or(false);
    if !first_last_ok(name.chars().next()) || !first_last_ok(name.chars().last()) {
        return Err(format!("Invalid bucket name {:?}\nMust begin and end with a letter or number", name));
    }
    if name.contains("..") {
        return Err(format!("Invalid bucket name {:?}\nMay not contain two consecutive dots", name));
    }
    if name.split('.').count() == 4 && name.split('.').all(|p| p.parse::<u8>().is_ok()) {
        return Err(format!("Invalid bucket name {:?}\nMay not be formatted as an IP address", name));
    }
    if name.starts_with("xn--") || name.ends_with("-s3alias") {
        return Err(format!("Invalid bucket name {:?}\nMay not start with xn-- or end with -s3alias", name));
    }
    Ok(())
}

pub struct Input {
    /// logical name of the bucket resource.
    pub resource_name: String,
    /// physical bucket name. Leave empty to let cloudformation generate one.
    pub bucket_name: String,
    /// if set, website hosting is turned on with this index document.
    /// Unlike a public website, the bucket stays private: every public
    /// access block flag is on. Grant access with a bucket policy.
    pub website_index_document: Option<String>,
    /// By default, every s3 bucket gets a cleanup resource created for it.
    /// this includes:
    /// - a cloudformation custom resource
    /// - a lambda function that will perform the cleanup
    /// - a role for the lambda function that allows it to cleanup the S3 bucket.
    ///
    /// Without a cleanup resource, deleting a stack with an S3 bucket that is not empty will fail.
    /// To disable cleanup resources, set this value to true.
    pub dont_create_cleanup_resources: bool,
}

impl Input {
    pub fn new(resource_name: &str, bucket_name: &str) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            bucket_name: bucket_name.to_string(),
            website_index_document: None,
            dont_create_cleanup_resources: false,
        }
    }
}

pub struct Outputs {
    pub logical_bucket_name: String,
}

impl Outputs {
    pub fn bucket_ref(&self) -> Value {
        get_ref(&self.logical_bucket_name)
    }
}

pub fn config(myinput: Input, stackinp: &mut aws_cfn_stack::Input) -> Outputs {
    let Input { resource_name, bucket_name, website_index_document, dont_create_cleanup_resources } = myinput;
    let bucket = CfnBucket {
        bucket_name: if bucket_name.is_empty() { None } else { Some(bucket_name) },
        website_configuration: website_index_document.map(|index_document| WebsiteConfiguration {
            index_document,
            error_document: None,
        }),
        public_access_block_configuration: Some(PublicAccessBlockConfiguration::block_all()),
    };
    let deletion = if dont_create_cleanup_resources { DeletionPolicy::Retain } else { DeletionPolicy::Delete };
    stackinp.push(Resource::new(resource_name.clone(), bucket).with_deletion_policy(deletion));

    // optionally setup cleanup resources:
    if !dont_create_cleanup_resources {
        let mut function = aws_lambda::Input::inline(&format!("{resource_name}AutoDeleteObjectsFunction"), CLEANUP_CODE);
        function.description = format!("empties {resource_name} when the stack is deleted");
        function.timeout = 900;
        function.statements = vec![
            PolicyStatement::allow(&["s3:ListBucket"], vec![bucket_arn(&resource_name).into()]),
            PolicyStatement::allow(&["s3:DeleteObject"], vec![bucket_objects_arn(&resource_name).into()]),
        ];
        let function = aws_lambda::config(function, stackinp);
        let cleanup = CleanupResource {
            lambda_logical_id: function.function_logical_id,
            bucket_logical_id: resource_name.clone(),
        };
        stackinp.push(Resource::new(format!("{resource_name}AutoDeleteObjects"), cleanup));
    }
    Outputs { logical_bucket_name: resource_name }
}

/// The statement granting every object action to any principal whose
/// request arrives through `endpoint`.
pub fn endpoint_only_statement(bucket_logical_id: &str, endpoint: &EndpointHandle) -> PolicyStatement {
    PolicyStatement::allow(&["s3:*"], vec![bucket_objects_arn(bucket_logical_id).into()])
        .with_principal(Principal::Any)
        .with_string_equals(SOURCE_VPCE_KEY, endpoint.id().into())
}

/// Attach a bucket policy restricting object access to requests that came
/// through `endpoint`.
pub fn restrict_to_endpoint(bucket: &Outputs, endpoint: &EndpointHandle, stackinp: &mut aws_cfn_stack::Input) -> String {
    let policy = CfnBucketPolicy {
        bucket: bucket.bucket_ref(),
        policy_document: PolicyDocument::new(vec![endpoint_only_statement(&bucket.logical_bucket_name, endpoint)]),
    };
    let logical_policy_name = format!("{}Policy", bucket.logical_bucket_name);
    stackinp.push(Resource::new(logical_policy_name.clone(), policy));
    logical_policy_name
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
    fn bucket_names_follow_s3_rules() {
        assert!(verify_bucket_name("site1.example.com").is_ok());
        assert!(verify_bucket_name("ab").unwrap_err().contains("Must be between 3 and 63 characters"));
        assert!(verify_bucket_name("something..exact").unwrap_err().contains("May not contain two consecutive dots"));
        assert!(verify_bucket_name("Upper.example.com").is_err());
        assert!(verify_bucket_name("-leading.example.com").is_err());
        assert!(verify_bucket_name("192.168.5.4").is_err());
        assert!(verify_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn website_bucket_is_private_and_auto_deleted() {
        let mut stack = stack_input();
        let mut input = Input::new("SiteBucket", "site1.example.com");
        input.website_index_document = Some("index.html".into());
        let outputs = config(input, &mut stack);
        assert_eq!(outputs.bucket_ref(), json!({"Ref": "SiteBucket"}));
        let stack = synthesize(stack).unwrap();

        let bucket = &stack.template.resources["SiteBucket"];
        assert_eq!(bucket.properties["BucketName"], "site1.example.com");
        assert_eq!(bucket.properties["WebsiteConfiguration"], json!({"IndexDocument": "index.html"}));
        assert_eq!(bucket.properties["PublicAccessBlockConfiguration"]["BlockPublicPolicy"], true);
        assert_eq!(bucket.deletion_policy, Some(DeletionPolicy::Delete));

        let cleanup = &stack.template.resources["SiteBucketAutoDeleteObjects"];
        assert_eq!(cleanup.ty, CLEANUP_RESOURCE_TYPE);
        assert_eq!(cleanup.properties["BucketName"], json!({"Ref": "SiteBucket"}));
        assert_eq!(cleanup.properties["ServiceToken"], json!({"Fn::GetAtt": ["SiteBucketAutoDeleteObjectsFunction", "Arn"]}));
        let role = &stack.template.resources["SiteBucketAutoDeleteObjectsFunctionRole"];
        let statements = &role.properties["Policies"][0]["PolicyDocument"]["Statement"];
        assert_eq!(statements[1]["Action"], json!(["s3:DeleteObject"]));
    }

    #[test]
    fn without_cleanup_the_bucket_is_retained() {
        let mut stack = stack_input();
        let mut input = Input::new("SiteBucket", "site1.example.com");
        input.dont_create_cleanup_resources = true;
        config(input, &mut stack);
        let stack = synthesize(stack).unwrap();
        assert_eq!(stack.template.resources.len(), 1);
        assert_eq!(stack.template.resources["SiteBucket"].deletion_policy, Some(DeletionPolicy::Retain));
    }

    #[test]
    fn policy_only_admits_requests_through_the_endpoint() {
        let endpoint = EndpointHandle { logical_id: "S3VpcEndpoint".into() };
        let statement = endpoint_only_statement("SiteBucket", &endpoint);
        let endpoint_id = endpoint.id().to_string();
        assert!(statement.allows("s3:GetObject", &[(SOURCE_VPCE_KEY, endpoint_id.as_str())]));
        assert!(statement.allows("s3:PutObject", &[(SOURCE_VPCE_KEY, endpoint_id.as_str())]));
        assert!(!statement.allows("s3:GetObject", &[(SOURCE_VPCE_KEY, "vpce-other")]));
        assert!(!statement.allows("s3:GetObject", &[]));

        let value = serde_json::to_value(&statement).unwrap();
        assert_eq!(value["Condition"], json!({"StringEquals": {"aws:sourceVpce": {"Ref": "S3VpcEndpoint"}}}));
        assert_eq!(value["Principal"], "*");
    }
}
