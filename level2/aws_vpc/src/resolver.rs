//! Resolve an interface endpoint to the private IPs of its network interfaces.
//!
//! Two dependent lookups, each its own stage:
//! 1. `describeVpcEndpoints` -> network interface ids
//! 2. `describeNetworkInterfaces` on those ids -> private IP addresses
//!
//! Both stages assert the interface count, so an endpoint with more or fewer
//! interfaces fails the deployment instead of producing a partial target list.

use aws_sdk_call::{AwsSdkCall, SdkCallHandle, SdkCallProvider};
use serde_json::{json, Value};

use crate::EndpointHandle;

/// the endpoint is placed in this many zones, one interface per zone.
pub const ENDPOINT_INTERFACE_COUNT: usize = 2;

const INTERFACE_IDS_PATH: &str = "VpcEndpoints.0.NetworkInterfaceIds";
const INTERFACES_PATH: &str = "NetworkInterfaces";

/// Stage 1 output: one `Fn::GetAtt` per network interface id.
#[derive(Debug, Clone)]
pub struct InterfaceIds {
    pub call: SdkCallHandle,
    pub ids: Vec<Value>,
}

/// Stage 2 output: one `Fn::GetAtt` per private IP address.
#[derive(Debug, Clone)]
pub struct InterfaceAddresses {
    pub call: SdkCallHandle,
    pub addresses: Vec<Value>,
}

impl InterfaceIds {
    pub fn resolve(endpoint: &EndpointHandle, provider: &mut SdkCallProvider, logical_id: &str) -> Self {
        let mut call = AwsSdkCall::new("EC2", "describeVpcEndpoints", json!({
            "VpcEndpointIds": [endpoint.id()],
        }))
        .expect_count(INTERFACE_IDS_PATH, ENDPOINT_INTERFACE_COUNT);
        let paths: Vec<String> = (0..ENDPOINT_INTERFACE_COUNT)
            .map(|i| format!("{INTERFACE_IDS_PATH}.{i}"))
            .collect();
        for path in paths.iter() {
            call = call.output_path(path.clone());
        }
        let call = provider.call(logical_id, call);
        let ids = paths.iter().map(|p| call.response_field(p)).collect();
        Self { call, ids }
    }

    pub fn resolve_addresses(&self, provider: &mut SdkCallProvider, logical_id: &str) -> InterfaceAddresses {
        let mut call = AwsSdkCall::new("EC2", "describeNetworkInterfaces", json!({
            "NetworkInterfaceIds": self.ids,
        }))
        .expect_count(INTERFACES_PATH, self.ids.len());
        let paths: Vec<String> = (0..self.ids.len())
            .map(|i| format!("{INTERFACES_PATH}.{i}.PrivateIpAddress"))
            .collect();
        for path in paths.iter() {
            call = call.output_path(path.clone());
        }
        let call = provider.call(logical_id, call);
        let addresses = paths.iter().map(|p| call.response_field(p)).collect();
        InterfaceAddresses { call, addresses }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_depend_on_interface_ids() {
        let endpoint = EndpointHandle { logical_id: "S3VpcEndpoint".into() };
        let mut provider = SdkCallProvider::new("Provider");
        let ids = InterfaceIds::resolve(&endpoint, &mut provider, "VpcEndpointProps");
        assert_eq!(ids.ids, vec![
            json!({"Fn::GetAtt": ["VpcEndpointProps", "VpcEndpoints.0.NetworkInterfaceIds.0"]}),
            json!({"Fn::GetAtt": ["VpcEndpointProps", "VpcEndpoints.0.NetworkInterfaceIds.1"]}),
        ]);

        let addrs = ids.resolve_addresses(&mut provider, "NetworkInterfaceProps");
        assert_eq!(addrs.addresses, vec![
            json!({"Fn::GetAtt": ["NetworkInterfaceProps", "NetworkInterfaces.0.PrivateIpAddress"]}),
            json!({"Fn::GetAtt": ["NetworkInterfaceProps", "NetworkInterfaces.1.PrivateIpAddress"]}),
        ]);
    }

    #[test]
    fn both_stages_assert_the_interface_count() {
        use aws_cfn_stack::{synthesize, Environment};

        let mut stack = aws_cfn_stack::Input::new("Test", Environment { account: "123456789012".into(), region: "us-east-1".into() });
        stack.push(aws_cfn_stack::Resource::new("S3VpcEndpoint", crate::CfnVpcEndpoint {
            service_name: "com.amazonaws.us-east-1.s3".into(),
            vpc_id: "vpc-1".into(),
            vpc_endpoint_type: "Interface".into(),
            subnet_ids: vec!["subnet-1".into()],
            security_group_ids: vec![],
            private_dns_enabled: false,
        }));
        let endpoint = EndpointHandle { logical_id: "S3VpcEndpoint".into() };
        let mut provider = SdkCallProvider::new("Provider");
        let ids = InterfaceIds::resolve(&endpoint, &mut provider, "VpcEndpointProps");
        ids.resolve_addresses(&mut provider, "NetworkInterfaceProps");
        provider.config(&mut stack);
        let stack = synthesize(stack).unwrap();

        let first = &stack.template.resources["VpcEndpointProps"].properties;
        assert_eq!(first["Parameters"], json!({"VpcEndpointIds": [{"Ref": "S3VpcEndpoint"}]}));
        assert_eq!(first["ExpectedCount"], json!({"Path": "VpcEndpoints.0.NetworkInterfaceIds", "Count": "2"}));
        let second = &stack.template.resources["NetworkInterfaceProps"].properties;
        assert_eq!(second["ExpectedCount"], json!({"Path": "NetworkInterfaces", "Count": "2"}));
    }
}
