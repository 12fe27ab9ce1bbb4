use aws_cfn_stack::{get_att, get_ref, to_properties, CfnResource, Resource, StrVal};
use serde::Serialize;
use serde_json::Value;

pub mod lookup;
pub mod resolver;

pub use lookup::{lookup_default_vpc, lookup_vpc, NetworkContext, NetworkQuery, SubnetContext};
pub use resolver::{InterfaceAddresses, InterfaceIds, ENDPOINT_INTERFACE_COUNT};

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("No VPC found for {0}")]
    VpcNotFound(String),
    #[error("Incomplete VPC description: {0}")]
    Incomplete(String),
    #[error("VPC {vpc_id} has subnets in {found} availability zones, {needed} are needed")]
    TooFewAvailabilityZones { vpc_id: String, found: usize, needed: usize },
    #[error("EC2 request failed: {0}")]
    Sdk(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroupRule {
    pub ip_protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_port: Option<u16>,
    pub cidr_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SecurityGroupRule {
    pub fn tcp(port: u16, cidr_ip: &str) -> Self {
        Self {
            ip_protocol: "tcp".to_string(),
            from_port: Some(port),
            to_port: Some(port),
            cidr_ip: cidr_ip.to_string(),
            description: Some(format!("from {cidr_ip}:{port}")),
        }
    }

    /// every protocol, every port.
    pub fn all_traffic(cidr_ip: &str) -> Self {
        Self {
            ip_protocol: "-1".to_string(),
            from_port: None,
            to_port: None,
            cidr_ip: cidr_ip.to_string(),
            description: Some("Allow all outbound traffic by default".to_string()),
        }
    }

    /// whether a tcp connection to `port` is admitted by this rule.
    pub fn admits_tcp(&self, port: u16) -> bool {
        match self.ip_protocol.as_str() {
            "-1" => true,
            "tcp" | "6" => match (self.from_port, self.to_port) {
                (Some(from), Some(to)) => from <= port && port <= to,
                _ => false,
            },
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnSecurityGroup {
    pub group_description: String,
    pub vpc_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_group_ingress: Vec<SecurityGroupRule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_group_egress: Vec<SecurityGroupRule>,
}

impl CfnResource for CfnSecurityGroup {
    fn type_string(&self) -> &'static str {
        "AWS::EC2::SecurityGroup"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.group_description.is_empty() || self.group_description.len() > 255 {
            return Err("Group description must be between 1 and 255 characters".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnVpcEndpoint {
    pub service_name: String,
    pub vpc_id: String,
    pub vpc_endpoint_type: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<StrVal>,
    pub private_dns_enabled: bool,
}

impl CfnResource for CfnVpcEndpoint {
    fn type_string(&self) -> &'static str {
        "AWS::EC2::VPCEndpoint"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.vpc_endpoint_type == "Interface" && self.subnet_ids.is_empty() {
            return Err("Interface endpoints need at least one subnet".to_string());
        }
        Ok(())
    }
}

/// The one reference to a declared endpoint. Anything that needs the
/// endpoint id (policy conditions, interface lookups) takes it from here.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointHandle {
    pub logical_id: String,
}

impl EndpointHandle {
    /// `Ref` of an `AWS::EC2::VPCEndpoint` is the endpoint id (`vpce-...`).
    pub fn id(&self) -> Value {
        get_ref(&self.logical_id)
    }
}

pub struct EndpointInput<'a> {
    /// logical name of the endpoint. Its security group is `{resource_name}SecurityGroup`.
    pub resource_name: String,
    pub region: String,
    /// eg: `s3`
    pub service: String,
    /// port opened to the VPC on the endpoint's security group.
    pub port: u16,
    pub network: &'a NetworkContext,
}

/// Declare an interface endpoint placed in exactly `ENDPOINT_INTERFACE_COUNT`
/// availability zones, so it gets exactly that many network interfaces.
pub fn config(input: EndpointInput, stackinp: &mut aws_cfn_stack::Input) -> Result<EndpointHandle, NetworkError> {
    let EndpointInput { resource_name, region, service, port, network } = input;
    let subnets = network.subnets_in_distinct_azs(ENDPOINT_INTERFACE_COUNT)?;
    let sg_logical_id = format!("{resource_name}SecurityGroup");
    let security_group = CfnSecurityGroup {
        group_description: format!("{resource_name} interface endpoint"),
        vpc_id: network.vpc_id.clone(),
        security_group_ingress: vec![SecurityGroupRule::tcp(port, &network.cidr_block)],
        security_group_egress: vec![SecurityGroupRule::all_traffic("0.0.0.0/0")],
    };
    let endpoint = CfnVpcEndpoint {
        service_name: aws_regions::endpoint_service_name(&region, &service),
        vpc_id: network.vpc_id.clone(),
        vpc_endpoint_type: "Interface".to_string(),
        subnet_ids: subnets.iter().map(|s| s.subnet_id.clone()).collect(),
        security_group_ids: vec![get_att(&sg_logical_id, "GroupId").into()],
        private_dns_enabled: false,
    };
    tracing::debug!(
        endpoint = %resource_name,
        zones = ?subnets.iter().map(|s| s.availability_zone.as_str()).collect::<Vec<_>>(),
        "declaring interface endpoint",
    );
    stackinp.push(Resource::new(sg_logical_id, security_group));
    stackinp.push(Resource::new(resource_name.clone(), endpoint));
    Ok(EndpointHandle { logical_id: resource_name })
}
