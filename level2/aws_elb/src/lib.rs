//! Application load balancer building blocks: a public load balancer with its
//! security group, a listener with a default action, host based rules and
//! ip target groups.

use aws_cfn_stack::{get_att, get_ref, to_properties, CfnResource, Resource, StrVal};
use aws_vpc::{NetworkContext, SecurityGroupRule};
use serde::Serialize;
use serde_json::Value;

pub mod routing;

pub use aws_vpc::CfnSecurityGroup;
pub use routing::{code_matches, HostHeaderConfig, ListenerAction, RuleCondition};

pub const MAX_TARGET_GROUP_NAME_LEN: usize = 32;
pub const MAX_RULE_PRIORITY: u32 = 50000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnLoadBalancer {
    pub scheme: String,
    #[serde(rename = "Type")]
    pub lb_type: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<StrVal>,
}

impl CfnResource for CfnLoadBalancer {
    fn type_string(&self) -> &'static str {
        "AWS::ElasticLoadBalancingV2::LoadBalancer"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.lb_type == "application" && self.subnets.len() < 2 {
            return Err(format!("An application load balancer needs subnets in at least 2 availability zones, got {}", self.subnets.len()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Matcher {
    pub http_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetDescription {
    pub id: StrVal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnTargetGroup {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub target_type: String,
    pub vpc_id: String,
    pub health_check_enabled: bool,
    pub health_check_protocol: String,
    pub health_check_path: String,
    pub health_check_interval_seconds: u32,
    pub matcher: Matcher,
    pub targets: Vec<TargetDescription>,
}

impl CfnTargetGroup {
    /// whether a health check answered with `code` counts as healthy.
    pub fn is_healthy(&self, code: u16) -> bool {
        code_matches(&self.matcher.http_code, code)
    }
}

pub fn verify_target_group_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_TARGET_GROUP_NAME_LEN {
        return Err(format!("Invalid target group name {:?}\nMust be between 1 and 32 characters", name));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(format!("Invalid target group name {:?}\nMay only contain alphanumeric characters and hyphens", name));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(format!("Invalid target group name {:?}\nMay not begin or end with a hyphen", name));
    }
    Ok(())
}

impl CfnResource for CfnTargetGroup {
    fn type_string(&self) -> &'static str {
        "AWS::ElasticLoadBalancingV2::TargetGroup"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        verify_target_group_name(&self.name)?;
        if !(5..=300).contains(&self.health_check_interval_seconds) {
            return Err(format!("Health check interval must be between 5 and 300 seconds, got {}", self.health_check_interval_seconds));
        }
        if !self.health_check_path.starts_with('/') {
            return Err(format!("Health check path {:?} must start with /", self.health_check_path));
        }
        if self.matcher.http_code.split(',').any(|c| c.trim().is_empty()) {
            return Err(format!("Invalid matcher {:?}", self.matcher.http_code));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnListener {
    pub load_balancer_arn: Value,
    pub port: u16,
    pub protocol: String,
    pub default_actions: Vec<ListenerAction>,
}

impl CfnListener {
    /// the action the listener takes for a request to `host`: the first
    /// action of the lowest priority matching rule, otherwise the default.
    pub fn dispatch<'a>(&'a self, rules: &'a [CfnListenerRule], host: &str) -> Option<&'a ListenerAction> {
        let mut sorted: Vec<&CfnListenerRule> = rules.iter().collect();
        sorted.sort_by_key(|r| r.priority);
        sorted.into_iter()
            .find(|r| r.matches(host))
            .and_then(|r| r.actions.first())
            .or_else(|| self.default_actions.first())
    }
}

impl CfnResource for CfnListener {
    fn type_string(&self) -> &'static str {
        "AWS::ElasticLoadBalancingV2::Listener"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.default_actions.is_empty() {
            return Err("A listener needs a default action".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnListenerRule {
    pub listener_arn: Value,
    pub priority: u32,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<ListenerAction>,
}

impl CfnListenerRule {
    /// every condition must match.
    pub fn matches(&self, host: &str) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(host))
    }
}

impl CfnResource for CfnListenerRule {
    fn type_string(&self) -> &'static str {
        "AWS::ElasticLoadBalancingV2::ListenerRule"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if !(1..=MAX_RULE_PRIORITY).contains(&self.priority) {
            return Err(format!("Rule priority must be between 1 and 50000, got {}", self.priority));
        }
        if self.conditions.is_empty() || self.actions.is_empty() {
            return Err("A listener rule needs at least one condition and one action".to_string());
        }
        Ok(())
    }
}

pub struct TargetGroupInput {
    pub resource_name: String,
    /// physical name, shows up in the console.
    pub name: String,
    pub vpc_id: String,
    pub port: u16,
    /// ip addresses, literal or intrinsic.
    pub targets: Vec<Value>,
    pub health_check_path: String,
    pub health_check_interval_seconds: u32,
    pub healthy_http_codes: String,
}

impl TargetGroupInput {
    pub fn ip_targets(resource_name: &str, name: &str, vpc_id: &str, targets: Vec<Value>) -> Self {
        Self {
            resource_name: resource_name.to_string(),
            name: name.to_string(),
            vpc_id: vpc_id.to_string(),
            port: 80,
            targets,
            health_check_path: "/".to_string(),
            health_check_interval_seconds: 30,
            healthy_http_codes: "200".to_string(),
        }
    }
}

/// Declare an HTTP target group of ip targets. Returns its logical id.
pub fn target_group(input: TargetGroupInput, stackinp: &mut aws_cfn_stack::Input) -> String {
    let TargetGroupInput {
        resource_name, name, vpc_id, port, targets,
        health_check_path, health_check_interval_seconds, healthy_http_codes,
    } = input;
    let group = CfnTargetGroup {
        name,
        port,
        protocol: "HTTP".to_string(),
        target_type: "ip".to_string(),
        vpc_id,
        health_check_enabled: true,
        health_check_protocol: "HTTP".to_string(),
        health_check_path,
        health_check_interval_seconds,
        matcher: Matcher { http_code: healthy_http_codes },
        targets: targets.into_iter().map(|ip| TargetDescription { id: ip.into(), port: Some(port) }).collect(),
    };
    stackinp.push(Resource::new(resource_name.clone(), group));
    resource_name
}

pub struct Input<'a> {
    /// logical name of the load balancer. The security group and listener are
    /// named `{resource_name}SecurityGroup` and `{resource_name}Listener`.
    pub resource_name: String,
    pub network: &'a NetworkContext,
    pub port: u16,
    /// what the listener does when no rule matches.
    pub default_action: ListenerAction,
}

pub struct Outputs {
    pub load_balancer_logical_id: String,
    pub security_group_logical_id: String,
    pub listener_logical_id: String,
}

impl Outputs {
    pub fn dns_name(&self) -> Value {
        get_att(&self.load_balancer_logical_id, "DNSName")
    }
}

/// Declare an internet facing application load balancer in every
/// availability zone of the network, reachable on `port` from anywhere.
pub fn config(input: Input, stackinp: &mut aws_cfn_stack::Input) -> Outputs {
    let Input { resource_name, network, port, default_action } = input;
    let sg_logical_id = format!("{resource_name}SecurityGroup");
    let listener_logical_id = format!("{resource_name}Listener");

    let security_group = CfnSecurityGroup {
        group_description: format!("{resource_name} public access"),
        vpc_id: network.vpc_id.clone(),
        security_group_ingress: vec![SecurityGroupRule::tcp(port, "0.0.0.0/0")],
        security_group_egress: vec![SecurityGroupRule::all_traffic("0.0.0.0/0")],
    };
    let load_balancer = CfnLoadBalancer {
        scheme: "internet-facing".to_string(),
        lb_type: "application".to_string(),
        subnets: network.one_subnet_per_az().iter().map(|s| s.subnet_id.clone()).collect(),
        security_groups: vec![get_att(&sg_logical_id, "GroupId").into()],
    };
    let listener = CfnListener {
        load_balancer_arn: get_ref(&resource_name),
        port,
        protocol: "HTTP".to_string(),
        default_actions: vec![default_action],
    };
    tracing::debug!(load_balancer = %resource_name, zones = load_balancer.subnets.len(), "declaring load balancer");
    stackinp.push(Resource::new(sg_logical_id.clone(), security_group));
    stackinp.push(Resource::new(resource_name.clone(), load_balancer));
    stackinp.push(Resource::new(listener_logical_id.clone(), listener));
    Outputs {
        load_balancer_logical_id: resource_name,
        security_group_logical_id: sg_logical_id,
        listener_logical_id,
    }
}

/// Forward requests whose host header is one of `hosts` to `target_group_logical_id`.
pub fn host_rule(
    resource_name: &str,
    outputs: &Outputs,
    priority: u32,
    hosts: &[&str],
    target_group_logical_id: &str,
    stackinp: &mut aws_cfn_stack::Input,
) -> String {
    let rule = CfnListenerRule {
        listener_arn: get_ref(&outputs.listener_logical_id),
        priority,
        conditions: vec![RuleCondition::host_header(hosts)],
        actions: vec![ListenerAction::forward(get_ref(target_group_logical_id))],
    };
    stackinp.push(Resource::new(resource_name, rule));
    resource_name.to_string()
}
