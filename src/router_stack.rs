//! The `RouterStack` template: a private S3 interface endpoint whose
//! addresses back a public load balancer, which answers `site1.<domain>`
//! from the site bucket and everything else with a 404.

use aws_cfn_stack::{get_ref, synthesize, SavedStack};
use aws_elb::{ListenerAction, TargetGroupInput};
use aws_s3::Outputs as BucketOutputs;
use aws_sdk_call::SdkCallProvider;
use aws_vpc::{EndpointHandle, EndpointInput, InterfaceAddresses, InterfaceIds};

use crate::{config::Config, context::Lookups, error::RouterError};

pub const STACK_NAME: &str = "RouterStack";
pub const SITE_SUBDOMAIN: &str = "site1";
pub const INDEX_DOCUMENT: &str = "index.html";
pub const HTTP_PORT: u16 = 80;
pub const TARGET_GROUP_NAME: &str = "S3Endpoints";
pub const HEALTH_CHECK_PATH: &str = "/";
pub const HEALTH_CHECK_INTERVAL_SECONDS: u32 = 300;
/// S3 answers `/` through an endpoint with 307 or 405 depending on the request.
pub const HEALTHY_HTTP_CODES: &str = "200,307,405";
pub const RULE_PRIORITY: u32 = 1;
pub const RECORD_TTL: u32 = 1800;

pub const ENDPOINT_ID: &str = "S3VpcEndpoint";
pub const SDK_CALL_PROVIDER_ID: &str = "AwsSdkCallProvider";
pub const INTERFACE_IDS_ID: &str = "VpcEndpointInterfaces";
pub const INTERFACE_ADDRESSES_ID: &str = "VpcEndpointAddresses";
pub const BUCKET_ID: &str = "SiteBucket";
pub const TARGET_GROUP_ID: &str = "S3EndpointTargets";
pub const LOAD_BALANCER_ID: &str = "PublicLoadBalancer";
pub const RULE_ID: &str = "SiteHostRule";
pub const RECORD_ID: &str = "SiteRecord";

pub const OUTPUT_DNS_NAME: &str = "LoadBalancerDnsName";
pub const OUTPUT_SITE_URL: &str = "SiteUrl";
pub const OUTPUT_BUCKET_NAME: &str = "BucketName";
pub const OUTPUT_ENDPOINT_ID: &str = "VpcEndpointId";

/// `site1.<domain>`: the bucket name, routed host and record name.
pub fn site_host(config: &Config) -> String {
    format!("{SITE_SUBDOMAIN}.{}", config.domain_name)
}

fn declare_endpoint(config: &Config, lookups: &Lookups, stack: &mut aws_cfn_stack::Input) -> Result<EndpointHandle, RouterError> {
    Ok(aws_vpc::config(EndpointInput {
        resource_name: ENDPOINT_ID.to_string(),
        region: config.region.clone(),
        service: "s3".to_string(),
        port: HTTP_PORT,
        network: &lookups.network,
    }, stack)?)
}

fn resolve_interfaces(endpoint: &EndpointHandle, stack: &mut aws_cfn_stack::Input) -> InterfaceAddresses {
    let mut provider = SdkCallProvider::new(SDK_CALL_PROVIDER_ID);
    let ids = InterfaceIds::resolve(endpoint, &mut provider, INTERFACE_IDS_ID);
    let addresses = ids.resolve_addresses(&mut provider, INTERFACE_ADDRESSES_ID);
    provider.config(stack);
    addresses
}

fn declare_bucket(host: &str, endpoint: &EndpointHandle, stack: &mut aws_cfn_stack::Input) -> BucketOutputs {
    let mut input = aws_s3::Input::new(BUCKET_ID, host);
    input.website_index_document = Some(INDEX_DOCUMENT.to_string());
    let bucket = aws_s3::config(input, stack);
    aws_s3::restrict_to_endpoint(&bucket, endpoint, stack);
    bucket
}

fn declare_routing(
    host: &str,
    lookups: &Lookups,
    addresses: &InterfaceAddresses,
    stack: &mut aws_cfn_stack::Input,
) -> aws_elb::Outputs {
    let mut targets = TargetGroupInput::ip_targets(
        TARGET_GROUP_ID,
        TARGET_GROUP_NAME,
        &lookups.network.vpc_id,
        addresses.addresses.clone(),
    );
    targets.port = HTTP_PORT;
    targets.health_check_path = HEALTH_CHECK_PATH.to_string();
    targets.health_check_interval_seconds = HEALTH_CHECK_INTERVAL_SECONDS;
    targets.healthy_http_codes = HEALTHY_HTTP_CODES.to_string();
    let target_group = aws_elb::target_group(targets, stack);

    let alb = aws_elb::config(aws_elb::Input {
        resource_name: LOAD_BALANCER_ID.to_string(),
        network: &lookups.network,
        port: HTTP_PORT,
        default_action: ListenerAction::not_found(),
    }, stack);
    aws_elb::host_rule(RULE_ID, &alb, RULE_PRIORITY, &[host], &target_group, stack);
    alb
}

fn declare_record(lookups: &Lookups, alb: &aws_elb::Outputs, stack: &mut aws_cfn_stack::Input) -> String {
    aws_route53::cname(aws_route53::Input {
        resource_name: RECORD_ID.to_string(),
        zone: &lookups.zone,
        subdomain: SITE_SUBDOMAIN.to_string(),
        target: alb.dns_name(),
        ttl: RECORD_TTL,
    }, stack)
}

/// Build the stack from config and looked-up account context.
/// Pure: no AWS calls, no file writes.
pub fn synth(config: &Config, lookups: &Lookups) -> Result<SavedStack, RouterError> {
    let host = site_host(config);
    let mut stack = aws_cfn_stack::Input::new(STACK_NAME, config.environment());
    stack.description = format!("Routes http://{host} through a public load balancer to a private S3 endpoint");

    let endpoint = declare_endpoint(config, lookups, &mut stack)?;
    let addresses = resolve_interfaces(&endpoint, &mut stack);
    let bucket = declare_bucket(&host, &endpoint, &mut stack);
    let alb = declare_routing(&host, lookups, &addresses, &mut stack);
    let record_name = declare_record(lookups, &alb, &mut stack);

    stack.add_output(OUTPUT_DNS_NAME, "public DNS name of the load balancer", alb.dns_name());
    stack.add_output(OUTPUT_SITE_URL, "url of the routed site", serde_json::Value::String(format!("http://{record_name}")));
    stack.add_output(OUTPUT_BUCKET_NAME, "bucket holding the site content", bucket.bucket_ref());
    stack.add_output(OUTPUT_ENDPOINT_ID, "id of the S3 interface endpoint", get_ref(&endpoint.logical_id));

    let stack = synthesize(stack)?;
    tracing::info!(stack = %stack.name, env = %stack.environment, resources = stack.template.resources.len(), "synthesized");
    Ok(stack)
}
