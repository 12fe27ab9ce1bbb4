use aws_cfn_stack::{to_properties, CfnResource, Resource, StrVal};
use aws_sdk_route53::{error::DisplayErrorContext, types::HostedZone, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("No hosted zone named {0}")]
    ZoneNotFound(String),
    #[error("Route53 request failed: {0}")]
    Sdk(String),
}

/// What the stack needs to know about an existing hosted zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedZoneContext {
    /// bare id, without the `/hostedzone/` prefix.
    pub id: String,
    /// zone name without the trailing dot.
    pub name: String,
}

pub fn normalize_domain(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

fn bare_zone_id(id: &str) -> String {
    id.trim_start_matches("/hostedzone/").to_string()
}

/// pick the zone named exactly `domain`, public zones first.
fn select_zone(domain: &str, zones: &[(String, String, bool)]) -> Option<HostedZoneContext> {
    let wanted = normalize_domain(domain);
    let mut matching: Vec<&(String, String, bool)> = zones.iter()
        .filter(|(_, name, _)| normalize_domain(name) == wanted)
        .collect();
    matching.sort_by_key(|(_, _, private)| *private);
    matching.first().map(|(id, _, _)| HostedZoneContext { id: bare_zone_id(id), name: wanted.clone() })
}

fn zone_summary(zone: &HostedZone) -> Option<(String, String, bool)> {
    let id: Option<&str> = zone.id().into();
    let name: Option<&str> = zone.name().into();
    let private: Option<bool> = zone.config().map(|c| c.private_zone()).and_then(|p| p.into());
    Some((id?.to_string(), name?.to_string(), private.unwrap_or(false)))
}

pub async fn lookup_hosted_zone(client: &Client, domain: &str) -> Result<HostedZoneContext, LookupError> {
    // zones come back sorted by name starting at `dns_name`,
    // so every exact match is on the first page
    let resp = client.list_hosted_zones_by_name()
        .dns_name(domain)
        .send()
        .await
        .map_err(|e| LookupError::Sdk(DisplayErrorContext(e).to_string()))?;
    let zones: Vec<(String, String, bool)> = resp.hosted_zones().iter().filter_map(zone_summary).collect();
    let zone = select_zone(domain, &zones).ok_or_else(|| LookupError::ZoneNotFound(domain.to_string()))?;
    tracing::info!(zone_id = %zone.id, name = %zone.name, "looked up hosted zone");
    Ok(zone)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnRecordSet {
    pub hosted_zone_id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub record_type: String,
    #[serde(rename = "TTL")]
    pub ttl: String,
    pub resource_records: Vec<StrVal>,
}

impl CfnResource for CfnRecordSet {
    fn type_string(&self) -> &'static str {
        "AWS::Route53::RecordSet"
    }
    fn properties(&self) -> Value {
        to_properties(self)
    }
    fn validate(&self) -> Result<(), String> {
        if self.ttl.parse::<u32>().is_err() {
            return Err(format!("TTL must be a number of seconds, got {:?}", self.ttl));
        }
        if self.record_type == "CNAME" && self.resource_records.len() != 1 {
            return Err(format!("A CNAME record has exactly one value, got {}", self.resource_records.len()));
        }
        if self.name.is_empty() || self.hosted_zone_id.is_empty() {
            return Err("Record name and hosted zone id are required".to_string());
        }
        Ok(())
    }
}

pub struct Input<'a> {
    pub resource_name: String,
    pub zone: &'a HostedZoneContext,
    /// first label(s) of the record, eg: `site1` for `site1.<zone>`.
    pub subdomain: String,
    /// literal or intrinsic target, eg: a load balancer's `DNSName`.
    pub target: Value,
    pub ttl: u32,
}

/// Declare `<subdomain>.<zone>` as a CNAME to `target`. Returns the record name.
pub fn cname(input: Input, stackinp: &mut aws_cfn_stack::Input) -> String {
    let Input { resource_name, zone, subdomain, target, ttl } = input;
    let name = format!("{subdomain}.{}", zone.name);
    let record = CfnRecordSet {
        hosted_zone_id: zone.id.clone(),
        name: name.clone(),
        record_type: "CNAME".to_string(),
        ttl: ttl.to_string(),
        resource_records: vec![target.into()],
    };
    stackinp.push(Resource::new(resource_name, record));
    name
}
