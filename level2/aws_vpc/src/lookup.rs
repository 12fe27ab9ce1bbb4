use aws_sdk_ec2::{error::DisplayErrorContext, types::Filter, Client};
use serde::{Deserialize, Serialize};

use crate::NetworkError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetContext {
    pub subnet_id: String,
    pub availability_zone: String,
}

/// What the stack needs to know about an existing VPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub vpc_id: String,
    pub cidr_block: String,
    pub subnets: Vec<SubnetContext>,
}

impl NetworkContext {
    /// one subnet for every availability zone, ordered by zone name.
    /// Within a zone the lowest subnet id wins so repeated lookups agree.
    pub fn one_subnet_per_az(&self) -> Vec<&SubnetContext> {
        let mut sorted: Vec<&SubnetContext> = self.subnets.iter().collect();
        sorted.sort_by(|a, b| {
            a.availability_zone.cmp(&b.availability_zone).then(a.subnet_id.cmp(&b.subnet_id))
        });
        sorted.dedup_by(|b, a| a.availability_zone == b.availability_zone);
        sorted
    }

    /// exactly `count` subnets in distinct availability zones.
    pub fn subnets_in_distinct_azs(&self, count: usize) -> Result<Vec<&SubnetContext>, NetworkError> {
        let mut subnets = self.one_subnet_per_az();
        if subnets.len() < count {
            return Err(NetworkError::TooFewAvailabilityZones {
                vpc_id: self.vpc_id.clone(),
                found: subnets.len(),
                needed: count,
            });
        }
        subnets.truncate(count);
        Ok(subnets)
    }
}

/// Which VPC to look up.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkQuery {
    /// the account's default VPC in the client's region.
    Default,
    ById(String),
}

fn sdk_err<E: std::error::Error>(e: E) -> NetworkError {
    NetworkError::Sdk(DisplayErrorContext(e).to_string())
}

pub async fn lookup_vpc(client: &Client, query: &NetworkQuery) -> Result<NetworkContext, NetworkError> {
    let request = match query {
        NetworkQuery::Default => client.describe_vpcs()
            .filters(Filter::builder().name("is-default").values("true").build()),
        NetworkQuery::ById(id) => client.describe_vpcs().vpc_ids(id),
    };
    let resp = request.send().await.map_err(sdk_err)?;
    let vpc = resp.vpcs().first().ok_or_else(|| NetworkError::VpcNotFound(format!("{:?}", query)))?;
    let vpc_id = vpc.vpc_id()
        .ok_or_else(|| NetworkError::Incomplete("VPC without an id".to_string()))?
        .to_string();
    let cidr_block = vpc.cidr_block()
        .ok_or_else(|| NetworkError::Incomplete(format!("VPC {vpc_id} without a CIDR block")))?
        .to_string();

    let mut subnets = vec![];
    let mut next_token: Option<String> = None;
    loop {
        let resp = client.describe_subnets()
            .filters(Filter::builder().name("vpc-id").values(&vpc_id).build())
            .set_next_token(next_token.take())
            .send()
            .await
            .map_err(sdk_err)?;
        for subnet in resp.subnets() {
            match (subnet.subnet_id(), subnet.availability_zone()) {
                (Some(subnet_id), Some(az)) => subnets.push(SubnetContext {
                    subnet_id: subnet_id.to_string(),
                    availability_zone: az.to_string(),
                }),
                _ => tracing::warn!(vpc_id = %vpc_id, "skipping subnet without id or availability zone"),
            }
        }
        next_token = resp.next_token().map(|t| t.to_string());
        if next_token.is_none() {
            break;
        }
    }
    tracing::info!(vpc_id = %vpc_id, subnets = subnets.len(), "looked up vpc");
    Ok(NetworkContext { vpc_id, cidr_block, subnets })
}

pub async fn lookup_default_vpc(client: &Client) -> Result<NetworkContext, NetworkError> {
    lookup_vpc(client, &NetworkQuery::Default).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet(id: &str, az: &str) -> SubnetContext {
        SubnetContext { subnet_id: id.into(), availability_zone: az.into() }
    }

    fn network() -> NetworkContext {
        NetworkContext {
            vpc_id: "vpc-1".into(),
            cidr_block: "172.31.0.0/16".into(),
            subnets: vec![
                subnet("subnet-c", "us-east-1c"),
                subnet("subnet-b2", "us-east-1b"),
                subnet("subnet-a", "us-east-1a"),
                subnet("subnet-b1", "us-east-1b"),
            ],
        }
    }

    #[test]
    fn picks_one_subnet_per_zone_in_zone_order() {
        let net = network();
        let ids: Vec<&str> = net.one_subnet_per_az().iter().map(|s| s.subnet_id.as_str()).collect();
        assert_eq!(ids, vec!["subnet-a", "subnet-b1", "subnet-c"]);
    }

    #[test]
    fn distinct_zone_selection_is_exact() {
        let net = network();
        let picked = net.subnets_in_distinct_azs(2).unwrap();
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0].availability_zone, picked[1].availability_zone);

        match net.subnets_in_distinct_azs(4) {
            Err(NetworkError::TooFewAvailabilityZones { found, needed, .. }) => {
                assert_eq!((found, needed), (3, 4));
            }
            other => panic!("expected too few zones, got {:?}", other),
        }
    }
}
