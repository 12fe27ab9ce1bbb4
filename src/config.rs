use aws_cfn_stack::Environment;

pub const ACCOUNT_ID_VAR: &str = "ACCOUNT_ID";
pub const REGION_VAR: &str = "AWS_REGION";
pub const DOMAIN_VAR: &str = "DOMAIN_NAME";
pub const REFRESH_CONTEXT_VAR: &str = "SITE_ROUTER_REFRESH_CONTEXT";

pub const USAGE: &str = "ACCOUNT_ID, AWS_REGION and DOMAIN_NAME must all be set, eg:\n  ACCOUNT_ID=123456789012 AWS_REGION=us-east-1 DOMAIN_NAME=example.com site_router deploy";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variables: {}\n{}", .0.join(", "), USAGE)]
    Missing(Vec<&'static str>),
    #[error("Invalid ACCOUNT_ID {0:?}\nMust be 12 digits")]
    InvalidAccount(String),
    #[error("{0}")]
    InvalidRegion(String),
    #[error("Invalid DOMAIN_NAME {name:?}\n{reason}")]
    InvalidDomain { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub account_id: String,
    pub region: String,
    /// lowercase, without a trailing dot.
    pub domain_name: String,
    /// ignore cached lookups and query the account again.
    pub refresh_context: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any variable source. Unset and empty values are
    /// both missing, and every missing name is reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let (account_id, region, domain_name) = (get(ACCOUNT_ID_VAR), get(REGION_VAR), get(DOMAIN_VAR));
        let (account_id, region, domain_name) = match (account_id, region, domain_name) {
            (Some(a), Some(r), Some(d)) => (a, r, d),
            (a, r, d) => {
                let missing = [(ACCOUNT_ID_VAR, a.is_none()), (REGION_VAR, r.is_none()), (DOMAIN_VAR, d.is_none())]
                    .into_iter()
                    .filter(|(_, missing)| *missing)
                    .map(|(name, _)| name)
                    .collect();
                return Err(ConfigError::Missing(missing));
            }
        };
        if account_id.len() != 12 || !account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidAccount(account_id));
        }
        if let Some(reason) = aws_regions::verify_region(&region) {
            return Err(ConfigError::InvalidRegion(reason));
        }
        let domain_name = domain_name.trim_end_matches('.').to_ascii_lowercase();
        if let Err(reason) = verify_domain_name(&domain_name) {
            return Err(ConfigError::InvalidDomain { name: domain_name, reason });
        }
        let refresh_context = matches!(lookup(REFRESH_CONTEXT_VAR).as_deref(), Some("1") | Some("true"));
        Ok(Self { account_id, region, domain_name, refresh_context })
    }

    pub fn environment(&self) -> Environment {
        Environment { account: self.account_id.clone(), region: self.region.clone() }
    }
}

/// at least two labels of 1-63 letters, digits and hyphens, 253 characters overall.
pub fn verify_domain_name(name: &str) -> Result<(), String> {
    if name.len() > 253 {
        return Err("Must be at most 253 characters".to_string());
    }
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return Err("Must have at least two labels, eg: example.com".to_string());
    }
    for label in labels {
        if label.is_empty() || label.len() > 63 {
            return Err(format!("Label {:?} must be between 1 and 63 characters", label));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("Label {:?} may only contain letters, digits and hyphens", label));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("Label {:?} may not begin or end with a hyphen", label));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_all_three() {
        let config = Config::from_lookup(lookup(&[
            ("ACCOUNT_ID", "123456789012"),
            ("AWS_REGION", "eu-west-1"),
            ("DOMAIN_NAME", "Example.com."),
        ])).unwrap();
        assert_eq!(config.domain_name, "example.com");
        assert_eq!(config.environment().to_string(), "aws://123456789012/eu-west-1");
        assert!(!config.refresh_context);
    }

    #[test]
    fn missing_and_empty_are_reported_together() {
        let err = Config::from_lookup(lookup(&[("AWS_REGION", "eu-west-1"), ("DOMAIN_NAME", "")])).unwrap_err();
        match &err {
            ConfigError::Missing(names) => assert_eq!(names, &vec!["ACCOUNT_ID", "DOMAIN_NAME"]),
            other => panic!("expected missing, got {other:?}"),
        }
        let message = err.to_string();
        for name in ["ACCOUNT_ID", "AWS_REGION", "DOMAIN_NAME"] {
            assert!(message.contains(name), "{message}");
        }
    }

    #[test]
    fn rejects_bad_values() {
        let base = [("ACCOUNT_ID", "123456789012"), ("AWS_REGION", "us-east-1"), ("DOMAIN_NAME", "example.com")];
        let with = |key: &'static str, value: &'static str| {
            let mut vars = base.to_vec();
            vars.retain(|(k, _)| *k != key);
            vars.push((key, value));
            Config::from_lookup(lookup(&vars))
        };
        assert!(matches!(with("ACCOUNT_ID", "1234"), Err(ConfigError::InvalidAccount(_))));
        assert!(matches!(with("AWS_REGION", "mars-north-1"), Err(ConfigError::InvalidRegion(_))));
        assert!(matches!(with("DOMAIN_NAME", "localhost"), Err(ConfigError::InvalidDomain { .. })));
        assert!(matches!(with("DOMAIN_NAME", "bad_label.com"), Err(ConfigError::InvalidDomain { .. })));
    }

    #[test]
    fn refresh_flag() {
        let config = Config::from_lookup(lookup(&[
            ("ACCOUNT_ID", "123456789012"),
            ("AWS_REGION", "us-east-1"),
            ("DOMAIN_NAME", "example.com"),
            ("SITE_ROUTER_REFRESH_CONTEXT", "1"),
        ])).unwrap();
        assert!(config.refresh_context);
    }
}
