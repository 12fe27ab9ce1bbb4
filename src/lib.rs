//! Synthesizes and deploys `RouterStack`: a public application load balancer
//! that serves `site1.<domain>` from a private S3 bucket, reached through an
//! S3 interface endpoint in the account's default VPC.

pub mod assembly;
pub mod config;
pub mod context;
pub mod deploy;
pub mod error;
pub mod router_stack;

pub use config::{Config, ConfigError};
pub use error::RouterError;
