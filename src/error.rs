use std::path::PathBuf;

use aws_cfn_stack::StackError;
use aws_route53::LookupError;
use aws_s3::SyncError;
use aws_vpc::NetworkError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("Failed to sync site content\n{0}")]
    Sync(#[from] SyncError),
    #[error("Failed to write {path:?}\n{source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("Invalid lookup cache {path:?}\n{reason}")]
    Context { path: PathBuf, reason: String },
    #[error("Stack output {0} is missing")]
    MissingOutput(String),
}
