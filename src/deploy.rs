use std::collections::HashMap;
use std::path::{Path, PathBuf};

use aws_cfn_stack::SavedStack;
use aws_s3::{S3ObjectStore, SyncReport};

use crate::{
    assembly::{write_assembly, OUT_DIR},
    config::Config,
    context::{default_cache_path, resolve_context, AwsContextProvider, ContextProvider},
    error::RouterError,
    router_stack::{self, OUTPUT_BUCKET_NAME, STACK_NAME},
};

/// local directory mirrored into the site bucket on every deploy.
pub const SITE_DIR: &str = "site";

pub async fn load_sdk_config(config: &Config) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_sdk_cloudformation::config::Region::new(config.region.clone()))
        .load()
        .await
}

/// Look up (or reuse) account context, synthesize, and write `router.out/`.
pub async fn synth_to_disk(
    config: &Config,
    provider: &dyn ContextProvider,
    cache_path: &Path,
    out_dir: &Path,
) -> Result<(SavedStack, PathBuf), RouterError> {
    let lookups = resolve_context(provider, config, cache_path).await?;
    let stack = router_stack::synth(config, &lookups)?;
    let template = write_assembly(out_dir, &stack)?;
    Ok((stack, template))
}

pub async fn synth(config: &Config, sdk_config: &aws_config::SdkConfig) -> Result<(), RouterError> {
    let provider = AwsContextProvider::new(sdk_config);
    let (stack, template) = synth_to_disk(config, &provider, &default_cache_path(), Path::new(OUT_DIR)).await?;
    println!("Synthesized {} ({}) to {}", stack.name, stack.environment, template.display());
    Ok(())
}

fn print_outputs(outputs: &HashMap<String, String>) {
    let mut sorted: Vec<(&String, &String)> = outputs.iter().collect();
    sorted.sort();
    println!("Outputs:");
    for (key, value) in sorted {
        println!("  {key} = {value}");
    }
}

/// Synthesize, deploy the stack, then mirror `./site` into the bucket.
pub async fn deploy(config: &Config, sdk_config: &aws_config::SdkConfig) -> Result<SyncReport, RouterError> {
    let provider = AwsContextProvider::new(sdk_config);
    let (stack, _) = synth_to_disk(config, &provider, &default_cache_path(), Path::new(OUT_DIR)).await?;

    let cfn = aws_sdk_cloudformation::Client::new(sdk_config);
    let outputs = aws_cfn_stack::deploy::deploy_stack(&cfn, &stack).await?;
    print_outputs(&outputs);

    let bucket = outputs.get(OUTPUT_BUCKET_NAME)
        .ok_or_else(|| RouterError::MissingOutput(OUTPUT_BUCKET_NAME.to_string()))?;
    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(sdk_config), bucket);
    let report = aws_s3::sync_directory(&store, Path::new(SITE_DIR)).await?;
    println!("Uploaded {} files to {bucket}, removed {}", report.uploaded.len(), report.deleted.len());
    Ok(report)
}

pub async fn destroy(sdk_config: &aws_config::SdkConfig) -> Result<(), RouterError> {
    let cfn = aws_sdk_cloudformation::Client::new(sdk_config);
    aws_cfn_stack::deploy::destroy_stack(&cfn, STACK_NAME).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{
        tests::{config, lookups},
        ContextProvider,
    };
    use async_trait::async_trait;
    use aws_route53::HostedZoneContext;
    use aws_vpc::NetworkContext;

    struct FixedProvider;

    #[async_trait]
    impl ContextProvider for FixedProvider {
        async fn network(&self, _config: &Config) -> Result<NetworkContext, RouterError> {
            Ok(lookups().network)
        }
        async fn hosted_zone(&self, _config: &Config) -> Result<HostedZoneContext, RouterError> {
            Ok(lookups().zone)
        }
    }

    struct NoZoneProvider;

    #[async_trait]
    impl ContextProvider for NoZoneProvider {
        async fn network(&self, _config: &Config) -> Result<NetworkContext, RouterError> {
            Ok(lookups().network)
        }
        async fn hosted_zone(&self, config: &Config) -> Result<HostedZoneContext, RouterError> {
            Err(aws_route53::LookupError::ZoneNotFound(config.domain_name.clone()).into())
        }
    }

    #[tokio::test]
    async fn synth_writes_assembly_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("router.context.json");
        let out = dir.path().join(OUT_DIR);
        let (stack, template) = synth_to_disk(&config(), &FixedProvider, &cache, &out).await.unwrap();
        assert_eq!(stack.name, STACK_NAME);
        assert!(template.exists());
        assert!(out.join("manifest.json").exists());
        assert!(cache.exists());
    }

    #[tokio::test]
    async fn missing_zone_aborts_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("router.context.json");
        let out = dir.path().join(OUT_DIR);
        let err = synth_to_disk(&config(), &NoZoneProvider, &cache, &out).await.unwrap_err();
        assert!(matches!(err, RouterError::Lookup(aws_route53::LookupError::ZoneNotFound(_))));
        assert!(!out.exists());
    }
}
