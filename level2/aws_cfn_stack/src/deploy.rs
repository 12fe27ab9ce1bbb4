use std::{collections::HashMap, io::Write, time::Duration};

use aws_sdk_cloudformation::{
    error::{DisplayErrorContext, ProvideErrorMetadata},
    types::{Capability, OnFailure, Stack, StackStatus},
    Client,
};

use crate::{SavedStack, StackError};

const POLL_INTERVAL: Duration = Duration::from_millis(2000);

fn sdk_err<E: std::error::Error>(e: E) -> StackError {
    StackError::Sdk(DisplayErrorContext(e).to_string())
}

fn is_missing_stack<E: ProvideErrorMetadata>(e: &E) -> bool {
    e.message().map(|m| m.contains("does not exist")).unwrap_or(false)
}

/// Create or update the stack, wait for it to settle, and return its outputs.
pub async fn deploy_stack(client: &Client, stack: &SavedStack) -> Result<HashMap<String, String>, StackError> {
    let template_body = stack.template_body()?;
    tracing::info!(
        stack = %stack.name,
        environment = %stack.environment,
        resources = stack.template.resources.len(),
        "about to deploy stack",
    );
    let changed = create_or_update_stack(client, &stack.name, &template_body).await?;
    if !changed {
        tracing::info!(stack = %stack.name, "no updates are to be performed");
    }
    wait_for_output(client, &stack.name).await
}

pub async fn does_stack_exist(client: &Client, name: &str) -> Result<bool, StackError> {
    match client.describe_stacks().stack_name(name).send().await {
        Ok(resp) => {
            // a stack that finished deleting is still described, but by id only
            let live = resp.stacks().iter().any(|s| {
                let status: Option<&StackStatus> = s.stack_status().into();
                !matches!(status, Some(StackStatus::DeleteComplete))
            });
            Ok(live)
        }
        Err(e) if is_missing_stack(&e) => Ok(false),
        Err(e) => Err(sdk_err(e)),
    }
}

/// `Ok(Some)` once the stack reached a stable state, `Ok(None)` while in progress.
pub async fn describe_stack(client: &Client, name: &str) -> Result<Option<Stack>, StackError> {
    let resp = client.describe_stacks().stack_name(name).send().await.map_err(sdk_err)?;
    let first = resp.stacks().first().ok_or_else(|| StackError::StackNotFound(name.to_string()))?;
    let status: Option<&StackStatus> = first.stack_status().into();
    let status = status.ok_or_else(|| StackError::StackNotFound(name.to_string()))?;
    match status {
        // done and return success:
        StackStatus::CreateComplete |
        StackStatus::UpdateComplete |
        StackStatus::ImportComplete => Ok(Some(first.clone())),

        // keep trying
        StackStatus::CreateInProgress |
        StackStatus::DeleteInProgress |
        StackStatus::ImportInProgress |
        StackStatus::ImportRollbackInProgress |
        StackStatus::ReviewInProgress |
        StackStatus::RollbackInProgress |
        StackStatus::UpdateCompleteCleanupInProgress |
        StackStatus::UpdateInProgress |
        StackStatus::UpdateRollbackCompleteCleanupInProgress |
        StackStatus::UpdateRollbackInProgress => Ok(None),

        // rolled back updates leave the previous version live, but this deployment failed
        _ => Err(StackError::StackFailed {
            name: name.to_string(),
            reason: first.stack_status_reason()
                .map(|r| format!("{} ({})", status.as_str(), r))
                .unwrap_or_else(|| status.as_str().to_string()),
        }),
    }
}

pub async fn wait_for_output(client: &Client, name: &str) -> Result<HashMap<String, String>, StackError> {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        match describe_stack(client, name).await? {
            Some(stack) => {
                println!();
                let mut out = HashMap::new();
                for output in stack.outputs() {
                    if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
                        out.insert(key.to_string(), val.to_string());
                    }
                }
                return Ok(out);
            }
            None => {
                // still waiting
                print!(".");
                let _ = std::io::stdout().flush();
            }
        }
    }
}

/// returns false if the stack already matched the template.
pub async fn create_or_update_stack(client: &Client, name: &str, body: &str) -> Result<bool, StackError> {
    if does_stack_exist(client, name).await? {
        print!("Updating {name} ...");
        let _ = std::io::stdout().flush();
        let res = client
            .update_stack()
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .send()
            .await;
        match res {
            Ok(_) => {}
            Err(e) => {
                if e.message().map(|m| m.contains("No updates are to be performed")).unwrap_or(false) {
                    println!();
                    return Ok(false);
                }
                return Err(sdk_err(e));
            }
        }
    } else {
        print!("Creating {name} ...");
        let _ = std::io::stdout().flush();
        client
            .create_stack()
            .on_failure(OnFailure::Delete)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityIam)
            .stack_name(name)
            .template_body(body)
            .send()
            .await
            .map_err(sdk_err)?;
    }
    Ok(true)
}

/// Delete the stack and wait until CloudFormation reports it gone.
/// Deleting a stack that does not exist is not an error.
pub async fn destroy_stack(client: &Client, name: &str) -> Result<(), StackError> {
    if !does_stack_exist(client, name).await? {
        tracing::info!(stack = %name, "stack does not exist, nothing to destroy");
        return Ok(());
    }
    print!("Deleting {name} ...");
    let _ = std::io::stdout().flush();
    client.delete_stack().stack_name(name).send().await.map_err(sdk_err)?;
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        let resp = match client.describe_stacks().stack_name(name).send().await {
            Ok(resp) => resp,
            Err(e) if is_missing_stack(&e) => break,
            Err(e) => return Err(sdk_err(e)),
        };
        let first = match resp.stacks().first() {
            Some(s) => s,
            None => break,
        };
        let status: Option<&StackStatus> = first.stack_status().into();
        match status {
            Some(StackStatus::DeleteComplete) | None => break,
            Some(StackStatus::DeleteFailed) => {
                println!();
                return Err(StackError::StackFailed {
                    name: name.to_string(),
                    reason: first.stack_status_reason().unwrap_or("Failed to get stack failure reason").to_string(),
                });
            }
            Some(_) => {
                print!(".");
                let _ = std::io::stdout().flush();
            }
        }
    }
    println!();
    tracing::info!(stack = %name, "stack deleted");
    Ok(())
}
