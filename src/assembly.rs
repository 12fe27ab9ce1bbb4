use std::path::{Path, PathBuf};

use aws_cfn_stack::SavedStack;
use serde::Serialize;

use crate::error::RouterError;

pub const OUT_DIR: &str = "router.out";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ASSEMBLY_VERSION: &str = "1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactProperties {
    pub template_file: String,
}

#[derive(Debug, Serialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub environment: String,
    pub properties: ArtifactProperties,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub version: String,
    pub artifacts: std::collections::BTreeMap<String, Artifact>,
}

pub fn template_file_name(stack: &SavedStack) -> String {
    format!("{}.template.json", stack.name)
}

pub fn manifest_for(stack: &SavedStack) -> Manifest {
    let artifact = Artifact {
        artifact_type: "aws:cloudformation:stack".to_string(),
        environment: stack.environment.to_string(),
        properties: ArtifactProperties { template_file: template_file_name(stack) },
    };
    Manifest {
        version: ASSEMBLY_VERSION.to_string(),
        artifacts: [(stack.name.clone(), artifact)].into_iter().collect(),
    }
}

fn write(path: PathBuf, contents: String) -> Result<PathBuf, RouterError> {
    std::fs::write(&path, contents).map_err(|source| RouterError::Write { path: path.clone(), source })?;
    Ok(path)
}

/// Write the template and manifest into `out_dir`, creating it if needed.
/// Returns the template path.
pub fn write_assembly(out_dir: &Path, stack: &SavedStack) -> Result<PathBuf, RouterError> {
    std::fs::create_dir_all(out_dir)
        .map_err(|source| RouterError::Write { path: out_dir.to_path_buf(), source })?;
    let template = write(out_dir.join(template_file_name(stack)), stack.template_body()?)?;
    let manifest = serde_json::to_string_pretty(&manifest_for(stack)).map_err(aws_cfn_stack::StackError::from)?;
    write(out_dir.join(MANIFEST_FILE), manifest)?;
    tracing::debug!(path = ?template, "wrote template");
    Ok(template)
}
