//! Deployment request model and synchronous validation.
//!
//! Validation runs before any job record exists, so a rejected request has
//! no side effects. Component names are only checked for shape here; whether
//! they exist in the registry is decided by the resolver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::error::CoreError;

/// Default set of deployment environments.
pub const DEFAULT_ENVIRONMENTS: [&str; 3] = ["staging", "production", "preprod"];

/// Maximum number of explicitly targeted hosts.
const MAX_TARGET_HOSTS: usize = 512;

/// Maximum length of a host name.
const MAX_HOST_LEN: usize = 253;

/// How the automation tool is invoked for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Apply changes.
    #[default]
    Normal,
    /// Report what would change without applying.
    Check,
    /// Alias of `check` kept for older clients.
    DryRun,
    /// Apply changes, passing `execution_mode=force` to the playbook.
    Force,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Normal => "normal",
            ExecutionMode::Check => "check",
            ExecutionMode::DryRun => "dry-run",
            ExecutionMode::Force => "force",
        }
    }

    /// Whether the tool must run without applying changes.
    pub fn is_check(self) -> bool {
        matches!(self, ExecutionMode::Check | ExecutionMode::DryRun)
    }
}

/// A request to deploy a set of components to one environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DeploymentRequest {
    /// Target environment, one of the configured set.
    #[validate(length(min = 1, message = "Environment must not be empty"))]
    pub environment: String,
    /// Requested component names (dependencies are added by the resolver).
    #[validate(length(
        min = 1,
        max = 64,
        message = "Between 1 and 64 components must be specified"
    ))]
    pub components: Vec<String>,
    /// Hosts to limit the run to. Empty means every host in the inventory.
    #[serde(default)]
    pub target_hosts: Vec<String>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Free-form options forwarded to the playbook as extra vars.
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Opaque identity of the caller that submitted the request.
    #[serde(default)]
    pub owner: String,
}

impl DeploymentRequest {
    /// Whether the caller asked for verbose tool output.
    pub fn verbose(&self) -> bool {
        self.options
            .get("verbose")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Validate the shape of a request against the allowed environments.
///
/// Rules:
/// - `environment` must be one of `environments`.
/// - `components` must be non-empty (at most 64), each a valid component name.
/// - `target_hosts` entries must be plain host names (no separators or whitespace).
/// - option keys must be identifiers so they can be passed as `key=value`.
pub fn validate_request(
    request: &DeploymentRequest,
    environments: &[String],
) -> Result<(), CoreError> {
    request
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    if !environments.iter().any(|env| env == &request.environment) {
        return Err(CoreError::Validation(format!(
            "Invalid environment: {} (expected one of: {})",
            request.environment,
            environments.join(", ")
        )));
    }

    for name in &request.components {
        validate_component_name(name)?;
    }

    if request.target_hosts.len() > MAX_TARGET_HOSTS {
        return Err(CoreError::Validation(format!(
            "At most {MAX_TARGET_HOSTS} target hosts may be specified"
        )));
    }
    for host in &request.target_hosts {
        validate_host_name(host)?;
    }

    for key in request.options.keys() {
        validate_option_key(key)?;
    }

    Ok(())
}

/// Component names are lowercase alphanumerics and hyphens.
fn validate_component_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(CoreError::Validation(format!(
            "Malformed component name: {name:?}"
        )));
    }
    Ok(())
}

fn validate_host_name(host: &str) -> Result<(), CoreError> {
    if host.is_empty() || host.len() > MAX_HOST_LEN {
        return Err(CoreError::Validation(format!(
            "Malformed target host: {host:?}"
        )));
    }
    if !host
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CoreError::Validation(format!(
            "Malformed target host: {host:?}"
        )));
    }
    Ok(())
}

fn validate_option_key(key: &str) -> Result<(), CoreError> {
    let mut chars = key.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CoreError::Validation(format!(
            "Option keys must be identifiers, got {key:?}"
        )));
    }
    Ok(())
}
