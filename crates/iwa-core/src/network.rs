//! Network provisioner.
//!
//! `ensure_network` checks for an exact-name match and creates the network
//! only when absent. A concurrent creator winning the race shows up as
//! "already exists", which is treated as success.

use tracing::info;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::obs;
use crate::runtime::ContainerRuntime;

/// Ensure a network named `name` exists. Returns `true` if this call created it.
pub async fn ensure_network(runtime: &dyn ContainerRuntime, name: &str) -> OrchestrationResult<bool> {
    let exists = runtime
        .network_exists(name)
        .await
        .map_err(|e| OrchestrationError::provisioning("inspect network", name, e))?;
    if exists {
        obs::emit_network_ensured(name, false);
        return Ok(false);
    }

    match runtime.create_network(name).await {
        Ok(()) => {
            obs::emit_network_ensured(name, true);
            Ok(true)
        }
        Err(e) if e.is_already_exists() => {
            info!(network = %name, "network created concurrently by another process");
            obs::emit_network_ensured(name, false);
            Ok(false)
        }
        Err(e) => Err(OrchestrationError::provisioning("create network", name, e)),
    }
}

/// Remove a network. Returns `true` if it existed.
pub async fn remove_network(runtime: &dyn ContainerRuntime, name: &str) -> OrchestrationResult<bool> {
    match runtime.remove_network(name).await {
        Ok(()) => {
            info!(network = %name, "network removed");
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(OrchestrationError::provisioning("remove network", name, e)),
    }
}
