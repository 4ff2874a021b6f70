//! Deterministic names of generated objects

use crate::error::WorkloadError;

/// Name of the function container inside the workload pod
pub const CONTAINER_NAME: &str = "function";

/// Name of the function port on the container
pub const PORT_NAME: &str = "function";

/// Longest DNS-1123 label (volume names, label values)
const MAX_LABEL_LEN: usize = 63;

/// Generated-code ConfigMap: `<id>-<runtime>-usercode`
pub fn bundle_name(identity: &str, runtime: &str) -> String {
    format!("{identity}-{runtime}-usercode")
}

/// Pod volume carrying the bundle: `<id>-usercode`
pub fn volume_name(identity: &str) -> String {
    format!("{identity}-usercode")
}

/// Deployment: the identity itself
pub fn workload_name(identity: &str) -> String {
    identity.to_string()
}

/// Check that every derived name that must be a DNS label fits.
///
/// The identity becomes the `app` label value and prefixes the volume name,
/// both capped at 63 characters.
pub fn validate_identity(identity: &str) -> Result<(), WorkloadError> {
    for name in [identity.to_string(), volume_name(identity)] {
        if name.len() > MAX_LABEL_LEN {
            return Err(WorkloadError::InvalidName {
                name,
                reason: format!("longer than {MAX_LABEL_LEN} characters"),
            });
        }
    }
    Ok(())
}
