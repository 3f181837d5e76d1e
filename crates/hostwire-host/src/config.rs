use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hostwire_channel::EndpointConfig;
use hostwire_protocol::{
    NullPathConverter, PathConverter, PrefixPathConverter, HIGHEST_SUPPORTED_VERSION,
};

use crate::job_queue::JobQueueConfig;

/// Honour a negotiated version of 3 instead of downgrading it to 2.
pub const ENV_DISABLE_VERSION_DOWNGRADE: &str = "HOSTWIRE_DISABLE_PROTOCOL_3_VERSION_DOWNGRADE";
/// Path prefix of the deployed sources as seen by the test host.
pub const ENV_LOCAL_PATH: &str = "HOSTWIRE_LOCAL_PATH";
/// The same location as seen by the controller.
pub const ENV_REMOTE_PATH: &str = "HOSTWIRE_REMOTE_PATH";
/// Diagnostic log file announced to the controller after the handshake.
pub const ENV_DIAG_FILE: &str = "HOSTWIRE_DIAG_FILE";

/// Local and remote views of the deployed sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
}

/// Test host settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Highest version offered in the handshake.
    pub max_protocol_version: u32,
    /// Keep version 3 when it is negotiated.
    pub disable_version_3_downgrade: bool,
    pub job_queue: JobQueueConfig,
    /// How long debugger launch/attach requests wait for the controller.
    pub ack_timeout: Duration,
    /// Remap paths between host and controller; `None` leaves them as is.
    pub path_mapping: Option<PathMapping>,
    pub diagnostics_file: Option<PathBuf>,
    /// Why diagnostics logging could not be set up, reported as a warning.
    pub logging_init_error: Option<String>,
    pub endpoint: EndpointConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_protocol_version: HIGHEST_SUPPORTED_VERSION,
            disable_version_3_downgrade: false,
            job_queue: JobQueueConfig::default(),
            ack_timeout: Duration::from_secs(300),
            path_mapping: None,
            diagnostics_file: None,
            logging_init_error: None,
            endpoint: EndpointConfig::default(),
        }
    }
}

impl HostConfig {
    /// Defaults overlaid with the deployment settings from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an injected variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let path_mapping = match (non_empty(ENV_LOCAL_PATH), non_empty(ENV_REMOTE_PATH)) {
            (Some(local), Some(remote)) => Some(PathMapping {
                local_path: PathBuf::from(local),
                remote_path: PathBuf::from(remote),
            }),
            _ => None,
        };

        Self {
            disable_version_3_downgrade: non_empty(ENV_DISABLE_VERSION_DOWNGRADE)
                .is_some_and(|v| is_truthy(&v)),
            path_mapping,
            diagnostics_file: non_empty(ENV_DIAG_FILE).map(PathBuf::from),
            ..Self::default()
        }
    }

    /// The path converter selected by [`path_mapping`](Self::path_mapping).
    pub fn path_converter(&self) -> hostwire_protocol::Result<Arc<dyn PathConverter>> {
        match &self.path_mapping {
            Some(mapping) => Ok(Arc::new(PrefixPathConverter::new(
                &mapping.local_path,
                &mapping.remote_path,
            )?)),
            None => Ok(Arc::new(NullPathConverter)),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hostwire_protocol::PathConversionDirection;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = HostConfig::from_lookup(lookup(&[]));
        assert_eq!(config.max_protocol_version, 7);
        assert!(!config.disable_version_3_downgrade);
        assert!(config.path_mapping.is_none());
        assert!(config.diagnostics_file.is_none());
        assert_eq!(config.job_queue.max_jobs, 500);
        assert_eq!(config.job_queue.max_bytes, 25_000_000);
    }

    #[test]
    fn downgrade_flag_accepts_common_truthy_values() {
        for value in ["1", "true", "TRUE", " yes "] {
            let config =
                HostConfig::from_lookup(lookup(&[(ENV_DISABLE_VERSION_DOWNGRADE, value)]));
            assert!(config.disable_version_3_downgrade, "value {value:?}");
        }
        for value in ["0", "false", ""] {
            let config =
                HostConfig::from_lookup(lookup(&[(ENV_DISABLE_VERSION_DOWNGRADE, value)]));
            assert!(!config.disable_version_3_downgrade, "value {value:?}");
        }
    }

    #[test]
    fn path_mapping_requires_both_prefixes() {
        let only_local = HostConfig::from_lookup(lookup(&[(ENV_LOCAL_PATH, "/deploy")]));
        assert!(only_local.path_mapping.is_none());

        let both = HostConfig::from_lookup(lookup(&[
            (ENV_LOCAL_PATH, "/deploy"),
            (ENV_REMOTE_PATH, "/home/dev/src"),
        ]));
        let converter = both.path_converter().unwrap();
        assert_eq!(
            converter.update_path(
                "/home/dev/src/a.dll".to_string(),
                PathConversionDirection::Receive
            ),
            "/deploy/a.dll"
        );
    }

    #[test]
    fn default_converter_is_identity() {
        let converter = HostConfig::default().path_converter().unwrap();
        assert_eq!(
            converter.update_path("/x/y".to_string(), PathConversionDirection::Send),
            "/x/y"
        );
    }

    #[test]
    fn diagnostics_file_from_environment() {
        let config = HostConfig::from_lookup(lookup(&[(ENV_DIAG_FILE, "/tmp/host.diag")]));
        assert_eq!(config.diagnostics_file, Some(PathBuf::from("/tmp/host.diag")));
    }
}
