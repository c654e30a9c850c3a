use std::time::Duration;

use clap::{Parser, ValueEnum};

/// How the operator reaches the HTTP server inside a scanning pod
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum WorkerAccess {
    /// Through the API server's pod proxy subresource
    #[default]
    Proxy,

    /// Straight to the pod IP
    Direct,
}

/// Operator-wide settings.
///
/// Every option can be given as a flag or through its environment variable.
#[derive(Clone, Debug, Parser)]
#[command(name = "operator", about = "Signs and scans container images on request")]
pub struct Config {
    /// Namespace in which worker pods (and copied signing keys) are created
    #[arg(long, env = "TARGET_PROJECT", default_value = "image-management")]
    pub target_project: String,

    /// Service account the worker pods run as
    #[arg(long, env = "TARGET_SERVICE_ACCOUNT", default_value = "imagemanager")]
    pub target_service_account: String,

    /// Secret in the target project holding the default GPG key
    #[arg(long, env = "GPG_SECRET", default_value = "gpg")]
    pub gpg_secret: String,

    /// Default identity images are signed as
    #[arg(long, env = "GPG_SIGN_BY", default_value = "openshift@example.com")]
    pub gpg_sign_by: String,

    /// Image used by both signing and scanning pods
    #[arg(long, env = "SIGN_SCAN_IMAGE", default_value = "image-sign-scan-base")]
    pub sign_scan_image: String,

    /// Mount the node's sigstore into signing pods and pin them to builder nodes
    #[arg(long, env = "HOST_PATH_MOUNT", default_value_t = false, action = clap::ArgAction::Set)]
    pub host_path_mount: bool,

    /// Treat every finished signing pod as having produced a signature
    #[arg(long, env = "SIG_DEMO", default_value_t = false, action = clap::ArgAction::Set)]
    pub sig_demo: bool,

    /// Transport used to query scanning pods
    #[arg(long, env = "WORKER_ACCESS", value_enum, default_value_t = WorkerAccess::Proxy)]
    pub worker_access: WorkerAccess,

    /// Seconds between two health checks of a scanning pod
    #[arg(long, env = "HEALTH_CHECK_INTERVAL", default_value_t = 10)]
    pub health_check_interval: u64,

    /// Health checks a scanning pod gets before it is declared broken
    #[arg(long, env = "HEALTH_CHECK_ATTEMPTS", default_value_t = 20)]
    pub health_check_attempts: u32,

    /// Address of the metrics and diagnostics server
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,
}

impl Config {
    /// Delay between two polls of a worker pod
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval)
    }

    /// How long a running scanning pod may stay unhealthy
    pub fn health_deadline(&self) -> Duration {
        self.poll_interval()
            .checked_mul(self.health_check_attempts)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["operator"])
    }
}
