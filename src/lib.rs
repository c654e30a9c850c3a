use thiserror::Error;

/// Expose all controller components used by main
pub mod resources;

/// Operator configuration
pub mod config;
pub use config::Config;

/// Controller wiring and shared state
pub mod operator;

/// Worker pod construction and communication
pub mod workers;

/// OpenSCAP report summaries
pub mod openscap;

// Internal only
mod reconcilers;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

#[cfg(test)]
mod fixtures;

/// Field manager used for every server-side apply issued by the operator
pub const MANAGER: &str = "image-security-operator";

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("IllegalRequest {0}: {1}")]
    IllegalRequest(String, String),

    #[error("Invalid image reference: {0}")]
    InvalidImageReference(String),

    #[error("Worker request error: {0}")]
    WorkerRequestError(#[from] http::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Report error: {0}")]
    ReportError(#[from] quick_xml::Error),

    #[error("Invalid report: {0}")]
    InvalidReport(String),

    #[error("Worker did not answer in time: {0}")]
    WorkerTimeout(#[from] tokio::time::error::Elapsed),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SerializationError(_) => "serializationerror",
            Error::KubeError(_) => "kubeerror",
            Error::FinalizerError(_) => "finalizererror",
            Error::IllegalRequest(..) => "illegalrequest",
            Error::InvalidImageReference(_) => "invalidimagereference",
            Error::WorkerRequestError(_) => "workerrequesterror",
            Error::NetworkError(_) => "networkerror",
            Error::ReportError(_) => "reporterror",
            Error::InvalidReport(_) => "invalidreport",
            Error::WorkerTimeout(_) => "workertimeout",
            Error::MetricsError(_) => "metricserror",
        }
        .to_string()
    }
}

/// Build a `BTreeMap<String, String>` out of key/value pairs.
///
/// Used for labels, annotations and node selectors.
#[macro_export]
macro_rules! labels {
    ($($key:expr => $value:expr),* $(,)?) => {
        ::std::collections::BTreeMap::<String, String>::from([
            $(($key.to_string(), $value.to_string())),*
        ])
    };
}
