// =============================================================================
// Source adapters — pulling metric windows from upstream systems
// =============================================================================
//
// An adapter's single job: given a look-back window in seconds, return a
// DataFrame of (ts, value) rows strictly inside that window, ascending by
// timestamp, with concurrent series summed per timestamp. Failures are
// classified so the pipeline can label them uniformly.
// =============================================================================

mod http;
mod prometheus;

pub use http::HttpSource;
pub use prometheus::PrometheusSource;

use crate::config::SourceConfig;
use crate::frame::DataFrame;

/// Classified source failures. The pipeline treats all three as a collect
/// failure; the distinction feeds logs.
#[derive(Debug)]
pub enum SourceError {
    /// Transport-level failure or a non-success HTTP status.
    Unavailable(String),
    /// The upstream answered but the payload could not be parsed.
    Malformed(String),
    /// The query succeeded and produced zero rows.
    Empty,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "source unavailable: {msg}"),
            Self::Malformed(msg) => write!(f, "source response malformed: {msg}"),
            Self::Empty => write!(f, "source returned no rows"),
        }
    }
}

impl std::error::Error for SourceError {}

/// The source variants a workload can be bound to.
pub enum Source {
    Prometheus(PrometheusSource),
    Http(HttpSource),
    #[cfg(test)]
    Mock(MockSource),
}

/// Scripted source for pipeline tests: every collect call runs the
/// configured closure.
#[cfg(test)]
pub struct MockSource {
    respond: Box<dyn Fn(i64) -> Result<DataFrame, SourceError> + Send + Sync>,
}

#[cfg(test)]
impl MockSource {
    pub fn new(
        respond: impl Fn(i64) -> Result<DataFrame, SourceError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
        }
    }
}

impl Source {
    /// Construct the adapter a workload configuration asks for.
    /// VictoriaMetrics speaks the Prometheus query API, so both config
    /// variants build the same adapter.
    pub fn from_config(config: &SourceConfig) -> Self {
        match config {
            SourceConfig::Prometheus {
                url,
                query,
                step_seconds,
            }
            | SourceConfig::VictoriaMetrics {
                url,
                query,
                step_seconds,
            } => Self::Prometheus(PrometheusSource::new(url, query, *step_seconds)),
            SourceConfig::Http { url, bearer_token } => {
                Self::Http(HttpSource::new(url, bearer_token.clone()))
            }
        }
    }

    /// Identifier used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prometheus(_) => "prometheus",
            Self::Http(_) => "http",
            #[cfg(test)]
            Self::Mock(_) => "mock",
        }
    }

    /// Pull a window of rows ending at the adapter's current UTC second.
    pub async fn collect(&self, window_seconds: i64) -> Result<DataFrame, SourceError> {
        match self {
            Self::Prometheus(s) => s.collect(window_seconds).await,
            Self::Http(s) => s.collect(window_seconds).await,
            #[cfg(test)]
            Self::Mock(s) => (s.respond)(window_seconds),
        }
    }
}
