//! Client facade over the hedging transport.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::{self, HedgeConfig},
    errors::HedgedError,
    http::{Request, Response},
    resource::Resource,
    transport::{HedgedTransport, HttpTransport, RoundTrip},
};

/// An HTTP client whose transport hedges slow requests.
///
/// Callers issue a single logical request and observe a single response; the
/// racing, cancellation, and loser cleanup happen inside the wrapped
/// transport.
pub struct HedgedClient {
    transport: HedgedTransport,
}

impl HedgedClient {
    /// Creates a client over the default [`HttpTransport`].
    ///
    /// If `resources` is empty the catch-all
    /// [`default_resource`](config::default_resource) is installed.
    pub fn new(resources: Vec<Arc<dyn Resource>>, cfg: HedgeConfig) -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()), resources, cfg)
    }

    /// Creates a client over a caller-supplied transport.
    pub fn with_transport(
        inner: Arc<dyn RoundTrip>,
        mut resources: Vec<Arc<dyn Resource>>,
        cfg: HedgeConfig,
    ) -> Self {
        if resources.is_empty() {
            resources.push(config::default_resource());
        }
        Self {
            transport: HedgedTransport::new(inner, cfg.fanout, resources),
        }
    }

    /// Executes a request under a fresh, never-cancelled scope.
    pub async fn execute(&self, req: Request) -> Result<Response, HedgedError> {
        self.execute_with_cancel(req, CancellationToken::new())
            .await
    }

    /// Executes a request under the caller's cancellation scope.
    ///
    /// Cancelling `cancel` aborts every in-flight attempt and resolves the
    /// call with [`HedgedError::Canceled`] unless a validated response was
    /// already captured.
    pub async fn execute_with_cancel(
        &self,
        req: Request,
        cancel: CancellationToken,
    ) -> Result<Response, HedgedError> {
        self.transport.round_trip(req, cancel).await
    }
}
