//! The hedging engine and the transports it decorates.
//!
//! [`HedgedTransport`] wraps any [`RoundTrip`] implementation. Requests that
//! match a configured resource are raced: the primary attempt starts
//! immediately, and once the resource's readiness delay elapses the hedged
//! copies fan out. The first acceptable response wins and every peer attempt
//! is cancelled.

use std::{io, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    errors::HedgedError,
    http::{Body, Request, Response},
    registry::Registry,
    resource::Resource,
};

/// The single-exchange capability consumed and exposed by the hedging layer.
///
/// The cancellation token is the call's scope: implementations must abandon
/// the exchange promptly once it is cancelled.
#[async_trait]
pub trait RoundTrip: Send + Sync {
    /// Performs one request/response exchange.
    async fn round_trip(
        &self,
        req: Request,
        cancel: CancellationToken,
    ) -> Result<Response, HedgedError>;
}

type AttemptResult = Result<Response, HedgedError>;

/// Transport decorator that hedges requests matching configured resources.
///
/// Requests with no matching resource are delegated to the inner transport
/// untouched. Matching requests run the one-primary-plus-N-hedges fan-out
/// and resolve to the first validated response, or to the first error once
/// every attempt has failed.
pub struct HedgedTransport {
    inner: Arc<dyn RoundTrip>,
    registry: Registry,
    fanout: usize,
}

impl HedgedTransport {
    /// Wraps `inner`, hedging matched requests with `fanout` extra attempts.
    pub fn new(inner: Arc<dyn RoundTrip>, fanout: usize, resources: Vec<Arc<dyn Resource>>) -> Self {
        Self {
            inner,
            registry: Registry::new(resources),
            fanout,
        }
    }

    async fn multi_round_trip(
        &self,
        req: Request,
        resource: Arc<dyn Resource>,
        cancel: CancellationToken,
    ) -> AttemptResult {
        if cancel.is_cancelled() {
            return Err(HedgedError::Canceled);
        }

        // One scope per call; cancelling it aborts every attempt, and a
        // caller-side cancel propagates down through it.
        let scope = cancel.child_token();
        let total = self.fanout + 1;
        let (tx, mut rx) = mpsc::channel::<AttemptResult>(total);

        let mut attempts = Vec::with_capacity(total);
        attempts.push(self.spawn_attempt(&req, &resource, &scope, &tx, 0));

        // Readiness is measured from here, once per call, not per attempt.
        let readiness = resource.after();
        tokio::pin!(readiness);
        let mut hedged = self.fanout == 0;

        let mut first_err: Option<HedgedError> = None;
        let mut seen = 0usize;
        let outcome = loop {
            tokio::select! {
                // Results are examined first so a success that landed before
                // a caller cancel is still returned.
                biased;
                Some(result) = rx.recv() => {
                    seen += 1;
                    match result {
                        Ok(resp) => {
                            debug!(url = %req.url, status = resp.status.as_u16(), "hedged call resolved, cancelling peers");
                            scope.cancel();
                            break Ok(resp);
                        }
                        Err(err) => {
                            if first_err.is_none() {
                                first_err = Some(err);
                            }
                            if seen == total {
                                // Every attempt failed; surface the first error.
                                break Err(first_err.take().unwrap_or(HedgedError::Canceled));
                            }
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!(url = %req.url, "caller scope cancelled before any acceptable response");
                    break Err(HedgedError::Canceled);
                }
                _ = &mut readiness, if !hedged => {
                    hedged = true;
                    debug!(url = %req.url, fanout = self.fanout, "readiness fired, launching hedged attempts");
                    for attempt in 1..total {
                        attempts.push(self.spawn_attempt(&req, &resource, &scope, &tx, attempt));
                    }
                }
            }
        };

        // No attempt task outlives the call.
        for handle in attempts {
            let _ = handle.await;
        }

        // Late losers may have parked validated responses in the channel;
        // release their bodies so connections can be reused.
        while let Ok(result) = rx.try_recv() {
            if let Ok(resp) = result {
                debug!(status = resp.status.as_u16(), "draining losing hedged response");
                resp.into_body().drain().await;
            }
        }

        outcome
    }

    fn spawn_attempt(
        &self,
        req: &Request,
        resource: &Arc<dyn Resource>,
        scope: &CancellationToken,
        tx: &mpsc::Sender<AttemptResult>,
        attempt: usize,
    ) -> JoinHandle<()> {
        let req = req.clone();
        let inner = self.inner.clone();
        let resource = resource.clone();
        let scope = scope.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let hook = resource.hook(&req);
            let result = tokio::select! {
                _ = scope.cancelled() => {
                    debug!(attempt, "attempt aborted by cancellation");
                    return;
                }
                result = inner.round_trip(req, scope.clone()) => result,
            };
            let outcome = match result {
                Err(err) => Err(err),
                Ok(resp) => match resource.check(&resp) {
                    Err(err) => {
                        debug!(attempt, status = resp.status.as_u16(), "response failed validation");
                        resp.into_body().drain().await;
                        Err(err)
                    }
                    Ok(()) => {
                        hook.complete();
                        Ok(resp)
                    }
                },
            };
            // Channel capacity covers every attempt, so this never blocks;
            // a send after the collector resolved parks the result for the
            // drain pass.
            let _ = tx.send(outcome).await;
        })
    }
}

#[async_trait]
impl RoundTrip for HedgedTransport {
    async fn round_trip(
        &self,
        req: Request,
        cancel: CancellationToken,
    ) -> Result<Response, HedgedError> {
        match self.registry.lookup(&req) {
            Some(resource) => self.multi_round_trip(req, resource, cancel).await,
            None => self.inner.round_trip(req, cancel).await,
        }
    }
}

/// Default transport backed by a [`reqwest::Client`].
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Creates a transport over an existing client, keeping its pool and
    /// middleware configuration.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundTrip for HttpTransport {
    async fn round_trip(
        &self,
        req: Request,
        cancel: CancellationToken,
    ) -> Result<Response, HedgedError> {
        let Request {
            method,
            url,
            headers,
            body,
            version,
        } = req;
        let send = self
            .client
            .request(method, url)
            .headers(headers)
            .version(version)
            .body(body)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(HedgedError::Canceled),
            resp = send => resp.map_err(HedgedError::transport)?,
        };

        let status = resp.status();
        let headers = resp.headers().clone();
        let version = resp.version();
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        Ok(Response::new(status)
            .with_headers(headers)
            .with_body(Body::streaming(Box::pin(stream))))
    }
}
