//! Shows a percentile resource learning a backend's latency profile: the
//! hedging delay starts at the configured base and converges on the observed
//! p90 as calls complete.
//!
//! Run with `cargo run --example dynamic_pacing`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use hedged_http_client::{
    Body, HedgeConfig, HedgedClient, HedgedError, MethodSet, PercentileResource, Request,
    Resource, Response, RoundTrip,
};
use http::StatusCode;
use regex::Regex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Transport with latency drifting downwards, as if a cache were warming up.
struct WarmingTransport {
    start: Instant,
}

#[async_trait]
impl RoundTrip for WarmingTransport {
    async fn round_trip(
        &self,
        _req: Request,
        cancel: CancellationToken,
    ) -> Result<Response, HedgedError> {
        let warmup = self.start.elapsed().min(Duration::from_secs(2));
        let latency = Duration::from_millis(80) - warmup / 40;
        tokio::select! {
            _ = cancel.cancelled() => Err(HedgedError::Canceled),
            _ = time::sleep(latency) => {
                Ok(Response::new(StatusCode::OK).with_body(Body::full("ok")))
            }
        }
    }
}

fn current_delay(resource: &dyn Resource) -> Duration {
    resource
        .after()
        .deadline()
        .saturating_duration_since(Instant::now())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let resource = Arc::new(PercentileResource::new(
        MethodSet::GET,
        Some(Regex::new("/profile").unwrap()),
        Duration::from_millis(100),
        0.9,
        10,
        [StatusCode::OK],
    ));

    let client = HedgedClient::with_transport(
        Arc::new(WarmingTransport {
            start: Instant::now(),
        }),
        vec![resource.clone()],
        HedgeConfig::low_latency(),
    );

    let url = Url::parse("http://backend.internal/profile/7").unwrap();
    println!("base delay 100ms, pacing at p90 over a 10-sample window\n");

    for batch in 0..8 {
        for _ in 0..5 {
            client
                .execute(Request::get(url.clone()))
                .await
                .expect("backend always answers 200");
        }
        println!(
            "after {:>2} calls: hedging delay {:>7.1?}",
            (batch + 1) * 5,
            current_delay(resource.as_ref()),
        );
    }
}
