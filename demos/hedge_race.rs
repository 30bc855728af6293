//! Side-by-side comparison of a plain client and a hedged client against a
//! backend with occasional slow responses.
//!
//! Run with `cargo run --example hedge_race`.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use hedged_http_client::{
    Body, HedgeConfig, HedgedClient, HedgedError, MethodSet, Request, Response, RoundTrip,
    StaticResource,
};
use http::StatusCode;
use regex::Regex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Transport where every fourth exchange stalls, simulating a backend with a
/// long latency tail.
struct TailHeavyTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl RoundTrip for TailHeavyTransport {
    async fn round_trip(
        &self,
        _req: Request,
        cancel: CancellationToken,
    ) -> Result<Response, HedgedError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        let latency = if n % 4 == 3 {
            Duration::from_millis(250)
        } else {
            Duration::from_millis(20)
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(HedgedError::Canceled),
            _ = time::sleep(latency) => {
                Ok(Response::new(StatusCode::OK).with_body(Body::full("ok")))
            }
        }
    }
}

async fn run_calls(label: &str, client: &HedgedClient, calls: usize) {
    let url = Url::parse("http://backend.internal/profile/7").unwrap();
    let mut total = Duration::ZERO;
    let mut worst = Duration::ZERO;

    for _ in 0..calls {
        let start = Instant::now();
        client
            .execute(Request::get(url.clone()))
            .await
            .expect("backend always answers 200");
        let elapsed = start.elapsed();
        total += elapsed;
        worst = worst.max(elapsed);
    }

    println!(
        "{label:>8}: avg {:>6.1?}  worst {:>6.1?} over {calls} calls",
        total / calls as u32,
        worst,
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let resource = || {
        Arc::new(StaticResource::new(
            MethodSet::GET,
            Some(Regex::new("profile").unwrap()),
            Duration::from_millis(40),
            [StatusCode::OK],
        ))
    };

    let plain = HedgedClient::with_transport(
        Arc::new(TailHeavyTransport {
            calls: AtomicUsize::new(0),
        }),
        vec![resource()],
        HedgeConfig { fanout: 0 },
    );
    let hedged = HedgedClient::with_transport(
        Arc::new(TailHeavyTransport {
            calls: AtomicUsize::new(0),
        }),
        vec![resource()],
        HedgeConfig::conservative(),
    );

    println!("backend: 20ms fast path, every 4th call stalls at 250ms\n");
    run_calls("plain", &plain, 32).await;
    run_calls("hedged", &hedged, 32).await;
}
