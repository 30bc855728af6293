//! An HTTP client layer that hedges slow requests to cut tail latency.
//!
//! This library wraps an underlying transport and races speculative duplicate
//! requests against the primary: the primary attempt starts immediately, and
//! after a per-resource delay the hedged copies fan out. The first acceptable
//! response wins, every other attempt is cancelled, and their responses are
//! drained so connections can be reused.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use hedged_http_client::{
//!     HedgeConfig, HedgedClient, MethodSet, Request, StaticResource,
//! };
//! use http::StatusCode;
//! use regex::Regex;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = StaticResource::new(
//!     MethodSet::GET | MethodSet::HEAD,
//!     Some(Regex::new("/profile/[0-9]+")?),
//!     Duration::from_millis(30),
//!     [StatusCode::OK],
//! );
//!
//! let client = HedgedClient::new(vec![Arc::new(profile)], HedgeConfig::low_latency());
//!
//! let url = Url::parse("http://api.internal/profile/7")?;
//! let resp = client.execute(Request::get(url)).await?;
//! println!("got {} from the fastest attempt", resp.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Pacing
//!
//! Resources decide when hedged copies fire:
//!
//! - [`StaticResource`] always waits a fixed delay.
//! - [`AverageResource`] waits the running mean of observed latencies.
//! - [`PercentileResource`] waits a configured percentile of a sliding
//!   latency window.
//!
//! Dynamic resources fall back to their base delay until enough successful
//! calls have been observed, and only successful calls feed the statistics.

pub mod client;
pub mod config;
pub mod errors;
pub mod http;
pub mod registry;
pub mod resource;
pub mod transport;

pub use client::HedgedClient;
pub use config::{default_resource, HedgeConfig};
pub use errors::HedgedError;
pub use crate::http::{Body, BodyStream, Request, Response};
pub use registry::Registry;
pub use resource::{
    AverageResource, Completion, MethodSet, PercentileResource, Resource, StaticResource,
};
pub use transport::{HedgedTransport, HttpTransport, RoundTrip};
