//! Hedging strategy configuration and presets.

use std::{sync::Arc, time::Duration};

use http::StatusCode;
use regex::Regex;

use crate::resource::{MethodSet, PercentileResource, Resource};

/// Hedging strategy configuration.
///
/// Controls how many speculative copies of a matched request are issued.
/// The fan-out balances latency reduction against duplicated load on the
/// server.
#[derive(Debug, Clone)]
pub struct HedgeConfig {
    /// Number of hedged attempts beyond the primary.
    ///
    /// Total attempts per matched request are `fanout + 1`. Zero means only
    /// the primary runs and the readiness delay is never consulted.
    pub fanout: usize,
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self { fanout: 1 }
    }
}

impl HedgeConfig {
    /// Conservative hedging: a single speculative copy.
    pub fn conservative() -> Self {
        Self { fanout: 1 }
    }

    /// Low-latency hedging: two speculative copies.
    pub fn low_latency() -> Self {
        Self { fanout: 2 }
    }

    /// Aggressive hedging: three speculative copies, prioritising latency
    /// over duplicated load.
    pub fn aggressive() -> Self {
        Self { fanout: 3 }
    }
}

/// Catch-all resource installed when a client is built with no resources.
///
/// Matches every method and URL, paces hedging at the running median over a
/// 100-sample window with a 100ms base delay, and accepts the 2xx success
/// statuses.
pub fn default_resource() -> Arc<dyn Resource> {
    Arc::new(PercentileResource::new(
        MethodSet::ALL,
        Some(Regex::new(".*").expect("valid pattern")),
        Duration::from_millis(100),
        0.5,
        100,
        [
            StatusCode::OK,
            StatusCode::CREATED,
            StatusCode::ACCEPTED,
            StatusCode::NON_AUTHORITATIVE_INFORMATION,
            StatusCode::NO_CONTENT,
            StatusCode::RESET_CONTENT,
            StatusCode::PARTIAL_CONTENT,
            StatusCode::MULTI_STATUS,
            StatusCode::ALREADY_REPORTED,
            StatusCode::IM_USED,
        ],
    ))
}
