//! Resources decide whether a request is worth hedging, which responses are
//! acceptable, and how long to wait before the hedged fan-out fires.
//!
//! Three variants are provided. [`StaticResource`] always waits its
//! configured delay. [`AverageResource`] and [`PercentileResource`] pace
//! themselves from the latencies of previously observed successful calls,
//! falling back to the configured base delay until enough samples exist.

use std::{
    collections::HashSet,
    ops::{BitOr, BitOrAssign},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use http::{Method, StatusCode};
use regex::Regex;
use tokio::time::{self, Instant, Sleep};

use crate::{
    errors::HedgedError,
    http::{Request, Response},
};

/// A set of HTTP methods expressed as a bitmask.
///
/// Resources accept disjunctions of methods, e.g.
/// `MethodSet::GET | MethodSet::HEAD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSet(u16);

impl MethodSet {
    pub const GET: MethodSet = MethodSet(1 << 0);
    pub const HEAD: MethodSet = MethodSet(1 << 1);
    pub const POST: MethodSet = MethodSet(1 << 2);
    pub const PUT: MethodSet = MethodSet(1 << 3);
    pub const DELETE: MethodSet = MethodSet(1 << 4);
    pub const CONNECT: MethodSet = MethodSet(1 << 5);
    pub const OPTIONS: MethodSet = MethodSet(1 << 6);
    pub const TRACE: MethodSet = MethodSet(1 << 7);
    pub const PATCH: MethodSet = MethodSet(1 << 8);

    /// All nine standard methods.
    pub const ALL: MethodSet = MethodSet(0x1ff);

    fn from_method(method: &Method) -> MethodSet {
        match method.as_str() {
            "GET" => Self::GET,
            "HEAD" => Self::HEAD,
            "POST" => Self::POST,
            "PUT" => Self::PUT,
            "DELETE" => Self::DELETE,
            "CONNECT" => Self::CONNECT,
            "OPTIONS" => Self::OPTIONS,
            "TRACE" => Self::TRACE,
            "PATCH" => Self::PATCH,
            // Extension methods carry no bit and never match.
            _ => MethodSet(0),
        }
    }

    /// Returns true if `method` is a member of this set.
    pub fn matches(self, method: &Method) -> bool {
        let bit = Self::from_method(method).0;
        bit != 0 && self.0 & bit == bit
    }
}

impl BitOr for MethodSet {
    type Output = MethodSet;

    fn bitor(self, rhs: MethodSet) -> MethodSet {
        MethodSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for MethodSet {
    fn bitor_assign(&mut self, rhs: MethodSet) {
        self.0 |= rhs.0;
    }
}

impl From<&Method> for MethodSet {
    fn from(method: &Method) -> Self {
        Self::from_method(method)
    }
}

/// An HTTP resource the hedging engine can be configured with.
///
/// A resource matches requests it applies to, validates responses, yields the
/// delay to wait before hedged copies fire, and observes the latency of
/// successful calls for future pacing.
pub trait Resource: Send + Sync {
    /// Returns true if this resource applies to the request.
    fn matches(&self, req: &Request) -> bool;

    /// Validates a response, failing with
    /// [`HedgedError::UnexpectedStatus`] for status codes outside the
    /// acceptable set.
    fn check(&self, resp: &Response) -> Result<(), HedgedError>;

    /// Returns a one-shot readiness timer that fires after the currently
    /// computed delay. The delay is computed here, once per call.
    fn after(&self) -> Sleep;

    /// Starts timing an attempt. The returned [`Completion`] must be
    /// completed exactly once, and only after the response passed
    /// [`check`](Resource::check). Failed or cancelled attempts drop it
    /// without completing.
    fn hook(&self, req: &Request) -> Completion;
}

trait LatencyObserver: Send + Sync {
    fn observe(&self, latency: Duration);
}

/// Scoped timer handed out by [`Resource::hook`].
///
/// Carries the attempt's start timestamp and a handle to the owning
/// statistic. Dropping it without calling [`complete`](Completion::complete)
/// records nothing.
pub struct Completion {
    start: Instant,
    observer: Option<Arc<dyn LatencyObserver>>,
}

impl Completion {
    fn passive() -> Self {
        Self {
            start: Instant::now(),
            observer: None,
        }
    }

    fn observing(observer: Arc<dyn LatencyObserver>) -> Self {
        Self {
            start: Instant::now(),
            observer: Some(observer),
        }
    }

    /// Records the elapsed wall time into the owning resource's statistics.
    pub fn complete(self) {
        if let Some(observer) = &self.observer {
            observer.observe(self.start.elapsed());
        }
    }
}

const MAX_CAPACITY: i32 = i16::MAX as i32;

fn clamp_capacity(capacity: i32) -> i64 {
    let capacity = if capacity < 0 { MAX_CAPACITY } else { capacity };
    i64::from(capacity.max(1))
}

/// Resource that always waits a fixed delay before hedging.
///
/// Matches requests against both the method set and, when present, a regex
/// over the full request URL. Responses are acceptable when their status
/// code is in the allowed set.
pub struct StaticResource {
    methods: MethodSet,
    url: Option<Regex>,
    delay: Duration,
    codes: HashSet<StatusCode>,
}

impl StaticResource {
    /// Creates a static resource. A `None` URL pattern matches any URL.
    pub fn new(
        methods: MethodSet,
        url: Option<Regex>,
        delay: Duration,
        codes: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        Self {
            methods,
            url,
            delay,
            codes: codes.into_iter().collect(),
        }
    }
}

impl Resource for StaticResource {
    fn matches(&self, req: &Request) -> bool {
        if !self.methods.matches(&req.method) {
            return false;
        }
        match &self.url {
            Some(pattern) => pattern.is_match(req.url.as_str()),
            None => true,
        }
    }

    fn check(&self, resp: &Response) -> Result<(), HedgedError> {
        if self.codes.contains(&resp.status) {
            Ok(())
        } else {
            Err(HedgedError::UnexpectedStatus(resp.status.as_u16()))
        }
    }

    fn after(&self) -> Sleep {
        time::sleep(self.delay)
    }

    fn hook(&self, _req: &Request) -> Completion {
        Completion::passive()
    }
}

struct AverageStats {
    sum: AtomicI64,
    count: AtomicI64,
    capacity: i64,
}

impl LatencyObserver for AverageStats {
    fn observe(&self, latency: Duration) {
        let sample = i64::try_from(latency.as_nanos()).unwrap_or(i64::MAX);
        let before = self.sum.load(Ordering::Relaxed);
        let after = self.sum.fetch_add(sample, Ordering::Relaxed).wrapping_add(sample);
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        // On sum overflow or a full window, collapse the accumulator back to
        // capacity+1 synthetic samples at the current mean. Racing collapses
        // may skew the mean slightly; both leave the state valid.
        if after < 0 || count > self.capacity * 2 {
            let mean = before / count;
            self.sum
                .store(mean.saturating_mul(self.capacity + 1), Ordering::Relaxed);
            self.count.store(self.capacity + 1, Ordering::Relaxed);
        }
    }
}

/// Resource that paces hedging by the running average of observed latencies.
///
/// Until `capacity` successful calls have been observed the base delay is
/// used; afterwards the delay is the mean of all recorded samples.
pub struct AverageResource {
    base: StaticResource,
    stats: Arc<AverageStats>,
}

impl AverageResource {
    /// Creates an average-paced resource.
    ///
    /// A negative `capacity` is clamped to `i16::MAX`.
    pub fn new(
        methods: MethodSet,
        url: Option<Regex>,
        base_delay: Duration,
        capacity: i32,
        codes: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        Self {
            base: StaticResource::new(methods, url, base_delay, codes),
            stats: Arc::new(AverageStats {
                sum: AtomicI64::new(0),
                count: AtomicI64::new(0),
                capacity: clamp_capacity(capacity),
            }),
        }
    }
}

impl Resource for AverageResource {
    fn matches(&self, req: &Request) -> bool {
        self.base.matches(req)
    }

    fn check(&self, resp: &Response) -> Result<(), HedgedError> {
        self.base.check(resp)
    }

    fn after(&self) -> Sleep {
        let mut delay = self.base.delay;
        let count = self.stats.count.load(Ordering::Relaxed);
        if count >= self.stats.capacity {
            // Sum and count are read separately; a concurrent update in
            // between skews the mean by at most one sample.
            let sum = self.stats.sum.load(Ordering::Relaxed);
            delay = Duration::from_nanos((sum / count).max(0) as u64);
        }
        time::sleep(delay)
    }

    fn hook(&self, _req: &Request) -> Completion {
        Completion::observing(self.stats.clone())
    }
}

struct PercentileWindow {
    capacity: usize,
    samples: RwLock<Vec<Duration>>,
}

impl LatencyObserver for PercentileWindow {
    fn observe(&self, latency: Duration) {
        let mut samples = self
            .samples
            .write()
            .expect("latency window lock poisoned");
        samples.push(latency);
        // Full window: discard the oldest half, keeping recent samples.
        if samples.len() >= self.capacity * 2 {
            samples.drain(..self.capacity);
        }
    }
}

/// Resource that paces hedging by a percentile of observed latencies.
///
/// Until `capacity / 2` (rounded up) successful calls have been observed the
/// base delay is used; afterwards the delay is the configured quantile of a
/// sorted snapshot of the sample window.
pub struct PercentileResource {
    base: StaticResource,
    percentile: f64,
    window: Arc<PercentileWindow>,
}

impl PercentileResource {
    /// Creates a percentile-paced resource.
    ///
    /// The quantile's absolute value is clamped to `[0, 1]`; a negative
    /// `capacity` is clamped to `i16::MAX`.
    pub fn new(
        methods: MethodSet,
        url: Option<Regex>,
        base_delay: Duration,
        quantile: f64,
        capacity: i32,
        codes: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        let capacity = clamp_capacity(capacity) as usize;
        Self {
            base: StaticResource::new(methods, url, base_delay, codes),
            percentile: quantile.abs().min(1.0),
            window: Arc::new(PercentileWindow {
                capacity,
                samples: RwLock::new(Vec::with_capacity(capacity * 2)),
            }),
        }
    }
}

impl Resource for PercentileResource {
    fn matches(&self, req: &Request) -> bool {
        self.base.matches(req)
    }

    fn check(&self, resp: &Response) -> Result<(), HedgedError> {
        self.base.check(resp)
    }

    fn after(&self) -> Sleep {
        let mut delay = self.base.delay;
        let samples = self
            .window
            .samples
            .read()
            .expect("latency window lock poisoned");
        let len = samples.len();
        if len >= self.window.capacity.div_ceil(2) {
            let mut sorted = samples.clone();
            drop(samples);
            sorted.sort_unstable();
            let idx = ((len as f64 * self.percentile) as usize).min(len - 1);
            delay = sorted[idx];
        }
        time::sleep(delay)
    }

    fn hook(&self, _req: &Request) -> Completion {
        Completion::observing(self.window.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn request(method: Method, url: &str) -> Request {
        Request::new(method, Url::parse(url).unwrap())
    }

    fn delay_of(resource: &dyn Resource) -> Duration {
        resource
            .after()
            .deadline()
            .saturating_duration_since(Instant::now())
    }

    async fn observe(resource: &dyn Resource, latency: Duration) {
        let hook = resource.hook(&request(Method::GET, "http://localhost/"));
        time::sleep(latency).await;
        hook.complete();
    }

    #[test]
    fn method_set_accepts_disjunctions() {
        let set = MethodSet::GET | MethodSet::HEAD;
        assert!(set.matches(&Method::GET));
        assert!(set.matches(&Method::HEAD));
        assert!(!set.matches(&Method::POST));
        assert!(MethodSet::ALL.matches(&Method::PATCH));
    }

    #[test]
    fn method_set_rejects_extension_methods() {
        let custom = Method::from_bytes(b"PURGE").unwrap();
        assert!(!MethodSet::ALL.matches(&custom));
    }

    #[test]
    fn static_matches_method_and_url() {
        let resource = StaticResource::new(
            MethodSet::GET,
            Some(Regex::new("profile").unwrap()),
            ms(1),
            [StatusCode::OK],
        );
        assert!(resource.matches(&request(Method::GET, "http://localhost/profile")));
        assert!(!resource.matches(&request(Method::POST, "http://localhost/profile")));
        assert!(!resource.matches(&request(Method::GET, "http://localhost/users")));
    }

    #[test]
    fn static_match_skips_absent_pattern() {
        let resource = StaticResource::new(MethodSet::GET, None, ms(1), [StatusCode::OK]);
        assert!(resource.matches(&request(Method::GET, "http://localhost/anything")));
    }

    #[test]
    fn check_rejects_non_member_codes() {
        let resource = StaticResource::new(MethodSet::GET, None, ms(1), [StatusCode::OK]);
        assert!(resource.check(&Response::new(StatusCode::OK)).is_ok());
        match resource.check(&Response::new(StatusCode::FORBIDDEN)) {
            Err(HedgedError::UnexpectedStatus(403)) => {}
            other => panic!("expected UnexpectedStatus(403), got {other:?}"),
        }
    }

    #[test]
    fn empty_code_set_rejects_everything() {
        let resource = StaticResource::new(MethodSet::GET, None, ms(1), Vec::new());
        assert!(resource.check(&Response::new(StatusCode::OK)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn static_after_is_base_delay() {
        let resource = StaticResource::new(MethodSet::GET, None, ms(7), [StatusCode::OK]);
        assert_eq!(delay_of(&resource), ms(7));
        observe(&resource, ms(50)).await;
        assert_eq!(delay_of(&resource), ms(7));
    }

    #[tokio::test(start_paused = true)]
    async fn average_uses_base_before_saturation() {
        let resource = AverageResource::new(MethodSet::GET, None, ms(1), -1, [StatusCode::OK]);
        for latency in [1, 2, 5, 10, 20] {
            observe(&resource, ms(latency)).await;
        }
        assert_eq!(delay_of(&resource), ms(1));
    }

    #[tokio::test(start_paused = true)]
    async fn average_tracks_mean_after_saturation() {
        let resource = AverageResource::new(MethodSet::GET, None, ms(1), 4, [StatusCode::OK]);
        for latency in [10, 20, 30, 40] {
            observe(&resource, ms(latency)).await;
        }
        assert_eq!(delay_of(&resource), ms(25));
    }

    #[tokio::test(start_paused = true)]
    async fn average_renormalisation_preserves_mean() {
        let resource = AverageResource::new(MethodSet::GET, None, ms(1), 2, [StatusCode::OK]);
        // 6 observations against capacity 2 forces a count collapse. The
        // collapse divides the pre-update sum by the post-update count, so
        // the mean is preserved approximately, not exactly.
        for _ in 0..6 {
            observe(&resource, ms(10)).await;
        }
        let delay = delay_of(&resource);
        assert!(delay >= ms(8) && delay <= ms(10), "got {delay:?}");
    }

    #[test]
    fn average_renormalises_on_sum_overflow() {
        let stats = AverageStats {
            sum: AtomicI64::new(i64::MAX - 5),
            count: AtomicI64::new(3),
            capacity: 100,
        };
        stats.observe(Duration::from_nanos(100));
        assert!(stats.sum.load(Ordering::Relaxed) > 0);
        assert_eq!(stats.count.load(Ordering::Relaxed), 101);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_hook_records_nothing() {
        let resource = AverageResource::new(MethodSet::GET, None, ms(1), 1, [StatusCode::OK]);
        let hook = resource.hook(&request(Method::GET, "http://localhost/"));
        time::sleep(ms(30)).await;
        drop(hook);
        assert_eq!(delay_of(&resource), ms(1));
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_uses_base_before_saturation() {
        let resource =
            PercentileResource::new(MethodSet::GET, None, ms(1), 0.5, -1, [StatusCode::OK]);
        for _ in 0..5 {
            observe(&resource, ms(5)).await;
        }
        assert_eq!(delay_of(&resource), ms(1));
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_tracks_quantile() {
        let resource =
            PercentileResource::new(MethodSet::GET, None, ms(1), 0.5, 4, [StatusCode::OK]);
        for latency in [40, 10, 30, 20] {
            observe(&resource, ms(latency)).await;
        }
        // Sorted snapshot [10, 20, 30, 40], index floor(4 * 0.5) = 2.
        assert_eq!(delay_of(&resource), ms(30));
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_index_is_clamped() {
        let resource =
            PercentileResource::new(MethodSet::GET, None, ms(1), 1.0, 4, [StatusCode::OK]);
        for latency in [10, 20, 30, 40] {
            observe(&resource, ms(latency)).await;
        }
        assert_eq!(delay_of(&resource), ms(40));
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_quantile_is_normalised() {
        // 1.2 clamps to 1.0, negative values use their absolute value.
        let resource =
            PercentileResource::new(MethodSet::GET, None, ms(1), 1.2, 2, [StatusCode::OK]);
        for latency in [10, 20] {
            observe(&resource, ms(latency)).await;
        }
        assert_eq!(delay_of(&resource), ms(20));
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_window_trims_oldest_half() {
        let resource =
            PercentileResource::new(MethodSet::GET, None, ms(1), 0.0, 2, [StatusCode::OK]);
        for latency in [5, 5, 50, 50] {
            observe(&resource, ms(latency)).await;
        }
        // The fourth push fills the window to 2 * capacity and drops the
        // oldest two samples, so the fastest remaining sample is 50ms.
        assert_eq!(resource.window.samples.read().unwrap().len(), 2);
        assert_eq!(delay_of(&resource), ms(50));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_one_percentile_uses_single_sample() {
        let resource =
            PercentileResource::new(MethodSet::GET, None, ms(1), 0.5, 1, [StatusCode::OK]);
        observe(&resource, ms(42)).await;
        assert_eq!(delay_of(&resource), ms(42));
    }
}
