//! Ordered resource registry.

use std::sync::Arc;

use crate::{http::Request, resource::Resource};

/// An ordered sequence of resources.
///
/// A request is associated with the first resource that matches it, scanned
/// in configuration order. Matching is cheap relative to network I/O, so
/// lookups are never cached.
#[derive(Default)]
pub struct Registry {
    resources: Vec<Arc<dyn Resource>>,
}

impl Registry {
    /// Creates a registry holding `resources` in the given order.
    pub fn new(resources: Vec<Arc<dyn Resource>>) -> Self {
        Self { resources }
    }

    /// Returns the first resource matching `req`, if any.
    pub fn lookup(&self, req: &Request) -> Option<Arc<dyn Resource>> {
        self.resources.iter().find(|r| r.matches(req)).cloned()
    }

    /// Number of configured resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True if no resources are configured.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl FromIterator<Arc<dyn Resource>> for Registry {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Resource>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{Method, StatusCode};
    use regex::Regex;
    use url::Url;

    use super::*;
    use crate::resource::{MethodSet, StaticResource};

    fn resource(pattern: &str, delay_ms: u64) -> Arc<dyn Resource> {
        Arc::new(StaticResource::new(
            MethodSet::GET,
            Some(Regex::new(pattern).unwrap()),
            Duration::from_millis(delay_ms),
            [StatusCode::OK],
        ))
    }

    fn get(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn lookup_returns_first_match_in_configuration_order() {
        let broad = resource("profile", 1);
        let narrow = resource("profile/[0-9]+", 2);
        let registry = Registry::new(vec![broad.clone(), narrow]);

        let found = registry
            .lookup(&get("http://localhost/profile/7"))
            .expect("resource should match");
        // Both patterns match; configuration order wins.
        assert!(Arc::ptr_eq(&found, &broad));
    }

    #[test]
    fn lookup_misses_when_nothing_matches() {
        let registry = Registry::new(vec![resource("users", 1)]);
        assert!(registry.lookup(&get("http://localhost/profile")).is_none());
    }

    #[test]
    fn empty_registry_matches_nothing() {
        let registry = Registry::default();
        assert!(registry.is_empty());
        assert!(registry.lookup(&get("http://localhost/")).is_none());
    }
}
