//! Late-bound parameter resolver plugins.
//!
//! Resolvers supply values not known until run time (secrets, account ids,
//! lookups). They are registered in a lookup table at startup and invoked
//! lazily by the orchestrator; results are memoized per (name, args) pair
//! for the duration of a run, with a single in-flight call per unique key.

use crate::errors::CirrusError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// A late-bound value provider.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves a value from positional arguments.
    ///
    /// # Errors
    ///
    /// Returns a human-readable failure detail; the orchestrator converts
    /// it into a per-stack failure.
    async fn resolve(&self, args: &[String]) -> Result<String, String>;
}

/// Lookup table of named resolvers, built at startup.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
}

impl ResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver under a name, replacing any previous entry.
    #[must_use]
    pub fn with_resolver(mut self, name: impl Into<String>, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.insert(name.into(), resolver);
        self
    }

    /// Looks up a resolver by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(name).cloned()
    }

    /// Returns the registered resolver names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resolvers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Per-run memoization cache with single-flight semantics.
///
/// Concurrent requests for the same (name, args) key await one underlying
/// call instead of duplicating it.
#[derive(Default)]
pub struct ResolverCache {
    registry: Arc<ResolverRegistry>,
    entries: DashMap<String, Arc<OnceCell<Result<String, String>>>>,
}

impl ResolverCache {
    /// Creates a cache over a registry.
    #[must_use]
    pub fn new(registry: Arc<ResolverRegistry>) -> Self {
        Self {
            registry,
            entries: DashMap::new(),
        }
    }

    /// Resolves a value, memoized per (name, args) within this cache.
    ///
    /// # Errors
    ///
    /// Returns [`CirrusError::Resolver`] if the resolver is unknown or its
    /// call failed; failures are memoized too, so a failing key is not
    /// retried within the run.
    pub async fn resolve(&self, name: &str, args: &[String]) -> Result<String, CirrusError> {
        let resolver = self
            .registry
            .get(name)
            .ok_or_else(|| CirrusError::Resolver {
                resolver: name.to_string(),
                detail: "not registered".to_string(),
            })?;

        let key = cache_key(name, args);
        let cell = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_init(|| async {
                debug!(resolver = name, ?args, "invoking resolver");
                resolver.resolve(args).await
            })
            .await;

        result.clone().map_err(|detail| CirrusError::Resolver {
            resolver: name.to_string(),
            detail,
        })
    }

    /// Number of distinct keys resolved so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ResolverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Cache key over name and args; the separator cannot appear in either.
fn cache_key(name: &str, args: &[String]) -> String {
    let mut key = String::from(name);
    for arg in args {
        key.push('\u{1f}');
        key.push_str(arg);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Resolver for CountingResolver {
        async fn resolve(&self, args: &[String]) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("value:{}", args.join(",")))
        }
    }

    fn cache_with(name: &str, resolver: Arc<dyn Resolver>) -> ResolverCache {
        let registry = Arc::new(ResolverRegistry::new().with_resolver(name, resolver));
        ResolverCache::new(registry)
    }

    #[tokio::test]
    async fn test_resolve_and_memoize() {
        let resolver = Arc::new(CountingResolver::default());
        let cache = cache_with("secrets", resolver.clone());
        let args = vec!["db/password".to_string()];

        let first = cache.resolve("secrets", &args).await.unwrap();
        let second = cache.resolve("secrets", &args).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_distinct_args_call_separately() {
        let resolver = Arc::new(CountingResolver::default());
        let cache = cache_with("secrets", resolver.clone());

        cache.resolve("secrets", &["a".to_string()]).await.unwrap();
        cache.resolve("secrets", &["b".to_string()]).await.unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_resolver() {
        let cache = cache_with("secrets", Arc::new(CountingResolver::default()));
        let err = cache.resolve("missing", &[]).await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_concurrent_requests_single_flight() {
        #[derive(Debug, Default)]
        struct SlowResolver {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Resolver for SlowResolver {
            async fn resolve(&self, _args: &[String]) -> Result<String, String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok("shared".to_string())
            }
        }

        let resolver = Arc::new(SlowResolver::default());
        let cache = Arc::new(cache_with("slow", resolver.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.resolve("slow", &["key".to_string()]).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }
        // Exactly one underlying call despite eight requesters.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_memoized() {
        #[derive(Debug, Default)]
        struct FailingResolver {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Resolver for FailingResolver {
            async fn resolve(&self, _args: &[String]) -> Result<String, String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err("denied".to_string())
            }
        }

        let resolver = Arc::new(FailingResolver::default());
        let cache = cache_with("flaky", resolver.clone());

        assert!(cache.resolve("flaky", &[]).await.is_err());
        assert!(cache.resolve("flaky", &[]).await.is_err());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
