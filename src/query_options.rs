use std::time::Duration;

use leptos::Signal;

/// Default options for all queries under this client.
/// Only differs from [`QueryOptions`] in that it has no default value or
/// enabled signal.
#[derive(Debug, Clone, Copy)]
pub struct DefaultQueryOptions {
    /// Time before a query is considered stale.
    pub stale_time: Option<Duration>,
    /// Time before an inactive query is removed from cache.
    pub gc_time: Option<Duration>,
    /// Time before a query is refetched.
    pub refetch_interval: Option<Duration>,
    /// Determines which type of resource to use.
    pub resource_option: ResourceOption,
}

impl Default for DefaultQueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Some(DEFAULT_STALE_TIME),
            gc_time: Some(DEFAULT_GC_TIME),
            refetch_interval: None,
            resource_option: ResourceOption::default(),
        }
    }
}

const DEFAULT_STALE_TIME: Duration = Duration::from_secs(10);
const DEFAULT_GC_TIME: Duration = Duration::from_secs(60 * 5);

/// Options for a query, [`use_query`](crate::use_query()) and friends.
#[derive(Clone)]
pub struct QueryOptions<V> {
    /// Placeholder value to use while the query is loading for the first time.
    pub default_value: Option<V>,
    /// The duration that should pass before a query is considered stale.
    /// If the query is stale, it will be refetched.
    /// If no stale_time, the query will never be considered stale.
    /// stale_time can never be greater than gc_time.
    /// Default is 10 seconds.
    pub stale_time: Option<Duration>,
    /// The amount of time a query will be cached once there are no more
    /// active observers.
    /// If no gc_time, the query will never be evicted from cache.
    /// Default is 5 minutes.
    pub gc_time: Option<Duration>,
    /// If no refetch interval, the query will never refetch on a timer.
    pub refetch_interval: Option<Duration>,
    /// Determines which type of resource to use.
    pub resource_option: Option<ResourceOption>,
    /// Additional execution gate for this query. The query will not dispatch
    /// a fetch while this signal is false. Always combined with the
    /// router-ready signal: both must be true for a fetch to be dispatched.
    pub enabled: Option<Signal<bool>>,
}

impl<V> QueryOptions<V> {
    /// Set the default value.
    pub fn set_default_value(self, default_value: Option<V>) -> Self {
        QueryOptions {
            default_value,
            ..self
        }
    }

    /// Set the stale_time.
    pub fn set_stale_time(self, stale_time: Option<Duration>) -> Self {
        QueryOptions { stale_time, ..self }
    }

    /// Set the gc time.
    pub fn set_gc_time(self, gc_time: Option<Duration>) -> Self {
        QueryOptions { gc_time, ..self }
    }

    /// Set the refetch interval.
    pub fn set_refetch_interval(self, refetch_interval: Option<Duration>) -> Self {
        QueryOptions {
            refetch_interval,
            ..self
        }
    }

    /// Set the resource option.
    pub fn set_resource_option(self, resource_option: Option<ResourceOption>) -> Self {
        QueryOptions {
            resource_option,
            ..self
        }
    }

    /// Set the enabled signal.
    pub fn set_enabled(self, enabled: Option<Signal<bool>>) -> Self {
        QueryOptions { enabled, ..self }
    }

    /// Ensures that gc_time is >= stale_time.
    pub fn validate(self) -> Self {
        let stale_time = ensure_valid_stale_time(&self.stale_time, &self.gc_time);

        QueryOptions { stale_time, ..self }
    }
}

impl<V> std::fmt::Debug for QueryOptions<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("default_value", &self.default_value)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("refetch_interval", &self.refetch_interval)
            .field("resource_option", &self.resource_option)
            .field("enabled", &self.enabled.is_some())
            .finish()
    }
}

impl<V> Default for QueryOptions<V> {
    fn default() -> Self {
        // Use client-wide defaults if they exist.
        let default_options = leptos::use_context::<crate::QueryClient>()
            .map(|c| c.default_options)
            .unwrap_or_default();
        Self {
            default_value: None,
            stale_time: default_options.stale_time,
            gc_time: default_options.gc_time,
            refetch_interval: default_options.refetch_interval,
            resource_option: Some(default_options.resource_option),
            enabled: None,
        }
        .validate()
    }
}

/// Determines which type of resource to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceOption {
    /// Query will use [`create_resource()`](leptos::create_resource)
    #[default]
    NonBlocking,
    /// Query will use [`create_blocking_resource()`](leptos::create_blocking_resource)
    Blocking,
    /// Query will use [`create_local_resource()`](leptos::create_local_resource)
    Local,
}

fn ensure_valid_stale_time(
    stale_time: &Option<Duration>,
    gc_time: &Option<Duration>,
) -> Option<Duration> {
    match (stale_time, gc_time) {
        (Some(ref stale_time), Some(ref gc_time)) => {
            if stale_time > gc_time {
                leptos::logging::debug_warn!(
                    "stale_time is greater than gc_time. Using gc_time instead. stale_time: {}, gc_time: {}",
                    stale_time.as_millis(),
                    gc_time.as_millis()
                );
                Some(*gc_time)
            } else {
                Some(*stale_time)
            }
        }
        (stale_time, _) => *stale_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provide_query_client_with_options;

    #[test]
    fn validate_stale_time_less_than_gc_time() {
        let options = QueryOptions::<i32> {
            default_value: None,
            stale_time: Some(Duration::from_secs(5)),
            gc_time: Some(Duration::from_secs(10)),
            refetch_interval: None,
            resource_option: None,
            enabled: None,
        }
        .validate();

        assert_eq!(options.stale_time, Some(Duration::from_secs(5)));
        assert_eq!(options.gc_time, Some(Duration::from_secs(10)));
    }

    #[test]
    fn validate_stale_time_greater_than_gc_time() {
        let options = QueryOptions::<i32> {
            default_value: None,
            stale_time: Some(Duration::from_secs(15)),
            gc_time: Some(Duration::from_secs(10)),
            refetch_interval: None,
            resource_option: None,
            enabled: None,
        }
        .validate();

        assert_eq!(
            options.stale_time,
            Some(Duration::from_secs(10)),
            "stale_time should be clamped to gc_time"
        );
        assert_eq!(options.gc_time, Some(Duration::from_secs(10)));
    }

    #[test]
    fn validate_none_stale_and_gc_time() {
        let options = QueryOptions::<i32> {
            default_value: None,
            stale_time: None,
            gc_time: None,
            refetch_interval: None,
            resource_option: None,
            enabled: None,
        }
        .validate();

        assert_eq!(options.stale_time, None);
        assert_eq!(options.gc_time, None);
    }

    #[cfg(not(any(feature = "csr", feature = "hydrate")))]
    #[test]
    fn default_uses_client_options() {
        let _ = leptos::create_runtime();

        provide_query_client_with_options(DefaultQueryOptions {
            stale_time: Some(Duration::from_secs(1)),
            gc_time: Some(Duration::from_secs(2)),
            refetch_interval: Some(Duration::from_secs(3)),
            resource_option: ResourceOption::NonBlocking,
        });

        let default_options: QueryOptions<()> = Default::default();

        assert_eq!(default_options.stale_time, Some(Duration::from_secs(1)));
        assert_eq!(default_options.gc_time, Some(Duration::from_secs(2)));
        assert_eq!(
            default_options.refetch_interval,
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            default_options.resource_option,
            Some(ResourceOption::NonBlocking)
        );
        assert!(default_options.enabled.is_none());
    }
}
