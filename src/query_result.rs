use std::marker::PhantomData;

use leptos::*;

use crate::{use_query_client, CacheKey, QueryClient, QueryError, QueryState, QueryValue};

/// Reactive query result: the resolved data plus the companion status
/// signals and cache helpers for the same query identity.
pub struct QueryResult<V, R>
where
    V: 'static,
    R: RefetchFn,
{
    /// The current value of the query. None until it has been fetched.
    /// Should be read inside of a [`Transition`](leptos::Transition) or
    /// [`Suspense`](leptos::Suspense) component.
    pub data: Signal<Option<V>>,
    /// The current state of the query.
    pub state: Signal<QueryState<V>>,
    /// The fetch error, if the last fetch failed.
    pub error: Signal<Option<QueryError>>,

    /// Query is fetching for the first time.
    pub is_loading: Signal<bool>,
    /// Query is actively fetching.
    pub is_fetching: Signal<bool>,
    /// Query's data has been marked invalid.
    pub is_invalid: Signal<bool>,

    /// Refetch the query.
    pub refetch: R,

    /// Cache helpers bound to this query's identity.
    pub controls: QueryControls<V>,
}

impl<V, R> Clone for QueryResult<V, R>
where
    V: 'static,
    R: RefetchFn,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data,
            state: self.state,
            error: self.error,
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_invalid: self.is_invalid,
            refetch: self.refetch.clone(),
            controls: self.controls.clone(),
        }
    }
}

/// Convenience trait alias for a query result's refetch function.
pub trait RefetchFn: Fn() + Clone {}
impl<R: Fn() + Clone> RefetchFn for R {}

/// Cache helper functions bound to one query identity.
///
/// Constructed fresh for every hook invocation; every operation targets the
/// same derived [`CacheKey`] that produced the accompanying result,
/// regardless of whether the underlying fetch succeeded or failed.
pub struct QueryControls<V: 'static> {
    client: QueryClient,
    key: Signal<CacheKey>,
    _value: PhantomData<V>,
}

impl<V> Clone for QueryControls<V> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            key: self.key,
            _value: PhantomData,
        }
    }
}

impl<V> QueryControls<V>
where
    V: QueryValue + 'static,
{
    pub(crate) fn new(client: QueryClient, key: Signal<CacheKey>) -> Self {
        Self {
            client,
            key,
            _value: PhantomData,
        }
    }

    /// The cache key these controls operate on.
    pub fn key(&self) -> CacheKey {
        self.key.get_untracked()
    }

    /// Marks the query's data as invalid, triggering a background refetch
    /// while the query is observed. Returns true if data was invalidated.
    pub fn invalidate(&self) -> bool {
        self.client.invalidate_query::<V>(&self.key())
    }

    /// Refetches the query. No-op when the entry is missing or no observer's
    /// execution gate is open.
    pub fn refetch(&self) {
        if let Some(query) = self.client.cache.get_query::<V>(&self.key()) {
            query.execute();
        }
    }

    /// Immediately sets the query's data.
    pub fn set_data(&self, data: V) {
        self.client.set_query_data::<V>(self.key(), data);
    }

    /// Updates the query's data in place. If the updater returns [`None`]
    /// the data is left untouched.
    pub fn update_data(&self, updater: impl FnOnce(Option<&V>) -> Option<V> + 'static) {
        self.client.update_query_data::<V>(self.key(), updater);
    }

    /// Cancels the in-flight fetch, if any. Returns whether one was cancelled.
    pub fn cancel(&self) -> bool {
        self.client.cancel_query::<V>(&self.key())
    }
}

pub(crate) fn make_controls<V>(key: Signal<CacheKey>) -> QueryControls<V>
where
    V: QueryValue + 'static,
{
    QueryControls::new(use_query_client(), key)
}

#[cfg(all(test, not(any(feature = "csr", feature = "hydrate"))))]
mod tests {
    use super::*;
    use crate::{provide_query_client, query_key, QueryError};

    async fn fetch_name(_id: u32) -> Result<String, QueryError> {
        unreachable!()
    }

    #[test]
    fn controls_target_the_key_that_made_them() {
        let _ = create_runtime();

        provide_query_client();

        let key = query_key(&fetch_name, &1).unwrap();
        let controls: QueryControls<String> = {
            let key = key.clone();
            make_controls(Signal::derive(move || key.clone()))
        };

        assert_eq!(key, controls.key());

        // No entry yet: invalidate is a no-op.
        assert!(!controls.invalidate());

        controls.set_data("Alice".to_string());
        assert_eq!(
            Some("Alice".to_string()),
            use_query_client()
                .peek_query_state::<String>(&key)
                .and_then(|s| s.data().cloned())
        );

        assert!(controls.invalidate());
    }

    #[test]
    fn controls_refetch_is_safe_without_observers() {
        let _ = create_runtime();

        provide_query_client();

        let key = query_key(&fetch_name, &3).unwrap();
        let controls: QueryControls<String> = {
            let key = key.clone();
            make_controls(Signal::derive(move || key.clone()))
        };

        // Missing entry: nothing to refetch.
        controls.refetch();
        assert_eq!(None, use_query_client().peek_query_state::<String>(&key));

        controls.set_data("Alice".to_string());

        // No observers, so no fetcher; the data stays put.
        controls.refetch();
        assert_eq!(
            Some("Alice".to_string()),
            use_query_client()
                .peek_query_state::<String>(&key)
                .and_then(|s| s.data().cloned())
        );
    }

    #[test]
    fn controls_update_bails_out_on_none() {
        let _ = create_runtime();

        provide_query_client();

        let key = query_key(&fetch_name, &2).unwrap();
        let controls: QueryControls<String> = {
            let key = key.clone();
            make_controls(Signal::derive(move || key.clone()))
        };

        controls.update_data(|_| None);
        assert_eq!(
            None,
            use_query_client().peek_query_state::<String>(&key)
        );
    }
}
