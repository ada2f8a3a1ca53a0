use std::{collections::hash_map::Entry, future::Future};

use leptos::*;

use crate::{
    query::Query, query_cache::QueryCache, query_observer::QueryObserver, CacheKey,
    DefaultQueryOptions, QueryData, QueryError, QueryOptions, QueryParams, QueryState, QueryValue,
};

/// Provides a Query Client to the current scope.
pub fn provide_query_client() {
    provide_query_client_with_options(DefaultQueryOptions::default());
}

/// Provides a Query Client to the current scope with custom options.
pub fn provide_query_client_with_options(options: DefaultQueryOptions) {
    let owner = Owner::current().expect("Owner to be present");

    provide_context(QueryClient::new(owner, options));
}

/// Retrieves a Query Client from the current scope.
pub fn use_query_client() -> QueryClient {
    use_context::<QueryClient>().expect("Query Client Missing.")
}

/// The cache client holding all query data.
/// Exposes utility functions to manage queries by their derived [`CacheKey`].
///
/// Queries can be:
/// - [Prefetched](Self::prefetch_query): loading starts before any hook reads the query.
/// - [Invalidated](Self::invalidate_query): refetched in the background on next use.
/// - [Introspected](Self::peek_query_state).
/// - [Manually updated](Self::set_query_data).
#[derive(Clone)]
pub struct QueryClient {
    pub(crate) cache: QueryCache,
    pub(crate) default_options: DefaultQueryOptions,
}

impl QueryClient {
    /// Creates a new Query Client.
    pub fn new(owner: Owner, default_options: DefaultQueryOptions) -> Self {
        Self {
            cache: QueryCache::new(owner),
            default_options,
        }
    }

    /// Fetch a query and store it in cache, returning the resulting state.
    ///
    /// If you don't need the result opt for
    /// [`prefetch_query()`](Self::prefetch_query).
    pub async fn fetch_query<F, P, V, Fu>(&self, query_fn: F, params: P) -> QueryState<V>
    where
        F: Fn(P) -> Fu + 'static,
        P: QueryParams,
        V: QueryValue + 'static,
        Fu: Future<Output = Result<V, QueryError>> + 'static,
    {
        #[cfg(any(feature = "hydrate", feature = "csr"))]
        {
            use crate::cache_key::QueryIdentity;
            use crate::query_observer::Fetcher;
            use std::rc::Rc;

            let identity = QueryIdentity::sanitize(query_fn);
            let key = identity
                .key(&params)
                .expect("query parameters could not be serialized into a cache key");

            let query = self.cache.get_or_create_query::<V>(key);
            let fetcher: Fetcher<V> = Rc::new(move |_key| identity.call(params.clone()));

            crate::query_executor::run_fetch(query.clone(), fetcher).await;

            query.get_state()
        }
        #[cfg(not(any(feature = "hydrate", feature = "csr")))]
        {
            let _ = query_fn;
            let _ = params;
            QueryState::Created
        }
    }

    /// Prefetch a query and store it in cache.
    /// If the entry already exists it will still be refetched.
    ///
    /// If you need the result opt for [`fetch_query()`](Self::fetch_query).
    pub async fn prefetch_query<F, P, V, Fu>(&self, query_fn: F, params: P)
    where
        F: Fn(P) -> Fu + 'static,
        P: QueryParams,
        V: QueryValue + 'static,
        Fu: Future<Output = Result<V, QueryError>> + 'static,
    {
        let _: QueryState<V> = self.fetch_query(query_fn, params).await;
    }

    /// Retrieve the reactive state for an existing query.
    /// If the query does not exist, the signal's value will be [`None`].
    pub fn get_query_state<V>(
        &self,
        key: impl Fn() -> CacheKey + 'static,
    ) -> Signal<Option<QueryState<V>>>
    where
        V: QueryValue + 'static,
    {
        use std::cell::Cell;
        use std::rc::Rc;

        let cache = self.cache.clone();
        let size = self.size();

        // Memoize to avoid unnecessary map lookups.
        let maybe_query = create_memo(move |_| {
            let key = key();
            // Subscribe to inserts/deletions.
            size.track();
            cache.get_query::<V>(&key)
        });

        let observer = Rc::new(QueryObserver::no_fetcher(
            QueryOptions::default(),
            maybe_query.get_untracked(),
        ));

        let state_signal = RwSignal::new(maybe_query.get_untracked().map(|q| q.get_state()));

        let listener = Rc::new(Cell::new(None::<crate::query_observer::ListenerKey>));

        create_isomorphic_effect({
            move |_| {
                // Ensure listener is set.
                if listener.get().is_none() {
                    let listener_id = observer.add_listener(move |state| {
                        state_signal.set(Some(state.clone()));
                    });
                    listener.set(Some(listener_id));
                }

                // Update
                let query = maybe_query.get();
                let current_state = query.as_ref().map(|q| q.get_state());
                observer.update_query(query);
                state_signal.set(current_state);
            }
        });

        state_signal.into()
    }

    /// Retrieve the current state for an existing query without subscribing
    /// to it. If the query does not exist, [`None`] will be returned.
    pub fn peek_query_state<V>(&self, key: &CacheKey) -> Option<QueryState<V>>
    where
        V: QueryValue + 'static,
    {
        self.cache.get_query::<V>(key).map(|q| q.get_state())
    }

    /// Attempts to invalidate an entry in the Query Cache.
    /// The matching query is marked as invalid, and will be refetched in the
    /// background while it has active observers.
    ///
    /// Returns true if the entry was invalidated.
    pub fn invalidate_query<V>(&self, key: &CacheKey) -> bool
    where
        V: QueryValue + 'static,
    {
        let key = key.clone();
        self.cache
            .use_cache_option::<V, _, _>(|cache| cache.get(&key).map(|query| query.mark_invalid()))
            .unwrap_or(false)
    }

    /// Attempts to invalidate multiple entries with a common value type.
    ///
    /// Returns the keys that were successfully invalidated.
    pub fn invalidate_queries<V>(
        &self,
        keys: impl IntoIterator<Item = CacheKey>,
    ) -> Option<Vec<CacheKey>>
    where
        V: QueryValue + 'static,
    {
        self.cache.use_cache_option::<V, _, _>(|cache| {
            let invalidated = keys
                .into_iter()
                .filter(|key| {
                    cache
                        .get(key)
                        .map(|query| query.mark_invalid())
                        .unwrap_or(false)
                })
                .collect::<Vec<_>>();
            Some(invalidated)
        })
    }

    /// Invalidates all queries with a common value type.
    pub fn invalidate_query_type<V>(&self)
    where
        V: QueryValue + 'static,
    {
        self.cache.use_cache_option::<V, _, ()>(|cache| {
            for query in cache.values() {
                query.mark_invalid();
            }
            Some(())
        });
    }

    /// Invalidates all queries in the cache, across value types.
    pub fn invalidate_all_queries(&self) {
        self.cache.invalidate_all_queries()
    }

    /// Returns the current size of the cache.
    pub fn size(&self) -> Signal<usize> {
        self.cache.size()
    }

    /// Synchronously updates a query's data in place.
    ///
    /// If the query does not exist, it will be created.
    ///
    /// If the updater function returns [`None`], the query data is not
    /// updated (and no cache entry is created for a missing query).
    pub fn update_query_data<V>(
        &self,
        key: CacheKey,
        updater: impl FnOnce(Option<&V>) -> Option<V> + 'static,
    ) where
        V: QueryValue + 'static,
    {
        self.cache
            .use_cache_entry(key.clone(), move |(owner, entry)| match entry {
                Entry::Occupied(entry) => {
                    entry.get().maybe_map_state(|state| match state {
                        QueryState::Created | QueryState::Loading | QueryState::Errored(_) => {
                            if let Some(result) = updater(None) {
                                Ok(QueryState::Loaded(QueryData::now(result)))
                            } else {
                                Err(state)
                            }
                        }
                        QueryState::Fetching(ref data) => {
                            if let Some(result) = updater(Some(&data.data)) {
                                Ok(QueryState::Fetching(QueryData::now(result)))
                            } else {
                                Err(state)
                            }
                        }
                        QueryState::Loaded(ref data) | QueryState::Invalid(ref data) => {
                            if let Some(result) = updater(Some(&data.data)) {
                                Ok(QueryState::Loaded(QueryData::now(result)))
                            } else {
                                Err(state)
                            }
                        }
                    });
                    false
                }
                Entry::Vacant(entry) => {
                    if let Some(result) = updater(None) {
                        let query = with_owner(owner, || Query::new(key));
                        query.set_state(QueryState::Loaded(QueryData::now(result)));
                        entry.insert(query);
                        true
                    } else {
                        false
                    }
                }
            });
    }

    /// Sets the query's data. If the query does not exist, it will be created.
    pub fn set_query_data<V>(&self, key: CacheKey, data: V)
    where
        V: QueryValue + 'static,
    {
        self.update_query_data(key, |_| Some(data));
    }

    /// Mutates the existing data if it exists.
    /// All listeners are notified, regardless of whether the data changed.
    pub fn update_query_data_mut<V>(
        &self,
        key: &CacheKey,
        updater: impl FnOnce(&mut V),
    ) -> bool
    where
        V: QueryValue + 'static,
    {
        let key = key.clone();
        self.cache.use_cache::<V, bool>(move |cache| {
            let mut updated = false;
            if let Some(query) = cache.get(&key) {
                query.update_state(|state| {
                    if let Some(data) = state.data_mut() {
                        updater(data);
                        updated = true;
                    }
                });
            }
            updated
        })
    }

    /// Cancels any currently executing fetch for the query.
    /// Returns whether a fetch was cancelled.
    pub fn cancel_query<V>(&self, key: &CacheKey) -> bool
    where
        V: QueryValue + 'static,
    {
        let key = key.clone();
        self.cache.use_cache::<V, bool>(move |cache| {
            if let Some(query) = cache.get(&key) {
                query.cancel()
            } else {
                false
            }
        })
    }

    /// Clears the cache. All queries will be removed.
    pub fn clear(&self) {
        self.cache.clear_all_queries()
    }
}

#[cfg(all(test, not(any(feature = "csr", feature = "hydrate"))))]
mod tests {
    use super::*;
    use crate::query_key;

    async fn fetch_name(_id: u32) -> Result<String, QueryError> {
        unreachable!()
    }

    async fn fetch_count(_id: u32) -> Result<u32, QueryError> {
        unreachable!()
    }

    fn name_key(id: u32) -> CacheKey {
        query_key(&fetch_name, &id).unwrap()
    }

    fn count_key(id: u32) -> CacheKey {
        query_key(&fetch_count, &id).unwrap()
    }

    #[test]
    fn update_query_data() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        let state = || {
            use_query_client()
                .peek_query_state::<String>(&name_key(0))
                .and_then(|s| s.data().cloned())
        };

        assert_eq!(None, state());
        assert_eq!(0, client.size().get_untracked());

        // Updater bails out: no entry is created.
        client.update_query_data::<String>(name_key(0), |_| None);

        assert_eq!(None, state());
        assert_eq!(0, client.size().get_untracked());

        client.update_query_data::<String>(name_key(0), |_| Some("0".to_string()));

        assert_eq!(1, client.size().get_untracked());
        assert_eq!(Some("0".to_string()), state());

        client.update_query_data::<String>(name_key(0), |_| Some("1".to_string()));

        assert_eq!(Some("1".to_string()), state());
    }

    #[test]
    fn set_query_data_creates_and_overwrites() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        let state = |id: u32| {
            use_query_client()
                .peek_query_state::<String>(&name_key(id))
                .and_then(|s| s.data().cloned())
        };

        assert_eq!(None, state(1));

        client.set_query_data::<String>(name_key(1), "Initial Data".to_string());
        assert_eq!(Some("Initial Data".to_string()), state(1));
        assert!(matches!(
            client.peek_query_state::<String>(&name_key(1)),
            Some(QueryState::Loaded { .. })
        ));

        client.set_query_data::<String>(name_key(1), "Updated Data".to_string());
        assert_eq!(Some("Updated Data".to_string()), state(1));
    }

    #[test]
    fn distinct_value_types_get_distinct_entries() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        client.set_query_data::<String>(name_key(0), "0".to_string());
        client.set_query_data::<u32>(count_key(0), 1234);

        assert_eq!(2, client.size().get_untracked());
    }

    #[test]
    fn can_invalidate_while_subscribed() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        let subscription = client.get_query_state::<u32>(|| count_key(0));

        create_isomorphic_effect(move |_| {
            subscription.track();
        });

        client.set_query_data::<u32>(count_key(0), 1234);

        assert!(client.invalidate_query::<u32>(&count_key(0)));
        let state = subscription.get_untracked();

        assert!(
            matches!(state, Some(QueryState::Invalid { .. })),
            "Query should be invalid"
        );
    }

    #[test]
    fn can_invalidate_multiple() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        client.set_query_data::<u32>(count_key(0), 1234);
        client.set_query_data::<u32>(count_key(1), 1234);

        let keys = vec![count_key(0), count_key(1)];
        let invalidated = client
            .invalidate_queries::<u32>(keys.clone())
            .unwrap_or_default();

        assert_eq!(keys, invalidated)
    }

    #[test]
    fn invalidate_all() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        client.set_query_data::<String>(name_key(0), "1234".to_string());
        client.set_query_data::<u32>(count_key(0), 1234);

        client.invalidate_all_queries();

        assert!(matches!(
            client.peek_query_state::<String>(&name_key(0)),
            Some(QueryState::Invalid { .. })
        ));
        assert!(matches!(
            client.peek_query_state::<u32>(&count_key(0)),
            Some(QueryState::Invalid { .. })
        ));
    }

    #[test]
    fn update_query_data_mut() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        client.set_query_data::<u32>(count_key(0), 100);

        let updated = client.update_query_data_mut::<u32>(&count_key(0), |data| *data += 50);
        assert!(updated, "Expected data to be updated");
        assert_eq!(
            Some(150),
            client
                .peek_query_state::<u32>(&count_key(0))
                .and_then(|s| s.data().copied())
        );

        let missing = client.update_query_data_mut::<u32>(&count_key(1), |data| *data += 50);
        assert!(!missing, "Expected no update for a missing query");
    }

    #[test]
    fn cancel_without_in_flight_fetch() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        client.set_query_data::<u32>(count_key(0), 1);
        assert!(!client.cancel_query::<u32>(&count_key(0)));
    }

    #[test]
    fn clear_removes_everything() {
        let _ = create_runtime();

        provide_query_client();
        let client = use_query_client();

        client.set_query_data::<u32>(count_key(0), 1);
        client.set_query_data::<String>(name_key(0), "1".to_string());
        assert_eq!(2, client.size().get_untracked());

        client.clear();

        assert_eq!(0, client.size().get_untracked());
        assert_eq!(None, client.peek_query_state::<u32>(&count_key(0)));
    }
}
