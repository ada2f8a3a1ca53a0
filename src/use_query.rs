use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use leptos::leptos_dom::helpers::set_timeout_with_handle;
use leptos::*;

use crate::cache_key::QueryIdentity;
use crate::query::Query;
use crate::query_executor::query_load_suppressed;
use crate::query_observer::{Fetcher, ListenerKey, QueryObserver};
use crate::query_result::make_controls;
use crate::router_ready::execution_gate;
use crate::util::{time_until_stale, use_timeout};
use crate::{
    use_query_client, CacheKey, QueryError, QueryOptions, QueryParams, QueryResult, QueryState,
    QueryValue, RefetchFn, ResourceOption,
};

/// Creates a single query. Useful for data fetching, caching, and
/// synchronization with server state.
///
/// The cache key is derived from the query function's identity and the
/// serialized parameters, so two hooks calling the same function with the
/// same parameters share one cache entry.
///
/// No fetch is dispatched until the [router-ready
/// signal](crate::provide_router_ready()) is true (and the `enabled` option,
/// if set). Fetch errors are surfaced through the result's `error` signal and
/// are never retried at this layer.
///
/// Panics if the parameters cannot be serialized into a cache key; that is a
/// programmer error, not a runtime fetch failure.
///
/// Example
/// ```
/// use leptos::*;
/// use leptos_routed_query::*;
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Clone, Serialize)]
/// struct UserParams {
///     id: u32,
/// }
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// async fn get_user(params: UserParams) -> Result<User, QueryError> {
///     todo!()
/// }
///
/// fn use_user_query(id: impl Fn() -> u32 + 'static) -> QueryResult<User, impl RefetchFn> {
///     use_query(
///         get_user,
///         move || UserParams { id: id() },
///         QueryOptions {
///             stale_time: Some(Duration::from_secs(5)),
///             ..QueryOptions::default()
///         },
///     )
/// }
/// ```
pub fn use_query<F, P, V, Fu>(
    query_fn: F,
    params: impl Fn() -> P + 'static,
    options: QueryOptions<V>,
) -> QueryResult<V, impl RefetchFn>
where
    F: Fn(P) -> Fu + 'static,
    P: QueryParams,
    V: QueryValue + 'static,
    Fu: Future<Output = Result<V, QueryError>> + 'static,
{
    let identity = QueryIdentity::sanitize(query_fn);
    let params = Rc::new(params);

    let key = {
        let identity = identity.clone();
        let params = params.clone();
        create_memo(move |_| {
            identity
                .key(&params())
                .expect("query parameters could not be serialized into a cache key")
        })
    };

    // The cache-engine-supplied key argument is accepted for signature
    // compatibility only; the call always re-reads the hook's own parameters.
    let fetcher: Fetcher<V> = Rc::new(move |_key: CacheKey| identity.call(untrack(|| params())));

    use_cached_query(key, fetcher, options)
}

/// Shared hook body for all three query flavors.
pub(crate) fn use_cached_query<V>(
    key: Memo<CacheKey>,
    fetcher: Fetcher<V>,
    options: QueryOptions<V>,
) -> QueryResult<V, impl RefetchFn>
where
    V: QueryValue + 'static,
{
    let options = options.validate();
    let gate = execution_gate(options.enabled);

    let query = use_query_client()
        .cache
        .get_query_signal::<V>(move || key.get());

    let query_state = register_observer_handle_cleanup(fetcher, query, gate, options.clone());

    let resource_fetcher = move |query: Query<V>| {
        async move {
            match query.get_state() {
                // Immediately provide cached value.
                QueryState::Loaded(data)
                | QueryState::Invalid(data)
                | QueryState::Fetching(data) => ResourceData(Some(data.data)),

                // A failed fetch resolves without data; the error is
                // reported through the state signal.
                QueryState::Errored(_) => ResourceData(None),

                // Suspend indefinitely and wait for interruption.
                QueryState::Created | QueryState::Loading => {
                    sleep(LONG_TIME).await;
                    ResourceData(None)
                }
            }
        }
    };

    let resource: Resource<Query<V>, ResourceData<V>> = {
        let default = options.default_value;
        match options.resource_option.unwrap_or_default() {
            ResourceOption::NonBlocking => create_resource_with_initial_value(
                move || query.get(),
                resource_fetcher,
                default.map(|default| ResourceData(Some(default))),
            ),
            ResourceOption::Blocking => {
                create_blocking_resource(move || query.get(), resource_fetcher)
            }
            ResourceOption::Local => create_local_resource_with_initial_value(
                move || query.get(),
                resource_fetcher,
                default.map(|default| ResourceData(Some(default))),
            ),
        }
    };

    // Ensure latest data in resource.
    create_isomorphic_effect(move |_| {
        query_state.track();
        // If loading is suppressed, refetching would call spawn_local.
        if !query_load_suppressed() {
            resource.refetch();
        }
    });

    // Kick queries that were created behind a closed gate once it opens.
    create_isomorphic_effect(move |_| {
        if gate.get() {
            let query = query.get();
            if query.with_state(|state| matches!(state, QueryState::Created)) {
                query.execute()
            }
        }
    });

    // Refetch on interval. The gate check lives in the query's observers, so
    // an expired timer on a gated query is a no-op.
    {
        let refetch_interval = options.refetch_interval;
        use_timeout(move || {
            match (query_state.with(|s| s.updated_at()), refetch_interval) {
                (Some(updated_at), Some(interval)) => set_timeout_with_handle(
                    move || query.get_untracked().execute(),
                    time_until_stale(updated_at, interval),
                )
                .ok(),
                _ => None,
            }
        });
    }

    let data = Signal::derive({
        move || {
            let read = resource.get().and_then(|r| r.0);
            let query = query.get_untracked();

            // First read.
            // Putting this in an effect would cause it to always refetch
            // needlessly on the client after SSR.
            if read.is_none()
                && gate.get_untracked()
                && query.with_state(|state| matches!(state, QueryState::Created))
            {
                query.execute()
            }

            // SSR edge case.
            // Given hydrate can happen before resource resolves, signals on
            // the client can be out of sync with the resource. Need to force
            // insert the resource data into the query state.
            #[cfg(feature = "hydrate")]
            if let Some(ref data) = read {
                if query.with_state(|state| matches!(state, QueryState::Created)) {
                    let data = crate::QueryData::now(data.clone());
                    query.set_state(QueryState::Loaded(data));
                }
            }
            read
        }
    });

    QueryResult {
        data,
        state: query_state,
        error: Signal::derive(move || query_state.with(|state| state.error().cloned())),
        is_loading: Signal::derive(move || {
            query_state.with(|state| matches!(state, QueryState::Loading))
        }),
        is_fetching: Signal::derive(move || {
            query_state.with(|state| matches!(state, QueryState::Loading | QueryState::Fetching(_)))
        }),
        is_invalid: Signal::derive(move || {
            query_state.with(|state| matches!(state, QueryState::Invalid(_)))
        }),
        refetch: move || query.get_untracked().execute(),
        controls: make_controls(key.into()),
    }
}

const LONG_TIME: Duration = Duration::from_secs(60 * 60 * 24);

async fn sleep(duration: Duration) {
    use cfg_if::cfg_if;
    cfg_if! {
        if #[cfg(any(feature = "hydrate", feature = "csr"))] {
            gloo_timers::future::sleep(duration).await;
        } else if #[cfg(feature = "ssr")] {
            tokio::time::sleep(duration).await;
        } else {
            let _ = duration;
            logging::debug_warn!("You are missing a Cargo feature for leptos_routed_query. Please enable one of 'ssr', 'hydrate', or 'csr'.");
        }
    }
}

/// Wrapper type to enable using `Serializable`
#[derive(Clone, Debug)]
pub struct ResourceData<V>(Option<V>);

impl<V> Serializable for ResourceData<V>
where
    V: Serializable,
{
    fn ser(&self) -> Result<String, SerializationError> {
        if let Some(ref value) = self.0 {
            value.ser()
        } else {
            Ok("null".to_string())
        }
    }

    fn de(bytes: &str) -> Result<Self, SerializationError> {
        match bytes {
            "" | "null" => Ok(ResourceData(None)),
            v => <V>::de(v).map(Some).map(ResourceData),
        }
    }
}

pub(crate) fn register_observer_handle_cleanup<V>(
    fetcher: Fetcher<V>,
    query: Memo<Query<V>>,
    gate: Signal<bool>,
    options: QueryOptions<V>,
) -> Signal<QueryState<V>>
where
    V: QueryValue + 'static,
{
    use std::cell::Cell;

    let state_signal = RwSignal::new(query.get_untracked().get_state());
    let observer = Rc::new(QueryObserver::with_fetcher(
        move |key| fetcher(key),
        gate,
        options,
        query.get_untracked(),
    ));
    let listener = Rc::new(Cell::new(None::<ListenerKey>));

    create_isomorphic_effect({
        let observer = observer.clone();
        let listener = listener.clone();
        move |_| {
            // Ensure listener is set
            if listener.get().is_none() {
                let listener_id = observer.add_listener(move |state| {
                    state_signal.set(state.clone());
                });
                listener.set(Some(listener_id));
            }

            // Update
            let query = query.get();
            state_signal.set(query.get_state());
            observer.update_query(Some(query));
        }
    });

    on_cleanup(move || {
        if let Some(listener_id) = listener.take() {
            if !observer.remove_listener(listener_id) {
                logging::debug_warn!("Failed to remove listener.");
            }
        }
        observer.cleanup()
    });

    state_signal.into()
}
