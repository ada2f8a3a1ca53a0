use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use leptos::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache_key::{QueryIdentity, INFINITE_KEY_SEGMENT};
use crate::query_executor::query_load_suppressed;
use crate::query_observer::Fetcher;
use crate::query_result::QueryControls;
use crate::router_ready::execution_gate;
use crate::use_query::use_cached_query;
use crate::{
    use_query_client, CacheKey, QueryError, QueryOptions, QueryParams, QueryState, QueryValue,
    RefetchFn, ResourceOption,
};

/// The accumulated pages of an infinite query, in fetch order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfiniteData<V> {
    /// The resolved pages, oldest first.
    pub pages: Vec<V>,
}

impl<V> Default for InfiniteData<V> {
    fn default() -> Self {
        Self { pages: Vec::new() }
    }
}

/// An opaque "fetch more" token, derived from the latest page and used to
/// compute the parameters for the next one.
///
/// Known limitation: the token's concrete type does not propagate through the
/// cached page list, so the parameter-mapping function receives it erased.
/// Callers that need the original shape must recover it with
/// [`decode`](Self::decode).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageToken(serde_json::Value);

impl PageToken {
    /// Panics if the value cannot be serialized; tokens are built from page
    /// data that already round-trips through the cache, so failure here is a
    /// programmer error.
    pub fn new(value: impl Serialize) -> Self {
        PageToken(
            serde_json::to_value(value).expect("page token could not be serialized"),
        )
    }

    /// Recovers the token's original shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueryError> {
        serde_json::from_value(self.0.clone())
            .map_err(|e| QueryError::InvalidParams(e.to_string()))
    }

    /// The erased token value.
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

type GetFetchMore<V> = Rc<dyn Fn(&V, &[V]) -> Option<PageToken>>;

/// Options for [`use_infinite_query()`]. Unlike [`QueryOptions`], the
/// `get_fetch_more` extractor is mandatory; the hook panics without it.
#[derive(Clone)]
pub struct InfiniteQueryOptions<V> {
    /// Derives the next page's token from the last page and the accumulated
    /// list. Returning `None` marks the list as complete.
    pub get_fetch_more: Option<GetFetchMore<V>>,
    /// Pages to seed the list with before the first fetch resolves.
    pub default_pages: Option<Vec<V>>,
    /// Time before the accumulated pages are considered stale.
    pub stale_time: Option<Duration>,
    /// Time before an unobserved entry is removed from cache.
    pub gc_time: Option<Duration>,
    /// If set, the first page is refetched on this interval.
    pub refetch_interval: Option<Duration>,
    /// Determines which type of resource to use.
    pub resource_option: Option<ResourceOption>,
    /// Additional execution gate for this query.
    pub enabled: Option<Signal<bool>>,
}

impl<V> Default for InfiniteQueryOptions<V> {
    fn default() -> Self {
        Self {
            get_fetch_more: None,
            default_pages: None,
            stale_time: None,
            gc_time: None,
            refetch_interval: None,
            resource_option: None,
            enabled: None,
        }
    }
}

impl<V> InfiniteQueryOptions<V> {
    /// Set the next-page token extractor.
    pub fn set_get_fetch_more(
        mut self,
        get_fetch_more: impl Fn(&V, &[V]) -> Option<PageToken> + 'static,
    ) -> Self {
        self.get_fetch_more = Some(Rc::new(get_fetch_more));
        self
    }
}

/// A callback to fetch the next page of an infinite query.
pub trait FetchMoreFn: Fn() + Clone {}
impl<F: Fn() + Clone> FetchMoreFn for F {}

/// Result of an infinite query: the accumulated pages plus status signals and
/// cache controls for the entry that produced them.
pub struct InfiniteQueryResult<V, R, M>
where
    V: 'static,
    R: RefetchFn,
    M: FetchMoreFn,
{
    /// All resolved pages, in fetch order. `None` until the first page
    /// resolves.
    pub pages: Signal<Option<Vec<V>>>,
    /// The current state of the underlying query.
    pub state: Signal<QueryState<InfiniteData<V>>>,
    /// The most recent fetch error, from either the first page or a
    /// `fetch_more` call.
    pub error: Signal<Option<QueryError>>,
    /// The first page is being fetched for the first time.
    pub is_loading: Signal<bool>,
    /// The first page is actively being fetched.
    pub is_fetching: Signal<bool>,
    /// A `fetch_more` call is in flight.
    pub is_fetching_more: Signal<bool>,
    /// Whether `get_fetch_more` produced a token for the last page.
    pub has_more: Signal<bool>,
    /// Fetches the next page and appends it to the list.
    pub fetch_more: M,
    /// Refetches the first page, replacing the accumulated list.
    pub refetch: R,
    /// Cache helpers bound to this query's identity.
    pub controls: QueryControls<InfiniteData<V>>,
}

/// Creates an infinite query: pages accumulate in a single cache entry, and
/// each call to `fetch_more` appends one page.
///
/// `params_for` maps a page token to the parameters for the next call. The
/// first page is fetched with `params_for(None)`; later pages receive the
/// token produced by the mandatory `get_fetch_more` option, which may itself
/// be `None` when the extractor reports the list complete.
///
/// The cache key appends a fixed discriminator to the one
/// [`use_query`](crate::use_query()) would derive, so an infinite query never
/// collides with a plain query over the same function and parameters.
///
/// Panics synchronously if `options.get_fetch_more` is `None` or the first
/// page's parameters cannot be serialized.
///
/// Example
/// ```
/// use leptos::*;
/// use leptos_routed_query::*;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize)]
/// struct FeedParams {
///     cursor: Option<u64>,
/// }
///
/// #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// struct FeedPage {
///     entries: Vec<String>,
///     next_cursor: Option<u64>,
/// }
///
/// async fn fetch_feed(params: FeedParams) -> Result<FeedPage, QueryError> {
///     todo!()
/// }
///
/// fn use_feed() -> InfiniteQueryResult<FeedPage, impl RefetchFn, impl FetchMoreFn> {
///     use_infinite_query(
///         fetch_feed,
///         |token| FeedParams {
///             cursor: token.and_then(|t| t.decode().ok()),
///         },
///         InfiniteQueryOptions::default()
///             .set_get_fetch_more(|last: &FeedPage, _all| {
///                 last.next_cursor.map(PageToken::new)
///             }),
///     )
/// }
/// ```
pub fn use_infinite_query<F, P, V, Fu>(
    query_fn: F,
    params_for: impl Fn(Option<PageToken>) -> P + Clone + 'static,
    options: InfiniteQueryOptions<V>,
) -> InfiniteQueryResult<V, impl RefetchFn, impl FetchMoreFn>
where
    F: Fn(P) -> Fu + 'static,
    P: QueryParams,
    // Pages are cached as one accumulated value, so they need their own
    // serde round trip on top of the usual value requirements.
    V: QueryValue + Serialize + DeserializeOwned + 'static,
    Fu: Future<Output = Result<V, QueryError>> + 'static,
{
    let get_fetch_more = options.get_fetch_more.clone().expect(
        "use_infinite_query requires a `get_fetch_more` function to derive the next page token",
    );

    let identity = QueryIdentity::sanitize(query_fn);

    // `fetch_more` dispatches outside the engine, so it checks the same gate
    // the engine's observers do.
    let gate = execution_gate(options.enabled);

    let key = {
        let identity = identity.clone();
        let params_for = params_for.clone();
        create_memo(move |_| {
            identity
                .key(&params_for(None))
                .expect("query parameters could not be serialized into a cache key")
                .with_discriminator(INFINITE_KEY_SEGMENT)
        })
    };

    // The engine only ever fetches the first page; later pages go through
    // `fetch_more` below.
    let fetcher: Fetcher<InfiniteData<V>> = {
        let identity = identity.clone();
        let params_for = params_for.clone();
        Rc::new(move |_key: CacheKey| {
            let page = identity.call(untrack(|| params_for(None)));
            Box::pin(async move {
                let first = page.await?;
                Ok(InfiniteData { pages: vec![first] })
            })
        })
    };

    let query_options = QueryOptions {
        default_value: options
            .default_pages
            .map(|pages| InfiniteData { pages }),
        stale_time: options.stale_time,
        gc_time: options.gc_time,
        refetch_interval: options.refetch_interval,
        resource_option: options.resource_option,
        enabled: options.enabled,
    };

    let result = use_cached_query(key, fetcher, query_options);
    let data = result.data;

    let more_error = RwSignal::new(None::<QueryError>);
    let is_fetching_more = RwSignal::new(false);

    let fetch_more = {
        let identity = identity.clone();
        let get_fetch_more = get_fetch_more.clone();
        let client = use_query_client();
        move || {
            // No dispatch while the router gate is closed or loads are
            // suppressed, same as engine-driven fetches.
            if !gate.get_untracked() || query_load_suppressed() {
                return;
            }
            if is_fetching_more.get_untracked() {
                return;
            }
            let Some(pages) = data.get_untracked().map(|data| data.pages) else {
                return;
            };
            let Some(last) = pages.last() else {
                return;
            };
            // An absent token still goes through the parameter mapping; the
            // caller decides what "no token" means for the next call.
            let token = get_fetch_more(last, &pages);
            let page = identity.call(untrack(|| params_for(token)));

            is_fetching_more.set(true);
            let key = key.get_untracked();
            let client = client.clone();
            spawn_local(async move {
                match page.await {
                    Ok(next) => {
                        client.update_query_data::<InfiniteData<V>>(key, move |current| {
                            let mut data = current.cloned().unwrap_or_default();
                            data.pages.push(next);
                            Some(data)
                        });
                        more_error.set(None);
                    }
                    Err(err) => more_error.set(Some(err)),
                }
                is_fetching_more.set(false);
            });
        }
    };

    let has_more = Signal::derive({
        let get_fetch_more = get_fetch_more.clone();
        move || {
            data.with(|data| match data {
                Some(data) => data
                    .pages
                    .last()
                    .map(|last| get_fetch_more(last, &data.pages).is_some())
                    .unwrap_or(false),
                None => false,
            })
        }
    });

    let first_page_error = result.error;

    InfiniteQueryResult {
        pages: Signal::derive(move || data.get().map(|data| data.pages)),
        state: result.state,
        error: Signal::derive(move || more_error.get().or_else(|| first_page_error.get())),
        is_loading: result.is_loading,
        is_fetching: result.is_fetching,
        is_fetching_more: is_fetching_more.into(),
        has_more,
        fetch_more,
        refetch: result.refetch,
        controls: result.controls,
    }
}

#[cfg(all(test, not(any(feature = "csr", feature = "hydrate"))))]
mod tests {
    use super::*;
    use crate::provide_query_client;

    #[derive(Clone, serde::Serialize)]
    struct FeedParams {
        cursor: Option<u64>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    struct FeedPage {
        entries: Vec<String>,
        next_cursor: Option<u64>,
    }

    async fn fetch_feed(_params: FeedParams) -> Result<FeedPage, QueryError> {
        unreachable!()
    }

    #[test]
    #[should_panic(expected = "get_fetch_more")]
    fn missing_get_fetch_more_panics_before_any_fetch() {
        let _ = create_runtime();
        provide_query_client();

        let _ = use_infinite_query(
            fetch_feed,
            |token: Option<PageToken>| FeedParams {
                cursor: token.and_then(|t| t.decode().ok()),
            },
            InfiniteQueryOptions::default(),
        );
    }

    #[test]
    fn page_token_round_trips_its_value() {
        let token = PageToken::new(42_u64);
        assert_eq!(token.decode::<u64>().unwrap(), 42);
        assert_eq!(token.as_value(), &serde_json::json!(42));
    }

    #[test]
    fn absent_token_maps_through_params() {
        let params_for = |token: Option<PageToken>| FeedParams {
            cursor: token.and_then(|t| t.decode().ok()),
        };
        assert_eq!(params_for(None).cursor, None);
        assert_eq!(params_for(Some(PageToken::new(7_u64))).cursor, Some(7));
    }

    fn counting_fetcher(
        calls: &std::rc::Rc<std::cell::Cell<u32>>,
    ) -> impl Fn(FeedParams) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<FeedPage, QueryError>>>>
           + Clone
           + 'static {
        let calls = calls.clone();
        move |_params: FeedParams| {
            calls.set(calls.get() + 1);
            Box::pin(async move {
                Ok(FeedPage {
                    entries: vec!["fetched".into()],
                    next_cursor: Some(1),
                })
            })
        }
    }

    fn seeded_options() -> InfiniteQueryOptions<FeedPage> {
        InfiniteQueryOptions {
            default_pages: Some(vec![FeedPage {
                entries: vec!["seed".into()],
                next_cursor: Some(1),
            }]),
            // Local resources never run on the server, so the seeded pages
            // stay visible to `fetch_more`.
            resource_option: Some(ResourceOption::Local),
            ..InfiniteQueryOptions::default()
        }
        .set_get_fetch_more(|last: &FeedPage, _all| last.next_cursor.map(PageToken::new))
    }

    #[test]
    fn fetch_more_holds_while_router_not_ready() {
        let _ = create_runtime();
        crate::provide_query_client();

        let (ready, _set_ready) = create_signal(false);
        crate::provide_router_ready(ready);

        let calls = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let fetch_feed = counting_fetcher(&calls);

        let result = use_infinite_query(
            fetch_feed.clone(),
            |token: Option<PageToken>| FeedParams {
                cursor: token.and_then(|t| t.decode().ok()),
            },
            seeded_options(),
        );

        assert_eq!(0, calls.get());

        (result.fetch_more)();

        assert_eq!(0, calls.get(), "no call may go out before the router is ready");
        assert!(!result.is_fetching_more.get_untracked());

        let key =
            crate::infinite_query_key(&fetch_feed, &FeedParams { cursor: None }).unwrap();
        assert!(matches!(
            use_query_client().peek_query_state::<InfiniteData<FeedPage>>(&key),
            Some(QueryState::Created)
        ));
    }

    #[test]
    fn fetch_more_holds_while_loads_are_suppressed() {
        let _ = create_runtime();
        crate::provide_query_client();
        crate::suppress_query_load(true);

        let calls = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let fetch_feed = counting_fetcher(&calls);

        let result = use_infinite_query(
            fetch_feed.clone(),
            |token: Option<PageToken>| FeedParams {
                cursor: token.and_then(|t| t.decode().ok()),
            },
            seeded_options(),
        );

        (result.fetch_more)();

        assert_eq!(0, calls.get(), "no call may go out while loads are suppressed");
        assert!(!result.is_fetching_more.get_untracked());

        crate::suppress_query_load(false);
    }

    #[test]
    fn accumulated_pages_append_in_order() {
        let mut data = InfiniteData::<FeedPage>::default();
        assert!(data.pages.is_empty());
        data.pages.push(FeedPage {
            entries: vec!["a".into()],
            next_cursor: Some(1),
        });
        data.pages.push(FeedPage {
            entries: vec!["b".into()],
            next_cursor: None,
        });
        assert_eq!(data.pages.len(), 2);
        assert_eq!(data.pages[1].next_cursor, None);
    }
}
