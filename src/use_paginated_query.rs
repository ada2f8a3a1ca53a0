use std::future::Future;
use std::rc::Rc;

use leptos::*;

use crate::cache_key::QueryIdentity;
use crate::query_observer::Fetcher;
use crate::use_query::use_cached_query;
use crate::{
    CacheKey, QueryError, QueryOptions, QueryParams, QueryResult, QueryValue, RefetchFn,
};

/// Creates a paginated query. Identical to [`use_query`](crate::use_query()),
/// except that the previous page's resolved data stays visible while the next
/// page loads, so paging through results does not flicker back to a loading
/// state.
///
/// Pages share cache keys with [`use_query`](crate::use_query()): calling
/// both with the same query function and parameters hits the same cache
/// entry.
///
/// Example
/// ```
/// use leptos::*;
/// use leptos_routed_query::*;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize)]
/// struct PageParams {
///     page: u32,
/// }
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct ItemPage {
///     items: Vec<String>,
/// }
///
/// async fn list_items(params: PageParams) -> Result<ItemPage, QueryError> {
///     todo!()
/// }
///
/// fn use_item_page(page: RwSignal<u32>) -> QueryResult<ItemPage, impl RefetchFn> {
///     use_paginated_query(
///         list_items,
///         move || PageParams { page: page.get() },
///         QueryOptions::default(),
///     )
/// }
/// ```
pub fn use_paginated_query<F, P, V, Fu>(
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

    let fetcher: Fetcher<V> = Rc::new(move |_key: CacheKey| identity.call(untrack(|| params())));

    let result = use_cached_query(key, fetcher, options);

    // Hold on to the last resolved page so a key change does not blank the
    // data while the new page is in flight.
    let previous = RwSignal::new(None::<V>);
    let data = result.data;
    create_isomorphic_effect(move |_| {
        if let Some(value) = data.get() {
            previous.set(Some(value));
        }
    });

    QueryResult {
        // `previous` only changes in lockstep with `data`, which is already
        // tracked.
        data: Signal::derive(move || data.get().or_else(|| previous.get_untracked())),
        ..result
    }
}
