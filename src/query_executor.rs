use std::cell::Cell;

use futures_channel::oneshot;
use leptos::*;

use crate::{query::Query, query_observer::Fetcher, QueryData, QueryState, QueryValue};

thread_local! {
    static SUPPRESS_QUERY_LOAD: Cell<bool> = Cell::new(false);
}

/// Disable or enable query loading.
///
/// Useful for disabling query loads during app introspection, such as SSR
/// router integrations for Actix/Axum that walk the route tree to generate
/// the route list. Queries encountered while suppressed are left in
/// [`QueryState::Created`] and fetch normally on the client.
pub fn suppress_query_load(suppress: bool) {
    SUPPRESS_QUERY_LOAD.with(|s| s.set(suppress));
}

pub(crate) fn query_load_suppressed() -> bool {
    SUPPRESS_QUERY_LOAD.with(|s| s.get())
}

// Runs one fetch in `spawn_local`, driving the query's state machine.
pub(crate) fn spawn_execute<V>(query: Query<V>, fetcher: Fetcher<V>)
where
    V: QueryValue + 'static,
{
    if query_load_suppressed() {
        return;
    }
    spawn_local(async move { run_fetch(query, fetcher).await });
}

pub(crate) async fn run_fetch<V>(query: Query<V>, fetcher: Fetcher<V>)
where
    V: QueryValue + 'static,
{
    let Some(cancellation) = query.new_execution() else {
        return;
    };

    match query.get_state() {
        // First load, or a retry after an error.
        QueryState::Created | QueryState::Loading | QueryState::Errored(_) => {
            query.set_state(QueryState::Loading);
            let fetch = std::pin::pin!(fetcher(query.get_key().clone()));
            match execute_with_cancellation(fetch, cancellation).await {
                Ok(Ok(data)) => {
                    query.set_state(QueryState::Loaded(QueryData::now(data)));
                }
                Ok(Err(error)) => {
                    query.set_state(QueryState::Errored(error));
                }
                Err(_) => {
                    logging::error!("Initial fetch was cancelled!");
                    query.set_state(QueryState::Created);
                }
            }
        }
        // Subsequent loads keep the previous data visible while fetching.
        QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
            query.set_state(QueryState::Fetching(data));
            let fetch = std::pin::pin!(fetcher(query.get_key().clone()));
            match execute_with_cancellation(fetch, cancellation).await {
                Ok(Ok(data)) => {
                    query.set_state(QueryState::Loaded(QueryData::now(data)));
                }
                Ok(Err(error)) => {
                    query.set_state(QueryState::Errored(error));
                }
                Err(_) => {
                    query.maybe_map_state(|state| {
                        if let QueryState::Fetching(data) = state {
                            Ok(QueryState::Loaded(data))
                        } else {
                            Err(state)
                        }
                    });
                }
            }
        }
    }
    query.finalize_execution()
}

async fn execute_with_cancellation<V, Fu>(
    fut: Fu,
    cancellation: oneshot::Receiver<()>,
) -> Result<V, ()>
where
    Fu: std::future::Future<Output = V> + Unpin,
{
    cfg_if::cfg_if! {
        if #[cfg(any(feature = "hydrate", feature = "csr"))] {
            use futures::future::Either;

            let result = futures::future::select(fut, cancellation).await;

            match result {
                Either::Left((result, _)) => Ok(result),
                Either::Right((cancelled, _)) => {
                    if cancelled.is_err() {
                        logging::debug_warn!("Query cancellation was incorrectly dropped.");
                    }

                    Err(())
                },
            }
        // No cancellation on the server.
        } else {
            let _ = cancellation;
            let result = fut.await;
            Ok(result)
        }
    }
}
