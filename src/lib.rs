#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! # About Routed Query
//!
//! Leptos Routed Query is an asynchronous state management library for
//! [Leptos](https://github.com/leptos-rs/leptos), built for applications
//! where data fetching must wait for the router.
//!
//! Queries are useful for data fetching, caching, and synchronization with
//! server state.
//!
//! A query provides:
//! - caching with automatic key derivation from the query function
//! - de-duplication
//! - invalidation
//! - background refetching
//! - refetch intervals
//! - memory management with cache lifetimes
//! - router-aware execution: no fetch runs until the router reports ready
//! - pagination and infinite lists
//!
//! ## The main entry points are:
//! - [`use_query`](crate::use_query()) - a single query keyed by a function
//!   and its parameters.
//! - [`use_paginated_query`](crate::use_paginated_query()) - like
//!   `use_query`, but the previous page stays visible while the next loads.
//! - [`use_infinite_query`](crate::use_infinite_query()) - accumulates pages
//!   into one cache entry, with a `fetch_more` callback.
//!
//! # Feature Flags
//! - `csr` Client-side rendering: Use queries on the client.
//! - `ssr` Server-side rendering: Initiate queries on the server.
//! - `hydrate` Hydration: Ensure that queries are hydrated on the client,
//!   when using server-side rendering.
//!
//! # A Simple Example
//!
//! In the root of your App, provide a query client with
//! [provide_query_client] or [provide_query_client_with_options], and wire
//! the router-ready signal with [provide_router_ready]:
//!
//! ```rust
//! use leptos::*;
//! use leptos_routed_query::*;
//!
//! #[component]
//! pub fn App() -> impl IntoView {
//!     // Provides the query client for the entire app.
//!     provide_query_client();
//!
//!     // Queries wait for this signal before fetching. Without it, queries
//!     // run immediately.
//!     let (router_ready, _set_router_ready) = create_signal(false);
//!     provide_router_ready(router_ready);
//!
//!     // Rest of App...
//! }
//! ```
//!
//! Then use a query in any component:
//!
//! ```rust
//! use leptos::*;
//! use leptos_routed_query::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize)]
//! struct TrackId(i32);
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct TrackData {
//!     name: String,
//! }
//!
//! async fn get_track(id: TrackId) -> Result<TrackData, QueryError> {
//!     todo!()
//! }
//!
//! #[component]
//! fn TrackView(id: i32) -> impl IntoView {
//!     let QueryResult { data, .. } = use_query(
//!         get_track,
//!         move || TrackId(id),
//!         QueryOptions::default(),
//!     );
//!
//!     view! {
//!        <div>
//!            // Query data should be read inside a Transition/Suspense component.
//!            <Transition
//!                fallback=move || {
//!                    view! { <h2>"Loading..."</h2> }
//!                }>
//!                {move || {
//!                     data
//!                         .get()
//!                         .map(|track| {
//!                            view! { <h2>{track.name}</h2> }
//!                         })
//!                }}
//!            </Transition>
//!        </div>
//!     }
//! }
//! ```

mod cache_key;
mod error;
mod garbage_collector;
mod instant;
mod query;
mod query_cache;
mod query_client;
mod query_executor;
mod query_observer;
mod query_options;
mod query_result;
mod query_state;
mod router_ready;
mod use_infinite_query;
mod use_paginated_query;
mod use_query;
mod util;

pub use cache_key::{infinite_query_key, query_key, CacheKey, INFINITE_KEY_SEGMENT};
pub use error::*;
pub use instant::*;
pub use query_client::*;
pub use query_executor::suppress_query_load;
pub use query_options::*;
pub use query_result::*;
pub use query_state::*;
pub use router_ready::{provide_router_ready, use_router_ready, RouterReady};
pub use use_infinite_query::*;
pub use use_paginated_query::*;
pub use use_query::{use_query, ResourceData};

/// Convenience trait for query parameter requirements.
pub trait QueryParams: Clone + serde::Serialize + 'static {}
impl<P> QueryParams for P where P: Clone + serde::Serialize + 'static {}

/// Convenience trait for query value requirements.
pub trait QueryValue: std::fmt::Debug + Clone + leptos::Serializable {}
impl<V> QueryValue for V where V: std::fmt::Debug + Clone + leptos::Serializable {}
