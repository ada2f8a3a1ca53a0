use std::cell::{Cell, RefCell};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::{pin::Pin, rc::Rc};

use leptos::{logging, Signal, SignalGetUntracked};
use slotmap::{new_key_type, SlotMap};

use crate::query::Query;
use crate::{CacheKey, QueryError, QueryOptions, QueryState, QueryValue};

/// One hook invocation's subscription to a query.
///
/// Holds the sanitized fetcher together with its execution gate, and fans
/// query state changes out to its listeners. The gate check in
/// [`get_fetcher`](Self::get_fetcher) is the single place where the
/// router-ready ordering guarantee is enforced: a closed gate means no
/// fetcher, and no fetcher means no dispatch.
pub(crate) struct QueryObserver<V> {
    id: ObserverKey,
    query: Rc<Cell<Option<Query<V>>>>,
    fetcher: Option<Fetcher<V>>,
    gate: Signal<bool>,
    options: QueryOptions<V>,
    #[allow(clippy::type_complexity)]
    listeners: Rc<RefCell<SlotMap<ListenerKey, Box<dyn Fn(&QueryState<V>)>>>>,
}

impl<V: Clone> Clone for QueryObserver<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            query: self.query.clone(),
            fetcher: self.fetcher.clone(),
            gate: self.gate,
            options: self.options.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<V> std::fmt::Debug for QueryObserver<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("id", &self.id)
            .field("fetcher", &"...")
            .field("listeners", &"...")
            .finish()
    }
}

new_key_type! {
    pub(crate) struct ListenerKey;
}

pub(crate) type Fetcher<V> =
    Rc<dyn Fn(CacheKey) -> Pin<Box<dyn Future<Output = Result<V, QueryError>>>>>;

impl<V> QueryObserver<V>
where
    V: QueryValue + 'static,
{
    pub fn with_fetcher<F, Fu>(
        fetcher: F,
        gate: Signal<bool>,
        options: QueryOptions<V>,
        query: Query<V>,
    ) -> Self
    where
        F: Fn(CacheKey) -> Fu + 'static,
        Fu: Future<Output = Result<V, QueryError>> + 'static,
    {
        let fetcher = Some(Rc::new(move |key| {
            Box::pin(fetcher(key)) as Pin<Box<dyn Future<Output = Result<V, QueryError>>>>
        }) as Fetcher<V>);

        Self {
            id: next_id(),
            query: Rc::new(Cell::new(Some(query))),
            fetcher,
            gate,
            options,
            listeners: Rc::new(RefCell::new(SlotMap::with_key())),
        }
    }

    /// A passive observer: subscribes to state changes without ever fetching.
    pub fn no_fetcher(options: QueryOptions<V>, query: Option<Query<V>>) -> Self {
        Self {
            id: next_id(),
            query: Rc::new(Cell::new(query)),
            fetcher: None,
            gate: Signal::derive(|| false),
            options,
            listeners: Rc::new(RefCell::new(SlotMap::with_key())),
        }
    }

    /// Returns the fetcher only while the execution gate is open.
    pub fn get_fetcher(&self) -> Option<Fetcher<V>> {
        if self.gate.get_untracked() {
            self.fetcher.clone()
        } else {
            None
        }
    }

    pub fn get_id(&self) -> ObserverKey {
        self.id
    }

    pub fn notify(&self, state: QueryState<V>) {
        let listeners = self.listeners.try_borrow().expect("notify borrow");
        for listener in listeners.values() {
            listener(&state);
        }
    }

    pub fn add_listener(&self, listener: impl Fn(&QueryState<V>) + 'static) -> ListenerKey {
        self.listeners
            .try_borrow_mut()
            .expect("add_listener borrow_mut")
            .insert(Box::new(listener))
    }

    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        self.listeners
            .try_borrow_mut()
            .expect("remove_listener borrow_mut")
            .remove(key)
            .is_some()
    }

    /// Switches this observer to a (possibly new) query, keeping the query's
    /// subscription list and gc budget in sync, and kicks off a fetch when the
    /// new query is stale or never ran.
    pub fn update_query(&self, query: Option<Query<V>>) {
        if let Some(current_query) = self.query.take() {
            current_query.unsubscribe(self);
        }

        if let Some(query) = query {
            query.subscribe(self);
            query.update_gc_time(self.options.gc_time);
            self.query.set(Some(query));

            self.with_query(|q| {
                if q.is_stale(self.options.stale_time) {
                    q.execute()
                }
            });
            self.with_query(|q| {
                if q.with_state(|state| matches!(state, QueryState::Created)) {
                    q.execute()
                }
            });
        }
    }

    pub fn cleanup(&self) {
        if let Some(query) = self.query.take() {
            query.unsubscribe(self);
        } else {
            logging::debug_warn!("QueryObserver::cleanup: QueryObserver::query is None")
        }
        if !self
            .listeners
            .try_borrow()
            .expect("cleanup borrow")
            .is_empty()
        {
            logging::debug_warn!("QueryObserver::cleanup: QueryObserver::listeners is not empty");
        }
    }

    fn with_query<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Query<V>) -> R,
    {
        let query = self.query.take().expect("Query To Exist");
        let result = f(&query);
        self.query.set(Some(query));
        result
    }
}

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObserverKey(u32);

fn next_id() -> ObserverKey {
    ObserverKey(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

#[cfg(all(test, not(any(feature = "csr", feature = "hydrate"))))]
mod tests {
    use super::*;
    use crate::router_ready::execution_gate;
    use crate::{
        provide_query_client, provide_router_ready, query_key, use_query_client, QueryError,
    };
    use leptos::*;
    use std::cell::Cell;

    async fn fetch_name(_id: u32) -> Result<String, QueryError> {
        unreachable!()
    }

    #[test]
    fn no_dispatch_until_router_is_ready() {
        let _ = create_runtime();
        provide_query_client();

        let (ready, set_ready) = create_signal(false);
        provide_router_ready(ready);

        let key = query_key(&fetch_name, &1).unwrap();
        let query = use_query_client()
            .cache
            .get_or_create_query::<String>(key);

        let calls = Rc::new(Cell::new(0u32));
        let observer = QueryObserver::with_fetcher(
            {
                let calls = calls.clone();
                move |_key: crate::CacheKey| {
                    calls.set(calls.get() + 1);
                    async move { Ok("Alice".to_string()) }
                }
            },
            execution_gate(None),
            crate::QueryOptions::default(),
            query.clone(),
        );

        // A closed gate means no fetcher, and no fetcher means no dispatch.
        assert!(observer.get_fetcher().is_none());

        observer.update_query(Some(query.clone()));
        query.execute();

        assert_eq!(0, calls.get());
        assert!(query.with_state(|state| matches!(state, QueryState::Created)));

        set_ready.set(true);
        assert!(observer.get_fetcher().is_some());

        query.execute();

        assert_eq!(1, calls.get());
        assert!(query.with_state(|state| matches!(state, QueryState::Loaded(_))));
    }
}
