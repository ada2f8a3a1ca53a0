use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use futures_channel::oneshot;

use crate::{
    garbage_collector::GarbageCollector,
    query_executor::spawn_execute,
    query_observer::{Fetcher, ObserverKey, QueryObserver},
    util::time_until_stale,
    CacheKey, QueryState, QueryValue,
};

/// One cache entry: the shared state for a single derived cache key.
#[derive(Clone)]
pub(crate) struct Query<V> {
    key: CacheKey,

    // Cancellation handle for the in-flight fetch, if any.
    current_request: Rc<Cell<Option<oneshot::Sender<()>>>>,

    state: Rc<Cell<QueryState<V>>>,

    observers: Rc<RefCell<HashMap<ObserverKey, QueryObserver<V>>>>,
    garbage_collector: Rc<GarbageCollector<V>>,
}

impl<V> PartialEq for Query<V> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<V> Eq for Query<V> {}

impl<V> Query<V>
where
    V: QueryValue + 'static,
{
    pub(crate) fn new(key: CacheKey) -> Self {
        Query {
            key: key.clone(),
            current_request: Rc::new(Cell::new(None)),
            state: Rc::new(Cell::new(QueryState::Created)),
            observers: Rc::new(RefCell::new(HashMap::new())),
            garbage_collector: Rc::new(GarbageCollector::new(key)),
        }
    }

    pub(crate) fn get_key(&self) -> &CacheKey {
        &self.key
    }

    pub(crate) fn set_state(&self, state: QueryState<V>) {
        {
            let observers = self.observers.try_borrow().expect("set_state borrow");
            for observer in observers.values() {
                observer.notify(state.clone())
            }
        }

        if let Some(updated_at) = state.updated_at() {
            self.garbage_collector.new_update(updated_at);
        }

        let invalid = matches!(state, QueryState::Invalid(_));

        self.state.set(state);

        // Invalidated queries refetch in the background while observed.
        if invalid {
            self.execute();
        }
    }

    pub(crate) fn update_state(&self, update_fn: impl FnOnce(&mut QueryState<V>)) {
        let mut state = self.state.take();
        update_fn(&mut state);
        self.set_state(state);
    }

    /// If `update_fn` returns Ok(_) the state is updated and subscribers are
    /// notified. If it returns Err(_) nothing happens; Err(_) must contain
    /// the previous state.
    pub(crate) fn maybe_map_state(
        &self,
        update_fn: impl FnOnce(QueryState<V>) -> Result<QueryState<V>, QueryState<V>>,
    ) -> bool {
        let current_state = self.state.take();

        match update_fn(current_state) {
            Ok(new_state) => {
                self.set_state(new_state);
                true
            }
            Err(old_state) => {
                self.state.set(old_state);
                false
            }
        }
    }

    /// Marks the data as invalid, causing a background refetch while the
    /// query has active observers.
    pub(crate) fn mark_invalid(&self) -> bool {
        let mut updated = false;
        self.maybe_map_state(|state| {
            if let QueryState::Loaded(data) = state {
                updated = true;
                Ok(QueryState::Invalid(data))
            } else {
                Err(state)
            }
        });
        updated
    }

    pub(crate) fn subscribe(&self, observer: &QueryObserver<V>) {
        let mut observers = self
            .observers
            .try_borrow_mut()
            .expect("subscribe borrow_mut");
        observers.insert(observer.get_id(), observer.clone());
        self.garbage_collector.disable_gc();
    }

    pub(crate) fn unsubscribe(&self, observer: &QueryObserver<V>) {
        let mut observers = self
            .observers
            .try_borrow_mut()
            .expect("unsubscribe borrow_mut");
        observers.remove(&observer.get_id());
        if observers.is_empty() {
            self.garbage_collector.enable_gc();
        }
    }

    pub(crate) fn get_state(&self) -> QueryState<V> {
        let state = self.state.take();
        let state_clone = state.clone();
        self.state.set(state);
        state_clone
    }

    // Useful to avoid clones.
    pub(crate) fn with_state<T>(&self, func: impl FnOnce(&QueryState<V>) -> T) -> T {
        let state = self.state.take();
        let result = func(&state);
        self.state.set(state);
        result
    }

    /// Dispatches a fetch, provided some observer's execution gate is open.
    /// No-op when a fetch is already in flight.
    pub(crate) fn execute(&self) {
        let fetcher: Option<Fetcher<V>> = self
            .observers
            .try_borrow()
            .expect("execute borrow")
            .values()
            .find_map(|o| o.get_fetcher());

        if let Some(fetcher) = fetcher {
            spawn_execute(self.clone(), fetcher);
        }
    }

    // Only one request may be in flight at a time.
    pub(crate) fn new_execution(&self) -> Option<oneshot::Receiver<()>> {
        let current_request = self.current_request.take();
        if current_request.is_none() {
            let (sender, receiver) = oneshot::channel();
            self.current_request.set(Some(sender));
            Some(receiver)
        } else {
            self.current_request.set(current_request);
            None
        }
    }

    pub(crate) fn finalize_execution(&self) {
        self.current_request.set(None);
    }

    pub(crate) fn cancel(&self) -> bool {
        if let Some(current_request) = self.current_request.take() {
            let cancellation = current_request.send(());
            if cancellation.is_err() {
                leptos::logging::error!("Failed to cancel request {:?}", self.key);
            }
            cancellation.is_ok()
        } else {
            false
        }
    }

    pub(crate) fn is_stale(&self, stale_time: Option<Duration>) -> bool {
        let last_update = self.with_state(|state| state.updated_at());

        match (last_update, stale_time) {
            (Some(updated_at), Some(stale_time)) => {
                time_until_stale(updated_at, stale_time).is_zero()
            }
            _ => false,
        }
    }

    pub(crate) fn update_gc_time(&self, gc_time: Option<Duration>) {
        self.garbage_collector.update_gc_time(gc_time);
    }
}
