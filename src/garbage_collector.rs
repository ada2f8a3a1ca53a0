use std::{cell::Cell, marker::PhantomData, time::Duration};

use leptos::leptos_dom::helpers::{set_timeout_with_handle, TimeoutHandle};

use crate::{util::time_until_stale, CacheKey, Instant, QueryValue};

/// Evicts a cache entry once it has been without observers for its gc_time.
///
/// Armed when the last observer unsubscribes, cleared when a new one
/// subscribes or when fresh data arrives.
pub(crate) struct GarbageCollector<V> {
    key: CacheKey,
    gc_time: Cell<Option<Duration>>,
    updated_at: Cell<Option<Instant>>,
    handle: Cell<Option<TimeoutHandle>>,
    _value: PhantomData<V>,
}

impl<V> GarbageCollector<V>
where
    V: QueryValue + 'static,
{
    pub(crate) fn new(key: CacheKey) -> Self {
        Self {
            key,
            gc_time: Cell::new(None),
            updated_at: Cell::new(None),
            handle: Cell::new(None),
            _value: PhantomData,
        }
    }

    /// Keep the max gc time of all observers.
    pub(crate) fn update_gc_time(&self, gc_time: Option<Duration>) {
        match (self.gc_time.get(), gc_time) {
            (Some(current), Some(new)) if new > current => self.gc_time.set(Some(new)),
            (None, Some(new)) => self.gc_time.set(Some(new)),
            _ => {}
        }
    }

    pub(crate) fn new_update(&self, updated_at: Instant) {
        self.updated_at.set(Some(updated_at));
        // Re-arm a pending eviction against the fresh timestamp.
        if self.handle.get().is_some() {
            self.disable_gc();
            self.enable_gc();
        }
    }

    pub(crate) fn enable_gc(&self) {
        if self.handle.get().is_some() {
            return;
        }

        if let (Some(gc_time), Some(updated_at)) = (self.gc_time.get(), self.updated_at.get()) {
            let time_until_gc = time_until_stale(updated_at, gc_time);
            let key = self.key.clone();
            let new_handle = set_timeout_with_handle(
                move || {
                    let client = crate::use_query_client();
                    client.cache.evict_query::<V>(&key);
                },
                time_until_gc,
            )
            .ok();

            self.handle.set(new_handle);
        }
    }

    pub(crate) fn disable_gc(&self) {
        if let Some(handle) = self.handle.take() {
            handle.clear();
        }
    }
}
