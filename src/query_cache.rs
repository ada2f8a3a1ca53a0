use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::{hash_map::Entry, HashMap},
    rc::Rc,
};

use leptos::*;

use crate::{query::Query, CacheKey, QueryValue};

/// Cache store: one type-erased entry map per value type, each mapping
/// derived [`CacheKey`]s to live queries.
#[derive(Clone)]
pub(crate) struct QueryCache {
    owner: Owner,
    cache: Rc<RefCell<HashMap<TypeId, Box<dyn CacheEntryTrait>>>>,
    size: RwSignal<usize>,
}

pub(crate) struct CacheEntry<V>(HashMap<CacheKey, Query<V>>);

// Trait to enable cache introspection among distinct cache entry maps.
pub(crate) trait CacheEntryTrait: CacheSize + CacheInvalidate + CacheClear {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<V> CacheEntryTrait for CacheEntry<V>
where
    V: QueryValue + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) trait CacheSize {
    fn size(&self) -> usize;
}

impl<V> CacheSize for CacheEntry<V> {
    fn size(&self) -> usize {
        self.0.len()
    }
}

pub(crate) trait CacheInvalidate {
    fn invalidate(&self);
}

impl<V> CacheInvalidate for CacheEntry<V>
where
    V: QueryValue + 'static,
{
    fn invalidate(&self) {
        for query in self.0.values() {
            query.mark_invalid();
        }
    }
}

pub(crate) trait CacheClear {
    fn clear(&mut self);
}

impl<V> CacheClear for CacheEntry<V> {
    fn clear(&mut self) {
        self.0.clear();
    }
}

impl QueryCache {
    pub(crate) fn new(owner: Owner) -> Self {
        Self {
            owner,
            cache: Rc::new(RefCell::new(HashMap::new())),
            size: RwSignal::new(0),
        }
    }

    pub(crate) fn get_or_create_query<V>(&self, key: CacheKey) -> Query<V>
    where
        V: QueryValue + 'static,
    {
        let owner = self.owner;
        let (query, created) = self.use_cache(move |cache| {
            let (query, created) = match cache.entry(key.clone()) {
                Entry::Occupied(entry) => (entry.into_mut(), false),
                Entry::Vacant(entry) => {
                    // Tie the query's lifetime to the client's owner, not the
                    // component that happened to create it.
                    let query = with_owner(owner, || Query::new(key));
                    (entry.insert(query), true)
                }
            };
            (query.clone(), created)
        });

        if created {
            self.size.set(self.size.get_untracked() + 1);
        }

        query
    }

    pub(crate) fn get_query<V>(&self, key: &CacheKey) -> Option<Query<V>>
    where
        V: QueryValue + 'static,
    {
        let key = key.clone();
        self.use_cache_option_mut(move |cache| cache.get(&key).cloned())
    }

    pub(crate) fn get_query_signal<V>(
        &self,
        key: impl Fn() -> CacheKey + 'static,
    ) -> Memo<Query<V>>
    where
        V: QueryValue + 'static,
    {
        let cache = self.clone();

        // This memo is crucial to avoid crazy amounts of lookups.
        create_memo(move |_| cache.get_or_create_query(key()))
    }

    pub(crate) fn size(&self) -> Signal<usize> {
        self.size.into()
    }

    pub(crate) fn evict_query<V>(&self, key: &CacheKey) -> bool
    where
        V: QueryValue + 'static,
    {
        let key = key.clone();
        let result = self.use_cache_option_mut::<V, _, _>(move |cache| cache.remove(&key));

        if result.is_some() {
            self.size.set(self.size.get_untracked() - 1);
            true
        } else {
            false
        }
    }

    pub(crate) fn invalidate_all_queries(&self) {
        for entry in RefCell::try_borrow(&self.cache)
            .expect("invalidate_all_queries borrow")
            .values()
        {
            entry.invalidate();
        }
    }

    pub(crate) fn clear_all_queries(&self) {
        for entry in RefCell::try_borrow_mut(&self.cache)
            .expect("clear_all_queries borrow_mut")
            .values_mut()
        {
            entry.clear();
        }
        self.size.set(0);
    }

    pub(crate) fn use_cache_option<V, F, R>(&self, func: F) -> Option<R>
    where
        V: QueryValue + 'static,
        F: FnOnce(&HashMap<CacheKey, Query<V>>) -> Option<R>,
        R: 'static,
    {
        let cache = RefCell::try_borrow(&self.cache).expect("use_cache_option borrow");
        let entry = cache.get(&TypeId::of::<V>())?;
        let entry = entry
            .as_any()
            .downcast_ref::<CacheEntry<V>>()
            .expect(EXPECT_CACHE_ERROR);
        func(&entry.0)
    }

    pub(crate) fn use_cache_option_mut<V, F, R>(&self, func: F) -> Option<R>
    where
        V: QueryValue + 'static,
        F: FnOnce(&mut HashMap<CacheKey, Query<V>>) -> Option<R>,
        R: 'static,
    {
        let mut cache = RefCell::try_borrow_mut(&self.cache).expect("use_cache_option_mut borrow");
        let entry = cache.get_mut(&TypeId::of::<V>())?;
        let entry = entry
            .as_any_mut()
            .downcast_mut::<CacheEntry<V>>()
            .expect(EXPECT_CACHE_ERROR);
        func(&mut entry.0)
    }

    pub(crate) fn use_cache<V, R>(
        &self,
        func: impl FnOnce(&mut HashMap<CacheKey, Query<V>>) -> R,
    ) -> R
    where
        V: QueryValue + 'static,
    {
        let mut cache = RefCell::try_borrow_mut(&self.cache).expect("use_cache borrow_mut");

        let entry: &mut Box<dyn CacheEntryTrait> = match cache.entry(TypeId::of::<V>()) {
            Entry::Occupied(o) => o.into_mut(),
            Entry::Vacant(v) => {
                let wrapped: CacheEntry<V> = CacheEntry(HashMap::new());
                v.insert(Box::new(wrapped))
            }
        };

        let entry: &mut CacheEntry<V> = entry
            .as_any_mut()
            .downcast_mut::<CacheEntry<V>>()
            .expect(EXPECT_CACHE_ERROR);

        func(&mut entry.0)
    }

    /// Operates on the entry for `key`, creating the per-type map on demand.
    /// `func` must return true if it inserted a new query.
    pub(crate) fn use_cache_entry<V>(
        &self,
        key: CacheKey,
        func: impl FnOnce((Owner, Entry<'_, CacheKey, Query<V>>)) -> bool,
    ) where
        V: QueryValue + 'static,
    {
        let owner = self.owner;
        let inserted = self.use_cache(|cache| func((owner, cache.entry(key))));

        if inserted {
            self.size.set(self.size.get_untracked() + 1);
        }
    }
}

const EXPECT_CACHE_ERROR: &str =
    "Error: Query Cache Type Mismatch. This should not happen. Please file a bug report.";
