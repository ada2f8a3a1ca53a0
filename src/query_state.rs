use crate::{Instant, QueryError};

/// The lifecycle of a query.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum QueryState<V> {
    /// Query has been created but no fetch has been dispatched yet.
    ///
    /// A query stays in this state while its execution gate is closed, e.g.
    /// while the router-ready signal is false.
    #[default]
    Created,

    /// Query is fetching for the first time.
    Loading,

    /// Query is fetching again. The associated [`QueryData`] holds the
    /// previously resolved value, which stays readable during the refetch.
    Fetching(QueryData<V>),

    /// Query has successfully completed a fetch.
    Loaded(QueryData<V>),

    /// Query has completed a fetch, but the data has been marked invalid and
    /// will be refetched in the background while it has active observers.
    Invalid(QueryData<V>),

    /// The most recent fetch failed. The error is surfaced as-is; no retry
    /// happens at this layer.
    Errored(QueryError),
}

impl<V> QueryState<V> {
    /// Returns the QueryData for the current state, if present.
    pub fn query_data(&self) -> Option<&QueryData<V>> {
        match self {
            QueryState::Created | QueryState::Loading | QueryState::Errored(_) => None,
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Some(data)
            }
        }
    }

    /// Returns the resolved data, if present.
    pub fn data(&self) -> Option<&V> {
        self.query_data().map(|d| &d.data)
    }

    /// Returns the fetch error, if the last fetch failed.
    pub fn error(&self) -> Option<&QueryError> {
        match self {
            QueryState::Errored(error) => Some(error),
            _ => None,
        }
    }

    /// Returns the last updated timestamp, if present.
    pub fn updated_at(&self) -> Option<Instant> {
        self.query_data().map(|d| d.updated_at)
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut V> {
        match self {
            QueryState::Created | QueryState::Loading | QueryState::Errored(_) => None,
            QueryState::Fetching(data) | QueryState::Loaded(data) | QueryState::Invalid(data) => {
                Some(&mut data.data)
            }
        }
    }
}

impl<V> std::fmt::Debug for QueryState<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Loading => write!(f, "Loading"),
            Self::Fetching(arg0) => f.debug_tuple("Fetching").field(arg0).finish(),
            Self::Loaded(arg0) => f.debug_tuple("Loaded").field(arg0).finish(),
            Self::Invalid(arg0) => f.debug_tuple("Invalid").field(arg0).finish(),
            Self::Errored(arg0) => f.debug_tuple("Errored").field(arg0).finish(),
        }
    }
}

/// The latest resolved data for a query.
#[derive(Clone, PartialEq, Eq)]
pub struct QueryData<V> {
    /// The data.
    pub data: V,
    /// The instant this data was resolved.
    pub updated_at: Instant,
}

impl<V> QueryData<V> {
    /// Creates a new QueryData stamped with the current time.
    pub fn now(data: V) -> Self {
        Self {
            data,
            updated_at: Instant::now(),
        }
    }
}

impl<V> std::fmt::Debug for QueryData<V>
where
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryData")
            .field("data", &self.data)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
