use std::{future::Future, pin::Pin, rc::Rc};

use serde::Serialize;

use crate::QueryError;

/// Discriminator segment appended to the keys of infinite queries, so that
/// list-shaped cache entries can never collide with the scalar entries of the
/// same query function and parameters.
pub const INFINITE_KEY_SEGMENT: &str = "infinite";

/// A cache key derived from a query function's identity and its call
/// parameters.
///
/// Keys are an ordered sequence of string segments: the query function's
/// `'static` type name followed by the serialized parameter token, with an
/// optional trailing discriminator for infinite queries.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub(crate) fn derive<P: Serialize>(query_fn_id: &str, params: &P) -> Result<Self, QueryError> {
        let token = serde_json::to_string(params)
            .map_err(|err| QueryError::InvalidParams(err.to_string()))?;
        Ok(CacheKey(vec![query_fn_id.to_string(), token]))
    }

    /// Returns a new key with `tag` appended as an extra segment.
    pub fn with_discriminator(&self, tag: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(tag.to_string());
        CacheKey(segments)
    }

    /// The ordered segments this key is made of.
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CacheKey").field(&self.0).finish()
    }
}

/// Derives the cache key used by [`use_query`](crate::use_query()) and
/// [`use_paginated_query`](crate::use_paginated_query()) for the given query
/// function and parameters.
///
/// Useful for invalidating or updating a query from outside a hook:
///
/// ```
/// use leptos_routed_query::{query_key, QueryError};
///
/// async fn get_user(id: u32) -> Result<String, QueryError> {
///     todo!()
/// }
///
/// let key = query_key(&get_user, &1).unwrap();
/// assert_eq!(key, query_key(&get_user, &1).unwrap());
/// ```
pub fn query_key<F, P>(_query_fn: &F, params: &P) -> Result<CacheKey, QueryError>
where
    P: Serialize,
{
    CacheKey::derive(std::any::type_name::<F>(), params)
}

/// Derives the cache key used by
/// [`use_infinite_query`](crate::use_infinite_query()): the
/// [`query_key`] derivation plus the [`INFINITE_KEY_SEGMENT`] discriminator.
pub fn infinite_query_key<F, P>(query_fn: &F, params: &P) -> Result<CacheKey, QueryError>
where
    P: Serialize,
{
    Ok(query_key(query_fn, params)?.with_discriminator(INFINITE_KEY_SEGMENT))
}

type BoxFetchFuture<V> = Pin<Box<dyn Future<Output = Result<V, QueryError>>>>;

/// A query function's identity: its type name (used for key derivation) plus
/// a sanitized, uniformly boxed version of the call itself.
pub(crate) struct QueryIdentity<P, V> {
    fn_id: &'static str,
    call: Rc<dyn Fn(P) -> BoxFetchFuture<V>>,
}

impl<P, V> Clone for QueryIdentity<P, V> {
    fn clone(&self) -> Self {
        Self {
            fn_id: self.fn_id,
            call: self.call.clone(),
        }
    }
}

impl<P, V> QueryIdentity<P, V>
where
    P: crate::QueryParams,
    V: 'static,
{
    /// Wraps the supplied query function so it is safe to invoke indirectly.
    pub(crate) fn sanitize<F, Fu>(query_fn: F) -> Self
    where
        F: Fn(P) -> Fu + 'static,
        Fu: Future<Output = Result<V, QueryError>> + 'static,
    {
        let fn_id = std::any::type_name::<F>();
        let call = Rc::new(move |params| Box::pin(query_fn(params)) as BoxFetchFuture<V>);
        Self { fn_id, call }
    }

    pub(crate) fn key(&self, params: &P) -> Result<CacheKey, QueryError> {
        CacheKey::derive(self.fn_id, params)
    }

    pub(crate) fn call(&self, params: P) -> BoxFetchFuture<V> {
        (self.call)(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get_user(_id: u32) -> Result<String, QueryError> {
        unreachable!()
    }

    async fn get_post(_id: u32) -> Result<String, QueryError> {
        unreachable!()
    }

    #[test]
    fn same_fn_and_params_derive_equal_keys() {
        let a = query_key(&get_user, &1).unwrap();
        let b = query_key(&get_user, &1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_params_derive_distinct_keys() {
        let a = query_key(&get_user, &1).unwrap();
        let b = query_key(&get_user, &2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_fns_derive_distinct_keys() {
        let a = query_key(&get_user, &1).unwrap();
        let b = query_key(&get_post, &1).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn infinite_key_differs_by_exactly_the_discriminator() {
        let plain = query_key(&get_user, &1).unwrap();
        let infinite = infinite_query_key(&get_user, &1).unwrap();

        assert_ne!(plain, infinite);
        assert_eq!(infinite.segments().len(), plain.segments().len() + 1);
        assert_eq!(
            &infinite.segments()[..plain.segments().len()],
            plain.segments()
        );
        assert_eq!(
            infinite.segments().last().map(String::as_str),
            Some(INFINITE_KEY_SEGMENT)
        );
    }

    #[test]
    fn identity_key_matches_public_derivation() {
        let identity = QueryIdentity::sanitize(get_user);
        assert_eq!(
            identity.key(&7).unwrap(),
            query_key(&get_user, &7).unwrap()
        );
    }
}
