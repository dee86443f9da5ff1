//! Request-scoped loader registry.
//!
//! Loaders are keyed by `(request id, selection site)`. The site is the
//! response path of the field selection with list indices removed, so the
//! same selection resolved under many parents shares one loader (and its
//! batch), while the same relation selected at two places in the query gets
//! two loaders. A registry is created for one request and dropped with it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use uuid::Uuid;

use crate::error::LoadError;

/// Identifies one incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A field selection's position in the query, e.g. `users.posts.author`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteId(Arc<str>);

impl SiteId {
    pub fn root(response_key: &str) -> Self {
        SiteId(Arc::from(response_key))
    }

    pub fn child(&self, response_key: &str) -> Self {
        SiteId(Arc::from(format!("{}.{}", self.0, response_key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SiteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LoaderKey {
    request: RequestId,
    site: SiteId,
}

/// Maps selection sites to their loaders for one request.
pub struct LoaderRegistry {
    request: RequestId,
    loaders: Mutex<HashMap<LoaderKey, Arc<dyn Any + Send + Sync>>>,
}

impl LoaderRegistry {
    pub fn new(request: RequestId) -> Self {
        Self {
            request,
            loaders: Mutex::new(HashMap::new()),
        }
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    /// Number of loaders created so far.
    pub fn len(&self) -> usize {
        self.loaders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the loader for `site`, creating it with `factory` if this is
    /// the first time the site is resolved in this request. The lookup and
    /// insert happen under one lock.
    pub fn get_or_create<L, F>(&self, site: &SiteId, factory: F) -> Result<Arc<L>, LoadError>
    where
        L: Any + Send + Sync,
        F: FnOnce() -> L,
    {
        let key = LoaderKey {
            request: self.request,
            site: site.clone(),
        };

        let mut loaders = self.loaders.lock().unwrap_or_else(PoisonError::into_inner);
        let loader = loaders
            .entry(key)
            .or_insert_with(|| {
                debug!(request_id = %self.request, site = %site, "creating loader");
                Arc::new(factory()) as Arc<dyn Any + Send + Sync>
            })
            .clone();

        loader
            .downcast::<L>()
            .map_err(|_| LoadError::SiteTypeMismatch {
                site: site.to_string(),
            })
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("request", &self.request)
            .field("loaders", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_site_reuses_the_loader() {
        let registry = LoaderRegistry::new(RequestId::new());
        let site = SiteId::root("users").child("posts");

        let first = registry.get_or_create(&site, || AtomicUsize::new(0)).unwrap();
        first.fetch_add(1, Ordering::SeqCst);
        let second = registry
            .get_or_create(&site, || AtomicUsize::new(100))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sibling_sites_get_their_own_loaders() {
        let registry = LoaderRegistry::new(RequestId::new());
        let users = SiteId::root("users");

        let posts = registry
            .get_or_create(&users.child("posts"), || AtomicUsize::new(1))
            .unwrap();
        let recent = registry
            .get_or_create(&users.child("recent"), || AtomicUsize::new(2))
            .unwrap();

        assert!(!Arc::ptr_eq(&posts, &recent));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn site_type_mismatch_is_an_error() {
        let registry = LoaderRegistry::new(RequestId::new());
        let site = SiteId::root("user");

        registry.get_or_create(&site, || AtomicUsize::new(0)).unwrap();
        let other = registry.get_or_create(&site, || String::from("loader"));

        assert!(matches!(other, Err(LoadError::SiteTypeMismatch { .. })));
    }

    #[test]
    fn registries_do_not_share_loaders() {
        let site = SiteId::root("users");
        let first = LoaderRegistry::new(RequestId::new());
        let second = LoaderRegistry::new(RequestId::new());

        let a = first.get_or_create(&site, || AtomicUsize::new(0)).unwrap();
        let b = second.get_or_create(&site, || AtomicUsize::new(0)).unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
    }
}
