//! Per-request resolution context.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::batch::{BatchController, BatchRules};
use crate::data::{KeySet, ValueSet};
use crate::error::LoadError;
use crate::port::DataPort;
use crate::registry::{LoaderRegistry, RequestId, SiteId};
use crate::scheduler::{Scheduler, Tick};

/// Everything a resolver needs for one request: the data port, the loaders
/// created so far, and the scheduler that closes their batch windows.
///
/// A context is never shared between requests, so neither are its loaders
/// or their caches.
pub struct RequestContext {
    id: RequestId,
    port: Arc<dyn DataPort>,
    registry: LoaderRegistry,
    scheduler: Arc<Scheduler>,
    max_batch_keys: Option<NonZeroUsize>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .field("max_batch_keys", &self.max_batch_keys)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    pub fn new(port: Arc<dyn DataPort>, max_batch_keys: Option<NonZeroUsize>) -> Self {
        let id = RequestId::new();
        Self {
            id,
            port,
            registry: LoaderRegistry::new(id),
            scheduler: Scheduler::new(),
            max_batch_keys,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn port(&self) -> &Arc<dyn DataPort> {
        &self.port
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The loader for `site`, created on first use with `batcher` as its
    /// batch function. Its window closes at the request's next scheduling
    /// boundary.
    #[allow(clippy::type_complexity)]
    pub fn loader<Key, Value, Fut, Batcher>(
        &self,
        site: &SiteId,
        batcher: Batcher,
    ) -> Result<
        Arc<
            BatchController<
                Key,
                Value,
                LoadError,
                Fut,
                Batcher,
                impl Fn() -> Tick + Send + Sync + 'static,
                Tick,
            >,
        >,
        LoadError,
    >
    where
        Key: Eq + Hash + Send + Sync + 'static,
        Value: Clone + Send + Sync + 'static,
        Batcher: Fn(KeySet<Key>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ValueSet<Value>, LoadError>> + Send + 'static,
    {
        let scheduler = Arc::clone(&self.scheduler);
        let max_keys = self.max_batch_keys;

        self.registry.get_or_create(site, move || {
            BatchController::new(BatchRules {
                batcher,
                window: move || scheduler.tick(),
                max_keys,
            })
        })
    }
}
