//! Graphbatch is a GraphQL resolution layer over a small relational model
//! (users, profiles, posts, member types and subscriptions between users),
//! built around the [dataloader pattern](https://github.com/graphql/dataloader).
//! Relation fields are resolved through request-scoped batching loaders, so
//! resolving a relation for N parents costs one bulk read instead of N.
//!
//! ## Overview
//!
//! A [`Service`] owns the schema, a [`DataPort`] and a [`ServiceConfig`].
//! Each call to [`Service::execute`] runs one request:
//!
//! 1. The query is parsed and checked against the depth limit. Nothing is
//!    resolved for a query that's too deep.
//! 2. The document is validated against the schema.
//! 3. A fresh [`RequestContext`] is created, holding the loader registry for
//!    this request and nothing else.
//! 4. The selected operation is executed. Sibling fields resolve
//!    concurrently; mutation root fields resolve in order.
//!
//! ```
//! use graphbatch::{MemoryStore, Request, Service, ServiceConfig};
//!
//! let store = MemoryStore::new_shared();
//! let service = Service::new(store.clone(), ServiceConfig::default());
//!
//! let response = futures::executor::block_on(
//!     service.execute(Request::new("{ memberTypes { id discount } }")),
//! );
//!
//! assert!(response.is_ok());
//! assert_eq!(store.calls().len(), 1);
//! ```
//!
//! ## Loaders
//!
//! A loader is a [`BatchController`] created for one *selection site*: the
//! path of a field selection in the query with list indices removed, such as
//! `users.posts`. Every parent resolving that selection calls
//! [`load_cached`][BatchController::load_cached] with its key; the keys
//! collected during one batch window are handed to the batch function as a
//! [`KeySet`], and it answers with a [`ValueSet`] that pairs each key with
//! its value. The bulk read may return rows in any order; [`KeySet`] pairs
//! them with keys by their key column, never by position.
//!
//! - [`KeySet::into_unique`] builds one-to-one values: a key without a row
//!   gets `None`.
//! - [`KeySet::into_groups`] builds one-to-many values: a key without rows
//!   gets an empty list.
//!
//! Loaders are kept in a [`LoaderRegistry`] keyed by request id and site.
//! Nothing is shared between requests, so one request never sees another's
//! cached values.
//!
//! ## Design notes
//!
//! ### Batch windows
//!
//! A batch window has to stay open until every sibling resolver that will
//! load from the same site has done so. A timer makes that a race, so the
//! window is a [`Tick`] from the request's [`Scheduler`] instead: the request
//! future runs under [`Scheduler::run`], which starts a new epoch every time
//! the runtime polls it, and a tick completes only once a later epoch has
//! begun. Everything polled in one pass lands in one batch.
//!
//! ### Poll-driven batches
//!
//! As with any dataloader, all of the asynchronous work is driven by polling
//! [`BatchFuture`]. The batch function isn't spawned anywhere; one waiting
//! future drives it, and the others are woken when values are ready (or when
//! the driving future is dropped). Dropping every future waiting on a batch
//! cancels it.

mod ast;
mod batch;
pub mod config;
mod context;
mod data;
mod depth;
mod error;
mod executor;
mod logging;
mod memory;
mod model;
mod port;
mod registry;
mod relations;
mod resolvers;
mod response;
pub mod scheduler;
mod schema;
mod service;
mod validation;
mod wakerset;

pub use batch::{BatchController, BatchFuture, BatchRules};
pub use config::ServiceConfig;
pub use context::RequestContext;
pub use data::{IntoValuesError, KeySet, OnDuplicate, ValueSet};
pub use error::{Error, FieldError, LoadError, Result};
pub use logging::{init_logger, LogFormat};
pub use memory::{MemoryStore, PortCall};
pub use model::{
    ChangePostInput, ChangeProfileInput, ChangeUserInput, CreatePostInput, CreateProfileInput,
    CreateUserInput, MemberType, MemberTypeId, Post, Profile, SubscriptionEdge, UnknownMemberType,
    User,
};
pub use port::{DataPort, EdgeSide, PortError, PortResult, SubscriptionRow};
pub use registry::{LoaderRegistry, RequestId, SiteId};
pub use resolvers::{Arguments, Node, Resolved};
pub use response::{GraphQlError, Location, PathSegment, Request, Response};
pub use scheduler::{Scheduled, Scheduler, Tick};
pub use schema::{
    ArgumentDef, FieldDef, FieldKind, InputObjectDef, MutationField, ObjectDef, QueryField,
    Relation, Schema, TypeDef, TypeRef,
};
pub use service::Service;
pub use validation::ValidationError;
