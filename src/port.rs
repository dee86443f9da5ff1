//! The data access port: the storage engine as seen by the resolution layer.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    ChangePostInput, ChangeProfileInput, ChangeUserInput, CreatePostInput, CreateProfileInput,
    CreateUserInput, MemberType, MemberTypeId, Post, Profile, SubscriptionEdge, User,
};

/// Storage errors surfaced through the port.
#[derive(Debug, Error)]
pub enum PortError {
    /// A unique lookup, update or delete named a row that doesn't exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A write would break a uniqueness constraint.
    #[error("unique constraint violated on {entity}: {detail}")]
    UniqueViolation { entity: &'static str, detail: String },

    /// A write referenced a row that doesn't exist.
    #[error("foreign key constraint violated on {entity}: {detail}")]
    ForeignKeyViolation { entity: &'static str, detail: String },

    /// The storage engine couldn't be reached.
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },
}

impl PortError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PortError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type PortResult<T> = Result<T, PortError>;

/// Which column of a subscription edge a bulk read filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeSide {
    /// Match `subscriber_id`; the joined user is the author.
    Subscriber,

    /// Match `author_id`; the joined user is the subscriber.
    Author,
}

impl EdgeSide {
    /// The edge column this side filters on.
    pub fn key(self, edge: &SubscriptionEdge) -> Uuid {
        match self {
            EdgeSide::Subscriber => edge.subscriber_id,
            EdgeSide::Author => edge.author_id,
        }
    }

    /// The edge column on the other end, i.e. the user being projected.
    pub fn other(self, edge: &SubscriptionEdge) -> Uuid {
        match self {
            EdgeSide::Subscriber => edge.author_id,
            EdgeSide::Author => edge.subscriber_id,
        }
    }
}

/// A subscription edge joined with the user on its far side.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRow {
    pub edge: SubscriptionEdge,
    pub user: User,
}

/// Abstract storage interface for the relational model.
///
/// The `*_by_*` bulk reads take a key set and may return rows in any order;
/// callers pair rows with keys themselves. Implementations must be thread
/// safe.
#[async_trait]
pub trait DataPort: Send + Sync + 'static {
    // Users

    async fn list_users(&self) -> PortResult<Vec<User>>;

    async fn find_user(&self, id: Uuid) -> PortResult<Option<User>>;

    async fn find_users_by_ids(&self, ids: &[Uuid]) -> PortResult<Vec<User>>;

    async fn create_user(&self, input: CreateUserInput) -> PortResult<User>;

    async fn update_user(&self, id: Uuid, input: ChangeUserInput) -> PortResult<User>;

    /// Deletes a user along with their profile, posts and subscription edges.
    async fn delete_user(&self, id: Uuid) -> PortResult<()>;

    // Profiles

    async fn list_profiles(&self) -> PortResult<Vec<Profile>>;

    async fn find_profile(&self, id: Uuid) -> PortResult<Option<Profile>>;

    async fn find_profiles_by_user_ids(&self, user_ids: &[Uuid]) -> PortResult<Vec<Profile>>;

    async fn create_profile(&self, input: CreateProfileInput) -> PortResult<Profile>;

    async fn update_profile(&self, id: Uuid, input: ChangeProfileInput) -> PortResult<Profile>;

    async fn delete_profile(&self, id: Uuid) -> PortResult<()>;

    // Posts

    async fn list_posts(&self) -> PortResult<Vec<Post>>;

    async fn find_post(&self, id: Uuid) -> PortResult<Option<Post>>;

    async fn find_posts_by_author_ids(&self, author_ids: &[Uuid]) -> PortResult<Vec<Post>>;

    async fn create_post(&self, input: CreatePostInput) -> PortResult<Post>;

    async fn update_post(&self, id: Uuid, input: ChangePostInput) -> PortResult<Post>;

    async fn delete_post(&self, id: Uuid) -> PortResult<()>;

    // Member types

    async fn list_member_types(&self) -> PortResult<Vec<MemberType>>;

    async fn find_member_type(&self, id: MemberTypeId) -> PortResult<Option<MemberType>>;

    async fn find_member_types_by_ids(&self, ids: &[MemberTypeId]) -> PortResult<Vec<MemberType>>;

    // Subscriptions

    /// Reads every edge whose `side` column is any of `keys`, joined with the
    /// user on the other end of the edge, in a single bulk read.
    async fn find_subscriptions(
        &self,
        side: EdgeSide,
        keys: &[Uuid],
    ) -> PortResult<Vec<SubscriptionRow>>;

    async fn subscribe(&self, subscriber_id: Uuid, author_id: Uuid) -> PortResult<()>;

    async fn unsubscribe(&self, subscriber_id: Uuid, author_id: Uuid) -> PortResult<()>;
}
