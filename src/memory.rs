//! In-memory implementation of the data port.
//!
//! Tables are `DashMap`s, so bulk reads come back in arbitrary order; callers
//! must never rely on row order. Every call is recorded as a [`PortCall`],
//! which is what the batching tests inspect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use dashmap::{DashMap, DashSet};
use tracing::instrument;
use uuid::Uuid;

use crate::model::{
    ChangePostInput, ChangeProfileInput, ChangeUserInput, CreatePostInput, CreateProfileInput,
    CreateUserInput, MemberType, MemberTypeId, Post, Profile, SubscriptionEdge, User,
};
use crate::port::{DataPort, EdgeSide, PortError, PortResult, SubscriptionRow};

/// One recorded call against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCall {
    pub method: &'static str,

    /// The key set of a bulk read, or the id of a single-row operation.
    pub keys: Vec<String>,
}

impl PortCall {
    pub fn is_read(&self) -> bool {
        self.method.starts_with("find") || self.method.starts_with("list")
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    profiles: DashMap<Uuid, Profile>,
    posts: DashMap<Uuid, Post>,
    member_types: DashMap<MemberTypeId, MemberType>,
    subscriptions: DashMap<(Uuid, Uuid), SubscriptionEdge>,

    /// User id to the id of that user's profile.
    profile_owners: DashMap<Uuid, Uuid>,

    calls: Mutex<Vec<PortCall>>,
    unavailable: AtomicBool,
    failing: DashSet<&'static str>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let member_types = DashMap::new();
        for member_type in MemberType::defaults() {
            member_types.insert(member_type.id, member_type);
        }

        Self {
            users: DashMap::new(),
            profiles: DashMap::new(),
            posts: DashMap::new(),
            member_types,
            subscriptions: DashMap::new(),
            profile_owners: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            failing: DashSet::new(),
        }
    }
}

impl MemoryStore {
    /// Creates a store holding only the seeded member types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<PortCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Calls made to one method.
    pub fn calls_to(&self, method: &str) -> Vec<PortCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// While set, every call fails with [`PortError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every later call to `method` fail with
    /// [`PortError::Unavailable`]. Other methods keep working.
    pub fn fail_calls_to(&self, method: &'static str) {
        self.failing.insert(method);
    }

    fn record<K: ToString>(
        &self,
        method: &'static str,
        keys: impl IntoIterator<Item = K>,
    ) -> PortResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PortCall {
                method,
                keys: keys.into_iter().map(|key| key.to_string()).collect(),
            });

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable {
                message: format!("{} rejected: store is offline", method),
            });
        }
        if self.failing.contains(method) {
            return Err(PortError::Unavailable {
                message: format!("{} rejected: table is offline", method),
            });
        }

        Ok(())
    }

    fn require_user(&self, id: Uuid, entity: &'static str) -> PortResult<()> {
        self.lock_user(id, entity).map(drop)
    }

    /// Read-locks a user row. `delete_user` cannot remove the row while the
    /// guard is held, so rows inserted under it are always seen by the
    /// cascade.
    fn lock_user(&self, id: Uuid, entity: &'static str) -> PortResult<Ref<'_, Uuid, User>> {
        self.users
            .get(&id)
            .ok_or_else(|| PortError::ForeignKeyViolation {
                entity,
                detail: format!("user {} does not exist", id),
            })
    }
}

#[async_trait]
impl DataPort for MemoryStore {
    async fn list_users(&self) -> PortResult<Vec<User>> {
        self.record::<Uuid>("list_users", [])?;
        Ok(self.users.iter().map(|user| user.value().clone()).collect())
    }

    async fn find_user(&self, id: Uuid) -> PortResult<Option<User>> {
        self.record("find_user", [id])?;
        Ok(self.users.get(&id).map(|user| user.value().clone()))
    }

    async fn find_users_by_ids(&self, ids: &[Uuid]) -> PortResult<Vec<User>> {
        self.record("find_users_by_ids", ids)?;
        Ok(self
            .users
            .iter()
            .filter(|user| ids.contains(user.key()))
            .map(|user| user.value().clone())
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_user(&self, input: CreateUserInput) -> PortResult<User> {
        self.record::<Uuid>("create_user", [])?;
        let user = User {
            id: Uuid::new_v4(),
            name: input.name,
            balance: input.balance,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn update_user(&self, id: Uuid, input: ChangeUserInput) -> PortResult<User> {
        self.record("update_user", [id])?;
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("user", id))?;

        if let Some(name) = input.name {
            user.name = name;
        }
        if let Some(balance) = input.balance {
            user.balance = balance;
        }
        Ok(user.clone())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: Uuid) -> PortResult<()> {
        self.record("delete_user", [id])?;
        if self.users.remove(&id).is_none() {
            return Err(PortError::not_found("user", id));
        }

        self.profile_owners.remove(&id);
        self.profiles.retain(|_, profile| profile.user_id != id);
        self.posts.retain(|_, post| post.author_id != id);
        self.subscriptions
            .retain(|_, edge| edge.subscriber_id != id && edge.author_id != id);
        Ok(())
    }

    async fn list_profiles(&self) -> PortResult<Vec<Profile>> {
        self.record::<Uuid>("list_profiles", [])?;
        Ok(self
            .profiles
            .iter()
            .map(|profile| profile.value().clone())
            .collect())
    }

    async fn find_profile(&self, id: Uuid) -> PortResult<Option<Profile>> {
        self.record("find_profile", [id])?;
        Ok(self.profiles.get(&id).map(|profile| profile.value().clone()))
    }

    async fn find_profiles_by_user_ids(&self, user_ids: &[Uuid]) -> PortResult<Vec<Profile>> {
        self.record("find_profiles_by_user_ids", user_ids)?;
        Ok(self
            .profiles
            .iter()
            .filter(|profile| user_ids.contains(&profile.user_id))
            .map(|profile| profile.value().clone())
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_profile(&self, input: CreateProfileInput) -> PortResult<Profile> {
        self.record("create_profile", [input.user_id])?;
        let _owner = self.lock_user(input.user_id, "profile")?;

        let owner_slot = match self.profile_owners.entry(input.user_id) {
            Entry::Occupied(_) => {
                return Err(PortError::UniqueViolation {
                    entity: "profile",
                    detail: format!("user {} already has a profile", input.user_id),
                })
            }
            Entry::Vacant(entry) => entry,
        };

        let profile = Profile {
            id: Uuid::new_v4(),
            is_male: input.is_male,
            year_of_birth: input.year_of_birth,
            user_id: input.user_id,
            member_type_id: input.member_type_id,
        };
        owner_slot.insert(profile.id);
        self.profiles.insert(profile.id, profile.clone());
        Ok(profile)
    }

    #[instrument(skip(self))]
    async fn update_profile(&self, id: Uuid, input: ChangeProfileInput) -> PortResult<Profile> {
        self.record("update_profile", [id])?;
        let mut profile = self
            .profiles
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("profile", id))?;

        if let Some(is_male) = input.is_male {
            profile.is_male = is_male;
        }
        if let Some(year_of_birth) = input.year_of_birth {
            profile.year_of_birth = year_of_birth;
        }
        if let Some(member_type_id) = input.member_type_id {
            profile.member_type_id = member_type_id;
        }
        Ok(profile.clone())
    }

    #[instrument(skip(self))]
    async fn delete_profile(&self, id: Uuid) -> PortResult<()> {
        self.record("delete_profile", [id])?;
        let (_, profile) = self
            .profiles
            .remove(&id)
            .ok_or_else(|| PortError::not_found("profile", id))?;
        self.profile_owners
            .remove_if(&profile.user_id, |_, profile_id| *profile_id == id);
        Ok(())
    }

    async fn list_posts(&self) -> PortResult<Vec<Post>> {
        self.record::<Uuid>("list_posts", [])?;
        Ok(self.posts.iter().map(|post| post.value().clone()).collect())
    }

    async fn find_post(&self, id: Uuid) -> PortResult<Option<Post>> {
        self.record("find_post", [id])?;
        Ok(self.posts.get(&id).map(|post| post.value().clone()))
    }

    async fn find_posts_by_author_ids(&self, author_ids: &[Uuid]) -> PortResult<Vec<Post>> {
        self.record("find_posts_by_author_ids", author_ids)?;
        Ok(self
            .posts
            .iter()
            .filter(|post| author_ids.contains(&post.author_id))
            .map(|post| post.value().clone())
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_post(&self, input: CreatePostInput) -> PortResult<Post> {
        self.record("create_post", [input.author_id])?;
        let _author = self.lock_user(input.author_id, "post")?;

        let post = Post {
            id: Uuid::new_v4(),
            title: input.title,
            content: input.content,
            author_id: input.author_id,
        };
        self.posts.insert(post.id, post.clone());
        Ok(post)
    }

    #[instrument(skip(self))]
    async fn update_post(&self, id: Uuid, input: ChangePostInput) -> PortResult<Post> {
        self.record("update_post", [id])?;
        let mut post = self
            .posts
            .get_mut(&id)
            .ok_or_else(|| PortError::not_found("post", id))?;

        if let Some(title) = input.title {
            post.title = title;
        }
        if let Some(content) = input.content {
            post.content = content;
        }
        Ok(post.clone())
    }

    #[instrument(skip(self))]
    async fn delete_post(&self, id: Uuid) -> PortResult<()> {
        self.record("delete_post", [id])?;
        self.posts
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PortError::not_found("post", id))
    }

    async fn list_member_types(&self) -> PortResult<Vec<MemberType>> {
        self.record::<Uuid>("list_member_types", [])?;
        let mut member_types: Vec<MemberType> = self
            .member_types
            .iter()
            .map(|member_type| member_type.value().clone())
            .collect();
        member_types.sort_by_key(|member_type| member_type.id);
        Ok(member_types)
    }

    async fn find_member_type(&self, id: MemberTypeId) -> PortResult<Option<MemberType>> {
        self.record("find_member_type", [id])?;
        Ok(self
            .member_types
            .get(&id)
            .map(|member_type| member_type.value().clone()))
    }

    async fn find_member_types_by_ids(&self, ids: &[MemberTypeId]) -> PortResult<Vec<MemberType>> {
        self.record("find_member_types_by_ids", ids)?;
        Ok(self
            .member_types
            .iter()
            .filter(|member_type| ids.contains(member_type.key()))
            .map(|member_type| member_type.value().clone())
            .collect())
    }

    async fn find_subscriptions(
        &self,
        side: EdgeSide,
        keys: &[Uuid],
    ) -> PortResult<Vec<SubscriptionRow>> {
        let method = match side {
            EdgeSide::Subscriber => "find_subscriptions_by_subscriber",
            EdgeSide::Author => "find_subscriptions_by_author",
        };
        self.record(method, keys)?;

        Ok(self
            .subscriptions
            .iter()
            .filter(|edge| keys.contains(&side.key(edge.value())))
            .filter_map(|edge| {
                let edge = *edge.value();
                let user = self.users.get(&side.other(&edge))?.value().clone();
                Some(SubscriptionRow { edge, user })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn subscribe(&self, subscriber_id: Uuid, author_id: Uuid) -> PortResult<()> {
        self.record("subscribe", [subscriber_id, author_id])?;
        if !self.users.contains_key(&subscriber_id) {
            return Err(PortError::not_found("user", subscriber_id));
        }
        self.require_user(author_id, "subscription")?;

        match self.subscriptions.entry((subscriber_id, author_id)) {
            Entry::Occupied(_) => Err(PortError::UniqueViolation {
                entity: "subscription",
                detail: format!("{} already follows {}", subscriber_id, author_id),
            }),
            Entry::Vacant(entry) => {
                entry.insert(SubscriptionEdge {
                    subscriber_id,
                    author_id,
                });
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    async fn unsubscribe(&self, subscriber_id: Uuid, author_id: Uuid) -> PortResult<()> {
        self.record("unsubscribe", [subscriber_id, author_id])?;
        self.subscriptions
            .remove(&(subscriber_id, author_id))
            .map(|_| ())
            .ok_or_else(|| {
                PortError::not_found("subscription", format!("{}->{}", subscriber_id, author_id))
            })
    }
}
