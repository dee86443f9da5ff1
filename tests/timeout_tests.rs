//! Request deadlines, tested against a store that never answers.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::{executor, future};
use graphbatch::{
    ChangePostInput, ChangeProfileInput, ChangeUserInput, CreatePostInput, CreateProfileInput,
    CreateUserInput, DataPort, EdgeSide, MemberType, MemberTypeId, MemoryStore, Post, PortResult,
    Profile, Request, Service, ServiceConfig, SubscriptionRow, User,
};
use uuid::Uuid;

/// Every call hangs forever.
#[derive(Debug, Default)]
struct StalledPort {
    calls: AtomicUsize,
}

impl StalledPort {
    async fn stall<T>(&self) -> PortResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        future::pending().await
    }
}

#[async_trait]
impl DataPort for StalledPort {
    async fn list_users(&self) -> PortResult<Vec<User>> {
        self.stall().await
    }

    async fn find_user(&self, _: Uuid) -> PortResult<Option<User>> {
        self.stall().await
    }

    async fn find_users_by_ids(&self, _: &[Uuid]) -> PortResult<Vec<User>> {
        self.stall().await
    }

    async fn create_user(&self, _: CreateUserInput) -> PortResult<User> {
        self.stall().await
    }

    async fn update_user(&self, _: Uuid, _: ChangeUserInput) -> PortResult<User> {
        self.stall().await
    }

    async fn delete_user(&self, _: Uuid) -> PortResult<()> {
        self.stall().await
    }

    async fn list_profiles(&self) -> PortResult<Vec<Profile>> {
        self.stall().await
    }

    async fn find_profile(&self, _: Uuid) -> PortResult<Option<Profile>> {
        self.stall().await
    }

    async fn find_profiles_by_user_ids(&self, _: &[Uuid]) -> PortResult<Vec<Profile>> {
        self.stall().await
    }

    async fn create_profile(&self, _: CreateProfileInput) -> PortResult<Profile> {
        self.stall().await
    }

    async fn update_profile(&self, _: Uuid, _: ChangeProfileInput) -> PortResult<Profile> {
        self.stall().await
    }

    async fn delete_profile(&self, _: Uuid) -> PortResult<()> {
        self.stall().await
    }

    async fn list_posts(&self) -> PortResult<Vec<Post>> {
        self.stall().await
    }

    async fn find_post(&self, _: Uuid) -> PortResult<Option<Post>> {
        self.stall().await
    }

    async fn find_posts_by_author_ids(&self, _: &[Uuid]) -> PortResult<Vec<Post>> {
        self.stall().await
    }

    async fn create_post(&self, _: CreatePostInput) -> PortResult<Post> {
        self.stall().await
    }

    async fn update_post(&self, _: Uuid, _: ChangePostInput) -> PortResult<Post> {
        self.stall().await
    }

    async fn delete_post(&self, _: Uuid) -> PortResult<()> {
        self.stall().await
    }

    async fn list_member_types(&self) -> PortResult<Vec<MemberType>> {
        self.stall().await
    }

    async fn find_member_type(&self, _: MemberTypeId) -> PortResult<Option<MemberType>> {
        self.stall().await
    }

    async fn find_member_types_by_ids(&self, _: &[MemberTypeId]) -> PortResult<Vec<MemberType>> {
        self.stall().await
    }

    async fn find_subscriptions(&self, _: EdgeSide, _: &[Uuid]) -> PortResult<Vec<SubscriptionRow>> {
        self.stall().await
    }

    async fn subscribe(&self, _: Uuid, _: Uuid) -> PortResult<()> {
        self.stall().await
    }

    async fn unsubscribe(&self, _: Uuid, _: Uuid) -> PortResult<()> {
        self.stall().await
    }
}

fn config(request_timeout_ms: Option<u64>) -> ServiceConfig {
    ServiceConfig {
        request_timeout_ms,
        ..ServiceConfig::default()
    }
}

#[tokio::test]
async fn stalled_requests_time_out_with_one_error() {
    let port = Arc::new(StalledPort::default());
    let service = Service::new(port.clone(), config(Some(50)));

    let response = service
        .execute(Request::new("{ users { posts { title } } memberTypes { id } }"))
        .await;

    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "Request timed out after 50 ms");
    assert_eq!(port.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn deadlines_hold_without_a_runtime() {
    let port = Arc::new(StalledPort::default());
    let service = Service::new(port.clone(), config(Some(20)));

    let response = executor::block_on(service.execute(Request::new("{ users { id } }")));

    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "Request timed out after 20 ms");
    assert_eq!(port.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fast_requests_finish_inside_the_deadline() {
    let store = MemoryStore::new_shared();
    let service = Service::new(store.clone(), config(Some(5_000)));

    let response = service.execute(Request::new("{ memberTypes { id } }")).await;

    assert!(response.is_ok(), "{:?}", response.errors);
    assert_eq!(store.calls().len(), 1);
}

#[tokio::test]
async fn rejected_queries_are_answered_without_waiting() {
    let port = Arc::new(StalledPort::default());
    let service = Service::new(port.clone(), config(Some(60_000)));

    let response = service.execute(Request::new("{ users { password } }")).await;

    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(port.calls.load(Ordering::SeqCst), 0);
}
