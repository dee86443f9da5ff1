//! Batched relation resolvers.
//!
//! Each relation is resolved through the loader registered for its
//! selection site. Every parent resolved at the same site in the same batch
//! window adds its key to one batch, so a relation costs one bulk read per
//! site per window, however many parents there are. Values already delivered
//! at a site are served from that loader's cache.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::data::{KeySet, OnDuplicate, ValueSet};
use crate::error::{FieldError, LoadError};
use crate::model::{MemberType, MemberTypeId, Post, Profile, User};
use crate::port::{DataPort, EdgeSide};
use crate::registry::SiteId;
use crate::resolvers::{Node, Resolved};
use crate::schema::Relation;

pub async fn resolve(
    ctx: &RequestContext,
    relation: Relation,
    parent: &Node,
    site: &SiteId,
) -> Result<Resolved, FieldError> {
    let resolved = match (relation, parent) {
        (Relation::UserProfile, Node::User(user)) => {
            Resolved::optional(profile_by_user(ctx, site, user.id).await?)
        }
        (Relation::UserPosts, Node::User(user)) => {
            Resolved::list(posts_by_author(ctx, site, user.id).await?)
        }
        (Relation::UserSubscribedTo, Node::User(user)) => {
            Resolved::list(subscriptions(ctx, site, EdgeSide::Subscriber, user.id).await?)
        }
        (Relation::SubscribedToUser, Node::User(user)) => {
            Resolved::list(subscriptions(ctx, site, EdgeSide::Author, user.id).await?)
        }
        (Relation::ProfileMemberType, Node::Profile(profile)) => {
            Resolved::optional(member_type(ctx, site, profile.member_type_id).await?)
        }
        (Relation::ProfileUser, Node::Profile(profile)) => {
            Resolved::optional(user_by_id(ctx, site, profile.user_id).await?)
        }
        (Relation::PostAuthor, Node::Post(post)) => {
            Resolved::optional(user_by_id(ctx, site, post.author_id).await?)
        }
        (relation, parent) => {
            return Err(FieldError::Unresolvable {
                type_name: parent.type_name().to_owned(),
                field: format!("{:?}", relation),
            })
        }
    };

    Ok(resolved)
}

async fn profile_by_user(
    ctx: &RequestContext,
    site: &SiteId,
    user_id: Uuid,
) -> Result<Option<Profile>, LoadError> {
    let (port, batch_site) = (Arc::clone(ctx.port()), site.clone());
    let loader = ctx.loader(site, move |keys| {
        fetch_profiles(Arc::clone(&port), batch_site.clone(), keys)
    })?;
    loader.load_cached(user_id).await
}

async fn fetch_profiles(
    port: Arc<dyn DataPort>,
    site: SiteId,
    keys: KeySet<Uuid>,
) -> Result<ValueSet<Option<Profile>>, LoadError> {
    debug!(site = %site, keys = keys.len(), "loading profiles by user");
    let user_ids: Vec<Uuid> = keys.keys().copied().collect();
    let profiles = port.find_profiles_by_user_ids(&user_ids).await?;

    // At most one profile per user; a second one means the store is broken,
    // and every user in the batch gets the error.
    keys.into_unique(profiles, OnDuplicate::Fail, |profile| (profile.user_id, profile))
        .map_err(|err| {
            warn!(site = %site, error = %err, "profile batch returned more than one row per user");
            err.into()
        })
}

async fn posts_by_author(
    ctx: &RequestContext,
    site: &SiteId,
    author_id: Uuid,
) -> Result<Vec<Post>, LoadError> {
    let (port, batch_site) = (Arc::clone(ctx.port()), site.clone());
    let loader = ctx.loader(site, move |keys| {
        fetch_posts(Arc::clone(&port), batch_site.clone(), keys)
    })?;
    loader.load_cached(author_id).await
}

async fn fetch_posts(
    port: Arc<dyn DataPort>,
    site: SiteId,
    keys: KeySet<Uuid>,
) -> Result<ValueSet<Vec<Post>>, LoadError> {
    debug!(site = %site, keys = keys.len(), "loading posts by author");
    let author_ids: Vec<Uuid> = keys.keys().copied().collect();
    let posts = port.find_posts_by_author_ids(&author_ids).await?;

    Ok(keys.into_groups(posts, |post| (post.author_id, post)))
}

async fn subscriptions(
    ctx: &RequestContext,
    site: &SiteId,
    side: EdgeSide,
    user_id: Uuid,
) -> Result<Vec<User>, LoadError> {
    let (port, batch_site) = (Arc::clone(ctx.port()), site.clone());
    let loader = ctx.loader(site, move |keys| {
        fetch_subscriptions(Arc::clone(&port), batch_site.clone(), side, keys)
    })?;
    loader.load_cached(user_id).await
}

async fn fetch_subscriptions(
    port: Arc<dyn DataPort>,
    site: SiteId,
    side: EdgeSide,
    keys: KeySet<Uuid>,
) -> Result<ValueSet<Vec<User>>, LoadError> {
    debug!(site = %site, ?side, keys = keys.len(), "loading subscriptions");
    let user_ids: Vec<Uuid> = keys.keys().copied().collect();
    let rows = port.find_subscriptions(side, &user_ids).await?;

    Ok(keys.into_groups(rows, |row| (side.key(&row.edge), row.user)))
}

async fn member_type(
    ctx: &RequestContext,
    site: &SiteId,
    id: MemberTypeId,
) -> Result<Option<MemberType>, LoadError> {
    let (port, batch_site) = (Arc::clone(ctx.port()), site.clone());
    let loader = ctx.loader(site, move |keys| {
        fetch_member_types(Arc::clone(&port), batch_site.clone(), keys)
    })?;
    loader.load_cached(id).await
}

async fn fetch_member_types(
    port: Arc<dyn DataPort>,
    site: SiteId,
    keys: KeySet<MemberTypeId>,
) -> Result<ValueSet<Option<MemberType>>, LoadError> {
    debug!(site = %site, keys = keys.len(), "loading member types");
    let ids: Vec<MemberTypeId> = keys.keys().copied().collect();
    let member_types = port.find_member_types_by_ids(&ids).await?;

    Ok(keys.into_unique(member_types, OnDuplicate::KeepFirst, |member_type| {
        (member_type.id, member_type)
    })?)
}

async fn user_by_id(
    ctx: &RequestContext,
    site: &SiteId,
    id: Uuid,
) -> Result<Option<User>, LoadError> {
    let (port, batch_site) = (Arc::clone(ctx.port()), site.clone());
    let loader = ctx.loader(site, move |keys| {
        fetch_users(Arc::clone(&port), batch_site.clone(), keys)
    })?;
    loader.load_cached(id).await
}

async fn fetch_users(
    port: Arc<dyn DataPort>,
    site: SiteId,
    keys: KeySet<Uuid>,
) -> Result<ValueSet<Option<User>>, LoadError> {
    debug!(site = %site, keys = keys.len(), "loading users");
    let ids: Vec<Uuid> = keys.keys().copied().collect();
    let users = port.find_users_by_ids(&ids).await?;

    Ok(keys.into_unique(users, OnDuplicate::KeepFirst, |user| (user.id, user))?)
}
