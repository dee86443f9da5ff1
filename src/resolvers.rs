//! Field resolvers: entity columns, root queries and mutations.
//!
//! Relations live in [`crate::relations`]; everything here either reads a
//! column off the parent or makes a single port call.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::FieldError;
use crate::model::{MemberType, Post, Profile, User};
use crate::registry::SiteId;
use crate::relations;
use crate::schema::{FieldDef, FieldKind, MutationField, QueryField};

/// An entity being resolved, or the root of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Root,
    User(User),
    Profile(Profile),
    Post(Post),
    MemberType(MemberType),
}

impl Node {
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Root => "Root",
            Node::User(..) => "User",
            Node::Profile(..) => "Profile",
            Node::Post(..) => "Post",
            Node::MemberType(..) => "MemberType",
        }
    }

    /// Read a scalar column by its field name.
    pub fn column(&self, name: &str) -> Option<Value> {
        let uuid = |id: &Uuid| Value::String(id.to_string());

        match (self, name) {
            (Node::User(user), "id") => Some(uuid(&user.id)),
            (Node::User(user), "name") => Some(Value::from(user.name.as_str())),
            (Node::User(user), "balance") => Some(Value::from(user.balance)),

            (Node::Profile(profile), "id") => Some(uuid(&profile.id)),
            (Node::Profile(profile), "isMale") => Some(Value::from(profile.is_male)),
            (Node::Profile(profile), "yearOfBirth") => Some(Value::from(profile.year_of_birth)),
            (Node::Profile(profile), "userId") => Some(uuid(&profile.user_id)),
            (Node::Profile(profile), "memberTypeId") => {
                Some(Value::from(profile.member_type_id.as_str()))
            }

            (Node::Post(post), "id") => Some(uuid(&post.id)),
            (Node::Post(post), "title") => Some(Value::from(post.title.as_str())),
            (Node::Post(post), "content") => Some(Value::from(post.content.as_str())),
            (Node::Post(post), "authorId") => Some(uuid(&post.author_id)),

            (Node::MemberType(member_type), "id") => Some(Value::from(member_type.id.as_str())),
            (Node::MemberType(member_type), "discount") => Some(Value::from(member_type.discount)),
            (Node::MemberType(member_type), "postsLimitPerMonth") => {
                Some(Value::from(member_type.posts_limit_per_month))
            }

            _ => None,
        }
    }
}

impl From<User> for Node {
    fn from(user: User) -> Self {
        Node::User(user)
    }
}

impl From<Profile> for Node {
    fn from(profile: Profile) -> Self {
        Node::Profile(profile)
    }
}

impl From<Post> for Node {
    fn from(post: Post) -> Self {
        Node::Post(post)
    }
}

impl From<MemberType> for Node {
    fn from(member_type: MemberType) -> Self {
        Node::MemberType(member_type)
    }
}

/// What a resolver produced, before it's completed against the field's
/// declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Null,
    Leaf(Value),
    Node(Node),
    List(Vec<Resolved>),
}

impl Resolved {
    pub fn node(item: impl Into<Node>) -> Self {
        Resolved::Node(item.into())
    }

    pub fn optional(item: Option<impl Into<Node>>) -> Self {
        item.map_or(Resolved::Null, Resolved::node)
    }

    pub fn list(items: impl IntoIterator<Item = impl Into<Node>>) -> Self {
        Resolved::List(items.into_iter().map(Resolved::node).collect())
    }
}

/// A field's arguments, coerced to JSON with variables substituted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    pub fn new(values: Map<String, Value>) -> Self {
        Arguments(values)
    }

    /// Deserialize one argument. An absent argument reads as `null`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, FieldError> {
        let value = self.0.get(name).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|err| FieldError::Argument {
            name: name.to_owned(),
            message: err.to_string(),
        })
    }
}

pub async fn resolve(
    ctx: &RequestContext,
    parent: &Node,
    field: &FieldDef,
    args: &Arguments,
    site: &SiteId,
) -> Result<Resolved, FieldError> {
    match field.kind {
        FieldKind::Column => parent
            .column(field.name)
            .map(Resolved::Leaf)
            .ok_or_else(|| FieldError::Unresolvable {
                type_name: parent.type_name().to_owned(),
                field: field.name.to_owned(),
            }),
        FieldKind::Relation(relation) => relations::resolve(ctx, relation, parent, site).await,
        FieldKind::Query(root) => query(ctx, root, args).await,
        FieldKind::Mutation(root) => mutate(ctx, root, args).await,
    }
}

async fn query(
    ctx: &RequestContext,
    field: QueryField,
    args: &Arguments,
) -> Result<Resolved, FieldError> {
    let port = ctx.port();

    Ok(match field {
        QueryField::MemberTypes => Resolved::list(port.list_member_types().await?),
        QueryField::MemberType => Resolved::optional(port.find_member_type(args.get("id")?).await?),
        QueryField::Posts => Resolved::list(port.list_posts().await?),
        QueryField::Post => Resolved::optional(port.find_post(args.get("id")?).await?),
        QueryField::Users => Resolved::list(port.list_users().await?),
        QueryField::User => Resolved::optional(port.find_user(args.get("id")?).await?),
        QueryField::Profiles => Resolved::list(port.list_profiles().await?),
        QueryField::Profile => Resolved::optional(port.find_profile(args.get("id")?).await?),
    })
}

async fn mutate(
    ctx: &RequestContext,
    field: MutationField,
    args: &Arguments,
) -> Result<Resolved, FieldError> {
    let port = ctx.port();
    let confirm = |message: &str| Resolved::Leaf(Value::from(message));

    Ok(match field {
        MutationField::CreateUser => Resolved::node(port.create_user(args.get("dto")?).await?),
        MutationField::ChangeUser => {
            Resolved::node(port.update_user(args.get("id")?, args.get("dto")?).await?)
        }
        MutationField::DeleteUser => {
            port.delete_user(args.get("id")?).await?;
            confirm("User deleted")
        }

        MutationField::CreatePost => Resolved::node(port.create_post(args.get("dto")?).await?),
        MutationField::ChangePost => {
            Resolved::node(port.update_post(args.get("id")?, args.get("dto")?).await?)
        }
        MutationField::DeletePost => {
            port.delete_post(args.get("id")?).await?;
            confirm("Post deleted")
        }

        MutationField::CreateProfile => {
            Resolved::node(port.create_profile(args.get("dto")?).await?)
        }
        MutationField::ChangeProfile => {
            Resolved::node(port.update_profile(args.get("id")?, args.get("dto")?).await?)
        }
        MutationField::DeleteProfile => {
            port.delete_profile(args.get("id")?).await?;
            confirm("Profile deleted")
        }

        MutationField::SubscribeTo => {
            let subscriber: Uuid = args.get("userId")?;
            port.subscribe(subscriber, args.get("authorId")?).await?;
            Resolved::optional(port.find_user(subscriber).await?)
        }
        MutationField::UnsubscribeFrom => {
            port.unsubscribe(args.get("userId")?, args.get("authorId")?)
                .await?;
            confirm("Unsubscribed")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemberTypeId;
    use serde_json::json;

    #[test]
    fn columns_use_field_names() {
        let profile = Node::Profile(Profile {
            id: Uuid::nil(),
            is_male: true,
            year_of_birth: 1990,
            user_id: Uuid::nil(),
            member_type_id: MemberTypeId::Business,
        });

        assert_eq!(profile.column("yearOfBirth"), Some(json!(1990)));
        assert_eq!(profile.column("memberTypeId"), Some(json!("business")));
        assert_eq!(profile.column("year_of_birth"), None);
        assert_eq!(Node::Root.column("id"), None);
    }

    #[test]
    fn arguments_deserialize_on_demand() {
        let args = Arguments::new(
            json!({ "id": "not-a-uuid", "limit": 3 })
                .as_object()
                .cloned()
                .unwrap(),
        );

        assert_eq!(args.get::<u32>("limit").unwrap(), 3);
        assert_eq!(args.get::<Option<u32>>("missing").unwrap(), None);
        assert!(matches!(
            args.get::<Uuid>("id"),
            Err(FieldError::Argument { name, .. }) if name == "id"
        ));
    }
}
