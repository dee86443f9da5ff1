//! The object graph exposed to queries.
//!
//! The schema is built once and shared read-only by every request. It's a
//! plain description of types and fields; each field carries a
//! [`FieldKind`] telling the executor how to resolve it.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use crate::model::MemberTypeId;

/// A reference to a type, with list and non-null wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Named(&'static str),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    fn named(name: &'static str) -> Self {
        TypeRef::Named(name)
    }

    fn non_null(self) -> Self {
        TypeRef::NonNull(Box::new(self))
    }

    /// `[name]`. Lists and their items stay nullable so a failed batch
    /// nulls only the field that asked for it.
    fn list_of(name: &'static str) -> Self {
        TypeRef::List(Box::new(TypeRef::named(name)))
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(..))
    }

    /// The named type at the bottom of the wrappers.
    pub fn base(&self) -> &'static str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.base(),
        }
    }
}

impl Display for TypeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArgumentDef {
    pub name: &'static str,
    pub ty: TypeRef,
}

/// Relations between entities, each resolved through a batched loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// User -> Profile, at most one.
    UserProfile,
    /// User -> Post, zero or more.
    UserPosts,
    /// User -> the authors this user subscribes to.
    UserSubscribedTo,
    /// User -> the users subscribed to this user.
    SubscribedToUser,
    /// Profile -> MemberType, at most one.
    ProfileMemberType,
    /// Profile -> User, at most one.
    ProfileUser,
    /// Post -> User, at most one.
    PostAuthor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryField {
    MemberTypes,
    MemberType,
    Posts,
    Post,
    Users,
    User,
    Profiles,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationField {
    CreateUser,
    ChangeUser,
    DeleteUser,
    CreatePost,
    ChangePost,
    DeletePost,
    CreateProfile,
    ChangeProfile,
    DeleteProfile,
    SubscribeTo,
    UnsubscribeFrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Read straight off the parent entity.
    Column,
    Relation(Relation),
    Query(QueryField),
    Mutation(MutationField),
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: TypeRef,
    pub args: Vec<ArgumentDef>,
    pub kind: FieldKind,
}

impl FieldDef {
    fn new(name: &'static str, ty: TypeRef, kind: FieldKind) -> Self {
        Self {
            name,
            ty,
            args: Vec::new(),
            kind,
        }
    }

    fn column(name: &'static str, ty: TypeRef) -> Self {
        Self::new(name, ty, FieldKind::Column)
    }

    fn arg(mut self, name: &'static str, ty: TypeRef) -> Self {
        self.args.push(ArgumentDef { name, ty });
        self
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentDef> {
        self.args.iter().find(|arg| arg.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ObjectDef {
    pub name: &'static str,
    pub fields: Vec<FieldDef>,
}

impl ObjectDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct InputObjectDef {
    pub name: &'static str,
    pub fields: Vec<ArgumentDef>,
}

#[derive(Debug, Clone)]
pub enum TypeDef {
    Scalar(&'static str),
    Enum {
        name: &'static str,
        values: Vec<&'static str>,
    },
    Object(ObjectDef),
    InputObject(InputObjectDef),
}

impl TypeDef {
    pub fn name(&self) -> &'static str {
        match self {
            TypeDef::Scalar(name) => name,
            TypeDef::Enum { name, .. } => name,
            TypeDef::Object(object) => object.name,
            TypeDef::InputObject(input) => input.name,
        }
    }

    /// Scalars and enums. Selecting fields on a leaf is an error, as is
    /// omitting a selection on anything else.
    pub fn is_leaf(&self) -> bool {
        matches!(self, TypeDef::Scalar(..) | TypeDef::Enum { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    types: HashMap<&'static str, TypeDef>,
    query: ObjectDef,
    mutation: ObjectDef,
}

pub const QUERY: &str = "Query";
pub const MUTATION: &str = "Mutation";

impl Schema {
    pub fn new() -> Self {
        use FieldKind::{Mutation as M, Query as Q, Relation as R};

        let id = || TypeRef::named("UUID").non_null();
        let string = || TypeRef::named("String").non_null();
        let float = || TypeRef::named("Float").non_null();
        let int = || TypeRef::named("Int").non_null();
        let boolean = || TypeRef::named("Boolean").non_null();
        let member_type_id = || TypeRef::named("MemberTypeId").non_null();
        let input = |name| TypeRef::named(name).non_null();

        let member_type = ObjectDef {
            name: "MemberType",
            fields: vec![
                FieldDef::column("id", member_type_id()),
                FieldDef::column("discount", float()),
                FieldDef::column("postsLimitPerMonth", int()),
            ],
        };

        let post = ObjectDef {
            name: "Post",
            fields: vec![
                FieldDef::column("id", id()),
                FieldDef::column("title", string()),
                FieldDef::column("content", string()),
                FieldDef::column("authorId", id()),
                FieldDef::new("author", TypeRef::named("User"), R(Relation::PostAuthor)),
            ],
        };

        let profile = ObjectDef {
            name: "Profile",
            fields: vec![
                FieldDef::column("id", id()),
                FieldDef::column("isMale", boolean()),
                FieldDef::column("yearOfBirth", int()),
                FieldDef::column("userId", id()),
                FieldDef::column("memberTypeId", member_type_id()),
                FieldDef::new(
                    "memberType",
                    TypeRef::named("MemberType"),
                    R(Relation::ProfileMemberType),
                ),
                FieldDef::new("user", TypeRef::named("User"), R(Relation::ProfileUser)),
            ],
        };

        let user = ObjectDef {
            name: "User",
            fields: vec![
                FieldDef::column("id", id()),
                FieldDef::column("name", string()),
                FieldDef::column("balance", float()),
                FieldDef::new("profile", TypeRef::named("Profile"), R(Relation::UserProfile)),
                FieldDef::new("posts", TypeRef::list_of("Post"), R(Relation::UserPosts)),
                FieldDef::new(
                    "userSubscribedTo",
                    TypeRef::list_of("User"),
                    R(Relation::UserSubscribedTo),
                ),
                FieldDef::new(
                    "subscribedToUser",
                    TypeRef::list_of("User"),
                    R(Relation::SubscribedToUser),
                ),
            ],
        };

        let query = ObjectDef {
            name: QUERY,
            fields: vec![
                FieldDef::new("memberTypes", TypeRef::list_of("MemberType"), Q(QueryField::MemberTypes)),
                FieldDef::new(
                    "memberType",
                    TypeRef::named("MemberType").non_null(),
                    Q(QueryField::MemberType),
                )
                .arg("id", member_type_id()),
                FieldDef::new("posts", TypeRef::list_of("Post"), Q(QueryField::Posts)),
                FieldDef::new("post", TypeRef::named("Post"), Q(QueryField::Post)).arg("id", id()),
                FieldDef::new("users", TypeRef::list_of("User"), Q(QueryField::Users)),
                FieldDef::new("user", TypeRef::named("User"), Q(QueryField::User)).arg("id", id()),
                FieldDef::new("profiles", TypeRef::list_of("Profile"), Q(QueryField::Profiles)),
                FieldDef::new("profile", TypeRef::named("Profile"), Q(QueryField::Profile))
                    .arg("id", id()),
            ],
        };

        let optional_string = || TypeRef::named("String");
        let mutation = ObjectDef {
            name: MUTATION,
            fields: vec![
                FieldDef::new("createUser", TypeRef::named("User"), M(MutationField::CreateUser))
                    .arg("dto", input("CreateUserInput")),
                FieldDef::new("changeUser", TypeRef::named("User"), M(MutationField::ChangeUser))
                    .arg("id", id())
                    .arg("dto", input("ChangeUserInput")),
                FieldDef::new("deleteUser", optional_string(), M(MutationField::DeleteUser))
                    .arg("id", id()),
                FieldDef::new("createPost", TypeRef::named("Post"), M(MutationField::CreatePost))
                    .arg("dto", input("CreatePostInput")),
                FieldDef::new("changePost", TypeRef::named("Post"), M(MutationField::ChangePost))
                    .arg("id", id())
                    .arg("dto", input("ChangePostInput")),
                FieldDef::new("deletePost", optional_string(), M(MutationField::DeletePost))
                    .arg("id", id()),
                FieldDef::new(
                    "createProfile",
                    TypeRef::named("Profile"),
                    M(MutationField::CreateProfile),
                )
                .arg("dto", input("CreateProfileInput")),
                FieldDef::new(
                    "changeProfile",
                    TypeRef::named("Profile"),
                    M(MutationField::ChangeProfile),
                )
                .arg("id", id())
                .arg("dto", input("ChangeProfileInput")),
                FieldDef::new("deleteProfile", optional_string(), M(MutationField::DeleteProfile))
                    .arg("id", id()),
                FieldDef::new("subscribeTo", TypeRef::named("User"), M(MutationField::SubscribeTo))
                    .arg("userId", id())
                    .arg("authorId", id()),
                FieldDef::new(
                    "unsubscribeFrom",
                    optional_string(),
                    M(MutationField::UnsubscribeFrom),
                )
                .arg("userId", id())
                .arg("authorId", id()),
            ],
        };

        let field = |name, ty| ArgumentDef { name, ty };
        let inputs = [
            InputObjectDef {
                name: "CreateUserInput",
                fields: vec![field("name", string()), field("balance", float())],
            },
            InputObjectDef {
                name: "ChangeUserInput",
                fields: vec![
                    field("name", TypeRef::named("String")),
                    field("balance", TypeRef::named("Float")),
                ],
            },
            InputObjectDef {
                name: "CreatePostInput",
                fields: vec![
                    field("title", string()),
                    field("content", string()),
                    field("authorId", id()),
                ],
            },
            InputObjectDef {
                name: "ChangePostInput",
                fields: vec![
                    field("title", TypeRef::named("String")),
                    field("content", TypeRef::named("String")),
                ],
            },
            InputObjectDef {
                name: "CreateProfileInput",
                fields: vec![
                    field("isMale", boolean()),
                    field("yearOfBirth", int()),
                    field("userId", id()),
                    field("memberTypeId", member_type_id()),
                ],
            },
            InputObjectDef {
                name: "ChangeProfileInput",
                fields: vec![
                    field("isMale", TypeRef::named("Boolean")),
                    field("yearOfBirth", TypeRef::named("Int")),
                    field("memberTypeId", TypeRef::named("MemberTypeId")),
                ],
            },
        ];

        let mut types = HashMap::new();
        for scalar in ["UUID", "String", "Float", "Int", "Boolean"] {
            types.insert(scalar, TypeDef::Scalar(scalar));
        }
        types.insert(
            "MemberTypeId",
            TypeDef::Enum {
                name: "MemberTypeId",
                values: MemberTypeId::ALL.iter().map(|id| id.as_str()).collect(),
            },
        );
        let (query_root, mutation_root) = (query.clone(), mutation.clone());
        for object in [member_type, post, profile, user, query, mutation] {
            types.insert(object.name, TypeDef::Object(object));
        }
        for input in inputs {
            types.insert(input.name, TypeDef::InputObject(input));
        }

        Self {
            types,
            query: query_root,
            mutation: mutation_root,
        }
    }

    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn object(&self, name: &str) -> Option<&ObjectDef> {
        match self.types.get(name) {
            Some(TypeDef::Object(object)) => Some(object),
            _ => None,
        }
    }

    pub fn query(&self) -> &ObjectDef {
        &self.query
    }

    pub fn mutation(&self) -> &ObjectDef {
        &self.mutation
    }

    pub fn is_leaf(&self, name: &str) -> bool {
        self.types.get(name).map_or(false, TypeDef::is_leaf)
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_fields_are_wired() {
        let schema = Schema::new();
        let user = schema.object("User").unwrap();

        let posts = user.field("posts").unwrap();
        assert_eq!(posts.kind, FieldKind::Relation(Relation::UserPosts));
        assert_eq!(posts.ty.to_string(), "[Post]");
        assert_eq!(posts.ty.base(), "Post");
        assert!(!posts.ty.is_non_null());

        let users = schema.query().field("users").unwrap();
        assert_eq!(users.ty.to_string(), "[User]");

        let profile = user.field("profile").unwrap();
        assert!(!profile.ty.is_non_null());
    }

    #[test]
    fn root_fields_take_arguments() {
        let schema = Schema::new();

        let user = schema.query().field("user").unwrap();
        assert_eq!(user.argument("id").unwrap().ty.to_string(), "UUID!");

        let change = schema.mutation().field("changeProfile").unwrap();
        assert_eq!(change.args.len(), 2);
        assert!(change.argument("dto").is_some());
    }

    #[test]
    fn leaves() {
        let schema = Schema::new();
        assert!(schema.is_leaf("UUID"));
        assert!(schema.is_leaf("MemberTypeId"));
        assert!(!schema.is_leaf("User"));
        assert!(!schema.is_leaf("Nope"));
    }
}
