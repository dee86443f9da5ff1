//! Operation execution.
//!
//! Sibling fields of a query are resolved concurrently with `join_all`, so
//! every sibling's loads are issued in the same scheduling pass and share
//! their batch. Mutation root fields run one after another.
//!
//! A resolver error is recorded with the field's path and the field becomes
//! `null`. When the field is non-null, the null moves up to the nearest
//! nullable ancestor instead; if there isn't one, `data` itself is `null`.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use futures::future::{join_all, BoxFuture, FutureExt};
use graphql_parser::query as q;
use serde_json::{Map, Value};
use tracing::warn;

use crate::ast::{self, Directive, Document, Field, FragmentDefinition, Operation, OperationKind, SelectionSet};
use crate::context::RequestContext;
use crate::error::FieldError;
use crate::registry::SiteId;
use crate::resolvers::{self, Arguments, Node, Resolved};
use crate::response::{GraphQlError, PathSegment, Response};
use crate::schema::{FieldDef, ObjectDef, Schema, TypeRef};

/// A null at a non-null position. The error that caused it is already
/// recorded; this only carries the null up to a nullable parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NullPropagation;

type Path = Vec<PathSegment>;

/// Fields grouped by response key, in selection order.
type FieldGroups<'q> = Vec<(&'q str, Vec<&'q Field>)>;

pub(crate) struct Execution<'q> {
    schema: &'q Schema,
    ctx: &'q RequestContext,
    fragments: HashMap<&'q str, &'q FragmentDefinition>,
    operation: Operation<'q>,
    variables: Map<String, Value>,
    errors: Mutex<Vec<GraphQlError>>,
}

impl<'q> Execution<'q> {
    /// Pick the operation to run and coerce its variables. Failures here are
    /// request errors: nothing executes.
    pub(crate) fn prepare(
        schema: &'q Schema,
        ctx: &'q RequestContext,
        document: &'q Document,
        operation_name: Option<&str>,
        variables: Option<&Map<String, Value>>,
    ) -> Result<Self, Vec<GraphQlError>> {
        let operations = ast::operations(document);

        let operation = match operation_name {
            Some(name) => operations
                .iter()
                .find(|operation| operation.name == Some(name))
                .copied()
                .ok_or_else(|| format!("Unknown operation named \"{}\".", name)),
            None => match operations.as_slice() {
                [] => Err("Must provide an operation.".to_owned()),
                [operation] => Ok(*operation),
                _ => Err("Must provide operation name if query contains multiple operations."
                    .to_owned()),
            },
        }
        .map_err(|message| vec![GraphQlError::new(message)])?;

        if operation.kind == OperationKind::Subscription {
            return Err(vec![GraphQlError::new(
                "Schema is not configured to execute subscription operation.",
            )
            .at(ast::location(operation.position))]);
        }

        let empty = Map::new();
        let variables = coerce_variables(operation, variables.unwrap_or(&empty))?;

        Ok(Self {
            schema,
            ctx,
            fragments: ast::fragments(document),
            operation,
            variables,
            errors: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn operation_name(&self) -> Option<&'q str> {
        self.operation.name
    }

    pub(crate) async fn execute(self) -> Response {
        let (root, serial) = match self.operation.kind {
            OperationKind::Mutation => (self.schema.mutation(), true),
            _ => (self.schema.query(), false),
        };

        let mut groups = Vec::new();
        self.collect_fields(root, self.operation.selection_set, &mut groups, &mut HashSet::new());

        let data = match self
            .execute_fields(root, &Node::Root, groups, Vec::new(), None, serial)
            .await
        {
            Ok(fields) => Value::Object(fields),
            Err(NullPropagation) => Value::Null,
        };

        Response {
            data: Some(data),
            errors: self.errors.into_inner().unwrap_or_else(PoisonError::into_inner),
        }
    }

    async fn execute_fields(
        &self,
        object: &'q ObjectDef,
        parent: &Node,
        groups: FieldGroups<'q>,
        path: Path,
        site: Option<&SiteId>,
        serial: bool,
    ) -> Result<Map<String, Value>, NullPropagation> {
        let child = |key: &str| {
            let mut child_path = path.clone();
            child_path.push(PathSegment::Key(key.to_owned()));
            let child_site = match site {
                Some(site) => site.child(key),
                None => SiteId::root(key),
            };
            (child_path, child_site)
        };

        let results = if serial {
            let mut results = Vec::with_capacity(groups.len());
            for (key, fields) in groups {
                let (path, site) = child(key);
                let value = self.resolve_field(object, parent, fields, path, site).await;
                results.push((key, value));
            }
            results
        } else {
            let mut pending = Vec::with_capacity(groups.len());
            for (key, fields) in groups {
                let (path, site) = child(key);
                pending.push(async move {
                    (key, self.resolve_field(object, parent, fields, path, site).await)
                });
            }
            join_all(pending).await
        };

        let mut values = Map::with_capacity(results.len());
        for (key, value) in results {
            values.insert(key.to_owned(), value?);
        }
        Ok(values)
    }

    async fn resolve_field(
        &self,
        object: &'q ObjectDef,
        parent: &Node,
        fields: Vec<&'q Field>,
        path: Path,
        site: SiteId,
    ) -> Result<Value, NullPropagation> {
        let field = fields[0];

        if field.name == "__typename" {
            return Ok(Value::from(object.name));
        }

        let def = match object.field(&field.name) {
            Some(def) => def,
            None => {
                self.field_error(
                    FieldError::Unresolvable {
                        type_name: object.name.to_owned(),
                        field: field.name.clone(),
                    },
                    field,
                    path,
                );
                return Ok(Value::Null);
            }
        };

        let resolved = match self.arguments(def, field) {
            Ok(args) => resolvers::resolve(self.ctx, parent, def, &args, &site).await,
            Err(err) => Err(err),
        };

        match resolved {
            Ok(resolved) => {
                self.complete_value(&def.ty, resolved, object, &fields, path, site)
                    .await
            }
            Err(err) => {
                self.field_error(err, field, path);
                if def.ty.is_non_null() {
                    Err(NullPropagation)
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    /// Shape a resolved value to the field's declared type. A nullable
    /// position absorbs nulls propagated from below it.
    fn complete_value<'b>(
        &'b self,
        ty: &'b TypeRef,
        resolved: Resolved,
        owner: &'q ObjectDef,
        fields: &'b [&'q Field],
        path: Path,
        site: SiteId,
    ) -> BoxFuture<'b, Result<Value, NullPropagation>> {
        async move {
            match ty {
                TypeRef::NonNull(inner) => {
                    let value = self
                        .complete_inner(inner, resolved, owner, fields, path.clone(), site)
                        .await?;
                    if value.is_null() {
                        let err = FieldError::NullViolation {
                            type_name: owner.name.to_owned(),
                            field: fields[0].name.clone(),
                        };
                        self.field_error(err, fields[0], path);
                        Err(NullPropagation)
                    } else {
                        Ok(value)
                    }
                }
                _ => Ok(self
                    .complete_inner(ty, resolved, owner, fields, path, site)
                    .await
                    .unwrap_or(Value::Null)),
            }
        }
        .boxed()
    }

    async fn complete_inner(
        &self,
        ty: &TypeRef,
        resolved: Resolved,
        owner: &'q ObjectDef,
        fields: &[&'q Field],
        path: Path,
        site: SiteId,
    ) -> Result<Value, NullPropagation> {
        match (ty, resolved) {
            (_, Resolved::Null) => Ok(Value::Null),

            // List indices are left out of the site, so every item's
            // relations share one loader.
            (TypeRef::List(item_ty), Resolved::List(items)) => {
                let mut pending = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let mut item_path = path.clone();
                    item_path.push(PathSegment::Index(index));
                    pending.push(self.complete_value(
                        item_ty,
                        item,
                        owner,
                        fields,
                        item_path,
                        site.clone(),
                    ));
                }

                join_all(pending)
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }

            (TypeRef::Named(_), Resolved::Leaf(value)) => Ok(value),

            (TypeRef::Named(name), Resolved::Node(node)) => match self.schema.object(name) {
                Some(object) => {
                    let mut groups = Vec::new();
                    let mut visited = HashSet::new();
                    for field in fields {
                        self.collect_fields(object, &field.selection_set, &mut groups, &mut visited);
                    }

                    self.execute_fields(object, &node, groups, path, Some(&site), false)
                        .await
                        .map(Value::Object)
                }
                None => {
                    self.shape_error(ty, fields[0], path);
                    Ok(Value::Null)
                }
            },

            _ => {
                self.shape_error(ty, fields[0], path);
                Ok(Value::Null)
            }
        }
    }

    /// Flatten a selection set into fields grouped by response key. Fields
    /// selected more than once under the same key are merged.
    fn collect_fields(
        &self,
        object: &ObjectDef,
        selection_set: &'q SelectionSet,
        groups: &mut FieldGroups<'q>,
        visited: &mut HashSet<&'q str>,
    ) {
        for selection in &selection_set.items {
            match selection {
                q::Selection::Field(field) => {
                    if !self.included(&field.directives) {
                        continue;
                    }

                    let key = ast::response_key(field);
                    match groups.iter_mut().find(|(existing, _)| *existing == key) {
                        Some((_, fields)) => fields.push(field),
                        None => groups.push((key, vec![field])),
                    }
                }
                q::Selection::InlineFragment(fragment) => {
                    let applies = ast::inline_type(fragment).map_or(true, |name| name == object.name);
                    if applies && self.included(&fragment.directives) {
                        self.collect_fields(object, &fragment.selection_set, groups, visited);
                    }
                }
                q::Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    if !self.included(&spread.directives) || !visited.insert(name) {
                        continue;
                    }

                    if let Some(fragment) = self.fragments.get(name).copied() {
                        if ast::fragment_type(fragment) == object.name {
                            self.collect_fields(object, &fragment.selection_set, groups, visited);
                        }
                    }
                }
            }
        }
    }

    /// Apply `@skip(if:)` and `@include(if:)`.
    fn included(&self, directives: &[Directive]) -> bool {
        directives.iter().all(|directive| {
            let condition = directive
                .arguments
                .iter()
                .find(|(name, _)| name == "if")
                .map(|(_, value)| literal(value, &self.variables));

            match directive.name.as_str() {
                "skip" => condition != Some(Value::Bool(true)),
                "include" => condition == Some(Value::Bool(true)),
                _ => true,
            }
        })
    }

    fn arguments(&self, def: &FieldDef, field: &Field) -> Result<Arguments, FieldError> {
        let mut values = Map::new();

        for arg in &def.args {
            let value = field
                .arguments
                .iter()
                .find(|(name, _)| name == arg.name)
                .map(|(_, value)| literal(value, &self.variables));

            match value {
                Some(Value::Null) | None if arg.ty.is_non_null() => {
                    return Err(FieldError::Argument {
                        name: arg.name.to_owned(),
                        message: format!("expected a value of type {}", arg.ty),
                    });
                }
                Some(value) => {
                    values.insert(arg.name.to_owned(), value);
                }
                None => {}
            }
        }

        Ok(Arguments::new(values))
    }

    fn field_error(&self, err: FieldError, field: &Field, path: Path) {
        let error = GraphQlError::new(err.to_string())
            .at(ast::location(field.position))
            .with_path(path);

        warn!(
            request_id = %self.ctx.id(),
            path = %error.path_string().unwrap_or_default(),
            error = %err,
            "field resolution failed"
        );

        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    fn shape_error(&self, ty: &TypeRef, field: &Field, path: Path) {
        let error = GraphQlError::new(format!(
            "Field \"{}\" resolved to a value that doesn't match its type {}.",
            field.name, ty
        ))
        .at(ast::location(field.position))
        .with_path(path);

        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }
}

/// Fill in declared variables from the request, falling back to their
/// defaults. Values are checked for presence here and for shape when the
/// arguments using them are coerced.
fn coerce_variables(
    operation: Operation<'_>,
    provided: &Map<String, Value>,
) -> Result<Map<String, Value>, Vec<GraphQlError>> {
    let mut variables = Map::new();
    let mut errors = Vec::new();
    let no_variables = Map::new();

    for definition in operation.variables {
        let name = definition.name.as_str();
        let non_null = matches!(definition.var_type, q::Type::NonNullType(..));
        let location = ast::location(definition.position);

        match provided.get(name) {
            Some(Value::Null) if non_null => errors.push(
                GraphQlError::new(format!(
                    "Variable \"${}\" of non-null type \"{}\" must not be null.",
                    name,
                    type_name(&definition.var_type)
                ))
                .at(location),
            ),
            Some(value) => {
                variables.insert(name.to_owned(), value.clone());
            }
            None => match &definition.default_value {
                Some(default) => {
                    variables.insert(name.to_owned(), literal(default, &no_variables));
                }
                None if non_null => errors.push(
                    GraphQlError::new(format!(
                        "Variable \"${}\" of required type \"{}\" was not provided.",
                        name,
                        type_name(&definition.var_type)
                    ))
                    .at(location),
                ),
                None => {}
            },
        }
    }

    if errors.is_empty() {
        Ok(variables)
    } else {
        Err(errors)
    }
}

fn type_name(ty: &ast::Type) -> String {
    match ty {
        q::Type::NamedType(name) => name.clone(),
        q::Type::ListType(inner) => format!("[{}]", type_name(inner)),
        q::Type::NonNullType(inner) => format!("{}!", type_name(inner)),
    }
}

/// Convert a literal from the document to JSON, substituting variables.
fn literal(value: &ast::Value, variables: &Map<String, Value>) -> Value {
    match value {
        q::Value::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        q::Value::Int(number) => number.as_i64().map_or(Value::Null, Value::from),
        q::Value::Float(number) => Value::from(*number),
        q::Value::String(string) => Value::String(string.clone()),
        q::Value::Boolean(boolean) => Value::Bool(*boolean),
        q::Value::Null => Value::Null,
        q::Value::Enum(name) => Value::String(name.clone()),
        q::Value::List(items) => Value::Array(items.iter().map(|item| literal(item, variables)).collect()),
        q::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), literal(value, variables)))
                .collect(),
        ),
    }
}
