//! Borrowed views over the parsed query document.

use std::collections::HashMap;

use graphql_parser::query as q;
use graphql_parser::Pos;

use crate::response::Location;

// Documents are converted to their owned form right after parsing, so the
// executor's borrows only ever point into the document itself.
pub(crate) type Document = q::Document<'static, String>;
pub(crate) type SelectionSet = q::SelectionSet<'static, String>;
pub(crate) type Field = q::Field<'static, String>;
pub(crate) type FragmentDefinition = q::FragmentDefinition<'static, String>;
pub(crate) type InlineFragment = q::InlineFragment<'static, String>;
pub(crate) type VariableDefinition = q::VariableDefinition<'static, String>;
pub(crate) type Directive = q::Directive<'static, String>;
pub(crate) type Value = q::Value<'static, String>;
pub(crate) type Type = q::Type<'static, String>;

pub(crate) fn parse(source: &str) -> Result<Document, graphql_parser::query::ParseError> {
    Ok(q::parse_query::<String>(source)?.into_static())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// One operation of the document, with the shorthand `{ ... }` form
/// normalized to an anonymous query.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Operation<'q> {
    pub kind: OperationKind,
    pub name: Option<&'q str>,
    pub position: Pos,
    pub variables: &'q [VariableDefinition],
    pub selection_set: &'q SelectionSet,
}

impl<'q> Operation<'q> {
    fn new(definition: &'q q::OperationDefinition<'static, String>) -> Self {
        match definition {
            q::OperationDefinition::SelectionSet(selection_set) => Operation {
                kind: OperationKind::Query,
                name: None,
                position: selection_set.span.0,
                variables: &[],
                selection_set,
            },
            q::OperationDefinition::Query(query) => Operation {
                kind: OperationKind::Query,
                name: query.name.as_deref(),
                position: query.position,
                variables: &query.variable_definitions,
                selection_set: &query.selection_set,
            },
            q::OperationDefinition::Mutation(mutation) => Operation {
                kind: OperationKind::Mutation,
                name: mutation.name.as_deref(),
                position: mutation.position,
                variables: &mutation.variable_definitions,
                selection_set: &mutation.selection_set,
            },
            q::OperationDefinition::Subscription(subscription) => Operation {
                kind: OperationKind::Subscription,
                name: subscription.name.as_deref(),
                position: subscription.position,
                variables: &subscription.variable_definitions,
                selection_set: &subscription.selection_set,
            },
        }
    }
}

pub(crate) fn operations(document: &Document) -> Vec<Operation<'_>> {
    document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            q::Definition::Operation(operation) => Some(Operation::new(operation)),
            q::Definition::Fragment(..) => None,
        })
        .collect()
}

pub(crate) fn fragments(document: &Document) -> HashMap<&str, &FragmentDefinition> {
    document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            q::Definition::Fragment(fragment) => Some((fragment.name.as_str(), fragment)),
            q::Definition::Operation(..) => None,
        })
        .collect()
}

pub(crate) fn fragment_type(fragment: &FragmentDefinition) -> &str {
    let q::TypeCondition::On(name) = &fragment.type_condition;
    name
}

pub(crate) fn inline_type(fragment: &InlineFragment) -> Option<&str> {
    fragment
        .type_condition
        .as_ref()
        .map(|q::TypeCondition::On(name)| name.as_str())
}

/// The key a field's value is stored under in the response.
pub(crate) fn response_key(field: &Field) -> &str {
    field.alias.as_deref().unwrap_or(&field.name)
}

pub(crate) fn location(pos: Pos) -> Location {
    Location {
        line: pos.line,
        column: pos.column,
    }
}
