//! Document validation against the schema.
//!
//! Only the checks the executor relies on are done here: every selected
//! field exists, selections match leaf-ness, fragments resolve and don't
//! cycle, arguments are known and present, directives are known, and every
//! variable used is declared. Literal argument values are checked later,
//! when the field's arguments are coerced.

use std::collections::{HashMap, HashSet};

use graphql_parser::query as q;
use serde::Serialize;
use thiserror::Error;

use crate::ast::{self, Directive, Document, FragmentDefinition, OperationKind, SelectionSet, Type, Value};
use crate::response::Location;
use crate::schema::{FieldDef, ObjectDef, Schema, TypeDef};

/// A problem with the request document. Any of these stop the request
/// before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub locations: Vec<Location>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, locations: Vec<Location>) -> Self {
        Self {
            message: message.into(),
            locations,
        }
    }

    fn at(message: impl Into<String>, pos: graphql_parser::Pos) -> Self {
        Self::new(message, vec![ast::location(pos)])
    }
}

pub fn validate(schema: &Schema, document: &Document) -> Vec<ValidationError> {
    let operations = ast::operations(document);
    let mut validator = Validator {
        schema,
        fragments: ast::fragments(document),
        errors: Vec::new(),
        defined_variables: HashSet::new(),
        spreading: Vec::new(),
        used_fragments: HashSet::new(),
    };

    validator.check_fragment_names(document);

    let mut names = HashMap::new();
    for operation in &operations {
        match operation.name {
            None if operations.len() > 1 => validator.push(ValidationError::at(
                "This anonymous operation must be the only defined operation.",
                operation.position,
            )),
            None => {}
            Some(name) => {
                if let Some(first) = names.insert(name, operation.position) {
                    validator.push(ValidationError::new(
                        format!("There can be only one operation named \"{}\".", name),
                        vec![ast::location(first), ast::location(operation.position)],
                    ));
                }
            }
        }

        let root = match operation.kind {
            OperationKind::Query => schema.query(),
            OperationKind::Mutation => schema.mutation(),
            OperationKind::Subscription => {
                validator.push(ValidationError::at(
                    "Schema is not configured to execute subscription operation.",
                    operation.position,
                ));
                continue;
            }
        };

        validator.defined_variables.clear();
        for variable in operation.variables {
            validator.variable_type(&variable.var_type, variable.position);
            validator.defined_variables.insert(variable.name.as_str());
        }

        validator.selection_set(root, operation.selection_set);
    }

    let mut unused: Vec<_> = validator
        .fragments
        .iter()
        .filter(|(name, _)| !validator.used_fragments.contains(*name))
        .map(|(name, fragment)| {
            ValidationError::at(format!("Fragment \"{}\" is never used.", name), fragment.position)
        })
        .collect();
    unused.sort_by_key(|err| err.locations.clone());
    for err in unused {
        validator.push(err);
    }

    validator.errors
}

struct Validator<'a> {
    schema: &'a Schema,
    fragments: HashMap<&'a str, &'a FragmentDefinition>,
    errors: Vec<ValidationError>,
    defined_variables: HashSet<&'a str>,
    spreading: Vec<&'a str>,
    used_fragments: HashSet<&'a str>,
}

impl<'a> Validator<'a> {
    // A fragment expanded under several operations would otherwise report
    // its problems once per operation.
    fn push(&mut self, err: ValidationError) {
        if !self.errors.contains(&err) {
            self.errors.push(err);
        }
    }

    fn check_fragment_names(&mut self, document: &'a Document) {
        let mut seen = HashSet::new();
        for definition in &document.definitions {
            if let q::Definition::Fragment(fragment) = definition {
                if !seen.insert(fragment.name.as_str()) {
                    self.push(ValidationError::at(
                        format!("There can be only one fragment named \"{}\".", fragment.name),
                        fragment.position,
                    ));
                }
            }
        }
    }

    fn variable_type(&mut self, ty: &Type, pos: graphql_parser::Pos) {
        match ty {
            q::Type::NamedType(name) => match self.schema.get(name) {
                Some(TypeDef::Object(..)) => self.push(ValidationError::at(
                    format!("Variable type \"{}\" is not an input type.", name),
                    pos,
                )),
                Some(..) => {}
                None => self.push(ValidationError::at(format!("Unknown type \"{}\".", name), pos)),
            },
            q::Type::ListType(inner) | q::Type::NonNullType(inner) => self.variable_type(inner, pos),
        }
    }

    fn selection_set(&mut self, parent: &'a ObjectDef, selection_set: &'a SelectionSet) {
        // Response key -> field name, for the fields written directly in
        // this selection set.
        let mut keys: HashMap<&str, &str> = HashMap::new();

        for selection in &selection_set.items {
            match selection {
                q::Selection::Field(field) => {
                    self.directives(&field.directives);

                    let key = ast::response_key(field);
                    match keys.get(key) {
                        Some(name) if *name != field.name => {
                            self.push(ValidationError::at(
                                format!(
                                    "Fields \"{}\" conflict because \"{}\" and \"{}\" are different fields.",
                                    key, name, field.name
                                ),
                                field.position,
                            ));
                            continue;
                        }
                        Some(..) => {}
                        None => {
                            keys.insert(key, &field.name);
                        }
                    }

                    if field.name == "__typename" {
                        if !field.selection_set.items.is_empty() {
                            self.push(ValidationError::at(
                                "Field \"__typename\" must not have a selection since type \"String!\" has no subfields.",
                                field.position,
                            ));
                        }
                        continue;
                    }

                    let def = match parent.field(&field.name) {
                        Some(def) => def,
                        None => {
                            self.push(ValidationError::at(
                                format!(
                                    "Cannot query field \"{}\" on type \"{}\".",
                                    field.name, parent.name
                                ),
                                field.position,
                            ));
                            continue;
                        }
                    };

                    self.arguments(parent, def, &field.arguments, field.position);

                    let base = def.ty.base();
                    match self.schema.object(base) {
                        None if !field.selection_set.items.is_empty() => {
                            self.push(ValidationError::at(
                                format!(
                                    "Field \"{}\" must not have a selection since type \"{}\" has no subfields.",
                                    field.name, def.ty
                                ),
                                field.position,
                            ));
                        }
                        None => {}
                        Some(..) if field.selection_set.items.is_empty() => {
                            self.push(ValidationError::at(
                                format!(
                                    "Field \"{}\" of type \"{}\" must have a selection of subfields. Did you mean \"{} {{ ... }}\"?",
                                    field.name, def.ty, field.name
                                ),
                                field.position,
                            ));
                        }
                        Some(object) => self.selection_set(object, &field.selection_set),
                    }
                }
                q::Selection::InlineFragment(fragment) => {
                    self.directives(&fragment.directives);

                    let target = match ast::inline_type(fragment) {
                        None => Some(parent),
                        Some(name) => self.type_condition(parent, None, name, fragment.position),
                    };
                    if let Some(target) = target {
                        self.selection_set(target, &fragment.selection_set);
                    }
                }
                q::Selection::FragmentSpread(spread) => {
                    self.directives(&spread.directives);

                    let name = spread.fragment_name.as_str();
                    self.used_fragments.insert(name);

                    let fragment = match self.fragments.get(name) {
                        Some(fragment) => *fragment,
                        None => {
                            self.push(ValidationError::at(
                                format!("Unknown fragment \"{}\".", name),
                                spread.position,
                            ));
                            continue;
                        }
                    };

                    if self.spreading.contains(&name) {
                        self.push(ValidationError::at(
                            format!("Cannot spread fragment \"{}\" within itself.", name),
                            spread.position,
                        ));
                        continue;
                    }

                    let condition = ast::fragment_type(fragment);
                    if let Some(target) =
                        self.type_condition(parent, Some(name), condition, spread.position)
                    {
                        self.spreading.push(name);
                        self.selection_set(target, &fragment.selection_set);
                        self.spreading.pop();
                    }
                }
            }
        }
    }

    /// Check a fragment's type condition where it's used. Every type here is
    /// an object type, so the condition has to name the parent type.
    fn type_condition(
        &mut self,
        parent: &'a ObjectDef,
        fragment: Option<&str>,
        condition: &str,
        pos: graphql_parser::Pos,
    ) -> Option<&'a ObjectDef> {
        let schema = self.schema;
        match schema.get(condition) {
            None => {
                self.push(ValidationError::at(format!("Unknown type \"{}\".", condition), pos));
                None
            }
            Some(TypeDef::Object(..)) if condition == parent.name => Some(parent),
            Some(TypeDef::Object(..)) => {
                let subject = match fragment {
                    Some(name) => format!("Fragment \"{}\"", name),
                    None => "Fragment".to_owned(),
                };
                self.push(ValidationError::at(
                    format!(
                        "{} cannot be spread here as objects of type \"{}\" can never be of type \"{}\".",
                        subject, parent.name, condition
                    ),
                    pos,
                ));
                None
            }
            Some(..) => {
                self.push(ValidationError::at(
                    format!("Fragment cannot condition on non composite type \"{}\".", condition),
                    pos,
                ));
                None
            }
        }
    }

    fn arguments(
        &mut self,
        parent: &ObjectDef,
        def: &FieldDef,
        arguments: &'a [(String, Value)],
        pos: graphql_parser::Pos,
    ) {
        for (name, value) in arguments {
            if def.argument(name).is_none() {
                self.push(ValidationError::at(
                    format!(
                        "Unknown argument \"{}\" on field \"{}.{}\".",
                        name, parent.name, def.name
                    ),
                    pos,
                ));
            }
            self.variables_in(value, pos);
        }

        for arg in &def.args {
            let provided = arguments.iter().any(|(name, _)| name == arg.name);
            if arg.ty.is_non_null() && !provided {
                self.push(ValidationError::at(
                    format!(
                        "Field \"{}\" argument \"{}\" of type \"{}\" is required, but it was not provided.",
                        def.name, arg.name, arg.ty
                    ),
                    pos,
                ));
            }
        }
    }

    fn directives(&mut self, directives: &'a [Directive]) {
        for directive in directives {
            match directive.name.as_str() {
                "skip" | "include" => {
                    let condition = directive.arguments.iter().find(|(name, _)| name == "if");
                    match condition {
                        Some((_, value)) => self.variables_in(value, directive.position),
                        None => self.push(ValidationError::at(
                            format!(
                                "Directive \"@{}\" argument \"if\" of type \"Boolean!\" is required, but it was not provided.",
                                directive.name
                            ),
                            directive.position,
                        )),
                    }
                }
                other => self.push(ValidationError::at(
                    format!("Unknown directive \"@{}\".", other),
                    directive.position,
                )),
            }
        }
    }

    fn variables_in(&mut self, value: &'a Value, pos: graphql_parser::Pos) {
        match value {
            q::Value::Variable(name) => {
                if !self.defined_variables.contains(name.as_str()) {
                    self.push(ValidationError::at(
                        format!("Variable \"${}\" is not defined.", name),
                        pos,
                    ));
                }
            }
            q::Value::List(items) => {
                for item in items {
                    self.variables_in(item, pos);
                }
            }
            q::Value::Object(fields) => {
                for item in fields.values() {
                    self.variables_in(item, pos);
                }
            }
            _ => {}
        }
    }
}
