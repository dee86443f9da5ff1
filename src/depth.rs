//! Query depth guard.
//!
//! Runs before any resolver. Root fields sit at depth 0 and every nested
//! field selection adds one; fragments count as if they were written inline.
//! Introspection fields (`__typename` and friends) are not counted.

use std::collections::HashMap;

use graphql_parser::query as q;
use tracing::debug;

use crate::ast::{self, Document, FragmentDefinition, SelectionSet};
use crate::validation::ValidationError;

/// Check every operation in `document` against `max_depth`. Returns one error
/// per operation that goes deeper.
pub fn validate(document: &Document, max_depth: usize) -> Vec<ValidationError> {
    let fragments = ast::fragments(document);

    ast::operations(document)
        .into_iter()
        .filter_map(|operation| {
            let mut walk = Walk {
                fragments: &fragments,
                max_depth,
                visiting: Vec::new(),
            };

            walk.selection_set(operation.selection_set, 0)
                .err()
                .map(|exceeded| {
                    let name = operation.name.unwrap_or("anonymous");
                    debug!(operation = name, max_depth, "operation exceeds depth limit");
                    ValidationError::new(
                        format!("'{}' exceeds maximum operation depth of {}", name, max_depth),
                        vec![ast::location(exceeded)],
                    )
                })
        })
        .collect()
}

struct Walk<'a> {
    fragments: &'a HashMap<&'a str, &'a FragmentDefinition>,
    max_depth: usize,

    // Fragments currently being expanded, so a spread cycle ends instead of
    // recursing forever. Validation reports the cycle itself.
    visiting: Vec<&'a str>,
}

impl<'a> Walk<'a> {
    /// Returns the deepest field depth under this selection set, or the
    /// position of the first field past the limit.
    fn selection_set(
        &mut self,
        selection_set: &'a SelectionSet,
        depth: usize,
    ) -> Result<usize, graphql_parser::Pos> {
        let mut deepest = 0;

        for selection in &selection_set.items {
            let nested = match selection {
                q::Selection::Field(field) => {
                    if depth > self.max_depth {
                        return Err(field.position);
                    }

                    if field.name.starts_with("__") || field.selection_set.items.is_empty() {
                        depth
                    } else {
                        self.selection_set(&field.selection_set, depth + 1)?
                    }
                }
                q::Selection::InlineFragment(fragment) => {
                    self.selection_set(&fragment.selection_set, depth)?
                }
                q::Selection::FragmentSpread(spread) => {
                    let name = spread.fragment_name.as_str();
                    match self.fragments.get(name) {
                        Some(fragment) if !self.visiting.contains(&name) => {
                            self.visiting.push(name);
                            let nested = self.selection_set(&fragment.selection_set, depth);
                            self.visiting.pop();
                            nested?
                        }
                        _ => depth,
                    }
                }
            };

            deepest = deepest.max(nested);
        }

        Ok(deepest)
    }
}
