//! The request pipeline: parse, guard depth, validate, execute.

use std::sync::Arc;

use futures::future::{self, Either};
use futures_timer::Delay;
use tracing::{debug, info_span, warn, Instrument};

use crate::ast;
use crate::config::ServiceConfig;
use crate::context::RequestContext;
use crate::depth;
use crate::executor::Execution;
use crate::port::DataPort;
use crate::response::{GraphQlError, Request, Response};
use crate::schema::Schema;
use crate::validation;

/// Executes requests against a data port. Cheap to clone; clones share the
/// schema and port, never loaders.
#[derive(Clone)]
pub struct Service {
    schema: Arc<Schema>,
    port: Arc<dyn DataPort>,
    config: ServiceConfig,
}

impl Service {
    pub fn new(port: Arc<dyn DataPort>, config: ServiceConfig) -> Self {
        Self {
            schema: Arc::new(Schema::new()),
            port,
            config,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run one request to completion. Every failure is reported inside the
    /// response; this never returns an error itself.
    pub async fn execute(&self, request: Request) -> Response {
        let document = match ast::parse(&request.query) {
            Ok(document) => document,
            Err(err) => {
                debug!(error = %err, "query failed to parse");
                return Response::from_errors([GraphQlError::new(format!("Syntax Error: {}", err))]);
            }
        };

        let errors = depth::validate(&document, self.config.max_depth);
        if !errors.is_empty() {
            return Response::from_errors(errors);
        }

        let errors = validation::validate(&self.schema, &document);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "query failed validation");
            return Response::from_errors(errors);
        }

        // Loaders live exactly as long as this context.
        let ctx = RequestContext::new(Arc::clone(&self.port), self.config.max_batch_keys());

        let execution = match Execution::prepare(
            &self.schema,
            &ctx,
            &document,
            request.operation_name.as_deref(),
            request.variables.as_ref(),
        ) {
            Ok(execution) => execution,
            Err(errors) => return Response::from_errors(errors),
        };

        let span = info_span!(
            "request",
            request_id = %ctx.id(),
            operation = execution.operation_name().unwrap_or("anonymous"),
        );
        let run = ctx.scheduler().run(execution.execute()).instrument(span);

        // Timer thread, not a runtime timer: `block_on` callers get a
        // deadline too.
        let response = match self.config.request_timeout() {
            None => run.await,
            Some(limit) => match future::select(Box::pin(run), Delay::new(limit)).await {
                Either::Left((response, _)) => response,
                Either::Right(_) => {
                    // The request future, and every batch still waiting in
                    // it, is dropped here.
                    warn!(request_id = %ctx.id(), timeout_ms = limit.as_millis() as u64, "request timed out");
                    Response::from_errors([GraphQlError::new(format!(
                        "Request timed out after {} ms",
                        limit.as_millis()
                    ))])
                }
            },
        };

        debug!(
            request_id = %ctx.id(),
            loaders = ctx.registry().len(),
            errors = response.errors.len(),
            "request finished"
        );
        response
    }
}
