// Dispatch front door
//
// Literal routes dispatch straight through the stage tree. Templates with
// `name:pattern` segments are marked in the resolver and registered at their
// pattern-free path, so the stage tree only ever sees literal keys.

use crate::context::Context;
use crate::error::Result;
use crate::handler::IntoBoxedHandler;
use crate::logging::{debug, trace};
use crate::params_tree::{has_params, strip_params, ParamsTree, Resolution};
use crate::stage::{RouteOptions, Stage};
use crate::stage_tree::{ErrorSink, StageTree};
use crate::tree::PathTree;
use crate::verb::Verb;
use serde_json::Value;
use std::fmt;

/// Router over literal and parameterized routes.
///
/// # Examples
///
/// ```
/// use hserver_core::{Context, Router};
/// use hserver_core::handler::{sync_handler, Call};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let mut router = Router::new();
/// router.add_route("/users/id:\\d+", sync_handler(|call: Call| {
///     Ok(call.context.params().first("id").map(|id| json!(id)))
/// })).unwrap();
///
/// let result = router.process("GET", "/users/42", &Context::new()).await.unwrap();
/// assert_eq!(result, json!("42"));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct Router {
    stages: StageTree,
    params: ParamsTree,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an `accept` handler for every verb.
    pub fn add_route(&mut self, template: &str, handler: impl IntoBoxedHandler) -> Result<()> {
        self.add_route_with(template, handler, RouteOptions::default())
    }

    /// Register a handler with explicit verbs and stage.
    ///
    /// The stage name and every pattern are validated before anything is
    /// recorded.
    pub fn add_route_with(
        &mut self,
        template: &str,
        handler: impl IntoBoxedHandler,
        options: RouteOptions,
    ) -> Result<()> {
        let stage: Stage = options.stage_name().parse()?;
        let verbs = options.verb_list();

        let path = if has_params(template) {
            self.params.mark(self.stages.tree_mut(), verbs, template)?;
            strip_params(template)
        } else {
            template.to_string()
        };

        debug!(template, path = %path, stage = %stage, "Route added");
        self.stages.register(stage, verbs, &path, handler.into_boxed());
        Ok(())
    }

    /// Graft `child` at `at`; its routes become reachable under `at`.
    pub fn mount(&mut self, child: Router, at: &str) {
        debug!(at, "Mounting router");
        self.stages.tree_mut().mount(child.stages.into_tree(), at);
    }

    /// The path tree shared by stage handlers and parameter patterns.
    pub fn tree(&self) -> &PathTree {
        self.stages.tree()
    }

    /// Literal dispatch, used directly for paths without parameters.
    pub fn stages(&self) -> &StageTree {
        &self.stages
    }

    /// Resolver for parameterized paths and its match cache.
    pub fn params(&self) -> &ParamsTree {
        &self.params
    }

    /// Dispatch a request, logging `enter`/`leave` failures.
    pub async fn process(&self, verb: impl Into<Verb>, path: &str, context: &Context) -> Result<Value> {
        self.process_with(verb, path, context, &ErrorSink::default())
            .await
    }

    /// Dispatch a request, reporting `enter`/`leave` failures to `sink`.
    pub async fn process_with(
        &self,
        verb: impl Into<Verb>,
        path: &str,
        context: &Context,
        sink: &ErrorSink,
    ) -> Result<Value> {
        let verb = verb.into();
        let tree = self.stages.tree();

        let nodes = tree.path(path);
        if !nodes.is_empty() && nodes.iter().all(|&id| !tree.node(id).has_params()) {
            trace!(verb = %verb, path, "Literal route");
            return self.stages.process(&verb, path, context, sink).await;
        }

        match self.params.find(tree, &verb, path) {
            Some(Resolution { params, normalized }) => {
                context.set_params(params);
                self.stages.process(&verb, &normalized, context, sink).await
            }
            None => self.stages.not_found(&verb, path, context, sink).await,
        }
    }
}

impl fmt::Display for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.tree(), f)
    }
}
