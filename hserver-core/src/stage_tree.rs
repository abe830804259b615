//! Staged pipeline execution.
//!
//! Every request runs through five stages:
//!
//! | stage    | scheduling                 | failure                         |
//! |----------|----------------------------|---------------------------------|
//! | `enter`  | spawned, not awaited       | reported to the [`ErrorSink`]   |
//! | `input`  | sequential, short-circuits | aborts the request              |
//! | `accept` | sequential, innermost only | aborts the request              |
//! | `output` | sequential, root to leaf   | aborts the request              |
//! | `leave`  | spawned, not awaited       | reported to the [`ErrorSink`]   |
//!
//! `leave` handlers of every level that was reached run exactly once per
//! request, whether it succeeded or failed. A failed request hands them the
//! error before it is returned to the caller.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Call, HandlerResult, IntoBoxedHandler};
use crate::logging::{debug, trace, warn};
use crate::stage::Stage;
use crate::tree::{Node, PathTree};
use crate::verb::Verb;
use crate::{NO_CONTENT, NOT_FOUND};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Callback receiving `enter` and `leave` failures.
#[derive(Clone)]
pub struct ErrorSink {
    inner: Arc<dyn Fn(Stage, &Error) + Send + Sync>,
}

impl ErrorSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Stage, &Error) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// A sink that drops every report.
    pub fn ignore() -> Self {
        Self::new(|_, _| {})
    }

    pub fn report(&self, stage: Stage, error: &Error) {
        (self.inner)(stage, error)
    }
}

/// Logs each failure at WARN.
impl Default for ErrorSink {
    fn default() -> Self {
        Self::new(|stage, error| {
            warn!(stage = %stage, error = %error, "Stage handler failed");
        })
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink").finish_non_exhaustive()
    }
}

/// Handlers of one tree level, merged for a request verb.
///
/// Exact-verb handlers come first, wildcard handlers after them.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub enter: Vec<BoxedHandler>,
    pub input: Vec<BoxedHandler>,
    pub accept: Vec<BoxedHandler>,
    pub output: Vec<BoxedHandler>,
    pub leave: Vec<BoxedHandler>,
}

impl Invocation {
    fn merge(node: &Node, verb: &Verb) -> Self {
        let merged = |stage: Stage| -> Vec<BoxedHandler> {
            verb.with_fallback()
                .flat_map(|token| node.handlers(stage, token))
                .cloned()
                .collect()
        };
        Self {
            enter: merged(Stage::Enter),
            input: merged(Stage::Input),
            accept: merged(Stage::Accept),
            output: merged(Stage::Output),
            leave: merged(Stage::Leave),
        }
    }

    pub fn handlers(&self, stage: Stage) -> &[BoxedHandler] {
        match stage {
            Stage::Enter => &self.enter,
            Stage::Input => &self.input,
            Stage::Accept => &self.accept,
            Stage::Output => &self.output,
            Stage::Leave => &self.leave,
        }
    }
}

/// Path tree annotated with stage handlers.
#[derive(Debug, Default)]
pub struct StageTree {
    tree: PathTree,
}

impl StageTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    /// Mutable access for grafting other trees.
    pub fn tree_mut(&mut self) -> &mut PathTree {
        &mut self.tree
    }

    pub fn into_tree(self) -> PathTree {
        self.tree
    }

    /// Register `handler` for `stage` at the literal `path`.
    ///
    /// Fails with [`Error::UnsupportedStage`] for unknown stage names.
    pub fn on_stage(
        &mut self,
        stage: &str,
        verbs: &[Verb],
        path: &str,
        handler: impl IntoBoxedHandler,
    ) -> Result<()> {
        let stage: Stage = stage.parse()?;
        self.register(stage, verbs, path, handler.into_boxed());
        Ok(())
    }

    pub(crate) fn register(&mut self, stage: Stage, verbs: &[Verb], path: &str, handler: BoxedHandler) {
        debug!(stage = %stage, verbs = ?verbs, path, "Registering stage handler");

        let node = self.tree.find_or_make(path);
        if verbs.is_empty() {
            self.tree.push_handler(node, stage, Verb::any(), handler);
            return;
        }
        for verb in verbs {
            self.tree.push_handler(node, stage, verb.clone(), handler.clone());
        }
    }

    /// Merged handlers per level, root first. Empty when `path` has no node.
    pub fn invoke(&self, verb: &Verb, path: &str) -> Vec<Invocation> {
        self.tree
            .path(path)
            .into_iter()
            .map(|id| Invocation::merge(self.tree.node(id), verb))
            .collect()
    }

    /// Run the pipeline for the literal `path`.
    ///
    /// Paths without a node, or whose node has no `accept` handler, run the
    /// [not-found flow](StageTree::not_found) instead.
    pub async fn process(
        &self,
        verb: &Verb,
        path: &str,
        context: &Context,
        sink: &ErrorSink,
    ) -> Result<Value> {
        let levels = self.invoke(verb, path);
        if levels.last().is_none_or(|level| level.accept.is_empty()) {
            return self.not_found(verb, path, context, sink).await;
        }
        debug!(verb = %verb, path, levels = levels.len(), "Processing request");

        let mut activated = 0;
        let mut result = None;
        let error = run_levels(&levels, context, sink, &mut activated, &mut result)
            .await
            .err();

        let leave = Call::new(context.clone())
            .with_result(result.clone())
            .with_error(error.clone());
        for level in levels[..activated].iter().rev() {
            spawn_all(&level.leave, Stage::Leave, &leave, sink);
        }

        match error {
            Some(err) => {
                debug!(verb = %verb, path, stage = ?err.stage(), error = %err, "Request failed");
                Err(err)
            }
            None => Ok(result.unwrap_or_else(|| Value::from(NO_CONTENT))),
        }
    }

    /// Run the handlers registered at `/` for a request that matched nothing.
    ///
    /// `leave` handlers receive [`Error::NotFound`] unless a real failure
    /// occurred, which is then returned. Without any result the request
    /// resolves to `404`.
    pub async fn not_found(
        &self,
        verb: &Verb,
        path: &str,
        context: &Context,
        sink: &ErrorSink,
    ) -> Result<Value> {
        debug!(verb = %verb, path, "No route found");

        let root = self.invoke(verb, "/").into_iter().next().unwrap_or_default();
        spawn_all(&root.enter, Stage::Enter, &Call::new(context.clone()), sink);

        let mut result = None;
        let error = run_root(&root, context, &mut result).await.err();

        let leave = Call::new(context.clone())
            .with_result(result.clone())
            .with_error(Some(error.clone().unwrap_or(Error::NotFound)));
        spawn_all(&root.leave, Stage::Leave, &leave, sink);

        match error {
            Some(err) => Err(err),
            None => Ok(result.unwrap_or_else(|| Value::from(NOT_FOUND))),
        }
    }
}

async fn run_levels(
    levels: &[Invocation],
    context: &Context,
    sink: &ErrorSink,
    activated: &mut usize,
    result: &mut Option<Value>,
) -> Result<()> {
    for level in levels {
        spawn_all(&level.enter, Stage::Enter, &Call::new(context.clone()), sink);
        *activated += 1;

        let input = first_defined(&level.input, context)
            .await
            .map_err(|err| err.at_stage(Stage::Input))?;
        if input.is_some() {
            trace!(level = *activated, "Input short-circuited the request");
            *result = input;
            return Ok(());
        }
    }

    let accepted = match levels.last() {
        Some(innermost) => first_defined(&innermost.accept, context)
            .await
            .map_err(|err| err.at_stage(Stage::Accept))?,
        None => None,
    };
    *result = Some(accepted.unwrap_or_else(|| Value::from(NO_CONTENT)));

    run_output(levels, context, result).await
}

async fn run_root(root: &Invocation, context: &Context, result: &mut Option<Value>) -> Result<()> {
    let input = first_defined(&root.input, context)
        .await
        .map_err(|err| err.at_stage(Stage::Input))?;
    if input.is_some() {
        *result = input;
        return Ok(());
    }
    run_output(std::slice::from_ref(root), context, result).await
}

async fn run_output(levels: &[Invocation], context: &Context, result: &mut Option<Value>) -> Result<()> {
    for handler in levels.iter().flat_map(|level| &level.output) {
        let call = Call::new(context.clone()).with_result(result.clone());
        let output = handler
            .call(call)
            .await
            .map_err(|err| err.at_stage(Stage::Output))?;
        if output.is_some() {
            *result = output;
        }
    }
    Ok(())
}

/// Await handlers in order until one produces a value.
async fn first_defined(handlers: &[BoxedHandler], context: &Context) -> HandlerResult {
    for handler in handlers {
        if let Some(value) = handler.call(Call::new(context.clone())).await? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn spawn_all(handlers: &[BoxedHandler], stage: Stage, call: &Call, sink: &ErrorSink) {
    for handler in handlers {
        let handler = handler.clone();
        let call = call.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            if let Err(err) = handler.call(call).await {
                sink.report(stage, &err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::sync_handler;
    use parking_lot::Mutex;

    #[test]
    fn test_unsupported_stage() {
        let mut tree = StageTree::new();
        let err = tree
            .on_stage("finally", &[Verb::any()], "/", sync_handler(|_| Ok(None)))
            .unwrap_err();

        assert!(matches!(err, Error::UnsupportedStage(name) if name == "finally"));
        assert!(tree.tree().is_empty());
    }

    #[test]
    fn test_invoke_merges_exact_before_wildcard() {
        let exact = sync_handler(|_| Ok(None));
        let any = sync_handler(|_| Ok(None));

        let mut tree = StageTree::new();
        tree.on_stage("input", &[Verb::any()], "/api", any.clone()).unwrap();
        tree.on_stage("input", &[Verb::from("GET")], "/api", exact.clone()).unwrap();

        let levels = tree.invoke(&Verb::from("GET"), "/api");
        assert_eq!(levels.len(), 2);
        assert!(levels[1].input[0].ptr_eq(&exact));
        assert!(levels[1].input[1].ptr_eq(&any));

        let levels = tree.invoke(&Verb::any(), "/api");
        assert_eq!(levels[1].input.len(), 1);
        assert!(levels[1].handlers(Stage::Input)[0].ptr_eq(&any));

        assert!(tree.invoke(&Verb::from("GET"), "/missing").is_empty());
    }

    #[tokio::test]
    async fn test_input_error_is_tagged() {
        let mut tree = StageTree::new();
        tree.on_stage("input", &[], "/api", sync_handler(|_| Err(Error::handler("bad input"))))
            .unwrap();
        tree.on_stage("accept", &[], "/api", sync_handler(|_| Ok(Some(Value::from("ok")))))
            .unwrap();

        let err = tree
            .process(&Verb::from("GET"), "/api", &Context::new(), &ErrorSink::ignore())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Input));
        assert_eq!(err.to_string(), "bad input");
    }

    #[tokio::test]
    async fn test_sink_receives_enter_failures() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let reported = reported.clone();
            ErrorSink::new(move |stage, err| reported.lock().push((stage, err.to_string())))
        };

        let mut tree = StageTree::new();
        tree.on_stage("enter", &[], "/", sync_handler(|_| Err(Error::handler("enter failed"))))
            .unwrap();
        tree.on_stage("accept", &[], "/", sync_handler(|_| Ok(Some(Value::from(1)))))
            .unwrap();

        let result = tree
            .process(&Verb::any(), "/", &Context::new(), &sink)
            .await
            .unwrap();
        assert_eq!(result, Value::from(1));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            *reported.lock(),
            vec![(Stage::Enter, "enter failed".to_string())]
        );
    }
}
