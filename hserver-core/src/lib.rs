// Core library for the hserver dispatch engine
// Path tree, pattern resolver, staged handler pipeline and the router on top

pub mod context;
pub mod error;
pub mod handler;
pub mod logging;
pub mod params_tree;
pub mod router;
pub mod stage;
pub mod stage_tree;
pub mod tree;
pub mod verb;

/// Result of a request whose accept handlers produced nothing.
pub const NO_CONTENT: u16 = 204;

/// Result of a request that matched no route.
pub const NOT_FOUND: u16 = 404;

// Re-export commonly used types
pub use context::{Context, Params, PARAMS_KEY};
pub use error::*;
pub use handler::{handler, sync_handler, BoxedHandler, Call, Handler, HandlerResult, IntoBoxedHandler};
pub use params_tree::{ParamsTree, Pattern, Resolution, Rule};
pub use router::Router;
pub use stage::{RouteOptions, Stage};
pub use stage_tree::{ErrorSink, Invocation, StageTree};
pub use tree::{NodeId, PathTree};
pub use verb::{Verb, ANY_VERB};
