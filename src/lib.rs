// hserver - staged request dispatch for HTTP servers
//
// The dispatch engine lives in `hserver-core`; this crate adds the hyper
// transport bridge, configuration and a runnable server binary.

// Re-export core functionality
pub use hserver_core::*;

pub mod adapter;
pub mod config;
pub mod server;

pub use adapter::{Adapter, DefaultAdapter};
pub use config::{ConfigError, LogSettings, ServerConfig};
pub use server::Server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Adapter, Call, Context, DefaultAdapter, Error, ErrorSink, HandlerResult, Params,
        RouteOptions, Router, Server, ServerConfig, Stage, Verb, handler, sync_handler,
    };
}
