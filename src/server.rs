// HTTP/1 server on top of the router

use crate::adapter::{Adapter, Body, DefaultAdapter};
use hserver_core::logging::{debug, error, info};
use hserver_core::{Context, ErrorSink, IntoBoxedHandler, Result, RouteOptions, Router, Verb};
use http::{Request, Response};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};

/// A router bound to an [`Adapter`].
pub struct Server<A = DefaultAdapter> {
    router: Router,
    adapter: Arc<A>,
}

impl Server<DefaultAdapter> {
    /// An empty server using [`DefaultAdapter`].
    pub fn new() -> Self {
        Self::with_adapter(DefaultAdapter)
    }
}

impl Default for Server<DefaultAdapter> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Adapter> Server<A> {
    /// An empty server using `adapter` for every request.
    pub fn with_adapter(adapter: A) -> Self {
        Self {
            router: Router::new(),
            adapter: Arc::new(adapter),
        }
    }

    /// See [`Router::add_route`].
    pub fn add_route(&mut self, template: &str, handler: impl IntoBoxedHandler) -> Result<()> {
        self.router.add_route(template, handler)
    }

    /// See [`Router::add_route_with`].
    pub fn add_route_with(
        &mut self,
        template: &str,
        handler: impl IntoBoxedHandler,
        options: RouteOptions,
    ) -> Result<()> {
        self.router.add_route_with(template, handler, options)
    }

    /// Mount `router` at `path`.
    pub fn take(&mut self, path: &str, router: Router) -> &mut Self {
        self.router.mount(router, path);
        self
    }

    /// The router requests are dispatched through.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The adapter handling request and response conversion.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Dispatch a prepared context by its `method` and `pathname` fields.
    ///
    /// A missing method dispatches as the wildcard verb.
    pub async fn process(&self, context: &Context) -> Result<Value> {
        let verb = context.get_str("method").map(Verb::from).unwrap_or_default();
        let path = context.get_str("pathname").unwrap_or_else(|| "/".to_string());

        let adapter = self.adapter.clone();
        let sink = ErrorSink::new(move |stage, err| adapter.on_error(Some(stage), err));
        self.router.process_with(verb, &path, context, &sink).await
    }

    /// Turn one request into a response.
    ///
    /// [`Adapter::on_finish`] runs once the response is built, before hyper
    /// writes it to the connection.
    pub async fn handle(&self, request: Request<Incoming>) -> Response<Body> {
        self.adapter.on_request(&request);

        let context = match self.adapter.context(request).await {
            Ok(context) => context,
            Err(err) => {
                self.adapter.on_error(err.stage(), &err);
                self.adapter.on_finish(None);
                return self.adapter.error_response(&err);
            }
        };

        let outcome = match self.process(&context).await {
            Ok(result) => self
                .adapter
                .response(&context, &result)
                .map(|response| (response, result)),
            Err(err) => Err(err),
        };

        match outcome {
            Ok((response, result)) => {
                self.adapter.on_finish(Some(&result));
                response
            }
            Err(err) => {
                self.adapter.on_error(err.stage(), &err);
                self.adapter.on_finish(None);
                self.adapter.error_response(&err)
            }
        }
    }

    /// Accept connections from `listener` until an accept fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Accept connections until `signal` resolves, then close the listener.
    ///
    /// Connections already accepted run to completion on their own tasks.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let server = Arc::new(self);
        tokio::pin!(signal);

        loop {
            let (stream, remote) = tokio::select! {
                accepted = listener.accept() => accepted?,
                () = &mut signal => {
                    info!("Shutdown signal received, listener closed");
                    return Ok(());
                }
            };
            debug!(client = %remote, "Connection accepted");

            let io = TokioIo::new(stream);
            let server = server.clone();

            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(request).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!(client = %remote, error = %err, "Error serving connection");
                }
            });
        }
    }

    /// Bind `addr` and serve.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> Result<()> {
        self.listen_with_shutdown(addr, std::future::pending()).await
    }

    /// Bind `addr` and serve until `signal` resolves.
    pub async fn listen_with_shutdown<F>(self, addr: impl ToSocketAddrs, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(addr).await?;
        info!(address = %listener.local_addr()?, "Server listening");
        self.serve_with_shutdown(listener, signal).await
    }
}

impl<A> fmt::Display for Server<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.router, f)
    }
}

impl<A> fmt::Debug for Server<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
