//! Router dispatch tests over literal routes.

use hserver_core::handler::{Call, handler, sync_handler};
use hserver_core::{Context, Error, ErrorSink, RouteOptions, Router, Stage};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

fn returns(value: Value) -> hserver_core::BoxedHandler {
    sync_handler(move |_| Ok(Some(value.clone())))
}

fn noop() -> hserver_core::BoxedHandler {
    sync_handler(|_| Ok(None))
}

fn stage(name: &str) -> RouteOptions {
    RouteOptions::new().stage(name)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Handler that waits `delay` milliseconds, then records `label`.
fn delayed(events: &Arc<Mutex<Vec<u32>>>, delay: u64, label: u32) -> hserver_core::BoxedHandler {
    let events = events.clone();
    handler(move |_call: Call| {
        let events = events.clone();
        async move {
            sleep_ms(delay).await;
            events.lock().push(label);
            Ok(None)
        }
    })
}

/// Sink recording the stage of every reported failure.
fn recording_sink() -> (ErrorSink, Arc<Mutex<Vec<Stage>>>) {
    let stages = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let stages = stages.clone();
        ErrorSink::new(move |stage, _| stages.lock().push(stage))
    };
    (sink, stages)
}

#[test]
fn test_root_handlers_do_not_change_shape() {
    let mut a = Router::new();
    a.add_route("/", returns(json!(""))).unwrap();
    a.add_route("/a", returns(json!(""))).unwrap();

    let mut b = Router::new();
    b.add_route("/a", returns(json!(""))).unwrap();

    assert_eq!(a.to_string(), b.to_string());
}

#[tokio::test]
async fn test_accept() {
    let mut router = Router::new();
    router.add_route("/", returns(json!("/"))).unwrap();
    router
        .add_route_with("/api", returns(json!("/api")), RouteOptions::new().verb("GET"))
        .unwrap();

    let ctx = Context::new();
    assert_eq!(router.process("GET", "/", &ctx).await.unwrap(), json!("/"));
    assert_eq!(router.process("POST", "/", &ctx).await.unwrap(), json!("/"));
    assert_eq!(router.process("GET", "/api", &ctx).await.unwrap(), json!("/api"));
    assert_eq!(router.process("GET", "/404", &ctx).await.unwrap(), json!(404));
}

#[tokio::test]
async fn test_input_runs_in_series() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();

    router.add_route("/api", returns(json!("/api"))).unwrap();
    router
        .add_route_with("/api", delayed(&events, 10, 1), stage("input"))
        .unwrap();
    router
        .add_route_with("/api", delayed(&events, 5, 2), stage("input"))
        .unwrap();

    router.process("GET", "/api", &Context::new()).await.unwrap();
    assert_eq!(*events.lock(), vec![1, 2]);
}

#[tokio::test]
async fn test_output_runs_in_series() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();

    router.add_route("/api", returns(json!("/api"))).unwrap();
    router
        .add_route_with("/api", delayed(&events, 10, 1), stage("output"))
        .unwrap();
    router
        .add_route_with("/api", delayed(&events, 5, 2), stage("output"))
        .unwrap();

    let result = router.process("GET", "/api", &Context::new()).await.unwrap();
    assert_eq!(result, json!("/api"));
    assert_eq!(*events.lock(), vec![1, 2]);
}

#[tokio::test]
async fn test_input_result_skips_output() {
    let output_ran = Arc::new(Mutex::new(false));
    let mut router = Router::new();

    router.add_route("/api", returns(json!("/api"))).unwrap();
    router
        .add_route_with("/api", returns(json!(true)), stage("input"))
        .unwrap();
    {
        let output_ran = output_ran.clone();
        router
            .add_route_with(
                "/api",
                sync_handler(move |_| {
                    *output_ran.lock() = true;
                    Ok(None)
                }),
                stage("output"),
            )
            .unwrap();
    }

    let result = router.process("GET", "/api", &Context::new()).await.unwrap();
    assert_eq!(result, json!(true));
    assert!(!*output_ran.lock());
}

#[tokio::test]
async fn test_enter_and_leave() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();

    let record = |label: &'static str| {
        let events = events.clone();
        sync_handler(move |_| {
            events.lock().push(label);
            Ok(None)
        })
    };

    router.add_route_with("/", record("enter"), stage("enter")).unwrap();
    router.add_route("/", returns(json!("/"))).unwrap();
    router.add_route_with("/", record("leave"), stage("leave")).unwrap();

    let result = router.process("GET", "/", &Context::new()).await.unwrap();
    assert_eq!(result, json!("/"));

    sleep_ms(20).await;
    let mut seen = events.lock().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec!["enter", "leave"]);
}

#[tokio::test]
async fn test_enter_is_not_awaited() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();

    router
        .add_route_with("/", delayed(&events, 10, 1), stage("enter"))
        .unwrap();
    router
        .add_route_with("/", delayed(&events, 10, 1), stage("enter"))
        .unwrap();
    router.add_route("/", returns(json!("/"))).unwrap();

    let result = router.process("GET", "/", &Context::new()).await.unwrap();
    assert_eq!(result, json!("/"));
    assert!(events.lock().is_empty());

    sleep_ms(40).await;
    assert_eq!(*events.lock(), vec![1, 1]);
}

#[tokio::test]
async fn test_enter_error_goes_to_sink() {
    let mut router = Router::new();
    router
        .add_route_with("/", sync_handler(|_| Err(Error::handler("enter"))), stage("enter"))
        .unwrap();
    router.add_route("/", returns(json!("/"))).unwrap();

    let (sink, stages) = recording_sink();
    let result = router
        .process_with("GET", "/", &Context::new(), &sink)
        .await
        .unwrap();
    assert_eq!(result, json!("/"));

    sleep_ms(20).await;
    assert_eq!(*stages.lock(), vec![Stage::Enter]);
}

#[tokio::test]
async fn test_leave_error_goes_to_sink() {
    let mut router = Router::new();
    router
        .add_route_with("/", sync_handler(|_| Err(Error::handler("leave"))), stage("leave"))
        .unwrap();
    router.add_route("/", returns(json!("/"))).unwrap();

    let (sink, stages) = recording_sink();
    let result = router
        .process_with("GET", "/", &Context::new(), &sink)
        .await
        .unwrap();
    assert_eq!(result, json!("/"));

    sleep_ms(20).await;
    assert_eq!(*stages.lock(), vec![Stage::Leave]);
}

#[tokio::test]
async fn test_handlers_see_the_request_context() {
    let mut router = Router::new();
    router
        .add_route("/", sync_handler(|call: Call| Ok(Some(call.context.to_value()))))
        .unwrap();

    let result = router.process("GET", "/", &Context::new()).await.unwrap();
    assert_eq!(result, json!({ "params": {} }));

    let mut fields = Map::new();
    fields.insert("user".to_string(), json!("alice"));
    let result = router
        .process("GET", "/", &Context::from_fields(fields))
        .await
        .unwrap();
    assert_eq!(result, json!({ "user": "alice", "params": {} }));
}

#[tokio::test]
async fn test_context_is_shared_across_stages() {
    let mut router = Router::new();
    router
        .add_route_with(
            "/",
            sync_handler(|call: Call| {
                call.context.insert("user", "alice");
                Ok(None)
            }),
            stage("input"),
        )
        .unwrap();
    router
        .add_route(
            "/api",
            sync_handler(|call: Call| Ok(call.context.get("user"))),
        )
        .unwrap();

    let ctx = Context::new();
    let result = router.process("GET", "/api", &ctx).await.unwrap();
    assert_eq!(result, json!("alice"));
    assert_eq!(ctx.get_str("user").as_deref(), Some("alice"));
}

#[test]
fn test_mount_at_root() {
    let mut parent = Router::new();
    let mut child = Router::new();
    parent.add_route("/a", noop()).unwrap();
    child.add_route("/b", noop()).unwrap();
    parent.mount(child, "/");

    let mut expected = Router::new();
    expected.add_route("/a", noop()).unwrap();
    expected.add_route("/b", noop()).unwrap();

    assert_eq!(parent.to_string(), expected.to_string());
}

#[test]
fn test_mount_at_path() {
    let mut parent = Router::new();
    let mut child = Router::new();
    parent.add_route("/a/b", noop()).unwrap();
    child.add_route("/c", noop()).unwrap();
    parent.mount(child, "/a/b");

    let mut expected = Router::new();
    expected.add_route("/a/b", noop()).unwrap();
    expected.add_route("/a/b/c", noop()).unwrap();

    assert_eq!(parent.to_string(), expected.to_string());
}

#[tokio::test]
async fn test_mounted_routes_dispatch() {
    let mut parent = Router::new();
    let mut child = Router::new();
    parent.add_route("/a/b", noop()).unwrap();
    child.add_route("/c", returns(json!("/c"))).unwrap();
    parent.mount(child, "/a/b");

    let ctx = Context::new();
    assert_eq!(parent.process("GET", "/a/b/c", &ctx).await.unwrap(), json!("/c"));
    assert_eq!(parent.process("GET", "/c", &ctx).await.unwrap(), json!(404));
}

#[tokio::test]
async fn test_mount_appends_after_existing_handlers() {
    let mut parent = Router::new();
    let mut child = Router::new();
    parent
        .add_route_with("/x", returns(json!("parent")), stage("input"))
        .unwrap();
    parent.add_route("/x", noop()).unwrap();
    child
        .add_route_with("/", returns(json!("child")), stage("input"))
        .unwrap();
    parent.mount(child, "/x");

    let levels = parent.stages().invoke(&"GET".into(), "/x");
    assert_eq!(levels[1].input.len(), 2);

    let result = parent.process("GET", "/x", &Context::new()).await.unwrap();
    assert_eq!(result, json!("parent"));
}

#[tokio::test]
async fn test_leading_slash_is_optional() {
    let mut router = Router::new();
    let ctx = Context::new();

    router.add_route("/a/b/c", returns(json!("ok"))).unwrap();
    assert_eq!(router.process("POST", "a/b/c", &ctx).await.unwrap(), json!("ok"));

    router.add_route("d/e/f", returns(json!("ok"))).unwrap();
    assert_eq!(router.process("POST", "/d/e/f", &ctx).await.unwrap(), json!("ok"));
}

#[tokio::test]
async fn test_output_replaces_result() {
    let original = Arc::new(Mutex::new(None));
    let mut router = Router::new();

    router.add_route("/api", returns(json!("ok"))).unwrap();
    {
        let original = original.clone();
        router
            .add_route_with(
                "/api",
                sync_handler(move |call: Call| {
                    *original.lock() = call.result;
                    Ok(Some(json!("normalized")))
                }),
                stage("output"),
            )
            .unwrap();
    }

    let result = router.process("GET", "/api", &Context::new()).await.unwrap();
    assert_eq!(result, json!("normalized"));
    assert_eq!(*original.lock(), Some(json!("ok")));
}

#[tokio::test]
async fn test_outputs_run_root_to_leaf() {
    let mut router = Router::new();
    let wrap = |label: &'static str| {
        sync_handler(move |call: Call| Ok(Some(json!([label, call.result]))))
    };

    router.add_route("/a/b", returns(json!("x"))).unwrap();
    router.add_route_with("/", wrap("root"), stage("output")).unwrap();
    router.add_route_with("/a/b", wrap("leaf"), stage("output")).unwrap();

    let result = router.process("GET", "/a/b", &Context::new()).await.unwrap();
    assert_eq!(result, json!(["leaf", ["root", "x"]]));
}

#[tokio::test]
async fn test_undefined_accept_is_no_content() {
    let mut router = Router::new();
    router.add_route("/api", noop()).unwrap();

    let result = router.process("GET", "/api", &Context::new()).await.unwrap();
    assert_eq!(result, json!(204));
}

#[tokio::test]
async fn test_paths_are_case_sensitive() {
    let mut router = Router::new();
    router.add_route("/api", noop()).unwrap();

    let result = router.process("GET", "/API", &Context::new()).await.unwrap();
    assert_eq!(result, json!(404));
}

#[tokio::test]
async fn test_output_error_aborts() {
    let mut router = Router::new();
    router.add_route("/api", returns(json!("ok"))).unwrap();
    router
        .add_route_with("/api", sync_handler(|_| Err(Error::handler("bad output"))), stage("output"))
        .unwrap();

    let err = router
        .process("GET", "/api", &Context::new())
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Output));
    assert_eq!(err.status_code(), 500);
}
