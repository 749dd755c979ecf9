//! End-to-end dispatch through the JSON boundary

use breeze_core::{
    App, AppConfig, ChannelBridge, Cookie, CookieOptions, Cors, CorsConfig, Error, Exchange,
    HostRequest, LocalHost, Next, Request, RequestId, Response, Router, Settlement,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

fn app_with(router: Router) -> (App, UnboundedReceiver<Settlement>) {
    let (bridge, rx) = ChannelBridge::new();
    (App::new(router, AppConfig::default(), bridge), rx)
}

fn dispatch(app: &App, request: Value, timeout_ms: u64) -> Value {
    serde_json::from_str(&app.dispatch_request(&request.to_string(), timeout_ms)).unwrap()
}

fn dispatch_middleware(app: &App, request: Value, timeout_ms: u64) -> Value {
    serde_json::from_str(&app.dispatch_middleware(&request.to_string(), timeout_ms)).unwrap()
}

fn promise_id(marker: &Value) -> String {
    assert_eq!(marker["__async"], json!(true));
    assert_eq!(marker["__status"], json!("started"));
    marker["__promiseId"].as_str().unwrap().to_string()
}

#[test]
fn scenario_a_json_handler() {
    let mut router = Router::new();
    router.get("/hello", |_req, res| {
        res.json(&json!({"message": "Hello World!"}))?;
        Ok(())
    });
    let (app, _rx) = app_with(router);

    let out = dispatch(&app, json!({"method": "GET", "path": "/hello", "registeredPath": "/hello"}), 1000);
    assert_eq!(out["status"], json!(200));
    assert_eq!(out["content"], json!(r#"{"message":"Hello World!"}"#));
    assert_eq!(out["contentType"], json!("application/json"));
    assert_eq!(out["customParams"], json!({}));
}

#[test]
fn scenario_b_middleware_param_reaches_handler() {
    let mut router = Router::new();
    router.use_fn("*", |req, _res| {
        req.set_param("timestamp", 1_700_000_000u64);
        Ok(Next::Continue)
    });
    router.get("/time", |req, res| {
        let ts = req.get_param("timestamp").cloned().unwrap_or(Value::Null);
        res.json(&json!({"seen": ts}))?;
        Ok(())
    });
    let (app, _rx) = app_with(router);

    let request = json!({"method": "GET", "path": "/time"});
    let chain = dispatch_middleware(&app, request.clone(), 1000);
    assert_eq!(chain["shouldContinue"], json!(true));
    assert_eq!(chain["customParams"]["timestamp"], json!(1_700_000_000u64));

    let mut handler_request = request;
    handler_request["customParams"] = chain["customParams"].clone();
    let out = dispatch(&app, handler_request, 1000);
    assert_eq!(out["content"], json!(r#"{"seen":1700000000}"#));
    assert_eq!(out["customParams"]["timestamp"], json!(1_700_000_000u64));
}

#[test]
fn scenario_c_not_found() {
    let (app, _rx) = app_with(Router::new());

    let out = dispatch(&app, json!({"method": "GET", "path": "/missing"}), 1000);
    assert_eq!(out["status"], json!(404));
    assert_eq!(out["content"], json!("Not Found"));
    assert_eq!(out["contentType"], json!("text/plain"));
}

#[tokio::test(start_paused = true)]
async fn scenario_d_deferred_handler_reports_result() {
    let mut router = Router::new();
    router.get_async("/slow", |req, mut res| async move {
        req.sleep(50).await?;
        res.text("finally");
        Ok(res)
    });
    let (app, mut rx) = app_with(router);

    let marker = dispatch(&app, json!({"method": "GET", "path": "/slow"}), 1000);
    let id = promise_id(&marker);
    assert!(app.is_pending(&id));

    match rx.recv().await.unwrap() {
        Settlement::Result { id: settled, json } => {
            assert_eq!(settled.as_str(), id);
            let out: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(out["content"], json!("finally"));
            assert_eq!(out["status"], json!(200));
        }
        other => panic!("unexpected settlement: {:?}", other),
    }
    assert_eq!(app.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_e_timeout_is_the_only_outcome() {
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();

    let mut router = Router::new();
    router.get_async("/slow", move |_req, mut res| {
        let counter = counter.clone();
        async move {
            // ignores the cancellation token on purpose
            tokio::time::sleep(Duration::from_millis(2000)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            res.text("too late");
            Ok(res)
        }
    });
    let (app, mut rx) = app_with(router);

    let marker = dispatch(&app, json!({"method": "GET", "path": "/slow"}), 100);
    let id = promise_id(&marker);

    let settlement = rx.recv().await.unwrap();
    assert_eq!(
        settlement,
        Settlement::Error { id: id.as_str().into(), message: "Request timeout after 100ms".to_string() }
    );

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(app.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_chain_runs_no_further_middleware() {
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();

    let mut router = Router::new();
    router.use_async("*", |req, res| async move {
        // ignores the cancellation token on purpose
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(Exchange::next(req, res))
    });
    router.use_fn("*", move |_req, _res| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Next::Continue)
    });
    let (app, mut rx) = app_with(router);

    let marker = dispatch_middleware(&app, json!({"method": "GET", "path": "/x"}), 100);
    let id = promise_id(&marker);

    let settlement = rx.recv().await.unwrap();
    assert_eq!(
        settlement,
        Settlement::Error { id: id.as_str().into(), message: "Request timeout after 100ms".to_string() }
    );

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn async_handler_params_reach_output() {
    let mut router = Router::new();
    router.get_async("/profile", |mut req, mut res| async move {
        req.set_param("loaded", true);
        res.text("ok");
        Ok((req, res))
    });
    router.get_async("/plain", |mut req, res| async move {
        req.set_param("dropped", true);
        Ok(res)
    });
    let (app, mut rx) = app_with(router);

    let request = json!({"method": "GET", "path": "/profile", "customParams": {"user": "alice"}});
    promise_id(&dispatch(&app, request, 1000));
    let Settlement::Result { json, .. } = rx.recv().await.unwrap() else {
        panic!("expected a result");
    };
    let out: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(out["customParams"], json!({"user": "alice", "loaded": true}));

    // handing back only the response keeps the params it was called with
    let request = json!({"method": "GET", "path": "/plain", "customParams": {"user": "alice"}});
    promise_id(&dispatch(&app, request, 1000));
    let Settlement::Result { json, .. } = rx.recv().await.unwrap() else {
        panic!("expected a result");
    };
    let out: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(out["customParams"], json!({"user": "alice"}));
}

#[test]
fn registry_composition_through_mount() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut users = Router::new();
    users.get("/list", move |_req, res| {
        counter.fetch_add(1, Ordering::SeqCst);
        res.text("users");
        Ok(())
    });

    let mut root = Router::new();
    root.mount("/api/users", users);
    let (app, _rx) = app_with(root);

    assert!(app.registry().handler("GET", "/api/users/list").is_some());
    let out = dispatch(&app, json!({"method": "GET", "path": "/api/users/list"}), 1000);
    assert_eq!(out["content"], json!("users"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let out = dispatch(&app, json!({"method": "GET", "path": "/list"}), 1000);
    assert_eq!(out["status"], json!(404));
}

#[test]
fn middleware_lists_run_in_pattern_order() {
    fn append(label: &'static str) -> impl Fn(&mut Request, &mut Response) -> breeze_core::Result<Next> {
        move |req: &mut Request, _res: &mut Response| {
            let trail = format!(
                "{}{}",
                req.get_param("trail").and_then(|v| v.as_str()).unwrap_or(""),
                label
            );
            req.set_param("trail", trail);
            Ok(Next::Continue)
        }
    }

    let mut router = Router::new();
    router.use_fn("/api/*", append("a"));
    router.use_fn("*", append("x"));
    router.use_fn("/api/*", append("b"));
    router.use_fn("/other/*", append("!"));
    let (app, _rx) = app_with(router);

    let chain = dispatch_middleware(&app, json!({"method": "GET", "path": "/api/users"}), 1000);
    assert_eq!(chain["shouldContinue"], json!(true));
    assert_eq!(chain["customParams"]["trail"], json!("abx"));
}

#[test]
fn error_short_circuits_chain() {
    let later = Arc::new(AtomicUsize::new(0));
    let counter = later.clone();

    let mut router = Router::new();
    router.use_fn("*", |_req, res| {
        res.status(401);
        Err(Error::handler("Unauthorized"))
    });
    router.use_fn("*", move |_req, _res| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Next::Continue)
    });
    let (app, _rx) = app_with(router);

    let chain = dispatch_middleware(&app, json!({"method": "GET", "path": "/secret"}), 1000);
    assert_eq!(chain["shouldContinue"], json!(false));
    assert_eq!(chain["error"], json!("Unauthorized"));
    assert_eq!(chain["status"], json!(401));
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn deferred_middleware_continues_chain() {
    let mut router = Router::new();
    router.use_async("*", |mut req, res| async move {
        req.set_param("user", json!({"id": 7}));
        Ok(Exchange::next(req, res))
    });
    router.use_fn("*", |req, res| {
        let id = req.get_param("user").and_then(|u| u["id"].as_u64()).unwrap_or(0);
        res.set_header("X-User", id.to_string());
        Ok(Next::Continue)
    });
    let (app, mut rx) = app_with(router);

    let marker = dispatch_middleware(&app, json!({"method": "GET", "path": "/me"}), 1000);
    let id = promise_id(&marker);

    let Settlement::Result { id: settled, json } = rx.recv().await.unwrap() else {
        panic!("expected result");
    };
    assert_eq!(settled.as_str(), id);
    let chain: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(chain["shouldContinue"], json!(true));
    assert_eq!(chain["customParams"]["user"], json!({"id": 7}));
    assert_eq!(chain["headers"]["X-User"], json!("7"));
}

#[tokio::test]
async fn deferred_middleware_error_is_chain_result() {
    let mut router = Router::new();
    router.use_async("*", |_req, _res| async move { Err::<Exchange, _>(Error::handler("token expired")) });
    let (app, mut rx) = app_with(router);

    let marker = dispatch_middleware(&app, json!({"method": "GET", "path": "/me"}), 1000);
    promise_id(&marker);

    let Settlement::Result { json, .. } = rx.recv().await.unwrap() else {
        panic!("expected result");
    };
    let chain: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(chain["shouldContinue"], json!(false));
    assert_eq!(chain["error"], json!("token expired"));
}

#[tokio::test(start_paused = true)]
async fn cancel_pending_aborts_once() {
    let mut router = Router::new();
    router.get_async("/stream", |req, res| async move {
        req.sleep(10_000).await?;
        Ok(res)
    });
    let (app, mut rx) = app_with(router);

    let marker = dispatch(&app, json!({"method": "GET", "path": "/stream"}), 30_000);
    let id = promise_id(&marker);

    assert!(app.cancel_pending(&id));
    assert!(!app.cancel_pending(&id));
    assert_eq!(
        rx.recv().await.unwrap(),
        Settlement::Error { id: id.as_str().into(), message: "Request aborted".to_string() }
    );

    tokio::time::sleep(Duration::from_millis(20_000)).await;
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_uses_configured_default() {
    let mut router = Router::new();
    router.get_async("/slow", |req, res| async move {
        req.sleep(1_000).await?;
        Ok(res)
    });
    let (bridge, mut rx) = ChannelBridge::new();
    let app = App::new(router, AppConfig::new().request_timeout_ms(200), bridge);

    promise_id(&dispatch(&app, json!({"method": "GET", "path": "/slow"}), 0));
    let settlement = rx.recv().await.unwrap();
    assert!(matches!(
        settlement,
        Settlement::Error { ref message, .. } if message == "Request timeout after 200ms"
    ));
}

#[test]
fn malformed_payload_is_400() {
    let (app, _rx) = app_with(Router::new());

    let out: Value = serde_json::from_str(&app.dispatch_request("{not json", 1000)).unwrap();
    assert_eq!(out["status"], json!(400));
    assert_eq!(out["content"], json!("Invalid request JSON"));

    let chain: Value = serde_json::from_str(&app.dispatch_middleware(r#"{"method": 5}"#, 1000)).unwrap();
    assert_eq!(chain["shouldContinue"], json!(false));
    assert_eq!(chain["status"], json!(400));
}

#[test]
fn body_variants_reach_handler() {
    let mut router = Router::new();
    router.post("/echo", |req, res| {
        let kind = if let Some(form) = req.form_data() {
            format!("form:{}", form.len())
        } else if let Some(value) = req.json_data() {
            format!("json:{}", value)
        } else if let Some(bin) = req.binary_data() {
            format!("binary:{}", bin.size)
        } else {
            format!("text:{}", req.text_data().unwrap_or_default())
        };
        res.text(kind);
        Ok(())
    });
    let (app, _rx) = app_with(router);

    let cases = [
        (json!({"type": "form", "data": {"a": "1", "b": "2"}}), "form:2"),
        (json!({"type": "json", "data": [1, 2]}), "json:[1,2]"),
        (json!({"type": "text", "data": "hey"}), "text:hey"),
        (json!({"type": "binary", "data": "AAEC", "contentType": "image/png", "size": 3}), "binary:3"),
    ];
    for (body, expected) in cases {
        let out = dispatch(&app, json!({"method": "POST", "path": "/echo", "body": body}), 1000);
        assert_eq!(out["content"], json!(expected));
    }

    let out = dispatch(&app, json!({"method": "POST", "path": "/echo"}), 1000);
    assert_eq!(out["content"], json!("text:"));
}

#[test]
fn cookies_round_trip_through_response() {
    let mut router = Router::new();
    router.get("/login", |req, res| {
        let visits = req.get_cookie("visits").and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
        res.set_cookie_with("session", "abc", &CookieOptions::new().http_only().max_age(3600));
        res.set_cookie(Cookie::new("visits", (visits + 1).to_string()).path("/"));
        Ok(())
    });
    let (app, _rx) = app_with(router);

    let out = dispatch(&app, json!({"method": "GET", "path": "/login", "cookies": "visits=4"}), 1000);
    let cookies: Vec<&str> = out["headers"]["Set-Cookie"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(cookies.len(), 2);

    let session = Cookie::parse_set_cookie(cookies[0]).unwrap();
    assert_eq!(session.name, "session");
    assert_eq!(session.value, "abc");
    assert!(session.http_only);
    assert_eq!(session.max_age, Some(3600));
    assert_eq!(cookies[1], "visits=5; Path=/");
}

#[tokio::test]
async fn local_host_serves_full_round_trip() {
    let mut router = Router::new();
    router.use_global(RequestId::default());
    router.use_global(Cors::new(CorsConfig::new().allow_origin("https://app.test")));
    router.get_async("/users/:id", |req, mut res| async move {
        let id = req.path_param("id").unwrap_or_default().to_string();
        let request_id = req.get_param("requestId").cloned().unwrap_or(Value::Null);
        res.json(&json!({"id": id, "requestId": request_id}))?;
        Ok(res)
    });

    let host = LocalHost::new();
    let app = App::new(router, AppConfig::default(), host.clone());
    assert_eq!(host.middleware_patterns(), vec!["*".to_string()]);

    let request = HostRequest::new("GET", "/users/42?verbose=1")
        .header("Origin", "https://app.test")
        .header("X-Request-ID", "req-1");
    let res = host.handle(&app, request).await;

    assert_eq!(res.status, 200);
    let body: Value = serde_json::from_str(&res.content).unwrap();
    assert_eq!(body, json!({"id": "42", "requestId": "req-1"}));
    assert_eq!(
        res.headers.get("Access-Control-Allow-Origin").and_then(|v| v.first()),
        Some("https://app.test")
    );
    assert_eq!(res.headers.get("X-Request-ID").and_then(|v| v.first()), Some("req-1"));
    assert_eq!(app.pending_count(), 0);
}

#[tokio::test]
async fn local_host_preflight_and_rejection() {
    let mut router = Router::new();
    router.use_global(Cors::new(CorsConfig::new().allow_origin("https://app.test")));
    router.post("/items", |_req, res| {
        res.status(201).text("created");
        Ok(())
    });

    let host = LocalHost::new();
    let app = App::new(router, AppConfig::default(), host.clone());

    let preflight = HostRequest::new("OPTIONS", "/items").header("Origin", "https://app.test");
    let res = host.handle(&app, preflight).await;
    assert_eq!(res.status, 204);
    assert!(res.headers.contains_key("Access-Control-Allow-Methods"));

    let rejected = HostRequest::new("POST", "/items").header("Origin", "https://evil.test");
    let res = host.handle(&app, rejected).await;
    assert_eq!(res.status, 403);

    let allowed = HostRequest::new("POST", "/items")
        .header("Origin", "https://app.test")
        .body("application/json", r#"{"name":"pen"}"#);
    let res = host.handle(&app, allowed).await;
    assert_eq!(res.status, 201);
    assert_eq!(res.content, "created");
}

#[tokio::test(start_paused = true)]
async fn local_host_maps_timeout_to_408() {
    let mut router = Router::new();
    router.get_async("/slow", |req, res| async move {
        req.sleep(60_000).await?;
        Ok(res)
    });

    let host = LocalHost::new();
    let app = App::new(router, AppConfig::new().request_timeout_ms(100), host.clone());

    let res = host.handle(&app, HostRequest::new("GET", "/slow")).await;
    assert_eq!(res.status, 408);
    assert_eq!(res.content, "Request Timeout");
}

#[tokio::test]
async fn local_host_keeps_middleware_and_handler_cookies() {
    let mut router = Router::new();
    router.use_fn("*", |_req, res| {
        res.set_cookie(Cookie::new("sid", "1"));
        Ok(Next::Continue)
    });
    router.get("/prefs", |_req, res| {
        res.set_cookie(Cookie::new("theme", "dark")).text("saved");
        Ok(())
    });

    let host = LocalHost::new();
    let app = App::new(router, AppConfig::default(), host.clone());

    let res = host.handle(&app, HostRequest::new("GET", "/prefs")).await;
    assert_eq!(res.content, "saved");
    let cookies: Vec<&str> = res.headers["Set-Cookie"].values().collect();
    assert_eq!(cookies, vec!["sid=1", "theme=dark"]);
}
