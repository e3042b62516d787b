/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The HTTP daemon.
//!
//! One fallback service dispatches on method and path: the actor
//! document and its collections, per-post pages, static files, the
//! webfinger endpoint, and the inbox POST gate. The inbox checks
//! content type and body digest before anything is queued; signature
//! verification happens later in the worker, against the queued copy of
//! the request headers.

use crate::{
    builder,
    client::USER_AGENT,
    config::Context,
    http_sig,
    queue::{enqueue_input, tid},
    user::{user_list, User},
    worker::start_queue_worker,
};
use anyhow::{Context as _, Result};
use axum::{body::Body, routing::any, Router};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use http::{request::Parts, Request, Response, StatusCode};
use serde_json::{json, Value};
use std::{fs, net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// 1x1 transparent PNG, the default avatar.
const AVATAR_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

const MAX_BODY: usize = 2 * 1024 * 1024;

fn simple(status: StatusCode, text: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .header("x-creator", USER_AGENT)
        .body(Body::from(text.to_string()))
        .unwrap_or_default()
}

fn with_body(status: StatusCode, ctype: &str, body: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", ctype)
        .header("x-creator", USER_AGENT)
        .body(Body::from(body))
        .unwrap_or_default()
}

fn json_response(status: StatusCode, ctype: &str, value: &Value) -> Response<Body> {
    let body = serde_json::to_vec_pretty(value).unwrap_or_default();
    with_body(status, ctype, body)
}

fn wants_activity(parts: &Parts) -> bool {
    parts
        .headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .map(|a| a.contains("application/activity+json") || a.contains("application/ld+json"))
        .unwrap_or(false)
}

pub async fn handle_request(ctx: &Context, req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();

    let mut q_path = parts.uri.path().trim_end_matches('/').to_string();
    if !ctx.config.prefix.is_empty() {
        if let Some(stripped) = q_path.strip_prefix(&ctx.config.prefix) {
            q_path = stripped.to_string();
        }
    }

    match parts.method.as_str() {
        "GET" | "HEAD" => get_handler(ctx, &parts, &q_path).await,
        "POST" => post_handler(ctx, &parts, &q_path, body).await,
        _ => simple(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    }
}

async fn get_handler(ctx: &Context, parts: &Parts, q_path: &str) -> Response<Body> {
    match q_path {
        "" => return greeting_get(ctx),
        "/style.css" => {
            return match fs::read(ctx.basedir.join("style.css")) {
                Ok(css) => with_body(StatusCode::OK, "text/css", css),
                Err(_) => simple(StatusCode::NOT_FOUND, "not found"),
            };
        }
        "/avatar.png" => {
            let png = B64.decode(AVATAR_PNG).unwrap_or_default();
            return with_body(StatusCode::OK, "image/png", png);
        }
        "/.well-known/webfinger" => return webfinger_get(ctx, parts),
        _ => {}
    }

    let Some(rest) = q_path.strip_prefix('/') else {
        return simple(StatusCode::NOT_FOUND, "not found");
    };
    let segments: Vec<&str> = rest.split('/').collect();

    let Ok(user) = User::open(ctx, segments[0]) else {
        debug!("get_handler bad user {}", segments[0]);
        return simple(StatusCode::NOT_FOUND, "not found");
    };

    // static files need no content negotiation
    if segments.len() >= 3 && segments[1] == "s" {
        return static_get(&user, &segments[2..].join("/"));
    }

    if !wants_activity(parts) {
        return simple(StatusCode::NOT_FOUND, "not found");
    }

    let resp = match &segments[1..] {
        [] => {
            // the actor document itself
            let person = builder::msg_actor(ctx, &user);
            json_response(StatusCode::OK, "application/ld+json", &person)
        }
        ["outbox"] => outbox_get(ctx, &user),
        ["followers"] | ["following"] => {
            let id = format!("{}/{}", user.actor, segments[1]);
            let coll = builder::msg_collection(&user, &id);
            json_response(StatusCode::OK, "application/activity+json", &coll)
        }
        ["p", tid_part] => {
            let id = format!("{}/p/{tid_part}", user.actor);
            match user.cache(ctx).timeline_find(&id) {
                Some(msg) => json_response(StatusCode::OK, "application/activity+json", &msg),
                None => simple(StatusCode::NOT_FOUND, "not found"),
            }
        }
        _ => simple(StatusCode::NOT_FOUND, "not found"),
    };

    debug!("get_handler serving {q_path}");
    resp
}

/// The 20 most recent own public notes as an OrderedCollection.
fn outbox_get(ctx: &Context, user: &User) -> Response<Body> {
    let cache = user.cache(ctx);
    let show = 20.min(ctx.config.max_timeline_entries);

    let items: Vec<Value> = cache
        .timeline_list("public", 0, show)
        .into_iter()
        .filter_map(|md5| cache.timeline_get(&md5))
        .filter(|msg| {
            msg.get("type").and_then(Value::as_str) == Some("Note")
                && msg
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|id| id.starts_with(&user.actor))
                    .unwrap_or(false)
        })
        .collect();

    let mut coll = builder::msg_collection(user, &format!("{}/outbox", user.actor));
    coll["totalItems"] = json!(items.len());
    coll["orderedItems"] = json!(items);
    json_response(StatusCode::OK, "application/activity+json", &coll)
}

fn static_get(user: &User, name: &str) -> Response<Body> {
    if name.contains("..") {
        return simple(StatusCode::NOT_FOUND, "not found");
    }
    let path = user.static_dir().join(name);
    match fs::read(&path) {
        Ok(data) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            with_body(StatusCode::OK, mime.essence_str(), data)
        }
        Err(_) => simple(StatusCode::NOT_FOUND, "not found"),
    }
}

fn greeting_get(ctx: &Context) -> Response<Body> {
    let Ok(mut page) = fs::read_to_string(ctx.basedir.join("greeting.html")) else {
        return simple(StatusCode::NOT_FOUND, "not found");
    };

    page = page.replace("%host%", &ctx.config.host);

    if page.contains("%userlist%") {
        let mut ul = String::from("<ul class=\"wx-user-list\">\n");
        for uid in user_list(ctx) {
            if let Ok(user) = User::open(ctx, &uid) {
                ul.push_str(&format!(
                    "<li><a href=\"{}\">@{}@{} ({})</a></li>\n",
                    user.actor, uid, ctx.config.host, user.profile.name
                ));
            }
        }
        ul.push_str("</ul>\n");
        page = page.replace("%userlist%", &ul);
    }

    with_body(StatusCode::OK, "text/html; charset=utf-8", page.into_bytes())
}

fn webfinger_get(ctx: &Context, parts: &Parts) -> Response<Body> {
    let resource = parts
        .uri
        .query()
        .and_then(|q| {
            q.split('&')
                .find_map(|p| p.strip_prefix("resource="))
                .map(|v| urlencoding::decode(v).map(|s| s.into_owned()).unwrap_or_default())
        })
        .unwrap_or_default();

    if resource.is_empty() {
        return simple(StatusCode::BAD_REQUEST, "missing resource");
    }

    let user = if resource.starts_with("https://") {
        // actor search: find the user with this actor url
        user_list(ctx)
            .into_iter()
            .filter_map(|uid| User::open(ctx, &uid).ok())
            .find(|u| u.actor == resource)
    } else if let Some(acct) = resource.strip_prefix("acct:") {
        let acct = acct.strip_prefix('@').unwrap_or(acct);
        match acct.split_once('@') {
            Some((uid, host)) if host == ctx.config.host => User::open(ctx, uid).ok(),
            _ => None,
        }
    } else {
        None
    };

    let Some(user) = user else {
        return simple(StatusCode::NOT_FOUND, "not found");
    };

    let jrd = json!({
        "subject": format!("acct:{}@{}", user.uid, ctx.config.host),
        "links": [{
            "rel": "self",
            "type": "application/activity+json",
            "href": user.actor,
        }],
    });

    json_response(StatusCode::OK, "application/json", &jrd)
}

async fn post_handler(ctx: &Context, parts: &Parts, q_path: &str, body: Body) -> Response<Body> {
    let Some(rest) = q_path.strip_prefix('/') else {
        return simple(StatusCode::NOT_FOUND, "not found");
    };
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.len() != 2 || segments[1] != "inbox" {
        debug!("post_handler unsupported path {q_path}");
        return simple(StatusCode::NOT_FOUND, "not found");
    }

    let Ok(user) = User::open(ctx, segments[0]) else {
        debug!("post_handler bad user {}", segments[0]);
        return simple(StatusCode::NOT_FOUND, "not found");
    };

    let ctype = parts
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !ctype.contains("application/activity+json") && !ctype.contains("application/ld+json") {
        return simple(StatusCode::BAD_REQUEST, "invalid content-type");
    }

    let Ok(payload) = axum::body::to_bytes(body, MAX_BODY).await else {
        return simple(StatusCode::BAD_REQUEST, "invalid body");
    };

    let Ok(msg) = serde_json::from_slice::<Value>(&payload) else {
        info!("post_handler JSON error {q_path}");
        return simple(StatusCode::BAD_REQUEST, "invalid json");
    };

    // the digest must be checked now: the payload is canonicalized into
    // the queue and will not be byte-identical later
    match parts.headers.get("digest").and_then(|v| v.to_str().ok()) {
        Some(digest) => {
            if digest != http_sig::digest_header(&payload) {
                info!("post_handler digest check FAILED");
                return simple(StatusCode::BAD_REQUEST, "digest mismatch");
            }
        }
        None if !payload.is_empty() => {
            return simple(StatusCode::BAD_REQUEST, "digest required");
        }
        None => {}
    }

    // keep the original headers for signature replay in the worker
    let mut req = serde_json::Map::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            req.insert(name.as_str().to_ascii_lowercase(), json!(value));
        }
    }
    req.insert("path".into(), json!(parts.uri.path()));
    let req = Value::Object(req);

    archive_recv(ctx, &req, &payload);
    enqueue_input(ctx, &user, &msg, &req, 0);

    with_body(
        StatusCode::ACCEPTED,
        "application/activity+json",
        Vec::new(),
    )
}

fn archive_recv(ctx: &Context, req: &Value, payload: &[u8]) {
    if !ctx.config.archive {
        return;
    }
    let dir = ctx.basedir.join("archive").join(format!("{}_RECV", tid(0)));
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let meta = format!(
        "dir: RECV\nreq: {}\np_size: {}\n",
        serde_json::to_string_pretty(req).unwrap_or_default(),
        payload.len()
    );
    let _ = fs::write(dir.join("_META"), meta);
    let _ = fs::write(dir.join("payload"), payload);
}

/// Binds the listener, starts the queue worker, and serves until
/// SIGTERM/SIGINT. Outstanding queue items stay on disk and are picked
/// up on restart.
pub async fn run(ctx: Arc<Context>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let term = async {
                #[cfg(unix)]
                {
                    let mut sig = tokio::signal::unix::signal(
                        tokio::signal::unix::SignalKind::terminate(),
                    )
                    .expect("install SIGTERM handler");
                    sig.recv().await;
                }
                #[cfg(not(unix))]
                std::future::pending::<()>().await;
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term => {}
            }
            let _ = tx.send(true);
        });
    }

    let worker = start_queue_worker(ctx.clone(), shutdown_rx.clone());

    let router_ctx = ctx.clone();
    let router = Router::new()
        .fallback(any(move |req: Request<Body>| {
            let ctx = router_ctx.clone();
            async move { handle_request(&ctx, req).await }
        }))
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", ctx.config.address, ctx.config.port)
        .parse()
        .context("parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
    info!("httpd start {addr} {USER_AGENT}");

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .context("serve")?;

    // let the queue worker finish its current pass
    let _ = worker.await;
    info!("httpd stop {addr}");
    Ok(())
}
