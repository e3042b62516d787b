/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Remote object and actor resolution.
//!
//! Actors are served from the object store first; a cached document
//! older than 36 hours is still returned, but with an advisory stale
//! status that makes the caller refresh it from the network. Statuses
//! follow the store convention (`valid_status`), with 404/410 marking a
//! permanently gone peer.

use crate::{
    builder,
    config::Context,
    store::{mtime, valid_status},
    user::User,
};
use serde_json::Value;
use std::{
    fs::OpenOptions,
    io::Write,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::debug;

/// A cached actor document is considered stale after this long.
pub const ACTOR_STALE_SECS: u64 = 36 * 3600;

/// Advisory status: the cached copy is usable but should be refreshed.
pub const STATUS_STALE: u16 = 205;

/// Fetches an ActivityPub object over a signed GET, insisting on an
/// activity content type.
pub async fn activitypub_request(ctx: &Context, user: &User, url: &str) -> (u16, Option<Value>) {
    let resp = match ctx.http.signed_request(user, "GET", url, None).await {
        Ok(r) => r,
        Err(e) => {
            debug!("[{}] activitypub_request {url}: {e:#}", user.uid);
            return (500, None);
        }
    };

    if !valid_status(resp.status) {
        return (resp.status, None);
    }

    let ctype = resp.header("content-type").unwrap_or_default();
    if !ctype.contains("application/activity+json") && !ctype.contains("application/ld+json") {
        return (500, None);
    }

    match resp.body_json() {
        Some(obj) => (resp.status, Some(obj)),
        None => (500, None),
    }
}

/// Returns an already stored actor. Our own actor is built on the fly.
/// A stale document is touched (so the stale status fires at most once
/// per window) and reported as [`STATUS_STALE`].
pub fn actor_get(ctx: &Context, user: &User, actor: &str) -> (u16, Option<Value>) {
    if actor == user.actor {
        return (200, Some(builder::msg_actor(ctx, user)));
    }

    let store = ctx.store();
    let (status, data) = store.get(actor, None);
    if !valid_status(status) {
        return (status, data);
    }

    let path = store.path_for(actor);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if mtime(&path) + ACTOR_STALE_SECS < now {
        // bump the mtime with a trailing blank so only one caller per
        // window sees the stale status
        if let Ok(mut f) = OpenOptions::new().append(true).open(&path) {
            let _ = f.write_all(b" ");
        }
        return (STATUS_STALE, data);
    }

    (200, data)
}

/// Resolves an actor: disk first, then a signed fetch that refreshes
/// the store. When the fetch fails but a stale copy exists, the stale
/// copy is returned.
pub async fn actor_request(ctx: &Context, user: &User, actor: &str) -> (u16, Option<Value>) {
    let (status, data) = actor_get(ctx, user, actor);
    if status == 200 {
        return (status, data);
    }

    let (f_status, payload) = activitypub_request(ctx, user, actor).await;

    if valid_status(f_status) {
        if let Some(payload) = payload {
            ctx.store().put_overwrite(actor, &payload);
            return (201, Some(payload));
        }
    }

    if status == STATUS_STALE {
        // stinks, but still edible
        return (status, data);
    }

    (f_status, None)
}

/// An actor's delivery target, preferring the shared inbox.
pub async fn get_actor_inbox(ctx: &Context, user: &User, actor: &str) -> Option<String> {
    let (status, data) = actor_request(ctx, user, actor).await;
    if !valid_status(status) {
        return None;
    }
    let data = data?;

    data.get("endpoints")
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
        .or_else(|| data.get("inbox").and_then(Value::as_str))
        .map(str::to_string)
}
