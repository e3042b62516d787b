/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Filesystem-durable delayed queue.
//!
//! Every user owns `queue/`. An item is a JSON file named by a
//! microsecond timestamp pushed into the future by
//! `retries × queue_retry_minutes`; items whose timestamp is still in
//! the future are invisible to the worker. Enqueueing writes a temp file
//! and renames it into place; dequeueing reads and unlinks, after which
//! the in-memory copy belongs to the worker.

use crate::{config::Context, user::User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::debug;

/// A time-based id: unix seconds (offset into the future) and the
/// current microseconds, zero-padded so names sort chronologically.
pub fn tid(offset_secs: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs() as i64 + offset_secs;
    format!("{:010}.{:06}", secs, now.subsec_micros())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueueItem {
    /// A received activity waiting to be processed, together with the
    /// original request headers for signature replay.
    Input {
        object: Value,
        req: Value,
        retries: u32,
    },
    /// An activity to deliver; `inbox` holds the recipient actor or
    /// inbox url and is resolved to a concrete inbox at delivery time.
    Output {
        inbox: String,
        object: Value,
        retries: u32,
    },
    /// An RFC822 message for the mail sink.
    Email { message: String, retries: u32 },
}

fn put(dir: &Path, ntid: &str, item: &QueueItem) -> Option<PathBuf> {
    let path = dir.join(format!("{ntid}.json"));
    let tmp = dir.join(format!("{ntid}.json.tmp"));
    let json = serde_json::to_string_pretty(item).ok()?;
    fs::write(&tmp, json).ok()?;
    fs::rename(&tmp, &path).ok()?;
    Some(path)
}

pub fn enqueue_input(ctx: &Context, user: &User, object: &Value, req: &Value, retries: u32) {
    let ntid = tid(ctx.retry_delay_secs(retries));
    let item = QueueItem::Input {
        object: object.clone(),
        req: req.clone(),
        retries,
    };
    if put(&user.queue_dir(), &ntid, &item).is_some() {
        debug!("[{}] enqueue_input {ntid}", user.uid);
    }
}

pub fn enqueue_output(ctx: &Context, user: &User, object: &Value, inbox: &str, retries: u32) {
    if inbox.starts_with(&user.actor) {
        debug!("[{}] refusing enqueue to myself", user.uid);
        return;
    }

    let ntid = tid(ctx.retry_delay_secs(retries));
    let item = QueueItem::Output {
        inbox: inbox.to_string(),
        object: object.clone(),
        retries,
    };
    if put(&user.queue_dir(), &ntid, &item).is_some() {
        debug!("[{}] enqueue_output {inbox} {ntid} {retries}", user.uid);
    }
}

pub fn enqueue_email(ctx: &Context, user: &User, message: &str, retries: u32) {
    let ntid = tid(ctx.retry_delay_secs(retries));
    let item = QueueItem::Email {
        message: message.to_string(),
        retries,
    };
    if put(&user.queue_dir(), &ntid, &item).is_some() {
        debug!("[{}] enqueue_email {retries}", user.uid);
    }
}

/// The queue files that are due, oldest first. Files whose embedded
/// timestamp is still in the future are skipped.
pub fn pending(user: &User) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(user.queue_dir()) else {
        return Vec::new();
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    let mut due: Vec<(String, PathBuf)> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            let stamp = name.strip_suffix(".json")?;
            let t: f64 = stamp.parse().ok()?;
            if t > now {
                debug!("[{}] queue not yet time for {name}", user.uid);
                return None;
            }
            Some((name, e.path()))
        })
        .collect();

    due.sort_by(|a, b| a.0.cmp(&b.0));
    due.into_iter().map(|(_, p)| p).collect()
}

/// Reads and immediately unlinks a queue file; the worker owns the
/// returned item.
pub fn dequeue(path: &Path) -> Option<QueueItem> {
    let data = fs::read_to_string(path).ok()?;
    let _ = fs::remove_file(path);
    serde_json::from_str(&data).ok()
}
