/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Data expiry.
//!
//! Per user: cache files older than `timeline_purge_days` are unlinked
//! from `private/`, `hidden/` and `public/`; rendered history older
//! than `local_purge_days` goes too. Globally: an object older than the
//! timeline horizon whose link count dropped below 2 is gone from the
//! `object/` tree.

use crate::{
    config::Context,
    store::mtime_nlink,
    user::{user_list, User},
};
use std::{
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::debug;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn cutoff(days: u32) -> Option<u64> {
    if days == 0 {
        return None;
    }
    Some(now_secs().saturating_sub(u64::from(days) * 24 * 3600))
}

fn purge_subdir(dir: &Path, horizon: u64) {
    let Ok(entries) = fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let (mt, _) = mtime_nlink(&path);
        if mt != 0 && mt < horizon {
            let _ = fs::remove_file(&path);
            debug!("purged {}", path.display());
        }
    }
}

fn purge_user_before(user: &User, timeline_horizon: Option<u64>, local_horizon: Option<u64>) {
    if let Some(horizon) = timeline_horizon {
        for subdir in ["private", "hidden", "public"] {
            purge_subdir(&user.basedir.join(subdir), horizon);
        }
    }
    if let Some(horizon) = local_horizon {
        purge_subdir(&user.basedir.join("history"), horizon);
    }
}

pub fn purge_user(ctx: &Context, user: &User) {
    purge_user_before(
        user,
        cutoff(ctx.config.timeline_purge_days),
        cutoff(ctx.config.local_purge_days),
    );
}

fn purge_server_before(ctx: &Context, horizon: u64) {
    let store = ctx.store();
    let Ok(shards) = fs::read_dir(ctx.basedir.join("object")) else {
        return;
    };

    for shard in shards.flatten() {
        let Ok(files) = fs::read_dir(shard.path()) else {
            continue;
        };
        for entry in files.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            // old and with no hard links?
            let (mt, nlink) = mtime_nlink(&path);
            if mt != 0 && mt < horizon && nlink < 2 {
                if let Some(md5) = path.file_stem().and_then(|s| s.to_str()) {
                    store.delete_by_md5(md5);
                }
            }
        }
    }
}

pub fn purge_server(ctx: &Context) {
    if let Some(horizon) = cutoff(ctx.config.timeline_purge_days) {
        purge_server_before(ctx, horizon);
    }
}

/// The daily pass: every user's caches, then the global object tree.
pub fn purge_all(ctx: &Context) {
    for uid in user_list(ctx) {
        if let Ok(user) = User::open(ctx, &uid) {
            purge_user(ctx, &user);
        }
    }
    purge_server(ctx);
}
