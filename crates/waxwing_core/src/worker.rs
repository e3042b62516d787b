/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Queue processing.
//!
//! One worker iterates every user's queue on a 3-second tick; a user's
//! items are handled strictly in timestamp order. Failures requeue with
//! an incremented retry counter until `queue_retry_max`, then the item
//! is dropped. One user's malfunction never stalls another's queue.

use crate::{
    actor::get_actor_inbox,
    config::Context,
    inbound::process_message,
    purge,
    queue::{self, QueueItem},
    store::valid_status,
    user::{user_list, User},
};
use std::{
    io::Write,
    process::{Command, Stdio},
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// POSTs a message to a concrete inbox url. Network errors read as 500.
pub async fn send_to_inbox(ctx: &Context, user: &User, inbox: &str, msg: &serde_json::Value) -> u16 {
    let body = match serde_json::to_vec_pretty(msg) {
        Ok(b) => b,
        Err(_) => return 500,
    };
    match ctx.http.signed_request(user, "POST", inbox, Some(&body)).await {
        Ok(resp) => resp.status,
        Err(e) => {
            debug!("[{}] send_to_inbox {inbox}: {e:#}", user.uid);
            500
        }
    }
}

/// Resolves a recipient to its inbox (shared inbox preferred) and
/// delivers.
pub async fn send_to_actor(ctx: &Context, user: &User, actor: &str, msg: &serde_json::Value) -> u16 {
    match get_actor_inbox(ctx, user, actor).await {
        Some(inbox) => send_to_inbox(ctx, user, &inbox, msg).await,
        None => 400,
    }
}

/// Pipes an RFC822 message into sendmail.
fn send_email(message: &str) -> bool {
    let child = Command::new("/usr/sbin/sendmail")
        .arg("-t")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    let Ok(mut child) = child else { return false };
    if let Some(stdin) = child.stdin.as_mut() {
        if stdin.write_all(message.as_bytes()).is_err() {
            let _ = child.kill();
            return false;
        }
    }
    matches!(child.wait(), Ok(status) if status.success())
}

/// Drains everything currently due in one user's queue.
pub async fn process_queue(ctx: &Context, user: &User) {
    let retry_max = ctx.config.queue_retry_max;

    for path in queue::pending(user) {
        let Some(item) = queue::dequeue(&path) else {
            warn!("[{}] process_queue item error {}", user.uid, path.display());
            continue;
        };

        match item {
            QueueItem::Output {
                inbox,
                object,
                retries,
            } => {
                let status = send_to_actor(ctx, user, &inbox, &object).await;

                if valid_status(status) {
                    info!("[{}] process_queue sent to {inbox} {status}", user.uid);
                } else if retries > retry_max {
                    info!("[{}] process_queue giving up {inbox} {status}", user.uid);
                } else {
                    queue::enqueue_output(ctx, user, &object, &inbox, retries + 1);
                    info!("[{}] process_queue requeue {inbox} {}", user.uid, retries + 1);
                }
            }

            QueueItem::Input {
                object,
                req,
                retries,
            } => {
                if !process_message(ctx, user, &object, &req).await {
                    if retries > retry_max {
                        info!("[{}] process_queue input giving up", user.uid);
                    } else {
                        queue::enqueue_input(ctx, user, &object, &req, retries + 1);
                        info!("[{}] process_queue input requeue {}", user.uid, retries + 1);
                    }
                }
            }

            QueueItem::Email { message, retries } => {
                if send_email(&message) {
                    debug!("[{}] email message sent", user.uid);
                } else if retries > retry_max {
                    info!("[{}] process_queue email giving up", user.uid);
                } else {
                    queue::enqueue_email(ctx, user, &message, retries + 1);
                    info!("[{}] process_queue email requeue {}", user.uid, retries + 1);
                }
            }
        }
    }
}

/// The long-lived queue worker: every 3 seconds it walks all users in
/// turn, and once a day it spawns a purge pass (the first one 15
/// minutes after start).
pub fn start_queue_worker(
    ctx: Arc<Context>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let tick = Duration::from_secs(3);
        let mut purge_at = Instant::now() + Duration::from_secs(15 * 60);

        info!("queue worker start");

        loop {
            if *shutdown.borrow() {
                break;
            }

            for uid in user_list(&ctx) {
                if *shutdown.borrow() {
                    break;
                }
                match User::open(&ctx, &uid) {
                    Ok(user) => process_queue(&ctx, &user).await,
                    Err(e) => debug!("cannot open user '{uid}': {e:#}"),
                }
            }

            if Instant::now() >= purge_at {
                let purge_ctx = ctx.clone();
                tokio::spawn(async move {
                    info!("purge start");
                    purge::purge_all(&purge_ctx);
                    info!("purge end");
                });
                purge_at = Instant::now() + Duration::from_secs(24 * 60 * 60);
            }

            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("queue worker stop");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder,
        fanout,
        queue::pending,
        test_support::{test_context, test_user},
    };
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn store_unreachable_actor(ctx: &Context, id: &str) {
        // a loopback port nobody listens on makes delivery fail fast
        ctx.store().put(
            id,
            &json!({"id": id, "type": "Person", "inbox": "http://127.0.0.1:1/inbox"}),
        );
    }

    fn raw_queue_items(user: &User) -> Vec<(String, serde_json::Value)> {
        let mut out = Vec::new();
        for entry in fs::read_dir(user.queue_dir()).unwrap().flatten() {
            let name = entry.file_name().to_str().unwrap().to_string();
            let item = serde_json::from_str(&fs::read_to_string(entry.path()).unwrap()).unwrap();
            out.push((name, item));
        }
        out
    }

    #[tokio::test]
    async fn failed_delivery_requeues_with_backoff() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");
        store_unreachable_actor(&ctx, "https://srv/bob");

        queue::enqueue_output(&ctx, &user, &json!({"type": "Note"}), "https://srv/bob", 0);
        process_queue(&ctx, &user).await;

        // requeued with retries=1 and a visible time pushed into the future
        let items = raw_queue_items(&user);
        assert_eq!(items.len(), 1);
        let (name, item) = &items[0];
        assert_eq!(item["retries"], 1);

        let stamp: f64 = name.strip_suffix(".json").unwrap().parse().unwrap();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();
        let delay = stamp - now;
        let expected = ctx.retry_delay_secs(1) as f64;
        assert!(delay > expected - 5.0 && delay <= expected + 1.0, "delay {delay}");

        // and is therefore not visible yet
        assert!(pending(&user).is_empty());
    }

    #[tokio::test]
    async fn exhausted_items_are_dropped() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");
        store_unreachable_actor(&ctx, "https://srv/bob");

        // write the item directly with retries beyond the maximum,
        // backdated so it is due
        let item = QueueItem::Output {
            inbox: "https://srv/bob".into(),
            object: json!({"type": "Note"}),
            retries: ctx.config.queue_retry_max + 1,
        };
        fs::write(
            user.queue_dir().join("0000000001.000000.json"),
            serde_json::to_string(&item).unwrap(),
        )
        .unwrap();

        process_queue(&ctx, &user).await;
        assert!(raw_queue_items(&user).is_empty());
    }

    #[tokio::test]
    async fn posting_a_note_fans_out_to_followers() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");
        let cache = user.cache(&ctx);

        for follower in ["https://srv/f1", "https://srv/f2"] {
            ctx.store()
                .put(follower, &json!({"id": follower, "type": "Person"}));
            cache.follower_add(follower);
        }

        let note = builder::msg_note(&ctx, &user, "hello", &[], None, &[]).await;
        let create = builder::msg_create(&user, &note);
        assert_eq!(create["to"], json!([fanout::PUBLIC_ADDRESS]));

        fanout::post(&ctx, &user, &create);

        let items = raw_queue_items(&user);
        assert_eq!(items.len(), 2);
        let targets: Vec<&str> = items
            .iter()
            .map(|(_, v)| v["inbox"].as_str().unwrap())
            .collect();
        assert!(targets.contains(&"https://srv/f1"));
        assert!(targets.contains(&"https://srv/f2"));
        for (_, item) in &items {
            assert_eq!(item["object"]["type"], "Create");
            assert_eq!(item["retries"], 0);
        }
    }
}
