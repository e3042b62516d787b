/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The inbound activity dispatcher.
//!
//! Every queued `input` item goes through the same gate: resolve the
//! sender's actor, verify the HTTP signature against its key, then
//! dispatch on the activity type. A permanently gone actor (404/410)
//! or a bad signature drops the item; transient resolution errors ask
//! for a requeue.

use crate::{
    actor::{activitypub_request, actor_request},
    builder,
    config::Context,
    fanout::{self, recipient_list},
    http_sig::check_signature,
    queue::enqueue_email,
    store::valid_status,
    user::User,
};
use serde_json::Value;
use tracing::{debug, info};

/// Upper bound on `inReplyTo` chains walked per incoming object, against
/// adversarially deep threads.
const MAX_ANCESTOR_DEPTH: usize = 32;

/// Ensures an object and its ancestors are in the user's timeline,
/// fetching whatever is missing. Stops at already known objects,
/// non-Notes, failed fetches or the depth cap. Ancestors are stored
/// before their replies.
pub async fn timeline_request(ctx: &Context, user: &User, id: &str) -> u16 {
    let cache = user.cache(ctx);
    let mut chain: Vec<(String, Value)> = Vec::new();
    let mut next = Some(id.to_string());
    let mut status = 200;

    while let Some(id) = next.take() {
        if chain.len() >= MAX_ANCESTOR_DEPTH || cache.timeline_here(&id) {
            break;
        }

        let (s, obj) = activitypub_request(ctx, user, &id).await;
        status = s;
        let Some(obj) = obj else { break };
        if !valid_status(s) {
            break;
        }
        if obj.get("type").and_then(Value::as_str) != Some("Note") {
            break;
        }

        // request (and drop) the author of this entry
        if let Some(author) = obj.get("attributedTo").and_then(Value::as_str) {
            actor_request(ctx, user, author).await;
        }

        next = obj
            .get("inReplyTo")
            .and_then(Value::as_str)
            .map(str::to_string);
        chain.push((id, obj));
    }

    for (id, obj) in chain.into_iter().rev() {
        cache.timeline_add(&id, &obj);
    }

    status
}

/// Handles one received activity. Returns `true` when the item is
/// consumed (also for drops), `false` when it should be requeued.
pub async fn process_message(ctx: &Context, user: &User, msg: &Value, req: &Value) -> bool {
    let Some(actor) = msg.get("actor").and_then(Value::as_str) else {
        debug!("[{}] message without actor ignored", user.uid);
        return true;
    };
    let Some(ty) = msg.get("type").and_then(Value::as_str) else {
        debug!("[{}] message without type ignored", user.uid);
        return true;
    };

    let object = msg.get("object");
    let utype = object
        .and_then(|o| o.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("(null)");

    // bring the actor
    let (a_status, _) = actor_request(ctx, user, actor).await;

    if a_status == 404 || a_status == 410 {
        debug!("[{}] dropping message due to actor error {actor} {a_status}", user.uid);
        return true;
    }
    if !valid_status(a_status) {
        debug!("[{}] error requesting actor {actor} {a_status}, retry later", user.uid);
        return false;
    }

    if !check_signature(&ctx.store(), req) {
        info!("[{}] bad signature from {actor}", user.uid);
        return true;
    }

    let cache = user.cache(ctx);
    let mut do_notify = false;

    match ty {
        "Follow" => {
            let mut f_msg = msg.clone();

            let reply = builder::msg_accept(user, f_msg.clone(), actor);
            fanout::post(ctx, user, &reply);

            // some servers send no date; stamp one before storing
            if f_msg.get("published").and_then(Value::as_str).is_none() {
                f_msg["published"] = Value::String(builder::utc_now());
            }

            if let Some(id) = f_msg.get("id").and_then(Value::as_str).map(str::to_string) {
                cache.timeline_add(&id, &f_msg);
            }

            cache.follower_add(actor);
            info!("[{}] new follower {actor}", user.uid);
            do_notify = true;
        }

        "Undo" => {
            if utype == "Follow" {
                if valid_status(cache.follower_del(actor)) {
                    info!("[{}] no longer following us {actor}", user.uid);
                    do_notify = true;
                } else {
                    info!("[{}] error deleting follower {actor}", user.uid);
                }
            } else {
                debug!("[{}] ignored 'Undo' for object type '{utype}'", user.uid);
            }
        }

        "Create" => {
            if utype == "Note" {
                if user.is_muted(actor) {
                    info!("[{}] ignored 'Note' from muted actor {actor}", user.uid);
                } else if let Some(object) = object {
                    if let Some(id) = object.get("id").and_then(Value::as_str) {
                        if let Some(irt) = object.get("inReplyTo").and_then(Value::as_str) {
                            timeline_request(ctx, user, irt).await;
                        }

                        cache.timeline_add(id, object);
                        info!("[{}] new 'Note' {actor} {id}", user.uid);
                        do_notify = true;
                    }
                }
            } else {
                debug!("[{}] ignored 'Create' for object type '{utype}'", user.uid);
            }
        }

        "Accept" => {
            if utype == "Follow" {
                if user.following_check(actor) {
                    user.following_add(actor, msg);
                    info!("[{}] confirmed follow from {actor}", user.uid);
                } else {
                    info!("[{}] spurious follow accept from {actor}", user.uid);
                }
            } else {
                debug!("[{}] ignored 'Accept' for object type '{utype}'", user.uid);
            }
        }

        "Like" => {
            if let Some(id) = object_id(object) {
                cache.timeline_admire(&id, actor, true);
                info!("[{}] new 'Like' {actor} {id}", user.uid);
                do_notify = true;
            }
        }

        "Announce" => {
            if let Some(id) = object_id(object) {
                timeline_request(ctx, user, &id).await;

                if let Some(a_msg) = cache.timeline_find(&id) {
                    let who = a_msg.get("attributedTo").and_then(Value::as_str);
                    match who {
                        Some(who) if !user.is_muted(who) => {
                            // bring the author of the announced object
                            let (w_status, _) = actor_request(ctx, user, who).await;
                            if valid_status(w_status) {
                                cache.timeline_admire(&id, actor, false);
                                info!("[{}] new 'Announce' {actor} {id}", user.uid);
                                do_notify = true;
                            } else {
                                info!("[{}] dropped 'Announce' on actor request error {who}", user.uid);
                            }
                        }
                        _ => {
                            info!("[{}] ignored 'Announce' about muted actor", user.uid);
                        }
                    }
                } else {
                    info!("[{}] error requesting 'Announce' object {id}", user.uid);
                }
            }
        }

        "Update" => {
            if utype == "Person" {
                if let Some(object) = object {
                    ctx.store().put_overwrite(actor, object);
                    info!("[{}] updated actor {actor}", user.uid);
                }
            } else {
                info!("[{}] ignored 'Update' for object type '{utype}'", user.uid);
            }
        }

        "Delete" => {
            if let Some(id) = object_id(object) {
                if valid_status(cache.timeline_del(&id)) {
                    info!("[{}] new 'Delete' {actor} {id}", user.uid);
                } else {
                    debug!("[{}] ignored 'Delete' for unknown object {id}", user.uid);
                }
            }
        }

        _ => {
            debug!("[{}] process_message type '{ty}' ignored", user.uid);
        }
    }

    if do_notify {
        notify(ctx, user, ty, utype, actor, msg);
    }

    true
}

fn object_id(object: Option<&Value>) -> Option<String> {
    match object? {
        Value::String(id) => Some(id.clone()),
        obj => obj.get("id").and_then(Value::as_str).map(str::to_string),
    }
}

/// Composes and enqueues an email for events worth telling the user
/// about: new followers and unfollows, notes addressed to us, and
/// admirations of our own content. Without a configured address this is
/// a no-op.
fn notify(ctx: &Context, user: &User, ty: &str, utype: &str, actor: &str, msg: &Value) {
    let Some(email) = user.profile.email.as_deref().filter(|e| !e.is_empty()) else {
        return;
    };

    if ty == "Create" {
        // only notify of notes specifically for us; the addressing may
        // sit on the activity, the embedded object, or both
        let cache = user.cache(ctx);
        let mut rcpts = recipient_list(&cache, msg, false);
        if let Some(obj) = msg.get("object").filter(|o| o.is_object()) {
            rcpts.extend(recipient_list(&cache, obj, false));
        }
        if !rcpts.iter().any(|r| r == &user.actor) {
            return;
        }
    }

    if ty == "Undo" && utype != "Follow" {
        return;
    }

    let mut object = None;
    if ty == "Like" || ty == "Announce" {
        let Some(id) = object_id(msg.get("object")) else {
            return;
        };
        // not an admiration of something of ours: done
        if !id.starts_with(&user.actor) {
            return;
        }
        object = Some(id);
    }

    debug!("[{}] notify({ty}, {utype}, {actor})", user.uid);

    let subject = format!(
        "waxwing notify for @{}@{}",
        user.profile.uid, ctx.config.host
    );
    let from = format!("waxwing-daemon <waxwing-daemon@{}>", ctx.config.host);

    let mut body = format!("From: {from}\nTo: {email}\nSubject: {subject}\n\n");
    if utype != "(null)" {
        body.push_str(&format!("Type  : {ty} + {utype}\n"));
    } else {
        body.push_str(&format!("Type  : {ty}\n"));
    }
    body.push_str(&format!("Actor : {actor}\n"));
    if let Some(object) = object {
        body.push_str(&format!("Object: {object}\n"));
    }

    enqueue_email(ctx, user, &body, 0);
}
