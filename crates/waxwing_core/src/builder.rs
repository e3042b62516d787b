/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Activity envelope construction.
//!
//! Every message carries the ActivityStreams `@context`, a `type`, and
//! where applicable an `id`, `actor`, `published` timestamp and
//! `object`. Ephemeral activities get an opaque `{actor}/d/{tid}/{type}`
//! id; object-bound ones derive `{object.id}/{type}`.

use crate::{
    actor::actor_request,
    config::Context,
    fanout::{is_public, PUBLIC_ADDRESS},
    format::{not_really_markdown, process_tags},
    inbound::timeline_request,
    queue::tid,
    store::valid_status,
    user::User,
    webfinger::webfinger_request,
};
use anyhow::{anyhow, Context as _, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

/// `published` timestamps: UTC, second resolution, `Z` suffix.
pub fn utc_now() -> String {
    let t = time::OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        t.year(),
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

enum MsgId<'a> {
    None,
    /// `{actor}/d/{tid}/{type}`
    Ephemeral,
    /// `{object.id}/{type}`
    OfObject,
    Given(&'a str),
}

fn msg_base(
    user: &User,
    ty: &str,
    id: MsgId,
    with_actor: bool,
    published: bool,
    object: Option<Value>,
) -> Value {
    let mut msg = json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": ty,
    });

    let id = match id {
        MsgId::None => None,
        MsgId::Ephemeral => Some(format!("{}/d/{}/{ty}", user.actor, tid(0))),
        MsgId::OfObject => object
            .as_ref()
            .and_then(|o| o.get("id"))
            .and_then(Value::as_str)
            .map(|oid| format!("{oid}/{ty}")),
        MsgId::Given(given) => Some(given.to_string()),
    };

    if let Some(id) = id {
        msg["id"] = json!(id);
    }
    if with_actor {
        msg["actor"] = json!(user.actor);
    }
    if published {
        msg["published"] = json!(utc_now());
    }
    if let Some(object) = object {
        msg["object"] = object;
    }

    msg
}

/// An empty OrderedCollection.
pub fn msg_collection(user: &User, id: &str) -> Value {
    let mut msg = msg_base(user, "OrderedCollection", MsgId::Given(id), false, false, None);
    msg["attributedTo"] = json!(user.actor);
    msg["orderedItems"] = json!([]);
    msg["totalItems"] = json!(0);
    msg
}

/// Accepts a Follow.
pub fn msg_accept(user: &User, object: Value, to: &str) -> Value {
    let mut msg = msg_base(user, "Accept", MsgId::Ephemeral, true, false, Some(object));
    msg["to"] = json!(to);
    msg
}

/// Announces a new version of an object (typically our actor).
pub fn msg_update(user: &User, object: Value) -> Value {
    let mut msg = msg_base(user, "Update", MsgId::OfObject, true, true, Some(object));
    msg["to"] = json!(PUBLIC_ADDRESS);
    msg
}

/// A Like or Announce of an object we can see. Returns `None` when the
/// object cannot be retrieved.
pub async fn msg_admiration(ctx: &Context, user: &User, object: &str, ty: &str) -> Option<Value> {
    timeline_request(ctx, user, object).await;

    let Some(a_msg) = user.cache(ctx).timeline_find(object) else {
        info!("[{}] msg_admiration cannot retrieve object {object}", user.uid);
        return None;
    };

    let mut msg = msg_base(user, ty, MsgId::Ephemeral, true, true, Some(json!(object)));
    let mut rcpts = vec![json!(PUBLIC_ADDRESS)];
    if let Some(author) = a_msg.get("attributedTo").and_then(Value::as_str) {
        rcpts.push(json!(author));
    }
    msg["to"] = json!(rcpts);
    Some(msg)
}

/// Our Person document.
pub fn msg_actor(ctx: &Context, user: &User) -> Value {
    let mut msg = msg_base(user, "Person", MsgId::Given(&user.actor), false, false, None);

    msg["@context"] = json!([
        "https://www.w3.org/ns/activitystreams",
        "https://w3id.org/security/v1",
    ]);
    msg["url"] = json!(user.actor);
    msg["name"] = json!(user.profile.name);
    msg["preferredUsername"] = json!(user.uid);
    msg["published"] = json!(user.profile.published);
    msg["summary"] = json!(not_really_markdown(&user.profile.bio));

    for collection in ["inbox", "outbox", "followers", "following"] {
        msg[collection] = json!(format!("{}/{collection}", user.actor));
    }

    let avatar = if user.profile.avatar.is_empty() {
        format!("{}/avatar.png", ctx.base_url)
    } else {
        user.profile.avatar.clone()
    };
    msg["icon"] = json!({
        "type": "Image",
        "mediaType": mime_guess::from_path(&avatar)
            .first_or_octet_stream()
            .to_string(),
        "url": avatar,
    });

    msg["publicKey"] = json!({
        "id": format!("{}#main-key", user.actor),
        "owner": user.actor,
        "publicKeyPem": user.key.public,
    });

    msg
}

/// Wraps an object in a Create, copying its addressing.
pub fn msg_create(user: &User, object: &Value) -> Value {
    let mut msg = msg_base(user, "Create", MsgId::OfObject, true, true, Some(object.clone()));
    msg["attributedTo"] = object.get("attributedTo").cloned().unwrap_or(Value::Null);
    msg["to"] = object.get("to").cloned().unwrap_or(Value::Null);
    msg["cc"] = object.get("cc").cloned().unwrap_or(Value::Null);
    msg
}

/// Undoes a previous activity, echoing it as the object.
pub fn msg_undo(user: &User, object: Value) -> Value {
    let to = object.get("object").cloned().unwrap_or(Value::Null);
    let mut msg = msg_base(user, "Undo", MsgId::OfObject, true, true, Some(object));
    msg["to"] = to;
    msg
}

/// Deletes a local entry by burying a Tombstone.
pub fn msg_delete(user: &User, id: &str) -> Value {
    let tomb = json!({"type": "Tombstone", "id": id});
    let mut msg = msg_base(user, "Delete", MsgId::OfObject, true, true, Some(tomb));
    msg["to"] = json!(PUBLIC_ADDRESS);
    msg
}

/// Builds a Follow for an actor url or `@user@host` handle.
pub async fn msg_follow(ctx: &Context, user: &User, url_or_uid: &str) -> Result<Value> {
    let actor = if url_or_uid.starts_with("https://") {
        url_or_uid.to_string()
    } else {
        let (actor, _uid) = webfinger_request(&ctx.http, url_or_uid)
            .await
            .with_context(|| format!("cannot resolve user {url_or_uid} to follow"))?;
        actor
    };

    let (status, actor_o) = actor_request(ctx, user, &actor).await;
    if !valid_status(status) {
        return Err(anyhow!("cannot get actor to follow {actor} {status}"));
    }

    // follow the canonical id in case the queried url was an alias
    let resolved = actor_o
        .as_ref()
        .and_then(|o| o.get("id"))
        .and_then(Value::as_str)
        .unwrap_or(&actor);
    if resolved != actor {
        info!("[{}] actor to follow is an alias {actor} -> {resolved}", user.uid);
    }

    Ok(msg_base(
        user,
        "Follow",
        MsgId::Ephemeral,
        true,
        false,
        Some(json!(resolved)),
    ))
}

/// Builds a Note.
///
/// Content goes through the formatter and mention extraction; mentions
/// land in `cc`. Replies adopt the parent's context and author, and
/// inherit public addressing. An empty `to` means everybody.
pub async fn msg_note(
    ctx: &Context,
    user: &User,
    content: &str,
    rcpts: &[String],
    in_reply_to: Option<&str>,
    attach: &[String],
) -> Value {
    let ntid = tid(0);
    let id = format!("{}/p/{ntid}", user.actor);

    let mut to: Vec<String> = rcpts.to_vec();
    let mut cc: Vec<String> = Vec::new();
    let mut context: Option<String> = None;

    let formatted = not_really_markdown(content);
    let (content, tags) = process_tags(&ctx.http, &formatted).await;

    let irt = match in_reply_to {
        Some(parent_id) => {
            // demand this thing
            timeline_request(ctx, user, parent_id).await;

            if let Some(parent) = user.cache(ctx).timeline_find(parent_id) {
                if let Some(author) = parent.get("attributedTo").and_then(Value::as_str) {
                    if !to.contains(&author.to_string()) {
                        to.push(author.to_string());
                    }
                }
                if let Some(parent_ctxt) = parent.get("context").and_then(Value::as_str) {
                    context = Some(parent_ctxt.to_string());
                }
                // a reply to a public message is also public
                if is_public(&parent) && !to.contains(&PUBLIC_ADDRESS.to_string()) {
                    to.push(PUBLIC_ADDRESS.to_string());
                }
            }

            json!(parent_id)
        }
        None => Value::Null,
    };

    for tag in &tags {
        if tag.get("type").and_then(Value::as_str) == Some("Mention") {
            if let Some(href) = tag.get("href").and_then(Value::as_str) {
                cc.push(href.to_string());
            }
        }
    }

    let attachment: Vec<Value> = attach
        .iter()
        .map(|url| {
            let mime = mime_guess::from_path(url).first_or_octet_stream().to_string();
            json!({
                "mediaType": mime,
                "url": url,
                "name": "",
                "type": if mime.starts_with("image/") { "Image" } else { "Document" },
            })
        })
        .collect();

    // no recipients? must be for everybody
    if to.is_empty() {
        to.push(PUBLIC_ADDRESS.to_string());
    }

    let mut msg = msg_base(user, "Note", MsgId::Given(&id), false, true, None);
    msg["attributedTo"] = json!(user.actor);
    msg["summary"] = json!("");
    msg["content"] = json!(content);
    msg["context"] = json!(context.unwrap_or_else(|| format!("{id}#ctxt")));
    msg["url"] = json!(id);
    msg["to"] = json!(to);
    msg["cc"] = json!(cc);
    msg["inReplyTo"] = irt;
    msg["tag"] = json!(tags);
    if !attachment.is_empty() {
        msg["attachment"] = json!(attachment);
    }

    debug!("[{}] msg_note {id}", user.uid);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_context, test_user};
    use tempfile::TempDir;

    fn assert_published_shape(msg: &Value) {
        let p = msg["published"].as_str().unwrap();
        assert_eq!(p.len(), 20);
        assert!(p.ends_with('Z'));
        assert_eq!(&p[4..5], "-");
        assert_eq!(&p[10..11], "T");
    }

    fn assert_envelope(msg: &Value, ty: &str) {
        assert_eq!(msg["@context"], "https://www.w3.org/ns/activitystreams");
        assert_eq!(msg["type"], ty);
    }

    #[tokio::test]
    async fn note_defaults_to_public() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let note = msg_note(&ctx, &user, "hello", &[], None, &[]).await;
        assert_envelope(&note, "Note");
        assert_published_shape(&note);
        assert_eq!(note["to"], json!([PUBLIC_ADDRESS]));
        assert_eq!(note["cc"], json!([]));
        assert_eq!(note["attributedTo"], json!(user.actor));
        assert!(note["id"].as_str().unwrap().starts_with(&format!("{}/p/", user.actor)));
        assert!(note["context"].as_str().unwrap().ends_with("#ctxt"));
        assert!(note["inReplyTo"].is_null());
    }

    #[tokio::test]
    async fn reply_adopts_parent_addressing() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");
        let cache = user.cache(&ctx);

        let parent_id = "https://srv/bob/p/1";
        cache.timeline_add(
            parent_id,
            &json!({
                "id": parent_id,
                "type": "Note",
                "attributedTo": "https://srv/bob",
                "context": "https://srv/bob/p/1#ctxt",
                "to": [PUBLIC_ADDRESS],
            }),
        );

        let note = msg_note(&ctx, &user, "re", &[], Some(parent_id), &[]).await;
        let to = note["to"].as_array().unwrap();
        assert!(to.contains(&json!("https://srv/bob")));
        assert!(to.contains(&json!(PUBLIC_ADDRESS)));
        assert_eq!(note["context"], "https://srv/bob/p/1#ctxt");
        assert_eq!(note["inReplyTo"], json!(parent_id));
    }

    #[tokio::test]
    async fn create_copies_note_addressing() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let note = msg_note(&ctx, &user, "hello", &[], None, &[]).await;
        let create = msg_create(&user, &note);
        assert_envelope(&create, "Create");
        assert_published_shape(&create);
        assert_eq!(create["actor"], json!(user.actor));
        assert_eq!(create["to"], note["to"]);
        assert_eq!(create["cc"], note["cc"]);
        assert_eq!(
            create["id"],
            json!(format!("{}/Create", note["id"].as_str().unwrap()))
        );
    }

    #[test]
    fn accept_addresses_the_follower() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let follow = json!({"type": "Follow", "actor": "https://srv/bob", "object": user.actor});
        let accept = msg_accept(&user, follow, "https://srv/bob");
        assert_envelope(&accept, "Accept");
        assert_eq!(accept["to"], "https://srv/bob");
        assert_eq!(accept["object"]["type"], "Follow");
        assert!(accept["id"].as_str().unwrap().contains("/d/"));
    }

    #[test]
    fn undo_addresses_the_original_target() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let follow = json!({
            "id": format!("{}/d/1000.000001/Follow", user.actor),
            "type": "Follow",
            "actor": user.actor,
            "object": "https://srv/bob",
        });
        let undo = msg_undo(&user, follow);
        assert_envelope(&undo, "Undo");
        assert_eq!(undo["to"], "https://srv/bob");
        assert_eq!(undo["object"]["type"], "Follow");
    }

    #[test]
    fn delete_wraps_a_tombstone() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let id = format!("{}/p/1000.000001", user.actor);
        let del = msg_delete(&user, &id);
        assert_envelope(&del, "Delete");
        assert_eq!(del["object"]["type"], "Tombstone");
        assert_eq!(del["object"]["id"], json!(id));
        assert_eq!(del["to"], PUBLIC_ADDRESS);
        assert_eq!(del["id"], json!(format!("{id}/Delete")));
    }

    #[tokio::test]
    async fn admiration_of_a_seen_object() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");
        let cache = user.cache(&ctx);

        let id = "https://srv/bob/p/1";
        cache.timeline_add(
            id,
            &json!({"id": id, "type": "Note", "attributedTo": "https://srv/bob"}),
        );

        let like = msg_admiration(&ctx, &user, id, "Like").await.unwrap();
        assert_envelope(&like, "Like");
        assert_published_shape(&like);
        assert_eq!(like["object"], json!(id));
        let to = like["to"].as_array().unwrap();
        assert!(to.contains(&json!(PUBLIC_ADDRESS)));
        assert!(to.contains(&json!("https://srv/bob")));
    }

    #[test]
    fn update_is_object_bound_and_public() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let person = msg_actor(&ctx, &user);
        let update = msg_update(&user, person);
        assert_envelope(&update, "Update");
        assert_published_shape(&update);
        assert_eq!(update["to"], PUBLIC_ADDRESS);
        assert_eq!(update["id"], json!(format!("{}/Update", user.actor)));
        assert_eq!(update["object"]["type"], "Person");
    }

    #[tokio::test]
    async fn follow_uses_the_canonical_actor_id() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        ctx.store().put(
            "https://srv/bob",
            &json!({"id": "https://srv/bob", "type": "Person", "inbox": "https://srv/bob/inbox"}),
        );

        let follow = msg_follow(&ctx, &user, "https://srv/bob").await.unwrap();
        assert_envelope(&follow, "Follow");
        assert_eq!(follow["actor"], json!(user.actor));
        assert_eq!(follow["object"], "https://srv/bob");
        assert!(follow["id"].as_str().unwrap().contains("/d/"));

        // an unresolvable target is an error
        assert!(msg_follow(&ctx, &user, "@nobody@invalid.invalid").await.is_err());
    }

    #[test]
    fn person_document() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let person = msg_actor(&ctx, &user);
        assert_eq!(person["type"], "Person");
        assert_eq!(person["id"], json!(user.actor));
        assert_eq!(person["preferredUsername"], "alice");
        assert_eq!(person["inbox"], json!(format!("{}/inbox", user.actor)));
        assert_eq!(person["followers"], json!(format!("{}/followers", user.actor)));
        assert_eq!(
            person["publicKey"]["id"],
            json!(format!("{}#main-key", user.actor))
        );
        assert_eq!(person["publicKey"]["publicKeyPem"], json!(user.key.public));
        assert_eq!(person["icon"]["mediaType"], "image/png");
    }

    #[test]
    fn collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let user = test_user(&ctx, "alice");

        let coll = msg_collection(&user, &format!("{}/followers", user.actor));
        assert_eq!(coll["type"], "OrderedCollection");
        assert_eq!(coll["totalItems"], 0);
        assert_eq!(coll["orderedItems"], json!([]));
    }
}
