/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Recipient expansion and outbound fan-out.

use crate::{cache::UserCache, config::Context, queue, user::User};
use serde_json::Value;

/// The magic addressee meaning "everybody".
pub const PUBLIC_ADDRESS: &str = "https://www.w3.org/ns/activitystreams#Public";

fn field_as_list(msg: &Value, field: &str) -> Vec<String> {
    match msg.get(field) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Unions `to` and `cc` without duplicates. When `expand_public` is set,
/// every occurrence of the public address is replaced by the full
/// followers list.
pub fn recipient_list(cache: &UserCache, msg: &Value, expand_public: bool) -> Vec<String> {
    let mut list: Vec<String> = Vec::new();

    for field in ["to", "cc"] {
        for rcpt in field_as_list(msg, field) {
            if expand_public && rcpt == PUBLIC_ADDRESS {
                for follower in cache.follower_list() {
                    if !list.contains(&follower) {
                        list.push(follower);
                    }
                }
            } else if !list.contains(&rcpt) {
                list.push(rcpt);
            }
        }
    }

    list
}

/// A message is public when the public address appears among its
/// recipients.
pub fn is_public(msg: &Value) -> bool {
    field_as_list(msg, "to")
        .iter()
        .chain(field_as_list(msg, "cc").iter())
        .any(|r| r == PUBLIC_ADDRESS)
}

/// Enqueues one output job per expanded recipient.
pub fn post(ctx: &Context, user: &User, msg: &Value) {
    let cache = user.cache(ctx);
    for rcpt in recipient_list(&cache, msg, true) {
        queue::enqueue_output(ctx, user, msg, &rcpt, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{valid_status, ObjectStore};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn cache_with_followers(dir: &TempDir, followers: &[&str]) -> UserCache {
        let user_dir = dir.path().join("user").join("alice");
        for d in ["private", "public", "followers"] {
            fs::create_dir_all(user_dir.join(d)).unwrap();
        }
        let store = ObjectStore::new(dir.path());
        let cache = UserCache::new(user_dir, "https://us/alice", store.clone());
        for f in followers {
            store.put(f, &json!({"id": f, "type": "Person"}));
            assert!(valid_status(cache.follower_add(f)));
        }
        cache
    }

    #[test]
    fn public_expands_to_followers() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_followers(&dir, &["https://srv/f1", "https://srv/f2"]);
        let msg = json!({
            "to": [PUBLIC_ADDRESS],
            "cc": ["https://srv/a"],
        });

        let expanded = recipient_list(&cache, &msg, true);
        assert_eq!(expanded.len(), 3);
        assert!(expanded.contains(&"https://srv/f1".to_string()));
        assert!(expanded.contains(&"https://srv/f2".to_string()));
        assert!(expanded.contains(&"https://srv/a".to_string()));
        assert!(!expanded.contains(&PUBLIC_ADDRESS.to_string()));

        let flat = recipient_list(&cache, &msg, false);
        assert_eq!(
            flat,
            vec![PUBLIC_ADDRESS.to_string(), "https://srv/a".to_string()]
        );
    }

    #[test]
    fn expansion_deduplicates() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_followers(&dir, &["https://srv/f1"]);
        let msg = json!({
            "to": [PUBLIC_ADDRESS, "https://srv/f1"],
            "cc": ["https://srv/f1"],
        });

        let expanded = recipient_list(&cache, &msg, true);
        assert_eq!(expanded, vec!["https://srv/f1".to_string()]);
    }

    #[test]
    fn string_recipients_are_accepted() {
        let dir = TempDir::new().unwrap();
        let cache = cache_with_followers(&dir, &[]);
        let msg = json!({"to": "https://srv/a"});
        assert_eq!(
            recipient_list(&cache, &msg, true),
            vec!["https://srv/a".to_string()]
        );
    }

    #[test]
    fn public_detection() {
        assert!(is_public(&json!({"to": [PUBLIC_ADDRESS]})));
        assert!(is_public(&json!({"to": [], "cc": PUBLIC_ADDRESS})));
        assert!(!is_public(&json!({"to": ["https://srv/a"]})));
    }
}
