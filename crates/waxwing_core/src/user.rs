/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Local user records: profile, keypair and per-user state that is not a
//! cache projection (following, muted, hidden).

use crate::{
    cache::UserCache,
    config::Context,
    index,
    store::{mtime, ObjectStore},
};
use anyhow::{anyhow, Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::{fs, path::PathBuf};

/// A uid is non-empty, alphanumeric plus underscore.
pub fn validate_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
    pub published: String,
    pub passwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub secret: String,
    pub public: String,
}

#[derive(Clone)]
pub struct User {
    pub uid: String,
    pub basedir: PathBuf,
    pub profile: Profile,
    pub key: KeyPair,
    pub actor: String,
}

impl User {
    pub fn open(ctx: &Context, uid: &str) -> Result<User> {
        if !validate_uid(uid) {
            return Err(anyhow!("invalid user '{uid}'"));
        }

        let basedir = ctx.user_dir(uid);
        let profile: Profile = read_json(&basedir.join("user.json"))
            .with_context(|| format!("read user.json for '{uid}'"))?;
        let key: KeyPair = read_json(&basedir.join("key.json"))
            .with_context(|| format!("read key.json for '{uid}'"))?;

        let actor = format!("{}/{}", ctx.base_url, uid);

        Ok(User {
            uid: uid.to_string(),
            basedir,
            profile,
            key,
            actor,
        })
    }

    pub fn cache(&self, ctx: &Context) -> UserCache {
        UserCache::new(self.basedir.clone(), self.actor.clone(), ctx.store())
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.basedir.join("queue")
    }

    pub fn static_dir(&self) -> PathBuf {
        self.basedir.join("static")
    }

    /** muted actors **/

    fn muted_path(&self, actor: &str) -> PathBuf {
        self.basedir.join("muted").join(index::md5_hex(actor))
    }

    pub fn mute(&self, actor: &str) {
        let _ = fs::write(self.muted_path(actor), format!("{actor}\n"));
    }

    pub fn unmute(&self, actor: &str) {
        let _ = fs::remove_file(self.muted_path(actor));
    }

    pub fn is_muted(&self, actor: &str) -> bool {
        mtime(&self.muted_path(actor)) != 0
    }

    /** hidden message trees **/

    fn hidden_path(&self, id: &str) -> PathBuf {
        self.basedir.join("hidden").join(index::md5_hex(id))
    }

    /// Hides a message and everything below it in the reply tree.
    pub fn hide(&self, store: &ObjectStore, id: &str) {
        let mut pending = vec![id.to_string()];

        while let Some(id) = pending.pop() {
            if fs::write(self.hidden_path(&id), format!("{id}\n")).is_err() {
                continue;
            }
            for child_md5 in store.children(&id) {
                let (_, obj) = store.get_by_md5(&child_md5, None);
                if let Some(child_id) = obj
                    .as_ref()
                    .and_then(|o| o.get("id"))
                    .and_then(Value::as_str)
                {
                    pending.push(child_id.to_string());
                }
            }
        }
    }

    pub fn is_hidden(&self, id: &str) -> bool {
        mtime(&self.hidden_path(id)) != 0
    }

    /** following **/

    /* followers live in the object cache, but the following store keeps
       the full message: the original Follow must be available later to
       be echoed inside an Undo */

    fn following_path(&self, actor: &str) -> PathBuf {
        self.basedir
            .join("following")
            .join(format!("{}.json", index::md5_hex(actor)))
    }

    pub fn following_add(&self, actor: &str, msg: &Value) -> u16 {
        let json = serde_json::to_string_pretty(msg).unwrap_or_else(|_| "null".to_string());
        match fs::write(self.following_path(actor), json) {
            Ok(()) => 201,
            Err(_) => 500,
        }
    }

    pub fn following_del(&self, actor: &str) -> u16 {
        let _ = fs::remove_file(self.following_path(actor));
        200
    }

    pub fn following_check(&self, actor: &str) -> bool {
        mtime(&self.following_path(actor)) != 0
    }

    pub fn following_get(&self, actor: &str) -> Option<Value> {
        read_json(&self.following_path(actor)).ok()
    }

    /// Actors whose follow has been confirmed with an Accept.
    pub fn following_list(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.basedir.join("following")) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let Ok(obj) = read_json::<Value>(&entry.path()) else {
                continue;
            };
            if obj.get("type").and_then(Value::as_str) != Some("Accept") {
                continue;
            }
            if let Some(actor) = obj.get("actor").and_then(Value::as_str) {
                out.push(actor.to_string());
            }
        }
        out
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parse {}", path.display()))
}

/// The uids with a user directory under the base directory.
pub fn user_list(ctx: &Context) -> Vec<String> {
    let Ok(entries) = fs::read_dir(ctx.basedir.join("user")) else {
        return Vec::new();
    };
    let mut uids: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|uid| validate_uid(uid))
        .collect();
    uids.sort();
    uids
}

/// Hashes a password as `nonce:sha1_hex(nonce:uid:passwd)`. A fresh
/// nonce is generated when none is given.
pub fn hash_password(uid: &str, passwd: &str, nonce: Option<&str>) -> String {
    let nonce = nonce
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:08x}", rand::random::<u32>()));
    let combi = format!("{nonce}:{uid}:{passwd}");
    let hash = hex::encode(Sha1::digest(combi.as_bytes()));
    format!("{nonce}:{hash}")
}

pub fn check_password(uid: &str, passwd: &str, hash: &str) -> bool {
    let Some((nonce, _)) = hash.split_once(':') else {
        return false;
    };
    hash_password(uid, passwd, Some(nonce)) == hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn uid_validation() {
        assert!(validate_uid("alice"));
        assert!(validate_uid("al_ice42"));
        assert!(!validate_uid(""));
        assert!(!validate_uid("al-ice"));
        assert!(!validate_uid("al ice"));
        assert!(!validate_uid("al/ice"));
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("alice", "hunter2", None);
        assert!(check_password("alice", "hunter2", &hash));
        assert!(!check_password("alice", "hunter3", &hash));
        assert!(!check_password("bob", "hunter2", &hash));
        assert!(!check_password("alice", "hunter2", "garbage"));

        // the nonce makes equal passwords hash differently
        let other = hash_password("alice", "hunter2", None);
        assert!(check_password("alice", "hunter2", &other));
    }

    fn bare_user(dir: &TempDir) -> User {
        let basedir = dir.path().join("user").join("alice");
        for d in ["muted", "hidden", "following"] {
            fs::create_dir_all(basedir.join(d)).unwrap();
        }
        User {
            uid: "alice".into(),
            basedir,
            profile: Profile {
                uid: "alice".into(),
                name: "alice".into(),
                avatar: String::new(),
                bio: String::new(),
                published: "2026-01-01T00:00:00Z".into(),
                passwd: String::new(),
                email: None,
            },
            key: KeyPair {
                secret: String::new(),
                public: String::new(),
            },
            actor: "https://us/alice".into(),
        }
    }

    #[test]
    fn mute_markers() {
        let dir = TempDir::new().unwrap();
        let user = bare_user(&dir);
        assert!(!user.is_muted("https://srv/bob"));
        user.mute("https://srv/bob");
        assert!(user.is_muted("https://srv/bob"));
        user.unmute("https://srv/bob");
        assert!(!user.is_muted("https://srv/bob"));
    }

    #[test]
    fn hide_cascades_over_children() {
        let dir = TempDir::new().unwrap();
        let user = bare_user(&dir);
        let store = ObjectStore::new(dir.path());

        store.put("https://us/alice/p/1", &json!({"id": "https://us/alice/p/1", "type": "Note"}));
        store.put(
            "https://remote/r1",
            &json!({"id": "https://remote/r1", "type": "Note", "inReplyTo": "https://us/alice/p/1"}),
        );

        user.hide(&store, "https://us/alice/p/1");
        assert!(user.is_hidden("https://us/alice/p/1"));
        assert!(user.is_hidden("https://remote/r1"));
    }

    #[test]
    fn following_keeps_the_message() {
        let dir = TempDir::new().unwrap();
        let user = bare_user(&dir);
        let follow = json!({"type": "Follow", "actor": "https://us/alice", "object": "https://srv/bob"});

        assert_eq!(user.following_add("https://srv/bob", &follow), 201);
        assert!(user.following_check("https://srv/bob"));
        assert_eq!(user.following_get("https://srv/bob").unwrap()["type"], "Follow");

        // not yet accepted: not listed
        assert!(user.following_list().is_empty());

        let accept = json!({"type": "Accept", "actor": "https://srv/bob", "object": follow});
        user.following_add("https://srv/bob", &accept);
        assert_eq!(user.following_list(), vec!["https://srv/bob".to_string()]);

        user.following_del("https://srv/bob");
        assert!(!user.following_check("https://srv/bob"));
    }
}
