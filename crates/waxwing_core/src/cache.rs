/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-user projections over the object store.
//!
//! A cache entry is a hardlink from the canonical object file into
//! `{user}/{cache}/{md5}.json`, plus an md5 record in the flat
//! `{user}/{cache}.idx`. The object store only truly deletes an object
//! once no cache holds a link to it.
//!
//! Projections: `private` is everything seen in this user's context,
//! `public` the user's own publicly addressed messages, `followers` the
//! cached actor documents of followers.

use crate::{fanout, index, store::{self, ObjectStore}};
use serde_json::Value;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Clone)]
pub struct UserCache {
    user_dir: PathBuf,
    actor: String,
    store: ObjectStore,
}

impl UserCache {
    pub fn new(user_dir: impl Into<PathBuf>, actor: impl Into<String>, store: ObjectStore) -> Self {
        Self {
            user_dir: user_dir.into(),
            actor: actor.into(),
            store,
        }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn idx_path(&self, cache: &str) -> PathBuf {
        self.user_dir.join(format!("{cache}.idx"))
    }

    fn file_path(&self, cache: &str, md5: &str) -> PathBuf {
        self.user_dir.join(cache).join(format!("{md5}.json"))
    }

    /// Hardlinks the canonical object into the cache directory and
    /// records it in the cache index.
    pub fn add(&self, id: &str, cache: &str) -> u16 {
        let md5 = index::md5_hex(id);
        let target = self.file_path(cache, &md5);
        if fs::hard_link(self.store.path_by_md5(&md5), &target).is_err() {
            // already linked or the canonical file is missing
            return if target.exists() { 200 } else { 500 };
        }
        index::add_md5(&self.idx_path(cache), &md5)
    }

    pub fn del(&self, id: &str, cache: &str) -> u16 {
        let md5 = index::md5_hex(id);
        let status = if fs::remove_file(self.file_path(cache, &md5)).is_ok() {
            200
        } else {
            404
        };
        if status == 200 {
            index::del_md5(&self.idx_path(cache), &md5);
        }
        status
    }

    pub fn contains(&self, id: &str, cache: &str) -> bool {
        self.file_path(cache, &index::md5_hex(id)).exists()
    }

    pub fn list(&self, cache: &str, max: usize) -> Vec<String> {
        index::list(&self.idx_path(cache), max)
    }

    pub fn list_desc(&self, cache: &str, skip: usize, show: usize) -> Vec<String> {
        index::list_desc(&self.idx_path(cache), skip, show)
    }

    /** followers **/

    pub fn follower_add(&self, actor: &str) -> u16 {
        let status = self.add(actor, "followers");
        debug!("follower_add {actor} {status}");
        status
    }

    pub fn follower_del(&self, actor: &str) -> u16 {
        let status = self.del(actor, "followers");
        debug!("follower_del {actor} {status}");
        status
    }

    pub fn follower_check(&self, actor: &str) -> bool {
        self.contains(actor, "followers")
    }

    /// The followers as actor ids, resolved through the object store.
    pub fn follower_list(&self) -> Vec<String> {
        self.list("followers", usize::MAX)
            .into_iter()
            .filter_map(|md5| {
                let (status, obj) = self.store.get_by_md5(&md5, None);
                if !store::valid_status(status) {
                    return None;
                }
                obj?.get("id").and_then(Value::as_str).map(str::to_string)
            })
            .collect()
    }

    /** timeline **/

    pub fn timeline_here(&self, id: &str) -> bool {
        self.contains(id, "private")
    }

    /// Returns a timeline message by id, if this user has it.
    pub fn timeline_find(&self, id: &str) -> Option<Value> {
        if !self.timeline_here(id) {
            return None;
        }
        let (status, obj) = self.store.get(id, None);
        if store::valid_status(status) {
            obj
        } else {
            None
        }
    }

    pub fn timeline_get(&self, md5: &str) -> Option<Value> {
        let (status, obj) = self.store.get_by_md5(md5, None);
        if store::valid_status(status) {
            obj
        } else {
            None
        }
    }

    /// Stores a message and projects it into the user's caches: always
    /// into `private`; into `public` as well when it is ours and
    /// publicly addressed.
    pub fn timeline_add(&self, id: &str, msg: &Value) -> u16 {
        let status = self.store.put(id, msg);
        self.timeline_update_indexes(id);
        debug!("timeline_add {id} {status}");
        status
    }

    pub fn timeline_update_indexes(&self, id: &str) {
        self.add(id, "private");

        if id.starts_with(&self.actor) {
            let (status, obj) = self.store.get(id, None);
            if store::valid_status(status) {
                if let Some(msg) = obj {
                    if fanout::is_public(&msg) {
                        self.add(id, "public");
                    }
                }
            }
        }
    }

    /// Removes a message from this user's caches and deletes the object
    /// itself when nothing references it any more.
    pub fn timeline_del(&self, id: &str) -> u16 {
        self.del(id, "public");
        self.del(id, "private");
        self.store.delete_if_unreferenced(id)
    }

    /// Records an admiration; our own announces also pull the object
    /// into our timelines.
    pub fn timeline_admire(&self, id: &str, admirer: &str, like: bool) {
        if !like && admirer == self.actor {
            self.add(id, "public");
            self.add(id, "private");
        }

        self.store.admire(
            id,
            admirer,
            if like {
                store::Admiration::Like
            } else {
                store::Admiration::Announce
            },
        );
        debug!("timeline_admire like={like} {id} {admirer}");
    }

    /// Reverse-time slice of a timeline index.
    pub fn timeline_list(&self, idx_name: &str, skip: usize, show: usize) -> Vec<String> {
        self.list_desc(idx_name, skip, show)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const ACTOR: &str = "https://us/alice";

    fn setup(dir: &TempDir) -> UserCache {
        let user_dir = dir.path().join("user").join("alice");
        for d in ["private", "public", "followers"] {
            fs::create_dir_all(user_dir.join(d)).unwrap();
        }
        UserCache::new(user_dir, ACTOR, ObjectStore::new(dir.path()))
    }

    #[test]
    fn cache_links_keep_objects_alive() {
        let dir = TempDir::new().unwrap();
        let cache = setup(&dir);
        let id = "https://remote/n1";
        let note = json!({"id": id, "type": "Note"});

        cache.store.put(id, &note);
        assert_eq!(cache.add(id, "private"), 201);
        assert!(cache.contains(id, "private"));

        // referenced by the cache: the canonical file survives
        cache.store.delete_if_unreferenced(id);
        assert!(cache.store.here(id));

        // last reference gone: the canonical file goes too
        assert_eq!(cache.del(id, "private"), 200);
        cache.store.delete_if_unreferenced(id);
        assert!(!cache.store.here(id));
    }

    #[test]
    fn inbound_note_is_private_only() {
        let dir = TempDir::new().unwrap();
        let cache = setup(&dir);
        let id = "https://remote/n1";
        let note = json!({
            "id": id,
            "type": "Note",
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
        });

        cache.timeline_add(id, &note);
        assert!(cache.timeline_here(id));
        assert!(!cache.contains(id, "public"));
    }

    #[test]
    fn own_public_note_enters_both_projections() {
        let dir = TempDir::new().unwrap();
        let cache = setup(&dir);
        let id = "https://us/alice/p/1000.000001";
        let note = json!({
            "id": id,
            "type": "Note",
            "to": ["https://www.w3.org/ns/activitystreams#Public"],
        });

        cache.timeline_add(id, &note);
        assert!(cache.contains(id, "private"));
        assert!(cache.contains(id, "public"));
    }

    #[test]
    fn own_direct_note_stays_out_of_public() {
        let dir = TempDir::new().unwrap();
        let cache = setup(&dir);
        let id = "https://us/alice/p/1000.000002";
        let note = json!({"id": id, "type": "Note", "to": ["https://srv/bob"]});

        cache.timeline_add(id, &note);
        assert!(cache.contains(id, "private"));
        assert!(!cache.contains(id, "public"));
    }

    #[test]
    fn followers_resolve_to_actor_ids() {
        let dir = TempDir::new().unwrap();
        let cache = setup(&dir);
        let bob = json!({"id": "https://srv/bob", "type": "Person"});

        cache.store.put("https://srv/bob", &bob);
        assert!(store::valid_status(cache.follower_add("https://srv/bob")));
        assert!(cache.follower_check("https://srv/bob"));
        assert_eq!(cache.follower_list(), vec!["https://srv/bob".to_string()]);

        cache.follower_del("https://srv/bob");
        assert!(!cache.follower_check("https://srv/bob"));
        assert!(cache.follower_list().is_empty());
    }

    #[test]
    fn timeline_del_cleans_up() {
        let dir = TempDir::new().unwrap();
        let cache = setup(&dir);
        let id = "https://remote/n2";
        cache.timeline_add(id, &json!({"id": id, "type": "Note"}));
        assert!(cache.timeline_find(id).is_some());

        assert!(store::valid_status(cache.timeline_del(id)));
        assert!(!cache.timeline_here(id));
        assert!(!cache.store.here(id));
    }
}
