/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Content-addressed object database.
//!
//! Every object lives at `object/{xx}/{md5}.json` where `md5` is the hex
//! md5 of its `id` and `xx` its first two characters. Relations are kept
//! in fixed-record sidecar indexes next to the object file:
//! `_c` (children), `_p` (parent), `_l` (likes), `_a` (announces).
//!
//! Operations report HTTP-like status codes; callers discriminate with
//! [`valid_status`]. Writers hold exclusive advisory locks, readers
//! shared ones.

use crate::index;
use fs2::FileExt;
use serde_json::Value;
use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use tracing::debug;

pub fn valid_status(status: u16) -> bool {
    (200..=299).contains(&status)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admiration {
    Like,
    Announce,
}

impl Admiration {
    fn index_suffix(self) -> &'static str {
        match self {
            Admiration::Like => "_l.idx",
            Admiration::Announce => "_a.idx",
        }
    }
}

/// Returns the mtime of a path as UNIX seconds, or 0 if it does not
/// exist.
pub fn mtime(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Returns (mtime, hardlink count), both 0 when the path does not exist.
pub fn mtime_nlink(path: &Path) -> (u64, u64) {
    match fs::metadata(path) {
        Ok(m) => {
            let t = m
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            (t, m.nlink())
        }
        Err(_) => (0, 0),
    }
}

#[derive(Clone)]
pub struct ObjectStore {
    basedir: PathBuf,
}

impl ObjectStore {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
        }
    }

    /// Canonical file for an object, creating the fan-out directory.
    pub fn path_by_md5(&self, md5: &str) -> PathBuf {
        let dir = self.basedir.join("object").join(&md5[..2]);
        let _ = fs::create_dir_all(&dir);
        dir.join(format!("{md5}.json"))
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.path_by_md5(&index::md5_hex(id))
    }

    fn index_path(&self, id: &str, suffix: &str) -> PathBuf {
        self.index_path_by_md5(&index::md5_hex(id), suffix)
    }

    fn index_path_by_md5(&self, md5: &str, suffix: &str) -> PathBuf {
        let dir = self.basedir.join("object").join(&md5[..2]);
        let _ = fs::create_dir_all(&dir);
        dir.join(format!("{md5}{suffix}"))
    }

    pub fn here(&self, id: &str) -> bool {
        mtime(&self.path_for(id)) > 0
    }

    pub fn here_by_md5(&self, md5: &str) -> bool {
        mtime(&self.path_by_md5(md5)) > 0
    }

    /// Shared-lock read of a stored object, optionally checking its
    /// `type`. A type mismatch reads as not found.
    pub fn get(&self, id: &str, expected_type: Option<&str>) -> (u16, Option<Value>) {
        self.get_by_md5(&index::md5_hex(id), expected_type)
    }

    pub fn get_by_md5(&self, md5: &str, expected_type: Option<&str>) -> (u16, Option<Value>) {
        let path = self.path_by_md5(md5);
        let Ok(f) = File::open(&path) else {
            return (404, None);
        };
        let _ = f.lock_shared();
        let mut data = String::new();
        let res = (&f).read_to_string(&mut data);
        let _ = f.unlock();
        if res.is_err() {
            return (500, None);
        }

        let Ok(obj) = serde_json::from_str::<Value>(&data) else {
            return (500, None);
        };

        if let Some(t) = expected_type {
            if obj.get("type").and_then(Value::as_str) != Some(t) {
                return (404, None);
            }
        }

        (200, Some(obj))
    }

    /// Stores an object. Returns 201 on create, 204 when the object is
    /// already present and overwriting was not requested, 500 on I/O
    /// error. A present `inReplyTo` updates the parent's children index
    /// and writes this object's one-record parent index.
    pub fn put(&self, id: &str, obj: &Value) -> u16 {
        self.add(id, obj, false)
    }

    pub fn put_overwrite(&self, id: &str, obj: &Value) -> u16 {
        self.add(id, obj, true)
    }

    fn add(&self, id: &str, obj: &Value, overwrite: bool) -> u16 {
        let path = self.path_for(id);

        if !overwrite && mtime(&path) > 0 {
            debug!("object_add already here {id}");
            return 204;
        }

        let f = match OpenOptions::new().create(true).write(true).truncate(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                debug!("object_add error writing {}: {e}", path.display());
                return 500;
            }
        };
        let _ = f.lock_exclusive();
        let json = serde_json::to_string_pretty(obj).unwrap_or_else(|_| "null".to_string());
        let mut w = &f;
        let res = w.write_all(json.as_bytes());
        let _ = f.unlock();
        if res.is_err() {
            return 500;
        }

        if let Some(in_reply_to) = obj.get("inReplyTo").and_then(Value::as_str) {
            if !in_reply_to.is_empty() {
                let c_idx = self.index_path(in_reply_to, "_c.idx");
                if !index::contains(&c_idx, id) {
                    index::add(&c_idx, id);
                    debug!("object_add child {id} -> {}", c_idx.display());
                }

                let p_idx = self.index_path(id, "_p.idx");
                if mtime(&p_idx) == 0 {
                    index::add(&p_idx, in_reply_to);
                }
            }
        }

        debug!("object_add {id} 201");
        201
    }

    /// Unlinks the object file and every `{md5}_*.idx` sidecar.
    pub fn delete(&self, id: &str) -> u16 {
        self.delete_by_md5(&index::md5_hex(id))
    }

    pub fn delete_by_md5(&self, md5: &str) -> u16 {
        let path = self.path_by_md5(md5);
        let status = if fs::remove_file(&path).is_ok() { 200 } else { 404 };

        if status == 200 {
            if let (Some(dir), Some(stem)) = (path.parent(), path.file_stem().and_then(|s| s.to_str())) {
                let prefix = format!("{stem}_");
                if let Ok(entries) = fs::read_dir(dir) {
                    for entry in entries.flatten() {
                        let name = entry.file_name();
                        let Some(name) = name.to_str() else { continue };
                        if name.starts_with(&prefix) && name.ends_with(".idx") {
                            debug!("object_del index {name}");
                            let _ = fs::remove_file(entry.path());
                        }
                    }
                }
            }
        }

        debug!("object_del {md5} {status}");
        status
    }

    /// Deletes the object only when no user cache holds a hardlink to it
    /// (link count below 2). Returns 200 when deleted, 204 when still
    /// referenced, 404 when absent.
    pub fn delete_if_unreferenced(&self, id: &str) -> u16 {
        let path = self.path_for(id);
        let (mt, nlink) = mtime_nlink(&path);
        if mt == 0 {
            return 404;
        }
        if nlink < 2 {
            self.delete(id)
        } else {
            204
        }
    }

    /// Records that `actor` liked or announced the object, once.
    pub fn admire(&self, id: &str, actor: &str, kind: Admiration) -> u16 {
        let idx = self.index_path(id, kind.index_suffix());
        if index::contains(&idx, actor) {
            return 200;
        }
        debug!("object_admire {kind:?} {actor} {id}");
        index::add(&idx, actor)
    }

    pub fn children(&self, id: &str) -> Vec<String> {
        index::list(&self.index_path(id, "_c.idx"), usize::MAX)
    }

    pub fn likes(&self, id: &str) -> Vec<String> {
        index::list(&self.index_path(id, "_l.idx"), usize::MAX)
    }

    pub fn announces(&self, id: &str) -> Vec<String> {
        index::list(&self.index_path(id, "_a.idx"), usize::MAX)
    }

    pub fn likes_count(&self, id: &str) -> usize {
        index::len(&self.index_path(id, "_l.idx"))
    }

    pub fn announces_count(&self, id: &str) -> usize {
        index::len(&self.index_path(id, "_a.idx"))
    }

    /// Returns the parent of the object addressed by md5, as the md5 of
    /// the parent id.
    pub fn parent_by_md5(&self, md5: &str) -> Option<String> {
        index::first(&self.index_path_by_md5(md5, "_p.idx"))
    }

    pub fn parent(&self, id: &str) -> Option<String> {
        self.parent_by_md5(&index::md5_hex(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ObjectStore {
        ObjectStore::new(dir.path())
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let note = json!({"id": "https://remote/n1", "type": "Note", "content": "hi"});

        assert_eq!(s.put("https://remote/n1", &note), 201);
        assert_eq!(s.put("https://remote/n1", &note), 204);
        assert_eq!(s.put_overwrite("https://remote/n1", &note), 201);

        let (status, obj) = s.get("https://remote/n1", None);
        assert!(valid_status(status));
        assert_eq!(obj.unwrap()["content"], "hi");

        let (status, obj) = s.get("https://remote/n1", Some("Person"));
        assert_eq!(status, 404);
        assert!(obj.is_none());
    }

    #[test]
    fn reply_updates_parent_and_children() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let parent = json!({"id": "https://us/alice/p/T0", "type": "Note"});
        let reply = json!({
            "id": "https://remote/n1",
            "type": "Note",
            "inReplyTo": "https://us/alice/p/T0",
        });

        s.put("https://us/alice/p/T0", &parent);
        s.put("https://remote/n1", &reply);

        let children = s.children("https://us/alice/p/T0");
        assert_eq!(children, vec![index::md5_hex("https://remote/n1")]);
        assert_eq!(
            s.parent("https://remote/n1").as_deref(),
            Some(index::md5_hex("https://us/alice/p/T0").as_str())
        );

        // storing the reply again must not duplicate the child record
        s.put_overwrite("https://remote/n1", &reply);
        assert_eq!(s.children("https://us/alice/p/T0").len(), 1);
    }

    #[test]
    fn admire_is_idempotent_and_counted_by_size() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let note = json!({"id": "https://us/alice/p/T0", "type": "Note"});
        s.put("https://us/alice/p/T0", &note);

        s.admire("https://us/alice/p/T0", "https://srv/bob", Admiration::Like);
        s.admire("https://us/alice/p/T0", "https://srv/bob", Admiration::Like);
        s.admire("https://us/alice/p/T0", "https://srv/eve", Admiration::Announce);

        assert_eq!(s.likes_count("https://us/alice/p/T0"), 1);
        assert_eq!(s.announces_count("https://us/alice/p/T0"), 1);
        assert_eq!(
            s.likes("https://us/alice/p/T0"),
            vec![index::md5_hex("https://srv/bob")]
        );
    }

    #[test]
    fn delete_removes_sidecars() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let note = json!({"id": "https://remote/n1", "type": "Note"});
        s.put("https://remote/n1", &note);
        s.admire("https://remote/n1", "https://srv/bob", Admiration::Like);

        let md5 = index::md5_hex("https://remote/n1");
        let idx = dir
            .path()
            .join("object")
            .join(&md5[..2])
            .join(format!("{md5}_l.idx"));
        assert!(idx.exists());

        assert_eq!(s.delete("https://remote/n1"), 200);
        assert!(!idx.exists());
        assert!(!s.here("https://remote/n1"));
        assert_eq!(s.delete("https://remote/n1"), 404);
    }

    #[test]
    fn unreferenced_deletion_respects_links() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir);
        let note = json!({"id": "https://remote/n1", "type": "Note"});
        s.put("https://remote/n1", &note);

        let link = dir.path().join("cache-link.json");
        fs::hard_link(s.path_for("https://remote/n1"), &link).unwrap();

        assert_eq!(s.delete_if_unreferenced("https://remote/n1"), 204);
        assert!(s.here("https://remote/n1"));

        fs::remove_file(&link).unwrap();
        assert_eq!(s.delete_if_unreferenced("https://remote/n1"), 200);
        assert!(!s.here("https://remote/n1"));
    }
}
