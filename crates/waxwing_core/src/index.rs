/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Append-only md5 index files.
//!
//! Every record is exactly 33 bytes: 32 lowercase hex characters plus a
//! newline. An append is a single `write` under an exclusive advisory
//! lock, so a reader holding a shared lock only ever observes whole
//! records. `len` is derived from the file size alone.

use fs2::FileExt;
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

pub const RECORD_LEN: u64 = 33;

pub fn md5_hex(s: &str) -> String {
    format!("{:x}", md5::compute(s.as_bytes()))
}

/// Appends the md5 of `id` to the index. Returns 201 on success, 500 on
/// I/O error.
pub fn add(path: &Path, id: &str) -> u16 {
    add_md5(path, &md5_hex(id))
}

pub fn add_md5(path: &Path, md5: &str) -> u16 {
    let mut f = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => f,
        Err(_) => return 500,
    };
    if f.lock_exclusive().is_err() {
        return 500;
    }
    let status = if f.write_all(format!("{md5}\n").as_bytes()).is_ok() {
        201
    } else {
        500
    };
    let _ = f.unlock();
    status
}

/// Removes the md5 of `id` from the index by rewriting everything but the
/// matching records to `{path}.new`, linking the original to
/// `{path}.bak` and renaming over. Returns 200 if a record was removed,
/// 404 if none matched, 500 on I/O error.
pub fn del(path: &Path, id: &str) -> u16 {
    del_md5(path, &md5_hex(id))
}

pub fn del_md5(path: &Path, md5: &str) -> u16 {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(_) => return 500,
    };
    if f.lock_exclusive().is_err() {
        return 500;
    }

    let new_path = suffixed(path, ".new");
    let bak_path = suffixed(path, ".bak");
    let mut out = match File::create(&new_path) {
        Ok(o) => o,
        Err(_) => {
            let _ = f.unlock();
            return 500;
        }
    };

    let mut found = false;
    for line in BufReader::new(&f).lines() {
        let Ok(line) = line else { break };
        let rec = line.trim_end();
        if rec == md5 {
            found = true;
            continue;
        }
        if out.write_all(format!("{rec}\n").as_bytes()).is_err() {
            let _ = f.unlock();
            return 500;
        }
    }
    drop(out);

    let _ = fs::remove_file(&bak_path);
    let _ = fs::hard_link(path, &bak_path);
    let status = match fs::rename(&new_path, path) {
        Ok(()) => {
            if found {
                200
            } else {
                404
            }
        }
        Err(_) => 500,
    };
    let _ = f.unlock();
    status
}

pub fn contains(path: &Path, id: &str) -> bool {
    contains_md5(path, &md5_hex(id))
}

pub fn contains_md5(path: &Path, md5: &str) -> bool {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    let _ = f.lock_shared();
    let found = BufReader::new(&f)
        .lines()
        .map_while(Result::ok)
        .any(|l| l.trim_end() == md5);
    let _ = f.unlock();
    found
}

/// Reads the first record of an index.
pub fn first(path: &Path) -> Option<String> {
    let f = File::open(path).ok()?;
    let _ = f.lock_shared();
    let mut buf = [0u8; 32];
    let mut r = &f;
    let res = r.read_exact(&mut buf);
    let _ = f.unlock();
    res.ok()?;
    String::from_utf8(buf.to_vec()).ok()
}

/// Number of records, derived from the file size. Authoritative because
/// records are fixed-width.
pub fn len(path: &Path) -> usize {
    match fs::metadata(path) {
        Ok(m) => (m.len() / RECORD_LEN) as usize,
        Err(_) => 0,
    }
}

/// Lists up to `max` records in file order.
pub fn list(path: &Path, max: usize) -> Vec<String> {
    let f = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Vec::new(),
    };
    let _ = f.lock_shared();
    let out = BufReader::new(&f)
        .lines()
        .map_while(Result::ok)
        .take(max)
        .map(|l| l.trim_end().to_string())
        .collect();
    let _ = f.unlock();
    out
}

/// Lists up to `show` records in reverse file order, skipping the last
/// `skip` records first. Seeks to the end and steps backwards one record
/// at a time.
pub fn list_desc(path: &Path, skip: usize, show: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(_) => return out,
    };
    let _ = f.lock_shared();

    let size = f.metadata().map(|m| m.len()).unwrap_or(0);
    let back = (skip as u64 + 1) * RECORD_LEN;
    if size < back {
        let _ = f.unlock();
        return out;
    }

    let mut pos = size - back;
    let mut buf = [0u8; 32];
    while out.len() < show {
        if f.seek(SeekFrom::Start(pos)).is_err() || f.read_exact(&mut buf).is_err() {
            break;
        }
        match std::str::from_utf8(&buf) {
            Ok(s) => out.push(s.to_string()),
            Err(_) => break,
        }
        if pos < RECORD_LEN {
            break;
        }
        pos -= RECORD_LEN;
    }
    let _ = f.unlock();
    out
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn idx(dir: &TempDir) -> PathBuf {
        dir.path().join("test.idx")
    }

    #[test]
    fn record_width_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let path = idx(&dir);
        for i in 0..10 {
            assert_eq!(add(&path, &format!("https://example.com/{i}")), 201);
        }
        assert_eq!(len(&path), 10);
        assert_eq!(fs::metadata(&path).unwrap().len(), 10 * RECORD_LEN);
    }

    #[test]
    fn add_del_contains() {
        let dir = TempDir::new().unwrap();
        let path = idx(&dir);
        add(&path, "a");
        add(&path, "b");
        add(&path, "c");
        assert!(contains(&path, "b"));
        assert_eq!(del(&path, "b"), 200);
        assert!(!contains(&path, "b"));
        assert!(contains(&path, "a"));
        assert!(contains(&path, "c"));
        assert_eq!(len(&path), 2);
        assert_eq!(del(&path, "b"), 404);
        // the previous contents survive as a backup hardlink
        assert!(suffixed(&path, ".bak").exists());
    }

    #[test]
    fn no_duplicates_when_guarded() {
        let dir = TempDir::new().unwrap();
        let path = idx(&dir);
        for _ in 0..5 {
            if !contains(&path, "x") {
                add(&path, "x");
            }
        }
        assert_eq!(len(&path), 1);
    }

    #[test]
    fn list_orders() {
        let dir = TempDir::new().unwrap();
        let path = idx(&dir);
        let ids: Vec<String> = (0..6).map(|i| format!("id-{i}")).collect();
        for id in &ids {
            add(&path, id);
        }
        let fwd = list(&path, usize::MAX);
        assert_eq!(fwd.len(), 6);
        assert_eq!(fwd[0], md5_hex("id-0"));

        let rev = list_desc(&path, 0, usize::MAX);
        assert_eq!(rev.len(), 6);
        assert_eq!(rev[0], md5_hex("id-5"));
        assert_eq!(rev[5], md5_hex("id-0"));

        let page = list_desc(&path, 2, 2);
        assert_eq!(page, vec![md5_hex("id-3"), md5_hex("id-2")]);
    }

    #[test]
    fn first_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = idx(&dir);
        assert_eq!(first(&path), None);
        assert_eq!(len(&path), 0);
        assert!(list_desc(&path, 0, 10).is_empty());
        add(&path, "alpha");
        add(&path, "beta");
        assert_eq!(first(&path).as_deref(), Some(md5_hex("alpha").as_str()));
    }
}
