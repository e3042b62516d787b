/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Server configuration and the context passed to every operation.

use crate::{client::HttpClient, store::ObjectStore};
use anyhow::{anyhow, Context as _, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// The on-disk layout version this build understands. Older layouts are
/// refused; there is no migration path.
pub const DB_LAYOUT: f64 = 2.7;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub layout: f64,
    #[serde(default)]
    pub dbglevel: u32,
    #[serde(default = "default_queue_retry_minutes")]
    pub queue_retry_minutes: u32,
    #[serde(default = "default_queue_retry_max")]
    pub queue_retry_max: u32,
    #[serde(default = "default_max_timeline_entries")]
    pub max_timeline_entries: usize,
    #[serde(default = "default_timeline_purge_days")]
    pub timeline_purge_days: u32,
    #[serde(default)]
    pub local_purge_days: u32,
    #[serde(default)]
    pub archive: bool,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_queue_retry_minutes() -> u32 {
    2
}

fn default_queue_retry_max() -> u32 {
    10
}

fn default_max_timeline_entries() -> usize {
    256
}

fn default_timeline_purge_days() -> u32 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            prefix: String::new(),
            address: default_address(),
            port: default_port(),
            layout: DB_LAYOUT,
            dbglevel: 0,
            queue_retry_minutes: default_queue_retry_minutes(),
            queue_retry_max: default_queue_retry_max(),
            max_timeline_entries: default_max_timeline_entries(),
            timeline_purge_days: default_timeline_purge_days(),
            local_purge_days: 0,
            archive: false,
        }
    }
}

/// Everything an operation needs: the base directory, the parsed server
/// configuration, the derived base url and the shared HTTP client.
pub struct Context {
    pub basedir: PathBuf,
    pub config: ServerConfig,
    pub base_url: String,
    pub http: HttpClient,
}

impl Context {
    /// Opens a server base directory, refusing unknown layouts.
    pub fn open(basedir: impl AsRef<Path>) -> Result<Context> {
        let basedir = basedir.as_ref().to_path_buf();
        let cfg_path = basedir.join("server.json");

        let data = fs::read_to_string(&cfg_path)
            .with_context(|| format!("cannot open '{}'", cfg_path.display()))?;
        let config: ServerConfig = serde_json::from_str(&data)
            .with_context(|| format!("cannot parse '{}'", cfg_path.display()))?;

        if config.layout < DB_LAYOUT {
            return Err(anyhow!(
                "disk layout {} is older than {DB_LAYOUT}; this server cannot migrate it",
                config.layout
            ));
        }

        let base_url = format!("https://{}{}", config.host, config.prefix);
        let archive = config.archive.then(|| basedir.join("archive"));

        Ok(Context {
            basedir,
            config,
            base_url,
            http: HttpClient::new(archive),
        })
    }

    pub fn store(&self) -> ObjectStore {
        ObjectStore::new(&self.basedir)
    }

    pub fn user_dir(&self, uid: &str) -> PathBuf {
        self.basedir.join("user").join(uid)
    }

    /// Seconds a queue item stays invisible per accumulated retry.
    pub fn retry_delay_secs(&self, retries: u32) -> i64 {
        i64::from(retries) * 60 * i64::from(self.config.queue_retry_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, json: &str) {
        fs::write(dir.path().join("server.json"), json).unwrap();
    }

    #[test]
    fn open_derives_base_url() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"{"host": "social.example", "prefix": "/social", "layout": 2.7}"#,
        );
        let ctx = Context::open(dir.path()).unwrap();
        assert_eq!(ctx.base_url, "https://social.example/social");
        assert_eq!(ctx.config.queue_retry_minutes, 2);
        assert_eq!(ctx.config.max_timeline_entries, 256);
        assert_eq!(ctx.retry_delay_secs(3), 3 * 60 * 2);
    }

    #[test]
    fn old_layouts_are_refused() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, r#"{"host": "social.example", "layout": 2.0}"#);
        assert!(Context::open(dir.path()).is_err());
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Context::open(dir.path()).is_err());
    }
}
