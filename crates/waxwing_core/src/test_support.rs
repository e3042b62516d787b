/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Shared test fixtures: a throwaway base directory with a parsed
//! context, and fully scaffolded users with a (cached) real keypair.

use crate::{
    config::Context,
    user::{hash_password, KeyPair, Profile, User},
};
use rsa::{
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};
use std::{fs, sync::OnceLock};
use tempfile::TempDir;

/// One RSA keypair for the whole test run; generation is too slow to
/// repeat per test.
pub fn test_keypair() -> (&'static str, &'static str) {
    static KEYS: OnceLock<(String, String)> = OnceLock::new();
    let (secret, public) = KEYS.get_or_init(|| {
        let mut rng = rand::rngs::OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("generate test key");
        let public = RsaPublicKey::from(&private);
        (
            private
                .to_pkcs8_pem(LineEnding::LF)
                .expect("encode test key")
                .to_string(),
            public
                .to_public_key_pem(LineEnding::LF)
                .expect("encode test key")
                .to_string(),
        )
    });
    (secret.as_str(), public.as_str())
}

pub fn test_context(dir: &TempDir) -> Context {
    fs::write(
        dir.path().join("server.json"),
        r#"{"host": "us", "layout": 2.7, "queue_retry_minutes": 2, "queue_retry_max": 10}"#,
    )
    .expect("write server.json");
    Context::open(dir.path()).expect("open test context")
}

pub fn test_user(ctx: &Context, uid: &str) -> User {
    let basedir = ctx.user_dir(uid);
    for dir in [
        "private",
        "public",
        "followers",
        "following",
        "muted",
        "hidden",
        "queue",
        "static",
        "history",
    ] {
        fs::create_dir_all(basedir.join(dir)).expect("create user dirs");
    }

    let (secret, public) = test_keypair();
    let profile = Profile {
        uid: uid.to_string(),
        name: uid.to_string(),
        avatar: String::new(),
        bio: String::new(),
        published: "2026-01-01T00:00:00Z".to_string(),
        passwd: hash_password(uid, "test", None),
        email: Some(format!("{uid}@example.com")),
    };
    let key = KeyPair {
        secret: secret.to_string(),
        public: public.to_string(),
    };

    fs::write(
        basedir.join("user.json"),
        serde_json::to_string_pretty(&profile).expect("serialize profile"),
    )
    .expect("write user.json");
    fs::write(
        basedir.join("key.json"),
        serde_json::to_string_pretty(&key).expect("serialize key"),
    )
    .expect("write key.json");

    User::open(ctx, uid).expect("open test user")
}
