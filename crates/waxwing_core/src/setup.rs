/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! One-time provisioning: base directory scaffolding and user creation.

use crate::{
    builder::utc_now,
    config::{Context, ServerConfig},
    user::{hash_password, validate_uid, KeyPair, Profile, User},
};
use anyhow::{anyhow, Context as _, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use rsa::{
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};
use std::{
    fs,
    io::{BufRead, Write},
    path::Path,
};

const GREETING_HTML: &str = r#"<!DOCTYPE html>
<html><head>
<meta name="viewport" content="width=device-width, initial-scale=1"/>
<title>Welcome to %host%</title>
</head>
<body style="margin: auto; max-width: 50em">
<h1>Welcome to %host%</h1>
<p>This is a <a href="https://en.wikipedia.org/wiki/Fediverse">Fediverse</a> instance
that uses the <a href="https://en.wikipedia.org/wiki/ActivityPub">ActivityPub</a> protocol.
In other words, users at this host can communicate with people that use software like
Mastodon, Pleroma, Friendica, etc. all around the world.</p>

<p>There is no automatic sign up process for this server. If you want to be a part of
this community, please write an email to the administrator of this instance
and ask politely indicating what is your preferred user id (alphanumeric characters
only) and the full name you want to appear as.</p>

<p>The following users are already part of this community:</p>

%userlist%

</body></html>
"#;

const DEFAULT_CSS: &str = r#"body { max-width: 48em; margin: auto; line-height: 1.5; padding: 0.8em }
img { max-width: 100% }
.wx-user-list { list-style: none; padding-left: 0 }
.wx-post { border-top: 1px solid #a0a0a0 }
.wx-children { padding-left: 2em; border-left: 1px solid #a0a0a0 }
.wx-footer { margin-top: 2em; font-size: 75% }
"#;

fn prompt(label: &str, default: &str) -> String {
    print!("{label} [{default}]: ");
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return default.to_string();
    }
    let line = line.trim();
    if line.is_empty() {
        default.to_string()
    } else {
        line.to_string()
    }
}

/// Creates a new base directory, prompting for the network parameters.
pub fn initdb(basedir: Option<&str>) -> Result<()> {
    let basedir = match basedir {
        Some(dir) => dir.trim_end_matches('/').to_string(),
        None => prompt("Base directory", ""),
    };
    if basedir.is_empty() {
        return Err(anyhow!("a base directory is required"));
    }

    let basedir = Path::new(&basedir);
    if basedir.exists() {
        return Err(anyhow!("directory '{}' must not exist", basedir.display()));
    }

    let mut config = ServerConfig::default();
    config.address = prompt("Network address", &config.address);
    config.port = prompt("Network port", &config.port.to_string())
        .parse()
        .context("invalid port")?;
    config.host = prompt("Host name", "");
    if config.host.is_empty() {
        return Err(anyhow!("a host name is required"));
    }
    config.prefix = prompt("URL prefix", "")
        .trim_end_matches('/')
        .to_string();

    fs::create_dir_all(basedir)
        .with_context(|| format!("cannot create '{}'", basedir.display()))?;
    for dir in ["user", "object", "app", "token"] {
        fs::create_dir_all(basedir.join(dir))?;
    }

    fs::write(basedir.join("greeting.html"), GREETING_HTML)?;
    fs::write(basedir.join("style.css"), DEFAULT_CSS)?;
    fs::write(
        basedir.join("server.json"),
        serde_json::to_string_pretty(&config)?,
    )?;

    println!("Done.");
    Ok(())
}

/// Generates an RSA keypair as (secret, public) PEMs.
pub fn generate_keypair() -> Result<KeyPair> {
    let mut rng = OsRng;
    let private = RsaPrivateKey::new(&mut rng, 2048).context("generate key")?;
    let public = RsaPublicKey::from(&private);

    Ok(KeyPair {
        secret: private.to_pkcs8_pem(LineEnding::LF)?.to_string(),
        public: public.to_public_key_pem(LineEnding::LF)?.to_string(),
    })
}

/// Creates a user: directories, profile with a generated password, and
/// a fresh keypair. Prints the password once.
pub fn adduser(ctx: &Context, uid: Option<&str>) -> Result<()> {
    let uid = match uid {
        Some(uid) => uid.to_string(),
        None => prompt("User id", ""),
    };

    if !validate_uid(&uid) {
        return Err(anyhow!(
            "only alphanumeric characters and _ are allowed in user ids"
        ));
    }
    if User::open(ctx, &uid).is_ok() {
        return Err(anyhow!("user '{uid}' already exists"));
    }

    let mut rnd = [0u8; 12];
    OsRng.fill_bytes(&mut rnd);
    let passwd = B64.encode(rnd);

    let profile = Profile {
        uid: uid.clone(),
        name: uid.clone(),
        avatar: String::new(),
        bio: String::new(),
        published: utc_now(),
        passwd: hash_password(&uid, &passwd, None),
        email: None,
    };

    let basedir = ctx.user_dir(&uid);
    fs::create_dir_all(&basedir)
        .with_context(|| format!("cannot create '{}'", basedir.display()))?;

    const DIRS: &[&str] = &[
        "private",
        "public",
        "followers",
        "following",
        "muted",
        "hidden",
        "queue",
        "static",
        "history",
    ];
    for dir in DIRS {
        fs::create_dir_all(basedir.join(dir))?;
    }

    // seed the user's stylesheet from the server one
    if let Ok(css) = fs::read(ctx.basedir.join("style.css")) {
        let _ = fs::write(basedir.join("static").join("style.css"), css);
    }

    fs::write(
        basedir.join("user.json"),
        serde_json::to_string_pretty(&profile)?,
    )?;

    println!("\nCreating RSA key...");
    let key = generate_keypair()?;
    fs::write(basedir.join("key.json"), serde_json::to_string_pretty(&key)?)?;
    println!("Done.");

    println!("\nUser password is {passwd}");
    println!("\nGo to {}/{uid} and keep configuring your user.", ctx.base_url);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_support::test_context, user::check_password};
    use tempfile::TempDir;

    #[test]
    fn adduser_scaffolds_everything() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        fs::write(ctx.basedir.join("style.css"), "body {}").unwrap();

        adduser(&ctx, Some("carol")).unwrap();

        let user = User::open(&ctx, "carol").unwrap();
        assert_eq!(user.uid, "carol");
        assert_eq!(user.actor, format!("{}/carol", ctx.base_url));
        assert!(user.key.secret.contains("PRIVATE KEY"));
        assert!(user.key.public.contains("PUBLIC KEY"));
        assert!(user.queue_dir().is_dir());
        assert!(user.basedir.join("private").is_dir());
        assert!(user.basedir.join("static").join("style.css").exists());

        // password is stored hashed, not in the clear
        assert!(user.profile.passwd.contains(':'));
        assert!(!check_password("carol", "not-the-password", &user.profile.passwd));

        // a second add must fail
        assert!(adduser(&ctx, Some("carol")).is_err());
        // and broken uids are refused
        assert!(adduser(&ctx, Some("not valid")).is_err());
    }
}
