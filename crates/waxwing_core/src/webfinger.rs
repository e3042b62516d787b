/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! WebFinger discovery, both directions: querying remote servers for
//! `@user@host` handles or actor urls, and the JRD types served from
//! `/.well-known/webfinger`.

use crate::client::HttpClient;
use anyhow::{anyhow, Context as _, Result};
use http::Uri;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Jrd {
    pub subject: String,
    pub links: Vec<JrdLink>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JrdLink {
    pub rel: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

fn is_activity_link(link: &JrdLink) -> bool {
    link.rel == "self"
        && link
            .mime
            .as_deref()
            .map(|m| m.contains("activity+json") || m.contains("ld+json"))
            .unwrap_or(false)
}

/// Resolves a handle to `(actor_url, user@host)`. Accepts either an
/// `https://…` actor url (queried against its own host) or a
/// `@user@host` / `user@host` account name.
pub async fn webfinger_request(http: &HttpClient, query: &str) -> Result<(String, String)> {
    let url = if query.starts_with("https://") {
        let uri: Uri = query.parse().with_context(|| format!("parse '{query}'"))?;
        let host = uri.host().context("actor url without host")?;
        format!(
            "https://{host}/.well-known/webfinger?resource={}",
            urlencoding::encode(query)
        )
    } else {
        let handle = query.strip_prefix('@').unwrap_or(query);
        let (_user, host) = handle
            .split_once('@')
            .with_context(|| format!("not a user@host handle: '{query}'"))?;
        format!(
            "https://{host}/.well-known/webfinger?resource={}",
            urlencoding::encode(&format!("acct:{handle}"))
        )
    };

    let headers = [("accept".to_string(), "application/json".to_string())];
    let resp = http.request("GET", &url, &headers, None).await?;
    if !(200..=299).contains(&resp.status) {
        return Err(anyhow!("webfinger {url} failed with {}", resp.status));
    }

    let jrd: Jrd = serde_json::from_slice(&resp.body).context("parse jrd")?;

    let actor = jrd
        .links
        .iter()
        .find(|l| is_activity_link(l))
        .and_then(|l| l.href.clone())
        .context("jrd without a self link")?;

    let uid = jrd
        .subject
        .strip_prefix("acct:")
        .unwrap_or(&jrd.subject)
        .trim_start_matches('@')
        .to_string();

    Ok((actor, uid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_link_selection() {
        let jrd: Jrd = serde_json::from_str(
            r#"{
                "subject": "acct:bob@srv",
                "links": [
                    {"rel": "http://webfinger.net/rel/profile-page", "type": "text/html", "href": "https://srv/@bob"},
                    {"rel": "self", "type": "application/activity+json", "href": "https://srv/bob"}
                ]
            }"#,
        )
        .unwrap();

        let link = jrd.links.iter().find(|l| is_activity_link(l)).unwrap();
        assert_eq!(link.href.as_deref(), Some("https://srv/bob"));
    }

    #[test]
    fn jrd_serializes_without_null_fields() {
        let jrd = Jrd {
            subject: "acct:alice@us".into(),
            links: vec![JrdLink {
                rel: "self".into(),
                mime: Some("application/activity+json".into()),
                href: Some("https://us/alice".into()),
            }],
        };
        let json = serde_json::to_string(&jrd).unwrap();
        assert!(json.contains("\"type\":\"application/activity+json\""));
        assert!(!json.contains("null"));
    }
}
