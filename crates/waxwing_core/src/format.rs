/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Note content formatting.
//!
//! This is the one canonical formatter: an inline pass for `code`,
//! `**bold**`, `*italic*` and bare urls, a line pass for ``` fences and
//! `>` quotes, then emoticon substitution. Mention and hashtag tokens
//! are extracted separately and feed the Note builder.

use crate::{client::HttpClient, webfinger::webfinger_request};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

fn inline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(`[^`]+`|\*\*[^*]+\*\*|\*[^*]+\*|https?://[^\s]+)").expect("static regex")
    })
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(@[A-Za-z0-9_]+@[A-Za-z0-9.-]+|#[^\s,.:;]+)").expect("static regex")
    })
}

const SMILEYS: &[(&str, &str)] = &[
    (":-)", "&#128578;"),
    (":-D", "&#128512;"),
    ("X-D", "&#128518;"),
    (";-)", "&#128521;"),
    ("B-)", "&#128526;"),
    (":-(", "&#128542;"),
    (":-*", "&#128536;"),
    (":-/", "&#128533;"),
    ("8-o", "&#128563;"),
    ("%-)", "&#129322;"),
    (":_(", "&#128546;"),
    (":-|", "&#128528;"),
    (":facepalm:", "&#129318;"),
    (":shrug:", "&#129335;"),
];

fn inline_pass(content: &str) -> String {
    let mut out = String::new();
    let mut last = 0;

    for m in inline_re().find_iter(content) {
        out.push_str(&content[last..m.start()]);
        let tok = m.as_str();
        if let Some(inner) = tok.strip_prefix("**").and_then(|t| t.strip_suffix("**")) {
            out.push_str(&format!("<b>{inner}</b>"));
        } else if tok.starts_with('`') {
            out.push_str(&format!("<code>{}</code>", &tok[1..tok.len() - 1]));
        } else if tok.starts_with('*') {
            out.push_str(&format!("<i>{}</i>", &tok[1..tok.len() - 1]));
        } else {
            out.push_str(&format!("<a href=\"{tok}\">{tok}</a>"));
        }
        last = m.end();
    }
    out.push_str(&content[last..]);
    out
}

/// Formats note content with the markdown-ish rules.
pub fn not_really_markdown(content: &str) -> String {
    let wrk = inline_pass(content);

    let mut out = String::new();
    let mut in_pre = false;
    let mut in_blq = false;

    for line in wrk.split('\n') {
        let line = line.trim();

        if line.starts_with("```") {
            out.push_str(if in_pre { "</pre>" } else { "<pre>" });
            in_pre = !in_pre;
            continue;
        }

        if let Some(quoted) = line.strip_prefix('>') {
            if !in_blq {
                out.push_str("<blockquote>");
                in_blq = true;
            }
            out.push_str(quoted.trim());
            out.push_str("<br>");
            continue;
        }

        if in_blq {
            out.push_str("</blockquote>");
            in_blq = false;
        }

        out.push_str(line);
        out.push_str("<br>");
    }

    if in_blq {
        out.push_str("</blockquote>");
    }
    if in_pre {
        out.push_str("</pre>");
    }

    let mut out = out.replace("</blockquote><br>", "</blockquote>");
    for (key, value) in SMILEYS {
        out = out.replace(key, value);
    }
    out
}

/// Extracts `@user@host` mentions and `#tag` tokens from formatted
/// content. Mentions that resolve via webfinger become `Mention` tag
/// entries and inline links; everything else stays verbatim.
pub async fn process_tags(http: &HttpClient, content: &str) -> (String, Vec<Value>) {
    let mut out = String::new();
    let mut tags = Vec::new();
    let mut last = 0;

    for m in token_re().find_iter(content) {
        out.push_str(&content[last..m.start()]);
        let tok = m.as_str();

        if let Some(handle) = tok.strip_prefix('@') {
            match webfinger_request(http, handle).await {
                Ok((actor, uid)) => {
                    let name = format!("@{uid}");
                    tags.push(json!({
                        "type": "Mention",
                        "href": actor,
                        "name": name,
                    }));
                    out.push_str(&format!(
                        "<a href=\"{actor}\" class=\"u-url mention\">{name}</a>"
                    ));
                }
                Err(_) => out.push_str(tok),
            }
        } else {
            // hashtag: preserved verbatim
            out.push_str(tok);
        }

        last = m.end();
    }
    out.push_str(&content[last..]);

    (out, tags)
}
