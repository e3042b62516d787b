/*
 * SPDX-FileCopyrightText: 2026 Waxwing Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Outbound HTTP with request signing.
//!
//! One shared client with a 5-second total timeout; redirects are
//! followed. Responses come back as an integer status, lowercased
//! headers and the raw body. When archiving is enabled, every exchange
//! is persisted for audit.

use crate::{http_sig, queue::tid, user::User};
use anyhow::{Context as _, Result};
use http::Uri;
use serde_json::Value;
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

pub const USER_AGENT: &str = concat!("waxwing/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    archive_dir: Option<PathBuf>,
}

impl HttpClient {
    pub fn new(archive_dir: Option<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .expect("static client config");
        Self {
            client,
            archive_dir,
        }
    }

    /// A plain (unsigned) request.
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse> {
        let mut req = match method {
            "POST" => self.client.post(url),
            _ => self.client.get(url),
        };
        for (k, v) in headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(body) = body {
            req = req.body(body.to_vec());
        }

        let resp = req.send().await.with_context(|| format!("{method} {url}"))?;

        let status = resp.status().as_u16();
        let mut resp_headers = HashMap::new();
        for (k, v) in resp.headers() {
            if let Ok(v) = v.to_str() {
                resp_headers.insert(k.as_str().to_ascii_lowercase(), v.to_string());
            }
        }
        let body = resp.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers: resp_headers,
            body,
        })
    }

    /// A request signed with the user's key: `(request-target) host
    /// digest date`, RSA-SHA256. The digest covers the empty string on
    /// GET.
    pub async fn signed_request(
        &self,
        user: &User,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse> {
        let uri: Uri = url.parse().with_context(|| format!("parse url {url}"))?;
        let host = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .context("url without host")?;
        let target = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let date = httpdate::fmt_http_date(std::time::SystemTime::now());
        let digest = http_sig::digest_header(body.unwrap_or_default());
        let to_sign = http_sig::signing_string(method, &target, &host, &digest, &date);
        let signature = http_sig::sign_rsa_sha256(&user.key.secret, &to_sign)
            .context("sign request")?;

        let mut headers: Vec<(String, String)> = Vec::new();
        if method == "POST" {
            headers.push(("content-type".into(), "application/activity+json".into()));
        } else {
            headers.push(("accept".into(), "application/activity+json".into()));
        }
        headers.push(("date".into(), date));
        headers.push((
            "signature".into(),
            http_sig::signature_header(&user.actor, &signature),
        ));
        headers.push(("digest".into(), digest));
        headers.push(("host".into(), host));

        let resp = self.request(method, url, &headers, body).await;

        if let Ok(resp) = &resp {
            self.archive("SEND", url, &headers, body, resp);
        }

        resp
    }

    /// Persists one exchange under `archive/{tid}_{direction}/`.
    fn archive(
        &self,
        direction: &str,
        url: &str,
        req_headers: &[(String, String)],
        payload: Option<&[u8]>,
        resp: &HttpResponse,
    ) {
        let Some(base) = &self.archive_dir else { return };
        let dir = base.join(format!("{}_{direction}", tid(0)));
        if fs::create_dir_all(&dir).is_err() {
            return;
        }

        let req_map: HashMap<&str, &str> = req_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let meta = format!(
            "dir: {direction}\nurl: {url}\nreq: {}\nstatus: {}\nresponse: {}\n",
            serde_json::to_string_pretty(&req_map).unwrap_or_default(),
            resp.status,
            serde_json::to_string_pretty(&resp.headers).unwrap_or_default(),
        );
        let _ = fs::write(dir.join("_META"), meta);

        if let Some(payload) = payload {
            let _ = fs::write(dir.join("payload"), payload);
        }
        if !resp.body.is_empty() {
            let _ = fs::write(dir.join("body"), &resp.body);
        }
    }
}
