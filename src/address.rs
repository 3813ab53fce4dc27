use reqwest::Url;

use crate::error::{Result, RunnerError};

/// The two URLs a job talks to, derived from one user-supplied address.
///
/// Accepts `host:port`, `host:port/prefix`, or a full URL. `https` maps
/// to `wss`; anything without a scheme is plain `http`/`ws`.
///
/// # Example
/// ```
/// use comfyui_ws_runner::Endpoints;
///
/// let endpoints = Endpoints::resolve("https://example.com/comfy/").unwrap();
/// assert_eq!(endpoints.submit_url(), "https://example.com/comfy/prompt");
/// assert_eq!(endpoints.stream_url_base(), "wss://example.com/comfy/ws");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    http_scheme: &'static str,
    ws_scheme: &'static str,
    netloc: String,
    path: String,
    submit_url: String,
    stream_url_base: String,
}

impl Endpoints {
    /// Normalize a raw server address.
    pub fn resolve(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RunnerError::Config("Server address is empty".into()));
        }

        let (scheme, url) = match raw.split_once("://") {
            Some((scheme, _)) => (Some(scheme.to_ascii_lowercase()), Url::parse(raw)),
            None => (None, Url::parse(&format!("http://{}", raw))),
        };
        let url = url.map_err(|e| {
            RunnerError::Config(format!("Cannot parse server address '{}': {}", raw, e))
        })?;

        let (http_scheme, ws_scheme) = match scheme.as_deref() {
            None | Some("http") => ("http", "ws"),
            Some("https") => ("https", "wss"),
            Some(other) => {
                tracing::warn!(
                    scheme = other,
                    "Unknown scheme in server address, defaulting to http/ws"
                );
                ("http", "ws")
            }
        };

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h,
            _ => {
                return Err(RunnerError::Config(format!(
                    "Cannot determine a server host from '{}'",
                    raw
                )))
            }
        };
        // `Url` hides a port equal to the default of the parsed scheme, which
        // is no longer the default once the scheme is rewritten.
        let port = if has_explicit_port(raw) {
            url.port_or_known_default()
        } else {
            url.port()
        };
        let netloc = match port {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let path = url.path().trim_end_matches('/').to_string();

        Ok(Self {
            submit_url: format!("{}://{}{}/prompt", http_scheme, netloc, path),
            stream_url_base: format!("{}://{}{}/ws", ws_scheme, netloc, path),
            http_scheme,
            ws_scheme,
            netloc,
            path,
        })
    }

    pub fn http_scheme(&self) -> &str {
        self.http_scheme
    }

    pub fn ws_scheme(&self) -> &str {
        self.ws_scheme
    }

    /// `host[:port]` of the server.
    pub fn netloc(&self) -> &str {
        &self.netloc
    }

    /// Path prefix without a trailing slash; empty at the server root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `POST` target for queuing a workflow.
    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    pub fn stream_url_base(&self) -> &str {
        &self.stream_url_base
    }

    /// WebSocket URL scoped to one session. ComfyUI reads `clientId`.
    pub fn stream_url(&self, session_id: &str) -> String {
        format!("{}?clientId={}", self.stream_url_base, session_id)
    }
}

/// Whether the authority part of `raw` spells out a port.
fn has_explicit_port(raw: &str) -> bool {
    let rest = raw.split_once("://").map(|(_, rest)| rest).unwrap_or(raw);
    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or("");
    let host_port = authority
        .rsplit_once('@')
        .map(|(_, host_port)| host_port)
        .unwrap_or(authority);
    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
