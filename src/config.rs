use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Caddy's generated HTTP server name; site routes are attached here.
pub const DEFAULT_SERVER: &str = "srv0";

pub const ADMIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

const STATIC_ASSET_PATHS: [&str; 10] = [
    "*.ico", "*.css", "*.js", "*.gif", "*.jpg", "*.jpeg", "*.png", "*.svg", "*.woff", "*.woff2",
];

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration file at '{path}'")]
    Missing { path: String },
    #[error("failed to read config file '{path}': {detail}")]
    Read { path: String, detail: String },
    #[error("config JSON parse error: {0}")]
    Parse(String),
    #[error("config has no '{0}' server to attach routes to")]
    InvalidShape(String),
    #[error("failed to write config file '{path}': {detail}")]
    Write { path: String, detail: String },
}

// ---------------------------------------------------------------------------
// Document model
//
// Typed mirror of `apps.http.servers.<name>.routes[]`. Every node keeps a
// flattened `rest` map so fields this tool does not model survive a
// read-mutate-write cycle untouched.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apps: Option<Apps>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Apps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpApp>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpApp {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub servers: BTreeMap<String, Server>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Server {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listen: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteEntry>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<Matcher>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handle: Vec<Handler>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminal: bool,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl RouteEntry {
    pub fn matches_host(&self, host: &str) -> bool {
        self.matchers.iter().any(|m| m.host.iter().any(|h| h == host))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Matcher {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// One entry of a route's `handle` list. Handlers this tool understands parse
/// into `Known`; anything else is carried as the raw object so it is never
/// dropped on rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Handler {
    Known(HandlerKind),
    Unknown(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum HandlerKind {
    Subroute {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        routes: Vec<RouteEntry>,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
    ReverseProxy {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        upstreams: Vec<Upstream>,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
    Headers {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<HeaderOps>,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
    Encode {
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        encodings: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        prefer: Vec<String>,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub dial: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderOps {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, Vec<String>>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Handler {
    pub fn subroute(routes: Vec<RouteEntry>) -> Self {
        Handler::Known(HandlerKind::Subroute {
            routes,
            rest: Map::new(),
        })
    }

    pub fn reverse_proxy(dial: &str) -> Self {
        Handler::Known(HandlerKind::ReverseProxy {
            upstreams: vec![Upstream {
                dial: dial.to_string(),
                rest: Map::new(),
            }],
            rest: Map::new(),
        })
    }

    pub fn set_headers(set: BTreeMap<String, Vec<String>>) -> Self {
        Handler::Known(HandlerKind::Headers {
            response: Some(HeaderOps {
                set,
                rest: Map::new(),
            }),
            rest: Map::new(),
        })
    }

    /// gzip + zstd compression, the shape Caddy writes for `encode gzip zstd`.
    pub fn encode_default() -> Self {
        let mut encodings = Map::new();
        encodings.insert("gzip".to_string(), Value::Object(Map::new()));
        encodings.insert("zstd".to_string(), Value::Object(Map::new()));
        Handler::Known(HandlerKind::Encode {
            encodings,
            prefer: vec!["gzip".to_string(), "zstd".to_string()],
            rest: Map::new(),
        })
    }

    /// Routes nested under a subroute handler, if this is one.
    pub fn nested_routes(&self) -> Option<&[RouteEntry]> {
        match self {
            Handler::Known(HandlerKind::Subroute { routes, .. }) => Some(routes),
            _ => None,
        }
    }

    /// First upstream dial address, if this is a reverse proxy.
    pub fn upstream_dial(&self) -> Option<&str> {
        match self {
            Handler::Known(HandlerKind::ReverseProxy { upstreams, .. }) => {
                upstreams.first().map(|u| u.dial.as_str())
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Site route template
// ---------------------------------------------------------------------------

fn security_headers() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "Referrer-Policy".to_string(),
            vec!["strict-origin-when-cross-origin".to_string()],
        ),
        (
            "X-Content-Type-Options".to_string(),
            vec!["nosniff".to_string()],
        ),
        ("X-Frame-Options".to_string(), vec!["SAMEORIGIN".to_string()]),
    ])
}

fn long_cache_headers() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(
        "Cache-Control".to_string(),
        vec!["public, max-age=31536000, immutable".to_string()],
    )])
}

/// The route entry appended for a new site: security headers and compression
/// for everything, a long-lived immutable cache policy on static assets, and a
/// reverse proxy to the local port for static and dynamic traffic alike.
pub fn site_route_entry(domain: &str, port: u16) -> RouteEntry {
    let dial = format!("127.0.0.1:{port}");

    let headers_and_encode = RouteEntry {
        handle: vec![
            Handler::set_headers(security_headers()),
            Handler::encode_default(),
        ],
        ..RouteEntry::default()
    };

    let static_assets = RouteEntry {
        matchers: vec![Matcher {
            path: STATIC_ASSET_PATHS.iter().map(|s| s.to_string()).collect(),
            ..Matcher::default()
        }],
        handle: vec![Handler::subroute(vec![RouteEntry {
            handle: vec![
                Handler::set_headers(long_cache_headers()),
                Handler::reverse_proxy(&dial),
            ],
            ..RouteEntry::default()
        }])],
        ..RouteEntry::default()
    };

    let catch_all = RouteEntry {
        handle: vec![Handler::subroute(vec![RouteEntry {
            handle: vec![Handler::reverse_proxy(&dial)],
            ..RouteEntry::default()
        }])],
        ..RouteEntry::default()
    };

    RouteEntry {
        matchers: vec![Matcher {
            host: vec![domain.to_string()],
            ..Matcher::default()
        }],
        handle: vec![Handler::subroute(vec![
            headers_and_encode,
            static_assets,
            catch_all,
        ])],
        terminal: true,
        ..RouteEntry::default()
    }
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

/// Append a site route to the default server. The document must already carry
/// `apps.http.servers.srv0`; anything else is an unexpected shape.
pub fn add_site(doc: &mut Document, domain: &str, port: u16) -> Result<(), ConfigError> {
    let server = doc
        .apps
        .as_mut()
        .and_then(|apps| apps.http.as_mut())
        .and_then(|http| http.servers.get_mut(DEFAULT_SERVER))
        .ok_or_else(|| ConfigError::InvalidShape(DEFAULT_SERVER.to_string()))?;

    server.routes.push(site_route_entry(domain, port));
    Ok(())
}

/// Remove every route entry whose match host lists contain `domain`, across
/// all servers. Returns the number of entries removed; zero leaves the
/// document untouched.
pub fn remove_site(doc: &mut Document, domain: &str) -> usize {
    let Some(http) = doc.apps.as_mut().and_then(|apps| apps.http.as_mut()) else {
        return 0;
    };

    let mut removed = 0;
    for server in http.servers.values_mut() {
        let before = server.routes.len();
        server.routes.retain(|route| !route.matches_host(domain));
        removed += before - server.routes.len();
    }
    removed
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub fn parse(text: &str) -> Result<Document, ConfigError> {
    serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn read_file(path: &Path) -> Result<Document, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing {
                path: path.display().to_string(),
            });
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                detail: e.to_string(),
            });
        }
    };
    parse(&text)
}

/// Persist by writing a sibling temp file and renaming over the target, so an
/// interrupted write never leaves a half-written configuration behind.
pub fn write_file(doc: &Document, path: &Path) -> Result<(), ConfigError> {
    let write_err = |e: std::io::Error| ConfigError::Write {
        path: path.display().to_string(),
        detail: e.to_string(),
    };

    let json = serde_json::to_string(doc).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, json).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)
}

// ---------------------------------------------------------------------------
// Loading cascade
// ---------------------------------------------------------------------------

/// Locate the live configuration: the on-disk file first, then the admin API,
/// then `caddy adapt` over any known Caddyfile. All three failing means "no
/// sites configured yet", which is a valid state rather than an error.
pub async fn load_config(settings: &Settings) -> Option<Document> {
    if let Ok(doc) = read_file(&settings.config_file) {
        return Some(doc);
    }

    if let Some(doc) = fetch_admin_config(&settings.admin_url).await {
        return Some(doc);
    }

    adapt_caddyfile(settings).await
}

async fn fetch_admin_config(admin_url: &str) -> Option<Document> {
    let client = reqwest::Client::builder()
        .timeout(ADMIN_ATTEMPT_TIMEOUT)
        .build()
        .ok()?;

    let resp = client.get(format!("{admin_url}/config/")).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }

    let text = resp.text().await.ok()?;
    parse(&text).ok()
}

async fn adapt_caddyfile(settings: &Settings) -> Option<Document> {
    let bin = settings.resolve_binary();

    for caddyfile in &settings.caddyfile_paths {
        if !caddyfile.exists() {
            continue;
        }

        let output = match tokio::process::Command::new(&bin)
            .args(["adapt", "--config"])
            .arg(caddyfile)
            .output()
            .await
        {
            Ok(output) => output,
            Err(_) => continue,
        };

        if !output.status.success() {
            continue;
        }

        if let Ok(doc) = parse(&String::from_utf8_lossy(&output.stdout)) {
            return Some(doc);
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
