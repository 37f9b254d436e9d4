use crate::config::{Document, Handler};
use serde::Serialize;

/// One displayable (host, upstream) pair derived from a route entry. A route
/// entry matching several hosts flattens to several sites sharing its proxy
/// target. Never persisted; rebuilt from the document on every query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Site {
    pub host: String,
    pub port: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("'{0}' does not look like a domain (try something like myapp.localhost)")]
    InvalidDomain(String),
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    #[error("domain '{0}' already exists")]
    DomainConflict(String),
    #[error("port {0} is already in use by '{1}'")]
    PortConflict(u16, String),
}

/// Walk `servers -> routes -> match.host` and emit one site per matched host.
pub fn flatten(doc: &Document) -> Vec<Site> {
    let Some(http) = doc.apps.as_ref().and_then(|apps| apps.http.as_ref()) else {
        return Vec::new();
    };

    let mut sites = Vec::new();

    for server in http.servers.values() {
        let port = default_port(&server.listen);

        for route in &server.routes {
            let target = proxy_target(&route.handle);

            for matcher in &route.matchers {
                for host in &matcher.host {
                    sites.push(Site {
                        host: host.clone(),
                        port: port.to_string(),
                        url: render_url(host, port),
                        proxy_target: target.map(str::to_string),
                        reachable: None,
                    });
                }
            }
        }
    }

    sites
}

/// Port component of the server's first listen address, e.g. ":443" -> "443".
fn default_port(listen: &[String]) -> &str {
    listen
        .first()
        .and_then(|addr| addr.rsplit_once(':'))
        .map(|(_, port)| port)
        .unwrap_or("80")
}

fn render_url(host: &str, port: &str) -> String {
    let scheme = if port == "443" { "https" } else { "http" };
    if port == "80" || port == "443" {
        format!("{scheme}://{host}")
    } else {
        format!("{scheme}://{host}:{port}")
    }
}

/// First reverse-proxy upstream dial found anywhere in the handler tree, in
/// document order. Subroute nesting is followed to arbitrary depth.
pub fn proxy_target(handlers: &[Handler]) -> Option<&str> {
    for handler in handlers {
        if let Some(dial) = handler.upstream_dial() {
            return Some(dial);
        }
        if let Some(routes) = handler.nested_routes() {
            for route in routes {
                if let Some(dial) = proxy_target(&route.handle) {
                    return Some(dial);
                }
            }
        }
    }
    None
}

/// Pre-mutation validation for an add: domain shape, port range, and conflicts
/// against the currently flattened sites. Nothing is written when this fails.
pub fn check_new_site(sites: &[Site], domain: &str, port: u16) -> Result<(), ValidationError> {
    if domain.is_empty() || (!domain.contains('.') && !domain.contains("localhost")) {
        return Err(ValidationError::InvalidDomain(domain.to_string()));
    }

    if port == 0 {
        return Err(ValidationError::InvalidPort);
    }

    if sites.iter().any(|site| site.host == domain) {
        return Err(ValidationError::DomainConflict(domain.to_string()));
    }

    let port_str = port.to_string();
    if let Some(site) = sites.iter().find(|site| target_port(site) == Some(port_str.as_str())) {
        return Err(ValidationError::PortConflict(port, site.host.clone()));
    }

    Ok(())
}

fn target_port(site: &Site) -> Option<&str> {
    site.proxy_target
        .as_deref()
        .and_then(|target| target.rsplit_once(':'))
        .map(|(_, port)| port)
}
