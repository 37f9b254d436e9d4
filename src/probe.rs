use crate::routes::Site;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

/// Split a dial address like "127.0.0.1:3046" or "[::1]:3046" into host and
/// a numeric port.
fn split_target(target: &str) -> Option<(&str, &str)> {
    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        rest.split_once("]:")?
    } else {
        target.rsplit_once(':')?
    };

    port.parse::<u16>().ok()?;
    Some((host, port))
}

/// Whether a TCP connect to the target succeeds within the timeout. Any
/// malformed target, connection failure, or timeout is simply "unreachable".
pub async fn is_reachable(target: &str, timeout: Duration) -> bool {
    let Some((host, port)) = split_target(target) else {
        return false;
    };

    let addr = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };

    tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// Probe every site that has a proxy target, concurrently, and wait for all
/// probes before returning. Sites without a target keep `reachable: None`.
pub async fn probe_sites(sites: &mut [Site], timeout: Duration) {
    let mut checks = JoinSet::new();

    for (idx, site) in sites.iter().enumerate() {
        if let Some(target) = site.proxy_target.clone() {
            checks.spawn(async move { (idx, is_reachable(&target, timeout).await) });
        }
    }

    while let Some(result) = checks.join_next().await {
        if let Ok((idx, reachable)) = result {
            sites[idx].reachable = Some(reachable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn site(host: &str, target: Option<&str>) -> Site {
        Site {
            host: host.to_string(),
            port: "80".to_string(),
            url: format!("http://{host}"),
            proxy_target: target.map(str::to_string),
            reachable: None,
        }
    }

    #[test]
    fn test_split_target_host_port() {
        assert_eq!(split_target("127.0.0.1:3046"), Some(("127.0.0.1", "3046")));
        assert_eq!(split_target("localhost:8080"), Some(("localhost", "8080")));
    }

    #[test]
    fn test_split_target_ipv6() {
        assert_eq!(split_target("[::1]:5432"), Some(("::1", "5432")));
    }

    #[test]
    fn test_split_target_invalid() {
        assert_eq!(split_target("no-port"), None);
        assert_eq!(split_target("host:notaport"), None);
        assert_eq!(split_target("[::1]:"), None);
    }

    #[tokio::test]
    async fn test_reachable_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(is_reachable(&addr.to_string(), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_unreachable_closed_port() {
        // Bind then drop to get a port with nothing listening on it
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!is_reachable(&addr.to_string(), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_probe_respects_timeout() {
        // Non-routable address: the connect hangs until the timeout fires
        let start = Instant::now();
        let reachable = is_reachable("10.255.255.1:81", Duration::from_millis(200)).await;
        assert!(!reachable);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_probe_sites_mixed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().to_string();

        let dead_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = dead_listener.local_addr().unwrap().to_string();
        drop(dead_listener);

        let mut sites = vec![
            site("up.localhost", Some(&live)),
            site("down.localhost", Some(&dead)),
            site("static.localhost", None),
        ];

        probe_sites(&mut sites, Duration::from_secs(1)).await;

        assert_eq!(sites[0].reachable, Some(true));
        assert_eq!(sites[1].reachable, Some(false));
        assert_eq!(sites[2].reachable, None);
    }
}
