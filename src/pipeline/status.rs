//! Final status report: the compose `ps` table plus reachability of the
//! published endpoints.
//!
//! Nothing here fails the run; unreachable endpoints and a failing `ps`
//! are reported as such.

use crate::compose::Compose;
use crate::config::DeployConfig;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// One published URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    /// `None` until probed.
    pub reachable: Option<bool>,
    /// HTTP status or error text of the probe.
    pub detail: Option<String>,
}

impl Endpoint {
    fn new(name: &str, url: String) -> Self {
        Self {
            name: name.to_string(),
            url,
            reachable: None,
            detail: None,
        }
    }
}

/// Output of the status phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// `compose ps` output, or the reason it is unavailable.
    pub services: String,
    pub endpoints: Vec<Endpoint>,
}

/// URLs the operator can use after a successful run.
pub fn endpoints(config: &DeployConfig) -> Vec<Endpoint> {
    let api = format!("http://localhost:{}", config.api_port);
    let mut list = vec![
        Endpoint::new("API", format!("{api}/")),
        Endpoint::new("API docs", format!("{api}/docs")),
    ];
    if config.with_web {
        list.push(Endpoint::new(
            "Web UI",
            format!("http://localhost:{}/", config.web_port),
        ));
    }
    list
}

/// GET `endpoint.url`; any non-5xx answer counts as reachable.
pub async fn probe_endpoint(client: &reqwest::Client, endpoint: &mut Endpoint) {
    match client.get(&endpoint.url).send().await {
        Ok(resp) => {
            let status = resp.status();
            endpoint.reachable = Some(!status.is_server_error());
            endpoint.detail = Some(status.to_string());
        }
        Err(e) => {
            debug!(url = %endpoint.url, "probe failed: {e}");
            endpoint.reachable = Some(false);
            endpoint.detail = Some(if e.is_timeout() {
                "timed out".to_string()
            } else if e.is_connect() {
                "connection refused".to_string()
            } else {
                e.to_string()
            });
        }
    }
}

fn client(timeout: Duration) -> Option<reqwest::Client> {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => Some(c),
        Err(e) => {
            warn!("HTTP client unavailable, endpoints not probed: {e}");
            None
        }
    }
}

/// Collect the status report for the profiles this run started.
pub async fn collect(compose: &Compose, config: &DeployConfig) -> StatusReport {
    let services = match compose.ps(&config.serving_profiles()).await {
        Ok(table) => table,
        Err(e) => {
            warn!("Service status unavailable: {e}");
            format!("unavailable: {e}")
        }
    };

    let mut endpoints = endpoints(config);
    if let Some(client) = client(config.probe_timeout) {
        for endpoint in &mut endpoints {
            probe_endpoint(&client, endpoint).await;
        }
    }

    StatusReport { services, endpoints }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_endpoints_by_default() {
        let list = endpoints(&DeployConfig::default());
        let urls: Vec<&str> = list.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["http://localhost:8000/", "http://localhost:8000/docs"]);
        assert!(list.iter().all(|e| e.reachable.is_none()));
    }

    #[test]
    fn web_endpoint_uses_web_port() {
        let config = DeployConfig::builder()
            .with_web(true)
            .web_port(9501)
            .build()
            .unwrap();
        let list = endpoints(&config);
        assert_eq!(list.last().unwrap().url, "http://localhost:9501/");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client(Duration::from_secs(2)).unwrap();
        let mut endpoint = Endpoint::new("API", format!("http://127.0.0.1:{port}/"));
        probe_endpoint(&client, &mut endpoint).await;
        assert_eq!(endpoint.reachable, Some(false));
        assert!(endpoint.detail.is_some());
    }
}
