use std::fmt;

use async_trait::async_trait;
use hyper::{client::HttpConnector, Body, Client, Method, Request, StatusCode, Uri};
use serde::Deserialize;
use tracing::{debug, info};

use super::{discovery::not_found, Discovery, Provider, DUBBO_SCHEME};
use dubbo_protocol::{Endpoint, Error, ErrorKind, Result};

/// weight of a nacos instance that names none.
pub const DEFAULT_NACOS_WEIGHT: f64 = 1.0;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InstanceList {
    pub name: String,
    pub hosts: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Instance {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for Instance {
    fn default() -> Self {
        Instance {
            ip: String::new(),
            port: 0,
            weight: DEFAULT_NACOS_WEIGHT,
            healthy: true,
            enabled: true,
            metadata: serde_json::Map::new(),
        }
    }
}

impl Instance {
    pub fn provider(&self) -> Option<Provider> {
        if !self.healthy || !self.enabled || self.ip.is_empty() || self.port == 0 {
            return None;
        }
        let scheme = self
            .metadata
            .get("protocol")
            .and_then(|p| p.as_str())
            .unwrap_or(DUBBO_SCHEME);
        Some(Provider {
            scheme: scheme.to_owned(),
            endpoint: Endpoint::new(self.ip.as_str(), self.port),
            weight: self.weight,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginReply {
    access_token: String,
}

fn unavailable<E: fmt::Display>(base: &str, e: E) -> Error {
    Error::new(
        ErrorKind::RegistryUnavailableError,
        format!("nacos {}: {}", base, e),
    )
}

/// the naming service of a nacos server, over its http api.
#[derive(Debug, Clone)]
pub struct NacosDiscovery {
    base: String,
    username: Option<String>,
    password: Option<String>,
    client: Client<HttpConnector>,
}

impl NacosDiscovery {
    pub fn new(host: &str, port: u16, username: Option<String>, password: Option<String>) -> NacosDiscovery {
        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host.to_owned()
        };
        NacosDiscovery {
            base: format!("http://{}:{}", host, port),
            username,
            password,
            client: Client::new(),
        }
    }

    /// the naming service dubbo registers an interface under.
    pub fn service_name(interface: &str) -> String {
        format!("providers:{}::", interface)
    }

    async fn send(&self, req: Request<Body>) -> Result<(StatusCode, hyper::body::Bytes)> {
        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| unavailable(&self.base, e))?;
        let status = resp.status();
        let body = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| unavailable(&self.base, e))?;
        Ok((status, body))
    }

    fn uri(&self, path_and_query: &str) -> Result<Uri> {
        format!("{}{}", self.base, path_and_query)
            .parse::<Uri>()
            .map_err(|e| Error::new(ErrorKind::ConfigurationError, format!("bad nacos address {}: {}", self.base, e)))
    }

    async fn login(&self) -> Result<Option<String>> {
        let (username, password) = match (&self.username, &self.password) {
            (Some(u), Some(p)) => (u, p),
            _ => return Ok(None),
        };
        let form = format!(
            "username={}&password={}",
            urlencoding::encode(username),
            urlencoding::encode(password)
        );
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.uri("/nacos/v1/auth/login")?)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .map_err(|e| unavailable(&self.base, e))?;
        let (status, body) = self.send(req).await?;
        if !status.is_success() {
            return Err(unavailable(&self.base, format!("login failed with {}", status)));
        }
        let reply: LoginReply = serde_json::from_slice(&body)
            .map_err(|e| unavailable(&self.base, format!("unreadable login reply: {}", e)))?;
        info!(base = %self.base, user = %username, "logged in to nacos");
        Ok(Some(reply.access_token))
    }

    pub async fn list_instances(&self, interface: &str) -> Result<InstanceList> {
        let token = self.login().await?;
        let mut query = format!(
            "/nacos/v1/ns/instance/list?serviceName={}&healthyOnly=true",
            urlencoding::encode(&Self::service_name(interface))
        );
        if let Some(token) = token {
            query.push_str("&accessToken=");
            query.push_str(&urlencoding::encode(&token));
        }
        let req = Request::builder()
            .method(Method::GET)
            .uri(self.uri(&query)?)
            .body(Body::empty())
            .map_err(|e| unavailable(&self.base, e))?;
        let (status, body) = self.send(req).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(not_found(interface, "unknown to nacos"));
        }
        if !status.is_success() {
            return Err(unavailable(
                &self.base,
                format!("{}: {}", status, String::from_utf8_lossy(&body).trim()),
            ));
        }
        serde_json::from_slice(&body)
            .map_err(|e| unavailable(&self.base, format!("unreadable instance list: {}", e)))
    }
}

#[async_trait]
impl Discovery for NacosDiscovery {
    async fn get_services(&self, interface: &str) -> Result<Vec<Provider>> {
        let list = self.list_instances(interface).await?;
        debug!(service = %list.name, instances = list.hosts.len(), "nacos instances listed");
        if list.hosts.is_empty() {
            return Err(not_found(interface, "no instances registered"));
        }
        let providers: Vec<Provider> = list.hosts.iter().filter_map(Instance::provider).collect();
        if providers.is_empty() {
            return Err(not_found(interface, "no healthy instance"));
        }
        Ok(providers)
    }
}
