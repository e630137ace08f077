use async_trait::async_trait;
use qstring::QString;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

use super::{nacos::NacosDiscovery, zookeeper::ZookeeperDiscovery, Opt, ServiceUrl, DUBBO_SCHEME};
use dubbo_protocol::{Endpoint, Error, ErrorKind, Result};

/// registry weight when a provider url names none.
pub const DEFAULT_WEIGHT: f64 = 100.0;

#[derive(Debug, Copy, Clone, Display, PartialEq, Eq, EnumIter, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    Zookeeper,
    Nacos,
}

impl RegistryKind {
    pub fn default_port(self) -> u16 {
        match self {
            RegistryKind::Zookeeper => 2181,
            RegistryKind::Nacos => 8848,
        }
    }
}

/// a provider advertised by a registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    pub scheme: String,
    pub endpoint: Endpoint,
    pub weight: f64,
}

impl Provider {
    /// Parses a provider url as registered under `/dubbo/<iface>/providers`.
    ///
    /// Urls without a port and providers marked `enabled=false` yield `None`.
    pub fn from_url(url: &str) -> Option<Provider> {
        if !url.contains("://") {
            return None;
        }
        let parsed = ServiceUrl::parse(url, DUBBO_SCHEME).ok()?;
        let endpoint = parsed.endpoint()?;
        let qs = QString::from(parsed.query.as_str());
        if qs.get("enabled") == Some("false") {
            return None;
        }
        let weight = qs
            .get("weight")
            .and_then(|w| w.parse::<f64>().ok())
            .unwrap_or(DEFAULT_WEIGHT);
        Some(Provider {
            scheme: parsed.scheme,
            endpoint,
            weight,
        })
    }
}

/// Looks up the providers of an interface.
///
/// An interface nobody provides is `ServiceNotFoundError`; a registry that
/// cannot be asked is `RegistryUnavailableError`.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn get_services(&self, interface: &str) -> Result<Vec<Provider>>;
}

/// the registry named by a registry address.
pub fn discovery_for(kind: RegistryKind, host: &str, port: u16, opt: &Opt) -> Box<dyn Discovery> {
    debug!(registry = %kind, host, port, "registry lookup");
    match kind {
        RegistryKind::Zookeeper => Box::new(ZookeeperDiscovery::new(host, port, opt.timeout)),
        RegistryKind::Nacos => Box::new(NacosDiscovery::new(
            host,
            port,
            opt.registry_username.clone(),
            opt.registry_password.clone(),
        )),
    }
}

pub(crate) fn not_found(interface: &str, why: &str) -> Error {
    Error::new(
        ErrorKind::ServiceNotFoundError,
        format!("service {} not found: {}", interface, why),
    )
}

/// a fixed provider list.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    servers: Vec<Provider>,
}

impl StaticDiscovery {
    pub fn new(servers: Vec<Provider>) -> StaticDiscovery {
        StaticDiscovery { servers }
    }

    /// builds the list from provider urls, dropping unparsable ones.
    pub fn from_urls<S: AsRef<str>>(urls: &[S]) -> StaticDiscovery {
        StaticDiscovery::new(urls.iter().filter_map(|u| Provider::from_url(u.as_ref())).collect())
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn get_services(&self, interface: &str) -> Result<Vec<Provider>> {
        if self.servers.is_empty() {
            return Err(not_found(interface, "no providers"));
        }
        Ok(self.servers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn provider_urls() {
        let p = Provider::from_url("dubbo://10.0.0.1:20880/com.x.Svc?anyhost=true&weight=50").unwrap();
        assert_eq!(Endpoint::new("10.0.0.1", 20880), p.endpoint);
        assert_eq!("dubbo", p.scheme);
        assert_eq!(50.0, p.weight);

        let p = Provider::from_url("tri://10.0.0.2:50051/com.x.Svc").unwrap();
        assert_eq!("tri", p.scheme);
        assert_eq!(DEFAULT_WEIGHT, p.weight);

        assert_eq!(None, Provider::from_url("10.0.0.1:20880"));
        assert_eq!(None, Provider::from_url("dubbo://10.0.0.1/com.x.Svc"));
        assert_eq!(None, Provider::from_url("dubbo://10.0.0.1:20880/com.x.Svc?enabled=false"));
    }

    #[test]
    fn registry_kinds() {
        assert_eq!(RegistryKind::Zookeeper, RegistryKind::from_str("zookeeper").unwrap());
        assert_eq!("nacos", RegistryKind::Nacos.to_string());
        assert!(RegistryKind::from_str("etcd").is_err());
    }

    #[tokio::test]
    async fn static_discovery() {
        let d = StaticDiscovery::from_urls(&["dubbo://a:1", "garbage"]);
        let providers = d.get_services("com.x.Svc").await.unwrap();
        assert_eq!(1, providers.len());

        let err = StaticDiscovery::default().get_services("com.x.Svc").await.unwrap_err();
        assert_eq!(ErrorKind::ServiceNotFoundError, err.kind());
    }
}
