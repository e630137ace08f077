use std::{
    str::FromStr,
    sync::{Arc, Mutex},
};

use tracing::{debug, info};

use super::{discovery_for, new_selector, ClientSelector, Discovery, Opt, RegistryKind};
use dubbo_protocol::{Endpoint, Error, ErrorKind, Result, ServiceDescriptor};

pub const DUBBO_SCHEME: &str = "dubbo";

/// `scheme://host:port[/path][?query]`, as written by callers and registries.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
}

fn config_error<S: AsRef<str>>(addr: &str, msg: S) -> Error {
    Error::new(
        ErrorKind::ConfigurationError,
        format!("bad address `{}`: {}", addr, msg.as_ref()),
    )
}

impl ServiceUrl {
    /// parses a url; text without `://` takes `default_scheme`.
    pub fn parse(text: &str, default_scheme: &str) -> Result<ServiceUrl> {
        let text = text.trim();
        let (scheme, rest) = match text.find("://") {
            Some(i) => (&text[..i], &text[i + 3..]),
            None => (default_scheme, text),
        };
        if scheme.is_empty() {
            return Err(config_error(text, "empty scheme"));
        }

        let (rest, query) = match rest.find('?') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            // [v6]:port
            let end = bracketed
                .find(']')
                .ok_or_else(|| config_error(text, "unclosed `[` in host"))?;
            let host = &bracketed[..end];
            let port = match &bracketed[end + 1..] {
                "" => None,
                p => Some(
                    p.strip_prefix(':')
                        .ok_or_else(|| config_error(text, "expected `:` after `]`"))?,
                ),
            };
            (host, port)
        } else {
            match authority.rfind(':') {
                Some(i) => (&authority[..i], Some(&authority[i + 1..])),
                None => (authority, None),
            }
        };
        if host.is_empty() {
            return Err(config_error(text, "missing host"));
        }
        let port = match port {
            None => None,
            Some(p) => match p.parse::<u16>() {
                Ok(p) if p > 0 => Some(p),
                _ => return Err(config_error(text, format!("port `{}` is not in 1..=65535", p))),
            },
        };

        Ok(ServiceUrl {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_owned(),
            port,
            path: path.to_owned(),
            query: query.to_owned(),
        })
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.port.map(|port| Endpoint::new(self.host.as_str(), port))
    }
}

/// where an invocation goes; exactly one form per call.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Direct(Endpoint),
    ViaRegistry {
        kind: RegistryKind,
        host: String,
        port: u16,
    },
}

impl Target {
    pub fn from_addresses(registry_address: Option<&str>, service_uri: Option<&str>) -> Result<Target> {
        fn present(a: Option<&str>) -> Option<&str> {
            a.map(str::trim).filter(|a| !a.is_empty())
        }
        match (present(registry_address), present(service_uri)) {
            (Some(_), Some(_)) => Err(Error::new(
                ErrorKind::ConfigurationError,
                "give either a registry address or a service uri, not both",
            )),
            (None, None) => Err(Error::new(
                ErrorKind::ConfigurationError,
                "a registry address or a service uri is required",
            )),
            (None, Some(uri)) => {
                let url = ServiceUrl::parse(uri, DUBBO_SCHEME)?;
                if url.scheme != DUBBO_SCHEME {
                    return Err(config_error(
                        uri,
                        format!("scheme `{}` cannot be invoked, only `dubbo`", url.scheme),
                    ));
                }
                let ep = url
                    .endpoint()
                    .ok_or_else(|| config_error(uri, "a port is required"))?;
                Ok(Target::Direct(ep))
            }
            (Some(addr), None) => {
                if !addr.contains("://") {
                    return Err(config_error(addr, "registry address needs a zookeeper:// or nacos:// scheme"));
                }
                let url = ServiceUrl::parse(addr, "")?;
                let kind = RegistryKind::from_str(&url.scheme)
                    .map_err(|_| config_error(addr, format!("unknown registry `{}`", url.scheme)))?;
                Ok(Target::ViaRegistry {
                    kind,
                    port: url.port.unwrap_or_else(|| kind.default_port()),
                    host: url.host,
                })
            }
        }
    }
}

/// turns caller addresses into the endpoint of one provider.
pub struct Resolver {
    opt: Opt,
    selector: Mutex<Box<dyn ClientSelector>>,
    discovery: Option<Arc<dyn Discovery>>,
}

impl Resolver {
    pub fn new(opt: Opt) -> Resolver {
        Resolver {
            selector: Mutex::new(new_selector(opt.select_mode)),
            discovery: None,
            opt,
        }
    }

    /// looks providers up through `discovery` instead of the registry the
    /// address names.
    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Resolver {
        self.discovery = Some(discovery);
        self
    }

    pub async fn resolve(
        &self,
        registry_address: Option<&str>,
        service_uri: Option<&str>,
        service: &ServiceDescriptor,
    ) -> Result<Endpoint> {
        match Target::from_addresses(registry_address, service_uri)? {
            Target::Direct(ep) => {
                debug!(endpoint = %ep, "direct target");
                Ok(ep)
            }
            Target::ViaRegistry { kind, host, port } => {
                let providers = match &self.discovery {
                    Some(d) => d.get_services(&service.interface_name).await?,
                    None => {
                        discovery_for(kind, &host, port, &self.opt)
                            .get_services(&service.interface_name)
                            .await?
                    }
                };
                let providers: Vec<_> = providers
                    .into_iter()
                    .filter(|p| p.scheme == DUBBO_SCHEME)
                    .collect();
                if providers.is_empty() {
                    return Err(Error::new(
                        ErrorKind::ServiceNotFoundError,
                        format!("no dubbo provider of {} in {} registry {}:{}", service.interface_name, kind, host, port),
                    ));
                }

                // get a key from selector
                let key = service.to_string();
                let mut selector = self.selector.lock().map_err(|_| {
                    Error::new(ErrorKind::ConfigurationError, "provider selector is poisoned")
                })?;
                selector.update_server(&providers);
                let picked = selector.select(&key).ok_or_else(|| {
                    Error::new(
                        ErrorKind::ServiceNotFoundError,
                        format!("no provider selected for {}", key),
                    )
                })?;
                info!(
                    endpoint = %picked.endpoint,
                    providers = providers.len(),
                    mode = %self.opt.select_mode,
                    "provider selected"
                );
                Ok(picked.endpoint)
            }
        }
    }
}
