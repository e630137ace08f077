use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{Discovery, Invoker, NativeInvoker, Opt, Resolver, TelnetInvoker};
use dubbo_protocol::{
    marshal, signature, Error, ErrorKind, Request, Response, ResponseStatus, Result,
    ServiceDescriptor,
};

#[derive(Debug, Copy, Clone, Display, PartialEq, EnumIter, EnumString, Serialize, Deserialize)]
pub enum FailMode {
    //Failover hands a native protocol failure to the telnet console
    Failover = 0,
    //Failfast returns the native failure immediately
    Failfast = 1,
}

#[derive(Debug, Copy, Clone, Display, PartialEq, EnumIter, EnumString, Serialize, Deserialize)]
pub enum SelectMode {
    //First always takes the first provider the registry lists
    First = 0,
    //Random is selecting randomly
    Random = 1,
    //RoundRobin is selecting by round robin
    RoundRobin = 2,
    //WeightedRandom is selecting randomly in proportion to provider weight
    WeightedRandom = 3,
    //WeightedRoundRobin is selecting by weighted round robin
    WeightedRoundRobin = 4,
    //ConsistentHash is selecting by hashing the service and method
    ConsistentHash = 5,
}

/// what a caller asks for, in its JSON form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub registry_address: Option<String>,
    pub service_uri: Option<String>,
    pub interface_name: String,
    pub method_name: String,
    pub parameter_types: Option<String>,
    pub parameter_values: Option<Value>,
}

/// Invokes dubbo services without stubs.
///
/// An invocation resolves its provider, marshals its arguments and then walks
/// the tiers in order, all within one deadline of `opt.timeout`.
pub struct XClient {
    pub opt: Opt,
    resolver: Resolver,
    tiers: Vec<Box<dyn Invoker>>,
}

impl XClient {
    pub fn new(opt: Opt) -> XClient {
        let mut tiers: Vec<Box<dyn Invoker>> = vec![Box::new(NativeInvoker::new(opt.clone()))];
        if opt.fail_mode == FailMode::Failover {
            tiers.push(Box::new(TelnetInvoker::new(opt.clone())));
        }
        XClient {
            resolver: Resolver::new(opt.clone()),
            tiers,
            opt,
        }
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> XClient {
        self.resolver = self.resolver.with_discovery(discovery);
        self
    }

    /// replaces the protocol tiers, tried in the given order.
    pub fn with_tiers(mut self, tiers: Vec<Box<dyn Invoker>>) -> XClient {
        self.tiers = tiers;
        self
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    fn timeout_error(&self) -> Error {
        Error::new(
            ErrorKind::TimeoutError,
            format!("invocation exceeded its {} ms budget", self.opt.timeout.as_millis()),
        )
    }

    pub async fn invoke(&self, req: &InvokeRequest) -> Result<Value> {
        let deadline = Instant::now() + self.opt.timeout;
        let service = ServiceDescriptor::new(req.interface_name.trim(), req.method_name.trim());
        if service.interface_name.is_empty() || service.method_name.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigurationError,
                "interface name and method name are required",
            ));
        }

        let resolving = self.resolver.resolve(
            req.registry_address.as_deref(),
            req.service_uri.as_deref(),
            &service,
        );
        let target = timeout_at(deadline, resolving)
            .await
            .map_err(|_| self.timeout_error())??;

        let mut request = Request::new(target, service);
        let (argument_types, arguments) = match req
            .parameter_types
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            Some(sig) => {
                let types = signature::parse(sig)?;
                let args = marshal::to_wire_args(req.parameter_values.as_ref(), &types)?;
                (types, args)
            }
            None => marshal::to_wire_traditional(req.parameter_values.as_ref()),
        };
        request.argument_types = argument_types;
        request.arguments = arguments;
        request.dubbo_version = self.opt.dubbo_version.clone();
        request.service_version = self.opt.service_version.clone();
        request.group = self.opt.group.clone();
        debug!(
            service = %request.service,
            descriptor = %request.parameter_descriptor(),
            "arguments marshalled"
        );

        let mut last_err = None;
        for (i, tier) in self.tiers.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.as_millis() == 0 {
                return Err(self.timeout_error());
            }
            request.timeout = remaining;

            let outcome = timeout_at(deadline, tier.attempt(&request))
                .await
                .map_err(|_| self.timeout_error())?
                .and_then(normalize);
            match outcome {
                Ok(v) => {
                    info!(tier = tier.name(), service = %request.service, endpoint = %request.target, "invocation succeeded");
                    return Ok(v);
                }
                Err(err) if err.kind().is_recoverable() && i + 1 < self.tiers.len() => {
                    // re-try on the next tier
                    warn!(
                        tier = tier.name(),
                        next = self.tiers[i + 1].name(),
                        error = %err,
                        "falling back"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            Error::new(ErrorKind::ConfigurationError, "no invoker tier configured")
        }))
    }
}

fn normalize(resp: Response) -> Result<Value> {
    match resp.status {
        ResponseStatus::Ok => Ok(resp.value.as_ref().map(marshal::from_wire).unwrap_or(Value::Null)),
        ResponseStatus::ServiceException => Err(Error::new(
            ErrorKind::RemoteServiceException,
            resp.error_detail
                .unwrap_or_else(|| "remote service threw an exception".to_owned()),
        )),
        ResponseStatus::ProtocolError => Err(Error::new(
            ErrorKind::NativeProtocolFailure,
            resp.error_detail.unwrap_or_else(|| "protocol error".to_owned()),
        )),
    }
}
