use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use super::{FailMode, Invoker, SelectMode};
use dubbo_protocol::*;

const MAX_TIMEOUT_MS: u128 = 300_000;

/// client options, loadable from camelCase JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Opt {
    pub dubbo_version: String,
    /// the budget of one whole invocation.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// zero leaves connecting bounded by the invocation budget only.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// zero disables heartbeats.
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    pub service_version: String,
    pub group: Option<String>,
    pub select_mode: SelectMode,
    pub fail_mode: FailMode,
    pub registry_username: Option<String>,
    pub registry_password: Option<String>,
    pub telnet_prompt: String,
    pub nodelay: Option<bool>,
}

impl Default for Opt {
    fn default() -> Self {
        Opt {
            dubbo_version: DEFAULT_DUBBO_VERSION.to_owned(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(0),
            heartbeat_interval: Duration::from_secs(0),
            service_version: String::new(),
            group: None,
            select_mode: SelectMode::First,
            fail_mode: FailMode::Failover,
            registry_username: None,
            registry_password: None,
            telnet_prompt: "dubbo>".to_owned(),
            nodelay: Some(true),
        }
    }
}

impl Opt {
    pub fn from_json(s: &str) -> Result<Opt> {
        let opt: Opt = serde_json::from_str(s)
            .map_err(|err| Error::new(ErrorKind::ConfigurationError, err))?;
        opt.validate()?;
        Ok(opt)
    }

    pub fn validate(&self) -> Result<()> {
        let ms = self.timeout.as_millis();
        if ms == 0 || ms > MAX_TIMEOUT_MS {
            return Err(Error::new(
                ErrorKind::ConfigurationError,
                format!("timeout must be within 1..={} ms, got {}", MAX_TIMEOUT_MS, ms),
            ));
        }
        if !is_dubbo_version(&self.dubbo_version) {
            return Err(Error::new(
                ErrorKind::ConfigurationError,
                format!(
                    "dubbo version `{}` is not of the form major.minor.patch",
                    self.dubbo_version
                ),
            ));
        }
        if self.telnet_prompt.trim().is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigurationError,
                "telnet prompt must not be empty",
            ));
        }
        if self.registry_username.is_some() != self.registry_password.is_some() {
            return Err(Error::new(
                ErrorKind::ConfigurationError,
                "registry username and password go together",
            ));
        }
        Ok(())
    }
}

// `2.0.2`, `2.7.x`
fn is_dubbo_version(v: &str) -> bool {
    let parts: Vec<&str> = v.split('.').collect();
    let numeric = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    parts.len() == 3 && numeric(parts[0]) && numeric(parts[1]) && (numeric(parts[2]) || parts[2] == "x")
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// a direct client speaking the binary dubbo protocol.
///
/// Every attempt opens its own connection and closes it once the matching
/// response is read. Ids are unique for the life of the invoker.
#[derive(Debug, Clone)]
pub struct NativeInvoker {
    pub opt: Opt,
    seq: Arc<AtomicU64>,
}

impl NativeInvoker {
    pub fn new(opt: Opt) -> NativeInvoker {
        NativeInvoker {
            opt,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_id(&self) -> i64 {
        (self.seq.fetch_add(1, Ordering::SeqCst) & i64::MAX as u64) as i64
    }

    async fn connect(&self, ep: &Endpoint) -> Result<TcpStream> {
        let connecting = TcpStream::connect((ep.host.as_str(), ep.port));
        let stream = if self.opt.connect_timeout.as_millis() == 0 {
            connecting.await?
        } else {
            tokio::time::timeout(self.opt.connect_timeout, connecting)
                .await
                .map_err(|_| {
                    Error::new(
                        ErrorKind::NativeProtocolFailure,
                        format!("connect to {} timed out", ep),
                    )
                })??
        };
        if let Some(nodelay) = self.opt.nodelay {
            stream.set_nodelay(nodelay)?;
        }
        Ok(stream)
    }

    async fn exchange(&self, stream: &mut TcpStream, req: &Request) -> Result<Response> {
        let (mut reader, mut writer) = stream.split();
        let id = self.next_id();
        let msg = req.to_message(id);
        msg.write_to(&mut writer).await?;
        debug!(id, endpoint = %req.target, bytes = msg.body.len(), "request sent");

        let interval = self.opt.heartbeat_interval;
        loop {
            let frame = {
                let read = Message::read_from(&mut reader);
                tokio::pin!(read);
                let mut silent = 0u32;
                loop {
                    if interval.as_millis() == 0 {
                        break (&mut read).await?;
                    }
                    tokio::select! {
                        frame = &mut read => break frame?,
                        _ = tokio::time::sleep(interval) => {
                            silent += 1;
                            if silent >= 2 {
                                warn!(endpoint = %req.target, "no frame within two heartbeat intervals");
                                return Err(Error::new(
                                    ErrorKind::NativeProtocolFailure,
                                    format!("connection to {} went silent", req.target),
                                ));
                            }
                            let ping = Message::heartbeat_request(self.next_id());
                            trace!(id = ping.get_id(), "heartbeat sent");
                            ping.write_to(&mut writer).await?;
                        }
                    }
                }
            };

            if frame.is_event() {
                if frame.is_request() && frame.is_two_way() {
                    trace!(id = frame.get_id(), "answering heartbeat");
                    Message::heartbeat_response(frame.get_id())
                        .write_to(&mut writer)
                        .await?;
                }
                continue;
            }
            if frame.is_request() {
                return Err(Error::new(
                    ErrorKind::NativeProtocolFailure,
                    "provider sent a request frame",
                ));
            }
            if frame.get_id() != id {
                return Err(Error::new(
                    ErrorKind::NativeProtocolFailure,
                    format!("response id {} does not match request id {}", frame.get_id(), id),
                ));
            }
            debug!(id, status = frame.get_status_code(), bytes = frame.body.len(), "response received");
            return Response::decode(&frame);
        }
    }
}

#[async_trait]
impl Invoker for NativeInvoker {
    fn name(&self) -> &'static str {
        "dubbo"
    }

    async fn attempt(&self, req: &Request) -> Result<Response> {
        let call = async {
            let mut stream = self.connect(&req.target).await?;
            self.exchange(&mut stream, req).await
        };
        let resp = tokio::time::timeout(req.timeout, call).await.map_err(|_| {
            Error::new(
                ErrorKind::TimeoutError,
                format!("{} did not answer within {:?}", req.target, req.timeout),
            )
        })??;

        match resp.status {
            ResponseStatus::ProtocolError => {
                let detail = resp.error_detail.unwrap_or_default();
                let timed_out = MessageStatus::from_code(resp.remote_status)
                    .map_or(false, |s| s.is_timeout());
                if timed_out {
                    Err(Error::new(ErrorKind::TimeoutError, detail))
                } else {
                    Err(Error::new(ErrorKind::NativeProtocolFailure, detail))
                }
            }
            _ => Ok(resp),
        }
    }
}
