use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use strum_macros::{Display, EnumString};

use crate::hessian::{Decoder, Encoder};
use crate::message::{DubboMessage, Message, MessageStatus};
use crate::signature::{jvm_parameter_descriptor, TypeDescriptor};
use crate::{Error, ErrorKind, Result, WireValue};

pub const DEFAULT_DUBBO_VERSION: &str = "2.0.2";

const RESPONSE_WITH_EXCEPTION: i32 = 0;
const RESPONSE_VALUE: i32 = 1;
const RESPONSE_NULL_VALUE: i32 = 2;
const RESPONSE_WITH_EXCEPTION_WITH_ATTACHMENTS: i32 = 3;
const RESPONSE_VALUE_WITH_ATTACHMENTS: i32 = 4;
const RESPONSE_NULL_VALUE_WITH_ATTACHMENTS: i32 = 5;

/// a provider address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
        }
    }

    /// parses `host:port`; the port is mandatory.
    pub fn parse(addr: &str) -> Result<Endpoint> {
        let addr = addr.trim();
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
            Error::new(
                ErrorKind::ConfigurationError,
                format!("address `{}` is not host:port", addr),
            )
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            Error::new(
                ErrorKind::ConfigurationError,
                format!("address `{}` has an invalid port", addr),
            )
        })?;
        if host.is_empty() {
            return Err(Error::new(
                ErrorKind::ConfigurationError,
                format!("address `{}` has no host", addr),
            ));
        }
        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub interface_name: String,
    pub method_name: String,
}

impl ServiceDescriptor {
    pub fn new<S: Into<String>, M: Into<String>>(interface_name: S, method_name: M) -> Self {
        ServiceDescriptor {
            interface_name: interface_name.into(),
            method_name: method_name.into(),
        }
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.interface_name, self.method_name)
    }
}

/// one invocation against one provider, arguments already marshalled.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub target: Endpoint,
    pub service: ServiceDescriptor,
    pub argument_types: Vec<TypeDescriptor>,
    pub arguments: Vec<WireValue>,
    pub timeout: Duration,
    pub dubbo_version: String,
    pub service_version: String,
    pub group: Option<String>,
}

impl Request {
    pub fn new(target: Endpoint, service: ServiceDescriptor) -> Request {
        Request {
            target,
            service,
            argument_types: Vec::new(),
            arguments: Vec::new(),
            timeout: Duration::from_secs(60),
            dubbo_version: DEFAULT_DUBBO_VERSION.to_owned(),
            service_version: String::new(),
            group: None,
        }
    }

    pub fn parameter_descriptor(&self) -> String {
        jvm_parameter_descriptor(&self.argument_types)
    }

    pub fn attachments(&self) -> Vec<(String, WireValue)> {
        let mut attachments = vec![
            ("path".to_owned(), self.service.interface_name.as_str().into()),
            ("interface".to_owned(), self.service.interface_name.as_str().into()),
            ("version".to_owned(), self.service_version.as_str().into()),
        ];
        if let Some(group) = self.group.as_ref().filter(|g| !g.is_empty()) {
            attachments.push(("group".to_owned(), group.as_str().into()));
        }
        attachments.push((
            "timeout".to_owned(),
            self.timeout.as_millis().to_string().into(),
        ));
        attachments
    }

    /// the hessian invocation body.
    pub fn encode_body(&self) -> BytesMut {
        let mut enc = Encoder::new();
        enc.write_string(&self.dubbo_version);
        enc.write_string(&self.service.interface_name);
        enc.write_string(&self.service_version);
        enc.write_string(&self.service.method_name);
        enc.write_string(&self.parameter_descriptor());
        for (i, arg) in self.arguments.iter().enumerate() {
            match self.argument_types.get(i) {
                Some(td) => enc.write_typed(arg, td),
                None => enc.write_value(arg),
            }
        }
        enc.write_string_map(&self.attachments());
        enc.into_bytes()
    }

    pub fn to_message(&self, id: i64) -> Message {
        Message::request(id, self.encode_body())
    }
}

/// an invocation as a provider sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub dubbo_version: String,
    pub path: String,
    pub version: String,
    pub method: String,
    pub parameter_descriptor: String,
    pub arguments: Vec<WireValue>,
    pub attachments: WireValue,
}

impl Invocation {
    pub fn decode(body: &[u8]) -> Result<Invocation> {
        let mut dec = Decoder::new(body);
        let dubbo_version = dec.read_string()?;
        let path = dec.read_string()?;
        let version = dec.read_string()?;
        let method = dec.read_string()?;
        let parameter_descriptor = dec.read_string()?;
        let arguments = (0..count_descriptors(&parameter_descriptor)?)
            .map(|_| dec.read_value())
            .collect::<Result<Vec<_>>>()?;
        let attachments = dec.read_value()?;
        Ok(Invocation {
            dubbo_version,
            path,
            version,
            method,
            parameter_descriptor,
            arguments,
            attachments,
        })
    }
}

fn count_descriptors(desc: &str) -> Result<usize> {
    let bytes = desc.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'[' => {
                i += 1;
                continue;
            }
            b'L' => match desc[i..].find(';') {
                Some(end) => i += end,
                None => {
                    return Err(Error::new(
                        ErrorKind::NativeProtocolFailure,
                        format!("unterminated class in descriptor `{}`", desc),
                    ))
                }
            },
            b'Z' | b'B' | b'C' | b'S' | b'I' | b'J' | b'F' | b'D' => {}
            other => {
                return Err(Error::new(
                    ErrorKind::NativeProtocolFailure,
                    format!("bad descriptor character `{}` in `{}`", other as char, desc),
                ))
            }
        }
        count += 1;
        i += 1;
    }
    Ok(count)
}

#[derive(Debug, Copy, Clone, Display, PartialEq, Eq, EnumString)]
pub enum ResponseStatus {
    Ok,
    ServiceException,
    ProtocolError,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: ResponseStatus,
    pub value: Option<WireValue>,
    pub error_detail: Option<String>,
    /// the status byte of the frame, `20` for ok.
    pub remote_status: u8,
}

impl Response {
    pub fn ok(value: WireValue) -> Response {
        Response {
            status: ResponseStatus::Ok,
            value: Some(value),
            error_detail: None,
            remote_status: MessageStatus::Ok as u8,
        }
    }

    /// decodes a response frame; heartbeats are filtered before this point.
    pub fn decode(msg: &Message) -> Result<Response> {
        let code = msg.get_status_code();
        if msg.get_status() != Some(MessageStatus::Ok) {
            let mut dec = Decoder::new(&msg.body);
            let detail = match dec.read_string() {
                Ok(s) => s,
                Err(_) => String::from_utf8_lossy(&msg.body).into_owned(),
            };
            let status = msg
                .get_status()
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("status {}", code));
            return Ok(Response {
                status: ResponseStatus::ProtocolError,
                value: None,
                error_detail: Some(format!("{}: {}", status, detail)),
                remote_status: code,
            });
        }

        let mut dec = Decoder::new(&msg.body);
        let flag = dec.read_int()?;
        let (status, value) = match flag {
            RESPONSE_VALUE | RESPONSE_VALUE_WITH_ATTACHMENTS => {
                (ResponseStatus::Ok, dec.read_value()?)
            }
            RESPONSE_NULL_VALUE | RESPONSE_NULL_VALUE_WITH_ATTACHMENTS => {
                (ResponseStatus::Ok, WireValue::Null)
            }
            RESPONSE_WITH_EXCEPTION | RESPONSE_WITH_EXCEPTION_WITH_ATTACHMENTS => {
                (ResponseStatus::ServiceException, dec.read_value()?)
            }
            other => {
                return Err(Error::new(
                    ErrorKind::NativeProtocolFailure,
                    format!("unknown response type {}", other),
                ))
            }
        };
        if flag >= RESPONSE_WITH_EXCEPTION_WITH_ATTACHMENTS {
            dec.read_value()?;
        }

        let error_detail = match status {
            ResponseStatus::ServiceException => Some(exception_detail(&value)),
            _ => None,
        };
        Ok(Response {
            status,
            value: Some(value),
            error_detail,
            remote_status: code,
        })
    }

    pub fn encode_value(value: &WireValue) -> BytesMut {
        let mut enc = Encoder::new();
        if value.is_null() {
            enc.write_int(RESPONSE_NULL_VALUE);
        } else {
            enc.write_int(RESPONSE_VALUE);
            enc.write_value(value);
        }
        enc.into_bytes()
    }

    pub fn encode_exception(exception: &WireValue) -> BytesMut {
        let mut enc = Encoder::new();
        enc.write_int(RESPONSE_WITH_EXCEPTION);
        enc.write_value(exception);
        enc.into_bytes()
    }

    pub fn encode_error(message: &str) -> BytesMut {
        let mut enc = Encoder::new();
        enc.write_string(message);
        enc.into_bytes()
    }
}

/// `class: message` of a remote throwable.
pub fn exception_detail(exception: &WireValue) -> String {
    let class = exception
        .type_name()
        .filter(|n| !n.is_empty())
        .unwrap_or("java.lang.Throwable");
    match exception.field("detailMessage").and_then(|m| m.as_str()) {
        Some(message) => format!("{}: {}", class, message),
        None => class.to_owned(),
    }
}
