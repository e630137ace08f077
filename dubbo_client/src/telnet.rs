use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

use super::{Invoker, Opt};
use dubbo_protocol::{marshal, Error, ErrorKind, Request, Response, Result};

/// console replies that mean the invocation did not happen.
const CONSOLE_ERRORS: [&str; 5] = [
    "No such service",
    "No such method",
    "Failed to invoke",
    "Invalid parameters",
    "Unsupported command",
];

fn fallback_error<S: AsRef<str>>(req: &Request, msg: S) -> Error {
    Error::new(
        ErrorKind::FallbackFailure,
        format!("telnet {}: {}", req.target, msg.as_ref()),
    )
}

/// invokes through the provider's telnet console, the `invoke` command.
#[derive(Debug, Clone)]
pub struct TelnetInvoker {
    pub opt: Opt,
}

impl TelnetInvoker {
    pub fn new(opt: Opt) -> TelnetInvoker {
        TelnetInvoker { opt }
    }

    /// `invoke iface.method(arg,arg)` with each argument as JSON.
    pub fn command(req: &Request) -> String {
        let args: Vec<String> = req
            .arguments
            .iter()
            .map(|a| marshal::from_wire(a).to_string())
            .collect();
        format!("invoke {}({})\r\n", req.service, args.join(","))
    }

    async fn converse(&self, req: &Request) -> Result<String> {
        let mut stream = TcpStream::connect((req.target.host.as_str(), req.target.port))
            .await
            .map_err(|e| fallback_error(req, e.to_string()))?;
        let command = Self::command(req);
        debug!(endpoint = %req.target, command = %command.trim_end(), "telnet invoke");
        stream
            .write_all(command.as_bytes())
            .await
            .map_err(|e| fallback_error(req, e.to_string()))?;

        let prompt = self.opt.telnet_prompt.as_str();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| fallback_error(req, e.to_string()))?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if String::from_utf8_lossy(&buf).trim_end().ends_with(prompt) {
                break;
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Extracts the result out of console output.
///
/// Timing lines and prompts are dropped; text that is one JSON value is the
/// result, anything else is returned as text.
pub fn parse_output(raw: &str, prompt: &str) -> std::result::Result<Value, String> {
    let text = raw
        .lines()
        .map(|l| l.replace(prompt, ""))
        .filter(|l| !l.trim_start().starts_with("elapsed:"))
        .collect::<Vec<_>>()
        .join("\n");
    let text = text.trim();
    if text.is_empty() {
        return Err("empty reply".to_owned());
    }
    if CONSOLE_ERRORS.iter().any(|e| text.starts_with(e)) {
        return Err(text.lines().next().unwrap_or(text).to_owned());
    }

    Ok(serde_json::from_str::<Value>(text).unwrap_or_else(|_| Value::String(text.to_owned())))
}

#[async_trait]
impl Invoker for TelnetInvoker {
    fn name(&self) -> &'static str {
        "telnet"
    }

    async fn attempt(&self, req: &Request) -> Result<Response> {
        let raw = tokio::time::timeout(req.timeout, self.converse(req))
            .await
            .map_err(|_| {
                Error::new(
                    ErrorKind::TimeoutError,
                    format!("telnet {} did not answer within {:?}", req.target, req.timeout),
                )
            })??;
        let value = parse_output(&raw, &self.opt.telnet_prompt).map_err(|e| fallback_error(req, e))?;
        Ok(Response::ok(marshal::to_wire_untyped(&value)))
    }
}
