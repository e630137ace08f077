pub mod client;
pub mod discovery;
pub mod nacos;
pub mod resolver;
pub mod selector;
pub mod telnet;
pub mod xclient;
pub mod zookeeper;

pub use client::*;
pub use discovery::*;
pub use resolver::*;
pub use selector::*;
pub use telnet::*;
pub use xclient::*;

use async_trait::async_trait;
use dubbo_protocol::{Request, Response, Result};

/// one protocol tier able to carry an invocation.
///
/// A tier failing with a recoverable error hands the request to the next one.
#[async_trait]
pub trait Invoker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, req: &Request) -> Result<Response>;
}
