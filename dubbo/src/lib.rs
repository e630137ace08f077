pub use dubbo_client::*;
pub use dubbo_protocol::*;
