pub mod call;
pub mod error;
pub mod hessian;
pub mod marshal;
pub mod message;
pub mod signature;
pub mod value;

pub use call::*;
pub use error::*;
pub use message::*;
pub use signature::{ContainerKind, ScalarKind, TypeDescriptor};
pub use value::WireValue;
