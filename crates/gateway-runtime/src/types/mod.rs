//! Core data types shared across the gateway: descriptors, requests,
//! results, and the error taxonomy.

pub mod descriptor;
pub mod error;
pub mod request;
pub mod result;

pub use descriptor::{ModeSpec, TargetKind, ToolDescriptor};
pub use error::{ErrorKind, GatewayError};
pub use request::ToolRequest;
pub use result::ToolResult;
