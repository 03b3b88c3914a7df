//! Data service wire API.
//!
//! Requests share a common prefix of `method_id:u32_be`; child-scoped
//! methods follow it with `child_index:u32_be`. Responses are
//! `method_id, offset, status` followed by a method-specific body. All
//! multi-byte scalars are big-endian and all identifiers are 16 raw bytes.

pub mod caps;
pub mod node;
pub mod request;
pub mod response;

pub use caps::ApiCap;
pub use node::{ArtifactRecord, BlockNode, NodeId, TransactionNode};
pub use request::{Method, Request};
pub use response::ResponseHeader;

use thiserror::Error;

/// Global-settings key holding the root block certificate.
pub const GLOBAL_SETTING_ROOT_BLOCK: u64 = 0x0000_0000_0000_0001;

/// Codec-level failures shared by the request and response sides.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The payload size did not match the method's body layout.
    #[error("invalid payload size")]
    InvalidSize,

    /// A field held an invalid value.
    #[error("invalid parameter")]
    InvalidParameter,

    /// The method identifier is not part of the API.
    #[error("unknown method id 0x{0:08x}")]
    UnknownMethod(u32),

    /// A response carried a different method identifier than the request.
    #[error("unexpected method: expected {expected:?}, got {actual:?}")]
    UnexpectedMethod {
        /// Method the caller sent.
        expected: Method,
        /// Method found in the response.
        actual: Method,
    },
}
