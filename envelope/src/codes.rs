//! Error codes carried in `error.code`.
//!
//! Server codes follow HTTP status semantics and pass through the client
//! untouched. [`CLIENT_ERROR`] is the only code the client synthesizes.

/// Synthetic code for every client-side failure (timeout, closed, invalid reply).
pub const CLIENT_ERROR: i64 = -1;

pub const NOT_MODIFIED: i64 = 304;
pub const BAD_REQUEST: i64 = 400;
pub const UNAUTHORIZED: i64 = 401;
pub const NOT_FOUND: i64 = 404;
pub const CONFLICT: i64 = 409;
pub const LOCKED: i64 = 423;
pub const INTERNAL_SERVER_ERROR: i64 = 500;
pub const NOT_IMPLEMENTED: i64 = 501;
pub const BAD_GATEWAY: i64 = 502;
