mod c2s;
mod errors;
mod s2c;

pub use c2s::*;
pub use errors::*;
pub use s2c::*;

/// Serialized outbound message as it sits in a session queue.
pub type Frame = axum::extract::ws::Utf8Bytes;

/// Opaque session identity, assigned at connection time.
pub type SessionId = uuid::Uuid;
