//! The send side: stream core, request-body state machine, LZ4 adapter.

pub(crate) mod base;
mod body;
mod lz4;

pub use base::{Stream, StreamArgs, Transport};
pub use body::{Body, SendBody};
pub use lz4::Lz4Body;
