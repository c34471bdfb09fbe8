//! # objstream
//!
//! Streaming object transport: a producer enqueues an unbounded sequence of
//! objects (header + payload reader) onto a long-lived [Stream]; a pluggable
//! [Transport] drives the session body byte-by-byte; every object's
//! sent-callback fires exactly once and its reader is closed exactly once.
//!
//! The body is a sequence of self-delimiting frames ([proto]), optionally
//! chunked into PDUs when the payload size is unknown, and optionally
//! wrapped — whole-body — into a single LZ4 frame. The receive side of the
//! framing lives in [recv] and doubles as the sender's dryrun mode.
//!
//! ## Sketch
//!
//! ```no_run
//! use objstream::{Obj, ObjHdr, Stream, StreamArgs, StreamConfig};
//! use std::sync::Arc;
//!
//! # async fn demo(transport: Arc<impl objstream::Transport>) -> Result<(), objstream::StreamErr> {
//! let stream = Stream::new(transport, StreamArgs::new("repl", StreamConfig::default()))?;
//! let payload: objstream::Reader = Box::new(std::io::Cursor::new(vec![0u8; 1024]));
//! let mut hdr = ObjHdr::default();
//! hdr.obj_name = "shard/0001".to_string();
//! hdr.attrs.size = 1024;
//! stream.send(Obj::new(hdr, Some(payload))).await?;
//! stream.fin().await;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate captains_log;

pub mod collector;
pub mod config;
pub mod error;
pub mod io;
pub mod memsys;
pub mod obj;
mod pdu;
pub mod proto;
pub mod recv;
pub mod stats;
pub mod stream;

pub use collector::Collector;
pub use config::{Lz4Config, StreamConfig};
pub use error::{StreamErr, TermReason};
pub use obj::{CmplArg, Obj, ObjHdr, ObjMarks, ObjSentCb, Reader, SharedCmpl};
pub use stats::StatsSnapshot;
pub use stream::{Body, SendBody, Stream, StreamArgs, Transport};
