//! Send-side PDU buffering for payloads of unknown (or chunk-framed) size.
//!
//! The buffer reserves the 8-byte frame head up front; one fill/emit cycle
//! produces `[head(PDU)][bytes]`, and the final cycle carries `PDU_LAST` —
//! possibly with zero payload bytes when the previous PDU filled the buffer
//! exactly.

use crate::obj::Reader;
use crate::proto::{FrameFlags, FrameHead, FRAME_HEAD_LEN};
use io_buffer::Buffer;
use std::io;
use tokio::io::AsyncReadExt;

pub(crate) struct SendPdu {
    buf: Buffer,
    roff: usize,
    woff: usize,
    done: bool,
    last: bool,
    first: bool,
}

impl SendPdu {
    pub fn new(buf: Buffer) -> Self {
        debug_assert!(buf.len() > FRAME_HEAD_LEN);
        Self { buf, roff: 0, woff: FRAME_HEAD_LEN, done: false, last: false, first: true }
    }

    /// Arms the first-PDU flag for the next object.
    pub fn start_obj(&mut self) {
        debug_assert!(!self.done && self.woff == FRAME_HEAD_LEN);
        self.first = true;
        self.last = false;
    }

    /// One fill step from the object reader. `done` once the buffer is full
    /// or the reader hit EOF; EOF also marks this PDU as the last one.
    pub async fn read_from(&mut self, r: &mut Reader) -> io::Result<()> {
        let n = r.read(&mut self.buf[self.woff..]).await?;
        if n == 0 {
            self.last = true;
            self.done = true;
            return Ok(());
        }
        self.woff += n;
        if self.woff == self.buf.len() {
            self.done = true;
        }
        Ok(())
    }

    /// Writes the PDU head into the reserved prefix and opens the buffer for
    /// draining.
    pub fn insert_head(&mut self) {
        debug_assert!(self.done);
        let mut flags = FrameFlags::PDU;
        if self.first {
            flags |= FrameFlags::PDU_FIRST;
        }
        if self.last {
            flags |= FrameFlags::PDU_LAST;
        }
        FrameHead::new(flags, self.slength() as u32).encode_into(&mut self.buf);
        self.first = false;
        self.roff = 0;
    }

    /// Copies head+payload out; returns the bytes copied.
    pub fn read(&mut self, b: &mut [u8]) -> usize {
        let n = b.len().min(self.woff - self.roff);
        b[..n].copy_from_slice(&self.buf[self.roff..self.roff + n]);
        self.roff += n;
        n
    }

    /// Bytes still to drain (head included).
    #[inline]
    pub fn rlength(&self) -> usize {
        self.woff - self.roff
    }

    /// Payload bytes of this PDU.
    #[inline]
    pub fn slength(&self) -> usize {
        self.woff - FRAME_HEAD_LEN
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Rewinds for the next fill cycle.
    pub fn reset(&mut self) {
        self.roff = 0;
        self.woff = FRAME_HEAD_LEN;
        self.done = false;
        self.last = false;
    }
}
