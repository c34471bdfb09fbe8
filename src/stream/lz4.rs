//! LZ4 adapter: wraps the plain body as a compressing reader. The whole
//! request body becomes a single LZ4 frame; plaintext flows through the
//! encoder into an SGL, and the transport drains compressed bytes out of it.

use crate::config::Lz4Config;
use crate::error::StreamErr;
use crate::memsys::{lock_sgl, Sgl, SglSink};
use crate::stream::body::SendBody;
use lz4::{BlockSize, ContentChecksum, Encoder, EncoderBuilder};
use std::io::{self, Write};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// Compression state owned by the send-loop task; survives across requests,
/// freed exactly once at terminate.
pub(crate) struct Lz4Half {
    sgl: Arc<Mutex<Sgl>>,
    zw: Option<Encoder<SglSink>>,
    block_max_size: usize,
    frame_checksum: bool,
}

fn block_size_of(max: usize) -> BlockSize {
    if max <= 64 * 1024 {
        BlockSize::Max64KB
    } else if max <= 256 * 1024 {
        BlockSize::Max256KB
    } else if max <= 1024 * 1024 {
        BlockSize::Max1MB
    } else {
        BlockSize::Max4MB
    }
}

impl Lz4Half {
    pub fn new(sgl: Sgl, cfg: &Lz4Config) -> Self {
        Self {
            sgl: Arc::new(Mutex::new(sgl)),
            zw: None,
            block_max_size: cfg.block_max_size,
            frame_checksum: cfg.frame_checksum,
        }
    }

    /// Per-request: rewind the SGL and open a fresh frame over it.
    /// Block checksums stay off; the frame checksum follows the config.
    pub fn reset(&mut self) -> Result<(), StreamErr> {
        if let Some(zw) = self.zw.take() {
            let (_, r) = zw.finish();
            if let Err(e) = r {
                warn!("lz4 finish on reset: {}", e);
            }
        }
        lock_sgl(&self.sgl).reset();
        let checksum = if self.frame_checksum {
            ContentChecksum::ChecksumEnabled
        } else {
            ContentChecksum::NoChecksum
        };
        let zw = EncoderBuilder::new()
            .block_size(block_size_of(self.block_max_size))
            .checksum(checksum)
            .build(SglSink::new(self.sgl.clone()))
            .map_err(StreamErr::from)?;
        self.zw = Some(zw);
        Ok(())
    }

    #[inline]
    pub fn buffered(&self) -> usize {
        lock_sgl(&self.sgl).len()
    }

    /// Copies compressed bytes out; rewinds the SGL once fully drained so the
    /// slabs get reused.
    pub fn drain(&self, b: &mut [u8]) -> usize {
        let mut sgl = lock_sgl(&self.sgl);
        let n = sgl.read(b);
        if sgl.is_empty() {
            sgl.reset();
        }
        n
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.zw.as_mut() {
            Some(zw) => zw.write_all(buf),
            None => Ok(()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.zw.as_mut() {
            Some(zw) => zw.flush(),
            None => Ok(()),
        }
    }

    /// Ends the frame (end mark into the SGL). The remainder must still be
    /// drained afterwards.
    pub fn finish(&mut self) {
        if let Some(zw) = self.zw.take() {
            let (_, r) = zw.finish();
            if let Err(e) = r {
                warn!("lz4 finish: {}", e);
            }
        }
    }

    /// Terminate-time release of the compression buffers.
    pub fn free(&mut self) {
        self.zw = None;
        lock_sgl(&self.sgl).free();
    }
}

/// Compressing body: everything the plain body produces, inside one LZ4
/// frame.
pub struct Lz4Body {
    sb: SendBody,
    done: bool,
}

impl Lz4Body {
    pub(crate) fn new(sb: SendBody) -> Self {
        Self { sb, done: false }
    }

    pub(crate) async fn read_lz4(&mut self, b: &mut [u8]) -> io::Result<usize> {
        let inner = self.sb.inner.clone();
        let Some(lz4) = inner.lz4_mut().as_mut() else {
            return Err(io::Error::other("lz4 state already freed"));
        };
        if lz4.buffered() > 0 {
            lz4.flush()?;
            let n = lz4.drain(b);
            inner.stats.compressed_size.fetch_add(n as i64, Ordering::Relaxed);
            return Ok(n);
        }
        // insist on returning n > 0 (lz4 compresses whole blocks)
        let mut retry = 64;
        loop {
            if self.done {
                lz4.finish();
                let n = lz4.drain(b);
                if n > 0 {
                    inner.stats.compressed_size.fetch_add(n as i64, Ordering::Relaxed);
                    return Ok(n);
                }
                return Ok(0);
            }
            let n = self.sb.read_inner(b).await?;
            if n == 0 {
                self.done = true;
                lz4.flush()?;
                continue;
            }
            lz4.write_all(&b[..n])?;
            if self.sb.at_eob() {
                // object boundary: push the partial block out
                lz4.flush()?;
            }
            let drained = lz4.drain(b);
            if drained > 0 {
                inner.stats.compressed_size.fetch_add(drained as i64, Ordering::Relaxed);
                return Ok(drained);
            }
            retry -= 1;
            if retry == 0 {
                lz4.flush()?;
                retry = 64;
            }
            tokio::task::yield_now().await;
        }
    }
}
