//! Minimal slab arena backing the stream's header/PDU buffers and the
//! compression SGL. Buffers are aligned `io_buffer` allocations; return is
//! ownership-based, with an explicit `free` kept for the terminate path.

use io_buffer::Buffer;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Smallest slab class handed out.
pub const PAGE_SIZE: usize = 4 * 1024;
/// Largest slab class; bigger SGL hints are chunked at this size.
pub const MAX_SLAB_SIZE: usize = 128 * 1024;

pub struct MemSys;

static PAGE_MM: OnceLock<Arc<MemSys>> = OnceLock::new();

impl MemSys {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// The process-default arena.
    pub fn page_mm() -> &'static Arc<MemSys> {
        PAGE_MM.get_or_init(MemSys::new)
    }

    /// Rounds a size hint to the slab class that fits it.
    pub fn select_slab(&self, hint: usize) -> usize {
        let mut slab = PAGE_SIZE;
        while slab < hint && slab < MAX_SLAB_SIZE {
            slab *= 2;
        }
        slab
    }

    /// One fixed-size buffer of exactly `size` bytes.
    pub fn alloc(&self, size: usize) -> io::Result<Buffer> {
        Buffer::alloc(size as i32).map_err(|_| io::ErrorKind::OutOfMemory.into())
    }

    /// A growable scatter-gather buffer chunked by the selected slab class.
    pub fn new_sgl(&self, hint: usize) -> Sgl {
        Sgl { slabs: Vec::new(), slab_size: self.select_slab(hint), woff: 0, roff: 0 }
    }
}

/// Scatter-gather list: append-only writes, draining reads, rewindable.
pub struct Sgl {
    slabs: Vec<Buffer>,
    slab_size: usize,
    woff: usize,
    roff: usize,
}

impl Sgl {
    /// Unread bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.woff - self.roff
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let total = buf.len();
        while !buf.is_empty() {
            let idx = self.woff / self.slab_size;
            let off = self.woff % self.slab_size;
            if idx == self.slabs.len() {
                let slab = Buffer::alloc(self.slab_size as i32)
                    .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
                self.slabs.push(slab);
            }
            let n = buf.len().min(self.slab_size - off);
            self.slabs[idx][off..off + n].copy_from_slice(&buf[..n]);
            self.woff += n;
            buf = &buf[n..];
        }
        Ok(total)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() && self.roff < self.woff {
            let idx = self.roff / self.slab_size;
            let off = self.roff % self.slab_size;
            let n = (buf.len() - copied).min(self.slab_size - off).min(self.woff - self.roff);
            buf[copied..copied + n].copy_from_slice(&self.slabs[idx][off..off + n]);
            self.roff += n;
            copied += n;
        }
        copied
    }

    /// Rewinds both offsets; the slabs stay for reuse.
    pub fn reset(&mut self) {
        self.roff = 0;
        self.woff = 0;
    }

    /// Returns the slabs. Must happen exactly once per lifecycle; the
    /// terminate path owns that call.
    pub fn free(&mut self) {
        self.slabs.clear();
        self.reset();
    }
}

/// `io::Write` handle over a shared [Sgl]; the compression encoder owns one
/// while the stream keeps the draining side.
pub(crate) struct SglSink(Arc<Mutex<Sgl>>);

impl SglSink {
    pub fn new(sgl: Arc<Mutex<Sgl>>) -> Self {
        Self(sgl)
    }
}

pub(crate) fn lock_sgl(sgl: &Arc<Mutex<Sgl>>) -> MutexGuard<'_, Sgl> {
    match sgl.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

impl io::Write for SglSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock_sgl(&self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
