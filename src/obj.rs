//! The unit of transmission: object header, payload reader, completion hooks.

use crate::error::StreamErr;
use bitflags::bitflags;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Payload source for one object. Dropping the box is what closes it; the
/// completion path does that exactly once per object.
pub type Reader = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Opaque per-object context handed back to the sent-callback.
pub type CmplArg = Box<dyn Any + Send>;

/// Invoked exactly once per object after it was transmitted (or failed).
///
/// The reader argument is the original enqueued reader, passed for user-side
/// bookkeeping; the callback cannot close it — the completion code does that
/// right after the callback returns.
pub type ObjSentCb =
    Arc<dyn Fn(&ObjHdr, Option<&mut Reader>, Option<&mut CmplArg>, Option<&StreamErr>) + Send + Sync>;

bitflags! {
    /// In-band signals, kept out of the size field. `LAST` and `UNSIZED` are
    /// carried on the wire in the frame flags; `TICK` never leaves the sender.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjMarks: u8 {
        const LAST = 1 << 0;
        const TICK = 1 << 1;
        const UNSIZED = 1 << 2;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ns {
    pub name: String,
    pub uuid: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bck {
    pub name: String,
    pub provider: String,
    pub ns: Ns,
}

impl fmt::Display for Bck {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.provider.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.provider, self.name)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjAttrs {
    /// Payload size in bytes. Zero for header-only and unsized objects; the
    /// `UNSIZED` mark tells those two apart.
    pub size: i64,
    pub atime: i64,
    pub cksum_type: String,
    pub cksum_value: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjHdr {
    pub bck: Bck,
    pub obj_name: String,
    /// Application blob carried opaquely.
    pub opaque: Vec<u8>,
    pub attrs: ObjAttrs,
    pub marks: ObjMarks,
}

/// Source of object attributes when the header is built from stored metadata.
pub trait ObjMeta {
    fn size(&self) -> i64;
    fn atime_unix(&self) -> i64;
    fn cksum(&self) -> Option<(String, String)>;
    fn version(&self) -> String;
}

impl ObjHdr {
    #[inline]
    pub fn is_last(&self) -> bool {
        self.marks.contains(ObjMarks::LAST)
    }

    #[inline]
    pub fn is_unsized(&self) -> bool {
        self.marks.contains(ObjMarks::UNSIZED)
    }

    /// True for objects that carry no payload bytes. An unsized object also
    /// stores size zero, so the mark must be consulted here.
    #[inline]
    pub fn is_header_only(&self) -> bool {
        (self.attrs.size == 0 && !self.is_unsized()) || self.is_last()
    }

    pub fn from_meta(meta: &dyn ObjMeta, obj_name: &str, bck: Bck, opaque: Vec<u8>) -> Self {
        let mut attrs = ObjAttrs {
            size: meta.size(),
            atime: meta.atime_unix(),
            version: meta.version(),
            ..Default::default()
        };
        if let Some((ty, val)) = meta.cksum() {
            attrs.cksum_type = ty;
            attrs.cksum_value = val;
        }
        Self { bck, obj_name: obj_name.to_string(), opaque, attrs, marks: ObjMarks::empty() }
    }
}

/// One unit of transmission.
pub struct Obj {
    pub hdr: ObjHdr,
    pub reader: Option<Reader>,
    /// Per-object callback; overrides the stream-level one.
    pub callback: Option<ObjSentCb>,
    pub cmpl_arg: Option<CmplArg>,
    pub(crate) prc: Option<Arc<SharedCmpl>>,
}

impl Obj {
    pub fn new(hdr: ObjHdr, reader: Option<Reader>) -> Self {
        Self { hdr, reader, callback: None, cmpl_arg: None, prc: None }
    }

    /// Attach a multi-stream completion handle (see [SharedCmpl]).
    pub fn set_prc(&mut self, prc: Arc<SharedCmpl>) {
        self.prc = Some(prc);
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.hdr.is_last()
    }

    #[inline]
    pub fn is_idle_tick(&self) -> bool {
        self.hdr.marks.contains(ObjMarks::TICK)
    }

    #[inline]
    pub fn is_header_only(&self) -> bool {
        self.hdr.is_header_only()
    }

    #[inline]
    pub fn is_unsized(&self) -> bool {
        self.hdr.is_unsized()
    }

    pub(crate) fn last_marker() -> Self {
        Self::new(ObjHdr { marks: ObjMarks::LAST, ..Default::default() }, None)
    }

    pub(crate) fn tick() -> Self {
        Self::new(ObjHdr { marks: ObjMarks::TICK, ..Default::default() }, None)
    }
}

impl fmt::Display for Obj {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sobj-{}/{}", self.hdr.bck, self.hdr.obj_name)?;
        if !self.is_header_only() {
            write!(f, "(size={})", self.hdr.attrs.size)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Shared completion handle for one object sent on N streams.
///
/// Each stream's completion decrements the counter and the callback fires
/// exactly once, on the decrement that reaches zero, carrying the first
/// non-nil error any stream observed.
pub struct SharedCmpl {
    pending: AtomicI64,
    err: Mutex<Option<StreamErr>>,
}

impl SharedCmpl {
    pub fn new(n: i64) -> Arc<Self> {
        Arc::new(Self { pending: AtomicI64::new(n), err: Mutex::new(None) })
    }

    pub(crate) fn record(&self, err: &StreamErr) {
        let mut slot = match self.err.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(err.clone());
        }
    }

    /// True on the decrement that retires the last reference.
    pub(crate) fn complete(&self) -> bool {
        let left = self.pending.fetch_sub(1, Ordering::SeqCst) - 1;
        debug_assert!(left >= 0);
        left == 0
    }

    pub(crate) fn first_err(&self) -> Option<StreamErr> {
        match self.err.lock() {
            Ok(g) => g.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

/// A control message riding the same body as object frames; carries no
/// payload and is routed to the application message handler on the peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Msg {
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Meta;

    impl ObjMeta for Meta {
        fn size(&self) -> i64 {
            4096
        }
        fn atime_unix(&self) -> i64 {
            1_589_000_000
        }
        fn cksum(&self) -> Option<(String, String)> {
            Some(("xxhash".to_string(), "feed".to_string()))
        }
        fn version(&self) -> String {
            "7".to_string()
        }
    }

    #[test]
    fn test_from_meta() {
        let bck = Bck { name: "b1".to_string(), ..Default::default() };
        let hdr = ObjHdr::from_meta(&Meta, "x/y", bck, vec![3]);
        assert_eq!(hdr.attrs.size, 4096);
        assert_eq!(hdr.attrs.cksum_type, "xxhash");
        assert_eq!(hdr.attrs.version, "7");
        assert!(!hdr.is_header_only());
        let obj = Obj::new(hdr, None);
        assert_eq!(format!("{}", obj), "sobj-b1/x/y(size=4096)");
    }

    #[test]
    fn test_header_only_predicates() {
        let mut hdr = ObjHdr::default();
        assert!(hdr.is_header_only());
        hdr.marks = ObjMarks::UNSIZED;
        assert!(!hdr.is_header_only());
        hdr.marks = ObjMarks::LAST;
        assert!(hdr.is_header_only());
        assert!(hdr.is_last());
    }

    #[test]
    fn test_shared_cmpl_first_error() {
        let prc = SharedCmpl::new(3);
        assert!(!prc.complete());
        prc.record(&StreamErr::Stopped);
        prc.record(&StreamErr::BadMagic); // later errors are ignored
        assert!(!prc.complete());
        assert!(prc.complete());
        assert_eq!(prc.first_err(), Some(StreamErr::Stopped));
    }
}
