//! Wire framing.
//!
//! Every frame on the body is `[frame-head][hdr-body][payload?]`. The head is
//! a fixed 8-byte struct; the hdr-body is a hand-framed, little-endian object
//! header (or a message blob when the `MSG` flag is set). Payload framing is
//! either a known-length byte run or, when the `PDU` flag is set, a chain of
//! `[frame-head(PDU)][bytes]` sub-frames ending with `PDU_LAST`.
//!
//! This layout is a compatibility surface: both sides of a connection must
//! agree byte-for-byte.

use crate::error::StreamErr;
use crate::obj::{Bck, Msg, Ns, ObjAttrs, ObjHdr, ObjMarks};
use bitflags::bitflags;
use std::mem::size_of;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

pub const STREAM_MAGIC: [u8; 2] = [b'%', b'S'];
pub const PROTO_VERSION: u8 = 1;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// Message frame: hdr-body is an application blob, no payload follows.
        const MSG = 1 << 0;
        /// Stream termination beacon; the body ends right after this frame.
        const LAST = 1 << 1;
        /// Payload size unknown a priori; implies PDU framing.
        const UNSIZED = 1 << 2;
        /// On an object frame: the payload is a PDU chain.
        /// On a sub-frame head: this head delimits one PDU.
        const PDU = 1 << 3;
        const PDU_FIRST = 1 << 4;
        const PDU_LAST = 1 << 5;
    }
}

/// Frame head:
///
/// | 2B    | 1B  | 1B    | 4B   |
/// | magic | ver | flags | hlen |
///
/// `hlen` is the length of the hdr-body that follows (for object and message
/// frames), or the PDU payload length (for PDU sub-frame heads).
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, PartialEq, Clone, Copy)]
#[repr(packed)]
pub struct FrameHead {
    pub magic: [u8; 2],
    pub ver: u8,
    pub flags: u8,
    pub hlen: U32<LittleEndian>,
}

pub const FRAME_HEAD_LEN: usize = size_of::<FrameHead>();

impl FrameHead {
    #[inline]
    pub fn new(flags: FrameFlags, hlen: u32) -> Self {
        Self { magic: STREAM_MAGIC, ver: PROTO_VERSION, flags: flags.bits(), hlen: U32::new(hlen) }
    }

    /// Validates magic and version, returns `(hlen, flags)`.
    #[inline]
    pub fn decode(buf: &[u8]) -> Result<(usize, FrameFlags), StreamErr> {
        let Some(head) = Self::ref_from(buf.get(..FRAME_HEAD_LEN).ok_or(StreamErr::Truncated)?)
        else {
            return Err(StreamErr::Truncated);
        };
        if head.magic != STREAM_MAGIC {
            warn!("wrong frame magic received: {:?}", head.magic);
            return Err(StreamErr::BadMagic);
        }
        if head.ver != PROTO_VERSION {
            warn!("frame version {} not supported", head.ver);
            return Err(StreamErr::Version(head.ver));
        }
        Ok((head.hlen.get() as usize, FrameFlags::from_bits_truncate(head.flags)))
    }

    #[inline]
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[..FRAME_HEAD_LEN].copy_from_slice(self.as_bytes());
    }
}

#[inline]
fn ins_str(off: usize, buf: &mut [u8], s: &str) -> Result<usize, StreamErr> {
    let b = s.as_bytes();
    if b.len() > u16::MAX as usize || off + 2 + b.len() > buf.len() {
        return Err(StreamErr::HeaderTooBig { max: buf.len() });
    }
    buf[off..off + 2].copy_from_slice(&(b.len() as u16).to_le_bytes());
    buf[off + 2..off + 2 + b.len()].copy_from_slice(b);
    Ok(off + 2 + b.len())
}

#[inline]
fn ins_bytes(off: usize, buf: &mut [u8], b: &[u8]) -> Result<usize, StreamErr> {
    if off + 4 + b.len() > buf.len() {
        return Err(StreamErr::HeaderTooBig { max: buf.len() });
    }
    buf[off..off + 4].copy_from_slice(&(b.len() as u32).to_le_bytes());
    buf[off + 4..off + 4 + b.len()].copy_from_slice(b);
    Ok(off + 4 + b.len())
}

#[inline]
fn ins_i64(off: usize, buf: &mut [u8], v: i64) -> Result<usize, StreamErr> {
    if off + 8 > buf.len() {
        return Err(StreamErr::HeaderTooBig { max: buf.len() });
    }
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    Ok(off + 8)
}

#[inline]
fn ext_str(off: usize, buf: &[u8]) -> Result<(String, usize), StreamErr> {
    if off + 2 > buf.len() {
        return Err(StreamErr::Truncated);
    }
    let l = u16::from_le_bytes([buf[off], buf[off + 1]]) as usize;
    if off + 2 + l > buf.len() {
        return Err(StreamErr::Truncated);
    }
    let s = std::str::from_utf8(&buf[off + 2..off + 2 + l]).map_err(|_| StreamErr::Truncated)?;
    Ok((s.to_string(), off + 2 + l))
}

#[inline]
fn ext_bytes(off: usize, buf: &[u8]) -> Result<(Vec<u8>, usize), StreamErr> {
    if off + 4 > buf.len() {
        return Err(StreamErr::Truncated);
    }
    let l = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]) as usize;
    if off + 4 + l > buf.len() {
        return Err(StreamErr::Truncated);
    }
    Ok((buf[off + 4..off + 4 + l].to_vec(), off + 4 + l))
}

#[inline]
fn ext_i64(off: usize, buf: &[u8]) -> Result<(i64, usize), StreamErr> {
    if off + 8 > buf.len() {
        return Err(StreamErr::Truncated);
    }
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    Ok((i64::from_le_bytes(b), off + 8))
}

/// Serializes `hdr` (frame head included) into `buf`, returns bytes written.
/// `buf` must be the stream's header slab; overflow is a framing error.
pub fn ins_obj_header(buf: &mut [u8], hdr: &ObjHdr, use_pdu: bool) -> Result<usize, StreamErr> {
    debug_assert!(!hdr.marks.contains(ObjMarks::TICK));
    let mut flags = FrameFlags::empty();
    if hdr.is_last() {
        flags |= FrameFlags::LAST;
    }
    if hdr.is_unsized() {
        flags |= FrameFlags::UNSIZED;
    }
    if use_pdu && !hdr.is_header_only() {
        flags |= FrameFlags::PDU;
    }
    let mut off = FRAME_HEAD_LEN;
    off = ins_str(off, buf, &hdr.bck.name)?;
    off = ins_str(off, buf, &hdr.obj_name)?;
    off = ins_str(off, buf, &hdr.bck.provider)?;
    off = ins_str(off, buf, &hdr.bck.ns.name)?;
    off = ins_str(off, buf, &hdr.bck.ns.uuid)?;
    off = ins_bytes(off, buf, &hdr.opaque)?;
    off = ins_i64(off, buf, hdr.attrs.size)?;
    off = ins_i64(off, buf, hdr.attrs.atime)?;
    off = ins_str(off, buf, &hdr.attrs.version)?;
    off = ins_str(off, buf, &hdr.attrs.cksum_type)?;
    off = ins_str(off, buf, &hdr.attrs.cksum_value)?;
    FrameHead::new(flags, (off - FRAME_HEAD_LEN) as u32).encode_into(buf);
    Ok(off)
}

/// Parses an object hdr-body of exactly `buf.len()` bytes. Marks are
/// reconstructed from the frame `flags`.
pub fn ext_obj_header(buf: &[u8], flags: FrameFlags) -> Result<ObjHdr, StreamErr> {
    let (bck_name, off) = ext_str(0, buf)?;
    let (obj_name, off) = ext_str(off, buf)?;
    let (provider, off) = ext_str(off, buf)?;
    let (ns_name, off) = ext_str(off, buf)?;
    let (ns_uuid, off) = ext_str(off, buf)?;
    let (opaque, off) = ext_bytes(off, buf)?;
    let (size, off) = ext_i64(off, buf)?;
    let (atime, off) = ext_i64(off, buf)?;
    let (version, off) = ext_str(off, buf)?;
    let (cksum_type, off) = ext_str(off, buf)?;
    let (cksum_value, off) = ext_str(off, buf)?;
    if off != buf.len() {
        return Err(StreamErr::Truncated);
    }
    let mut marks = ObjMarks::empty();
    if flags.contains(FrameFlags::LAST) {
        marks |= ObjMarks::LAST;
    }
    if flags.contains(FrameFlags::UNSIZED) {
        marks |= ObjMarks::UNSIZED;
    }
    Ok(ObjHdr {
        bck: Bck { name: bck_name, provider, ns: Ns { name: ns_name, uuid: ns_uuid } },
        obj_name,
        opaque,
        attrs: ObjAttrs { size, atime, cksum_type, cksum_value, version },
        marks,
    })
}

/// Serializes a message frame (head + blob, no payload) into `buf`.
pub fn ins_msg(buf: &mut [u8], msg: &Msg) -> Result<usize, StreamErr> {
    let off = FRAME_HEAD_LEN + msg.body.len();
    if off > buf.len() {
        return Err(StreamErr::HeaderTooBig { max: buf.len() });
    }
    FrameHead::new(FrameFlags::MSG, msg.body.len() as u32).encode_into(buf);
    buf[FRAME_HEAD_LEN..off].copy_from_slice(&msg.body);
    Ok(off)
}
