//! Receive-side frame iterator: decodes the sender's body back into object
//! headers, payload byte runs and messages. Used by the sender's dryrun mode
//! (looping its own output back) and by anything that wants to consume a
//! captured or proxied body.

use crate::error::StreamErr;
use crate::io::AsyncRead;
use crate::memsys::MemSys;
use crate::obj::{Msg, ObjHdr};
use crate::proto::{self, FrameFlags, FrameHead, FRAME_HEAD_LEN};
use io_buffer::Buffer;
use std::io;

pub struct RecvIterator<R: AsyncRead> {
    trname: String,
    body: R,
    hbuf: Buffer,
}

impl<R: AsyncRead> RecvIterator<R> {
    pub fn new(trname: &str, body: R, mem: &MemSys, max_header: usize) -> io::Result<Self> {
        Ok(Self { trname: trname.to_string(), body, hbuf: mem.alloc(max_header)? })
    }

    /// Reads the next frame head. `Ok(None)` on a clean EOF at a frame
    /// boundary; an EOF anywhere else is [StreamErr::Truncated].
    pub async fn next_proto_hdr(&mut self) -> Result<Option<(usize, FrameFlags)>, StreamErr> {
        let mut hb = [0u8; FRAME_HEAD_LEN];
        let n = self.body.read(&mut hb).await?;
        if n == 0 {
            return Ok(None);
        }
        if n < FRAME_HEAD_LEN {
            self.body.read_exact(&mut hb[n..]).await.map_err(|_| StreamErr::Truncated)?;
        }
        let (hlen, flags) = FrameHead::decode(&hb)?;
        if hlen > self.hbuf.len() {
            warn!("{}: oversized frame ({} bytes)", self.trname, hlen);
            return Err(StreamErr::HeaderTooBig { max: self.hbuf.len() });
        }
        Ok(Some((hlen, flags)))
    }

    /// Parses an object header of `hlen` bytes. `Ok(None)` for the LAST
    /// beacon — the body ends right after it.
    pub async fn next_obj(
        &mut self, hlen: usize, flags: FrameFlags,
    ) -> Result<Option<ObjHdr>, StreamErr> {
        self.body.read_exact(&mut self.hbuf[..hlen]).await.map_err(|_| StreamErr::Truncated)?;
        let hdr = proto::ext_obj_header(&self.hbuf[..hlen], flags)?;
        if hdr.is_last() {
            return Ok(None);
        }
        Ok(Some(hdr))
    }

    pub async fn next_msg(&mut self, hlen: usize) -> Result<Msg, StreamErr> {
        self.body.read_exact(&mut self.hbuf[..hlen]).await.map_err(|_| StreamErr::Truncated)?;
        Ok(Msg { body: self.hbuf[..hlen].to_vec() })
    }

    /// The payload reader for the object just parsed. Must be fully drained
    /// before the next `next_proto_hdr` call.
    pub fn payload(&mut self, hdr: &ObjHdr, flags: FrameFlags) -> Payload<'_, R> {
        let kind = if flags.intersects(FrameFlags::PDU | FrameFlags::UNSIZED) {
            PayloadKind::Pdu { in_pdu: 0, last_seen: false }
        } else if hdr.is_header_only() {
            PayloadKind::Sized { remaining: 0 }
        } else {
            PayloadKind::Sized { remaining: hdr.attrs.size as u64 }
        };
        Payload { body: &mut self.body, kind }
    }
}

enum PayloadKind {
    Sized { remaining: u64 },
    Pdu { in_pdu: usize, last_seen: bool },
}

/// Bounded (or PDU-reassembling) view over the object payload bytes.
pub struct Payload<'a, R: AsyncRead> {
    body: &'a mut R,
    kind: PayloadKind,
}

impl<R: AsyncRead> Payload<'_, R> {
    async fn read_inner(&mut self, b: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            PayloadKind::Sized { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let want = (b.len() as u64).min(*remaining) as usize;
                let n = self.body.read(&mut b[..want]).await?;
                if n == 0 {
                    return Err(StreamErr::Truncated.into());
                }
                *remaining -= n as u64;
                Ok(n)
            }
            PayloadKind::Pdu { in_pdu, last_seen } => {
                while *in_pdu == 0 {
                    if *last_seen {
                        return Ok(0);
                    }
                    let mut hb = [0u8; FRAME_HEAD_LEN];
                    self.body
                        .read_exact(&mut hb)
                        .await
                        .map_err(|_| io::Error::from(StreamErr::Truncated))?;
                    let (plen, flags) = FrameHead::decode(&hb)?;
                    if !flags.contains(FrameFlags::PDU) {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "expected pdu sub-frame",
                        ));
                    }
                    *last_seen = flags.contains(FrameFlags::PDU_LAST);
                    if plen == 0 && !*last_seen {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "empty non-terminal pdu",
                        ));
                    }
                    *in_pdu = plen;
                }
                let want = b.len().min(*in_pdu);
                let n = self.body.read(&mut b[..want]).await?;
                if n == 0 {
                    return Err(StreamErr::Truncated.into());
                }
                *in_pdu -= n;
                Ok(n)
            }
        }
    }

    /// Consumes the remaining payload, returns the byte count.
    pub async fn drain(&mut self) -> io::Result<u64> {
        let mut scratch = [0u8; 8 * 1024];
        let mut total = 0u64;
        loop {
            let n = self.read_inner(&mut scratch).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
        }
    }

    /// Collects the remaining payload into `out`, returns the byte count.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> io::Result<usize> {
        let mut scratch = [0u8; 8 * 1024];
        let mut total = 0;
        loop {
            let n = self.read_inner(&mut scratch).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&scratch[..n]);
            total += n;
        }
    }
}

impl<R: AsyncRead> AsyncRead for Payload<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> impl std::future::Future<Output = io::Result<usize>> + Send {
        self.read_inner(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::{ObjAttrs, ObjHdr};

    #[tokio::test]
    async fn test_iterate_two_objects() {
        let mut wire = Vec::new();
        let mut buf = vec![0u8; 1024];
        for (name, payload) in [("a", &b"hello"[..]), ("b", &b"world!!"[..])] {
            let hdr = ObjHdr {
                obj_name: name.to_string(),
                attrs: ObjAttrs { size: payload.len() as i64, ..Default::default() },
                ..Default::default()
            };
            let l = proto::ins_obj_header(&mut buf, &hdr, false).expect("ins");
            wire.extend_from_slice(&buf[..l]);
            wire.extend_from_slice(payload);
        }

        let mem = MemSys::new();
        let mut it = RecvIterator::new("t", &wire[..], &mem, 1024).expect("iter");
        let mut names = Vec::new();
        let mut bodies = Vec::new();
        while let Some((hlen, flags)) = it.next_proto_hdr().await.expect("hdr") {
            let hdr = it.next_obj(hlen, flags).await.expect("obj").expect("not last");
            names.push(hdr.obj_name.clone());
            let mut out = Vec::new();
            it.payload(&hdr, flags).read_to_end(&mut out).await.expect("payload");
            bodies.push(out);
        }
        assert_eq!(names, ["a", "b"]);
        assert_eq!(bodies, [b"hello".to_vec(), b"world!!".to_vec()]);
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let mut buf = vec![0u8; 1024];
        let hdr = ObjHdr {
            obj_name: "trunc".to_string(),
            attrs: ObjAttrs { size: 100, ..Default::default() },
            ..Default::default()
        };
        let l = proto::ins_obj_header(&mut buf, &hdr, false).expect("ins");
        let mut wire = buf[..l].to_vec();
        wire.extend_from_slice(&[0u8; 10]); // 90 bytes short

        let mem = MemSys::new();
        let mut it = RecvIterator::new("t", &wire[..], &mem, 1024).expect("iter");
        let (hlen, flags) = it.next_proto_hdr().await.expect("hdr").expect("frame");
        let hdr = it.next_obj(hlen, flags).await.expect("obj").expect("not last");
        let err = it.payload(&hdr, flags).drain().await.expect_err("must truncate");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_msg_routing() {
        let mut buf = vec![0u8; 256];
        let l = proto::ins_msg(&mut buf, &Msg { body: b"rebalance".to_vec() }).expect("ins");
        let wire = buf[..l].to_vec();

        let mem = MemSys::new();
        let mut it = RecvIterator::new("t", &wire[..], &mem, 256).expect("iter");
        let (hlen, flags) = it.next_proto_hdr().await.expect("hdr").expect("frame");
        assert!(flags.contains(FrameFlags::MSG));
        let msg = it.next_msg(hlen).await.expect("msg");
        assert_eq!(msg.body, b"rebalance");
        assert!(it.next_proto_hdr().await.expect("eof").is_none());
    }
}
