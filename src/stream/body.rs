//! The request-body reader: one of these is created per transport request,
//! and the transport pulls it to EOF. It owns the per-object state machine
//! (`Eob -> Hdr -> Data|Pdu -> Eob`), posts completions at end-of-object, and
//! turns the in-band idle tick and the stop signal into body EOF.

use crate::error::StreamErr;
use crate::io::{AsyncRead, Cancellable};
use crate::obj::Obj;
use crate::stream::base::StreamInner;
use crate::stream::lz4::Lz4Body;
use std::future::Future;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Ins {
    #[default]
    Eob,
    Hdr,
    Data,
    Pdu,
}

#[derive(Default)]
pub(crate) struct Sendoff {
    pub obj: Option<Obj>,
    pub off: i64,
    pub ins: Ins,
}

/// The body handed to [Transport::do_request](crate::stream::Transport):
/// plain frames, or the same frames inside one LZ4 frame.
pub enum Body {
    Plain(SendBody),
    Lz4(Lz4Body),
}

impl Body {
    pub(crate) fn new(inner: Arc<StreamInner>) -> Result<Self, StreamErr> {
        if inner.compressed() {
            if let Some(lz4) = inner.lz4_mut() {
                lz4.reset()?;
            }
            Ok(Body::Lz4(Lz4Body::new(SendBody::new(inner))))
        } else {
            Ok(Body::Plain(SendBody::new(inner)))
        }
    }
}

impl AsyncRead for Body {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        async move {
            match self {
                Body::Plain(b) => b.read_inner(buf).await,
                Body::Lz4(b) => b.read_lz4(buf).await,
            }
        }
    }
}

/// Uncompressed body over one stream. Exactly one task reads it.
pub struct SendBody {
    pub(crate) inner: Arc<StreamInner>,
    eof: bool,
}

impl SendBody {
    pub(crate) fn new(inner: Arc<StreamInner>) -> Self {
        Self { inner, eof: false }
    }

    /// True between objects; the LZ4 adapter flushes at this boundary.
    pub(crate) fn at_eob(&self) -> bool {
        self.inner.sendoff_mut().ins == Ins::Eob
    }

    pub(crate) async fn read_inner(&mut self, b: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.clone();
        // for the collector to delay the idle tick
        inner.in_send.store(true, Ordering::Relaxed);
        if self.eof {
            return Ok(0);
        }
        loop {
            match inner.sendoff_mut().ins {
                Ins::Hdr => return self.send_hdr(b),
                Ins::Data => {
                    let header_only = {
                        let sendoff = inner.sendoff_mut();
                        match sendoff.obj.as_ref() {
                            Some(obj) => {
                                debug_assert!(!obj.is_last());
                                obj.is_header_only()
                            }
                            None => {
                                *sendoff = Sendoff::default();
                                continue;
                            }
                        }
                    };
                    if header_only {
                        inner.eo_obj(None);
                        continue;
                    }
                    match self.send_data(b).await? {
                        0 => continue,
                        n => return Ok(n),
                    }
                }
                Ins::Pdu => return self.send_pdu(b).await,
                Ins::Eob => {}
            }

            // between objects: stop, the next object, or the idle tick
            if inner.stopped() {
                let cur_num = inner.cur_mut().num;
                let num = inner.stats.num.load(Ordering::Relaxed);
                logger_info!(inner.logger, "{:?} stopped ({}/{})", inner, cur_num, num);
                self.eof = true;
                return Ok(0);
            }
            let Some(rx) = inner.work_rx_ref() else {
                return Err(io::Error::other(format!("{:?} closed prior to stopping", inner)));
            };
            match Cancellable::new(rx.recv(), inner.stop_rx().recv()).await {
                Ok(Ok(obj)) => {
                    inner.work_len.fetch_sub(1, Ordering::SeqCst);
                    if obj.is_idle_tick() {
                        if inner.work_len.load(Ordering::SeqCst) > 0 {
                            continue;
                        }
                        return self.deactivate();
                    }
                    inner.insert_obj_header(&obj).map_err(io::Error::from)?;
                    let sendoff = inner.sendoff_mut();
                    sendoff.obj = Some(obj);
                    sendoff.off = 0;
                    sendoff.ins = Ins::Hdr;
                    return self.send_hdr(b);
                }
                Ok(Err(_)) => {
                    let err = format!("{:?} closed prior to stopping", inner);
                    logger_debug!(inner.logger, "{}", err);
                    return Err(io::Error::other(err));
                }
                Err(()) => {
                    let cur_num = inner.cur_mut().num;
                    let num = inner.stats.num.load(Ordering::Relaxed);
                    logger_info!(inner.logger, "{:?} stopped ({}/{})", inner, cur_num, num);
                    self.eof = true;
                    return Ok(0);
                }
            }
        }
    }

    fn send_hdr(&mut self, b: &mut [u8]) -> io::Result<usize> {
        let inner = &self.inner;
        let sendoff = inner.sendoff_mut();
        let hb = inner.hdr_mut();
        let Some(buf) = hb.buf.as_ref() else {
            return Err(io::Error::other("header slab already freed"));
        };
        let off = sendoff.off as usize;
        let n = b.len().min(hb.len - off);
        b[..n].copy_from_slice(&buf[off..off + n]);
        sendoff.off += n as i64;
        if (sendoff.off as usize) < hb.len {
            return Ok(n);
        }
        debug_assert_eq!(sendoff.off as usize, hb.len);
        inner.stats.offset.fetch_add(sendoff.off, Ordering::Relaxed);
        logger_trace!(inner.logger, "{:?} hlen={}", inner, hb.len);
        let (is_last, header_only) = match sendoff.obj.as_ref() {
            Some(obj) => (obj.is_last(), obj.is_header_only()),
            None => (false, true),
        };
        sendoff.ins = if inner.use_pdu() && !header_only { Ins::Pdu } else { Ins::Data };
        sendoff.off = 0;
        if sendoff.ins == Ins::Pdu {
            if let Some(pdu) = inner.pdu_mut().as_mut() {
                pdu.start_obj();
            }
        }
        if is_last {
            logger_trace!(inner.logger, "{:?} sent last", inner);
            inner.close_last_ch();
            self.eof = true;
        }
        Ok(n)
    }

    /// Returns `Ok(0)` only when the state advanced without producing bytes
    /// (reader EOF exactly at the object boundary); the caller loops.
    async fn send_data(&mut self, b: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.clone();
        let sendoff = inner.sendoff_mut();
        if sendoff.obj.is_none() {
            *sendoff = Sendoff::default();
            return Ok(0);
        }
        let obj = sendoff.obj.as_mut().unwrap();
        let obj_size = obj.hdr.attrs.size;
        if obj.reader.is_none() {
            let err = StreamErr::ShortRead { read: 0, size: obj_size };
            inner.eo_obj(Some(err.clone()));
            return Err(err.into());
        }
        let reader = obj.reader.as_mut().unwrap();
        match reader.read(b).await {
            Err(e) => {
                let err = StreamErr::from(e);
                inner.eo_obj(Some(err.clone()));
                Err(err.into())
            }
            Ok(0) => {
                if sendoff.off < obj_size {
                    let err = StreamErr::ShortRead { read: sendoff.off, size: obj_size };
                    inner.eo_obj(Some(err.clone()));
                    return Err(err.into());
                }
                inner.eo_obj(None);
                Ok(0)
            }
            Ok(n) => {
                sendoff.off += n as i64;
                if sendoff.off >= obj_size {
                    inner.eo_obj(None);
                }
                Ok(n)
            }
        }
    }

    async fn send_pdu(&mut self, b: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.clone();
        let sendoff = inner.sendoff_mut();
        let Some(pdu) = inner.pdu_mut().as_mut() else {
            return Err(io::Error::other("pdu buffer already freed"));
        };
        if !pdu.is_done() {
            if sendoff.obj.is_none() {
                *sendoff = Sendoff::default();
                return Ok(0);
            }
            let obj = sendoff.obj.as_mut().unwrap();
            if obj.reader.is_none() {
                let err = StreamErr::ShortRead { read: 0, size: 0 };
                inner.eo_obj(Some(err.clone()));
                return Err(err.into());
            }
            let reader = obj.reader.as_mut().unwrap();
            while !pdu.is_done() {
                if let Err(e) = pdu.read_from(reader).await {
                    let err = StreamErr::from(e);
                    inner.eo_obj(Some(err.clone()));
                    return Err(err.into());
                }
            }
            pdu.insert_head();
        }
        let mut n = 0;
        if pdu.rlength() > 0 {
            n = pdu.read(b);
            if pdu.rlength() == 0 {
                sendoff.off += pdu.slength() as i64;
                let was_last = pdu.is_last();
                pdu.reset();
                if was_last {
                    // the terminal (possibly empty) pdu is fully on the wire
                    inner.eo_obj(None);
                }
            }
        }
        Ok(n)
    }

    fn deactivate(&mut self) -> io::Result<usize> {
        let inner = &self.inner;
        let cur_num = inner.cur_mut().num;
        let num = inner.stats.num.load(Ordering::Relaxed);
        logger_info!(inner.logger, "{:?} connection teardown ({}/{})", inner, cur_num, num);
        self.eof = true;
        Ok(0)
    }
}

impl AsyncRead for SendBody {
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        self.read_inner(buf)
    }
}
