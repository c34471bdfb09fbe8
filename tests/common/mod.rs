#![allow(dead_code)]

use crossfire::*;
use log::Level;
use objstream::io::AsyncRead;
use objstream::memsys::MemSys;
use objstream::proto::FrameFlags;
use objstream::recv::RecvIterator;
use objstream::{Body, Obj, ObjHdr, Reader, StreamErr, Transport};
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

pub fn setup() {
    let _ = captains_log::recipe::raw_file_logger("/tmp", Level::Trace)
        .test()
        .build();
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

/// Payload reader that counts how many times it was closed (dropped).
pub struct TrackReader {
    cur: Cursor<Vec<u8>>,
    closed: Arc<AtomicUsize>,
}

impl TrackReader {
    pub fn new(data: Vec<u8>, closed: Arc<AtomicUsize>) -> Self {
        Self { cur: Cursor::new(data), closed }
    }
}

impl tokio::io::AsyncRead for TrackReader {
    fn poll_read(
        mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.cur).poll_read(cx, buf)
    }
}

impl Drop for TrackReader {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub type CbEvent = (String, Option<StreamErr>);

/// A sent-callback that reports every completion into a channel.
pub fn counting_cb() -> (objstream::ObjSentCb, MAsyncRx<CbEvent>) {
    let (tx, rx) = mpmc::unbounded_async::<CbEvent>();
    let cb: objstream::ObjSentCb = Arc::new(move |hdr: &ObjHdr, _reader, _arg, err| {
        let _ = tx.send((hdr.obj_name.clone(), err.cloned()));
    });
    (cb, rx)
}

pub fn mk_obj(name: &str, size: usize, closed: &Arc<AtomicUsize>) -> Obj {
    let mut hdr = ObjHdr::default();
    hdr.bck.name = "b".to_string();
    hdr.obj_name = name.to_string();
    hdr.attrs.size = size as i64;
    let reader: Option<Reader> = if size > 0 {
        Some(Box::new(TrackReader::new(pattern(size), closed.clone())))
    } else {
        None
    };
    Obj::new(hdr, reader)
}

/// Pulls every request body to EOF and keeps the raw bytes, one entry per
/// request.
pub struct CaptureTransport {
    pub bodies: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self { bodies: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    pub fn concat(&self) -> Vec<u8> {
        self.bodies.lock().unwrap().iter().flatten().copied().collect()
    }
}

impl Transport for CaptureTransport {
    fn do_request(
        &self, body: &mut Body,
    ) -> impl std::future::Future<Output = Result<(), StreamErr>> + Send {
        let bodies = self.bodies.clone();
        async move {
            let mut cur = Vec::new();
            let mut buf = vec![0u8; 7 * 1024 + 13];
            loop {
                let n = body.read(&mut buf).await.map_err(StreamErr::from)?;
                if n == 0 {
                    break;
                }
                cur.extend_from_slice(&buf[..n]);
            }
            bodies.lock().unwrap().push(cur);
            Ok(())
        }
    }
}

/// Decodes frames as it pulls the body and pauses after `gate_after` objects
/// until a gate permit arrives. Used to stop a stream at a known point.
pub struct GateTransport {
    pub gate_after: usize,
    pub gate: Arc<tokio::sync::Semaphore>,
    pub seen: Arc<AtomicUsize>,
}

impl GateTransport {
    pub fn new(gate_after: usize) -> Self {
        Self {
            gate_after,
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
            seen: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Transport for GateTransport {
    fn do_request(
        &self, body: &mut Body,
    ) -> impl std::future::Future<Output = Result<(), StreamErr>> + Send {
        let gate = self.gate.clone();
        let gate_after = self.gate_after;
        let seen = self.seen.clone();
        async move {
            let mem = MemSys::new();
            let mut it = RecvIterator::new("gate", &mut *body, &mem, 64 * 1024)
                .map_err(StreamErr::from)?;
            loop {
                let Some((hlen, flags)) = it.next_proto_hdr().await? else {
                    return Ok(());
                };
                assert!(!flags.contains(FrameFlags::MSG));
                let Some(hdr) = it.next_obj(hlen, flags).await? else {
                    return Ok(());
                };
                it.payload(&hdr, flags).drain().await.map_err(StreamErr::from)?;
                let done = seen.fetch_add(1, Ordering::SeqCst) + 1;
                if done == gate_after {
                    let permit = gate.acquire().await.expect("gate closed");
                    permit.forget();
                }
            }
        }
    }
}

/// Decoded view of one or more captured bodies.
pub async fn decode_objs(wire: &[u8]) -> Vec<(ObjHdr, Vec<u8>)> {
    let mem = MemSys::new();
    let mut body = wire;
    let mut it = RecvIterator::new("decode", &mut body, &mem, 64 * 1024).expect("iterator");
    let mut out = Vec::new();
    loop {
        let Some((hlen, flags)) = it.next_proto_hdr().await.expect("proto hdr") else {
            break;
        };
        match it.next_obj(hlen, flags).await.expect("obj hdr") {
            None => continue, // termination beacon; bodies may be concatenated
            Some(hdr) => {
                let mut payload = Vec::new();
                it.payload(&hdr, flags).read_to_end(&mut payload).await.expect("payload");
                out.push((hdr, payload));
            }
        }
    }
    out
}

/// Polls `cond` until true or the deadline passes.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}
