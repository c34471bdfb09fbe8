//! The stream core: send/completion queues, session lifecycle, termination.
//!
//! One `Stream` is one long-lived send session. Producers enqueue objects on
//! the send queue (SQ); the send-loop task opens transport requests and feeds
//! them from a [Body](crate::stream::Body) reader; every object then passes
//! through the completion queue (SCQ) exactly once, where its callback fires
//! and its reader is closed. SQ and SCQ together form a FIFO.

use crate::collector::Collector;
use crate::config::StreamConfig;
use crate::error::{StreamErr, TermReason};
use crate::io::Cancellable;
use crate::memsys::MemSys;
use crate::obj::{Obj, ObjSentCb};
use crate::pdu::SendPdu;
use crate::proto;
use crate::recv::RecvIterator;
use crate::stats::{Stats, StatsSnapshot};
use crate::stream::body::{Body, Ins, SendBody, Sendoff};
use crate::stream::lz4::Lz4Half;
use captains_log::LogFilter;
use crossfire::*;
use io_buffer::Buffer;
use std::cell::UnsafeCell;
use std::fmt;
use std::future::Future;
use std::mem::transmute;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

pub(crate) const INACTIVE: usize = 0;
pub(crate) const ACTIVE: usize = 1;

static NEXT_SESS_ID: AtomicU64 = AtomicU64::new(1);

/// The transport that drives one request: it pulls the body to EOF and ships
/// the bytes to the peer. HTTP, TCP, or a test capture — the stream does not
/// care, it only sees `read()` calls arriving on the body.
pub trait Transport: Send + Sync + 'static {
    fn do_request(&self, body: &mut Body) -> impl Future<Output = Result<(), StreamErr>> + Send;
}

/// Constructor arguments beyond the transport itself.
pub struct StreamArgs {
    pub trname: String,
    pub config: StreamConfig,
    /// Stream-level sent-callback; an object-level callback overrides it.
    pub callback: Option<ObjSentCb>,
    /// Defaults to [Collector::process].
    pub collector: Option<Arc<Collector>>,
    /// Defaults to [MemSys::page_mm].
    pub mem: Option<Arc<MemSys>>,
}

impl StreamArgs {
    pub fn new(trname: &str, config: StreamConfig) -> Self {
        Self { trname: trname.to_string(), config, callback: None, collector: None, mem: None }
    }
}

pub(crate) struct Cmpl {
    pub obj: Obj,
    pub err: Option<StreamErr>,
}

#[derive(Default)]
pub(crate) struct SessionCur {
    pub num: u64,
    pub size: i64,
}

pub(crate) struct HdrBuf {
    pub buf: Option<Buffer>,
    pub len: usize,
}

#[derive(Default)]
struct TermState {
    done: bool,
    reason: Option<TermReason>,
    err: Option<StreamErr>,
}

struct Term {
    state: Mutex<TermState>,
    /// Fast-fail flag for `send()`; set by `abort()` and `terminate()`.
    terminated: AtomicBool,
    /// Set once the send loop has fully wound down; the collector then
    /// drains, frees and unregisters the stream.
    cleanable: AtomicBool,
}

fn lock_term(m: &Mutex<TermState>) -> MutexGuard<'_, TermState> {
    match m.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

/// A long-lived send session. Cheap to clone via the handle; all state lives
/// behind one `Arc`.
pub struct Stream {
    inner: Arc<StreamInner>,
}

impl Stream {
    /// Installs the queues, spawns the completion loop and the send loop
    /// (which opens transport requests in the background), registers with the
    /// collector. Must be called within a tokio runtime.
    pub fn new<T: Transport>(transport: Arc<T>, args: StreamArgs) -> Result<Self, StreamErr> {
        let sess_id = NEXT_SESS_ID.fetch_add(1, Ordering::SeqCst);
        let config = args.config;
        let mem = args.mem.unwrap_or_else(|| MemSys::page_mm().clone());
        let collector = args.collector.unwrap_or_else(Collector::process);

        let mut lid = format!("{}[{}]", args.trname, sess_id);
        let hdr_buf = mem.alloc(config.max_header).map_err(StreamErr::from)?;
        let pdu = if config.pdu_size > 0 {
            Some(SendPdu::new(mem.alloc(config.pdu_size).map_err(StreamErr::from)?))
        } else {
            None
        };
        let lz4 = match config.lz4.as_ref() {
            Some(cfg) => {
                lid = format!("{}[{}[b={}]]", args.trname, sess_id, cfg.block_max_size);
                Some(Lz4Half::new(mem.new_sgl(cfg.block_max_size), cfg))
            }
            None => None,
        };

        let (work_tx, work_rx) = mpmc::bounded_async::<Obj>(config.burst.max(1));
        let (cmpl_tx, cmpl_rx) = mpmc::unbounded_async::<Cmpl>();
        let (post_tx, post_rx) = mpmc::bounded_async::<()>(1);
        let (stop_tx, stop_rx) = mpmc::unbounded_async::<()>();
        let (last_tx, last_rx) = mpmc::unbounded_async::<()>();

        let inner = Arc::new(StreamInner {
            trname: args.trname,
            sess_id,
            lid,
            config,
            callback: args.callback,
            mem,
            work_tx,
            work_rx: UnsafeCell::new(Some(work_rx)),
            work_len: AtomicUsize::new(0),
            cmpl_tx,
            cmpl_rx,
            post_tx,
            post_rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            stopped: AtomicBool::new(false),
            last_tx: Mutex::new(Some(last_tx)),
            last_rx,
            sess_st: AtomicUsize::new(ACTIVE),
            in_send: AtomicBool::new(false),
            idle_ms: AtomicU64::new(0),
            stats: Stats::default(),
            term: Term {
                state: Mutex::new(TermState::default()),
                terminated: AtomicBool::new(false),
                cleanable: AtomicBool::new(false),
            },
            sendoff: UnsafeCell::new(Sendoff::default()),
            hdr: UnsafeCell::new(HdrBuf { buf: Some(hdr_buf), len: 0 }),
            pdu: UnsafeCell::new(pdu),
            lz4: UnsafeCell::new(lz4),
            cur: UnsafeCell::new(SessionCur::default()),
            logger: Arc::new(LogFilter::new()),
        });
        collector.register(inner.clone());
        logger_debug!(inner.logger, "{:?} created", inner);

        let cmpl_inner = inner.clone();
        let cmpl_h = tokio::spawn(async move {
            cmpl_inner.cmpl_loop().await;
        });
        let loop_inner = inner.clone();
        tokio::spawn(async move {
            loop_inner.send_loop(transport, cmpl_h).await;
        });
        Ok(Self { inner })
    }

    /// Enqueues one object; blocks when the SQ is full (backpressure).
    #[inline(always)]
    pub async fn send(&self, obj: Obj) -> Result<(), StreamErr> {
        self.inner.send(obj).await
    }

    /// Enqueues the termination beacon and waits until it was serialized
    /// into the body. No sends are permitted after return.
    pub async fn fin(&self) {
        let _ = self.inner.send(Obj::last_marker()).await;
        let _ = self.inner.last_rx.recv().await;
    }

    /// Unblocks the in-progress body read with EOF. Queued objects are not
    /// dropped here; they are completed with the stop cause during drain.
    #[inline(always)]
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// `stop()` plus a terminal error: new sends fail fast, and every pending
    /// object's callback receives `err`.
    #[inline(always)]
    pub fn abort(&self, err: StreamErr) {
        self.inner.abort(err);
    }

    #[inline]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    #[inline]
    pub fn terminated(&self) -> bool {
        self.inner.term.terminated.load(Ordering::Acquire)
    }

    #[inline]
    pub fn compressed(&self) -> bool {
        self.inner.compressed()
    }

    #[inline]
    pub fn lid(&self) -> &str {
        &self.inner.lid
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !self.terminated() && !self.inner.stopped() {
            self.inner.stop();
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner.fmt(f)
    }
}

pub(crate) struct StreamInner {
    trname: String,
    sess_id: u64,
    lid: String,
    pub(crate) config: StreamConfig,
    callback: Option<ObjSentCb>,
    mem: Arc<MemSys>,

    work_tx: MAsyncTx<Obj>,
    work_rx: UnsafeCell<Option<MAsyncRx<Obj>>>,
    pub(crate) work_len: AtomicUsize,
    pub(crate) cmpl_tx: MTx<Cmpl>,
    cmpl_rx: MAsyncRx<Cmpl>,
    post_tx: MAsyncTx<()>,
    post_rx: MAsyncRx<()>,
    stop_tx: Mutex<Option<MTx<()>>>,
    stop_rx: MAsyncRx<()>,
    stopped: AtomicBool,
    last_tx: Mutex<Option<MTx<()>>>,
    last_rx: MAsyncRx<()>,

    pub(crate) sess_st: AtomicUsize,
    pub(crate) in_send: AtomicBool,
    idle_ms: AtomicU64,

    pub(crate) stats: Stats,
    term: Term,

    // Single-owner state: the send-loop task while the stream lives, the
    // collector once `cleanable` is set. Same discipline as the reader-side
    // UnsafeCell state in the transports.
    sendoff: UnsafeCell<Sendoff>,
    hdr: UnsafeCell<HdrBuf>,
    pdu: UnsafeCell<Option<SendPdu>>,
    lz4: UnsafeCell<Option<Lz4Half>>,
    cur: UnsafeCell<SessionCur>,

    pub(crate) logger: Arc<LogFilter>,
}

unsafe impl Send for StreamInner {}
unsafe impl Sync for StreamInner {}

impl fmt::Debug for StreamInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.lid)
    }
}

impl StreamInner {
    #[inline(always)]
    pub(crate) fn sendoff_mut(&self) -> &mut Sendoff {
        unsafe { transmute(self.sendoff.get()) }
    }

    #[inline(always)]
    pub(crate) fn hdr_mut(&self) -> &mut HdrBuf {
        unsafe { transmute(self.hdr.get()) }
    }

    #[inline(always)]
    pub(crate) fn pdu_mut(&self) -> &mut Option<SendPdu> {
        unsafe { transmute(self.pdu.get()) }
    }

    #[inline(always)]
    pub(crate) fn lz4_mut(&self) -> &mut Option<Lz4Half> {
        unsafe { transmute(self.lz4.get()) }
    }

    #[inline(always)]
    pub(crate) fn cur_mut(&self) -> &mut SessionCur {
        unsafe { transmute(self.cur.get()) }
    }

    #[inline(always)]
    pub(crate) fn work_rx_ref(&self) -> Option<&MAsyncRx<Obj>> {
        let rx: &Option<MAsyncRx<Obj>> = unsafe { transmute(self.work_rx.get()) };
        rx.as_ref()
    }

    #[inline(always)]
    pub(crate) fn stop_rx(&self) -> &MAsyncRx<()> {
        &self.stop_rx
    }

    #[inline(always)]
    pub(crate) fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[inline(always)]
    pub(crate) fn compressed(&self) -> bool {
        self.config.lz4.is_some()
    }

    #[inline(always)]
    pub(crate) fn use_pdu(&self) -> bool {
        self.config.pdu_size > 0
    }

    #[inline(always)]
    pub(crate) fn sess_id(&self) -> u64 {
        self.sess_id
    }

    #[inline(always)]
    pub(crate) fn cleanable(&self) -> bool {
        self.term.cleanable.load(Ordering::Acquire)
    }

    pub(crate) async fn send(&self, obj: Obj) -> Result<(), StreamErr> {
        if obj.is_unsized() && !self.use_pdu() {
            let err = StreamErr::UnsizedNoPdu;
            logger_warn!(self.logger, "{:?} dropping {}: {}", self, obj, err);
            self.do_cmpl(obj, Some(err.clone()));
            return Err(err);
        }
        if self.term.terminated.load(Ordering::Acquire) {
            let err = self.term_err();
            logger_warn!(self.logger, "{:?} dropping {}: {}", self, obj, err);
            self.do_cmpl(obj, Some(err.clone()));
            return Err(err);
        }
        // indication for the collector to postpone the idle tick
        self.in_send.store(true, Ordering::Relaxed);
        if self.sess_st.compare_exchange(INACTIVE, ACTIVE, Ordering::SeqCst, Ordering::SeqCst).is_ok()
        {
            let _ = self.post_tx.try_send(());
            logger_trace!(self.logger, "{:?} inactive => active", self);
        }
        self.work_len.fetch_add(1, Ordering::SeqCst);
        if let Err(SendError(obj)) = self.work_tx.send(obj).await {
            self.work_len.fetch_sub(1, Ordering::SeqCst); // rollback
            let err = self.term_err();
            self.do_cmpl(obj, Some(err.clone()));
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        match self.stop_tx.lock() {
            Ok(mut g) => drop(g.take()),
            Err(p) => drop(p.into_inner().take()),
        }
    }

    pub(crate) fn abort(&self, err: StreamErr) {
        {
            let mut st = lock_term(&self.term.state);
            if st.reason.is_none() {
                st.reason = Some(TermReason::Aborted);
                st.err = Some(err);
            }
        }
        self.term.terminated.store(true, Ordering::SeqCst);
        logger_info!(self.logger, "{:?} abort", self);
        self.stop();
    }

    /// The error delivered to objects caught by a terminating stream.
    pub(crate) fn term_err(&self) -> StreamErr {
        let st = lock_term(&self.term.state);
        if let Some(e) = st.err.as_ref() {
            return e.clone();
        }
        StreamErr::Terminated(st.reason.unwrap_or(TermReason::Error))
    }

    fn set_reason(&self, reason: TermReason, err: Option<StreamErr>) {
        let mut st = lock_term(&self.term.state);
        if st.reason.is_none() {
            st.reason = Some(reason);
            if st.err.is_none() {
                st.err = err;
            }
        }
    }

    fn reason(&self) -> (Option<TermReason>, Option<StreamErr>) {
        let st = lock_term(&self.term.state);
        (st.reason, st.err.clone())
    }

    async fn send_loop<T: Transport>(self: Arc<Self>, transport: Arc<T>, cmpl_h: JoinHandle<()>) {
        loop {
            if self.sess_st.load(Ordering::SeqCst) == ACTIVE {
                if self.config.dryrun {
                    self.clone().dryrun().await;
                } else {
                    *self.cur_mut() = SessionCur::default();
                    let r = match Body::new(self.clone()) {
                        Ok(mut body) => transport.do_request(&mut body).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = r {
                        logger_warn!(self.logger, "{:?} request error: {}", self, e);
                        self.set_reason(TermReason::Error, Some(e.clone()));
                        self.err_cmpl(e);
                        break;
                    }
                }
            }
            if !self.is_next_req().await {
                break;
            }
        }
        self.terminate();
        let _ = cmpl_h.await;

        // handle termination caused by anything other than fin()
        let (reason, err) = self.reason();
        match reason {
            Some(TermReason::EndOfStream) => {}
            Some(TermReason::Stopped) => {
                logger_info!(self.logger, "{:?} stopped ({} objects sent)", self, self.stats.snapshot().num);
                self.abort_pending(self.term_err());
            }
            _ => {
                logger_error!(
                    self.logger,
                    "{:?} terminating ({:?}, {})",
                    self,
                    reason,
                    StreamErr::opt(err.as_ref())
                );
                self.abort_pending(self.term_err());
            }
        }
        self.term.cleanable.store(true, Ordering::Release);
    }

    /// Parks between sessions: end-of-stream and stop win over the
    /// next-session signal.
    async fn is_next_req(&self) -> bool {
        let last_f = self.last_rx.recv();
        let stop_f = self.stop_rx.recv();
        let post_f = self.post_rx.recv();
        match Cancellable::new(Cancellable::new(last_f, stop_f), post_f).await {
            Ok(Ok(_)) => {
                self.set_reason(TermReason::EndOfStream, None);
                logger_info!(self.logger, "{:?} end-of-stream", self);
                false
            }
            Ok(Err(())) => {
                self.set_reason(TermReason::Stopped, Some(StreamErr::Stopped));
                logger_info!(self.logger, "{:?} stopped", self);
                false
            }
            Err(()) => {
                self.sess_st.store(ACTIVE, Ordering::SeqCst);
                logger_debug!(self.logger, "{:?} restarting", self);
                true
            }
        }
    }

    /// Idempotent by construction: the send loop calls it exactly once, after
    /// its request loop has ended.
    fn terminate(&self) {
        {
            let mut st = lock_term(&self.term.state);
            debug_assert!(!st.done);
            st.done = true;
            if st.reason.is_none() {
                st.reason = Some(TermReason::Error);
            }
            self.term.terminated.store(true, Ordering::SeqCst);
            let _ = self.cmpl_tx.send(Cmpl { obj: Obj::last_marker(), err: st.err.clone() });
        }
        self.stop();
        match self.last_tx.lock() {
            Ok(mut g) => drop(g.take()),
            Err(p) => drop(p.into_inner().take()),
        }
        if let Some(lz4) = self.lz4_mut() {
            lz4.free();
        }
        let (reason, _) = self.reason();
        logger_debug!(self.logger, "{:?} terminated ({:?})", self, reason);
    }

    async fn cmpl_loop(&self) {
        loop {
            match self.cmpl_rx.recv().await {
                Err(_) => break,
                Ok(cmpl) => {
                    if cmpl.obj.is_last() {
                        break;
                    }
                    self.do_cmpl(cmpl.obj, cmpl.err);
                }
            }
        }
    }

    /// Refcount-aware completion: the callback fires once, the reader is
    /// always closed (dropped with the object).
    pub(crate) fn do_cmpl(&self, mut obj: Obj, err: Option<StreamErr>) {
        let mut fire = true;
        let mut final_err = err;
        if let Some(prc) = obj.prc.clone() {
            if let Some(e) = final_err.as_ref() {
                prc.record(e);
            }
            fire = prc.complete();
            if fire {
                final_err = prc.first_err();
            }
        }
        if fire {
            let cb = obj.callback.clone().or_else(|| self.callback.clone());
            if let Some(cb) = cb {
                cb(&obj.hdr, obj.reader.as_mut(), obj.cmpl_arg.as_mut(), final_err.as_ref());
            }
        }
        // dropping the object closes its reader
    }

    /// Posts a completion for the object interrupted mid-send, if any.
    fn err_cmpl(&self, err: StreamErr) {
        let sendoff = self.sendoff_mut();
        if sendoff.ins != Ins::Eob {
            if let Some(obj) = sendoff.obj.take() {
                let _ = self.cmpl_tx.send(Cmpl { obj, err: Some(err) });
            }
            *sendoff = Sendoff::default();
        }
    }

    /// End-of-object: stats, validation, completion post. The reader is NOT
    /// closed here — that is the completion loop's job.
    pub(crate) fn eo_obj(&self, mut err: Option<StreamErr>) {
        let sendoff = self.sendoff_mut();
        let off = sendoff.off;
        let Some(obj) = sendoff.obj.take() else {
            *sendoff = Sendoff::default();
            return;
        };
        let mut obj_size = obj.hdr.attrs.size;
        if obj.is_unsized() {
            obj_size = off;
        }
        self.cur_mut().size += off;
        self.stats.offset.fetch_add(off, Ordering::Relaxed);
        if err.is_none() && off != obj_size {
            err = Some(StreamErr::SizeMismatch { off, size: obj_size });
        }
        match err.as_ref() {
            None => {
                self.stats.size.fetch_add(obj_size, Ordering::Relaxed);
                self.cur_mut().num += 1;
                let cur_num = self.cur_mut().num;
                let num = self.stats.num.fetch_add(1, Ordering::Relaxed) + 1;
                logger_trace!(self.logger, "{:?} sent {} ({}/{})", self, obj, cur_num, num);
            }
            Some(e) => {
                logger_error!(self.logger, "{:?} {}: {}", self, obj, e);
            }
        }
        let _ = self.cmpl_tx.send(Cmpl { obj, err });
        *sendoff = Sendoff::default();
    }

    /// Drains whatever is still queued after termination, completing every
    /// object with `err`. Runs on the send-loop task after the completion
    /// task was joined, so both queues have a single consumer left.
    fn abort_pending(&self, err: StreamErr) {
        if let Some(rx) = self.work_rx_ref() {
            while let Ok(obj) = rx.try_recv() {
                self.work_len.fetch_sub(1, Ordering::SeqCst);
                if !obj.is_idle_tick() && !obj.is_last() {
                    self.do_cmpl(obj, Some(err.clone()));
                }
            }
        }
        while let Ok(cmpl) = self.cmpl_rx.try_recv() {
            if !cmpl.obj.is_last() {
                let e = cmpl.err.or_else(|| Some(err.clone()));
                self.do_cmpl(cmpl.obj, e);
            }
        }
    }

    /// Collector duty: non-blocking SQ drain of a terminated stream.
    pub(crate) fn drain(&self) {
        let err = self.term_err();
        if let Some(rx) = self.work_rx_ref() {
            while let Ok(obj) = rx.try_recv() {
                self.work_len.fetch_sub(1, Ordering::SeqCst);
                if !obj.is_idle_tick() && !obj.is_last() {
                    self.do_cmpl(obj, Some(err.clone()));
                }
            }
        }
    }

    /// Collector duty: close the SQ (late senders fail fast and complete
    /// their object with the terminal error) and return the slabs.
    pub(crate) fn close_and_free(&self) {
        let rx: &mut Option<MAsyncRx<Obj>> = unsafe { transmute(self.work_rx.get()) };
        drop(rx.take());
        self.hdr_mut().buf.take();
        self.pdu_mut().take();
        logger_debug!(self.logger, "{:?} freed", self);
    }

    /// Collector duty: idle accounting. Fires `idle_tick` once the stream
    /// spent `idle_timeout` without any body read or send.
    pub(crate) fn collector_tick(&self, period: Duration) {
        if self.in_send.swap(false, Ordering::SeqCst) {
            self.idle_ms.store(0, Ordering::Relaxed);
            return;
        }
        let acc =
            self.idle_ms.fetch_add(period.as_millis() as u64, Ordering::Relaxed) + period.as_millis() as u64;
        if acc >= self.config.idle_timeout.as_millis() as u64 {
            self.idle_ms.store(0, Ordering::Relaxed);
            self.idle_tick();
        }
    }

    /// Pushes the in-band idle marker if the SQ is empty and the session was
    /// active. The marker makes the body reader park the session inactive.
    pub(crate) fn idle_tick(&self) {
        if self.work_len.load(Ordering::SeqCst) == 0
            && self
                .sess_st
                .compare_exchange(ACTIVE, INACTIVE, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.work_len.fetch_add(1, Ordering::SeqCst);
            if self.work_tx.try_send(Obj::tick()).is_err() {
                // lost the race to a sender; the session is busy after all
                self.work_len.fetch_sub(1, Ordering::SeqCst);
                self.sess_st.store(ACTIVE, Ordering::SeqCst);
            } else {
                logger_trace!(self.logger, "{:?} active => inactive", self);
            }
        }
    }

    pub(crate) fn insert_obj_header(&self, obj: &Obj) -> Result<usize, StreamErr> {
        let hb = self.hdr_mut();
        let Some(buf) = hb.buf.as_mut() else {
            return Err(StreamErr::Terminated(TermReason::Error));
        };
        let l = proto::ins_obj_header(buf, &obj.hdr, self.use_pdu())?;
        hb.len = l;
        Ok(l)
    }

    pub(crate) fn close_last_ch(&self) {
        match self.last_tx.lock() {
            Ok(mut g) => drop(g.take()),
            Err(p) => drop(p.into_inner().take()),
        }
    }

    /// Dryrun: loop the body back through the frame iterator, discarding
    /// payloads. Replaces the transport wholesale.
    async fn dryrun(self: Arc<Self>) {
        let body = SendBody::new(self.clone());
        let mut it = match RecvIterator::new(&self.trname, body, &self.mem, self.config.max_header)
        {
            Ok(it) => it,
            Err(e) => {
                logger_error!(self.logger, "{:?} dryrun: {}", self, e);
                return;
            }
        };
        loop {
            match it.next_proto_hdr().await {
                Ok(None) => break,
                Err(e) => {
                    logger_debug!(self.logger, "{:?} dryrun: {}", self, e);
                    break;
                }
                Ok(Some((hlen, flags))) => {
                    debug_assert!(!flags.contains(proto::FrameFlags::MSG));
                    match it.next_obj(hlen, flags).await {
                        Ok(Some(hdr)) => {
                            let _ = it.payload(&hdr, flags).drain().await;
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }
    }
}
