//! The process collector: a single ticker over every registered stream.
//!
//! On each tick it advances idle accounting (eventually pushing the in-band
//! idle marker), and reaps terminated streams: drain the send queue, release
//! the slabs, unregister. Lifetime is explicit — `new`/`shutdown` — with
//! [Collector::process] as the conventional process-wide instance.

use crate::io::Cancellable;
use crate::stream::base::StreamInner;
use crossfire::*;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

static PROCESS: OnceLock<Arc<Collector>> = OnceLock::new();

pub struct Collector {
    streams: Mutex<FxHashMap<u64, Arc<StreamInner>>>,
    stop_tx: Mutex<Option<MTx<()>>>,
    stop_rx: MAsyncRx<()>,
    period: Duration,
}

impl Collector {
    /// Spawns the ticker task. Must be called within a tokio runtime.
    pub fn new(period: Duration) -> Arc<Self> {
        let (stop_tx, stop_rx) = mpmc::unbounded_async::<()>();
        let gc = Arc::new(Self {
            streams: Mutex::new(FxHashMap::default()),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            period,
        });
        let runner = gc.clone();
        tokio::spawn(async move {
            runner.run().await;
        });
        gc
    }

    /// The process-wide collector, created on first use with a 1s tick.
    pub fn process() -> Arc<Self> {
        PROCESS.get_or_init(|| Collector::new(Duration::from_secs(1))).clone()
    }

    /// Stops the ticker and forgets every registered stream. Streams
    /// themselves keep working; they just lose idle ticking and reaping.
    pub fn shutdown(&self) {
        match self.stop_tx.lock() {
            Ok(mut g) => drop(g.take()),
            Err(p) => drop(p.into_inner().take()),
        }
        self.lock_streams().clear();
    }

    pub(crate) fn register(&self, s: Arc<StreamInner>) {
        self.lock_streams().insert(s.sess_id(), s);
    }

    fn lock_streams(&self) -> MutexGuard<'_, FxHashMap<u64, Arc<StreamInner>>> {
        match self.streams.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            match Cancellable::new(ticker.tick(), self.stop_rx.recv()).await {
                Ok(_) => self.tick_streams(),
                Err(()) => return,
            }
        }
    }

    fn tick_streams(&self) {
        let snapshot: Vec<Arc<StreamInner>> = self.lock_streams().values().cloned().collect();
        let mut reaped = Vec::new();
        for s in snapshot {
            if s.cleanable() {
                s.drain();
                s.close_and_free();
                reaped.push(s.sess_id());
            } else {
                s.collector_tick(self.period);
            }
        }
        if !reaped.is_empty() {
            let mut streams = self.lock_streams();
            for id in reaped {
                streams.remove(&id);
            }
        }
    }
}
