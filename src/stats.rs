use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Cumulative send-side counters, updated by the body reader and sampled by
/// anyone.
#[derive(Default)]
pub struct Stats {
    /// Objects fully transmitted.
    pub num: AtomicU64,
    /// Payload bytes of successfully transmitted objects.
    pub size: AtomicI64,
    /// Raw bytes produced into the body (headers + payload), pre-compression.
    pub offset: AtomicI64,
    /// Bytes the compression adapter handed to the transport.
    pub compressed_size: AtomicI64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub num: u64,
    pub size: i64,
    pub offset: i64,
    pub compressed_size: i64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            num: self.num.load(Ordering::Relaxed),
            size: self.size.load(Ordering::Relaxed),
            offset: self.offset.load(Ordering::Relaxed),
            compressed_size: self.compressed_size.load(Ordering::Relaxed),
        }
    }

}

impl StatsSnapshot {
    /// Bytes read vs bytes sent; meaningful on compressed streams only.
    pub fn compression_ratio(&self) -> f64 {
        self.offset as f64 / self.compressed_size as f64
    }
}
