use std::time::Duration;

/// Per-stream settings. The defaults match a mid-size deployment; every knob
/// can be overridden through [StreamArgs](crate::stream::StreamArgs).
#[derive(Clone)]
pub struct StreamConfig {
    /// Send-queue depth. A full queue blocks `send()` (backpressure).
    pub burst: usize,
    /// Upper bound for one serialized object header.
    pub max_header: usize,
    /// How long a session may sit without traffic before the collector parks
    /// it inactive (the underlying request body ends, the connection idles).
    pub idle_timeout: Duration,
    /// PDU payload capacity. Zero disables PDU framing; unsized objects then
    /// cannot be sent on this stream.
    pub pdu_size: usize,
    /// LZ4 settings; `None` sends the body uncompressed.
    pub lz4: Option<Lz4Config>,
    /// Loop the body back through the frame iterator instead of the transport.
    pub dryrun: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            burst: 128,
            max_header: 4 * 1024,
            idle_timeout: Duration::from_secs(10),
            pdu_size: 0,
            lz4: None,
            dryrun: false,
        }
    }
}

#[derive(Clone)]
pub struct Lz4Config {
    /// Uncompressed block max size. Rounded to the nearest LZ4 frame class
    /// (64K / 256K / 1M / 4M).
    pub block_max_size: usize,
    /// Whole-frame content checksum. Block checksums stay off.
    pub frame_checksum: bool,
}

impl Default for Lz4Config {
    fn default() -> Self {
        Self { block_max_size: 256 * 1024, frame_checksum: false }
    }
}
