mod common;

use common::*;
use objstream::{Collector, Lz4Config, StreamArgs, StreamConfig};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_compressed_roundtrip() {
    setup();
    let gc = Collector::new(Duration::from_millis(100));
    let transport = Arc::new(CaptureTransport::new());
    let (cb, cb_rx) = counting_cb();
    let closed = Arc::new(AtomicUsize::new(0));

    let mut config = StreamConfig::default();
    config.lz4 = Some(Lz4Config { block_max_size: 64 * 1024, frame_checksum: false });
    let mut a = StreamArgs::new("lz4", config);
    a.collector = Some(gc.clone());
    a.callback = Some(cb);
    let stream = objstream::Stream::new(transport.clone(), a).expect("stream");
    assert!(stream.compressed());
    assert!(stream.lid().contains("[b=65536]"));

    const NUM: usize = 100;
    const SIZE: usize = 4 * 1024;
    for i in 0..NUM {
        stream.send(mk_obj(&format!("obj-{}", i), SIZE, &closed)).await.expect("send");
    }
    stream.fin().await;
    for i in 0..NUM {
        let (name, err) = cb_rx.recv().await.expect("callback");
        assert_eq!(name, format!("obj-{}", i));
        assert_eq!(err, None);
    }

    let stats = stream.stats();
    assert_eq!(stats.num, NUM as u64);
    assert_eq!(stats.size, (NUM * SIZE) as i64);
    // compression actually compressed
    assert!(stats.compressed_size > 0);
    assert!(stats.compressed_size < stats.offset);
    assert!(stats.compression_ratio() > 1.0);

    // the whole body is one lz4 frame; decompressing yields the frame stream
    wait_for("captured body", || transport.body_count() >= 1).await;
    let bodies = transport.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0].len() as i64, stats.compressed_size);

    let mut decompressed = Vec::new();
    let mut dec = lz4::Decoder::new(&bodies[0][..]).expect("lz4 frame");
    dec.read_to_end(&mut decompressed).expect("decompress");

    let objs = decode_objs(&decompressed).await;
    assert_eq!(objs.len(), NUM);
    let want = pattern(SIZE);
    for (i, (hdr, payload)) in objs.iter().enumerate() {
        assert_eq!(hdr.obj_name, format!("obj-{}", i));
        assert_eq!(payload, &want);
    }
    wait_for("readers closed", || closed.load(Ordering::SeqCst) == NUM).await;
    gc.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_compressed_with_frame_checksum() {
    setup();
    let gc = Collector::new(Duration::from_millis(100));
    let transport = Arc::new(CaptureTransport::new());
    let (cb, cb_rx) = counting_cb();
    let closed = Arc::new(AtomicUsize::new(0));

    let mut config = StreamConfig::default();
    config.lz4 = Some(Lz4Config { block_max_size: 256 * 1024, frame_checksum: true });
    let mut a = StreamArgs::new("lz4-cksum", config);
    a.collector = Some(gc.clone());
    a.callback = Some(cb);
    let stream = objstream::Stream::new(transport.clone(), a).expect("stream");

    stream.send(mk_obj("solo", 128 * 1024, &closed)).await.expect("send");
    stream.fin().await;
    let (_, err) = cb_rx.recv().await.expect("callback");
    assert_eq!(err, None);

    wait_for("captured body", || transport.body_count() >= 1).await;
    let bodies = transport.bodies.lock().unwrap().clone();
    let mut decompressed = Vec::new();
    let mut dec = lz4::Decoder::new(&bodies[0][..]).expect("lz4 frame");
    dec.read_to_end(&mut decompressed).expect("checksum verifies");
    let objs = decode_objs(&decompressed).await;
    assert_eq!(objs.len(), 1);
    assert_eq!(objs[0].1, pattern(128 * 1024));
    gc.shutdown();
}
