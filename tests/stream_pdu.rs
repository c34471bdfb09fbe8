mod common;

use common::*;
use objstream::proto::{FrameFlags, FrameHead, FRAME_HEAD_LEN};
use objstream::{Collector, Obj, ObjHdr, ObjMarks, Reader, StreamArgs, StreamConfig};
use std::sync::Arc;
use std::time::Duration;

const PDU_SIZE: usize = 4096;

fn pdu_stream(
    transport: &Arc<CaptureTransport>, gc: &Arc<Collector>, cb: objstream::ObjSentCb,
) -> objstream::Stream {
    let mut config = StreamConfig::default();
    config.pdu_size = PDU_SIZE;
    let mut a = StreamArgs::new("pdu", config);
    a.collector = Some(gc.clone());
    a.callback = Some(cb);
    objstream::Stream::new(transport.clone(), a).expect("stream")
}

fn unsized_obj(name: &str, data: Vec<u8>) -> Obj {
    let mut hdr = ObjHdr::default();
    hdr.obj_name = name.to_string();
    hdr.marks = ObjMarks::UNSIZED;
    let reader: Reader = Box::new(std::io::Cursor::new(data));
    Obj::new(hdr, Some(reader))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsized_reassembly() {
    setup();
    let gc = Collector::new(Duration::from_millis(100));
    let transport = Arc::new(CaptureTransport::new());
    let (cb, cb_rx) = counting_cb();
    let stream = pdu_stream(&transport, &gc, cb);

    let data = pattern(3 * PDU_SIZE + 17);
    stream.send(unsized_obj("blob", data.clone())).await.expect("send");
    stream.fin().await;
    let (name, err) = cb_rx.recv().await.expect("callback");
    assert_eq!(name, "blob");
    assert_eq!(err, None);

    // receiver reassembles exactly the sender's bytes
    wait_for("captured body", || transport.body_count() >= 1).await;
    let objs = decode_objs(&transport.concat()).await;
    assert_eq!(objs.len(), 1);
    assert!(objs[0].0.is_unsized());
    assert_eq!(objs[0].1, data);

    // unsized transmission adopts the observed size
    assert_eq!(stream.stats().size, data.len() as i64);
    gc.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_final_pdu_carries_last_flag() {
    setup();
    let gc = Collector::new(Duration::from_millis(100));
    let transport = Arc::new(CaptureTransport::new());
    let (cb, cb_rx) = counting_cb();
    let stream = pdu_stream(&transport, &gc, cb);

    let data = pattern(3 * PDU_SIZE + 17);
    stream.send(unsized_obj("blob", data.clone())).await.expect("send");
    stream.fin().await;
    let _ = cb_rx.recv().await.expect("callback");
    wait_for("captured body", || transport.body_count() >= 1).await;

    // walk the raw frames: object header, then the pdu chain
    let wire = transport.concat();
    let (hlen, flags) = FrameHead::decode(&wire).expect("obj head");
    assert!(flags.contains(FrameFlags::UNSIZED) && flags.contains(FrameFlags::PDU));
    let mut off = FRAME_HEAD_LEN + hlen;
    let payload_cap = PDU_SIZE - FRAME_HEAD_LEN;
    let mut sizes = Vec::new();
    let mut first_flags = FrameFlags::empty();
    loop {
        let (plen, pflags) = FrameHead::decode(&wire[off..]).expect("pdu head");
        assert!(pflags.contains(FrameFlags::PDU));
        if sizes.is_empty() {
            first_flags = pflags;
        }
        sizes.push(plen);
        off += FRAME_HEAD_LEN + plen;
        if pflags.contains(FrameFlags::PDU_LAST) {
            break;
        }
    }
    assert!(first_flags.contains(FrameFlags::PDU_FIRST));
    assert_eq!(sizes, [payload_cap, payload_cap, payload_cap, 17 + 3 * FRAME_HEAD_LEN]);
    // what follows the chain is the termination beacon
    let (_, tflags) = FrameHead::decode(&wire[off..]).expect("beacon");
    assert!(tflags.contains(FrameFlags::LAST));
    gc.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sized_object_on_pdu_stream() {
    setup();
    let gc = Collector::new(Duration::from_millis(100));
    let transport = Arc::new(CaptureTransport::new());
    let (cb, cb_rx) = counting_cb();
    let stream = pdu_stream(&transport, &gc, cb);

    let data = pattern(10_000);
    let mut hdr = ObjHdr::default();
    hdr.obj_name = "sized".to_string();
    hdr.attrs.size = data.len() as i64;
    let reader: Reader = Box::new(std::io::Cursor::new(data.clone()));
    stream.send(Obj::new(hdr, Some(reader))).await.expect("send");
    stream.fin().await;
    let (_, err) = cb_rx.recv().await.expect("callback");
    assert_eq!(err, None);

    wait_for("captured body", || transport.body_count() >= 1).await;
    let objs = decode_objs(&transport.concat()).await;
    assert_eq!(objs.len(), 1);
    assert!(!objs[0].0.is_unsized());
    assert_eq!(objs[0].0.attrs.size, data.len() as i64);
    assert_eq!(objs[0].1, data);
    gc.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unsized_rejected_without_pdu() {
    setup();
    let gc = Collector::new(Duration::from_millis(100));
    let transport = Arc::new(CaptureTransport::new());
    let (cb, cb_rx) = counting_cb();

    let mut a = StreamArgs::new("no-pdu", StreamConfig::default());
    a.collector = Some(gc.clone());
    a.callback = Some(cb);
    let stream = objstream::Stream::new(transport.clone(), a).expect("stream");

    let err = stream
        .send(unsized_obj("blob", pattern(100)))
        .await
        .expect_err("unsized needs pdu framing");
    assert_eq!(err, objstream::StreamErr::UnsizedNoPdu);
    let (_, cb_err) = cb_rx.recv().await.expect("callback");
    assert_eq!(cb_err, Some(objstream::StreamErr::UnsizedNoPdu));
    stream.fin().await;
    gc.shutdown();
}
