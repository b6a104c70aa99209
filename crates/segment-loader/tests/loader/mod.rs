use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use bytes::Bytes;
use segment_loader::{
    transmux::MediaType, ErrorCode, InitSegment, LoaderOptions, Segment, SegmentEvent,
    SegmentKey, SegmentLoader, TimingEdge,
};
use tokio::sync::{mpsc, Semaphore};
use url::Url;

use crate::{
    fixtures::{self, counting_decrypter, payload_of, EchoTransmuxer},
    source::{Script, ScriptedTransport},
    init_test_tracing, AssertWrapper,
};

fn url(path: &str) -> Url {
    format!("https://cdn.example.com/{path}").parse().unwrap()
}

fn collect(rx: &mut mpsc::UnboundedReceiver<SegmentEvent>) -> Vec<SegmentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn keyed_segment() -> Segment {
    Segment::new(url("seg-0.ts"))
        .with_key(SegmentKey::new(url("key.bin"), fixtures::IV))
        .with_map(InitSegment::new(url("init.mp4")))
}

#[tokio::test]
async fn test_every_completion_order_resolves_once() -> anyhow::Result<()> {
    init_test_tracing();
    let plain = fixtures::ts_payload(4);
    let orders = [
        ["key.bin", "init.mp4", "seg-0.ts"],
        ["key.bin", "seg-0.ts", "init.mp4"],
        ["init.mp4", "key.bin", "seg-0.ts"],
        ["init.mp4", "seg-0.ts", "key.bin"],
        ["seg-0.ts", "key.bin", "init.mp4"],
        ["seg-0.ts", "init.mp4", "key.bin"],
    ];

    for order in orders {
        let gates: Vec<_> = order.iter().map(|_| Arc::new(Semaphore::new(0))).collect();
        let bodies = |path: &str| -> Bytes {
            match path {
                "key.bin" => Bytes::from_static(&fixtures::KEY),
                "init.mp4" => fixtures::init_segment().into(),
                _ => fixtures::encrypt(&plain).into(),
            }
        };
        let mut transport = ScriptedTransport::new();
        for (path, gate) in order.iter().zip(&gates) {
            transport = transport.script(&url(path), Script::ok(bodies(path)).gated(gate));
        }

        let (decrypter, decrypts) = counting_decrypter();
        let loader = SegmentLoader::builder()
            .transport(transport)
            .decrypter(decrypter)
            .build()?;
        let request = loader.load(keyed_segment(), ());

        for gate in &gates {
            settle().await;
            gate.add_permits(1);
        }

        let segment = request.finish().await.assert_success();
        assert_eq!(segment.bytes.as_deref(), Some(&plain[..]), "order {order:?}");
        assert_eq!(decrypts.load(Ordering::SeqCst), 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_keyed_segment_with_map() -> anyhow::Result<()> {
    let plain = fixtures::ts_payload(6);
    let encrypted = fixtures::encrypt(&plain);
    let init = fixtures::init_segment();

    let transport = ScriptedTransport::new()
        .script(&url("key.bin"), Script::ok(&fixtures::KEY[..]))
        .script(&url("init.mp4"), Script::ok(init.clone()))
        .script(&url("seg-0.ts"), Script::ok(encrypted.clone()));
    let (decrypter, decrypts) = counting_decrypter();
    let loader = SegmentLoader::builder()
        .transport(transport.clone())
        .decrypter(decrypter)
        .build()?;

    let segment = loader.load(keyed_segment(), ()).finish().await?;

    assert_eq!(decrypts.load(Ordering::SeqCst), 1);
    assert_eq!(segment.bytes.as_deref(), Some(&plain[..]));
    assert!(segment.encrypted_bytes.is_none());
    assert_eq!(segment.stats.bytes_received, encrypted.len() as u64);
    assert!(segment.end_of_all_requests.is_some());
    assert_eq!(
        segment.key.as_ref().and_then(|k| k.bytes),
        Some([0x30313233, 0x34353637, 0x38396162, 0x63646566])
    );

    let map = segment.map.assert_success();
    assert_eq!(map.bytes.as_deref(), Some(&init[..]));
    assert_eq!(map.timescales.get(&1), Some(&1_000));
    assert_eq!(map.video_track_ids, vec![1]);
    assert_eq!(transport.requests().len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_present_key_and_map_are_not_fetched() -> anyhow::Result<()> {
    let plain = fixtures::ts_payload(2);
    let transport = ScriptedTransport::new()
        .script(&url("seg-0.ts"), Script::ok(fixtures::encrypt(&plain)));

    let mut key = SegmentKey::new(url("key.bin"), fixtures::IV);
    key.bytes = Some([0x30313233, 0x34353637, 0x38396162, 0x63646566]);
    let mut map = InitSegment::new(url("init.mp4"));
    map.bytes = Some(fixtures::init_segment().into());
    let segment = Segment::new(url("seg-0.ts")).with_key(key).with_map(map);

    let loader = SegmentLoader::builder()
        .transport(transport.clone())
        .decrypter(segment_loader::Decrypter::spawn())
        .build()?;
    let segment = loader.load(segment, ()).finish().await?;

    assert_eq!(segment.bytes.as_deref(), Some(&plain[..]));
    assert_eq!(segment.map.assert_success().timescales.get(&1), Some(&1_000));
    assert_eq!(transport.requested(&url("key.bin")), 0);
    assert_eq!(transport.requested(&url("init.mp4")), 0);
    assert_eq!(transport.requests().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_failure_aborts_siblings_once() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new()
        .script(&url("key.bin"), Script::status(403))
        .script(&url("init.mp4"), Script::never())
        .script(&url("seg-0.ts"), Script::never());
    let (decrypter, decrypts) = counting_decrypter();
    let loader = SegmentLoader::builder()
        .transport(transport)
        .decrypter(decrypter)
        .build()?;

    let request = loader.load(keyed_segment(), ());
    let aborter = request.aborter();
    let failure = request.finish().await.unwrap_err();

    assert_eq!(failure.error.code, ErrorCode::Failure);
    assert_eq!(failure.error.status, Some(403));
    assert_eq!(failure.error.uri, url("key.bin"));
    assert_eq!(failure.segment.uri, url("seg-0.ts"));

    for handle in aborter.iter() {
        if handle.uri() == &url("key.bin") {
            assert!(handle.is_finished());
            assert!(!handle.is_aborted());
        } else {
            assert!(handle.is_aborted(), "{} was not aborted", handle.uri());
        }
    }
    assert_eq!(decrypts.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_second_error_is_swallowed() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new()
        .script(&url("init.mp4"), Script::status(500))
        .script(&url("seg-0.ts"), Script::status(502));
    let loader = SegmentLoader::builder().transport(transport).build()?;
    let segment = Segment::new(url("seg-0.ts")).with_map(InitSegment::new(url("init.mp4")));

    let failure = loader.load(segment, ()).finish().await.unwrap_err();
    assert!(matches!(failure.error.status, Some(500) | Some(502)));
    assert_eq!(failure.error.code, ErrorCode::Failure);
    Ok(())
}

#[tokio::test]
async fn test_short_key_fails_before_decrypt() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new()
        .script(&url("key.bin"), Script::ok(&b"too short"[..]))
        .script(&url("init.mp4"), Script::ok(fixtures::init_segment()))
        .script(&url("seg-0.ts"), Script::ok(fixtures::encrypt(b"payload")));
    let (decrypter, decrypts) = counting_decrypter();
    let loader = SegmentLoader::builder()
        .transport(transport)
        .decrypter(decrypter)
        .build()?;

    let failure = loader.load(keyed_segment(), ()).finish().await.unwrap_err();
    assert_eq!(failure.error.code, ErrorCode::Failure);
    assert!(failure.error.message.contains("key.bin"));
    assert!(failure.segment.bytes.is_none());
    assert_eq!(decrypts.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_empty_media_fails_without_decrypt() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new()
        .script(&url("key.bin"), Script::ok(&fixtures::KEY[..]))
        .script(&url("init.mp4"), Script::ok(fixtures::init_segment()))
        .script(&url("seg-0.ts"), Script::ok(Bytes::new()));
    let (decrypter, decrypts) = counting_decrypter();
    let loader = SegmentLoader::builder()
        .transport(transport)
        .decrypter(decrypter)
        .build()?;

    let failure = loader.load(keyed_segment(), ()).finish().await.unwrap_err();
    assert_eq!(failure.error.code, ErrorCode::Failure);
    assert_eq!(failure.error.uri, url("seg-0.ts"));
    assert!(failure.error.message.contains("https://cdn.example.com/seg-0.ts"));
    settle().await;
    assert_eq!(decrypts.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_keyed_segment_requires_decrypter() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new();
    let loader = SegmentLoader::builder().transport(transport.clone()).build()?;

    let failure = loader.load(keyed_segment(), ()).finish().await.unwrap_err();
    assert_eq!(failure.error.code, ErrorCode::Failure);
    assert!(transport.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_resolution() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new()
        .script(&url("key.bin"), Script::never())
        .script(&url("init.mp4"), Script::never())
        .script(&url("seg-0.ts"), Script::never());
    let (decrypter, decrypts) = counting_decrypter();
    let loader = SegmentLoader::builder()
        .transport(transport)
        .decrypter(decrypter)
        .build()?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let request = loader.load(keyed_segment(), tx);
    let aborter = request.aborter();
    assert_eq!(aborter.len(), 3);
    request.abort();
    request.abort();
    aborter.abort_all();

    let failure = request.finish().await.unwrap_err();
    assert_eq!(failure.error.code, ErrorCode::Aborted);
    assert!(aborter.iter().all(|handle| handle.is_aborted()));
    assert!(collect(&mut rx).is_empty());
    assert_eq!(decrypts.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_reported() -> anyhow::Result<()> {
    let transport = ScriptedTransport::new().script(&url("seg-0.ts"), Script::never());
    let loader = SegmentLoader::builder()
        .transport(transport)
        .options(LoaderOptions {
            timeout_secs: 5,
            ..Default::default()
        })
        .build()?;

    let request = loader.load(Segment::new(url("seg-0.ts")), ());
    tokio::time::advance(Duration::from_secs(6)).await;
    let failure = request.finish().await.unwrap_err();
    assert_eq!(failure.error.code, ErrorCode::Timeout);
    Ok(())
}

#[tokio::test]
async fn test_progressive_forwards_each_byte_once() -> anyhow::Result<()> {
    init_test_tracing();
    let payload = fixtures::ts_payload(10);
    let transport = ScriptedTransport::new()
        .script(&url("seg-0.ts"), Script::chunked(&payload, 300));
    let transmuxer = EchoTransmuxer::default();
    let loader = SegmentLoader::builder()
        .transport(transport)
        .transmuxer(transmuxer.clone())
        .options(LoaderOptions {
            progressive: true,
            ..Default::default()
        })
        .build()?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let segment = loader.load(Segment::new(url("seg-0.ts")), tx).finish().await?;
    let events = collect(&mut rx);

    assert_eq!(payload_of(&events), payload);
    assert_eq!(segment.bytes.as_deref(), Some(&payload[..]));
    assert_eq!(segment.last_reached_char, payload.len());

    let requests = transmuxer.requests.lock().unwrap().clone();
    let partial: usize = requests.iter().filter(|(_, p)| *p).map(|(n, _)| n).sum();
    assert_eq!(partial, payload.len());
    assert_eq!(requests.last(), Some(&(0, false)));

    let progress = events
        .iter()
        .filter(|e| matches!(e, SegmentEvent::Progress(_)))
        .count();
    assert_eq!(progress, payload.len().div_ceil(300));

    let starts = events
        .iter()
        .filter(|e| matches!(e, SegmentEvent::Timing { edge: TimingEdge::Start, .. }))
        .count();
    assert_eq!(starts, 1);
    Ok(())
}

#[tokio::test]
async fn test_progressive_fmp4_is_dispatched_whole() -> anyhow::Result<()> {
    let init = fixtures::init_segment();
    let payload = fixtures::fragment(3_000);
    let transport = ScriptedTransport::new()
        .script(&url("init.mp4"), Script::ok(init))
        .script(&url("seg-0.m4s"), Script::chunked(&payload, 16));
    let loader = SegmentLoader::builder()
        .transport(transport)
        .transmuxer(EchoTransmuxer::default())
        .options(LoaderOptions {
            progressive: true,
            ..Default::default()
        })
        .build()?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let segment = Segment::new(url("seg-0.m4s")).with_map(InitSegment::new(url("init.mp4")));
    let segment = loader.load(segment, tx).finish().await?;
    let events = collect(&mut rx);

    assert!(segment.is_fmp4());
    let data: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SegmentEvent::Data(data) => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].media, MediaType::Combined);
    assert!(!data[0].is_partial);
    assert_eq!(&data[0].data[..], &payload[..]);
    assert!(events.contains(&SegmentEvent::StartTime(3.0)));
    Ok(())
}

#[tokio::test]
async fn test_fragment_with_oversized_trailing_box() -> anyhow::Result<()> {
    let mut payload = fixtures::fragment(3_000);
    payload.extend_from_slice(&[0, 0, 0, 1]);
    payload.extend_from_slice(b"free");
    payload.extend_from_slice(&u64::MAX.to_be_bytes());
    let transport = ScriptedTransport::new()
        .script(&url("init.mp4"), Script::ok(fixtures::init_segment()))
        .script(&url("seg-0.m4s"), Script::ok(payload.clone()));
    let loader = SegmentLoader::builder().transport(transport).build()?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let segment = Segment::new(url("seg-0.m4s")).with_map(InitSegment::new(url("init.mp4")));
    let segment = loader.load(segment, tx).finish().await?;
    let events = collect(&mut rx);

    assert!(segment.is_fmp4());
    assert_eq!(segment.bytes.as_deref(), Some(&payload[..]));
    assert!(events.contains(&SegmentEvent::StartTime(3.0)));
    Ok(())
}

#[tokio::test]
async fn test_two_segments_share_one_decrypter() -> anyhow::Result<()> {
    let first = fixtures::ts_payload(3);
    let second = fixtures::ts_payload(5);
    let gate = Arc::new(Semaphore::new(0));
    let transport = ScriptedTransport::new()
        .script(&url("key.bin"), Script::ok(&fixtures::KEY[..]))
        .script(&url("a.ts"), Script::ok(fixtures::encrypt(&first)).gated(&gate))
        .script(&url("b.ts"), Script::ok(fixtures::encrypt(&second)));
    let (decrypter, decrypts) = counting_decrypter();
    let loader = SegmentLoader::builder()
        .transport(transport)
        .decrypter(decrypter)
        .build()?;

    let a = loader.load(
        Segment::new(url("a.ts")).with_key(SegmentKey::new(url("key.bin"), fixtures::IV)),
        (),
    );
    let b = loader.load(
        Segment::new(url("b.ts")).with_key(SegmentKey::new(url("key.bin"), fixtures::IV)),
        (),
    );
    settle().await;
    gate.add_permits(1);

    let (a, b) = tokio::join!(a.finish(), b.finish());
    let (a, b) = (a?, b?);
    assert_ne!(a.request_id, b.request_id);
    assert_eq!(a.bytes.as_deref(), Some(&first[..]));
    assert_eq!(b.bytes.as_deref(), Some(&second[..]));
    assert_eq!(decrypts.load(Ordering::SeqCst), 2);
    Ok(())
}
