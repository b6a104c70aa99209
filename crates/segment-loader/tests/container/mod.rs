use segment_loader::{
    container::remote::probe_container, detect_container, ContainerType, HttpTransport,
    RequestOptions,
};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn with_box(fourcc: &[u8; 4], brand: &[u8; 4]) -> Vec<u8> {
    let mut bytes = vec![0, 0, 0, 16];
    bytes.extend_from_slice(fourcc);
    bytes.extend_from_slice(brand);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes
}

#[test]
fn test_detect_signatures() {
    let cases: Vec<(Vec<u8>, Option<ContainerType>)> = vec![
        (vec![0x1a, 0x45, 0xdf, 0xa3, 0x01], Some(ContainerType::Webm)),
        (b"fLaC\0\0\0\x22".to_vec(), Some(ContainerType::Flac)),
        (b"OggS\0\x02".to_vec(), Some(ContainerType::Ogg)),
        (vec![0xff, 0xfb, 0x90, 0x64], Some(ContainerType::Mp3)),
        (vec![0xff, 0xf1, 0x50, 0x80], Some(ContainerType::Aac)),
        (with_box(b"ftyp", b"3gp6"), Some(ContainerType::ThreeGp)),
        (with_box(b"ftyp", b"isom"), Some(ContainerType::Mp4)),
        (with_box(b"styp", b"msdh"), Some(ContainerType::Mp4)),
        (vec![0x47, 0x40, 0x00, 0x10], Some(ContainerType::Ts)),
        (b"#EXTM3U\n".to_vec(), None),
        (Vec::new(), None),
    ];

    for (bytes, expected) in cases {
        assert_eq!(detect_container(&bytes), expected, "{bytes:02x?}");
    }
}

#[test]
fn test_ts_sync_found_past_garbage() {
    let mut bytes = vec![0u8; 5];
    for _ in 0..3 {
        let mut packet = vec![0x47, 0x00, 0x11, 0x10];
        packet.resize(188, 0xff);
        bytes.extend(packet);
    }
    assert_eq!(detect_container(&bytes), Some(ContainerType::Ts));
    assert_eq!(detect_container(&bytes[5..]), Some(ContainerType::Ts));

    // a lone sync byte with no follow-up packet is not enough on a long buffer
    let mut lone = vec![0x47];
    lone.resize(400, 0);
    assert_eq!(detect_container(&lone), None);
}

fn id3_header(body_len: u8) -> Vec<u8> {
    vec![b'I', b'D', b'3', 4, 0, 0, 0, 0, 0, body_len]
}

async fn mount_range(server: &MockServer, range: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path("/media"))
        .and(header("range", range))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
        .mount(server)
        .await;
}

async fn probe(server: &MockServer) -> anyhow::Result<Option<ContainerType>> {
    let options = RequestOptions::new(format!("{}/media", server.uri()).parse()?);
    Ok(probe_container(&HttpTransport::default(), &options).await?)
}

#[tokio::test]
async fn test_probe_id3_mp3() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_range(&server, "bytes=0-9", id3_header(20)).await;
    mount_range(&server, "bytes=30-31", vec![0xff, 0xfb]).await;

    assert_eq!(probe(&server).await?, Some(ContainerType::Mp3));
    Ok(())
}

#[tokio::test]
async fn test_probe_id3_aac() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_range(&server, "bytes=0-9", id3_header(3)).await;
    mount_range(&server, "bytes=13-14", vec![0xff, 0xf1]).await;

    assert_eq!(probe(&server).await?, Some(ContainerType::Aac));
    Ok(())
}

#[tokio::test]
async fn test_probe_id3_unknown_frame() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_range(&server, "bytes=0-9", id3_header(3)).await;
    mount_range(&server, "bytes=13-14", b"<x".to_vec()).await;

    assert_eq!(probe(&server).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_probe_ts_confirmed_by_second_packet() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_range(&server, "bytes=0-9", vec![0x47, 0x40, 0, 0x10, 0, 0, 0, 0, 0, 0]).await;
    mount_range(&server, "bytes=188-188", vec![0x47]).await;

    assert_eq!(probe(&server).await?, Some(ContainerType::Ts));
    Ok(())
}

#[tokio::test]
async fn test_probe_ts_rejected_without_second_sync() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_range(&server, "bytes=0-9", vec![0x47, 0x40, 0, 0x10, 0, 0, 0, 0, 0, 0]).await;
    mount_range(&server, "bytes=188-188", vec![0x00]).await;

    assert_eq!(probe(&server).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_probe_plain_signature_needs_one_request() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media"))
        .and(header("range", "bytes=0-9"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"fLaC\0\0\0\x22\0\0".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(probe(&server).await?, Some(ContainerType::Flac));
    Ok(())
}

#[tokio::test]
async fn test_probe_failure_is_reported() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let options = RequestOptions::new(format!("{}/media", server.uri()).parse()?);
    let error = probe_container(&HttpTransport::default(), &options)
        .await
        .unwrap_err();
    assert_eq!(error.status, Some(404));
    Ok(())
}
