use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use segment_loader::{
    ByteRange, Decrypter, HttpClient, HttpTransport, InitSegment, LoaderOptions, Segment,
    SegmentEvent, SegmentKey, SegmentLoader, SegmentObserver,
};
use url::Url;

#[derive(Parser, Debug, Clone)]
pub struct FetchCommand {
    /// Byte range of the segment, as OFFSET:LENGTH
    #[clap(long)]
    range: Option<ByteRange>,

    /// URL of the AES-128 key
    #[clap(long)]
    key_uri: Option<Url>,

    /// Key as 32 hex digits. Skips fetching the key.
    #[clap(long, requires = "key_uri")]
    key: Option<String>,

    /// IV as hex, with or without the 0x prefix
    #[clap(long, requires = "key_uri")]
    iv: Option<String>,

    /// Media sequence number used as IV when none is given
    #[clap(long, default_value = "0")]
    media_sequence: u64,

    /// URL of the initialization segment
    #[clap(long)]
    map_uri: Option<Url>,

    /// Byte range of the initialization segment, as OFFSET:LENGTH
    #[clap(long, requires = "map_uri")]
    map_range: Option<ByteRange>,

    /// Dispatch bytes while they are still arriving
    #[clap(long)]
    progressive: bool,

    /// Request timeout in seconds. Overrides the config file.
    #[clap(long)]
    timeout: Option<u64>,

    /// HTTP header used to download, as "Name: value"
    #[clap(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Cookies used to download
    #[clap(long)]
    cookies: Option<String>,

    /// TOML file with loader options
    #[clap(long)]
    config: Option<PathBuf>,

    /// Where the segment payload is written
    #[clap(short, long)]
    output: Option<PathBuf>,

    url: Url,
}

/// Logs what the dispatcher reports.
struct EventLog;

impl SegmentObserver for EventLog {
    fn on_event(&mut self, segment: &Segment, event: SegmentEvent) {
        match event {
            SegmentEvent::Progress(stats) => tracing::debug!(
                received = stats.bytes_received,
                bandwidth = stats.bandwidth,
                "Progress."
            ),
            SegmentEvent::Data(data) => tracing::info!(
                media = ?data.media,
                bytes = data.data.len(),
                partial = data.is_partial,
                "Data."
            ),
            SegmentEvent::StartTime(start) => tracing::info!(uri = %segment.uri, start, "Start time."),
            event => tracing::info!(?event),
        }
    }
}

fn parse_header(header: &str) -> anyhow::Result<(String, String)> {
    let Some((name, value)) = header.split_once(':') else {
        bail!("invalid header: {header}");
    };
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn parse_key(key: &str) -> anyhow::Result<[u32; 4]> {
    let bytes = hex::decode(key.trim_start_matches("0x")).context("invalid key")?;
    let Ok(bytes) = <[u8; 16]>::try_from(bytes) else {
        bail!("expected a 16 byte key");
    };

    let mut words = [0; 4];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}

impl FetchCommand {
    fn loader_options(&self) -> anyhow::Result<LoaderOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let data = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                LoaderOptions::from_toml_str(&data)?
            }
            None => LoaderOptions::default(),
        };

        if let Some(timeout) = self.timeout {
            options.timeout_secs = timeout;
        }
        options.progressive |= self.progressive;
        for header in &self.headers {
            let (name, value) = parse_header(header)?;
            options.headers.insert(name, value);
        }
        Ok(options)
    }

    fn segment(&self) -> anyhow::Result<Segment> {
        let mut segment = Segment::new(self.url.clone());
        segment.byte_range = self.range;

        if let Some(key_uri) = &self.key_uri {
            let iv = match &self.iv {
                Some(iv) => SegmentKey::parse_iv(iv)?,
                None => SegmentKey::iv_from_sequence(self.media_sequence),
            };
            let mut key = SegmentKey::new(key_uri.clone(), iv);
            key.bytes = self.key.as_deref().map(parse_key).transpose()?;
            segment = segment.with_key(key);
        }

        if let Some(map_uri) = &self.map_uri {
            let mut map = InitSegment::new(map_uri.clone());
            map.byte_range = self.map_range;
            segment = segment.with_map(map);
        }
        Ok(segment)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let options = self.loader_options()?;
        let client = HttpClient::default();
        if let Some(cookies) = &self.cookies {
            let cookies = cookies
                .split(';')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            client.add_cookies(cookies, self.url.clone())?;
        }

        let mut builder = SegmentLoader::builder()
            .transport(HttpTransport::new(client))
            .options(options);
        if self.key_uri.is_some() {
            builder = builder.decrypter(Decrypter::spawn());
        }
        let loader = builder.build()?;

        let segment = loader.load(self.segment()?, EventLog).finish().await?;
        let payload = segment.bytes.unwrap_or_default();
        tracing::info!(
            uri = %segment.uri,
            container = ?segment.container,
            fmp4 = ?segment.fmp4,
            bytes = payload.len(),
            bandwidth = segment.stats.bandwidth,
            "Segment loaded."
        );
        if let Some(map) = &segment.map {
            tracing::info!(timescales = ?map.timescales, video = ?map.video_track_ids, "Init segment.");
        }

        if let Some(output) = &self.output {
            tokio::fs::write(output, &payload)
                .await
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
        Ok(())
    }
}
