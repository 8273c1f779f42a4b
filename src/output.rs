//! Audio output capability: the seam between playback arbitration and the
//! platform audio stack.
//!
//! Controllers only ever talk to `AudioOutput`/`AudioHandle`, so the
//! arbitration logic is portable across backends and unit-testable with the
//! fakes in `testing`. The production backend drives rodio: bounded tracks
//! are downloaded and decoded up front, the live broadcast is decoded
//! continuously with Symphonia while a network task feeds it chunks.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use log::{debug, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStreamHandle, Sink, Source};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of a handle, polled by the controllers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandleStatus {
    pub is_playing: bool,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub finished: bool,
}

/// A loaded, controllable audio stream instance. Exclusively owned by the
/// controller that created it; released by dropping the last reference.
/// All operations are tolerant of an already-stopped handle.
pub trait AudioHandle: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn stop(&self);
    fn set_volume(&self, volume: f32);
    fn seek(&self, position: Duration);
    fn status(&self) -> HandleStatus;
}

#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Fetch and decode a bounded clip. The returned handle is paused; the
    /// caller starts it once it has confirmed the load is still wanted.
    async fn load(&self, url: &str) -> Result<Arc<dyn AudioHandle>>;

    /// Connect to an unbounded broadcast stream. Same paused-handle contract
    /// as `load`.
    async fn connect(&self, url: &str) -> Result<Arc<dyn AudioHandle>>;
}

/// Rodio-backed production output.
pub struct RodioOutput {
    stream_handle: OutputStreamHandle,
    client: reqwest::Client,
}

impl RodioOutput {
    pub fn new(stream_handle: OutputStreamHandle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            stream_handle,
            client,
        })
    }
}

#[async_trait]
impl AudioOutput for RodioOutput {
    async fn load(&self, url: &str) -> Result<Arc<dyn AudioHandle>> {
        debug!("fetching track: {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }
        let bytes = response.bytes().await?.to_vec();
        debug!("track downloaded, {} KB", bytes.len() / 1024);

        let sink = Sink::try_new(&self.stream_handle)?;
        sink.pause();
        let decoder = Decoder::new(Cursor::new(bytes))?;
        let duration = decoder.total_duration();
        sink.append(decoder);

        Ok(Arc::new(ClipHandle { sink, duration }))
    }

    async fn connect(&self, url: &str) -> Result<Arc<dyn AudioHandle>> {
        let stream_url = match resolve_stream_url(&self.client, url).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("failed to resolve stream URL: {}. Using original URL.", e);
                url.to_string()
            }
        };

        debug!("connecting live stream: {}", stream_url);
        let response = self.client.get(&stream_url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        let sink = Arc::new(Sink::try_new(&self.stream_handle)?);
        sink.pause();
        let token = CancellationToken::new();
        let decode_done = Arc::new(AtomicBool::new(false));
        // Bounded queue so a fast network cannot outrun the decoder.
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(64);

        {
            let token = token.clone();
            tokio::spawn(async move {
                let mut stream = response.bytes_stream();
                let mut total_bytes = 0usize;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            debug!("network fetch cancelled");
                            break;
                        }
                        chunk = stream.next() => match chunk {
                            Some(Ok(chunk)) => {
                                total_bytes += chunk.len();
                                if chunk_tx.send(chunk.to_vec()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("network stream error: {}", e);
                                break;
                            }
                            None => {
                                debug!("network stream ended, total bytes: {} KB", total_bytes / 1024);
                                break;
                            }
                        }
                    }
                }
                // Dropping chunk_tx signals end-of-data to the decoder.
            });
        }

        {
            let sink = sink.clone();
            let token = token.clone();
            let decode_done = decode_done.clone();
            tokio::task::spawn_blocking(move || {
                let source = NetSource::new(chunk_rx);
                if let Err(e) = decode_stream_blocking(source, &sink, &token) {
                    warn!("live decode ended: {}", e);
                }
                decode_done.store(true, Ordering::SeqCst);
            });
        }

        Ok(Arc::new(StreamHandle {
            sink,
            token,
            decode_done,
        }))
    }
}

/// Handle over a fully buffered, seekable track.
struct ClipHandle {
    sink: Sink,
    duration: Option<Duration>,
}

impl AudioHandle for ClipHandle {
    fn play(&self) {
        self.sink.play();
    }

    fn pause(&self) {
        self.sink.pause();
    }

    fn stop(&self) {
        self.sink.stop();
    }

    fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, 2.0));
    }

    fn seek(&self, position: Duration) {
        if let Err(e) = self.sink.try_seek(position) {
            debug!("seek failed: {:?}", e);
        }
    }

    fn status(&self) -> HandleStatus {
        HandleStatus {
            is_playing: !self.sink.is_paused() && !self.sink.empty(),
            position: self.sink.get_pos(),
            duration: self.duration,
            finished: self.sink.empty(),
        }
    }
}

/// Handle over the continuously decoded live broadcast.
struct StreamHandle {
    sink: Arc<Sink>,
    token: CancellationToken,
    decode_done: Arc<AtomicBool>,
}

impl AudioHandle for StreamHandle {
    fn play(&self) {
        self.sink.play();
    }

    fn pause(&self) {
        self.sink.pause();
    }

    fn stop(&self) {
        self.token.cancel();
        self.sink.stop();
    }

    fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume.clamp(0.0, 2.0));
    }

    fn seek(&self, _position: Duration) {
        debug!("seek ignored on a broadcast stream");
    }

    fn status(&self) -> HandleStatus {
        HandleStatus {
            is_playing: !self.sink.is_paused() && !self.sink.empty(),
            position: self.sink.get_pos(),
            duration: None,
            finished: self.decode_done.load(Ordering::SeqCst) && self.sink.empty(),
        }
    }
}

/// Blocking `Read` over the chunk queue so Symphonia can decode straight off
/// the network. Runs inside `spawn_blocking`.
struct NetSource {
    chunk_rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl NetSource {
    fn new(chunk_rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            chunk_rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for NetSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.offset >= self.pending.len() {
            match self.chunk_rx.blocking_recv() {
                Some(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                // Sender dropped: the stream ended or playback was cancelled.
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl Seek for NetSource {
    fn seek(&mut self, _: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "seek not supported",
        ))
    }
}

impl MediaSource for NetSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Interleave a decoded Symphonia buffer into f32 PCM for rodio.
fn interleave(audio_buf: &AudioBufferRef) -> Option<(u16, u32, Vec<f32>)> {
    let spec = *audio_buf.spec();
    let channels = spec.channels.count();
    let frames = audio_buf.frames();
    let mut samples = Vec::with_capacity(frames * channels);

    match audio_buf {
        AudioBufferRef::F32(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push(buf.chan(ch)[frame]);
                }
            }
        }
        AudioBufferRef::F64(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push(buf.chan(ch)[frame] as f32);
                }
            }
        }
        AudioBufferRef::S16(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push(buf.chan(ch)[frame] as f32 / i16::MAX as f32);
                }
            }
        }
        AudioBufferRef::S32(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push(buf.chan(ch)[frame] as f32 / i32::MAX as f32);
                }
            }
        }
        AudioBufferRef::U8(buf) => {
            for frame in 0..frames {
                for ch in 0..channels {
                    samples.push((buf.chan(ch)[frame] as i16 - 128) as f32 / 128.0);
                }
            }
        }
        _ => {
            debug!("unsupported sample format in packet, skipping");
            return None;
        }
    }

    Some((channels as u16, spec.rate, samples))
}

/// CPU-heavy continuous decode loop. Ends when the source runs dry, the
/// token fires, or the decoder hits a fatal error.
fn decode_stream_blocking(
    source: NetSource,
    sink: &Arc<Sink>,
    token: &CancellationToken,
) -> Result<()> {
    let mss = MediaSourceStream::new(
        Box::new(source) as Box<dyn MediaSource>,
        MediaSourceStreamOptions::default(),
    );
    let probed = get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track in stream"))?;
    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    debug!(
        "live stream track: codec={:?}, sample_rate={:?}, channels={:?}",
        track.codec_params.codec, track.codec_params.sample_rate, track.codec_params.channels
    );

    loop {
        if token.is_cancelled() {
            debug!("decode task cancelled");
            break;
        }

        // Keep the sink's queue bounded; the decoder outruns playback.
        while sink.len() > 64 {
            if token.is_cancelled() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        match format.next_packet() {
            Ok(packet) => match decoder.decode(&packet) {
                Ok(audio_buf) => {
                    if let Some((channels, rate, samples)) = interleave(&audio_buf) {
                        sink.append(SamplesBuffer::new(channels, rate, samples));
                    }
                }
                Err(symphonia::core::errors::Error::DecodeError(_)) => {
                    // Non-fatal, skip bad frame
                    continue;
                }
                Err(e) => {
                    debug!("decoder error: {}", e);
                    break;
                }
            },
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                debug!("stream source reached end of data");
                break;
            }
            Err(e) => {
                debug!("format error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

fn parse_pls(content: &str) -> Result<String> {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("File") {
            if let Some((_, url)) = rest.split_once('=') {
                return Ok(url.trim().to_string());
            }
        }
    }
    anyhow::bail!("no stream URL found in .pls playlist")
}

fn parse_m3u(content: &str) -> Result<String> {
    for line in content.lines() {
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            return Ok(line.to_string());
        }
    }
    anyhow::bail!("no stream URL found in .m3u playlist")
}

/// Live mounts are sometimes published behind a playlist file; fetch it and
/// take the first entry.
async fn resolve_stream_url(client: &reqwest::Client, url: &str) -> Result<String> {
    let is_pls = url.ends_with(".pls");
    let is_m3u = url.ends_with(".m3u") || url.ends_with(".m3u8");
    if !is_pls && !is_m3u {
        return Ok(url.to_string());
    }

    debug!("resolving playlist: {}", url);
    let content = client.get(url).send().await?.text().await?;
    if is_pls {
        parse_pls(&content)
    } else {
        parse_m3u(&content)
    }
}

#[cfg(test)]
pub mod testing {
    //! Controllable output double shared by the controller tests.

    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeHandleState {
        started: bool,
        playing: bool,
        stopped: bool,
        finished: bool,
        volume: Option<f32>,
        seeks: Vec<Duration>,
    }

    pub struct FakeHandle {
        pub url: String,
        state: Mutex<FakeHandleState>,
    }

    impl FakeHandle {
        fn new(url: &str) -> Arc<Self> {
            Arc::new(Self {
                url: url.to_string(),
                state: Mutex::new(FakeHandleState::default()),
            })
        }

        /// Whether `play` was ever called.
        pub fn was_started(&self) -> bool {
            self.state.lock().unwrap().started
        }

        pub fn is_stopped(&self) -> bool {
            self.state.lock().unwrap().stopped
        }

        pub fn is_playing(&self) -> bool {
            self.state.lock().unwrap().playing
        }

        pub fn volume(&self) -> Option<f32> {
            self.state.lock().unwrap().volume
        }

        pub fn seeks(&self) -> Vec<Duration> {
            self.state.lock().unwrap().seeks.clone()
        }

        /// Simulate natural end of playback.
        pub fn finish(&self) {
            let mut state = self.state.lock().unwrap();
            state.finished = true;
            state.playing = false;
        }
    }

    impl AudioHandle for FakeHandle {
        fn play(&self) {
            let mut state = self.state.lock().unwrap();
            if !state.stopped {
                state.started = true;
                state.playing = true;
            }
        }

        fn pause(&self) {
            self.state.lock().unwrap().playing = false;
        }

        fn stop(&self) {
            let mut state = self.state.lock().unwrap();
            state.stopped = true;
            state.playing = false;
        }

        fn set_volume(&self, volume: f32) {
            self.state.lock().unwrap().volume = Some(volume);
        }

        fn seek(&self, position: Duration) {
            self.state.lock().unwrap().seeks.push(position);
        }

        fn status(&self) -> HandleStatus {
            let state = self.state.lock().unwrap();
            HandleStatus {
                is_playing: state.playing,
                position: Duration::ZERO,
                duration: None,
                finished: state.finished,
            }
        }
    }

    struct PendingLoad {
        url: String,
        reply: Option<oneshot::Sender<Result<Arc<dyn AudioHandle>>>>,
    }

    /// Output whose loads complete only when the test resolves them, in any
    /// order, so async completions can be interleaved deterministically.
    #[derive(Default)]
    pub struct FakeOutput {
        loads: Mutex<Vec<PendingLoad>>,
    }

    impl FakeOutput {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Total load/connect calls observed so far.
        pub fn load_count(&self) -> usize {
            self.loads.lock().unwrap().len()
        }

        pub fn load_url(&self, index: usize) -> String {
            self.loads.lock().unwrap()[index].url.clone()
        }

        pub async fn wait_for_loads(&self, n: usize) {
            while self.load_count() < n {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        /// Complete the `index`-th load successfully.
        pub fn resolve(&self, index: usize) -> Arc<FakeHandle> {
            let mut loads = self.loads.lock().unwrap();
            let load = &mut loads[index];
            let handle = FakeHandle::new(&load.url);
            let reply = load.reply.take().expect("load already resolved");
            let erased: Arc<dyn AudioHandle> = handle.clone();
            let _ = reply.send(Ok(erased));
            handle
        }

        /// Complete the `index`-th load with an error.
        pub fn fail(&self, index: usize, message: &str) {
            let mut loads = self.loads.lock().unwrap();
            let reply = loads[index].reply.take().expect("load already resolved");
            let _ = reply.send(Err(anyhow::anyhow!("{}", message)));
        }

        async fn enqueue(&self, url: &str) -> Result<Arc<dyn AudioHandle>> {
            let rx = {
                let (tx, rx) = oneshot::channel();
                let mut loads = self.loads.lock().unwrap();
                loads.push(PendingLoad {
                    url: url.to_string(),
                    reply: Some(tx),
                });
                rx
            };
            rx.await.map_err(|_| anyhow::anyhow!("fake load dropped"))?
        }
    }

    #[async_trait]
    impl AudioOutput for FakeOutput {
        async fn load(&self, url: &str) -> Result<Arc<dyn AudioHandle>> {
            self.enqueue(url).await
        }

        async fn connect(&self, url: &str) -> Result<Arc<dyn AudioHandle>> {
            self.enqueue(url).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pls_playlist() {
        let content = "[playlist]\nNumberOfEntries=1\nFile1=http://example.com/stream.mp3\nTitle1=Example Stream\nLength1=-1\nVersion=2";
        assert_eq!(parse_pls(content).unwrap(), "http://example.com/stream.mp3");
    }

    #[test]
    fn pls_without_file_entry_is_an_error() {
        let content = "[playlist]\nNumberOfEntries=1\nTitle1=Example Stream";
        assert!(parse_pls(content).is_err());
    }

    #[test]
    fn parses_m3u_playlist() {
        let content = "#EXTM3U\n#EXTINF:-1,OpenAir\nhttp://example.com/live\n";
        assert_eq!(parse_m3u(content).unwrap(), "http://example.com/live");
    }

    #[test]
    fn empty_m3u_is_an_error() {
        assert!(parse_m3u("#EXTM3U\n").is_err());
    }

    #[test]
    fn net_source_reads_chunks_then_reports_eof() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
        tx.try_send(vec![1, 2, 3]).unwrap();
        tx.try_send(vec![]).unwrap();
        tx.try_send(vec![4, 5]).unwrap();
        drop(tx);

        let mut source = NetSource::new(rx);
        let mut buf = [0u8; 2];
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, &[1, 2]);
        assert_eq!(source.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);
        // Empty chunks are skipped, not treated as end of data.
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, &[4, 5]);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn net_source_refuses_to_seek() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let mut source = NetSource::new(rx);
        assert!(!source.is_seekable());
        assert!(source.seek(SeekFrom::Start(0)).is_err());
    }
}
