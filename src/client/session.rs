//! # Voice Session
//!
//! The client-side aggregate: capture device, frame slicer, send buffer,
//! relay socket, receive queue and playback, started and stopped together.
//!
//! ## Tasks:
//! ```text
//! capture task ──frames (unbounded)──▶ outbound pump ──▶ socket sink
//! socket stream ──▶ inbound reader ──chunks (bounded)──▶ playback scheduler
//! ```
//!
//! ## Teardown order:
//! 1. Halt capture
//! 2. Disconnect the input device
//! 3. Release the output device
//! 4. Close the socket
//!
//! `stop` may be called any number of times; only the first call does work.

use crate::audio::device::{AudioInput, AudioOutput};
use crate::audio::pcm;
use crate::audio::playback::{PlaybackHandle, PlaybackScheduler, PlaybackStats, ReceiveQueue};
use crate::audio::send_buffer::SendBuffer;
use crate::audio::slicer::{AudioFrame, FrameSlicer};
use crate::client::connection::connect_with_retry;
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::protocol::{ClientEvent, InboundEvent, SessionConfig};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

/// How long `stop` waits for the relay to acknowledge the close.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// User-visible session status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Ready,
    Connecting,
    Recording,
    /// Full status text: `Error: <message>` or `Error occurred`.
    Error(String),
    ConnectionError,
    ConnectionClosed,
    Stopped,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Ready => write!(f, "Ready"),
            SessionStatus::Connecting => write!(f, "Connecting..."),
            SessionStatus::Recording => write!(f, "Recording..."),
            SessionStatus::Error(text) => write!(f, "{}", text),
            SessionStatus::ConnectionError => write!(f, "Connection error"),
            SessionStatus::ConnectionClosed => write!(f, "Connection closed"),
            SessionStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Default)]
struct SessionCounters {
    windows_sent: AtomicU64,
    dropped_windows: AtomicU64,
    chunks_received: AtomicU64,
    dropped_chunks: AtomicU64,
}

/// Session counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub windows_sent: u64,
    /// Flushed windows discarded because the socket was not open.
    pub dropped_windows: u64,
    pub chunks_received: u64,
    /// Inbound audio that could not be decoded from base64.
    pub dropped_chunks: u64,
    pub playback: PlaybackStats,
}

/// Drains captured frames into send windows and writes flushed windows to
/// the socket.
struct OutboundPump<S> {
    sink: S,
    buffer: SendBuffer,
    socket_open: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
}

impl<S> OutboundPump<S>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    async fn accept_frame(&mut self, frame: AudioFrame) {
        self.buffer.accept(frame);
        let Some(window) = self.buffer.maybe_flush() else {
            return;
        };

        if !self.socket_open.load(Ordering::SeqCst) {
            warn!(samples = window.sample_count, "Socket not open, dropping audio window");
            self.counters.dropped_windows.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let sample_count = window.sample_count;
        let text = match serde_json::to_string(&window.into_event()) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize audio window: {}", e);
                self.counters.dropped_windows.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        match self.sink.send(Message::Text(text)).await {
            Ok(()) => {
                debug!(samples = sample_count, "Audio window sent");
                self.counters.windows_sent.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("Failed to send audio window: {}", e);
                self.socket_open.store(false, Ordering::SeqCst);
                self.counters.dropped_windows.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Pump frames until told to close, then close the socket.
    ///
    /// Frames running out (capture finished) does not close the socket: the
    /// response may still be streaming in.
    async fn run(
        mut self,
        mut frames: mpsc::UnboundedReceiver<AudioFrame>,
        mut close: watch::Receiver<bool>,
    ) {
        let mut frames_open = true;
        loop {
            tokio::select! {
                biased;
                _ = async { let _ = close.wait_for(|closing| *closing).await; } => break,
                frame = frames.recv(), if frames_open => match frame {
                    Some(frame) => self.accept_frame(frame).await,
                    None => frames_open = false,
                },
            }
        }

        if self.socket_open.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.sink.close().await {
                debug!("Socket close: {}", e);
            }
        }
    }
}

/// Reacts to one inbound message. Returns `false` once the socket has ended.
struct InboundReader {
    queue: ReceiveQueue,
    status: Arc<watch::Sender<SessionStatus>>,
    socket_open: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
}

impl InboundReader {
    async fn handle_text(&mut self, text: &str) {
        let event = match InboundEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Error processing message: {}", e);
                return;
            }
        };

        match event {
            InboundEvent::AudioDelta { delta: audio } | InboundEvent::AudioAppend { audio } => {
                self.enqueue_audio(&audio).await;
            }
            InboundEvent::AudioDone => info!("Audio response complete"),
            InboundEvent::Error { message } => {
                error!("Relay reported error: {}", message);
                self.status
                    .send_replace(SessionStatus::Error(format!("Error: {}", message)));
            }
            InboundEvent::ErrorLike { event_type } => {
                error!("Relay reported {}", event_type);
                self.status
                    .send_replace(SessionStatus::Error("Error occurred".to_string()));
            }
            InboundEvent::SessionCreated => info!("Session created"),
            InboundEvent::SessionUpdated => info!("Session updated"),
            InboundEvent::ConversationCreated => info!("Conversation created"),
            InboundEvent::Other { event_type } => debug!(event_type = %event_type, "Unhandled message"),
        }
    }

    async fn enqueue_audio(&mut self, audio: &str) {
        self.counters.chunks_received.fetch_add(1, Ordering::SeqCst);
        let bytes = match pcm::decode_base64(audio) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping inbound audio: {}", e);
                self.counters.dropped_chunks.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        if let Err(e) = self.queue.enqueue(bytes).await {
            debug!("Inbound audio after playback stopped: {}", e);
        }
    }

    async fn run<St>(mut self, mut stream: St)
    where
        St: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                Some(Ok(Message::Close(frame))) => {
                    info!("Connection closed: {:?}", frame);
                    self.socket_open.store(false, Ordering::SeqCst);
                    self.status.send_replace(SessionStatus::ConnectionClosed);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.socket_open.store(false, Ordering::SeqCst);
                    self.status.send_replace(SessionStatus::ConnectionError);
                    break;
                }
                None => {
                    self.socket_open.store(false, Ordering::SeqCst);
                    self.status.send_replace(SessionStatus::ConnectionClosed);
                    break;
                }
            }
        }
    }
}

async fn run_capture<I: AudioInput>(
    mut input: I,
    mut slicer: FrameSlicer,
    frames: mpsc::UnboundedSender<AudioFrame>,
    mut halt: watch::Receiver<bool>,
    capture_done: watch::Sender<bool>,
) {
    'capture: loop {
        tokio::select! {
            biased;
            _ = halt.wait_for(|halted| *halted) => break,
            block = input.next_block() => match block {
                Ok(Some(samples)) => {
                    for frame in slicer.push(&samples) {
                        if frames.send(frame).is_err() {
                            debug!("Frame receiver gone, stopping capture");
                            break 'capture;
                        }
                    }
                }
                Ok(None) => {
                    info!("Capture source exhausted");
                    break;
                }
                Err(e) => {
                    error!("Capture failed: {}", e);
                    break;
                }
            },
        }
    }

    input.disconnect();
    capture_done.send_replace(true);
}

/// A running voice conversation.
pub struct VoiceSession {
    status: Arc<watch::Sender<SessionStatus>>,
    counters: Arc<SessionCounters>,
    halt_capture: watch::Sender<bool>,
    capture_done: watch::Receiver<bool>,
    close_socket: watch::Sender<bool>,
    capture_task: Option<JoinHandle<()>>,
    playback: Option<PlaybackHandle>,
    playback_stats: PlaybackStats,
    outbound_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl VoiceSession {
    /// Connect to the relay and start capturing and playing.
    ///
    /// ## Process:
    /// 1. Connect (one retry on timeout); status `Connecting...`
    /// 2. Send the optional instructions-only `session.update`
    /// 3. Start playback, the inbound reader, the outbound pump and capture
    /// 4. Status `Recording...`
    pub async fn start<I, O>(config: &AppConfig, input: I, output: O) -> PipelineResult<Self>
    where
        I: AudioInput + 'static,
        O: AudioOutput + 'static,
    {
        let (status_tx, _) = watch::channel(SessionStatus::Ready);
        Self::start_with_status(config, input, output, Arc::new(status_tx)).await
    }

    /// Like [`VoiceSession::start`], publishing status on an existing channel
    /// so connection failures are observable too.
    pub async fn start_with_status<I, O>(
        config: &AppConfig,
        input: I,
        mut output: O,
        status: Arc<watch::Sender<SessionStatus>>,
    ) -> PipelineResult<Self>
    where
        I: AudioInput + 'static,
        O: AudioOutput + 'static,
    {
        status.send_replace(SessionStatus::Connecting);

        let timeout = Duration::from_millis(config.client.connect_timeout_ms);
        let socket = match connect_with_retry(&config.client.server_url, &config.client.origin, timeout).await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Failed to connect to relay: {}", e);
                status.send_replace(SessionStatus::ConnectionError);
                if let Err(release_err) = output.release().await {
                    warn!("Failed to release audio output: {}", release_err);
                }
                return Err(e);
            }
        };
        let (mut sink, stream) = socket.split();

        if let Some(instructions) = &config.client.instructions {
            let update = ClientEvent::SessionUpdate {
                session: SessionConfig::instructions(instructions.clone()),
            };
            let text = serde_json::to_string(&update)
                .map_err(|e| PipelineError::Malformed(e.to_string()))?;
            sink.send(Message::Text(text)).await?;
        }

        let counters = Arc::new(SessionCounters::default());
        let socket_open = Arc::new(AtomicBool::new(true));

        let (queue, playback) = PlaybackScheduler::spawn(
            output,
            config.audio.sample_rate,
            config.audio.receive_queue_capacity,
        );

        let reader = InboundReader {
            queue,
            status: status.clone(),
            socket_open: socket_open.clone(),
            counters: counters.clone(),
        };
        let reader_task = tokio::spawn(reader.run(stream));

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let pump = OutboundPump {
            sink,
            buffer: SendBuffer::new(config.audio.flush_threshold_samples()),
            socket_open,
            counters: counters.clone(),
        };
        let outbound_task = tokio::spawn(pump.run(frame_rx, close_rx));

        let (halt_tx, halt_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let capture_task = tokio::spawn(run_capture(
            input,
            FrameSlicer::new(config.audio.frame_size),
            frame_tx,
            halt_rx,
            done_tx,
        ));

        status.send_replace(SessionStatus::Recording);
        info!("Voice session started");

        Ok(Self {
            status,
            counters,
            halt_capture: halt_tx,
            capture_done: done_rx,
            close_socket: close_tx,
            capture_task: Some(capture_task),
            playback: Some(playback),
            playback_stats: PlaybackStats::default(),
            outbound_task: Some(outbound_task),
            reader_task: Some(reader_task),
            stopped: false,
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Resolves once the capture device has no more audio (or was halted).
    pub async fn capture_finished(&self) {
        let mut done = self.capture_done.clone();
        let _ = done.wait_for(|finished| *finished).await;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            windows_sent: self.counters.windows_sent.load(Ordering::SeqCst),
            dropped_windows: self.counters.dropped_windows.load(Ordering::SeqCst),
            chunks_received: self.counters.chunks_received.load(Ordering::SeqCst),
            dropped_chunks: self.counters.dropped_chunks.load(Ordering::SeqCst),
            playback: self
                .playback
                .as_ref()
                .map(PlaybackHandle::stats)
                .unwrap_or(self.playback_stats),
        }
    }

    /// Tear the session down. Idempotent.
    pub async fn stop(&mut self) -> SessionStats {
        if self.stopped {
            return self.stats();
        }
        self.stopped = true;

        // Capture halts, then the capture task disconnects the input.
        let _ = self.halt_capture.send(true);
        if let Some(task) = self.capture_task.take() {
            if let Err(e) = task.await {
                warn!("Capture task ended abnormally: {}", e);
            }
        }

        if let Some(playback) = self.playback.take() {
            self.playback_stats = playback.stop().await;
        }

        let _ = self.close_socket.send(true);
        if let Some(task) = self.outbound_task.take() {
            if let Err(e) = task.await {
                warn!("Outbound task ended abnormally: {}", e);
            }
        }
        if let Some(mut task) = self.reader_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }

        self.status.send_replace(SessionStatus::Stopped);
        let stats = self.stats();
        info!("Voice session stopped: {:?}", stats);
        stats
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        for task in [
            self.capture_task.take(),
            self.outbound_task.take(),
            self.reader_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{PlayableBuffer, WavInput};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct SharedOutput {
        samples: Arc<Mutex<Vec<f32>>>,
        released: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AudioOutput for SharedOutput {
        async fn play(&mut self, buffer: PlayableBuffer) -> PipelineResult<()> {
            self.samples.lock().unwrap().extend(buffer.samples);
            Ok(())
        }

        async fn release(&mut self) -> PipelineResult<()> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sink_into(
        sent: Arc<Mutex<Vec<String>>>,
    ) -> impl Sink<Message, Error = WsError> + Unpin {
        Box::pin(futures_util::sink::unfold(sent, |sent, message: Message| async move {
            if let Message::Text(text) = message {
                sent.lock().unwrap().push(text);
            }
            Ok::<_, WsError>(sent)
        }))
    }

    #[tokio::test]
    async fn test_pump_sends_one_message_per_window() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(SessionCounters::default());
        let mut pump = OutboundPump {
            sink: sink_into(sent.clone()),
            buffer: SendBuffer::new(4800),
            socket_open: Arc::new(AtomicBool::new(true)),
            counters: counters.clone(),
        };

        for _ in 0..3 {
            pump.accept_frame(AudioFrame::new(vec![0.0; 2000])).await;
        }

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let event: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(event["type"], "input_audio_buffer.append");
        let bytes = pcm::decode_base64(event["audio"].as_str().unwrap()).unwrap();
        assert_eq!(bytes.len(), 6000 * 2);
        assert_eq!(counters.windows_sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pump_drops_windows_while_socket_closed() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(SessionCounters::default());
        let socket_open = Arc::new(AtomicBool::new(false));
        let mut pump = OutboundPump {
            sink: sink_into(sent.clone()),
            buffer: SendBuffer::new(100),
            socket_open: socket_open.clone(),
            counters: counters.clone(),
        };

        pump.accept_frame(AudioFrame::new(vec![0.0; 100])).await;
        socket_open.store(true, Ordering::SeqCst);
        pump.accept_frame(AudioFrame::new(vec![0.0; 100])).await;

        // The dropped window is not queued for later.
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(counters.dropped_windows.load(Ordering::SeqCst), 1);
        assert_eq!(counters.windows_sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_pump_closes_socket_on_signal() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(SessionCounters::default());
        let socket_open = Arc::new(AtomicBool::new(true));
        let pump = OutboundPump {
            sink: sink_into(sent.clone()),
            buffer: SendBuffer::new(100),
            socket_open: socket_open.clone(),
            counters: counters.clone(),
        };
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);

        let task = tokio::spawn(pump.run(frames_rx, close_rx));
        frames_tx.send(AudioFrame::new(vec![0.0; 100])).unwrap();
        while counters.windows_sent.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        close_tx.send_replace(true);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!socket_open.load(Ordering::SeqCst));
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    struct EndlessInput {
        pulls: Arc<AtomicU64>,
        disconnected: Arc<AtomicBool>,
    }

    #[async_trait]
    impl AudioInput for EndlessInput {
        async fn next_block(&mut self) -> PipelineResult<Option<Vec<f32>>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(Some(vec![0.0; 4096]))
        }

        fn disconnect(&mut self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_capture_stops_when_frame_receiver_is_gone() {
        let pulls = Arc::new(AtomicU64::new(0));
        let disconnected = Arc::new(AtomicBool::new(false));
        let input = EndlessInput {
            pulls: pulls.clone(),
            disconnected: disconnected.clone(),
        };
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        drop(frames_rx);
        let (_halt_tx, halt_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        tokio::time::timeout(
            Duration::from_secs(1),
            run_capture(input, FrameSlicer::new(4096), frames_tx, halt_rx, done_tx),
        )
        .await
        .unwrap();

        assert_eq!(pulls.load(Ordering::SeqCst), 1);
        assert!(disconnected.load(Ordering::SeqCst));
        assert!(*done_rx.borrow());
    }

    fn reader_for_test(
        capacity: usize,
    ) -> (InboundReader, PlaybackHandle, SharedOutput, watch::Receiver<SessionStatus>) {
        let output = SharedOutput::default();
        let (queue, playback) = PlaybackScheduler::spawn(output.clone(), 24000, capacity);
        let (status_tx, status_rx) = watch::channel(SessionStatus::Recording);
        let reader = InboundReader {
            queue,
            status: Arc::new(status_tx),
            socket_open: Arc::new(AtomicBool::new(true)),
            counters: Arc::new(SessionCounters::default()),
        };
        (reader, playback, output, status_rx)
    }

    #[tokio::test]
    async fn test_reader_enqueues_both_audio_shapes_in_order() {
        let (mut reader, playback, output, _status) = reader_for_test(8);
        let first = pcm::encode_base64(&pcm::encode_pcm16(&[0.25, 0.25]));
        let second = pcm::encode_base64(&pcm::encode_pcm16(&[-0.5]));

        reader
            .handle_text(&format!(r#"{{"type":"response.audio.delta","delta":"{}"}}"#, first))
            .await;
        reader.handle_text(r#"{"type":"response.audio.delta","delta":"%%%"}"#).await;
        reader
            .handle_text(&format!(r#"{{"type":"audio_buffer.append","audio":"{}"}}"#, second))
            .await;
        reader.handle_text("not json").await;

        let counters = reader.counters.clone();
        drop(reader);
        let stats = playback.finish().await;

        assert_eq!(stats.played, 2);
        assert_eq!(*output.samples.lock().unwrap(), vec![0.25, 0.25, -0.5]);
        assert_eq!(counters.chunks_received.load(Ordering::SeqCst), 3);
        assert_eq!(counters.dropped_chunks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reader_surfaces_errors_as_status() {
        let (mut reader, _playback, _output, status) = reader_for_test(1);

        reader
            .handle_text(r#"{"type":"error","error":{"message":"Invalid API key"}}"#)
            .await;
        assert_eq!(status.borrow().to_string(), "Error: Invalid API key");

        reader.handle_text(r#"{"type":"error.unknown"}"#).await;
        assert_eq!(status.borrow().to_string(), "Error occurred");
    }

    /// Minimal stand-in for the relay: counts appended samples, then answers
    /// with one audio delta and an error notice.
    async fn fake_relay(listener: TcpListener, expected_windows: usize) -> Vec<usize> {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let (mut sink, mut stream) = ws.split();

        let mut windows = Vec::new();
        while windows.len() < expected_windows {
            let message = stream.next().await.unwrap().unwrap();
            if let Message::Text(text) = message {
                let event: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(event["type"], "input_audio_buffer.append");
                let bytes = pcm::decode_base64(event["audio"].as_str().unwrap()).unwrap();
                windows.push(bytes.len() / 2);
            }
        }

        let delta = pcm::encode_base64(&pcm::encode_pcm16(&vec![0.5; 480]));
        sink.send(Message::Text(format!(
            r#"{{"type":"response.audio.delta","delta":"{}"}}"#,
            delta
        )))
        .await
        .unwrap();
        sink.send(Message::Text(
            r#"{"type":"error","error":{"message":"boom"}}"#.to_string(),
        ))
        .await
        .unwrap();

        while let Some(Ok(message)) = stream.next().await {
            if message.is_close() {
                break;
            }
        }
        let _ = sink.close().await;
        windows
    }

    #[tokio::test]
    async fn test_session_round_trip_and_idempotent_stop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = tokio::spawn(fake_relay(listener, 2));

        let mut config = AppConfig::default();
        config.client.server_url = format!("ws://{}/ws", addr);

        // 24000 samples → five 4096-sample frames → two 8192-sample windows;
        // the fifth frame stays below the 4800-sample threshold.
        let input = WavInput::from_samples(vec![0.1; 24000], 24000, 240).unpaced();
        let output = SharedOutput::default();
        let mut session = VoiceSession::start(&config, input, output.clone())
            .await
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Recording);

        let mut status = session.watch_status();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, SessionStatus::Error(_))),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(session.status().to_string(), "Error: boom");

        tokio::time::timeout(Duration::from_secs(5), async {
            while output.samples.lock().unwrap().len() < 480 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let stats = session.stop().await;
        assert_eq!(stats.windows_sent, 2);
        assert_eq!(stats.dropped_windows, 0);
        assert_eq!(stats.playback.played, 1);
        assert!(output.released.load(Ordering::SeqCst));
        assert_eq!(session.status(), SessionStatus::Stopped);

        let again = session.stop().await;
        assert_eq!(again, stats);

        let windows = relay.await.unwrap();
        assert_eq!(windows, vec![8192, 8192]);
    }

    #[tokio::test]
    async fn test_connection_failure_sets_status_and_releases_output() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = AppConfig::default();
        config.client.server_url = format!("ws://127.0.0.1:{}/ws", port);

        let (status_tx, status_rx) = watch::channel(SessionStatus::Ready);
        let output = SharedOutput::default();
        let result = VoiceSession::start_with_status(
            &config,
            WavInput::from_samples(vec![0.0; 10], 24000, 10).unpaced(),
            output.clone(),
            Arc::new(status_tx),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(*status_rx.borrow(), SessionStatus::ConnectionError);
        assert!(output.released.load(Ordering::SeqCst));
    }
}
