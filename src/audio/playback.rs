//! # Receive Queue and Playback Scheduler
//!
//! Inbound audio chunks are queued in arrival order and played one at a time
//! by a single consumer task.
//!
//! ## Guarantees:
//! - **FIFO**: chunks play in exactly the order they were enqueued
//! - **No overlap**: the next chunk starts only after the current one has
//!   finished playing or failed, because one task awaits each `play` call
//! - **Failure isolation**: a chunk that fails to decode or play is logged
//!   and dropped, and the next chunk plays normally (at-most-once, no retry)
//!
//! ## State Machine:
//! ```text
//! Idle ──dequeue + decode ok──▶ Playing
//! Playing ──play finished / failed──▶ Idle
//! Idle ──queue empty──▶ Idle
//! ```

use crate::audio::device::{AudioOutput, PlayableBuffer};
use crate::audio::pcm;
use crate::error::{PipelineError, PipelineResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// One unit of inbound audio: raw PCM16 LE bytes tagged with arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub sequence: u64,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
}

/// Counters shared between the scheduler task and its handle.
#[derive(Debug, Default)]
struct PlaybackCounters {
    played: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of playback progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub played: u64,
    pub failed: u64,
}

impl PlaybackCounters {
    fn snapshot(&self) -> PlaybackStats {
        PlaybackStats {
            played: self.played.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Producer side of the receive queue.
///
/// Dropping every `ReceiveQueue` lets the scheduler drain what is queued and
/// then stop.
#[derive(Debug)]
pub struct ReceiveQueue {
    tx: mpsc::Sender<EncodedChunk>,
    next_sequence: u64,
}

impl ReceiveQueue {
    /// Append a chunk to the tail of the queue.
    ///
    /// Waits when the queue is at capacity, which slows down the socket reader
    /// instead of growing memory without bound.
    pub async fn enqueue(&mut self, bytes: Vec<u8>) -> PipelineResult<u64> {
        let sequence = self.next_sequence;
        self.tx
            .send(EncodedChunk { sequence, bytes })
            .await
            .map_err(|_| PipelineError::Playback("playback scheduler has stopped".to_string()))?;
        self.next_sequence += 1;
        Ok(sequence)
    }

    /// Number of chunks enqueued so far.
    pub fn enqueued(&self) -> u64 {
        self.next_sequence
    }
}

/// Control side of a running playback scheduler.
pub struct PlaybackHandle {
    state: watch::Receiver<PlaybackState>,
    counters: Arc<PlaybackCounters>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PlaybackHandle {
    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.counters.snapshot()
    }

    /// Wait for the queue to drain after every producer has been dropped.
    pub async fn finish(self) -> PlaybackStats {
        if let Err(e) = self.task.await {
            warn!("Playback task ended abnormally: {}", e);
        }
        self.counters.snapshot()
    }

    /// Stop playback now, discarding anything still queued, and release the
    /// output device.
    pub async fn stop(self) -> PlaybackStats {
        let _ = self.stop.send(true);
        self.finish().await
    }
}

/// The single consumer that drains the receive queue.
pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    sample_rate: u32,
    state: watch::Sender<PlaybackState>,
    counters: Arc<PlaybackCounters>,
}

impl<O: AudioOutput + 'static> PlaybackScheduler<O> {
    /// Start a scheduler task playing into `output`.
    ///
    /// ## Returns:
    /// - the [`ReceiveQueue`] producers push chunks into
    /// - the [`PlaybackHandle`] used to observe, drain or stop playback
    pub fn spawn(output: O, sample_rate: u32, capacity: usize) -> (ReceiveQueue, PlaybackHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);
        let counters = Arc::new(PlaybackCounters::default());

        let scheduler = PlaybackScheduler {
            output,
            sample_rate,
            state: state_tx,
            counters: counters.clone(),
        };
        let task = tokio::spawn(scheduler.run(rx, stop_rx));

        let queue = ReceiveQueue {
            tx,
            next_sequence: 0,
        };
        let handle = PlaybackHandle {
            state: state_rx,
            counters,
            stop: stop_tx,
            task,
        };
        (queue, handle)
    }

    async fn run(mut self, rx: mpsc::Receiver<EncodedChunk>, mut stop: watch::Receiver<bool>) {
        let mut chunks = ReceiverStream::new(rx);

        loop {
            let chunk = tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                next = chunks.next() => match next {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break,
                _ = self.play_chunk(chunk) => {}
            }
        }

        self.state.send_replace(PlaybackState::Idle);
        if let Err(e) = self.output.release().await {
            warn!("Failed to release audio output: {}", e);
        }
        debug!("Playback scheduler stopped: {:?}", self.counters.snapshot());
    }

    async fn play_chunk(&mut self, chunk: EncodedChunk) {
        let samples = match pcm::decode_pcm16(&chunk.bytes) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(sequence = chunk.sequence, "Dropping audio chunk: {}", e);
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        self.state.send_replace(PlaybackState::Playing);
        debug!(sequence = chunk.sequence, samples = samples.len(), "Playing audio chunk");

        let result = self
            .output
            .play(PlayableBuffer {
                sequence: chunk.sequence,
                samples,
                sample_rate: self.sample_rate,
            })
            .await;

        self.state.send_replace(PlaybackState::Idle);

        match result {
            Ok(()) => {
                self.counters.played.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(sequence = chunk.sequence, "Audio chunk playback error: {}", e);
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records play order and the peak number of concurrently active plays.
    #[derive(Clone, Default)]
    struct RecordingOutput {
        played: Arc<Mutex<Vec<u64>>>,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        fail_sequence: Option<u64>,
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AudioOutput for RecordingOutput {
        async fn play(&mut self, buffer: PlayableBuffer) -> PipelineResult<()> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);

            // Vary latency so that any overlap or reordering would show up.
            let delay = [3u64, 1, 5, 0, 2][buffer.sequence as usize % 5];
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
            if Some(buffer.sequence) == self.fail_sequence {
                return Err(PipelineError::Playback("device error".to_string()));
            }
            self.played.lock().unwrap().push(buffer.sequence);
            Ok(())
        }

        async fn release(&mut self) -> PipelineResult<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn pcm_chunk(value: f32, len: usize) -> Vec<u8> {
        pcm::encode_pcm16(&vec![value; len])
    }

    #[tokio::test]
    async fn test_plays_in_enqueue_order_without_overlap() {
        let output = RecordingOutput::default();
        let (mut queue, handle) = PlaybackScheduler::spawn(output.clone(), 24000, 4);

        for _ in 0..20 {
            queue.enqueue(pcm_chunk(0.1, 48)).await.unwrap();
        }
        drop(queue);
        let stats = handle.finish().await;

        assert_eq!(stats, PlaybackStats { played: 20, failed: 0 });
        assert_eq!(*output.played.lock().unwrap(), (0..20).collect::<Vec<u64>>());
        assert_eq!(output.peak.load(Ordering::SeqCst), 1);
        assert_eq!(output.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_block_next_chunk() {
        let output = RecordingOutput::default();
        let (mut queue, handle) = PlaybackScheduler::spawn(output.clone(), 24000, 8);

        queue.enqueue(pcm_chunk(0.2, 10)).await.unwrap();
        queue.enqueue(vec![0x01, 0x02, 0x03]).await.unwrap();
        queue.enqueue(pcm_chunk(0.3, 10)).await.unwrap();
        drop(queue);
        let stats = handle.finish().await;

        assert_eq!(stats, PlaybackStats { played: 2, failed: 1 });
        assert_eq!(*output.played.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_playback_error_does_not_block_next_chunk() {
        let output = RecordingOutput {
            fail_sequence: Some(1),
            ..Default::default()
        };
        let (mut queue, handle) = PlaybackScheduler::spawn(output.clone(), 24000, 8);

        for _ in 0..3 {
            queue.enqueue(pcm_chunk(0.0, 10)).await.unwrap();
        }
        drop(queue);
        let stats = handle.finish().await;

        assert_eq!(stats, PlaybackStats { played: 2, failed: 1 });
        assert_eq!(*output.played.lock().unwrap(), vec![0, 2]);
    }

    #[tokio::test]
    async fn test_stop_discards_queue_and_releases_output() {
        let output = RecordingOutput::default();
        let (mut queue, handle) = PlaybackScheduler::spawn(output.clone(), 24000, 64);

        for _ in 0..50 {
            queue.enqueue(pcm_chunk(0.0, 10)).await.unwrap();
        }
        let stats = handle.stop().await;

        assert!(stats.played < 50);
        assert_eq!(output.released.load(Ordering::SeqCst), 1);
        assert!(queue.enqueue(pcm_chunk(0.0, 10)).await.is_err());
    }

    #[tokio::test]
    async fn test_state_starts_idle_and_returns_to_idle() {
        let output = RecordingOutput::default();
        let (mut queue, handle) = PlaybackScheduler::spawn(output, 24000, 4);
        assert_eq!(handle.state(), PlaybackState::Idle);

        let mut states = handle.watch_state();
        queue.enqueue(pcm_chunk(0.5, 10)).await.unwrap();
        states
            .wait_for(|state| *state == PlaybackState::Playing)
            .await
            .unwrap();

        drop(queue);
        let stats = handle.finish().await;
        assert_eq!(stats.played, 1);
        assert_eq!(*states.borrow(), PlaybackState::Idle);
    }
}
