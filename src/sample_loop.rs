//! Periodic capture -> decode -> reduce -> smooth -> dispatch
//!
//! The interval is the only backpressure: no queue, no catch-up bursts. A
//! failing stage costs its tick and nothing more. The loop only leaves
//! `Running` when the stop signal fires.

use crate::bulb::ColorSink;
use crate::capture::FrameSource;
use crate::color::Rgb;
use crate::decode::FrameDecoder;
use crate::error::AppError;
use crate::reduce::ColorReducer;
use crate::smoothing::Smoother;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub sent: u64,
    pub capture_failures: u64,
    pub decode_failures: u64,
    pub reduce_failures: u64,
    pub transmit_failures: u64,
}

impl LoopStats {
    pub fn skipped(&self) -> u64 {
        self.capture_failures + self.decode_failures + self.reduce_failures
    }
}

/// Resolves once the flag is set or the sender is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Stage a tick failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Capture,
    Decode,
    Reduce,
    Transmit,
}

pub struct SampleLoop {
    source: Box<dyn FrameSource>,
    decoder: Box<dyn FrameDecoder>,
    reducer: ColorReducer,
    smoother: Smoother,
    sink: Box<dyn ColorSink>,
    interval: Duration,
    state: LoopState,
    stats: LoopStats,
    /// Consecutive failed ticks, for log throttling
    failure_streak: u64,
}

impl SampleLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        decoder: Box<dyn FrameDecoder>,
        reducer: ColorReducer,
        smoother: Smoother,
        sink: Box<dyn ColorSink>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            decoder,
            reducer,
            smoother,
            sink,
            interval,
            state: LoopState::Running,
            stats: LoopStats::default(),
            failure_streak: 0,
        }
    }

    /// Tick until `stop` turns true (or its sender is dropped)
    ///
    /// The stop flag is only looked at between ticks; a tick in flight runs to
    /// completion, bounded by the capture and send timeouts.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> LoopStats {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state == LoopState::Running {
            tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => {
                    self.state = LoopState::Stopped;
                }
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    self.record(outcome);
                }
            }
        }

        tracing::info!(
            "Sample loop stopped: {} ticks, {} sent, {} skipped, {} send failures, last color {:?}",
            self.stats.ticks,
            self.stats.sent,
            self.stats.skipped(),
            self.stats.transmit_failures,
            self.smoother.state()
        );

        self.stats
    }

    /// One full pass of the pipeline; the frame is dropped before dispatch
    async fn tick(&mut self) -> Result<Rgb, (Stage, AppError)> {
        let bytes = self
            .source
            .capture()
            .await
            .map_err(|e| (Stage::Capture, e))?;

        let reduced = {
            let frame = self.decoder.decode(&bytes).map_err(|e| (Stage::Decode, e))?;
            self.reducer.reduce(&frame).map_err(|e| (Stage::Reduce, e))?
        };

        let color = self.smoother.smooth(reduced);

        self.sink
            .send(color)
            .await
            .map_err(|e| (Stage::Transmit, e))?;

        Ok(color)
    }

    fn record(&mut self, outcome: Result<Rgb, (Stage, AppError)>) {
        self.stats.ticks += 1;

        match outcome {
            Ok(color) => {
                self.stats.sent += 1;
                if self.failure_streak > 0 {
                    tracing::info!("Recovered after {} failed ticks", self.failure_streak);
                    self.failure_streak = 0;
                }
                tracing::debug!("{}", color);
            }
            Err((stage, err)) => {
                match stage {
                    Stage::Capture => self.stats.capture_failures += 1,
                    Stage::Decode => self.stats.decode_failures += 1,
                    Stage::Reduce => self.stats.reduce_failures += 1,
                    Stage::Transmit => self.stats.transmit_failures += 1,
                }

                self.failure_streak += 1;
                if self.failure_streak == 1 {
                    tracing::warn!("Tick {} failed: {}", self.stats.ticks, err);
                } else {
                    tracing::debug!(
                        "Tick {} failed ({} in a row): {}",
                        self.stats.ticks,
                        self.failure_streak,
                        err
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::Frame;
    use crate::reduce::ShapingConfig;
    use async_trait::async_trait;
    use image::RgbImage;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const INTERVAL: Duration = Duration::from_millis(100);

    /// Marker bytes [`SolidDecoder`] turns into a 0x0 frame
    const BLANK_FRAME: &[u8] = &[0];

    /// Captures a frame on every call except the listed (1-based) ones
    #[derive(Default)]
    struct ScriptedSource {
        calls: AtomicU64,
        fail_on: HashSet<u64>,
        empty_on: HashSet<u64>,
        blank_on: HashSet<u64>,
    }

    impl ScriptedSource {
        /// Capture errors on `calls`
        fn failing_on(calls: &[u64]) -> Self {
            Self {
                fail_on: calls.iter().copied().collect(),
                ..Self::default()
            }
        }

        /// Zero bytes on `calls`, which the decoder rejects
        fn empty_on(calls: &[u64]) -> Self {
            Self {
                empty_on: calls.iter().copied().collect(),
                ..Self::default()
            }
        }

        /// A frame with no pixels on `calls`, which the reducer rejects
        fn blank_on(calls: &[u64]) -> Self {
            Self {
                blank_on: calls.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn capture(&self) -> Result<Vec<u8>, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                Err(AppError::Capture(format!("scripted failure on call {}", call)))
            } else if self.empty_on.contains(&call) {
                Ok(Vec::new())
            } else if self.blank_on.contains(&call) {
                Ok(BLANK_FRAME.to_vec())
            } else {
                Ok(vec![1])
            }
        }
    }

    /// Hands back a solid frame; empty bytes fail, [`BLANK_FRAME`] decodes to 0x0
    struct SolidDecoder([u8; 3]);

    impl FrameDecoder for SolidDecoder {
        fn decode(&self, bytes: &[u8]) -> Result<Frame, AppError> {
            if bytes.is_empty() {
                return Err(AppError::Decode("empty".into()));
            }
            if bytes == BLANK_FRAME {
                return Ok(RgbImage::new(0, 0));
            }
            Ok(RgbImage::from_pixel(32, 18, image::Rgb(self.0)))
        }
    }

    /// Records sends and raises the stop flag after `stop_after` attempts
    struct RecordingSink {
        sent: Arc<Mutex<Vec<Rgb>>>,
        attempts: AtomicU64,
        stop_after: u64,
        fail: bool,
        stop: watch::Sender<bool>,
    }

    #[async_trait]
    impl ColorSink for RecordingSink {
        async fn send(&self, color: Rgb) -> Result<(), AppError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt >= self.stop_after {
                let _ = self.stop.send(true);
            }
            if self.fail {
                return Err(AppError::Transmit("no route to host".into()));
            }
            self.sent.lock().unwrap().push(color);
            Ok(())
        }
    }

    struct Harness {
        sample_loop: SampleLoop,
        stop_rx: watch::Receiver<bool>,
        sent: Arc<Mutex<Vec<Rgb>>>,
    }

    fn harness(source: ScriptedSource, stop_after: u64, fail_sends: bool) -> Harness {
        let (stop_tx, stop_rx) = watch::channel(false);
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            sent: sent.clone(),
            attempts: AtomicU64::new(0),
            stop_after,
            fail: fail_sends,
            stop: stop_tx,
        };

        let sample_loop = SampleLoop::new(
            Box::new(source),
            Box::new(SolidDecoder([255, 0, 0])),
            ColorReducer::new(ShapingConfig::default()),
            Smoother::new(0.5),
            Box::new(sink),
            INTERVAL,
        );

        Harness {
            sample_loop,
            stop_rx,
            sent,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_matches_interval() {
        let h = harness(ScriptedSource::failing_on(&[]), 10, false);
        let started = Instant::now();
        let stats = h.sample_loop.run(h.stop_rx).await;
        let elapsed = started.elapsed();

        assert_eq!(stats.ticks, 10);
        assert_eq!(stats.sent, 10);
        // first tick fires immediately, so ten ticks span nine intervals
        assert!(elapsed >= INTERVAL * 9, "ran too fast: {:?}", elapsed);
        assert!(elapsed <= INTERVAL * 10, "ran too slow: {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_failure_skips_one_tick() {
        let h = harness(ScriptedSource::failing_on(&[2]), 4, false);

        let started = Instant::now();
        let stats = h.sample_loop.run(h.stop_rx).await;

        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.capture_failures, 1);
        assert_eq!(stats.skipped(), 1);
        // the failed tick did not delay or hurry the schedule
        assert_eq!(started.elapsed(), INTERVAL * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_capture_skips_one_tick() {
        let h = harness(ScriptedSource::empty_on(&[2]), 3, false);

        let started = Instant::now();
        let stats = h.sample_loop.run(h.stop_rx).await;

        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.capture_failures + stats.reduce_failures, 0);
        assert_eq!(h.sent.lock().unwrap().len(), 3);
        assert_eq!(started.elapsed(), INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_frame_skips_one_tick() {
        let h = harness(ScriptedSource::blank_on(&[2, 4]), 3, false);

        let started = Instant::now();
        let stats = h.sample_loop.run(h.stop_rx).await;

        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.reduce_failures, 2);
        assert_eq!(stats.decode_failures, 0);
        assert_eq!(stats.skipped(), 2);
        assert_eq!(started.elapsed(), INTERVAL * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_failures_do_not_stop_the_loop() {
        let h = harness(ScriptedSource::failing_on(&[]), 3, true);

        let stats = h.sample_loop.run(h.stop_rx).await;

        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.transmit_failures, 3);
        assert!(h.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_dispatch_is_unsmoothed_sample() {
        let h = harness(ScriptedSource::failing_on(&[1, 2]), 2, false);
        let stats = h.sample_loop.run(h.stop_rx).await;

        // two capture failures never reach the smoother, so nothing is invented
        assert_eq!(stats.capture_failures, 2);
        let sent = h.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].r >= 235 && sent[0].g <= 5 && sent[0].b <= 5);
        assert_eq!(sent[0], sent[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick() {
        let h = harness(ScriptedSource::failing_on(&[]), u64::MAX, false);
        let (stop_tx, stop_rx) = watch::channel(true);

        let stats = h.sample_loop.run(stop_rx).await;
        drop(stop_tx);

        assert_eq!(stats, LoopStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_stop_sender_stops_loop() {
        let h = harness(ScriptedSource::failing_on(&[]), u64::MAX, false);
        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);

        let stats = h.sample_loop.run(stop_rx).await;
        assert_eq!(stats.ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_stop_signal() {
        let h = harness(ScriptedSource::failing_on(&[]), u64::MAX, false);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(h.sample_loop.run(stop_rx));
        tokio::time::sleep(INTERVAL * 3 + INTERVAL / 2).await;
        stop_tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        // ticks at 0, 100, 200 and 300 ms
        assert_eq!(stats.ticks, 4);
        assert_eq!(h.sent.lock().unwrap().len(), 4);
    }
}
