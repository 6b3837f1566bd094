//! Tick-driven loop feeding captured frames through the delay buffer.

use delaycam_buffer::{DelaySettings, DelayedFeed};
use delaycam_capture::FrameSource;
use delaycam_render::FrameSink;
use delaycam_types::{frame::FrameSlot, viewport::Viewport, Result};
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{info, warn};

/// Adjustments accepted between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorCommand {
    SetDelay(u32),
    Zoom(f32),
    Pinch { scale: f32, focus: (f32, f32) },
    Pan { dx: f32, dy: f32 },
    ResetView,
    Stop,
}

/// What a single tick produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The frame with this sequence number was shown.
    Presented(u64),
    /// Not enough frames yet; nothing to show.
    Filling { filled: usize, capacity: usize },
    /// Capture failed and the sample was skipped.
    Dropped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorReport {
    pub ticks: u64,
    pub presented: u64,
    pub filling: u64,
    pub dropped: u64,
}

impl MirrorReport {
    fn record(&mut self, outcome: TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Presented(_) => self.presented += 1,
            TickOutcome::Filling { .. } => self.filling += 1,
            TickOutcome::Dropped => self.dropped += 1,
        }
    }
}

pub struct DelayMirror<S, K>
where
    S: FrameSource,
    K: FrameSink,
{
    source: S,
    sink: K,
    feed: DelayedFeed<FrameSlot>,
    viewport: Viewport,
    next_sequence: u64,
}

impl<S, K> DelayMirror<S, K>
where
    S: FrameSource,
    K: FrameSink,
{
    pub fn new(settings: DelaySettings, source: S, sink: K) -> Result<Self> {
        Ok(Self {
            source,
            sink,
            feed: DelayedFeed::new(settings)?,
            viewport: Viewport::default(),
            next_sequence: 0,
        })
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn settings(&self) -> DelaySettings {
        self.feed.settings()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Samples one frame and shows whatever the buffer yields for this tick.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let frame = match self.source.capture_frame().await {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Dropping sample {}: {err}", self.next_sequence);
                return Ok(TickOutcome::Dropped);
            }
        };
        self.feed.push(FrameSlot::new(self.next_sequence, frame));
        self.next_sequence += 1;

        match self.feed.read_delayed() {
            Some(slot) => {
                self.sink.present(slot, &self.viewport).await?;
                Ok(TickOutcome::Presented(slot.sequence))
            }
            None => {
                let (filled, capacity) = (self.feed.filled(), self.feed.capacity());
                self.sink.waiting(filled, capacity).await?;
                Ok(TickOutcome::Filling { filled, capacity })
            }
        }
    }

    /// Applies a command; returns false when the loop should stop.
    pub fn apply(&mut self, command: MirrorCommand) -> Result<bool> {
        match command {
            MirrorCommand::SetDelay(secs) => {
                self.feed.set_delay(secs)?;
            }
            MirrorCommand::Zoom(zoom) => self.viewport.set_zoom(zoom),
            MirrorCommand::Pinch { scale, focus } => self.viewport.pinch(scale, focus),
            MirrorCommand::Pan { dx, dy } => self.viewport.pan(dx, dy),
            MirrorCommand::ResetView => self.viewport.reset(),
            MirrorCommand::Stop => return Ok(false),
        }
        Ok(true)
    }

    /// Runs at the configured frame rate until `max_ticks` is reached, a
    /// `Stop` command arrives, or (with no tick limit) the command channel closes.
    pub async fn run(
        &mut self,
        max_ticks: Option<u64>,
        mut commands: Option<mpsc::Receiver<MirrorCommand>>,
    ) -> Result<MirrorReport> {
        self.source.open().await?;
        let settings = self.feed.settings();
        info!(
            "Mirroring at {} fps with {}s delay ({} frames)",
            settings.frame_rate(),
            settings.delay_secs(),
            settings.capacity()
        );

        let mut ticker = interval(settings.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut report = MirrorReport::default();

        loop {
            if max_ticks.is_some_and(|limit| report.ticks >= limit) {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.tick().await?;
                    report.record(outcome);
                }
                command = next_command(&mut commands) => match command {
                    Some(command) => {
                        match self.apply(command) {
                            Ok(true) => {}
                            Ok(false) => break,
                            Err(err) => warn!("Ignoring command: {err}"),
                        }
                    }
                    None => {
                        commands = None;
                        if max_ticks.is_none() {
                            break;
                        }
                    }
                },
            }
        }

        info!(
            ticks = report.ticks,
            presented = report.presented,
            dropped = report.dropped,
            "Mirror stopped"
        );
        Ok(report)
    }
}

async fn next_command(
    commands: &mut Option<mpsc::Receiver<MirrorCommand>>,
) -> Option<MirrorCommand> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use delaycam_capture::{capture_error, CaptureMetrics};
    use delaycam_render::RenderStats;
    use delaycam_types::frame::ImageFrame;

    /// Emits 1x1 frames whose red channel is the sample counter; fails on
    /// every sample listed in `fail_on`.
    struct CountingSource {
        counter: u64,
        fail_on: Vec<u64>,
        metrics: CaptureMetrics,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                counter: 0,
                fail_on: Vec::new(),
                metrics: CaptureMetrics::default(),
            }
        }
    }

    #[async_trait]
    impl FrameSource for CountingSource {
        async fn open(&mut self) -> Result<()> {
            Ok(())
        }

        async fn capture_frame(&mut self) -> Result<ImageFrame> {
            let n = self.counter;
            self.counter += 1;
            if self.fail_on.contains(&n) {
                self.metrics.failed += 1;
                return Err(capture_error("camera hiccup"));
            }
            self.metrics.captured += 1;
            Ok(ImageFrame::from_rgba(1, 1, vec![n as u8, 0, 0, 255]))
        }

        fn metrics(&self) -> CaptureMetrics {
            self.metrics
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        shown: Vec<u64>,
        zooms: Vec<f32>,
        stats: RenderStats,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn present(&mut self, slot: &FrameSlot, viewport: &Viewport) -> Result<()> {
            self.shown.push(slot.sequence);
            self.zooms.push(viewport.zoom());
            self.stats.presented += 1;
            Ok(())
        }

        async fn waiting(&mut self, _filled: usize, _capacity: usize) -> Result<()> {
            self.stats.waiting += 1;
            Ok(())
        }

        fn stats(&self) -> RenderStats {
            self.stats
        }
    }

    fn mirror(rate: u32, delay: u32) -> DelayMirror<CountingSource, RecordingSink> {
        DelayMirror::new(
            DelaySettings::new(rate, delay).unwrap(),
            CountingSource::new(),
            RecordingSink::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn presents_frames_one_delay_behind() {
        let mut mirror = mirror(2, 10);
        for _ in 0..19 {
            assert!(matches!(
                mirror.tick().await.unwrap(),
                TickOutcome::Filling { capacity: 20, .. }
            ));
        }
        assert_eq!(mirror.tick().await.unwrap(), TickOutcome::Presented(0));
        assert_eq!(mirror.tick().await.unwrap(), TickOutcome::Presented(1));
        assert_eq!(mirror.sink().shown, vec![0, 1]);
        assert_eq!(mirror.sink().stats().waiting, 19);
    }

    #[tokio::test]
    async fn capture_failure_drops_the_sample() {
        let mut mirror = mirror(1, 10);
        mirror.source.fail_on = vec![3];
        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(mirror.tick().await.unwrap());
        }
        assert_eq!(outcomes[3], TickOutcome::Dropped);
        assert_eq!(mirror.feed.filled(), 4);
        assert_eq!(mirror.source().metrics().failed, 1);
    }

    #[tokio::test]
    async fn delay_change_restarts_filling() {
        let mut mirror = mirror(1, 10);
        for _ in 0..10 {
            mirror.tick().await.unwrap();
        }
        assert!(mirror.apply(MirrorCommand::SetDelay(11)).unwrap());
        assert_eq!(mirror.settings().capacity(), 11);
        assert_eq!(
            mirror.tick().await.unwrap(),
            TickOutcome::Filling {
                filled: 1,
                capacity: 11
            }
        );
        assert!(mirror.apply(MirrorCommand::SetDelay(5)).is_err());
    }

    #[tokio::test]
    async fn view_commands_reach_the_sink() {
        let mut mirror = mirror(1, 10);
        mirror.apply(MirrorCommand::Zoom(3.0)).unwrap();
        mirror
            .apply(MirrorCommand::Pan { dx: 0.5, dy: 0.0 })
            .unwrap();
        for _ in 0..10 {
            mirror.tick().await.unwrap();
        }
        assert_eq!(mirror.sink().zooms, vec![3.0]);
        mirror.apply(MirrorCommand::ResetView).unwrap();
        assert!(mirror.viewport().is_identity());
        assert!(!mirror.apply(MirrorCommand::Stop).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_after_tick_limit() {
        let mut mirror = mirror(5, 10);
        let report = mirror.run(Some(60), None).await.unwrap();
        assert_eq!(
            report,
            MirrorReport {
                ticks: 60,
                presented: 11,
                filling: 49,
                dropped: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_honours_stop_command() {
        let mut mirror = mirror(5, 10);
        let (tx, rx) = mpsc::channel(4);
        tx.send(MirrorCommand::Zoom(2.0)).await.unwrap();
        tx.send(MirrorCommand::Stop).await.unwrap();
        let report = mirror.run(None, Some(rx)).await.unwrap();
        assert!(report.ticks <= 2);
        assert_eq!(mirror.viewport().zoom(), 2.0);
    }
}
