// src/display.rs
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use serde::Deserialize;
use crate::config::DisplaySettings;
use crate::types::{SampleBlock, StopSignal};

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YScale {
    /// Fit the axis to the latest block, with a little headroom.
    Auto,
    /// Keep the axis at a fixed range in volts.
    Fixed { min: f64, max: f64 },
}

impl Default for YScale {
    fn default() -> Self {
        YScale::Fixed {
            min: -10.0,
            max: 10.0,
        }
    }
}

impl YScale {
    pub fn bounds(&self, series: &[f64]) -> (f64, f64) {
        match *self {
            YScale::Fixed { min, max } => (min, max),
            YScale::Auto => {
                let (min, max) = series
                    .iter()
                    .copied()
                    .filter(|v| v.is_finite())
                    .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
                if min > max {
                    return (-1.0, 1.0);
                }
                // Avoid a zero-height axis.
                let pad = ((max - min) * 0.1).max(0.05);
                (min - pad, max + pad)
            }
        }
    }
}

/// Whatever draws the live series. Only the display loop calls into it.
pub trait PlotSurface {
    fn replace_series(&mut self, samples: &[f64]);
    fn rescale(&mut self);
    fn redraw(&mut self);
    fn is_open(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishReason {
    /// The producer hung up and every queued block was shown.
    Drained,
    /// Stop was set and the producer stayed attached but silent for longer
    /// than a read can take.
    StoppedIdle,
    WindowClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayState {
    Rendered(u64),
    Waiting,
    Finished(FinishReason),
}

/// Consumer side of the block queue.
///
/// After stop the loop keeps rendering until the producer hangs up, so the
/// block that was in flight when the move finished is still shown. The idle
/// rule only ends the loop if the producer stays attached and silent for
/// longer than one DAQ read can take.
pub struct DisplayLoop {
    blocks: Receiver<SampleBlock>,
    stop: StopSignal,
    wait: Duration,
    stop_grace: Duration,
    idle_since: Option<Instant>,
    rendered: u64,
    last_sequence: Option<u64>,
    finished: Option<FinishReason>,
}

impl DisplayLoop {
    pub fn new(
        blocks: Receiver<SampleBlock>,
        stop: StopSignal,
        settings: &DisplaySettings,
        read_timeout: Duration,
    ) -> Self {
        let wait = settings.wait_interval();
        let idle = wait * settings.idle_intervals_after_stop.max(1);
        Self {
            blocks,
            stop,
            wait,
            stop_grace: idle.max(read_timeout + wait),
            idle_since: None,
            rendered: 0,
            last_sequence: None,
            finished: None,
        }
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn finished(&self) -> Option<FinishReason> {
        self.finished
    }

    /// Waits up to one interval for a block and renders it if one arrives.
    pub fn step<S: PlotSurface + ?Sized>(&mut self, surface: &mut S) -> DisplayState {
        if let Some(reason) = self.finished {
            return DisplayState::Finished(reason);
        }
        if !surface.is_open() {
            return self.finish(FinishReason::WindowClosed);
        }
        let waited_from = Instant::now();
        match self.blocks.recv_timeout(self.wait) {
            Ok(block) => self.render(surface, block),
            Err(RecvTimeoutError::Timeout) => self.idle(waited_from),
            Err(RecvTimeoutError::Disconnected) => self.finish(FinishReason::Drained),
        }
    }

    /// Renders every block already queued without blocking. Meant to be
    /// called once per GUI frame.
    pub fn poll<S: PlotSurface + ?Sized>(&mut self, surface: &mut S) -> DisplayState {
        if let Some(reason) = self.finished {
            return DisplayState::Finished(reason);
        }
        if !surface.is_open() {
            return self.finish(FinishReason::WindowClosed);
        }
        let mut state = None;
        loop {
            match self.blocks.try_recv() {
                Ok(block) => state = Some(self.render(surface, block)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return self.finish(FinishReason::Drained),
            }
        }
        match state {
            Some(state) => state,
            None => self.idle(Instant::now()),
        }
    }

    /// Drives [`DisplayLoop::step`] on the calling thread until it finishes.
    pub fn run<S: PlotSurface + ?Sized>(&mut self, surface: &mut S) -> FinishReason {
        loop {
            if let DisplayState::Finished(reason) = self.step(surface) {
                return reason;
            }
        }
    }

    fn render<S: PlotSurface + ?Sized>(&mut self, surface: &mut S, block: SampleBlock) -> DisplayState {
        self.idle_since = None;
        surface.replace_series(block.samples());
        surface.rescale();
        surface.redraw();
        self.rendered += 1;
        self.last_sequence = Some(block.sequence());
        DisplayState::Rendered(block.sequence())
    }

    fn idle(&mut self, since: Instant) -> DisplayState {
        if !self.stop.is_set() {
            return DisplayState::Waiting;
        }
        let since = *self.idle_since.get_or_insert(since);
        if since.elapsed() >= self.stop_grace {
            warn!(
                "producer still attached {:?} after stop; giving up",
                self.stop_grace
            );
            self.finish(FinishReason::StoppedIdle)
        } else {
            DisplayState::Waiting
        }
    }

    fn finish(&mut self, reason: FinishReason) -> DisplayState {
        info!(
            "display loop finished ({reason:?}) after {} blocks",
            self.rendered
        );
        self.finished = Some(reason);
        DisplayState::Finished(reason)
    }
}

/// Headless surface: keeps the latest series and logs every redraw.
pub struct TraceSurface {
    y_scale: YScale,
    series: Vec<f64>,
    y_range: (f64, f64),
    redraws: u64,
}

impl TraceSurface {
    pub fn new(y_scale: YScale) -> Self {
        Self {
            y_scale,
            series: Vec::new(),
            y_range: y_scale.bounds(&[]),
            redraws: 0,
        }
    }
    pub fn redraws(&self) -> u64 {
        self.redraws
    }
}

impl PlotSurface for TraceSurface {
    fn replace_series(&mut self, samples: &[f64]) {
        self.series.clear();
        self.series.extend_from_slice(samples);
    }
    fn rescale(&mut self) {
        self.y_range = self.y_scale.bounds(&self.series);
    }
    fn redraw(&mut self) {
        self.redraws += 1;
        let mean = if self.series.is_empty() {
            0.0
        } else {
            self.series.iter().sum::<f64>() / self.series.len() as f64
        };
        info!(
            "frame {}: {} samples, mean {:.4} V, axis {:.3}..{:.3} V",
            self.redraws,
            self.series.len(),
            mean,
            self.y_range.0,
            self.y_range.1
        );
        debug!("series head: {:?}", &self.series[..self.series.len().min(4)]);
    }
    fn is_open(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StopReason;
    use std::sync::mpsc;
    use std::thread;

    #[derive(Default)]
    struct RecordingSurface {
        current: Vec<f64>,
        frames: Vec<Vec<f64>>,
        open: bool,
    }

    impl PlotSurface for RecordingSurface {
        fn replace_series(&mut self, samples: &[f64]) {
            self.current = samples.to_vec();
        }
        fn rescale(&mut self) {}
        fn redraw(&mut self) {
            self.frames.push(self.current.clone());
        }
        fn is_open(&self) -> bool {
            self.open
        }
    }

    fn settings(wait_ms: u64, idle: u32) -> DisplaySettings {
        DisplaySettings {
            wait_interval_secs: wait_ms as f64 / 1000.0,
            idle_intervals_after_stop: idle,
            ..DisplaySettings::default()
        }
    }

    fn surface() -> RecordingSurface {
        RecordingSurface {
            open: true,
            ..RecordingSurface::default()
        }
    }

    fn display(rx: mpsc::Receiver<SampleBlock>, stop: StopSignal, s: &DisplaySettings) -> DisplayLoop {
        DisplayLoop::new(rx, stop, s, Duration::from_millis(10))
    }

    #[test]
    fn renders_blocks_in_order_then_drains() {
        let (tx, rx) = mpsc::channel();
        let stop = StopSignal::new();
        for seq in 0..3 {
            tx.send(SampleBlock::new(seq, vec![seq as f64; 4])).unwrap();
        }
        drop(tx);
        let mut display = display(rx, stop, &settings(10, 1));
        let mut surface = surface();
        assert_eq!(display.run(&mut surface), FinishReason::Drained);
        assert_eq!(display.rendered(), 3);
        assert_eq!(display.last_sequence(), Some(2));
        assert_eq!(
            surface.frames,
            vec![vec![0.0; 4], vec![1.0; 4], vec![2.0; 4]]
        );
    }

    #[test]
    fn keeps_waiting_while_running() {
        let (_tx, rx) = mpsc::channel::<SampleBlock>();
        let mut display = display(rx, StopSignal::new(), &settings(1, 1));
        let mut surface = surface();
        for _ in 0..5 {
            assert_eq!(display.step(&mut surface), DisplayState::Waiting);
        }
    }

    #[test]
    fn slow_final_block_is_rendered_with_default_settings() {
        let (tx, rx) = mpsc::channel();
        let stop = StopSignal::new();
        let defaults = DisplaySettings::default();
        // The last read outlasts several wait intervals after stop.
        let late = defaults.wait_interval() * 4;
        let producer = {
            let stop = stop.clone();
            thread::spawn(move || {
                tx.send(SampleBlock::new(0, vec![1.0; 3])).unwrap();
                stop.set(StopReason::MotionComplete);
                thread::sleep(late);
                tx.send(SampleBlock::new(1, vec![2.0; 3])).unwrap();
            })
        };
        let mut display = DisplayLoop::new(rx, stop, &defaults, Duration::from_secs(1));
        let mut surface = surface();
        assert_eq!(display.run(&mut surface), FinishReason::Drained);
        producer.join().unwrap();
        assert_eq!(surface.frames, vec![vec![1.0; 3], vec![2.0; 3]]);
    }

    #[test]
    fn silent_producer_after_stop_ends_loop_after_grace() {
        let (tx, rx) = mpsc::channel();
        let stop = StopSignal::new();
        tx.send(SampleBlock::new(0, vec![1.0])).unwrap();
        stop.set(StopReason::MotionComplete);
        // Grace is the larger of 2 x 5 ms and read timeout + one interval.
        let mut display = display(rx, stop, &settings(5, 2));
        let mut surface = surface();
        let started = Instant::now();
        assert_eq!(display.run(&mut surface), FinishReason::StoppedIdle);
        assert!(started.elapsed() >= Duration::from_millis(15));
        assert_eq!(surface.frames, vec![vec![1.0]]);
        drop(tx);
    }

    #[test]
    fn late_block_after_stop_is_still_rendered() {
        let (tx, rx) = mpsc::channel();
        let stop = StopSignal::new();
        stop.set(StopReason::MotionComplete);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(SampleBlock::new(7, vec![0.5; 2])).unwrap();
        });
        let read_timeout = Duration::from_millis(200);
        let mut display = DisplayLoop::new(rx, stop, &settings(5, 1), read_timeout);
        let mut surface = surface();
        assert_eq!(display.run(&mut surface), FinishReason::Drained);
        producer.join().unwrap();
        assert_eq!(surface.frames, vec![vec![0.5; 2]]);
    }

    #[test]
    fn poll_renders_everything_queued_without_blocking() {
        let (tx, rx) = mpsc::channel();
        let mut display = display(rx, StopSignal::new(), &settings(1000, 1));
        let mut surface = surface();

        let started = Instant::now();
        assert_eq!(display.poll(&mut surface), DisplayState::Waiting);
        for seq in 0..4 {
            tx.send(SampleBlock::new(seq, vec![seq as f64])).unwrap();
        }
        assert_eq!(display.poll(&mut surface), DisplayState::Rendered(3));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(display.rendered(), 4);
        assert_eq!(surface.frames.len(), 4);

        drop(tx);
        assert_eq!(
            display.poll(&mut surface),
            DisplayState::Finished(FinishReason::Drained)
        );
    }

    #[test]
    fn closed_window_ends_loop() {
        let (_tx, rx) = mpsc::channel::<SampleBlock>();
        let mut display = display(rx, StopSignal::new(), &settings(1, 1));
        let mut surface = RecordingSurface::default();
        assert_eq!(display.run(&mut surface), FinishReason::WindowClosed);
        assert!(surface.frames.is_empty());
    }

    #[test]
    fn y_scale_bounds() {
        let fixed = YScale::default();
        assert_eq!(fixed.bounds(&[100.0]), (-10.0, 10.0));
        let (lo, hi) = YScale::Auto.bounds(&[0.0, 1.0]);
        assert!(lo < 0.0 && hi > 1.0);
        assert_eq!(YScale::Auto.bounds(&[]), (-1.0, 1.0));
        let flat = YScale::Auto.bounds(&[2.0, 2.0]);
        assert!(flat.0 < 2.0 && flat.1 > 2.0);
    }

    #[test]
    fn trace_surface_tracks_latest_series() {
        let mut trace = TraceSurface::new(YScale::Auto);
        trace.replace_series(&[1.0, 3.0]);
        trace.rescale();
        trace.redraw();
        assert_eq!(trace.series, vec![1.0, 3.0]);
        assert_eq!(trace.redraws(), 1);
        assert!(trace.y_range.0 < 1.0 && trace.y_range.1 > 3.0);
    }
}
