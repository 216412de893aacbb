// src/gui.rs
use eframe::egui;
use egui::Color32;
use egui_plot::{Line, Plot, PlotBounds, PlotPoints};
use crate::display::{DisplayLoop, DisplayState, FinishReason, PlotSurface, YScale};
use crate::types::*;

/// Live trace held between frames. The display loop writes it, the
/// egui frame reads it.
pub struct PlotView {
    y_scale: YScale,
    sample_rate_hz: f64,
    points: Vec<[f64; 2]>,
    y_bounds: (f64, f64),
    dirty: bool,
    open: bool,
}

impl PlotView {
    pub fn new(y_scale: YScale, sample_rate_hz: f64) -> Self {
        Self {
            y_scale,
            sample_rate_hz,
            points: Vec::new(),
            y_bounds: y_scale.bounds(&[]),
            dirty: false,
            open: true,
        }
    }

    /// Returns true once per redraw.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    fn x_span(&self) -> (f64, f64) {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if last[0] > first[0] => (first[0], last[0]),
            _ => (0.0, 1.0),
        }
    }

    fn show(&self, ui: &mut egui::Ui) {
        let (x0, x1) = self.x_span();
        let (y0, y1) = self.y_bounds;
        Plot::new("scan_plot")
            .view_aspect(2.0)
            .allow_drag(false)
            .allow_zoom(false)
            .allow_scroll(false)
            .x_axis_label("time in block (s)")
            .y_axis_label("voltage (V)")
            .show(ui, |plot_ui| {
                plot_ui.set_plot_bounds(PlotBounds::from_min_max([x0, y0], [x1, y1]));
                if !self.points.is_empty() {
                    plot_ui.line(
                        Line::new(PlotPoints::new(self.points.clone()))
                            .name("ai")
                            .color(Color32::from_rgb(0, 255, 255)),
                    );
                }
            });
    }
}

impl PlotSurface for PlotView {
    fn replace_series(&mut self, samples: &[f64]) {
        let dt = 1.0 / self.sample_rate_hz;
        self.points.clear();
        self.points
            .extend(samples.iter().enumerate().map(|(i, v)| [i as f64 * dt, *v]));
    }
    fn rescale(&mut self) {
        let ys: Vec<f64> = self.points.iter().map(|p| p[1]).collect();
        self.y_bounds = self.y_scale.bounds(&ys);
    }
    fn redraw(&mut self) {
        self.dirty = true;
    }
    fn is_open(&self) -> bool {
        self.open
    }
}

pub struct ScanApp {
    display: DisplayLoop,
    plot: PlotView,
    phase: PhaseTracker,
    stop: StopSignal,
    title: String,
}

impl ScanApp {
    pub fn new(
        display: DisplayLoop,
        plot: PlotView,
        phase: PhaseTracker,
        stop: StopSignal,
        title: String,
    ) -> Self {
        Self {
            display,
            plot,
            phase,
            stop,
            title,
        }
    }

    /// Pulls queued blocks into the plot. A close request ends the display
    /// loop; the run itself drains on its own.
    fn pump(&mut self, ctx: &egui::Context) -> DisplayState {
        if ctx.input(|i| i.viewport().close_requested()) {
            self.plot.close();
        }
        let state = self.display.poll(&mut self.plot);
        if self.plot.take_dirty() {
            log::trace!("frame shows block {:?}", self.display.last_sequence());
        }
        state
    }

    fn status_line(&self) -> (String, Color32) {
        match self.display.finished() {
            Some(FinishReason::Drained) | Some(FinishReason::StoppedIdle) => {
                match self.stop.reason() {
                    Some(StopReason::MotionFailed) => {
                        ("Scan aborted: motion failed".to_owned(), Color32::RED)
                    }
                    _ => ("Scan complete".to_owned(), Color32::GREEN),
                }
            }
            Some(FinishReason::WindowClosed) => ("Window closed".to_owned(), Color32::GRAY),
            None if self.stop.is_set() => ("Stopping...".to_owned(), Color32::YELLOW),
            None => (format!("Phase: {}", self.phase.current()), Color32::WHITE),
        }
    }
}

impl eframe::App for ScanApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // 1. Render whatever is queued without blocking the frame.
        if !matches!(self.pump(ctx), DisplayState::Finished(_)) {
            ctx.request_repaint();
        }

        // 2. UI
        let mut visuals = egui::Visuals::dark();
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(10, 10, 15);
        ctx.set_visuals(visuals);

        egui::TopBottomPanel::top("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading(&self.title);
                ui.separator();
                let (text, color) = self.status_line();
                ui.label(egui::RichText::new(text).strong().color(color));
                ui.separator();
                ui.label(format!("Blocks: {}", self.display.rendered()));
                if let Some(seq) = self.display.last_sequence() {
                    ui.label(format!("Last: #{seq}"));
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.plot.show(ui);
        });
    }
}
