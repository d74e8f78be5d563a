use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use pixels::{Pixels, SurfaceTexture};
use tracing::{debug, info, warn};
use vepstim_core::{StimulusId, StimulusKind};
use vepstim_experiment::{
    CancelFlag, DisplayConfig, DisplayError, DisplaySurface, RefreshPredictionUnavailable,
};
use vepstim_timing::{MonotonicSource, TimeSource};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, Window, WindowId},
};

use crate::scene::Scene;

/// A flip that returns sooner than this fraction of a period before the next
/// refresh was not vsync-blocked; it is paced by sleeping instead.
const EARLY_FLIP_FRACTION: f64 = 0.25;

/// Refresh after `now` on the grid that `last` lies on.
pub fn next_refresh(last: f64, period: f64, now: f64) -> f64 {
    let behind = ((now - last) / period).floor().max(0.0);
    last + (behind + 1.0) * period
}

/// Fullscreen stimulus window. Frames are composed with tiny-skia, presented
/// through `pixels` with vsync, and window events are pumped after every flip
/// so Escape and close requests reach the [`CancelFlag`] within one frame.
pub struct WindowDisplay {
    // Fields drop in declaration order: the surface before the window, the
    // window before its event loop.
    pixels: Pixels<'static>,
    window: Arc<Window>,
    event_loop: Option<EventLoop<()>>,

    scene: Scene,
    source: MonotonicSource,
    cancel: CancelFlag,
    refresh_period: Option<f64>,
    last_flip: Option<f64>,
}

impl WindowDisplay {
    pub fn open(config: &DisplayConfig, source: MonotonicSource, cancel: CancelFlag) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("cannot create event loop")?;

        // winit 0.30 only creates windows inside `resumed`; one pump gets there.
        let mut creator = Creator {
            config,
            result: None,
        };
        let _ = event_loop.pump_app_events(Some(Duration::from_millis(100)), &mut creator);
        let (window, refresh_rate) = creator
            .result
            .ok_or_else(|| anyhow!("event loop never resumed, no window"))??;

        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));
        let surface = SurfaceTexture::new(width, height, window.clone());
        let pixels = Pixels::new(width, height, surface).context("cannot create pixel surface")?;
        let scene = Scene::new(width, height, config.background)?;

        info!(
            width,
            height,
            scale_factor = window.scale_factor(),
            refresh_rate,
            "window opened"
        );

        Ok(Self {
            pixels,
            window,
            event_loop: Some(event_loop),
            scene,
            source,
            cancel,
            refresh_period: refresh_rate.filter(|r| *r > 0.0).map(|r| 1.0 / r),
            last_flip: None,
        })
    }

    /// Refresh rate reported by the monitor, if any.
    pub fn refresh_rate(&self) -> Option<f64> {
        self.refresh_period.map(|p| 1.0 / p)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.scene.width(), self.scene.height())
    }

    /// Polls pending window events without blocking.
    pub fn pump_events(&mut self) {
        if let Some(mut el) = self.event_loop.take() {
            let status = el.pump_app_events(Some(Duration::ZERO), self);
            self.event_loop = Some(el);
            if let PumpStatus::Exit(code) = status {
                debug!(code, "event loop exited");
                self.cancel.request();
            }
        }
    }
}

impl DisplaySurface for WindowDisplay {
    fn register(&mut self, name: &str, kind: &StimulusKind) -> Result<StimulusId, DisplayError> {
        let id = self.scene.add(kind).map_err(|e| DisplayError::Stimulus {
            name: name.to_string(),
            reason: format!("{e:#}"),
        })?;
        debug!(name, id = id.0, "stimulus rasterized");
        Ok(id)
    }

    fn predict_next_refresh(&self) -> Result<f64, RefreshPredictionUnavailable> {
        match (self.refresh_period, self.last_flip) {
            (Some(period), Some(last)) => Ok(next_refresh(last, period, self.source.now())),
            _ => Err(RefreshPredictionUnavailable),
        }
    }

    fn request_draw_enable(&mut self, id: StimulusId) {
        self.scene.set_drawn(id, true);
    }

    fn request_draw_disable(&mut self, id: StimulusId) {
        self.scene.set_drawn(id, false);
    }

    fn flip(&mut self) -> Result<f64, DisplayError> {
        self.scene.compose();
        let frame = self.pixels.frame_mut();
        let data = self.scene.data();
        if frame.len() != data.len() {
            return Err(DisplayError::Present(format!(
                "frame buffer is {} bytes, scene is {}",
                frame.len(),
                data.len()
            )));
        }
        frame.copy_from_slice(data);
        self.pixels
            .render()
            .map_err(|e| DisplayError::Present(e.to_string()))?;

        let mut shown = self.source.now();
        if let (Some(period), Some(last)) = (self.refresh_period, self.last_flip) {
            let due = last + period;
            if shown < due - period * EARLY_FLIP_FRACTION {
                self.source.sleep(Duration::from_secs_f64(due - shown));
                shown = self.source.now();
            }
        }
        self.last_flip = Some(shown);

        self.pump_events();
        Ok(shown)
    }
}

impl ApplicationHandler for WindowDisplay {
    fn resumed(&mut self, _: &ActiveEventLoop) {}

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                warn!("window close requested");
                self.cancel.request();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    info!("escape pressed");
                    self.cancel.request();
                }
            }
            WindowEvent::Resized(size) => {
                if let Err(e) = self.pixels.resize_surface(size.width, size.height) {
                    warn!(error = %e, "failed to resize surface");
                }
            }
            _ => {}
        }
    }
}

impl Drop for WindowDisplay {
    fn drop(&mut self) {
        self.window.set_cursor_visible(true);
    }
}

struct Creator<'a> {
    config: &'a DisplayConfig,
    result: Option<Result<(Arc<Window>, Option<f64>)>>,
}

impl ApplicationHandler for Creator<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.result.is_none() {
            self.result = Some(create_window(event_loop, self.config));
        }
    }

    fn window_event(&mut self, _: &ActiveEventLoop, _: WindowId, _: WindowEvent) {}
}

fn create_window(event_loop: &ActiveEventLoop, config: &DisplayConfig) -> Result<(Arc<Window>, Option<f64>)> {
    let monitor = event_loop
        .primary_monitor()
        .or_else(|| event_loop.available_monitors().next());
    let refresh_rate = monitor
        .as_ref()
        .and_then(|m| m.refresh_rate_millihertz())
        .map(|mhz| mhz as f64 / 1000.0);

    let mut attrs = Window::default_attributes()
        .with_title(config.title.clone())
        .with_resizable(false);
    attrs = if config.fullscreen {
        attrs.with_fullscreen(Some(Fullscreen::Borderless(monitor)))
    } else {
        attrs.with_inner_size(PhysicalSize::new(config.width, config.height))
    };

    let window = Arc::new(event_loop.create_window(attrs).context("cannot create window")?);
    window.set_cursor_visible(false);
    Ok((window, refresh_rate))
}
