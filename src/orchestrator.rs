//! Render orchestration
//!
//! Drives one [`RenderSession`] from URL to pixels. The engine is
//! single-threaded and event-driven, so every wait in here (for the load, for
//! the settle delay, for the deadline) is a loop around
//! [`EngineSession::pump`], never a plain sleep.

use crate::encode::encode;
use crate::engine::{Engine, EngineSession, SessionSettings};
use crate::postprocess::{apply_scale, flatten_opaque, OPAQUE_BACKGROUND};
use crate::session::{Phase, RenderSession};
use crate::{CaptureMode, Error, OutputFormat, RenderRequest, Result, ScaleSpec};
use image::RgbaImage;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for a single pump step
pub const DEFAULT_PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag, checked once per pump step
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Pixels of a finished render
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub image: RgbaImage,
    /// What the engine reported for the page load
    pub load_succeeded: bool,
    pub url: String,
}

impl RenderedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resize (and possibly crop) to `spec`.
    pub fn scaled(self, spec: &ScaleSpec) -> Result<Self> {
        let image = apply_scale(&self.image, spec)?;
        Ok(Self { image, ..self })
    }

    /// Encode into an in-memory image file.
    pub fn encode(&self, format: OutputFormat) -> Result<Vec<u8>> {
        encode(&self.image, format)
    }
}

/// Renders requests on a borrowed engine, one at a time
pub struct Renderer<'a, E: Engine> {
    engine: &'a E,
    pump_interval: Duration,
}

impl<'a, E: Engine> Renderer<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self {
            engine,
            pump_interval: DEFAULT_PUMP_INTERVAL,
        }
    }

    /// Cap on how long a single pump step may block. Smaller values make
    /// timeouts and cancellation more precise.
    pub fn with_pump_interval(mut self, interval: Duration) -> Self {
        self.pump_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Load `request.url` and return the captured, scaled pixels.
    pub fn render(&self, request: &RenderRequest) -> Result<RenderedImage> {
        self.render_with_cancel(request, &CancelToken::new())
    }

    /// Like [`Renderer::render`], giving up with [`Error::Cancelled`] once
    /// `cancel` fires.
    pub fn render_with_cancel(
        &self,
        request: &RenderRequest,
        cancel: &CancelToken,
    ) -> Result<RenderedImage> {
        let url = request.validate()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!("rendering {} (timeout {:?})", url, request.timeout);
        if log::log_enabled!(log::Level::Debug) {
            if let Ok(json) = serde_json::to_string(request) {
                debug!("request: {}", json);
            }
        }

        let settings = SessionSettings::for_request(request);
        let mut session = RenderSession::open(self.engine, &settings)?;
        let captured = self.drive(&mut session, &url, request, cancel);
        let closed = session.close();
        let (image, load_succeeded) = match captured {
            Ok(captured) => captured,
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!("failed to release engine session: {}", close_err);
                }
                return Err(e);
            }
        };
        closed?;

        let rendered = RenderedImage {
            image,
            load_succeeded,
            url: url.to_string(),
        };
        match &request.scale {
            Some(spec) => rendered.scaled(spec),
            None => Ok(rendered),
        }
    }

    /// Render and encode in `request.output_format`.
    pub fn render_to_bytes(&self, request: &RenderRequest) -> Result<Vec<u8>> {
        self.render(request)?.encode(request.output_format)
    }

    /// Render, encode and write the image to `out`. Nothing is written
    /// unless the whole render succeeded.
    pub fn render_to_writer<W: Write>(&self, request: &RenderRequest, mut out: W) -> Result<()> {
        let bytes = self.render_to_bytes(request)?;
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(())
    }

    fn drive(
        &self,
        session: &mut RenderSession<E::Session>,
        url: &url::Url,
        request: &RenderRequest,
        cancel: &CancelToken,
    ) -> Result<(RgbaImage, bool)> {
        let deadline = (!request.timeout.is_zero()).then(|| Instant::now() + request.timeout);
        session.navigate(url)?;

        while session.is_loading() {
            if cancel.is_cancelled() {
                session.transition(Phase::Cancelled)?;
                return Err(Error::Cancelled);
            }
            let step = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        session.transition(Phase::TimedOut)?;
                        return Err(Error::Timeout(request.timeout));
                    }
                    (deadline - now).min(self.pump_interval)
                }
                None => self.pump_interval,
            };
            session.pump(step)?;
        }

        let load_succeeded = session.load_succeeded().unwrap_or(false);
        if !load_succeeded {
            if request.fail_on_load_error {
                session.transition(Phase::Failed)?;
                return Err(Error::LoadFailed(url.to_string()));
            }
            warn!("Failed to load {}, capturing what is there", url);
        }

        if !request.wait.is_zero() {
            session.transition(Phase::Settling)?;
            let until = Instant::now() + request.wait;
            loop {
                if cancel.is_cancelled() {
                    session.transition(Phase::Cancelled)?;
                    return Err(Error::Cancelled);
                }
                let now = Instant::now();
                if now >= until {
                    break;
                }
                session.pump((until - now).min(self.pump_interval))?;
            }
        }

        session.transition(Phase::Capturing)?;
        // a script still spinning would also stall the layout query below
        if request.enable_javascript && request.dialog_policy.allow_long_script_interrupt {
            if let Err(e) = session.engine()?.interrupt_scripts() {
                debug!("script interrupt failed: {}", e);
            }
        }

        let content = session.engine()?.content_size()?;
        let (width, height) = request.viewport.resolve(content);
        debug!(
            "content size {}x{}, viewport {}x{}",
            content.0, content.1, width, height
        );
        session.engine()?.resize_viewport(width, height)?;
        session.pump(Duration::ZERO)?;

        let mut image = session.engine()?.capture(request.capture_mode)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::CaptureFailed("engine returned an empty image".into()));
        }
        if request.capture_mode != CaptureMode::TransparentFrame {
            flatten_opaque(&mut image, OPAQUE_BACKGROUND);
        }
        session.transition(Phase::Done)?;
        Ok((image, load_succeeded))
    }
}
