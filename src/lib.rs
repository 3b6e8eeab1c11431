//! RFox Screenshot
//!
//! Render a web page into an image by driving a headless browser engine.
//! The crate owns the sequencing around the engine: session setup,
//! navigation, a cooperative event pump with timeouts, a settle wait,
//! viewport sizing, capture, scaling and encoding, and teardown on every
//! exit path.
//!
//! # Features
//!
//! - **CDP Backend** (default): drives headless Chrome over the DevTools protocol
//! - **Pluggable engines**: anything implementing [`Engine`] can be rendered with
//! - **Safe Defaults**: JavaScript and plugins off, dialogs suppressed, popups blocked
//!
//! # Example
//!
//! ```no_run
//! use rfshot::{EngineConfig, RenderRequest, Renderer, Viewport};
//! use std::time::Duration;
//!
//! # #[cfg(feature = "cdp")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = rfshot::cdp::CdpEngine::launch(EngineConfig::from_env())?;
//! let request = RenderRequest {
//!     viewport: Viewport { width: 800, height: 600 },
//!     timeout: Duration::from_secs(10),
//!     ..RenderRequest::new("http://example.com")
//! };
//!
//! let png = Renderer::new(&engine).render_to_bytes(&request)?;
//! std::fs::write("example.png", png)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "cdp"))]
//! # fn main() {}
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod encode;
pub mod engine;
pub mod orchestrator;
pub mod postprocess;
pub mod session;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly facade: a worker thread owns the engine and renders one request at a time
pub mod async_api;

pub use async_api::RenderQueue;
pub use encode::OutputFormat;
pub use engine::{DialogKind, Engine, EngineEvent, EngineSession, SessionSettings};
pub use orchestrator::{CancelToken, RenderedImage, Renderer};

/// Process-wide engine configuration
///
/// These settings are applied when the browser process is launched and hold
/// for every session opened on it. Per-render settings live in
/// [`RenderRequest`].
///
/// # Examples
///
/// ```
/// let cfg = rfshot::EngineConfig::default();
/// assert!(cfg.headless);
/// assert!(cfg.ignore_certificate_errors);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Run the browser without a visible window
    pub headless: bool,
    /// X display to run a headful browser on (sets `DISPLAY` for the child)
    pub display: Option<String>,
    /// Explicit browser binary; `None` lets the backend search for one
    pub chrome_path: Option<PathBuf>,
    /// Proxy for outbound requests, e.g. `http://proxy:3128`
    pub proxy_server: Option<String>,
    /// Start the browser in private (incognito) mode
    pub private_browsing: bool,
    /// Allow pages to open new windows
    pub allow_popups: bool,
    /// Load browser plugins
    pub enable_plugins: bool,
    /// Accept any TLS certificate. Screenshots of hosts with broken
    /// certificates are rendered instead of failing.
    pub ignore_certificate_errors: bool,
    /// Keep the browser's own process sandbox on
    pub sandbox: bool,
    /// Initial window size before content-based sizing
    pub window: Viewport,
    /// How long the browser may stay silent before it is considered dead
    pub idle_browser_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            headless: true,
            display: None,
            chrome_path: None,
            proxy_server: None,
            private_browsing: true,
            allow_popups: false,
            enable_plugins: false,
            ignore_certificate_errors: true,
            sandbox: true,
            window: Viewport {
                width: 1280,
                height: 720,
            },
            idle_browser_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Default configuration with the proxy taken from `http_proxy` (or
    /// `HTTP_PROXY`) when set.
    pub fn from_env() -> Self {
        let proxy_server = ["http_proxy", "HTTP_PROXY"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|v| !v.trim().is_empty());

        Self {
            proxy_server,
            ..Default::default()
        }
    }
}

/// Viewport dimensions. A zero side means "use the content's natural size".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Resolve against the natural content size: non-zero sides win.
    pub fn resolve(self, content: (u32, u32)) -> (u32, u32) {
        let width = if self.width > 0 { self.width } else { content.0 };
        let height = if self.height > 0 { self.height } else { content.1 };
        (width.max(1), height.max(1))
    }
}

/// Which pixels end up in the image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Only the rendered content, opaque background
    #[default]
    Frame,
    /// The whole browser window, including plugin content. The window is
    /// brought to the front first; another window can still win that race.
    WholeWindow,
    /// Only the rendered content, painted over a fully transparent background
    TransparentFrame,
}

/// How a scaled image treats the source aspect ratio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    /// Stretch to the target box
    #[default]
    Ignore,
    /// Fit inside the target box
    Keep,
    /// Cover the target box, overflowing one side
    Expand,
    /// Cover the target box, then cut the top-left target-sized region
    Crop,
}

/// Target size for post-capture scaling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSpec {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

/// What to do with JavaScript dialogs and runaway scripts
///
/// Nobody is around to click a headless dialog, so by default every dialog
/// is answered negatively the moment it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogPolicy {
    /// Dismiss `alert()` without logging its text above debug level
    pub suppress_alerts: bool,
    /// Answer `confirm()` with "cancel"
    pub suppress_confirms: bool,
    /// Answer `prompt()` with "cancel"
    pub suppress_prompts: bool,
    /// Terminate a script that is still running when capture starts
    pub allow_long_script_interrupt: bool,
}

impl Default for DialogPolicy {
    fn default() -> Self {
        Self {
            suppress_alerts: true,
            suppress_confirms: true,
            suppress_prompts: true,
            allow_long_script_interrupt: true,
        }
    }
}

/// Input to one render
///
/// Built once per render and never mutated while the render runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderRequest {
    /// Absolute URL to load
    pub url: String,
    /// Viewport override; zero sides are taken from the content size
    pub viewport: Viewport,
    /// Load deadline; zero waits forever
    pub timeout: Duration,
    /// Extra time to keep the page running after it finished loading
    pub wait: Duration,
    pub capture_mode: CaptureMode,
    pub scale: Option<ScaleSpec>,
    pub enable_javascript: bool,
    pub enable_plugins: bool,
    pub dialog_policy: DialogPolicy,
    pub output_format: OutputFormat,
    /// Turn a failed load into an error instead of capturing whatever is there
    pub fail_on_load_error: bool,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            viewport: Viewport::default(),
            timeout: Duration::ZERO,
            wait: Duration::ZERO,
            capture_mode: CaptureMode::Frame,
            scale: None,
            enable_javascript: false,
            enable_plugins: false,
            dialog_policy: DialogPolicy::default(),
            output_format: OutputFormat::default(),
            fail_on_load_error: false,
        }
    }
}

impl RenderRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parse `url` and reject anything that is not an absolute URL.
    pub fn parsed_url(&self) -> Result<url::Url> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(Error::invalid_url(raw, "empty URL"));
        }
        let parsed = url::Url::parse(raw).map_err(|e| Error::invalid_url(raw, e))?;
        if parsed.cannot_be_a_base() && parsed.scheme() != "data" && parsed.scheme() != "about" {
            return Err(Error::invalid_url(raw, "not a hierarchical URL"));
        }
        Ok(parsed)
    }

    /// Check everything that can be checked before an engine is involved.
    pub fn validate(&self) -> Result<url::Url> {
        let url = self.parsed_url()?;
        if let Some(scale) = &self.scale {
            if scale.width == 0 || scale.height == 0 {
                return Err(Error::InvalidArgs(format!(
                    "scale target must be non-zero, got {}x{}",
                    scale.width, scale.height
                )));
            }
        }
        Ok(url)
    }
}
