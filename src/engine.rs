//! Capability surface of a browser engine
//!
//! The orchestrator only ever talks to an engine through these two traits:
//! [`Engine`] is the process-wide runtime, created once and passed around by
//! reference, and [`EngineSession`] is one page/view/window owned by exactly
//! one render.

use crate::{CaptureMode, DialogPolicy, RenderRequest, Result};
use image::RgbaImage;
use std::time::Duration;

/// Per-session settings, applied before anything is navigated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub enable_javascript: bool,
    pub enable_plugins: bool,
    pub dialog_policy: DialogPolicy,
    /// Paint the page background transparent
    pub transparent_background: bool,
}

impl SessionSettings {
    pub fn for_request(request: &RenderRequest) -> Self {
        Self {
            enable_javascript: request.enable_javascript,
            enable_plugins: request.enable_plugins,
            dialog_policy: request.dialog_policy,
            transparent_background: request.capture_mode == CaptureMode::TransparentFrame,
        }
    }
}

/// Kind of JavaScript dialog the page opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogKind {
    Alert,
    Confirm,
    Prompt,
    BeforeUnload,
}

impl DialogKind {
    /// Map a DevTools dialog type name
    pub fn from_protocol(name: &str) -> Option<Self> {
        match name {
            "alert" => Some(DialogKind::Alert),
            "confirm" => Some(DialogKind::Confirm),
            "prompt" => Some(DialogKind::Prompt),
            "beforeunload" => Some(DialogKind::BeforeUnload),
            _ => None,
        }
    }

    /// Whether `policy` wants this dialog answered negatively
    pub fn is_suppressed(self, policy: &DialogPolicy) -> bool {
        match self {
            DialogKind::Alert => policy.suppress_alerts,
            DialogKind::Confirm => policy.suppress_confirms,
            DialogKind::Prompt => policy.suppress_prompts,
            // leaving the page is never blocked
            DialogKind::BeforeUnload => false,
        }
    }
}

/// Notification produced by one pump step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The main frame started loading
    LoadStarted,
    /// The main frame finished loading
    LoadFinished { success: bool },
    /// A JavaScript dialog opened and was answered according to the policy
    DialogHandled {
        kind: DialogKind,
        message: String,
        accepted: bool,
    },
}

/// Process-wide engine runtime
pub trait Engine {
    type Session: EngineSession;

    /// Open a fresh page/view for one render.
    fn open_session(&self, settings: &SessionSettings) -> Result<Self::Session>;
}

/// One live page owned by one render
pub trait EngineSession {
    /// Start loading `url`. Returns once the navigation was issued, not when it
    /// finished; completion is reported through [`EngineSession::pump`].
    fn navigate(&mut self, url: &url::Url) -> Result<()>;

    /// Process pending engine work, waiting at most `max_wait` for something
    /// to happen, and return the notifications produced meanwhile.
    fn pump(&mut self, max_wait: Duration) -> Result<Vec<EngineEvent>>;

    /// Natural size of the loaded document in CSS pixels
    fn content_size(&mut self) -> Result<(u32, u32)>;

    /// Resize the rendering surface
    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()>;

    /// Stop whatever script is currently running in the page
    fn interrupt_scripts(&mut self) -> Result<()>;

    /// Grab the pixels selected by `mode`
    fn capture(&mut self, mode: CaptureMode) -> Result<RgbaImage>;

    /// Release the page and everything attached to it
    fn close(&mut self) -> Result<()>;
}
