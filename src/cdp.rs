//! Chrome DevTools Protocol engine (uses the `headless_chrome` crate)
//!
//! [`CdpEngine`] launches one browser process per engine and opens a fresh
//! tab for every render. DevTools events arrive on `headless_chrome`'s event
//! thread. JavaScript dialogs are answered right there, so a dialog can never
//! leave the page blocked while the render thread waits on another call.
//! Everything else is forwarded over a channel and turned into
//! [`EngineEvent`]s by [`CdpSession::pump`] on the render thread.
//!
//! `Page.navigate` only returns once the navigation commits, so it is issued
//! from a helper thread and its reply travels over the same channel. Calls
//! that need the page's renderer (layout metrics, screenshots) are given
//! [`CALL_TIMEOUT`] to answer.

use crate::engine::{DialogKind, Engine, EngineEvent, EngineSession, SessionSettings};
use crate::{CaptureMode, DialogPolicy, EngineConfig, Error, Result};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::types::Event;
use headless_chrome::protocol::cdp::{Emulation, Network, Page, Runtime, Security};
use headless_chrome::types::Bounds;
use headless_chrome::{Browser, LaunchOptions};
use image::{ImageFormat, RgbaImage};
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How long a call that needs the page's renderer may take before the
/// render gives up on it
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a `Page.navigate` call
#[derive(Debug, Clone, PartialEq, Eq)]
struct Navigation {
    frame_id: String,
    /// False for same-document navigations (fragment changes)
    new_document: bool,
    error_text: Option<String>,
}

/// What reaches the render thread from the browser
#[derive(Debug, Clone, PartialEq, Eq)]
enum RawEvent {
    FrameStartedLoading { frame_id: String },
    LoadEventFired,
    Navigated(std::result::Result<Navigation, String>),
    Response { url: String, status: u64 },
    CertificateError(String),
    DialogAnswered {
        kind: DialogKind,
        message: String,
        accepted: bool,
    },
}

impl RawEvent {
    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::PageFrameStartedLoading(e) => Some(RawEvent::FrameStartedLoading {
                frame_id: e.params.frame_id.clone(),
            }),
            Event::PageLoadEventFired(_) => Some(RawEvent::LoadEventFired),
            Event::NetworkResponseReceived(e) if log::log_enabled!(log::Level::Debug) => {
                let params = serde_json::to_value(&e.params).unwrap_or_default();
                Some(RawEvent::Response {
                    url: json_str(&params, "/response/url").unwrap_or_default(),
                    status: params
                        .pointer("/response/status")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                })
            }
            Event::VisibleSecurityStateChanged(e) => {
                let params = serde_json::to_value(&e.params).unwrap_or_default();
                json_str(
                    &params,
                    "/visibleSecurityState/certificateSecurityState/certificateNetworkError",
                )
                .map(RawEvent::CertificateError)
            }
            _ => None,
        }
    }
}

// generated parameter structs are read through JSON to stay independent of their field names
fn json_str(params: &Value, pointer: &str) -> Option<String> {
    params
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// A `Page.javascriptDialogOpening` notification
#[derive(Debug, Clone, PartialEq, Eq)]
struct DialogOpening {
    kind: Option<DialogKind>,
    message: String,
    default_prompt: Option<String>,
}

impl DialogOpening {
    fn from_params(params: &Value) -> Self {
        Self {
            kind: json_str(params, "/type")
                .as_deref()
                .and_then(DialogKind::from_protocol),
            message: json_str(params, "/message").unwrap_or_default(),
            default_prompt: json_str(params, "/defaultPrompt"),
        }
    }
}

/// The reply sent to a dialog
#[derive(Debug, Clone, PartialEq, Eq)]
struct DialogAnswer {
    /// Press OK (true) or Cancel (false)
    accept: bool,
    prompt_text: Option<String>,
    /// Whether the page sees a positive answer
    accepted: bool,
}

fn answer_for(
    kind: Option<DialogKind>,
    policy: &DialogPolicy,
    default_prompt: Option<String>,
) -> DialogAnswer {
    let suppressed = kind.map(|k| k.is_suppressed(policy)).unwrap_or(true);
    // an alert can only be closed by accepting it
    let accept = !suppressed || kind == Some(DialogKind::Alert);
    let prompt_text = match (kind, suppressed) {
        (Some(DialogKind::Prompt), false) => Some(default_prompt.unwrap_or_default()),
        _ => None,
    };
    DialogAnswer {
        accept,
        prompt_text,
        accepted: !suppressed,
    }
}

/// Turns the raw stream of one tab into load notifications for the current
/// navigation.
///
/// A load counts as finished once the main frame started loading after the
/// navigation was issued, `Page.navigate` reported no error and the load
/// event fired. Load events without a preceding main-frame start belong to
/// the previous document and are dropped.
#[derive(Debug)]
struct LoadTracker {
    main_frame: String,
    started: bool,
    loaded: bool,
    navigated: Option<bool>,
    finished: bool,
}

impl LoadTracker {
    fn new(main_frame: String) -> Self {
        Self {
            main_frame,
            started: false,
            loaded: false,
            navigated: None,
            finished: false,
        }
    }

    fn reset(&mut self) {
        self.started = false;
        self.loaded = false;
        self.navigated = None;
        self.finished = false;
    }

    fn feed(&mut self, raw: RawEvent, out: &mut Vec<EngineEvent>) {
        match raw {
            RawEvent::FrameStartedLoading { frame_id } => {
                if frame_id == self.main_frame && !self.finished {
                    self.started = true;
                    out.push(EngineEvent::LoadStarted);
                }
            }
            RawEvent::LoadEventFired => {
                if self.started {
                    self.loaded = true;
                } else {
                    debug!("ignoring load event of the previous document");
                }
            }
            RawEvent::Navigated(Ok(nav)) => {
                self.main_frame = nav.frame_id;
                match nav.error_text {
                    Some(error_text) => {
                        warn!("navigation failed: {}", error_text);
                        self.navigated = Some(false);
                    }
                    None => {
                        self.navigated = Some(true);
                        if !nav.new_document {
                            self.loaded = true;
                        }
                    }
                }
            }
            RawEvent::Navigated(Err(e)) => {
                warn!("navigation failed: {}", e);
                self.navigated = Some(false);
            }
            RawEvent::Response { url, status } => debug!("received {} {}", status, url),
            RawEvent::CertificateError(error) => {
                warn!("ignoring certificate error: {}", error)
            }
            RawEvent::DialogAnswered {
                kind,
                message,
                accepted,
            } => out.push(EngineEvent::DialogHandled {
                kind,
                message,
                accepted,
            }),
        }

        if self.finished {
            return;
        }
        match self.navigated {
            Some(false) => {
                self.finished = true;
                out.push(EngineEvent::LoadFinished { success: false });
            }
            Some(true) if self.loaded => {
                self.finished = true;
                out.push(EngineEvent::LoadFinished { success: true });
            }
            _ => {}
        }
    }
}

/// Issue a navigation without waiting for it: `navigate` runs on its own
/// thread and its outcome is sent to `events`.
fn spawn_navigation<F>(events: Sender<RawEvent>, navigate: F) -> Result<()>
where
    F: FnOnce() -> anyhow::Result<Navigation> + Send + 'static,
{
    thread::Builder::new()
        .name("rfshot-navigate".into())
        .spawn(move || {
            let outcome = navigate().map_err(|e| e.to_string());
            let _ = events.send(RawEvent::Navigated(outcome));
        })?;
    Ok(())
}

/// Run `call` on a helper thread and give up after `timeout`. An abandoned
/// call keeps its thread until the browser answers or goes away.
fn call_with_deadline<T, F>(what: &str, timeout: Duration, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("rfshot-call".into())
        .spawn(move || {
            let _ = tx.send(call());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => Ok(result?),
        Err(RecvTimeoutError::Timeout) => Err(Error::Cdp(format!(
            "{} did not answer within {:?}",
            what, timeout
        ))),
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::Cdp(format!("{} call ended without a reply", what)))
        }
    }
}

/// Headless Chrome engine runtime
///
/// Owns the browser process. Create it once, render through it with a
/// [`crate::Renderer`], and drop it (or call [`CdpEngine::close`]) at exit.
pub struct CdpEngine {
    browser: Browser,
    config: EngineConfig,
}

impl CdpEngine {
    /// Launch the browser described by `config`.
    pub fn launch(config: EngineConfig) -> Result<Self> {
        let mut args: Vec<&OsStr> = Vec::new();
        if config.private_browsing {
            args.push(OsStr::new("--incognito"));
        }
        if !config.allow_popups {
            args.push(OsStr::new("--block-new-web-contents"));
        }
        if !config.enable_plugins {
            args.push(OsStr::new("--disable-plugins"));
        }
        args.push(OsStr::new("--hide-scrollbars"));

        let envs = config.display.as_ref().map(|display| {
            let mut envs = HashMap::new();
            envs.insert("DISPLAY".to_string(), display.clone());
            envs
        });

        // The DISPLAY override only matters for a visible browser
        let headless = config.headless && config.display.is_none();

        let launch_options = LaunchOptions::default_builder()
            .headless(headless)
            .sandbox(config.sandbox)
            .window_size(Some((config.window.width, config.window.height)))
            .path(config.chrome_path.clone())
            .proxy_server(config.proxy_server.as_deref())
            .ignore_certificate_errors(config.ignore_certificate_errors)
            .idle_browser_timeout(config.idle_browser_timeout)
            .process_envs(envs)
            .args(args)
            .build()
            .map_err(|e| Error::EngineUnavailable(format!("Failed to build launch options: {}", e)))?;

        if config.ignore_certificate_errors {
            info!("TLS certificate errors will be ignored");
        }
        if let Some(proxy) = &config.proxy_server {
            debug!("using proxy {}", proxy);
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::EngineUnavailable(format!("Failed to launch browser: {}", e)))?;

        Ok(Self { browser, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shut the browser process down.
    pub fn close(self) -> Result<()> {
        // dropping the Browser kills the child process
        drop(self.browser);
        Ok(())
    }
}

impl Engine for CdpEngine {
    type Session = CdpSession;

    fn open_session(&self, settings: &SessionSettings) -> Result<CdpSession> {
        if settings.enable_plugins && !self.config.enable_plugins {
            warn!("plugins requested but the browser was launched with plugins disabled");
        }

        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::EngineUnavailable(format!("Failed to create tab: {}", e)))?;

        let (tx, rx) = mpsc::channel::<RawEvent>();
        let listener_tx: Mutex<Sender<RawEvent>> = Mutex::new(tx.clone());
        let dialog = tab.get_dialog();
        let policy = settings.dialog_policy;
        tab.add_event_listener(Arc::new(move |event: &Event| {
            let raw = match event {
                Event::PageJavascriptDialogOpening(e) => {
                    let params = serde_json::to_value(&e.params).unwrap_or_default();
                    let opening = DialogOpening::from_params(&params);
                    let answer = answer_for(opening.kind, &policy, opening.default_prompt);
                    let replied = if answer.accept {
                        dialog.accept(answer.prompt_text)
                    } else {
                        dialog.dismiss()
                    };
                    if let Err(e) = replied {
                        warn!("failed to answer {:?} dialog: {}", opening.kind, e);
                    }
                    opening.kind.map(|kind| RawEvent::DialogAnswered {
                        kind,
                        message: opening.message,
                        accepted: answer.accepted,
                    })
                }
                other => RawEvent::from_event(other),
            };
            if let Some(raw) = raw {
                if let Ok(tx) = listener_tx.lock() {
                    let _ = tx.send(raw);
                }
            }
        }))?;

        // Must happen before navigation: scripts may run while the page loads
        tab.call_method(Emulation::SetScriptExecutionDisabled {
            value: !settings.enable_javascript,
        })?;

        if settings.transparent_background {
            tab.set_transparent_background_color()?;
        }

        if let Err(e) = tab.call_method(Network::Enable {
            max_total_buffer_size: None,
            max_resource_buffer_size: None,
            max_post_data_size: None,
            report_direct_socket_traffic: None,
            enable_durable_messages: None,
        }) {
            debug!("network events unavailable: {}", e);
        }
        if let Err(e) = tab.call_method(Security::Enable(None)) {
            debug!("security events unavailable: {}", e);
        }

        // the main frame shares its id with the target
        let main_frame = tab.get_target_id().clone();

        Ok(CdpSession {
            tab: Some(tab),
            events: rx,
            events_tx: tx,
            tracker: LoadTracker::new(main_frame),
            viewport: (self.config.window.width, self.config.window.height),
        })
    }
}

/// One browser tab owned by one render
pub struct CdpSession {
    tab: Option<Arc<Tab>>,
    events: Receiver<RawEvent>,
    events_tx: Sender<RawEvent>,
    tracker: LoadTracker,
    viewport: (u32, u32),
}

impl CdpSession {
    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| Error::Other("tab already closed".into()))
    }
}

impl EngineSession for CdpSession {
    fn navigate(&mut self, url: &url::Url) -> Result<()> {
        let tab = self.tab()?.clone();

        let stale = self.events.try_iter().count();
        if stale > 0 {
            debug!("dropped {} events queued before navigation", stale);
        }
        self.tracker.reset();

        let target = url.to_string();
        spawn_navigation(self.events_tx.clone(), move || {
            let ret = tab.call_method(Page::Navigate {
                url: target,
                referrer: None,
                transition_Type: None,
                frame_id: None,
                referrer_policy: None,
            })?;
            Ok(Navigation {
                frame_id: ret.frame_id,
                new_document: ret.loader_id.is_some(),
                error_text: ret.error_text,
            })
        })
    }

    fn pump(&mut self, max_wait: Duration) -> Result<Vec<EngineEvent>> {
        let mut raw = Vec::new();
        // the session holds a sender itself, so the channel never disconnects
        if let Ok(event) = self.events.recv_timeout(max_wait) {
            raw.push(event);
        }
        raw.extend(self.events.try_iter());

        let mut out = Vec::new();
        for event in raw {
            self.tracker.feed(event, &mut out);
        }
        Ok(out)
    }

    fn content_size(&mut self) -> Result<(u32, u32)> {
        let tab = self.tab()?.clone();
        let metrics = call_with_deadline("Page.getLayoutMetrics", CALL_TIMEOUT, move || {
            tab.call_method(Page::GetLayoutMetrics(None))
        })?;
        let size = metrics.css_content_size;
        Ok((size.width.ceil() as u32, size.height.ceil() as u32))
    }

    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        self.tab()?.set_bounds(Bounds::Normal {
            left: Some(0),
            top: Some(0),
            width: Some(width as f64),
            height: Some(height as f64),
        })?;
        self.viewport = (width, height);
        Ok(())
    }

    fn interrupt_scripts(&mut self) -> Result<()> {
        self.tab()?.call_method(Runtime::TerminateExecution(None))?;
        Ok(())
    }

    fn capture(&mut self, mode: CaptureMode) -> Result<RgbaImage> {
        let tab = self.tab()?.clone();
        let (width, height) = self.viewport;
        let clip = match mode {
            CaptureMode::Frame | CaptureMode::TransparentFrame => Some(Page::Viewport {
                x: 0.0,
                y: 0.0,
                width: width as f64,
                height: height as f64,
                scale: 1.0,
            }),
            CaptureMode::WholeWindow => None,
        };

        let png = call_with_deadline("Page.captureScreenshot", CALL_TIMEOUT, move || {
            if clip.is_none() {
                // best effort: another window may still cover ours
                if let Err(e) = tab.bring_to_front() {
                    warn!("could not bring window to front: {}", e);
                }
            }
            tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, clip, true)
        })
        .map_err(|e| Error::CaptureFailed(format!("Screenshot failed: {}", e)))?;

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)
            .map_err(|e| Error::CaptureFailed(format!("Screenshot is not a valid PNG: {}", e)))?;
        Ok(decoded.to_rgba8())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(tab) = self.tab.take() {
            tab.close(false)?;
        }
        Ok(())
    }
}
