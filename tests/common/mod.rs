//! Scripted in-process engine used by the integration tests

#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use rfshot::{CaptureMode, Engine, EngineEvent, EngineSession, Error, Result, SessionSettings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// When (and how) the fake page finishes loading
#[derive(Debug, Clone, Copy)]
pub enum LoadScript {
    /// Never finishes
    Never,
    /// Finishes on the given pump call (1-based)
    AfterPumps { pumps: usize, success: bool },
    /// Finishes once this much time passed since navigation
    AfterTime { delay: Duration, success: bool },
}

/// Shared counters, cloned into every session
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub alive: Arc<AtomicUsize>,
    pub max_alive: Arc<AtomicUsize>,
    pub pumps: Arc<AtomicUsize>,
    pub interrupts: Arc<AtomicUsize>,
    /// Interrupt count seen by the last `content_size` call
    pub interrupts_at_measure: Arc<AtomicUsize>,
    pub resized_to: Arc<Mutex<Option<(u32, u32)>>>,
    pub settings: Arc<Mutex<Option<SessionSettings>>>,
}

impl Counters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn pumps(&self) -> usize {
        self.pumps.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn interrupts_before_measure(&self) -> usize {
        self.interrupts_at_measure.load(Ordering::SeqCst)
    }

    pub fn max_alive(&self) -> usize {
        self.max_alive.load(Ordering::SeqCst)
    }

    pub fn resized_to(&self) -> Option<(u32, u32)> {
        *self.resized_to.lock().unwrap()
    }

    pub fn settings(&self) -> Option<SessionSettings> {
        *self.settings.lock().unwrap()
    }
}

/// Engine whose pages load according to a [`LoadScript`]
///
/// Captured pages have a fully transparent background with a solid red
/// 10x10 block in the top-left corner.
#[derive(Debug, Clone)]
pub struct FakeEngine {
    pub script: LoadScript,
    pub content: (u32, u32),
    /// Extra events reported on the first pump
    pub extra_events: Vec<EngineEvent>,
    pub fail_capture: bool,
    /// Report an error from `close` (after releasing the page)
    pub fail_close: bool,
    pub stats: Counters,
}

impl FakeEngine {
    pub fn new(script: LoadScript) -> Self {
        Self {
            script,
            content: (1024, 768),
            extra_events: Vec::new(),
            fail_capture: false,
            fail_close: false,
            stats: Counters::default(),
        }
    }

    pub fn loading_after(pumps: usize) -> Self {
        Self::new(LoadScript::AfterPumps {
            pumps,
            success: true,
        })
    }

    pub fn with_content(mut self, width: u32, height: u32) -> Self {
        self.content = (width, height);
        self
    }
}

impl Engine for FakeEngine {
    type Session = FakeSession;

    fn open_session(&self, settings: &SessionSettings) -> Result<FakeSession> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let alive = self.stats.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_alive.fetch_max(alive, Ordering::SeqCst);
        *self.stats.settings.lock().unwrap() = Some(*settings);

        Ok(FakeSession {
            engine: self.clone(),
            navigated_at: None,
            pumps: 0,
            finished: false,
            size: (800, 600),
            closed: false,
        })
    }
}

pub struct FakeSession {
    engine: FakeEngine,
    navigated_at: Option<Instant>,
    pumps: usize,
    finished: bool,
    size: (u32, u32),
    closed: bool,
}

impl EngineSession for FakeSession {
    fn navigate(&mut self, _url: &url::Url) -> Result<()> {
        self.navigated_at = Some(Instant::now());
        Ok(())
    }

    fn pump(&mut self, max_wait: Duration) -> Result<Vec<EngineEvent>> {
        self.pumps += 1;
        self.engine.stats.pumps.fetch_add(1, Ordering::SeqCst);

        let mut events = Vec::new();
        if self.pumps == 1 {
            events.push(EngineEvent::LoadStarted);
            events.extend(self.engine.extra_events.iter().cloned());
        }

        if !self.finished {
            let done = match self.engine.script {
                LoadScript::Never => None,
                LoadScript::AfterPumps { pumps, success } => (self.pumps >= pumps).then_some(success),
                LoadScript::AfterTime { delay, success } => {
                    let since = self.navigated_at.map(|t| t.elapsed()).unwrap_or_default();
                    if since + max_wait >= delay {
                        std::thread::sleep(delay.saturating_sub(since));
                        Some(success)
                    } else {
                        None
                    }
                }
            };
            if let Some(success) = done {
                self.finished = true;
                events.push(EngineEvent::LoadFinished { success });
                return Ok(events);
            }
        }

        std::thread::sleep(max_wait);
        Ok(events)
    }

    fn content_size(&mut self) -> Result<(u32, u32)> {
        let interrupts = self.engine.stats.interrupts.load(Ordering::SeqCst);
        self.engine
            .stats
            .interrupts_at_measure
            .store(interrupts, Ordering::SeqCst);
        Ok(self.engine.content)
    }

    fn resize_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        self.size = (width, height);
        *self.engine.stats.resized_to.lock().unwrap() = Some((width, height));
        Ok(())
    }

    fn interrupt_scripts(&mut self) -> Result<()> {
        self.engine.stats.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn capture(&mut self, _mode: CaptureMode) -> Result<RgbaImage> {
        if self.engine.fail_capture {
            return Err(Error::CaptureFailed("fake capture failure".into()));
        }
        let (w, h) = self.size;
        let mut img = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]));
        for y in 0..h.min(10) {
            for x in 0..w.min(10) {
                img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        Ok(img)
    }

    fn close(&mut self) -> Result<()> {
        assert!(!self.closed, "engine session closed twice");
        self.closed = true;
        self.engine.stats.closed.fetch_add(1, Ordering::SeqCst);
        self.engine.stats.alive.fetch_sub(1, Ordering::SeqCst);
        if self.engine.fail_close {
            return Err(Error::Other("fake close failure".into()));
        }
        Ok(())
    }
}
