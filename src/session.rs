//! A render session: one engine page plus the state of the render using it

use crate::engine::{Engine, EngineEvent, EngineSession, SessionSettings};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;

/// Where a render currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Navigating,
    LoadSucceeded,
    LoadFailed,
    TimedOut,
    Cancelled,
    Settling,
    Capturing,
    Done,
    /// The render gave up after the load failed
    Failed,
}

impl Phase {
    fn can_move_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Navigating)
                | (Navigating, LoadSucceeded | LoadFailed | TimedOut | Cancelled)
                | (LoadSucceeded | LoadFailed, Settling | Capturing | Cancelled)
                | (LoadFailed, Failed)
                | (Settling, Capturing | Cancelled)
                | (Capturing, Done)
        )
    }

    /// No further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::TimedOut | Phase::Cancelled | Phase::Failed | Phase::Done
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Exclusive owner of one engine session
///
/// The engine page is closed exactly once: either explicitly through
/// [`RenderSession::close`] or when the session is dropped on an error path.
pub struct RenderSession<S: EngineSession> {
    inner: Option<S>,
    phase: Phase,
    load_outcome: Option<bool>,
    url: String,
}

impl<S: EngineSession> RenderSession<S> {
    /// Open a new engine page configured with `settings`.
    pub fn open<E>(engine: &E, settings: &SessionSettings) -> Result<Self>
    where
        E: Engine<Session = S>,
    {
        let inner = engine.open_session(settings)?;
        debug!("session opened ({:?})", settings);
        Ok(Self {
            inner: Some(inner),
            phase: Phase::Idle,
            load_outcome: None,
            url: String::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`, rejecting transitions the render flow never makes.
    pub fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_move_to(next) {
            return Err(Error::Other(format!(
                "invalid render state transition {} -> {}",
                self.phase, next
            )));
        }
        debug!("{}: {} -> {}", self.url, self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Issue the navigation. The session counts as loading from here on,
    /// whether or not the engine already reported a load start.
    pub fn navigate(&mut self, url: &url::Url) -> Result<()> {
        self.url = url.to_string();
        self.engine()?.navigate(url)?;
        self.transition(Phase::Navigating)
    }

    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Navigating
    }

    /// Outcome of the load once the engine reported it
    pub fn load_succeeded(&self) -> Option<bool> {
        self.load_outcome
    }

    /// Run one pump step and fold its notifications into the state.
    pub fn pump(&mut self, max_wait: Duration) -> Result<()> {
        let events = self.engine()?.pump(max_wait)?;
        for event in events {
            self.apply(event)?;
        }
        Ok(())
    }

    fn apply(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::LoadStarted => debug!("{}: loading started", self.url),
            EngineEvent::LoadFinished { success } => {
                debug!("{}: loading finished with result {}", self.url, success);
                // only the first completion of the navigation counts
                if self.phase == Phase::Navigating {
                    self.load_outcome = Some(success);
                    let next = if success {
                        Phase::LoadSucceeded
                    } else {
                        Phase::LoadFailed
                    };
                    self.transition(next)?;
                }
            }
            EngineEvent::DialogHandled {
                kind,
                message,
                accepted,
            } => info!(
                "{}: {:?} dialog {} ({})",
                self.url,
                kind,
                if accepted { "accepted" } else { "dismissed" },
                message
            ),
        }
        Ok(())
    }

    /// Borrow the live engine page
    pub fn engine(&mut self) -> Result<&mut S> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::Other("render session already closed".into()))
    }

    /// Release the engine page. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut inner) => {
                debug!("{}: closing session in phase {}", self.url, self.phase);
                inner.close()
            }
            None => Ok(()),
        }
    }
}

impl<S: EngineSession> Drop for RenderSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to release engine session: {}", e);
        }
    }
}
