//! Engine lifecycle — lazy creation and suspend/resume of the audio context.
//!
//! The platform side is abstracted by [`AudioHost`]: opening a context may
//! fail outright, and resuming is asynchronous and may be refused until the
//! user has interacted with the page.

use std::future::Future;

use futures::future::ready;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::AudioError;

use super::graph::{AudioContext, ContextState};

/// Platform hooks for creating and resuming an audio context.
pub trait AudioHost {
    /// Create a new context. Contexts start suspended.
    fn open_context(&mut self, config: &EngineConfig) -> Result<AudioContext, AudioError>;

    /// Ask the platform to let a suspended context run. `user_gesture` is
    /// true when called from a click or touch handler.
    fn resume(&mut self, user_gesture: bool) -> impl Future<Output = Result<(), AudioError>>;
}

fn open_default(config: &EngineConfig) -> AudioContext {
    AudioContext::new(config.sample_rate, config.master_gain, config.noise_seed)
}

/// Always allows playback. Used for offline rendering and tests.
#[derive(Debug, Default, Clone)]
pub struct HeadlessHost;

impl AudioHost for HeadlessHost {
    fn open_context(&mut self, config: &EngineConfig) -> Result<AudioContext, AudioError> {
        Ok(open_default(config))
    }

    fn resume(&mut self, _user_gesture: bool) -> impl Future<Output = Result<(), AudioError>> {
        ready(Ok(()))
    }
}

/// Browser autoplay policy: resuming is refused until one user gesture has
/// been seen, then always allowed.
#[derive(Debug, Default, Clone)]
pub struct AutoplayHost {
    gesture_seen: bool,
}

impl AutoplayHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gesture_seen(&self) -> bool {
        self.gesture_seen
    }
}

impl AudioHost for AutoplayHost {
    fn open_context(&mut self, config: &EngineConfig) -> Result<AudioContext, AudioError> {
        Ok(open_default(config))
    }

    fn resume(&mut self, user_gesture: bool) -> impl Future<Output = Result<(), AudioError>> {
        self.gesture_seen |= user_gesture;
        if self.gesture_seen {
            ready(Ok(()))
        } else {
            ready(Err(AudioError::GraphUnavailable(
                "resume requires a user gesture".to_string(),
            )))
        }
    }
}

/// Owner of the single audio context: created on first use, never replaced
/// unless closed.
#[derive(Debug)]
pub struct EngineLifecycle<H> {
    host: H,
    config: EngineConfig,
    context: Option<AudioContext>,
    resume_attempts: u32,
}

impl<H: AudioHost> EngineLifecycle<H> {
    pub fn new(host: H, config: EngineConfig) -> Self {
        EngineLifecycle {
            host,
            config,
            context: None,
            resume_attempts: 0,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn context(&self) -> Option<&AudioContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut AudioContext> {
        self.context.as_mut()
    }

    pub fn state(&self) -> Option<ContextState> {
        self.context.as_ref().map(AudioContext::state)
    }

    /// The context, creating it if needed. A closed context is replaced.
    pub fn get_or_create(&mut self) -> Result<&mut AudioContext, AudioError> {
        if self.state() == Some(ContextState::Closed) {
            debug!("replacing closed audio context");
            self.context = None;
        }
        if self.context.is_none() {
            let ctx = self.host.open_context(&self.config).inspect_err(|e| {
                warn!(%e, "could not create audio context");
            })?;
            info!(
                sample_rate = ctx.sample_rate(),
                state = ctx.state().as_str(),
                "audio context created"
            );
            self.context = Some(ctx);
        }
        self.context
            .as_mut()
            .ok_or_else(|| AudioError::GraphUnavailable("no audio context".to_string()))
    }

    /// Make sure the context exists and is running, resuming it once if it
    /// is suspended.
    pub async fn ensure_running(&mut self) -> Result<&mut AudioContext, AudioError> {
        if self.get_or_create()?.state() != ContextState::Running {
            self.resume(false).await?;
        }
        self.context
            .as_mut()
            .ok_or_else(|| AudioError::GraphUnavailable("no audio context".to_string()))
    }

    /// Resume from a user gesture handler. Returns whether the context is
    /// running afterwards.
    pub async fn resume_on_gesture(&mut self) -> bool {
        let state = match self.get_or_create() {
            Ok(ctx) => ctx.state(),
            Err(_) => return false,
        };
        state == ContextState::Running || self.resume(true).await.is_ok()
    }

    async fn resume(&mut self, user_gesture: bool) -> Result<(), AudioError> {
        self.resume_attempts += 1;
        debug!(user_gesture, attempt = self.resume_attempts, "resuming audio context");
        if let Err(e) = self.host.resume(user_gesture).await {
            warn!(%e, "audio context resume refused");
            return Err(e);
        }
        if let Some(ctx) = self.context.as_mut() {
            ctx.set_state(ContextState::Running);
            info!(time = ctx.current_time(), "audio context running");
        }
        Ok(())
    }

    /// Pause rendering. Resources are kept.
    pub fn suspend(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            if ctx.state() == ContextState::Running {
                ctx.set_state(ContextState::Suspended);
                info!(time = ctx.current_time(), "audio context suspended");
            }
        }
    }

    /// Close the context for good. The next use creates a fresh one.
    pub fn close(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.set_state(ContextState::Closed);
            info!("audio context closed");
        }
    }
}
