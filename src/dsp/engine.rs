//! Playback engine — turns note requests into voices on the audio context.
//!
//! Playback is monophonic: every new note first terminates whatever is
//! still sounding, so only the most recent note plays to completion. The
//! engine owns the lifecycle manager, the voice registry and the timbre
//! table; hosts pull rendered audio through [`PlaybackEngine::render`],
//! which is also where expired voices are swept.

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{AudioError, NodeError};
use crate::instrument::{NoteRequest, Style};

use super::envelope::apply_envelope;
use super::graph::{AudioContext, ContextState, NodeId, ParamName, RENDER_QUANTUM};
use super::lifecycle::{AudioHost, EngineLifecycle};
use super::oscillator::Waveform;
use super::pitch;
use super::timbre::{ChainInput, TimbreTable};
use super::voice::{Voice, VoiceId, VoiceRegistry};

/// Level of the near-silent tone played when audio is first initialised.
const WAKE_UP_LEVEL: f64 = 1e-5;
const WAKE_UP_SECONDS: f64 = 0.1;
const WAKE_UP_HZ: f64 = 440.0;

pub struct PlaybackEngine<H> {
    lifecycle: EngineLifecycle<H>,
    registry: VoiceRegistry,
    timbres: TimbreTable,
    config: EngineConfig,
    wake_up: Option<VoiceId>,
    scratch: Vec<f32>,
}

impl<H: AudioHost> PlaybackEngine<H> {
    pub fn new(host: H, config: EngineConfig) -> Self {
        let config = config.validated();
        PlaybackEngine {
            lifecycle: EngineLifecycle::new(host, config.clone()),
            registry: VoiceRegistry::new(),
            timbres: TimbreTable::standard(),
            config,
            wake_up: None,
            scratch: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &EngineLifecycle<H> {
        &self.lifecycle
    }

    pub fn registry(&self) -> &VoiceRegistry {
        &self.registry
    }

    /// Diagnostic access to the context, if one has been created.
    pub fn audio_context(&self) -> Option<&AudioContext> {
        self.lifecycle.context()
    }

    pub fn audio_context_state(&self) -> Option<ContextState> {
        self.lifecycle.state()
    }

    /// Create the context, try to start it and schedule a near-silent
    /// wake-up tone.
    ///
    /// A refused resume is logged and the context stays suspended until
    /// [`unlock_audio_context`](Self::unlock_audio_context); the tone plays
    /// once it runs. Only a context that cannot be created is an error.
    /// Once running, further calls do nothing.
    pub async fn initialize_audio(&mut self) -> Result<(), AudioError> {
        if self.lifecycle.state() == Some(ContextState::Running) {
            debug!("audio already initialized");
            return Ok(());
        }
        if let Err(e) = self.lifecycle.ensure_running().await {
            if self.lifecycle.context().is_none() {
                return Err(e);
            }
            warn!(%e, "audio context left suspended until a user gesture");
        }
        if self.wake_up.is_some_and(|id| self.registry.get(id).is_some()) {
            debug!("wake-up tone already scheduled");
            return Ok(());
        }
        let Some(ctx) = self.lifecycle.context_mut() else {
            return Err(AudioError::GraphUnavailable("no audio context".to_string()));
        };

        let now = ctx.current_time();
        let stop = now + WAKE_UP_SECONDS;
        let osc = ctx.create_oscillator(Waveform::Sine, WAKE_UP_HZ);
        let gain = ctx.create_gain(WAKE_UP_LEVEL);
        wire(ctx, osc, osc, gain, now, stop).map_err(|e| abandon(ctx, &[osc, gain], e))?;
        let id = self
            .registry
            .register(Voice::new(osc, gain, now, stop).describe(WAKE_UP_HZ, Style::Default, ""));
        self.wake_up = Some(id);

        info!(state = ctx.state().as_str(), "audio initialized");
        Ok(())
    }

    /// Resume from a user gesture. Returns whether audio is running.
    pub async fn unlock_audio_context(&mut self) -> bool {
        let unlocked = self.lifecycle.resume_on_gesture().await;
        if unlocked {
            info!("audio context unlocked");
        } else {
            warn!("audio context could not be unlocked");
        }
        unlocked
    }

    /// Play one note, cutting off any note still sounding.
    ///
    /// Fails with [`AudioError::InvalidNoteRequest`] for a non-positive
    /// duration, [`AudioError::GraphUnavailable`] when the context cannot
    /// be created or resumed and [`AudioError::GraphWiring`] when the note's
    /// nodes cannot be connected or scheduled. In every case nothing is
    /// registered and no node of the note is left in the graph.
    pub async fn play_note(&mut self, request: NoteRequest) -> Result<VoiceId, AudioError> {
        let request = request.validated().inspect_err(|e| {
            warn!(%e, "note request rejected");
        })?;

        let ctx = self.lifecycle.ensure_running().await.inspect_err(|e| {
            warn!(%e, pitch = request.pitch, "audio not initialized, note dropped");
        })?;

        let life = self.config.lifecycle;
        let terminated = self.registry.terminate_all(ctx, &self.config);

        let now = ctx.current_time();
        let style = request.timbre.style;
        let frequency = pitch::frequency_of(request.pitch);
        // Oscillator frequency is capped at Nyquist.
        let rendered = frequency.min(ctx.sample_rate() / 2.0);
        let note_stop = now + request.duration + life.stop_guard;

        let primary = ctx.create_oscillator(Waveform::Sine, rendered);
        let amplitude = ctx.create_gain(0.0);

        let input = ChainInput {
            primary,
            family: request.timbre.family,
            frequency: rendered,
            now,
            aux_stop: note_stop.max(now + life.aux_stop_ceiling),
        };
        let chain = match self.timbres.build(ctx, &input, style) {
            Ok(chain) => chain,
            Err(e) => return Err(abandon(ctx, &[primary, amplitude], e)),
        };

        if let Some(gain) = ctx.param_mut(amplitude, ParamName::Gain) {
            apply_envelope(
                gain,
                &self.config.envelope,
                now,
                request.duration,
                request.amplitude,
            );
        }

        if let Err(e) = wire(ctx, chain.output, primary, amplitude, now, note_stop) {
            let nodes: Vec<NodeId> = [primary, amplitude]
                .into_iter()
                .chain(chain.owned.iter().copied())
                .collect();
            return Err(abandon(ctx, &nodes, e));
        }

        let voice = Voice::new(primary, amplitude, now, note_stop)
            .with_chain(ctx, &chain)
            .describe(frequency, style, &request.pitch_context);
        let id = self.registry.register(voice);

        info!(
            voice = ?id,
            pitch = request.pitch,
            pitch_context = %request.pitch_context,
            frequency,
            style = style.name(),
            family = ?request.timbre.family,
            duration = request.duration,
            terminated,
            "note started"
        );
        Ok(id)
    }

    /// Fade out every active voice. Returns how many were stopped.
    pub fn stop_active_notes(&mut self) -> usize {
        match self.lifecycle.context_mut() {
            Some(ctx) => self.registry.terminate_all(ctx, &self.config),
            None => 0,
        }
    }

    /// Stop every voice, dispose them immediately and suspend the context.
    pub fn stop_all_sounds(&mut self) {
        if let Some(ctx) = self.lifecycle.context_mut() {
            let terminated = self.registry.terminate_all(ctx, &self.config);
            let disposed = self.registry.dispose_all(ctx);
            debug!(terminated, disposed, "all sounds stopped");
        }
        self.lifecycle.suspend();
    }

    /// Render mono samples from the context, sweeping expired voices after
    /// every quantum. Writes silence when no context exists.
    pub fn render(&mut self, out: &mut [f32]) {
        let Some(ctx) = self.lifecycle.context_mut() else {
            out.fill(0.0);
            return;
        };
        for block in out.chunks_mut(RENDER_QUANTUM) {
            ctx.render(block);
            self.registry.sweep(ctx);
        }
    }

    /// Render and discard `seconds` of audio.
    pub fn advance(&mut self, seconds: f64) {
        let frames = (seconds.max(0.0) * self.config.sample_rate).ceil() as usize;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(frames, 0.0);
        self.render(&mut scratch);
        self.scratch = scratch;
    }
}

/// Route `output` through `amplitude` to the master bus and schedule
/// `source` to play from `start` to `stop`.
fn wire(
    ctx: &mut AudioContext,
    output: NodeId,
    source: NodeId,
    amplitude: NodeId,
    start: f64,
    stop: f64,
) -> Result<(), NodeError> {
    ctx.connect(output, amplitude)?;
    ctx.connect(amplitude, ctx.master_gain())?;
    ctx.start(source, start)?;
    ctx.stop(source, stop)
}

/// Release the nodes of a note that could not be wired.
fn abandon(ctx: &mut AudioContext, nodes: &[NodeId], err: NodeError) -> AudioError {
    for &node in nodes {
        if let Err(e) = ctx.release(node) {
            debug!(%e, "ignored release error");
        }
    }
    warn!(%err, "note could not be wired, nodes released");
    AudioError::GraphWiring(err)
}
