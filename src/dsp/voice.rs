//! Voice — one sounding note's nodes, and the registry that owns them until
//! disposal.
//!
//! The registry is the only place that stops, disconnects or releases a
//! voice's nodes. Each voice carries its own absolute disposal deadline;
//! [`VoiceRegistry::sweep`] is the single cleanup pass that honours them.

use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::error::{AudioError, NodeError};
use crate::instrument::Style;

use super::graph::{AudioContext, NodeId, ParamName};
use super::timbre::ChainResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(u64);

/// A single note: tone sources, the chain between them and the amplitude
/// control, and the amplitude control itself.
#[derive(Debug, Clone)]
pub struct Voice {
    id: VoiceId,
    /// Primary source first.
    sources: Vec<NodeId>,
    amplitude: NodeId,
    aux: Vec<NodeId>,
    started_at: f64,
    scheduled_stop: f64,
    /// Absolute context time after which the voice may be disposed.
    dispose_at: f64,
    frequency: f64,
    style: Style,
    pitch_context: String,
}

impl Voice {
    pub fn new(primary: NodeId, amplitude: NodeId, started_at: f64, scheduled_stop: f64) -> Self {
        Voice {
            id: VoiceId(0),
            sources: vec![primary],
            amplitude,
            aux: Vec::new(),
            started_at,
            scheduled_stop,
            dispose_at: scheduled_stop,
            frequency: 0.0,
            style: Style::Default,
            pitch_context: String::new(),
        }
    }

    /// Take ownership of every node a timbre chain created.
    pub fn with_chain(mut self, ctx: &AudioContext, chain: &ChainResult) -> Self {
        let extra = chain.sources(ctx);
        self.aux = chain
            .owned
            .iter()
            .copied()
            .filter(|node| !extra.contains(node))
            .collect();
        self.sources.extend(extra);
        self
    }

    pub fn describe(mut self, frequency: f64, style: Style, pitch_context: &str) -> Self {
        self.frequency = frequency;
        self.style = style;
        self.pitch_context = pitch_context.to_string();
        self
    }

    pub fn id(&self) -> VoiceId {
        self.id
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    pub fn amplitude(&self) -> NodeId {
        self.amplitude
    }

    pub fn started_at(&self) -> f64 {
        self.started_at
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn pitch_context(&self) -> &str {
        &self.pitch_context
    }

    /// Every node owned by this voice.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.sources
            .iter()
            .chain(&self.aux)
            .chain(std::iter::once(&self.amplitude))
            .copied()
    }

    /// Force the amplitude towards zero over `fade` seconds from now,
    /// replacing whatever automation was scheduled. A level at or below
    /// `floor` is pinned to zero at once.
    fn fade_out(&self, ctx: &mut AudioContext, fade: f64, floor: f64) {
        let now = ctx.current_time();
        let Some(gain) = ctx.param_mut(self.amplitude, ParamName::Gain) else {
            return;
        };
        let current = gain.value_at(now);
        gain.cancel_scheduled_values(now);
        if current > floor {
            gain.set_value_at_time(current, now);
            gain.linear_ramp_to_value_at_time(0.0, now + fade);
        } else {
            gain.set_value_at_time(0.0, now);
        }
    }

    /// Stop, disconnect and release every node. Failures mean another
    /// teardown path got there first and are only logged.
    fn dispose(&self, ctx: &mut AudioContext) {
        let now = ctx.current_time();
        for &source in &self.sources {
            if let Err(e) = ctx.stop(source, now) {
                swallow(self.id, e);
            }
        }
        for node in self.nodes() {
            if let Err(e) = ctx.disconnect(node).and_then(|()| ctx.release(node)) {
                swallow(self.id, e);
            }
        }
        trace!(voice = ?self.id, "voice disposed");
    }
}

fn swallow(voice: VoiceId, err: NodeError) {
    let err = AudioError::DisposalRace(err);
    debug!(?voice, %err, "ignored disposal error");
}

/// Every registered, not yet disposed voice.
///
/// `active` voices are sounding towards their natural end; `retiring` voices
/// were force-faded and are waiting out their disposal delay. A voice is in
/// exactly one of the two lists, so it is disposed at most once.
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    active: Vec<Voice>,
    retiring: Vec<Voice>,
    next_id: u64,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mut voice: Voice) -> VoiceId {
        self.next_id += 1;
        voice.id = VoiceId(self.next_id);
        let id = voice.id;
        debug!(
            voice = ?id,
            nodes = voice.nodes().count(),
            stop = voice.scheduled_stop,
            "voice registered"
        );
        self.active.push(voice);
        id
    }

    /// Fade every active voice out and queue it for disposal shortly after.
    /// Returns how many voices were terminated.
    pub fn terminate_all(&mut self, ctx: &mut AudioContext, config: &EngineConfig) -> usize {
        if self.active.is_empty() {
            return 0;
        }
        let life = &config.lifecycle;
        let now = ctx.current_time();
        let dispose_at = now + life.disposal_delay;
        let count = self.active.len();

        for mut voice in self.active.drain(..) {
            voice.fade_out(ctx, life.termination_fade, config.silence_threshold);
            for &source in &voice.sources {
                if let Err(e) = ctx.stop(source, dispose_at) {
                    swallow(voice.id, e);
                }
            }
            voice.dispose_at = dispose_at;
            self.retiring.push(voice);
        }

        debug!(count, dispose_at, "terminated active voices");
        count
    }

    /// Dispose every voice whose deadline has passed. Returns how many were
    /// disposed.
    pub fn sweep(&mut self, ctx: &mut AudioContext) -> usize {
        let now = ctx.current_time();
        let mut disposed = 0;
        for list in [&mut self.active, &mut self.retiring] {
            let (expired, keep): (Vec<Voice>, Vec<Voice>) = std::mem::take(list)
                .into_iter()
                .partition(|v| v.dispose_at <= now);
            *list = keep;
            for voice in &expired {
                voice.dispose(ctx);
            }
            disposed += expired.len();
        }
        if disposed > 0 {
            trace!(disposed, now, "swept voices");
        }
        disposed
    }

    /// Dispose everything immediately.
    pub fn dispose_all(&mut self, ctx: &mut AudioContext) -> usize {
        let voices: Vec<Voice> = self.active.drain(..).chain(self.retiring.drain(..)).collect();
        for voice in &voices {
            voice.dispose(ctx);
        }
        voices.len()
    }

    /// Active voice count.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Voices faded out but not yet disposed.
    pub fn pending_disposal(&self) -> usize {
        self.retiring.len()
    }

    pub fn voices(&self) -> impl Iterator<Item = &Voice> {
        self.active.iter()
    }

    pub fn get(&self, id: VoiceId) -> Option<&Voice> {
        self.active.iter().chain(&self.retiring).find(|v| v.id == id)
    }
}
