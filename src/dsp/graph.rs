//! Audio graph — the in-process rendering context.
//!
//! Nodes live in a generational arena, so a stale id left behind by an
//! overlapping teardown path can never alias a newer node. Rendering pulls
//! from the destination in fixed quanta; every node sums its inputs before
//! processing. While suspended or closed the context outputs silence and its
//! clock stands still.

use slotmap::{SecondaryMap, SlotMap, new_key_type};

use crate::error::NodeError;

use super::compressor::Compressor;
use super::convolver::{self, Convolver};
use super::filter::{BiquadFilter, FilterType};
use super::oscillator::{Oscillator, Waveform};
use super::param::AudioParam;
use super::shaper::WaveShaper;

new_key_type! {
    pub struct NodeId;
}

/// Frames rendered per processing block.
pub const RENDER_QUANTUM: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl ContextState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextState::Suspended => "suspended",
            ContextState::Running => "running",
            ContextState::Closed => "closed",
        }
    }
}

/// Automatable parameters addressable on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamName {
    Gain,
    Frequency,
    Q,
    /// Filter gain in dB (peaking and shelf filters).
    FilterGain,
}

#[derive(Debug)]
pub struct OscillatorNode {
    osc: Oscillator,
    frequency: AudioParam,
    start: Option<f64>,
    stop: Option<f64>,
}

impl OscillatorNode {
    fn has_ended(&self, now: f64) -> bool {
        self.stop.is_some_and(|stop| stop <= now)
    }
}

#[derive(Debug)]
pub struct BiquadNode {
    filter: BiquadFilter,
    frequency: AudioParam,
    q: AudioParam,
    gain: AudioParam,
}

#[derive(Debug)]
pub enum NodeKind {
    Destination,
    Oscillator(OscillatorNode),
    Gain(AudioParam),
    Biquad(BiquadNode),
    WaveShaper(WaveShaper),
    Compressor(Compressor),
    Convolver(Box<Convolver>),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Destination => "destination",
            NodeKind::Oscillator(_) => "oscillator",
            NodeKind::Gain(_) => "gain",
            NodeKind::Biquad(_) => "biquad",
            NodeKind::WaveShaper(_) => "waveshaper",
            NodeKind::Compressor(_) => "compressor",
            NodeKind::Convolver(_) => "convolver",
        }
    }

    /// Process one quantum in place. `buf` holds the summed inputs.
    fn process(&mut self, buf: &mut [f32], t0: f64, sample_rate: f64) {
        let dt = 1.0 / sample_rate;
        match self {
            NodeKind::Destination => {}
            NodeKind::Oscillator(node) => {
                for (i, out) in buf.iter_mut().enumerate() {
                    let t = t0 + i as f64 * dt;
                    let playing = node.start.is_some_and(|start| t >= start)
                        && !node.stop.is_some_and(|stop| t >= stop);
                    *out = if playing {
                        node.osc.next_sample(node.frequency.value_at(t)) as f32
                    } else {
                        0.0
                    };
                }
            }
            NodeKind::Gain(gain) => {
                if gain.has_events() {
                    for (i, s) in buf.iter_mut().enumerate() {
                        *s *= gain.value_at(t0 + i as f64 * dt) as f32;
                    }
                } else {
                    let g = gain.value_at(t0) as f32;
                    buf.iter_mut().for_each(|s| *s *= g);
                }
            }
            NodeKind::Biquad(node) => {
                node.filter.set_params(
                    node.frequency.value_at(t0),
                    node.q.value_at(t0),
                    node.gain.value_at(t0),
                );
                for s in buf.iter_mut() {
                    *s = node.filter.process(*s as f64) as f32;
                }
            }
            NodeKind::WaveShaper(shaper) => {
                for s in buf.iter_mut() {
                    *s = shaper.process(*s as f64) as f32;
                }
            }
            NodeKind::Compressor(comp) => {
                for s in buf.iter_mut() {
                    *s = comp.process(*s as f64) as f32;
                }
            }
            NodeKind::Convolver(conv) => conv.process_block(buf),
        }
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    inputs: Vec<NodeId>,
}

/// The audio-processing context: clock, node arena, destination and the
/// single master gain every voice feeds.
pub struct AudioContext {
    sample_rate: f64,
    state: ContextState,
    frame: u64,
    nodes: SlotMap<NodeId, Node>,
    buffers: SecondaryMap<NodeId, Vec<f32>>,
    destination: NodeId,
    master_gain: NodeId,
    rng: fastrand::Rng,
    quantum: Vec<f32>,
    /// Rendered frames not yet handed out by `render`.
    pending: usize,
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.sample_rate)
            .field("state", &self.state)
            .field("current_time", &self.current_time())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl AudioContext {
    /// A new context starts suspended, with its master gain connected to the
    /// destination.
    pub fn new(sample_rate: f64, master_level: f64, seed: u64) -> Self {
        let mut nodes = SlotMap::with_key();
        let destination = nodes.insert(Node {
            kind: NodeKind::Destination,
            inputs: Vec::new(),
        });
        let master_gain = nodes.insert(Node {
            kind: NodeKind::Gain(AudioParam::new(master_level)),
            inputs: Vec::new(),
        });
        nodes[destination].inputs.push(master_gain);

        AudioContext {
            sample_rate,
            state: ContextState::Suspended,
            frame: 0,
            nodes,
            buffers: SecondaryMap::new(),
            destination,
            master_gain,
            rng: fastrand::Rng::with_seed(seed),
            quantum: vec![0.0; RENDER_QUANTUM],
            pending: 0,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ContextState) {
        self.state = state;
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate
    }

    pub fn master_gain(&self) -> NodeId {
        self.master_gain
    }

    // ── Node construction ───────────────────────────────────

    fn add(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.insert(Node {
            kind,
            inputs: Vec::new(),
        })
    }

    pub fn create_oscillator(&mut self, waveform: Waveform, frequency: f64) -> NodeId {
        self.add(NodeKind::Oscillator(OscillatorNode {
            osc: Oscillator::new(waveform, self.sample_rate),
            frequency: AudioParam::new(frequency),
            start: None,
            stop: None,
        }))
    }

    pub fn create_gain(&mut self, gain: f64) -> NodeId {
        self.add(NodeKind::Gain(AudioParam::new(gain)))
    }

    pub fn create_biquad(
        &mut self,
        filter_type: FilterType,
        frequency: f64,
        q: f64,
        gain_db: f64,
    ) -> NodeId {
        self.add(NodeKind::Biquad(BiquadNode {
            filter: BiquadFilter::new(filter_type, self.sample_rate),
            frequency: AudioParam::new(frequency),
            q: AudioParam::new(q),
            gain: AudioParam::new(gain_db),
        }))
    }

    pub fn create_wave_shaper(&mut self, shaper: WaveShaper) -> NodeId {
        self.add(NodeKind::WaveShaper(shaper))
    }

    pub fn create_compressor(&mut self, compressor: Compressor) -> NodeId {
        self.add(NodeKind::Compressor(compressor))
    }

    pub fn create_convolver(&mut self, impulse: &[f32]) -> NodeId {
        let conv = Convolver::new(impulse, self.sample_rate, RENDER_QUANTUM);
        self.add(NodeKind::Convolver(Box::new(conv)))
    }

    /// Decaying noise impulse drawn from the context's generator.
    pub fn noise_impulse(&mut self, seconds: f64) -> Vec<f32> {
        convolver::noise_impulse(&mut self.rng, self.sample_rate, seconds)
    }

    // ── Wiring ───────────────────────────────────────────────

    /// Route `from`'s output into `to`. Repeated connections are ignored.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), NodeError> {
        if !self.nodes.contains_key(from) {
            return Err(NodeError::Released(from));
        }
        let target = self.nodes.get_mut(to).ok_or(NodeError::Released(to))?;
        if !target.inputs.contains(&from) {
            target.inputs.push(from);
        }
        Ok(())
    }

    /// Remove every outgoing connection of `node`.
    pub fn disconnect(&mut self, node: NodeId) -> Result<(), NodeError> {
        if !self.nodes.contains_key(node) {
            return Err(NodeError::Released(node));
        }
        for other in self.nodes.values_mut() {
            other.inputs.retain(|&input| input != node);
        }
        Ok(())
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.nodes.get(to).is_some_and(|n| n.inputs.contains(&from))
    }

    // ── Source scheduling ────────────────────────────────────

    fn source_mut(&mut self, node: NodeId) -> Result<&mut OscillatorNode, NodeError> {
        match self.nodes.get_mut(node) {
            None => Err(NodeError::Released(node)),
            Some(Node {
                kind: NodeKind::Oscillator(osc),
                ..
            }) => Ok(osc),
            Some(_) => Err(NodeError::NotASource(node)),
        }
    }

    /// Start a tone source at `when` (clamped to now).
    pub fn start(&mut self, node: NodeId, when: f64) -> Result<(), NodeError> {
        let now = self.current_time();
        let source = self.source_mut(node)?;
        if source.start.is_some() {
            return Err(NodeError::AlreadyStarted(node));
        }
        source.start = Some(when.max(now));
        Ok(())
    }

    /// Stop a tone source at `when` (clamped to now). Rescheduling a pending
    /// stop is allowed; stopping a source that already ended is not.
    pub fn stop(&mut self, node: NodeId, when: f64) -> Result<(), NodeError> {
        let now = self.current_time();
        let source = self.source_mut(node)?;
        if source.has_ended(now) {
            return Err(NodeError::AlreadyStopped(node));
        }
        source.stop = Some(when.max(now));
        Ok(())
    }

    /// Scheduled stop time of a tone source.
    pub fn stop_time(&self, node: NodeId) -> Option<f64> {
        match self.nodes.get(node).map(|n| &n.kind) {
            Some(NodeKind::Oscillator(osc)) => osc.stop,
            _ => None,
        }
    }

    /// Whether a tone source has stopped producing sound.
    pub fn has_ended(&self, node: NodeId) -> Option<bool> {
        match self.nodes.get(node).map(|n| &n.kind) {
            Some(NodeKind::Oscillator(osc)) => Some(osc.has_ended(self.current_time())),
            _ => None,
        }
    }

    pub fn set_waveform(&mut self, node: NodeId, waveform: Waveform) -> Result<(), NodeError> {
        self.source_mut(node)?.osc.waveform = waveform;
        Ok(())
    }

    pub fn waveform(&self, node: NodeId) -> Option<Waveform> {
        match self.nodes.get(node).map(|n| &n.kind) {
            Some(NodeKind::Oscillator(osc)) => Some(osc.osc.waveform),
            _ => None,
        }
    }

    // ── Parameters ───────────────────────────────────────────

    pub fn param(&self, node: NodeId, name: ParamName) -> Option<&AudioParam> {
        match (&self.nodes.get(node)?.kind, name) {
            (NodeKind::Gain(gain), ParamName::Gain) => Some(gain),
            (NodeKind::Oscillator(osc), ParamName::Frequency) => Some(&osc.frequency),
            (NodeKind::Biquad(b), ParamName::Frequency) => Some(&b.frequency),
            (NodeKind::Biquad(b), ParamName::Q) => Some(&b.q),
            (NodeKind::Biquad(b), ParamName::FilterGain) => Some(&b.gain),
            _ => None,
        }
    }

    pub fn param_mut(&mut self, node: NodeId, name: ParamName) -> Option<&mut AudioParam> {
        match (&mut self.nodes.get_mut(node)?.kind, name) {
            (NodeKind::Gain(gain), ParamName::Gain) => Some(gain),
            (NodeKind::Oscillator(osc), ParamName::Frequency) => Some(&mut osc.frequency),
            (NodeKind::Biquad(b), ParamName::Frequency) => Some(&mut b.frequency),
            (NodeKind::Biquad(b), ParamName::Q) => Some(&mut b.q),
            (NodeKind::Biquad(b), ParamName::FilterGain) => Some(&mut b.gain),
            _ => None,
        }
    }

    /// Value of a parameter at the current time.
    pub fn param_value(&self, node: NodeId, name: ParamName) -> Option<f64> {
        self.param(node, name).map(|p| p.value_at(self.current_time()))
    }

    // ── Lifetime ─────────────────────────────────────────────

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_kind(&self, node: NodeId) -> Option<&'static str> {
        self.nodes.get(node).map(|n| n.kind.name())
    }

    pub fn filter_type(&self, node: NodeId) -> Option<FilterType> {
        match self.nodes.get(node).map(|n| &n.kind) {
            Some(NodeKind::Biquad(b)) => Some(b.filter.filter_type),
            _ => None,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Free a node's slot, cutting it out of the graph. The destination and
    /// master gain belong to the context and cannot be released.
    pub(crate) fn release(&mut self, node: NodeId) -> Result<(), NodeError> {
        if node == self.destination || node == self.master_gain {
            return Err(NodeError::Protected(node));
        }
        if self.nodes.remove(node).is_none() {
            return Err(NodeError::Released(node));
        }
        self.buffers.remove(node);
        for other in self.nodes.values_mut() {
            other.inputs.retain(|&input| input != node);
        }
        Ok(())
    }

    // ── Rendering ────────────────────────────────────────────

    /// Fill `out` with mono samples. Outputs silence without advancing the
    /// clock unless running.
    pub fn render(&mut self, out: &mut [f32]) {
        if self.state != ContextState::Running {
            out.fill(0.0);
            return;
        }
        let mut written = 0;
        while written < out.len() {
            if self.pending == 0 {
                self.render_quantum();
                self.pending = RENDER_QUANTUM;
            }
            let offset = RENDER_QUANTUM - self.pending;
            let n = self.pending.min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.quantum[offset..offset + n]);
            self.pending -= n;
            written += n;
        }
    }

    /// Post-order walk from the destination: every node after its inputs.
    fn processing_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut seen: SecondaryMap<NodeId, ()> = SecondaryMap::new();
        let mut stack = vec![(self.destination, 0usize)];
        seen.insert(self.destination, ());

        while let Some(&(id, next)) = stack.last() {
            let inputs = self.nodes.get(id).map(|n| n.inputs.as_slice()).unwrap_or(&[]);
            if let Some(&child) = inputs.get(next) {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                if self.nodes.contains_key(child) && !seen.contains_key(child) {
                    seen.insert(child, ());
                    stack.push((child, 0));
                }
            } else {
                stack.pop();
                order.push(id);
            }
        }
        order
    }

    fn render_quantum(&mut self) {
        let t0 = self.current_time();
        for id in self.processing_order() {
            let mut buf = self
                .buffers
                .remove(id)
                .unwrap_or_else(|| vec![0.0; RENDER_QUANTUM]);
            buf.fill(0.0);

            if let Some(node) = self.nodes.get(id) {
                for input in &node.inputs {
                    if let Some(src) = self.buffers.get(*input) {
                        for (dst, s) in buf.iter_mut().zip(src) {
                            *dst += s;
                        }
                    }
                }
            }
            if let Some(node) = self.nodes.get_mut(id) {
                node.kind.process(&mut buf, t0, self.sample_rate);
            }
            self.buffers.insert(id, buf);
        }

        match self.buffers.get(self.destination) {
            Some(out) => {
                for (q, s) in self.quantum.iter_mut().zip(out) {
                    *q = soft_clip(*s);
                }
            }
            None => self.quantum.fill(0.0),
        }
        self.frame += RENDER_QUANTUM as u64;
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(sample_rate: f64) -> AudioContext {
        let mut ctx = AudioContext::new(sample_rate, 1.0, 1);
        ctx.set_state(ContextState::Running);
        ctx
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn new_context_is_suspended_with_master_gain() {
        let ctx = AudioContext::new(44100.0, 0.7, 1);
        assert_eq!(ctx.state(), ContextState::Suspended);
        assert_eq!(ctx.node_count(), 2);
        assert!(ctx.is_connected(ctx.master_gain, ctx.destination));
        assert_eq!(ctx.param_value(ctx.master_gain(), ParamName::Gain), Some(0.7));
    }

    #[test]
    fn suspended_context_is_silent_and_frozen() {
        let mut ctx = AudioContext::new(44100.0, 1.0, 1);
        let osc = ctx.create_oscillator(Waveform::Sine, 440.0);
        ctx.connect(osc, ctx.master_gain()).unwrap();
        ctx.start(osc, 0.0).unwrap();

        let mut out = vec![1.0f32; 512];
        ctx.render(&mut out);
        assert_eq!(peak(&out), 0.0);
        assert_eq!(ctx.current_time(), 0.0);
    }

    #[test]
    fn oscillator_respects_start_and_stop() {
        let mut ctx = running(1000.0);
        let osc = ctx.create_oscillator(Waveform::Square, 50.0);
        ctx.connect(osc, ctx.master_gain()).unwrap();
        ctx.start(osc, 0.128).unwrap();
        ctx.stop(osc, 0.256).unwrap();

        let mut out = vec![0.0f32; 384];
        ctx.render(&mut out);
        assert_eq!(peak(&out[..128]), 0.0);
        assert!(peak(&out[128..256]) > 0.5);
        assert_eq!(peak(&out[256..]), 0.0);
        assert_eq!(ctx.has_ended(osc), Some(true));
    }

    #[test]
    fn gain_automation_is_sample_accurate() {
        let mut ctx = running(1000.0);
        let osc = ctx.create_oscillator(Waveform::Square, 1.0);
        let gain = ctx.create_gain(0.0);
        ctx.connect(osc, gain).unwrap();
        ctx.connect(gain, ctx.master_gain()).unwrap();
        ctx.start(osc, 0.0).unwrap();
        let param = ctx.param_mut(gain, ParamName::Gain).unwrap();
        param.set_value_at_time(0.0, 0.0);
        param.linear_ramp_to_value_at_time(0.5, 0.1);

        let mut out = vec![0.0f32; 128];
        ctx.render(&mut out);
        // Square at 1 Hz is +1 for the first half second.
        assert!(out[0].abs() < 1e-6);
        assert!((out[50] - 0.25f32.tanh()).abs() < 1e-3);
        assert!((out[120] - 0.5f32.tanh()).abs() < 1e-3);
    }

    #[test]
    fn inputs_are_summed() {
        let mut ctx = running(1000.0);
        let mix = ctx.create_gain(1.0);
        for _ in 0..2 {
            let osc = ctx.create_oscillator(Waveform::Square, 1.0);
            ctx.connect(osc, mix).unwrap();
            ctx.start(osc, 0.0).unwrap();
        }
        ctx.connect(mix, ctx.master_gain()).unwrap();
        let mut out = vec![0.0f32; 128];
        ctx.render(&mut out);
        assert!((out[64] - 2.0f32.tanh()).abs() < 1e-3);
    }

    #[test]
    fn render_handles_partial_quanta() {
        let mut ctx = running(44100.0);
        let mut out = vec![0.0f32; 100];
        ctx.render(&mut out);
        assert_eq!(ctx.current_time(), 128.0 / 44100.0);
        ctx.render(&mut out);
        assert_eq!(ctx.current_time(), 256.0 / 44100.0);
    }

    #[test]
    fn stopping_an_ended_source_fails() {
        let mut ctx = running(1000.0);
        let osc = ctx.create_oscillator(Waveform::Sine, 10.0);
        ctx.start(osc, 0.0).unwrap();
        ctx.stop(osc, 0.0).unwrap();
        assert_eq!(ctx.stop(osc, 0.0), Err(NodeError::AlreadyStopped(osc)));
        assert_eq!(ctx.start(osc, 0.0), Err(NodeError::AlreadyStarted(osc)));

        let gain = ctx.create_gain(1.0);
        assert_eq!(ctx.stop(gain, 0.0), Err(NodeError::NotASource(gain)));
    }

    #[test]
    fn released_nodes_are_gone() {
        let mut ctx = running(1000.0);
        let osc = ctx.create_oscillator(Waveform::Sine, 10.0);
        let gain = ctx.create_gain(1.0);
        ctx.connect(osc, gain).unwrap();
        ctx.connect(gain, ctx.master_gain()).unwrap();

        ctx.release(gain).unwrap();
        assert!(!ctx.contains(gain));
        assert!(ctx.nodes[ctx.master_gain].inputs.is_empty());
        assert_eq!(ctx.release(gain), Err(NodeError::Released(gain)));
        assert_eq!(ctx.disconnect(gain), Err(NodeError::Released(gain)));
        assert_eq!(ctx.connect(osc, gain), Err(NodeError::Released(gain)));

        let master = ctx.master_gain();
        assert_eq!(ctx.release(master), Err(NodeError::Protected(master)));
    }

    #[test]
    fn disconnect_removes_outgoing_edges_only() {
        let mut ctx = running(1000.0);
        let osc = ctx.create_oscillator(Waveform::Sine, 10.0);
        let gain = ctx.create_gain(1.0);
        ctx.connect(osc, gain).unwrap();
        ctx.connect(gain, ctx.master_gain()).unwrap();
        ctx.disconnect(gain).unwrap();
        assert!(ctx.is_connected(osc, gain));
        assert!(!ctx.is_connected(gain, ctx.master_gain()));
    }

    #[test]
    fn cycles_do_not_hang() {
        let mut ctx = running(1000.0);
        let a = ctx.create_gain(0.5);
        let b = ctx.create_gain(0.5);
        ctx.connect(a, b).unwrap();
        ctx.connect(b, a).unwrap();
        ctx.connect(b, ctx.master_gain()).unwrap();
        let mut out = vec![0.0f32; 256];
        ctx.render(&mut out);
        assert!(out.iter().all(|s| s.is_finite()));
    }
}
