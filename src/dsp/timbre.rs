//! Timbre chains — per-style signal graphs that colour a raw tone into an
//! instrument-like voice.
//!
//! Each style is a plain function registered in a [`TimbreTable`] keyed by
//! [`Style`]. A builder wires `primary → … → output` and returns every node
//! it created; ownership of those nodes passes to the caller.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::NodeError;
use crate::instrument::{InstrumentFamily, Style};

use super::compressor::Compressor;
use super::filter::FilterType;
use super::graph::{AudioContext, NodeId, ParamName};
use super::oscillator::Waveform;
use super::shaper::WaveShaper;

/// WebAudio's default BiquadFilterNode Q.
const DEFAULT_Q: f64 = 1.0;

/// What a chain builder is given.
#[derive(Debug, Clone, Copy)]
pub struct ChainInput {
    /// Primary tone source, already created but not yet connected.
    pub primary: NodeId,
    pub family: InstrumentFamily,
    /// Fundamental frequency in Hz.
    pub frequency: f64,
    /// Context time the note starts at.
    pub now: f64,
    /// Stop time for any auxiliary tone sources.
    pub aux_stop: f64,
}

/// A built chain: its final node and every node created for it, in creation
/// order. `output` is always one of `owned`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainResult {
    pub output: NodeId,
    pub owned: Vec<NodeId>,
}

impl ChainResult {
    /// Node kinds in order, with the output's kind first.
    pub fn shape(&self, ctx: &AudioContext) -> Vec<&'static str> {
        std::iter::once(self.output)
            .chain(self.owned.iter().copied())
            .map(|id| ctx.node_kind(id).unwrap_or("released"))
            .collect()
    }

    /// Auxiliary tone sources among the owned nodes.
    pub fn sources(&self, ctx: &AudioContext) -> Vec<NodeId> {
        self.owned
            .iter()
            .copied()
            .filter(|&id| ctx.node_kind(id) == Some("oscillator"))
            .collect()
    }
}

pub type ChainBuilder = fn(&mut AudioContext, &ChainInput) -> Result<ChainResult, NodeError>;

/// Lookup table from style to chain builder. Styles without an entry use
/// the `Default` builder.
#[derive(Clone)]
pub struct TimbreTable {
    builders: HashMap<Style, ChainBuilder>,
}

impl Default for TimbreTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl TimbreTable {
    /// Table with every built-in style.
    pub fn standard() -> Self {
        let mut table = TimbreTable {
            builders: HashMap::new(),
        };
        table.register(Style::Default, default_chain);
        table.register(Style::Bright, bright_chain);
        table.register(Style::Mellow, mellow_chain);
        table.register(Style::Brilliant, brilliant_chain);
        table.register(Style::Warm, warm_chain);
        table.register(Style::Piano, piano_chain);
        table.register(Style::Synth, synth_chain);
        table
    }

    /// Add or replace the builder for `style`.
    pub fn register(&mut self, style: Style, builder: ChainBuilder) {
        self.builders.insert(style, builder);
    }

    pub fn contains(&self, style: Style) -> bool {
        self.builders.contains_key(&style)
    }

    /// Build the chain for `style`, falling back to the default chain.
    pub fn build(
        &self,
        ctx: &mut AudioContext,
        input: &ChainInput,
        style: Style,
    ) -> Result<ChainResult, NodeError> {
        let builder = match self.builders.get(&style) {
            Some(builder) => *builder,
            None => {
                warn!(style = style.name(), "no chain registered, using default");
                default_chain
            }
        };
        let chain = builder(ctx, input)?;
        debug!(
            style = style.name(),
            family = ?input.family,
            nodes = chain.owned.len(),
            "built timbre chain"
        );
        Ok(chain)
    }

    /// Build from a style name; unknown names get the default chain.
    pub fn build_named(
        &self,
        ctx: &mut AudioContext,
        input: &ChainInput,
        style: &str,
    ) -> Result<ChainResult, NodeError> {
        self.build(ctx, input, Style::parse_or_default(style))
    }
}

/// Start an extra tone source at `ratio` times the fundamental.
fn aux_source(
    ctx: &mut AudioContext,
    input: &ChainInput,
    waveform: Waveform,
    ratio: f64,
) -> Result<NodeId, NodeError> {
    let osc = ctx.create_oscillator(waveform, input.frequency * ratio);
    ctx.start(osc, input.now)?;
    ctx.stop(osc, input.aux_stop)?;
    Ok(osc)
}

fn default_chain(ctx: &mut AudioContext, input: &ChainInput) -> Result<ChainResult, NodeError> {
    let (waveform, cutoff) = match input.family {
        InstrumentFamily::Trumpet => (Waveform::Sawtooth, 2000.0),
        InstrumentFamily::Trombone | InstrumentFamily::Other => (Waveform::Sine, 1500.0),
    };
    ctx.set_waveform(input.primary, waveform)?;

    let filter = ctx.create_biquad(FilterType::Lowpass, cutoff, DEFAULT_Q, 0.0);
    ctx.connect(input.primary, filter)?;

    Ok(ChainResult {
        output: filter,
        owned: vec![filter],
    })
}

fn bright_chain(ctx: &mut AudioContext, input: &ChainInput) -> Result<ChainResult, NodeError> {
    ctx.set_waveform(input.primary, Waveform::Sawtooth)?;

    let high_shelf = ctx.create_biquad(FilterType::Highshelf, 2000.0, DEFAULT_Q, 15.0);
    let points = ctx.sample_rate() as usize;
    let shaper = ctx.create_wave_shaper(WaveShaper::saturating(5.0, points));

    ctx.connect(input.primary, high_shelf)?;
    ctx.connect(high_shelf, shaper)?;

    Ok(ChainResult {
        output: shaper,
        owned: vec![high_shelf, shaper],
    })
}

fn mellow_chain(ctx: &mut AudioContext, input: &ChainInput) -> Result<ChainResult, NodeError> {
    ctx.set_waveform(input.primary, Waveform::Sine)?;

    // Slight detune beats against the primary for a natural chorus.
    let second = aux_source(ctx, input, Waveform::Sine, 1.002)?;
    let mixer = ctx.create_gain(0.5);
    ctx.connect(second, mixer)?;
    ctx.connect(input.primary, mixer)?;

    let lowpass = ctx.create_biquad(FilterType::Lowpass, 1200.0, 0.5, 0.0);
    ctx.connect(mixer, lowpass)?;

    Ok(ChainResult {
        output: lowpass,
        owned: vec![mixer, second, lowpass],
    })
}

fn brilliant_chain(ctx: &mut AudioContext, input: &ChainInput) -> Result<ChainResult, NodeError> {
    ctx.set_waveform(input.primary, Waveform::Square)?;

    // Two formants for brass-like brilliance.
    let formant1 = ctx.create_biquad(FilterType::Peaking, 800.0, 5.0, 10.0);
    let formant2 = ctx.create_biquad(FilterType::Peaking, 1400.0, 8.0, 15.0);
    ctx.connect(input.primary, formant1)?;
    ctx.connect(formant1, formant2)?;

    Ok(ChainResult {
        output: formant2,
        owned: vec![formant1, formant2],
    })
}

fn warm_chain(ctx: &mut AudioContext, input: &ChainInput) -> Result<ChainResult, NodeError> {
    ctx.set_waveform(input.primary, Waveform::Triangle)?;

    let enhancer = ctx.create_biquad(FilterType::Peaking, 600.0, 0.7, 6.0);
    let impulse = ctx.noise_impulse(0.5);
    let convolver = ctx.create_convolver(&impulse);
    ctx.connect(input.primary, enhancer)?;
    ctx.connect(enhancer, convolver)?;

    Ok(ChainResult {
        output: convolver,
        owned: vec![enhancer, convolver],
    })
}

fn piano_chain(ctx: &mut AudioContext, input: &ChainInput) -> Result<ChainResult, NodeError> {
    let now = input.now;
    ctx.set_waveform(input.primary, Waveform::Triangle)?;

    let harmonic = aux_source(ctx, input, Waveform::Triangle, 2.001)?;
    let color = aux_source(ctx, input, Waveform::Sine, 4.002)?;

    let main_gain = ctx.create_gain(0.5);
    let harmonic_gain = ctx.create_gain(0.15);
    let color_gain = ctx.create_gain(0.05);

    // Percussive strike then decay.
    if let Some(gain) = ctx.param_mut(main_gain, ParamName::Gain) {
        gain.set_value_at_time(0.0, now);
        gain.linear_ramp_to_value_at_time(0.5, now + 0.01);
        gain.exponential_ramp_to_value_at_time(0.3, now + 0.2);
        gain.exponential_ramp_to_value_at_time(0.01, now + 1.5);
    }

    ctx.connect(input.primary, main_gain)?;
    ctx.connect(harmonic, harmonic_gain)?;
    ctx.connect(color, color_gain)?;

    let compressor = ctx.create_compressor(Compressor::with_params(
        ctx.sample_rate(),
        -24.0,
        30.0,
        12.0,
        0.003,
        0.25,
    ));
    ctx.connect(main_gain, compressor)?;
    ctx.connect(harmonic_gain, compressor)?;
    ctx.connect(color_gain, compressor)?;

    // Starts bright and darkens.
    let filter = ctx.create_biquad(FilterType::Lowpass, 3000.0, 0.7, 0.0);
    if let Some(freq) = ctx.param_mut(filter, ParamName::Frequency) {
        freq.set_value_at_time(5000.0, now);
        freq.exponential_ramp_to_value_at_time(2000.0, now + 1.0);
    }
    ctx.connect(compressor, filter)?;

    Ok(ChainResult {
        output: filter,
        owned: vec![
            main_gain,
            harmonic_gain,
            color_gain,
            compressor,
            filter,
            harmonic,
            color,
        ],
    })
}

fn synth_chain(ctx: &mut AudioContext, input: &ChainInput) -> Result<ChainResult, NodeError> {
    let now = input.now;
    let f = input.frequency;
    ctx.set_waveform(input.primary, Waveform::Sawtooth)?;

    let sub = aux_source(ctx, input, Waveform::Square, 0.5)?;
    let main_gain = ctx.create_gain(0.5);
    let sub_gain = ctx.create_gain(0.3);
    ctx.connect(input.primary, main_gain)?;
    ctx.connect(sub, sub_gain)?;

    // Filter sweep shortly after onset.
    let bandpass = ctx.create_biquad(FilterType::Bandpass, f * 2.0, 2.0, 0.0);
    if let Some(freq) = ctx.param_mut(bandpass, ParamName::Frequency) {
        freq.set_value_at_time(f * 4.0, now);
        freq.exponential_ramp_to_value_at_time(f * 1.5, now + 0.5);
        freq.exponential_ramp_to_value_at_time(f * 2.0, now + 1.0);
    }
    let lowpass = ctx.create_biquad(FilterType::Lowpass, 4000.0, DEFAULT_Q, 0.0);
    ctx.connect(main_gain, bandpass)?;
    ctx.connect(sub_gain, bandpass)?;
    ctx.connect(bandpass, lowpass)?;

    let points = ctx.sample_rate() as usize;
    let shaper = ctx.create_wave_shaper(WaveShaper::distortion(3.0, points));
    ctx.connect(lowpass, shaper)?;

    Ok(ChainResult {
        output: shaper,
        owned: vec![main_gain, sub_gain, bandpass, lowpass, shaper, sub],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::graph::ContextState;

    fn setup(family: InstrumentFamily) -> (AudioContext, ChainInput) {
        let mut ctx = AudioContext::new(44100.0, 1.0, 3);
        ctx.set_state(ContextState::Running);
        let primary = ctx.create_oscillator(Waveform::Triangle, 440.0);
        let input = ChainInput {
            primary,
            family,
            frequency: 440.0,
            now: 0.0,
            aux_stop: 2.0,
        };
        (ctx, input)
    }

    fn build(style: Style, family: InstrumentFamily) -> (AudioContext, ChainInput, ChainResult) {
        let (mut ctx, input) = setup(family);
        let chain = TimbreTable::standard().build(&mut ctx, &input, style).unwrap();
        (ctx, input, chain)
    }

    #[test]
    fn every_style_is_registered() {
        let table = TimbreTable::standard();
        for style in Style::ALL {
            assert!(table.contains(style), "{style:?} missing");
        }
    }

    #[test]
    fn default_depends_on_family() {
        let (ctx, input, chain) = build(Style::Default, InstrumentFamily::Trumpet);
        assert_eq!(ctx.waveform(input.primary), Some(Waveform::Sawtooth));
        assert_eq!(ctx.param_value(chain.output, ParamName::Frequency), Some(2000.0));

        let (ctx, input, chain) = build(Style::Default, InstrumentFamily::Trombone);
        assert_eq!(ctx.waveform(input.primary), Some(Waveform::Sine));
        assert_eq!(ctx.param_value(chain.output, ParamName::Frequency), Some(1500.0));
        assert_eq!(chain.shape(&ctx), vec!["biquad", "biquad"]);
    }

    #[test]
    fn unknown_style_matches_default_shape() {
        for family in [InstrumentFamily::Trumpet, InstrumentFamily::Trombone] {
            let table = TimbreTable::standard();
            let (mut ctx_a, input_a) = setup(family);
            let (mut ctx_b, input_b) = setup(family);
            let fallback = table.build_named(&mut ctx_a, &input_a, "nonexistent").unwrap();
            let default = table.build_named(&mut ctx_b, &input_b, "default").unwrap();
            assert_eq!(fallback.shape(&ctx_a), default.shape(&ctx_b));
            assert_eq!(ctx_a.waveform(input_a.primary), ctx_b.waveform(input_b.primary));
            assert_eq!(
                ctx_a.param_value(fallback.output, ParamName::Frequency),
                ctx_b.param_value(default.output, ParamName::Frequency)
            );
        }
    }

    #[test]
    fn unregistered_style_uses_default_builder() {
        let table = TimbreTable {
            builders: HashMap::from([(Style::Default, default_chain as ChainBuilder)]),
        };
        let (mut ctx, input) = setup(InstrumentFamily::Trumpet);
        let chain = table.build(&mut ctx, &input, Style::Synth).unwrap();
        assert_eq!(chain.shape(&ctx), vec!["biquad", "biquad"]);
    }

    #[test]
    fn bright_has_shelf_then_shaper() {
        let (ctx, input, chain) = build(Style::Bright, InstrumentFamily::Trumpet);
        assert_eq!(chain.shape(&ctx), vec!["waveshaper", "biquad", "waveshaper"]);
        assert_eq!(ctx.filter_type(chain.owned[0]), Some(FilterType::Highshelf));
        assert!(ctx.is_connected(input.primary, chain.owned[0]));
        assert!(ctx.is_connected(chain.owned[0], chain.output));
    }

    #[test]
    fn mellow_adds_detuned_source() {
        let (ctx, input, chain) = build(Style::Mellow, InstrumentFamily::Trombone);
        let sources = chain.sources(&ctx);
        assert_eq!(sources.len(), 1);
        let detuned = ctx.param_value(sources[0], ParamName::Frequency).unwrap();
        assert!((detuned - 440.0 * 1.002).abs() < 1e-9);
        assert_eq!(ctx.stop_time(sources[0]), Some(input.aux_stop));
        assert_eq!(ctx.filter_type(chain.output), Some(FilterType::Lowpass));
    }

    #[test]
    fn brilliant_cascades_two_formants() {
        let (ctx, input, chain) = build(Style::Brilliant, InstrumentFamily::Trumpet);
        assert_eq!(ctx.waveform(input.primary), Some(Waveform::Square));
        assert_eq!(chain.owned.len(), 2);
        for (node, centre) in chain.owned.iter().zip([800.0, 1400.0]) {
            assert_eq!(ctx.filter_type(*node), Some(FilterType::Peaking));
            assert_eq!(ctx.param_value(*node, ParamName::Frequency), Some(centre));
        }
    }

    #[test]
    fn warm_ends_in_convolver() {
        let (ctx, _, chain) = build(Style::Warm, InstrumentFamily::Trumpet);
        assert_eq!(chain.shape(&ctx), vec!["convolver", "biquad", "convolver"]);
    }

    #[test]
    fn piano_mixes_three_partials_through_compressor() {
        let (ctx, _, chain) = build(Style::Piano, InstrumentFamily::Trumpet);
        assert_eq!(chain.sources(&ctx).len(), 2);
        assert_eq!(chain.owned.len(), 7);
        assert!(chain.shape(&ctx).contains(&"compressor"));

        // Lowpass darkens from 5 kHz towards 2 kHz.
        let freq = ctx.param(chain.output, ParamName::Frequency).unwrap();
        assert_eq!(freq.value_at(0.0), 5000.0);
        assert!((freq.value_at(1.0) - 2000.0).abs() < 1e-9);
        assert!(freq.value_at(0.5) < 5000.0 && freq.value_at(0.5) > 2000.0);
    }

    #[test]
    fn synth_sweeps_bandpass_down() {
        let (ctx, _, chain) = build(Style::Synth, InstrumentFamily::Trumpet);
        let bandpass = chain.owned[2];
        assert_eq!(ctx.filter_type(bandpass), Some(FilterType::Bandpass));
        let freq = ctx.param(bandpass, ParamName::Frequency).unwrap();
        assert_eq!(freq.value_at(0.0), 1760.0);
        assert!((freq.value_at(0.5) - 660.0).abs() < 1e-9);
        assert!((freq.value_at(1.0) - 880.0).abs() < 1e-9);

        let sub = chain.sources(&ctx)[0];
        assert_eq!(ctx.param_value(sub, ParamName::Frequency), Some(220.0));
        assert_eq!(ctx.waveform(sub), Some(Waveform::Square));
    }

    #[test]
    fn every_chain_renders_finite_audio() {
        for style in Style::ALL {
            let (mut ctx, input, chain) = build(style, InstrumentFamily::Trumpet);
            ctx.connect(chain.output, ctx.master_gain()).unwrap();
            ctx.start(input.primary, 0.0).unwrap();
            let mut out = vec![0.0f32; 4410];
            ctx.render(&mut out);
            assert!(out.iter().all(|s| s.is_finite()), "{style:?} produced NaN");
            let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            assert!(peak > 0.001, "{style:?} is silent");
        }
    }
}
