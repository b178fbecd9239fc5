pub mod config;
pub mod dsp;
pub mod error;
pub mod instrument;

use std::cell::RefCell;
use std::fmt::Display;

use futures::executor::block_on;
use wasm_bindgen::prelude::*;

use crate::config::EngineConfig;
use crate::dsp::engine::PlaybackEngine;
use crate::dsp::lifecycle::AutoplayHost;
use crate::instrument::{InstrumentFamily, NoteRequest, Style};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

type BrowserEngine = PlaybackEngine<AutoplayHost>;

thread_local! {
    static ENGINE: RefCell<Option<BrowserEngine>> = const { RefCell::new(None) };
}

/// Run `f` against the page's engine, creating it with defaults on first use.
fn with_engine<R>(f: impl FnOnce(&mut BrowserEngine) -> R) -> R {
    ENGINE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let engine = slot
            .get_or_insert_with(|| PlaybackEngine::new(AutoplayHost::new(), EngineConfig::default()));
        f(engine)
    })
}

/// Swap in a new engine, silencing the old one. The host carries over, so
/// a gesture already seen still unlocks the new context.
fn replace_engine(config: EngineConfig) {
    ENGINE.with(|cell| {
        let mut slot = cell.borrow_mut();
        let host = match slot.as_mut() {
            Some(old) => {
                old.stop_all_sounds();
                old.lifecycle().host().clone()
            }
            None => AutoplayHost::new(),
        };
        *slot = Some(PlaybackEngine::new(host, config));
    });
}

fn js_error(e: impl Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Build a note request from loosely-typed UI values. Unknown instruments
/// and styles fall back to their defaults.
pub fn note_request(
    instrument: &str,
    midi: i32,
    pitch_context: &str,
    duration: f64,
    volume: f64,
    style: &str,
) -> NoteRequest {
    NoteRequest::new(
        InstrumentFamily::parse(instrument),
        midi,
        pitch_context,
        duration,
        volume,
        Style::parse_or_default(style),
    )
}

/// WASM-exposed: return the brasstone-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: replace the engine configuration (a JS object in
/// `EngineConfig` shape; missing fields take defaults).
#[wasm_bindgen]
pub fn configure(config: JsValue) -> Result<(), JsValue> {
    let config: EngineConfig = serde_wasm_bindgen::from_value(config).map_err(js_error)?;
    replace_engine(config.validated());
    Ok(())
}

/// WASM-exposed: replace the engine configuration from a JSON string.
#[wasm_bindgen]
pub fn configure_json(json: &str) -> Result<(), JsValue> {
    let config = EngineConfig::from_json(json).map_err(js_error)?;
    replace_engine(config);
    Ok(())
}

/// WASM-exposed: create the audio context at `sample_rate` and try to start
/// it. Without a prior gesture the context stays suspended until
/// `unlock_audio_context`. Safe to call repeatedly.
#[wasm_bindgen]
pub fn initialize_audio(sample_rate: f64) -> Result<(), JsValue> {
    let current = with_engine(|engine| engine.config().sample_rate);
    let wanted = EngineConfig {
        sample_rate,
        ..EngineConfig::default()
    }
    .validated()
    .sample_rate;
    if wanted != current {
        let config = with_engine(|engine| engine.config().clone());
        replace_engine(
            EngineConfig {
                sample_rate: wanted,
                ..config
            }
            .validated(),
        );
    }
    with_engine(|engine| block_on(engine.initialize_audio())).map_err(js_error)
}

/// WASM-exposed: call from a click/touch handler. Returns whether audio is
/// running.
#[wasm_bindgen]
pub fn unlock_audio_context() -> bool {
    with_engine(|engine| block_on(engine.unlock_audio_context()))
}

/// WASM-exposed: play one note, cutting off the previous one. Returns false
/// when the note was dropped (audio locked or invalid request).
#[wasm_bindgen]
pub fn play_note(
    instrument: &str,
    midi: i32,
    pitch_context: &str,
    duration: f64,
    volume: f64,
    style: &str,
) -> bool {
    let request = note_request(instrument, midi, pitch_context, duration, volume, style);
    with_engine(|engine| block_on(engine.play_note(request))).is_ok()
}

/// WASM-exposed: fade out whatever is playing.
#[wasm_bindgen]
pub fn stop_active_notes() {
    with_engine(|engine| {
        engine.stop_active_notes();
    });
}

/// WASM-exposed: stop everything and suspend the audio context.
#[wasm_bindgen]
pub fn stop_all_sounds() {
    with_engine(PlaybackEngine::stop_all_sounds);
}

/// WASM-exposed: `"suspended"`, `"running"`, `"closed"`, or nothing before
/// the context exists.
#[wasm_bindgen]
pub fn audio_context_state() -> Option<String> {
    with_engine(|engine| engine.audio_context_state().map(|s| s.as_str().to_string()))
}

/// WASM-exposed: fill an AudioWorklet output block with mono samples.
#[wasm_bindgen]
pub fn render_block(out: &mut [f32]) {
    with_engine(|engine| engine.render(out));
}

/// WASM-exposed: frequency in Hz of a note name such as `"Bb3"`.
#[wasm_bindgen]
pub fn note_frequency(name: &str) -> Option<f64> {
    dsp::pitch::frequency_of_name(name)
}

/// WASM-exposed: render one note offline to a WAV byte array.
#[wasm_bindgen]
pub fn render_note_wav(
    instrument: &str,
    midi: i32,
    duration: f64,
    volume: f64,
    style: &str,
    sample_rate: u32,
) -> Result<Vec<u8>, JsValue> {
    let config = EngineConfig {
        sample_rate: sample_rate as f64,
        ..EngineConfig::default()
    };
    let request = note_request(instrument, midi, "", duration, volume, style);
    dsp::renderer::render_note_wav(&config, request).map_err(js_error)
}
