//! DSP Engine — an in-process audio graph and the brass voice engine built
//! on top of it.
//!
//! Everything renders in Rust, so the same code feeds a browser
//! AudioWorklet (via WASM) and the offline WAV renderer.

pub mod compressor;
pub mod convolver;
pub mod engine;
pub mod envelope;
pub mod filter;
pub mod graph;
pub mod lifecycle;
pub mod oscillator;
pub mod param;
pub mod pitch;
pub mod renderer;
pub mod shaper;
pub mod timbre;
pub mod voice;
