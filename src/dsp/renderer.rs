//! WAV renderer — bounces a single note offline to a WAV byte buffer.

use futures::executor::block_on;

use crate::config::EngineConfig;
use crate::error::AudioError;
use crate::instrument::NoteRequest;

use super::engine::PlaybackEngine;
use super::lifecycle::HeadlessHost;

/// Silence rendered after the note's sources stop.
const TAIL_SECONDS: f64 = 0.1;
/// Longest note that can be bounced.
pub const MAX_RENDER_SECONDS: f64 = 60.0;

/// Render one note to a WAV file as bytes (16-bit stereo PCM).
pub fn render_note_wav(config: &EngineConfig, request: NoteRequest) -> Result<Vec<u8>, AudioError> {
    let duration = request.duration;
    if duration > MAX_RENDER_SECONDS {
        return Err(AudioError::InvalidNoteRequest(format!(
            "cannot render {duration}s, the limit is {MAX_RENDER_SECONDS}s"
        )));
    }
    let mut engine = PlaybackEngine::new(HeadlessHost, config.clone());
    block_on(engine.play_note(request))?;

    let sample_rate = engine.config().sample_rate;
    let seconds = duration + engine.config().lifecycle.stop_guard + TAIL_SECONDS;
    let mut mono = vec![0.0f32; (seconds * sample_rate).ceil() as usize];
    engine.render(&mut mono);

    Ok(encode_wav(&to_pcm_i16_stereo(&mono), sample_rate as u32, 2))
}

/// Duplicate mono samples into interleaved stereo i16 PCM.
fn to_pcm_i16_stereo(mono: &[f32]) -> Vec<i16> {
    let mut stereo = Vec::with_capacity(mono.len() * 2);
    for &s in mono {
        let sample = (s as f64 * 32767.0).round().clamp(-32768.0, 32767.0) as i16;
        stereo.push(sample); // L
        stereo.push(sample); // R
    }
    stereo
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_size).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    buf
}
