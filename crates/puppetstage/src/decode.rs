//! Voice decoding
//!
//! WAV via hound is always available; MP3/FLAC/OGG go through symphonia when
//! the `symphonia-decode` feature is enabled. Output is always mono: the
//! first channel of whatever came in.
//!
//! Decoding is allowed to fail. [`decode_voice`] folds failures into
//! [`DecodedVoice::Unavailable`] so playback can carry on without audio.

use std::io::Cursor;

use thiserror::Error;
use tracing::{debug, warn};

/// Duration reported for a voice that couldn't be decoded.
pub const FALLBACK_DURATION: f64 = 0.5;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to parse WAV: {0}")]
    Wav(#[from] hound::Error),

    #[error("unsupported audio format (enable symphonia-decode for MP3/FLAC/OGG)")]
    Unsupported,

    #[error("audio has no channels")]
    NoChannels,

    #[cfg(feature = "symphonia-decode")]
    #[error("no audio track found")]
    NoTrack,

    #[cfg(feature = "symphonia-decode")]
    #[error("audio has no sample rate")]
    NoSampleRate,

    #[cfg(feature = "symphonia-decode")]
    #[error("symphonia: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),
}

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }
}

/// Outcome of decoding a voice payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedVoice {
    Decoded {
        samples: Vec<f32>,
        sample_rate: u32,
        duration: f64,
    },
    Unavailable {
        fallback_duration: f64,
    },
}

impl DecodedVoice {
    pub fn duration(&self) -> f64 {
        match self {
            DecodedVoice::Decoded { duration, .. } => *duration,
            DecodedVoice::Unavailable { fallback_duration } => *fallback_duration,
        }
    }

    pub fn is_decoded(&self) -> bool {
        matches!(self, DecodedVoice::Decoded { .. })
    }
}

impl From<DecodedAudio> for DecodedVoice {
    fn from(audio: DecodedAudio) -> Self {
        let duration = audio.duration_seconds();
        DecodedVoice::Decoded {
            samples: audio.samples,
            sample_rate: audio.sample_rate,
            duration,
        }
    }
}

/// Keep every `channels`-th sample starting at 0.
fn first_channel(interleaved: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels <= 1 {
        interleaved
    } else {
        interleaved.into_iter().step_by(channels).collect()
    }
}

/// Decode WAV audio using hound (always available)
pub fn decode_wav(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(data))?;

    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(DecodeError::NoChannels);
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(DecodedAudio {
        samples: first_channel(interleaved, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Decode audio using symphonia (MP3, FLAC, OGG, etc.)
#[cfg(feature = "symphonia-decode")]
pub fn decode_audio_symphonia(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoTrack)?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::NoSampleRate)?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let track_id = track.id;
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend(sample_buf.samples());
    }

    Ok(DecodedAudio {
        samples: first_channel(interleaved, channels),
        sample_rate,
    })
}

/// Decode audio from raw bytes
///
/// Tries WAV first (hound), then symphonia formats if the feature is enabled.
pub fn decode_audio(data: &[u8]) -> Result<DecodedAudio, DecodeError> {
    if data.len() >= 4 && &data[0..4] == b"RIFF" {
        return decode_wav(data);
    }

    #[cfg(feature = "symphonia-decode")]
    {
        return decode_audio_symphonia(data);
    }

    #[cfg(not(feature = "symphonia-decode"))]
    {
        Err(DecodeError::Unsupported)
    }
}

/// Decode a voice payload, folding failure into `Unavailable`.
pub fn decode_voice(data: &[u8]) -> DecodedVoice {
    match decode_audio(data) {
        Ok(audio) => {
            debug!(
                samples = audio.samples.len(),
                sample_rate = audio.sample_rate,
                "decoded voice"
            );
            audio.into()
        }
        Err(e) => {
            warn!(bytes = data.len(), error = %e, "voice decode failed, continuing without audio");
            DecodedVoice::Unavailable {
                fallback_duration: FALLBACK_DURATION,
            }
        }
    }
}
