//! WAV in and out for 16 kHz mono PCM.

use std::io::{Cursor, Read, Seek};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::Result;
use crate::error::Error;
use crate::source::audio::SAMPLE_RATE;

fn spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn wav_error(err: hound::Error) -> Error {
    match err {
        hound::Error::IoError(err) => Error::Io(err),
        other => Error::config(format!("invalid WAV audio: {other}")),
    }
}

/// Load 16-bit 16 kHz mono WAV and return samples normalized to `[-1.0, 1.0]`.
///
/// Anything else is rejected; resampling and downmixing are done before audio reaches us.
pub fn read_pcm<R>(reader: R) -> Result<Vec<f32>>
where
    R: Read + Seek,
{
    let reader = WavReader::new(reader).map_err(wav_error)?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(Error::config(format!(
            "expected mono WAV (1 channel), got {} channels",
            spec.channels
        )));
    }
    if spec.sample_rate != SAMPLE_RATE {
        return Err(Error::config(format!(
            "expected {SAMPLE_RATE} Hz sample rate, got {} Hz",
            spec.sample_rate
        )));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::config("expected 16-bit integer PCM"));
    }

    reader
        .into_samples::<i16>()
        .map(|s| s.map(|pcm| f32::from(pcm) / f32::from(i16::MAX)).map_err(wav_error))
        .collect()
}

/// Encode samples as an in-memory 16-bit WAV file (for upload to HTTP transcription APIs).
pub fn encode_pcm(samples: &[f32]) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = WavWriter::new(&mut buf, spec()).map_err(wav_error)?;
        for &sample in samples {
            let pcm = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(pcm).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }
    Ok(buf.into_inner())
}
