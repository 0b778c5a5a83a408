//! WAV output for received audio.

use std::path::Path;

use anyhow::{bail, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use rigel_protocol::AudioFormat;

/// Write raw little-endian PCM to a WAV file.
pub fn write_wav(path: &Path, format: AudioFormat, pcm: &[u8]) -> Result<()> {
    if format.width != 16 {
        bail!("unsupported sample width: {} bits", format.width);
    }

    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.rate,
        bits_per_sample: format.width,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for sample in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pcm_through_hound() {
        let path = std::env::temp_dir().join(format!("rigel-wav-{}.wav", std::process::id()));
        let format = AudioFormat {
            rate: 22050,
            width: 16,
            channels: 1,
        };
        let samples: Vec<i16> = vec![0, 100, -100, i16::MAX, i16::MIN];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        write_wav(&path, format, &pcm).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn rejects_unsupported_width() {
        let path = std::env::temp_dir().join("rigel-wav-never-written.wav");
        let format = AudioFormat {
            rate: 22050,
            width: 8,
            channels: 1,
        };
        assert!(write_wav(&path, format, &[0, 0]).is_err());
    }
}
