//! Turns one completed synthesis result into the protocol event sequence.

use rigel_engine::AudioResult;
use rigel_protocol::Event;

/// One `audio-start`, the PCM sliced into `audio-chunk`s of at most
/// `chunk_bytes` payload bytes (the last one may be shorter), then one
/// `audio-stop`. Reassembling the chunks in order reproduces the buffer
/// exactly.
pub fn events(audio: &AudioResult, chunk_bytes: usize) -> Vec<Event> {
    let chunk_bytes = chunk_bytes.max(1);
    let mut events = Vec::with_capacity(2 + audio.pcm.len().div_ceil(chunk_bytes));

    events.push(Event::AudioStart(audio.format));
    for chunk in audio.pcm.chunks(chunk_bytes) {
        events.push(Event::AudioChunk {
            format: audio.format,
            payload: chunk.to_vec(),
        });
    }
    events.push(Event::AudioStop);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigel_protocol::AudioFormat;

    const FORMAT: AudioFormat = AudioFormat {
        rate: 22050,
        width: 16,
        channels: 1,
    };

    fn audio(len: usize) -> AudioResult {
        AudioResult {
            pcm: (0..len).map(|i| (i % 251) as u8).collect(),
            format: FORMAT,
        }
    }

    fn chunk_sizes(events: &[Event]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::AudioChunk { payload, .. } => Some(payload.len()),
                _ => None,
            })
            .collect()
    }

    fn reassemble(events: &[Event]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::AudioChunk { payload, .. } => Some(payload.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    #[test]
    fn fifty_kilobytes_at_sixteen_thousand_per_chunk() {
        let audio = audio(50000);
        let events = events(&audio, 16000);

        assert_eq!(events[0], Event::AudioStart(FORMAT));
        assert_eq!(events[events.len() - 1], Event::AudioStop);
        assert_eq!(chunk_sizes(&events), vec![16000, 16000, 16000, 2000]);
        assert_eq!(reassemble(&events), audio.pcm);
    }

    #[test]
    fn reassembly_is_lossless_for_awkward_sizes() {
        for (len, chunk) in [(1, 1), (10, 3), (4096, 4096), (4097, 4096), (5, 100)] {
            let audio = audio(len);
            let events = events(&audio, chunk);
            assert_eq!(reassemble(&events), audio.pcm, "len={len} chunk={chunk}");
        }
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let audio = audio(3);
        assert_eq!(chunk_sizes(&events(&audio, 0)), vec![1, 1, 1]);
    }

    #[test]
    fn empty_audio_yields_start_stop_only() {
        let events = events(&audio(0), 4096);
        assert_eq!(events, vec![Event::AudioStart(FORMAT), Event::AudioStop]);
    }
}
