//! ISO base media (MP4) reading and writing.

mod reader;
mod writer;

pub use reader::{Mp4Reader, Mp4Track, SampleRef};
pub use writer::Mp4Writer;

/// Movie header timescale (milliseconds).
const MOVIE_TIMESCALE: u32 = 1000;
/// Video media timescale.
const VIDEO_TIMESCALE: u32 = 90_000;
/// Largest `moov` payload the reader will load.
const MAX_BOX_SIZE: u64 = 100 * 1024 * 1024;
/// Samples gathered per chunk before a new chunk starts.
const MAX_CHUNK_SAMPLES: usize = 10;

/// AAC sampling frequency table, indexed by `samplingFrequencyIndex`.
const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Wrap `payload` in a box of type `kind`.
fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

/// Wrap `payload` in a full box (version and flags prefix).
fn full_box(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.push(version);
    data.extend_from_slice(&flags.to_be_bytes()[1..]);
    data.extend_from_slice(payload);
    mp4_box(kind, &data)
}

/// Concatenate child boxes into a container box.
fn container(kind: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    mp4_box(kind, &children.concat())
}

/// Two-byte AudioSpecificConfig for an AAC stream.
fn audio_specific_config(object_type: u8, sample_rate: u32, channels: u32) -> Vec<u8> {
    let index = AAC_SAMPLE_RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .unwrap_or(4) as u8;
    vec![
        (object_type << 3) | (index >> 1),
        ((index & 1) << 7) | ((channels as u8 & 0x0f) << 3),
    ]
}

/// Strip an Annex B start code from a parameter set.
fn strip_start_code(nal: &[u8]) -> &[u8] {
    nal.strip_prefix(&[0, 0, 0, 1])
        .or_else(|| nal.strip_prefix(&[0, 0, 1]))
        .unwrap_or(nal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_header() {
        let b = mp4_box(b"free", &[1, 2, 3]);
        assert_eq!(&b[..4], &11u32.to_be_bytes());
        assert_eq!(&b[4..8], b"free");

        let f = full_box(b"mvhd", 1, 0x03, &[]);
        assert_eq!(f.len(), 12);
        assert_eq!(&f[8..], &[1, 0, 0, 3]);
    }

    #[test]
    fn test_audio_specific_config() {
        // AAC-LC, 44.1 kHz, stereo
        assert_eq!(audio_specific_config(2, 44_100, 2), vec![0x12, 0x10]);
        // AAC-LC, 48 kHz, mono
        assert_eq!(audio_specific_config(2, 48_000, 1), vec![0x11, 0x88]);
    }

    #[test]
    fn test_strip_start_code() {
        assert_eq!(strip_start_code(&[0, 0, 0, 1, 0x67]), &[0x67]);
        assert_eq!(strip_start_code(&[0, 0, 1, 0x68]), &[0x68]);
        assert_eq!(strip_start_code(&[0x67, 0x42]), &[0x67, 0x42]);
    }
}
