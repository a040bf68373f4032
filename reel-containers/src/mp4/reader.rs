//! MP4 reading: the `moov` sample index and sample payloads.

use super::MAX_BOX_SIZE;
use crate::error::{ContainerError, Result};
use reel_core::{MediaFormat, Track};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace};

/// Largest sample payload the reader will allocate.
const MAX_SAMPLE_SIZE: u32 = 50 * 1024 * 1024;

/// Annex B start code put in front of AVC parameter sets.
const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Location and timing of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRef {
    /// Absolute file offset of the payload.
    pub offset: u64,
    pub size: u32,
    /// Presentation time in microseconds.
    pub timestamp_us: i64,
    /// Listed in `stss`, or the track has no `stss`.
    pub key_frame: bool,
}

/// One audio or video track found in the `moov` box.
#[derive(Debug, Clone)]
pub struct Mp4Track {
    pub kind: Track,
    pub format: MediaFormat,
    pub samples: Vec<SampleRef>,
}

/// Reads the index of an MP4 file up front and sample payloads on demand.
pub struct Mp4Reader<R: Read + Seek + Send> {
    reader: R,
    tracks: Vec<Mp4Track>,
}

impl Mp4Reader<BufReader<File>> {
    /// Open and index the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = Self::new(BufReader::new(file))?;
        debug!(path = %path.as_ref().display(), tracks = reader.tracks.len(), "Opened MP4 input");
        Ok(reader)
    }
}

impl<R: Read + Seek + Send> Mp4Reader<R> {
    /// Index a stream holding an MP4 file.
    pub fn new(mut reader: R) -> Result<Self> {
        let moov = find_moov(&mut reader)?;
        let mut tracks = Vec::new();
        for (kind, payload) in children(&moov) {
            if &kind == b"trak" {
                if let Some(track) = parse_trak(payload?)? {
                    tracks.push(track);
                }
            }
        }
        Ok(Self { reader, tracks })
    }

    /// Tracks in file order.
    pub fn tracks(&self) -> &[Mp4Track] {
        &self.tracks
    }

    /// Read sample `index` of track `track` into `buf`, returning its size.
    pub fn read_sample(&mut self, track: usize, index: usize, buf: &mut Vec<u8>) -> Result<usize> {
        let sample = self
            .tracks
            .get(track)
            .ok_or(ContainerError::InvalidTrackIndex(track))?
            .samples
            .get(index)
            .copied()
            .ok_or_else(|| malformed(format!("track {} has no sample {}", track, index)))?;
        if sample.size > MAX_SAMPLE_SIZE {
            return Err(malformed(format!("sample of {} bytes", sample.size)));
        }

        buf.resize(sample.size as usize, 0);
        self.reader.seek(SeekFrom::Start(sample.offset))?;
        self.reader.read_exact(buf)?;
        trace!(track, index, size = sample.size, "Read MP4 sample");
        Ok(buf.len())
    }
}

fn malformed(message: impl Into<String>) -> ContainerError {
    ContainerError::Malformed(message.into())
}

/// Scan top-level boxes and load the `moov` payload.
fn find_moov<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    let end = reader.seek(SeekFrom::End(0))?;
    let mut offset = reader.seek(SeekFrom::Start(0))?;

    while offset + 8 <= end {
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let mut header_len = 8;
        let mut size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        if size == 1 {
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            size = u64::from_be_bytes(large);
            header_len = 16;
        } else if size == 0 {
            size = end - offset;
        }
        if size < header_len || offset + size > end {
            return Err(malformed(format!("box at {} overruns the file", offset)));
        }

        if &header[4..8] == b"moov" {
            let len = size - header_len;
            if len > MAX_BOX_SIZE {
                return Err(malformed(format!("moov of {} bytes", len)));
            }
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            return Ok(payload);
        }
        offset = reader.seek(SeekFrom::Start(offset + size))?;
    }
    Err(malformed("no moov box"))
}

/// Iterate the boxes packed in `data`.
fn children(data: &[u8]) -> impl Iterator<Item = ([u8; 4], Result<&[u8]>)> {
    let mut rest = data;
    std::iter::from_fn(move || {
        if rest.len() < 8 {
            return None;
        }
        let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let kind = [rest[4], rest[5], rest[6], rest[7]];
        let (header_len, size) = match size {
            0 => (8, rest.len()),
            1 => match read_u64(rest, 8) {
                Ok(large) => (16, large as usize),
                Err(err) => {
                    rest = &[];
                    return Some((kind, Err(err)));
                }
            },
            size => (8, size),
        };
        if size < header_len || size > rest.len() {
            rest = &[];
            let err = malformed(format!("{} box overruns its parent", String::from_utf8_lossy(&kind)));
            return Some((kind, Err(err)));
        }
        let payload = &rest[header_len..size];
        rest = &rest[size..];
        Some((kind, Ok(payload)))
    })
}

/// Payload of the first child of type `kind`.
fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Result<Option<&'a [u8]>> {
    for (found, payload) in children(data) {
        if &found == kind {
            return payload.map(Some);
        }
    }
    Ok(None)
}

fn require<'a>(data: &'a [u8], kind: &[u8; 4]) -> Result<&'a [u8]> {
    child(data, kind)?
        .ok_or_else(|| malformed(format!("missing {} box", String::from_utf8_lossy(kind))))
}

fn read_u8(data: &[u8], at: usize) -> Result<u8> {
    data.get(at)
        .copied()
        .ok_or_else(|| malformed("truncated box"))
}

fn read_u16(data: &[u8], at: usize) -> Result<u16> {
    let bytes = data.get(at..at + 2).ok_or_else(|| malformed("truncated box"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32> {
    let bytes = data.get(at..at + 4).ok_or_else(|| malformed("truncated box"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(data: &[u8], at: usize) -> Result<u64> {
    Ok((read_u32(data, at)? as u64) << 32 | read_u32(data, at + 4)? as u64)
}

/// Entries of a full box table: `count` at byte 4, `width`-byte records after.
fn table(data: &[u8], width: usize) -> Result<(usize, &[u8])> {
    let count = read_u32(data, 4)? as usize;
    let records = data
        .get(8..)
        .filter(|records| records.len() / width >= count)
        .ok_or_else(|| malformed("sample table shorter than its entry count"))?;
    Ok((count, records))
}

/// Sample table boxes of one track.
#[derive(Debug, Default)]
struct SampleTable {
    /// (sample count, delta) runs.
    stts: Vec<(u32, u32)>,
    /// (sample count, composition offset) runs.
    ctts: Vec<(u32, i64)>,
    /// 1-based sync sample numbers; `None` when every sample is a sync sample.
    stss: Option<Vec<u32>>,
    /// (first chunk, samples per chunk) runs, 1-based chunks.
    stsc: Vec<(u32, u32)>,
    sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
}

impl SampleTable {
    fn parse(stbl: &[u8]) -> Result<Self> {
        let mut table_out = Self::default();

        let (count, records) = table(require(stbl, b"stts")?, 8)?;
        for i in 0..count {
            table_out
                .stts
                .push((read_u32(records, i * 8)?, read_u32(records, i * 8 + 4)?));
        }

        if let Some(ctts) = child(stbl, b"ctts")? {
            let signed = read_u8(ctts, 0)? == 1;
            let (count, records) = table(ctts, 8)?;
            for i in 0..count {
                let raw = read_u32(records, i * 8 + 4)?;
                let offset = if signed { raw as i32 as i64 } else { raw as i64 };
                table_out.ctts.push((read_u32(records, i * 8)?, offset));
            }
        }

        if let Some(stss) = child(stbl, b"stss")? {
            let (count, records) = table(stss, 4)?;
            let keys = (0..count)
                .map(|i| read_u32(records, i * 4))
                .collect::<Result<Vec<_>>>()?;
            table_out.stss = Some(keys);
        }

        let (count, records) = table(require(stbl, b"stsc")?, 12)?;
        for i in 0..count {
            table_out
                .stsc
                .push((read_u32(records, i * 12)?, read_u32(records, i * 12 + 4)?));
        }

        let stsz = require(stbl, b"stsz")?;
        let fixed = read_u32(stsz, 4)?;
        let count = read_u32(stsz, 8)? as usize;
        table_out.sizes = if fixed != 0 {
            vec![fixed; count]
        } else {
            (0..count)
                .map(|i| read_u32(stsz, 12 + i * 4))
                .collect::<Result<Vec<_>>>()?
        };

        if let Some(stco) = child(stbl, b"stco")? {
            let (count, records) = table(stco, 4)?;
            for i in 0..count {
                table_out.chunk_offsets.push(read_u32(records, i * 4)? as u64);
            }
        } else {
            let (count, records) = table(require(stbl, b"co64")?, 8)?;
            for i in 0..count {
                table_out.chunk_offsets.push(read_u64(records, i * 8)?);
            }
        }
        Ok(table_out)
    }

    /// Total decode duration in timescale units.
    fn total_duration(&self) -> u64 {
        self.stts
            .iter()
            .map(|&(count, delta)| count as u64 * delta as u64)
            .sum()
    }

    /// Resolve chunk layout and timing into one entry per sample.
    fn samples(&self, timescale: u32) -> Result<Vec<SampleRef>> {
        let mut offsets = Vec::with_capacity(self.sizes.len());
        for (i, &(first_chunk, per_chunk)) in self.stsc.iter().enumerate() {
            let next_first = self
                .stsc
                .get(i + 1)
                .map(|&(first, _)| first)
                .unwrap_or(self.chunk_offsets.len() as u32 + 1);
            for chunk in first_chunk..next_first {
                let mut offset = *self
                    .chunk_offsets
                    .get(chunk.saturating_sub(1) as usize)
                    .ok_or_else(|| malformed(format!("stsc names missing chunk {}", chunk)))?;
                for _ in 0..per_chunk {
                    let size = *self
                        .sizes
                        .get(offsets.len())
                        .ok_or_else(|| malformed("chunks hold more samples than stsz"))?;
                    offsets.push((offset, size));
                    offset += size as u64;
                }
            }
        }
        if offsets.len() != self.sizes.len() {
            return Err(malformed(format!(
                "chunks hold {} of {} samples",
                offsets.len(),
                self.sizes.len()
            )));
        }

        let mut decode_times = Vec::with_capacity(offsets.len());
        let mut ticks = 0u64;
        for &(count, delta) in &self.stts {
            for _ in 0..count {
                decode_times.push(ticks);
                ticks += delta as u64;
            }
        }
        let composition = self
            .ctts
            .iter()
            .flat_map(|&(count, offset)| std::iter::repeat(offset).take(count as usize))
            .chain(std::iter::repeat(0));

        let scale = timescale.max(1) as i128;
        Ok(offsets
            .into_iter()
            .zip(decode_times.into_iter().chain(std::iter::repeat(ticks)))
            .zip(composition)
            .enumerate()
            .map(|(i, (((offset, size), dts), cts))| SampleRef {
                offset,
                size,
                timestamp_us: ((dts as i128 + cts as i128) * 1_000_000 / scale) as i64,
                key_frame: self
                    .stss
                    .as_ref()
                    .map_or(true, |keys| keys.binary_search(&(i as u32 + 1)).is_ok()),
            })
            .collect())
    }
}

/// Timescale and duration from `mdhd`.
fn parse_mdhd(mdhd: &[u8]) -> Result<(u32, u64)> {
    if read_u8(mdhd, 0)? == 1 {
        Ok((read_u32(mdhd, 20)?, read_u64(mdhd, 24)?))
    } else {
        Ok((read_u32(mdhd, 12)?, read_u32(mdhd, 16)? as u64))
    }
}

/// Display rotation encoded in the `tkhd` matrix.
fn parse_rotation(tkhd: &[u8]) -> Result<u32> {
    let matrix = if read_u8(tkhd, 0)? == 1 { 52 } else { 40 };
    let a = read_u32(tkhd, matrix)? as i32;
    let b = read_u32(tkhd, matrix + 4)? as i32;
    Ok(match (a.signum(), b.signum()) {
        (0, 1) => 90,
        (-1, 0) => 180,
        (0, -1) => 270,
        _ => 0,
    })
}

fn parse_trak(trak: &[u8]) -> Result<Option<Mp4Track>> {
    let mdia = require(trak, b"mdia")?;
    let hdlr = require(mdia, b"hdlr")?;
    let kind = match hdlr.get(8..12) {
        Some(b"vide") => Track::Video,
        Some(b"soun") => Track::Audio,
        other => {
            debug!(handler = ?other.map(String::from_utf8_lossy), "Skipping MP4 track");
            return Ok(None);
        }
    };
    let (timescale, media_duration) = parse_mdhd(require(mdia, b"mdhd")?)?;
    let stbl = require(require(mdia, b"minf")?, b"stbl")?;
    let table = SampleTable::parse(stbl)?;

    let stsd = require(stbl, b"stsd")?;
    let (entry_kind, entry) = children(stsd.get(8..).unwrap_or_default())
        .next()
        .ok_or_else(|| malformed("empty stsd"))?;
    let entry = entry?;

    let ticks = if media_duration > 0 {
        media_duration
    } else {
        table.total_duration()
    };
    let duration_us = (ticks as u128 * 1_000_000 / timescale.max(1) as u128) as i64;

    let format = match kind {
        Track::Video => {
            let mut format = parse_visual_entry(&entry_kind, entry)?
                .with_duration_us(duration_us)
                .with_rotation(parse_rotation(require(trak, b"tkhd")?)?);
            let total = table.total_duration();
            if total > 0 && !table.sizes.is_empty() {
                let fps = (table.sizes.len() as f64 * timescale as f64 / total as f64).round();
                format = format.with_frame_rate(fps as u32);
            }
            format
        }
        Track::Audio => parse_audio_entry(&entry_kind, entry, timescale)?.with_duration_us(duration_us),
    };

    let samples = table.samples(timescale)?;
    debug!(
        track = %kind,
        mime = %format.mime,
        samples = samples.len(),
        "Indexed MP4 track"
    );
    Ok(Some(Mp4Track {
        kind,
        format,
        samples,
    }))
}

/// Fixed fields of a VisualSampleEntry before its child boxes.
const VISUAL_ENTRY_LEN: usize = 78;
/// Fixed fields of an AudioSampleEntry before its child boxes.
const AUDIO_ENTRY_LEN: usize = 28;

fn parse_visual_entry(kind: &[u8; 4], entry: &[u8]) -> Result<MediaFormat> {
    let mime = match kind {
        b"avc1" | b"avc3" => "video/avc",
        b"hvc1" | b"hev1" => "video/hevc",
        b"mp4v" => "video/mp4v-es",
        other => {
            return Err(ContainerError::Unsupported(format!(
                "video sample entry {}",
                String::from_utf8_lossy(other)
            )))
        }
    };
    let width = read_u16(entry, 24)? as u32;
    let height = read_u16(entry, 26)? as u32;
    let mut format = MediaFormat::video(mime, width, height);

    let boxes = entry.get(VISUAL_ENTRY_LEN..).unwrap_or_default();
    if let Some(avcc) = child(boxes, b"avcC")? {
        for set in parse_avcc(avcc)? {
            let mut csd = START_CODE.to_vec();
            csd.extend_from_slice(set);
            format = format.with_csd(csd);
        }
    }
    Ok(format)
}

/// SPS then PPS from an `avcC` record.
fn parse_avcc(avcc: &[u8]) -> Result<Vec<&[u8]>> {
    let mut sets = Vec::new();
    let mut at = 5;
    for mask in [0x1f, 0xff] {
        let count = read_u8(avcc, at)? & mask;
        at += 1;
        for _ in 0..count {
            let len = read_u16(avcc, at)? as usize;
            let set = avcc
                .get(at + 2..at + 2 + len)
                .ok_or_else(|| malformed("truncated avcC"))?;
            sets.push(set);
            at += 2 + len;
        }
    }
    Ok(sets)
}

fn parse_audio_entry(kind: &[u8; 4], entry: &[u8], timescale: u32) -> Result<MediaFormat> {
    if kind != b"mp4a" {
        return Err(ContainerError::Unsupported(format!(
            "audio sample entry {}",
            String::from_utf8_lossy(kind)
        )));
    }
    let channels = read_u16(entry, 16)? as u32;
    let rate = match read_u32(entry, 24)? >> 16 {
        0 => timescale,
        rate => rate,
    };
    let mut format = MediaFormat::audio("audio/mp4a-latm", rate, channels);

    let boxes = entry.get(AUDIO_ENTRY_LEN..).unwrap_or_default();
    if let Some(esds) = child(boxes, b"esds")? {
        let (config, bit_rate) = parse_esds(esds)?;
        if bit_rate > 0 {
            format = format.with_bit_rate(bit_rate);
        }
        if let Some(&first) = config.first() {
            format = format.with_aac_profile(first >> 3);
        }
        format = format.with_csd(config.to_vec());
    }
    Ok(format)
}

/// Descriptor tag and payload length at `at`; returns the payload start.
fn descriptor(data: &[u8], at: usize, tag: u8) -> Result<(usize, usize)> {
    if read_u8(data, at)? != tag {
        return Err(malformed(format!("expected esds descriptor {:#x}", tag)));
    }
    let mut len = 0usize;
    let mut at = at + 1;
    for _ in 0..4 {
        let byte = read_u8(data, at)?;
        at += 1;
        len = len << 7 | (byte & 0x7f) as usize;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((at, len))
}

/// AudioSpecificConfig and average bit rate from an `esds` box.
fn parse_esds(esds: &[u8]) -> Result<(&[u8], u32)> {
    let (mut at, _) = descriptor(esds, 4, 0x03)?;
    let flags = read_u8(esds, at + 2)?;
    at += 3;
    if flags & 0x80 != 0 {
        at += 2;
    }
    if flags & 0x40 != 0 {
        at += 1 + read_u8(esds, at)? as usize;
    }
    if flags & 0x20 != 0 {
        at += 2;
    }

    let (at, _) = descriptor(esds, at, 0x04)?;
    let bit_rate = read_u32(esds, at + 9)?;
    let (at, len) = descriptor(esds, at + 13, 0x05)?;
    let config = esds
        .get(at..at + len)
        .ok_or_else(|| malformed("truncated esds"))?;
    Ok((config, bit_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::Mp4Writer;
    use crate::traits::ContainerWriter;
    use reel_core::{BufferFlags, BufferInfo};
    use std::io::Cursor;

    fn written(key_every: usize) -> Vec<u8> {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new()));
        let video = writer
            .add_track(
                &MediaFormat::video("video/avc", 32, 16)
                    .with_frame_rate(30)
                    .with_csd(vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e])
                    .with_csd(vec![0, 0, 0, 1, 0x68, 0xce]),
            )
            .unwrap();
        let audio = writer
            .add_track(&MediaFormat::audio("audio/mp4a-latm", 44_100, 2).with_bit_rate(96_000))
            .unwrap();
        writer.start().unwrap();
        for n in 0..12i64 {
            let flags = if n as usize % key_every == 0 {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::empty()
            };
            let frame = vec![n as u8; 40 + n as usize];
            writer
                .write_sample(video, &frame, &BufferInfo::new(frame.len(), n * 33_333, flags))
                .unwrap();
            writer
                .write_sample(audio, &[0xA0 | n as u8; 8], &BufferInfo::new(8, n * 23_219, BufferFlags::KEY_FRAME))
                .unwrap();
        }
        writer.finish().unwrap();
        writer.into_inner().into_inner()
    }

    #[test]
    fn test_reads_written_formats() {
        let reader = Mp4Reader::new(Cursor::new(written(5))).unwrap();
        let tracks = reader.tracks();
        assert_eq!(tracks.len(), 2);

        let video = &tracks[0];
        assert_eq!(video.kind, Track::Video);
        assert_eq!(video.format.mime, "video/avc");
        assert_eq!((video.format.width, video.format.height), (Some(32), Some(16)));
        assert_eq!(video.format.frame_rate, Some(30));
        assert_eq!(video.format.rotation, Some(0));
        assert_eq!(video.format.csd[0], vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1e]);
        assert_eq!(video.format.csd[1], vec![0, 0, 0, 1, 0x68, 0xce]);
        assert!((399_000..=401_000).contains(&video.format.duration_us.unwrap()));

        let audio = &tracks[1];
        assert_eq!(audio.kind, Track::Audio);
        assert_eq!(audio.format.sample_rate, Some(44_100));
        assert_eq!(audio.format.channel_count, Some(2));
        assert_eq!(audio.format.bit_rate, Some(96_000));
        assert_eq!(audio.format.aac_profile, Some(2));
    }

    #[test]
    fn test_sample_table() {
        let reader = Mp4Reader::new(Cursor::new(written(5))).unwrap();
        let video = &reader.tracks()[0].samples;
        assert_eq!(video.len(), 12);
        let keys: Vec<usize> = (0..12).filter(|&i| video[i].key_frame).collect();
        assert_eq!(keys, vec![0, 5, 10]);
        assert_eq!(video[3].size, 43);
        assert_eq!(video[0].timestamp_us, 0);
        assert!((33_300..=33_340).contains(&video[1].timestamp_us));
        assert!(video.windows(2).all(|pair| pair[0].timestamp_us < pair[1].timestamp_us));
    }

    #[test]
    fn test_reads_sample_payloads() {
        let mut reader = Mp4Reader::new(Cursor::new(written(1))).unwrap();
        let mut buf = Vec::new();
        assert_eq!(reader.read_sample(0, 7, &mut buf).unwrap(), 47);
        assert!(buf.iter().all(|&b| b == 7));
        assert_eq!(reader.read_sample(1, 11, &mut buf).unwrap(), 8);
        assert_eq!(buf, vec![0xAB; 8]);
        assert!(reader.read_sample(0, 12, &mut buf).is_err());
        assert!(matches!(
            reader.read_sample(2, 0, &mut buf),
            Err(ContainerError::InvalidTrackIndex(2))
        ));
    }

    #[test]
    fn test_rejects_file_without_moov() {
        let mut data = 16u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"ftypisom");
        data.extend_from_slice(&[0; 4]);
        assert!(matches!(
            Mp4Reader::new(Cursor::new(data)),
            Err(ContainerError::Malformed(_))
        ));
    }

    #[test]
    fn test_unfinished_output_is_rejected() {
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new()));
        writer
            .add_track(&MediaFormat::video("video/avc", 8, 8).with_frame_rate(30))
            .unwrap();
        writer.start().unwrap();
        let bytes = writer.into_inner().into_inner();
        assert!(Mp4Reader::new(Cursor::new(bytes)).is_err());
    }
}
