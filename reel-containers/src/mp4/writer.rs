use super::{
    audio_specific_config, container, full_box, mp4_box, strip_start_code, AAC_SAMPLE_RATES,
    MAX_CHUNK_SAMPLES, MOVIE_TIMESCALE, VIDEO_TIMESCALE,
};
use crate::error::{ContainerError, Result};
use crate::traits::ContainerWriter;
use reel_core::{BufferInfo, MediaFormat, Track};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct SampleEntry {
    size: u32,
    timestamp_us: i64,
    key_frame: bool,
}

#[derive(Debug, Clone, Copy)]
struct Chunk {
    offset: u64,
    samples: u32,
}

struct TrackState {
    kind: Track,
    format: MediaFormat,
    timescale: u32,
    samples: Vec<SampleEntry>,
    chunks: Vec<Chunk>,
}

impl TrackState {
    fn new(kind: Track, format: MediaFormat) -> Self {
        let timescale = match kind {
            Track::Video => VIDEO_TIMESCALE,
            Track::Audio => format.sample_rate.unwrap_or(48_000),
        };
        Self {
            kind,
            format,
            timescale,
            samples: Vec::new(),
            chunks: Vec::new(),
        }
    }

    fn to_timescale(&self, timestamp_us: i64) -> u64 {
        (timestamp_us.max(0) as u128 * self.timescale as u128 / 1_000_000) as u64
    }

    /// Duration of a sample with no successor.
    fn default_sample_duration(&self) -> u32 {
        match self.kind {
            Track::Video => self.timescale / self.format.frame_rate.unwrap_or(30).max(1),
            Track::Audio => 1024,
        }
    }

    /// Per-sample durations in media timescale units.
    fn sample_durations(&self) -> Vec<u32> {
        let times: Vec<u64> = self
            .samples
            .iter()
            .map(|sample| self.to_timescale(sample.timestamp_us))
            .collect();
        let mut durations: Vec<u32> = times
            .windows(2)
            .map(|pair| pair[1].saturating_sub(pair[0]).max(1) as u32)
            .collect();
        if !times.is_empty() {
            let last = durations
                .last()
                .copied()
                .unwrap_or_else(|| self.default_sample_duration());
            durations.push(last);
        }
        durations
    }
}

/// Writes an MP4 file: `ftyp`, a 64-bit `mdat` filled as samples arrive, and
/// a `moov` index on finish.
pub struct Mp4Writer<W: Write + Seek + Send> {
    writer: W,
    tracks: Vec<TrackState>,
    mdat_start: u64,
    last_track: Option<usize>,
    started: bool,
    finished: bool,
}

impl Mp4Writer<BufWriter<File>> {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Created MP4 output");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Seek + Send> Mp4Writer<W> {
    /// Write to an already opened stream.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            tracks: Vec::new(),
            mdat_start: 0,
            last_track: None,
            started: false,
            finished: false,
        }
    }

    /// Get the underlying stream back.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_ftyp(&mut self) -> Result<()> {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"isom");
        payload.extend_from_slice(&0x200u32.to_be_bytes());
        for brand in [b"isom", b"iso2", b"avc1", b"mp41"] {
            payload.extend_from_slice(brand);
        }
        self.writer.write_all(&mp4_box(b"ftyp", &payload))?;
        Ok(())
    }

    fn start_mdat(&mut self) -> Result<()> {
        self.mdat_start = self.writer.stream_position()?;
        // size = 1 selects the 64-bit largesize field that follows the type
        self.writer.write_all(&1u32.to_be_bytes())?;
        self.writer.write_all(b"mdat")?;
        self.writer.write_all(&[0u8; 8])?;
        Ok(())
    }

    fn finish_mdat(&mut self) -> Result<()> {
        let end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(self.mdat_start + 8))?;
        self.writer
            .write_all(&(end - self.mdat_start).to_be_bytes())?;
        self.writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn build_moov(&self) -> Result<Vec<u8>> {
        let durations: Vec<Vec<u32>> = self.tracks.iter().map(TrackState::sample_durations).collect();
        let movie_duration = self
            .tracks
            .iter()
            .zip(&durations)
            .map(|(track, d)| movie_time(track, d))
            .max()
            .unwrap_or(0);

        let mut children = vec![self.build_mvhd(movie_duration)];
        for (i, (track, d)) in self.tracks.iter().zip(&durations).enumerate() {
            children.push(build_trak(track, d, i as u32 + 1)?);
        }
        Ok(container(b"moov", &children))
    }

    fn build_mvhd(&self, duration: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(108);
        data.extend_from_slice(&0u64.to_be_bytes()); // creation and modification time
        data.extend_from_slice(&MOVIE_TIMESCALE.to_be_bytes());
        data.extend_from_slice(&(duration.min(u32::MAX as u64) as u32).to_be_bytes());
        data.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
        data.extend_from_slice(&[0x01, 0x00]); // volume 1.0
        data.extend_from_slice(&[0u8; 10]);
        data.extend_from_slice(&identity_matrix());
        data.extend_from_slice(&[0u8; 24]);
        data.extend_from_slice(&(self.tracks.len() as u32 + 1).to_be_bytes());
        full_box(b"mvhd", 0, 0, &data)
    }
}

fn movie_time(track: &TrackState, durations: &[u32]) -> u64 {
    let total: u64 = durations.iter().map(|&d| d as u64).sum();
    total * MOVIE_TIMESCALE as u64 / track.timescale as u64
}

fn identity_matrix() -> Vec<u8> {
    [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000]
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect()
}

fn build_trak(track: &TrackState, durations: &[u32], track_id: u32) -> Result<Vec<u8>> {
    let media_duration: u64 = durations.iter().map(|&d| d as u64).sum();
    Ok(container(
        b"trak",
        &[
            build_tkhd(track, movie_time(track, durations), track_id),
            container(
                b"mdia",
                &[
                    build_mdhd(track, media_duration),
                    build_hdlr(track.kind),
                    build_minf(track, durations)?,
                ],
            ),
        ],
    ))
}

fn build_tkhd(track: &TrackState, duration: u64, track_id: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(80);
    data.extend_from_slice(&0u64.to_be_bytes()); // creation and modification time
    data.extend_from_slice(&track_id.to_be_bytes());
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(&(duration.min(u32::MAX as u64) as u32).to_be_bytes());
    data.extend_from_slice(&[0u8; 8]);
    data.extend_from_slice(&[0u8; 4]); // layer, alternate group
    match track.kind {
        Track::Audio => data.extend_from_slice(&[0x01, 0x00]),
        Track::Video => data.extend_from_slice(&[0, 0]),
    }
    data.extend_from_slice(&[0u8; 2]);
    data.extend_from_slice(&identity_matrix());
    let (width, height) = match track.kind {
        Track::Video => (
            track.format.width.unwrap_or(0),
            track.format.height.unwrap_or(0),
        ),
        Track::Audio => (0, 0),
    };
    data.extend_from_slice(&(width << 16).to_be_bytes());
    data.extend_from_slice(&(height << 16).to_be_bytes());
    // flags: enabled, in movie
    full_box(b"tkhd", 0, 0x03, &data)
}

fn build_mdhd(track: &TrackState, duration: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(20);
    data.extend_from_slice(&0u64.to_be_bytes());
    data.extend_from_slice(&track.timescale.to_be_bytes());
    data.extend_from_slice(&(duration.min(u32::MAX as u64) as u32).to_be_bytes());
    data.extend_from_slice(&[0x55, 0xC4]); // "und"
    data.extend_from_slice(&[0, 0]);
    full_box(b"mdhd", 0, 0, &data)
}

fn build_hdlr(kind: Track) -> Vec<u8> {
    let (handler, name): (&[u8; 4], &str) = match kind {
        Track::Video => (b"vide", "VideoHandler"),
        Track::Audio => (b"soun", "SoundHandler"),
    };
    let mut data = Vec::new();
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(handler);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(name.as_bytes());
    data.push(0);
    full_box(b"hdlr", 0, 0, &data)
}

fn build_minf(track: &TrackState, durations: &[u32]) -> Result<Vec<u8>> {
    let header = match track.kind {
        Track::Video => full_box(b"vmhd", 0, 1, &[0u8; 8]),
        Track::Audio => full_box(b"smhd", 0, 0, &[0u8; 4]),
    };
    let url = full_box(b"url ", 0, 1, &[]);
    let mut dref = 1u32.to_be_bytes().to_vec();
    dref.extend_from_slice(&url);
    let dinf = container(b"dinf", &[full_box(b"dref", 0, 0, &dref)]);

    Ok(container(b"minf", &[header, dinf, build_stbl(track, durations)?]))
}

fn build_stbl(track: &TrackState, durations: &[u32]) -> Result<Vec<u8>> {
    let mut children = vec![build_stsd(track)?, build_stts(durations)];
    if track.kind == Track::Video {
        children.push(build_stss(track));
    }
    children.push(build_stsc(track));
    children.push(build_stsz(track));
    children.push(build_stco(track));
    Ok(container(b"stbl", &children))
}

fn build_stsd(track: &TrackState) -> Result<Vec<u8>> {
    let entry = match track.kind {
        Track::Video => build_avc1(&track.format)?,
        Track::Audio => build_mp4a(&track.format)?,
    };
    let mut data = 1u32.to_be_bytes().to_vec();
    data.extend_from_slice(&entry);
    Ok(full_box(b"stsd", 0, 0, &data))
}

fn build_avc1(format: &MediaFormat) -> Result<Vec<u8>> {
    if format.mime != "video/avc" {
        return Err(ContainerError::Unsupported(format!(
            "video codec {} in MP4",
            format.mime
        )));
    }
    let (width, height) = (format.require_width()?, format.require_height()?);

    let mut data = Vec::with_capacity(86);
    data.extend_from_slice(&[0u8; 6]);
    data.extend_from_slice(&[0, 1]); // data reference index
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&(width as u16).to_be_bytes());
    data.extend_from_slice(&(height as u16).to_be_bytes());
    data.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
    data.extend_from_slice(&0x0048_0000u32.to_be_bytes());
    data.extend_from_slice(&[0u8; 4]);
    data.extend_from_slice(&[0, 1]); // frame count
    data.extend_from_slice(&[0u8; 32]); // compressor name
    data.extend_from_slice(&[0, 0x18]); // depth
    data.extend_from_slice(&[0xFF, 0xFF]);

    if let [sps, pps, ..] = format.csd.as_slice() {
        data.extend_from_slice(&build_avcc(strip_start_code(sps), strip_start_code(pps)));
    }
    Ok(mp4_box(b"avc1", &data))
}

fn build_avcc(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let profile = |i: usize| sps.get(i).copied().unwrap_or(0);
    let mut data = vec![1, profile(1), profile(2), profile(3), 0xFF, 0xE1];
    data.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    data.extend_from_slice(sps);
    data.push(1);
    data.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    data.extend_from_slice(pps);
    mp4_box(b"avcC", &data)
}

fn build_mp4a(format: &MediaFormat) -> Result<Vec<u8>> {
    if format.mime != "audio/mp4a-latm" {
        return Err(ContainerError::Unsupported(format!(
            "audio codec {} in MP4",
            format.mime
        )));
    }
    let sample_rate = format.require_sample_rate()?;
    let channels = format.require_channel_count()?;

    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&[0u8; 6]);
    data.extend_from_slice(&[0, 1]);
    data.extend_from_slice(&[0u8; 8]);
    data.extend_from_slice(&(channels as u16).to_be_bytes());
    data.extend_from_slice(&16u16.to_be_bytes()); // bits per sample
    data.extend_from_slice(&[0u8; 4]);
    // 16.16 fixed point; rates above 65535 do not fit and are written as zero
    let rate_field = if sample_rate <= u16::MAX as u32 {
        sample_rate << 16
    } else {
        0
    };
    data.extend_from_slice(&rate_field.to_be_bytes());

    let config = match format.csd.first() {
        Some(csd) if !csd.is_empty() => csd.clone(),
        _ => audio_specific_config(format.aac_profile.unwrap_or(2), sample_rate, channels),
    };
    data.extend_from_slice(&build_esds(&config, format.bit_rate.unwrap_or(128_000)));
    Ok(mp4_box(b"mp4a", &data))
}

fn build_esds(config: &[u8], bit_rate: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.push(0x03); // ES_DescrTag
    data.push((23 + config.len()) as u8);
    data.extend_from_slice(&[0, 1]); // ES_ID
    data.push(0);

    data.push(0x04); // DecoderConfigDescrTag
    data.push((15 + config.len()) as u8);
    data.push(0x40); // MPEG-4 audio
    data.push(0x15); // audio stream
    data.extend_from_slice(&[0, 0, 0]);
    data.extend_from_slice(&bit_rate.to_be_bytes()); // max
    data.extend_from_slice(&bit_rate.to_be_bytes()); // average

    data.push(0x05); // DecSpecificInfoTag
    data.push(config.len() as u8);
    data.extend_from_slice(config);

    data.extend_from_slice(&[0x06, 0x01, 0x02]); // SLConfigDescriptor
    full_box(b"esds", 0, 0, &data)
}

fn build_stts(durations: &[u32]) -> Vec<u8> {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &duration in durations {
        match runs.last_mut() {
            Some((count, delta)) if *delta == duration => *count += 1,
            _ => runs.push((1, duration)),
        }
    }
    let mut data = (runs.len() as u32).to_be_bytes().to_vec();
    for (count, delta) in runs {
        data.extend_from_slice(&count.to_be_bytes());
        data.extend_from_slice(&delta.to_be_bytes());
    }
    full_box(b"stts", 0, 0, &data)
}

fn build_stss(track: &TrackState) -> Vec<u8> {
    let keys: Vec<u32> = track
        .samples
        .iter()
        .enumerate()
        .filter(|(_, sample)| sample.key_frame)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    let mut data = (keys.len() as u32).to_be_bytes().to_vec();
    for key in keys {
        data.extend_from_slice(&key.to_be_bytes());
    }
    full_box(b"stss", 0, 0, &data)
}

fn build_stsc(track: &TrackState) -> Vec<u8> {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for (i, chunk) in track.chunks.iter().enumerate() {
        if entries.last().map(|&(_, samples)| samples) != Some(chunk.samples) {
            entries.push((i as u32 + 1, chunk.samples));
        }
    }
    let mut data = (entries.len() as u32).to_be_bytes().to_vec();
    for (first_chunk, samples) in entries {
        data.extend_from_slice(&first_chunk.to_be_bytes());
        data.extend_from_slice(&samples.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes()); // sample description index
    }
    full_box(b"stsc", 0, 0, &data)
}

fn build_stsz(track: &TrackState) -> Vec<u8> {
    let mut data = 0u32.to_be_bytes().to_vec();
    data.extend_from_slice(&(track.samples.len() as u32).to_be_bytes());
    for sample in &track.samples {
        data.extend_from_slice(&sample.size.to_be_bytes());
    }
    full_box(b"stsz", 0, 0, &data)
}

fn build_stco(track: &TrackState) -> Vec<u8> {
    let wide = track.chunks.iter().any(|c| c.offset > u32::MAX as u64);
    let mut data = (track.chunks.len() as u32).to_be_bytes().to_vec();
    for chunk in &track.chunks {
        if wide {
            data.extend_from_slice(&chunk.offset.to_be_bytes());
        } else {
            data.extend_from_slice(&(chunk.offset as u32).to_be_bytes());
        }
    }
    full_box(if wide { b"co64" } else { b"stco" }, 0, 0, &data)
}

impl<W: Write + Seek + Send> ContainerWriter for Mp4Writer<W> {
    fn format_name(&self) -> &str {
        "mp4"
    }

    fn add_track(&mut self, format: &MediaFormat) -> Result<usize> {
        if self.started {
            return Err(ContainerError::AlreadyStarted);
        }
        let kind = format
            .track()
            .ok_or_else(|| ContainerError::Unsupported(format!("track of type {}", format.mime)))?;
        if kind == Track::Audio {
            let rate = format.require_sample_rate()?;
            if !AAC_SAMPLE_RATES.contains(&rate) {
                debug!(rate, "Non-standard AAC sample rate");
            }
        }
        self.tracks.push(TrackState::new(kind, format.clone()));
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ContainerError::AlreadyStarted);
        }
        self.write_ftyp()?;
        self.start_mdat()?;
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track: usize, data: &[u8], info: &BufferInfo) -> Result<()> {
        if !self.started || self.finished {
            return Err(ContainerError::NotStarted);
        }
        let offset = self.writer.stream_position()?;
        let contiguous = self.last_track == Some(track);
        let state = self
            .tracks
            .get_mut(track)
            .ok_or(ContainerError::InvalidTrackIndex(track))?;

        self.writer.write_all(data)?;
        state.samples.push(SampleEntry {
            size: data.len() as u32,
            timestamp_us: info.presentation_time_us,
            key_frame: info.is_key_frame(),
        });
        match state.chunks.last_mut() {
            Some(chunk) if contiguous && (chunk.samples as usize) < MAX_CHUNK_SAMPLES => {
                chunk.samples += 1;
            }
            _ => state.chunks.push(Chunk { offset, samples: 1 }),
        }
        self.last_track = Some(track);
        trace!(track, size = data.len(), pts = info.presentation_time_us, "Wrote MP4 sample");
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if !self.started {
            return Err(ContainerError::NotStarted);
        }
        if self.finished {
            return Ok(());
        }
        self.finish_mdat()?;
        let moov = self.build_moov()?;
        self.writer.write_all(&moov)?;
        self.writer.flush()?;
        self.finished = true;
        debug!(tracks = self.tracks.len(), "Finished MP4 output");
        Ok(())
    }
}
