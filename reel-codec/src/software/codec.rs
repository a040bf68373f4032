//! Pass-through codec.
//!
//! Decoding copies each input access unit to an output buffer (and, when a
//! surface is configured, renders it there on release). Video units holding
//! an NV12 picture, as the encoder is fed, are turned back into RGBA. Encoding does the
//! same after announcing its output format and a codec-config buffer.

use crate::backend::{Codec, CodecEvent, CodecMode, SurfaceHandle};
use crate::error::{CodecError, Result};
use reel_core::image::nv12_len;
use reel_core::{BufferFlags, BufferInfo, Image, MediaFormat, Track};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::trace;

/// Input buffers announced on start.
const INPUT_BUFFER_COUNT: usize = 4;
/// Pause after an empty input so an idle encoder does not spin.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Placeholder H.264 parameter sets reported by the software encoder.
const AVC_SPS: [u8; 8] = [0x67, 0x42, 0x00, 0x1e, 0xab, 0x40, 0x50, 0x1e];
const AVC_PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

/// Copying codec for one track type.
pub struct SoftwareCodec {
    track: Track,
    mode: CodecMode,
    format: Option<MediaFormat>,
    surface: Option<SurfaceHandle>,
    running: bool,
    events: VecDeque<CodecEvent>,
    outputs: HashMap<usize, (Vec<u8>, i64)>,
    next_output: usize,
    format_reported: bool,
    inputs_queued: u64,
    frames_out: u64,
    idle: bool,
    fail_after: Option<u64>,
    failed: bool,
}

impl SoftwareCodec {
    /// Codec for `track`, running in `mode`.
    pub fn new(track: Track, mode: CodecMode) -> Self {
        Self {
            track,
            mode,
            format: None,
            surface: None,
            running: false,
            events: VecDeque::new(),
            outputs: HashMap::new(),
            next_output: 0,
            format_reported: false,
            inputs_queued: 0,
            frames_out: 0,
            idle: false,
            fail_after: None,
            failed: false,
        }
    }

    /// Report a runtime failure once `inputs` media buffers have been queued.
    #[must_use]
    pub fn failing_after(mut self, inputs: u64) -> Self {
        self.fail_after = Some(inputs);
        self
    }

    fn push_output(&mut self, data: Vec<u8>, timestamp_us: i64, flags: BufferFlags) {
        let index = self.next_output;
        self.next_output += 1;
        let info = BufferInfo::new(data.len(), timestamp_us, flags);
        self.outputs.insert(index, (data, timestamp_us));
        self.events.push_back(CodecEvent::OutputAvailable(index, info));
    }

    /// Output bytes for one decoded video or audio unit.
    fn decoded(&self, data: &[u8]) -> Result<Vec<u8>> {
        let picture = self
            .format
            .as_ref()
            .filter(|_| self.track == Track::Video)
            .and_then(|format| Some((format.width?, format.height?)));
        match picture {
            Some((width, height)) if data.len() == nv12_len(width, height) => {
                Ok(Image::from_nv12(width, height, data)?.into_raw())
            }
            _ => Ok(data.to_vec()),
        }
    }

    fn output_format(&self) -> MediaFormat {
        let mut format = self.format.clone().unwrap_or_default();
        if self.track == Track::Video && format.csd.is_empty() {
            format.csd = vec![AVC_SPS.to_vec(), AVC_PPS.to_vec()];
        }
        format
    }

    fn encoded_flags(&self) -> BufferFlags {
        if self.track == Track::Audio {
            return BufferFlags::KEY_FRAME;
        }
        let format = self.format.as_ref();
        let fps = format.and_then(|f| f.frame_rate).unwrap_or(30) as u64;
        let key = match format.and_then(|f| f.key_frame_interval).unwrap_or(1) {
            interval if interval < 0 => self.frames_out == 0,
            0 => true,
            interval => self.frames_out % (interval as u64 * fps).max(1) == 0,
        };
        if key {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::empty()
        }
    }
}

impl Codec for SoftwareCodec {
    fn configure(
        &mut self,
        format: &MediaFormat,
        surface: Option<SurfaceHandle>,
        mode: CodecMode,
    ) -> Result<()> {
        if mode != self.mode {
            return Err(CodecError::Configure(format!(
                "{:?} codec configured for {:?}",
                self.mode, mode
            )));
        }
        if !self.track.matches_mime(&format.mime) {
            return Err(CodecError::Configure(format!(
                "{} codec cannot handle {}",
                self.track, format.mime
            )));
        }
        self.format = Some(format.clone());
        self.surface = surface;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(CodecError::Configure("codec started before configure".into()));
        }
        self.running = true;
        self.events
            .extend((0..INPUT_BUFFER_COUNT).map(CodecEvent::InputAvailable));
        Ok(())
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<CodecEvent>> {
        if !self.running {
            return Err(CodecError::NotRunning);
        }
        if self.failed {
            return Err(CodecError::runtime(self.track, "injected codec failure"));
        }
        if std::mem::take(&mut self.idle) {
            std::thread::sleep(IDLE_BACKOFF.min(timeout));
        }
        match self.events.pop_front() {
            Some(event) => Ok(Some(event)),
            None => {
                std::thread::sleep(IDLE_BACKOFF.min(timeout));
                Ok(None)
            }
        }
    }

    fn queue_input(
        &mut self,
        index: usize,
        data: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) -> Result<()> {
        if !self.running {
            return Err(CodecError::NotRunning);
        }
        if index >= INPUT_BUFFER_COUNT {
            return Err(CodecError::InvalidBuffer(index));
        }

        if flags.contains(BufferFlags::END_OF_STREAM) {
            trace!(track = %self.track, "software codec saw end of stream");
            self.push_output(Vec::new(), timestamp_us, BufferFlags::END_OF_STREAM);
            return Ok(());
        }

        if data.is_empty() {
            self.idle = true;
            self.events.push_back(CodecEvent::InputAvailable(index));
            return Ok(());
        }

        self.inputs_queued += 1;
        if self.fail_after.is_some_and(|limit| self.inputs_queued > limit) {
            self.failed = true;
            return Ok(());
        }

        if self.mode == CodecMode::Encode && !self.format_reported {
            self.format_reported = true;
            let format = self.output_format();
            let config: Vec<u8> = format.csd.concat();
            self.events
                .push_back(CodecEvent::OutputFormatChanged(format));
            if !config.is_empty() {
                self.push_output(config, 0, BufferFlags::CODEC_CONFIG);
            }
        }

        let (out, out_flags) = match self.mode {
            CodecMode::Encode => (data.to_vec(), self.encoded_flags()),
            CodecMode::Decode => (self.decoded(data)?, flags & BufferFlags::KEY_FRAME),
        };
        self.frames_out += 1;
        self.push_output(out, timestamp_us, out_flags);
        self.events.push_back(CodecEvent::InputAvailable(index));
        Ok(())
    }

    fn output_buffer(&mut self, index: usize) -> Result<&[u8]> {
        self.outputs
            .get(&index)
            .map(|(data, _)| data.as_slice())
            .ok_or(CodecError::InvalidBuffer(index))
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<()> {
        let (data, timestamp_us) = self
            .outputs
            .remove(&index)
            .ok_or(CodecError::InvalidBuffer(index))?;
        if render && !data.is_empty() {
            match &self.surface {
                Some(surface) => surface.queue_frame(&data, timestamp_us)?,
                None => return Err(CodecError::surface("render requested without a surface")),
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        self.events.clear();
        self.outputs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(5);

    fn drain(codec: &mut SoftwareCodec) -> Vec<CodecEvent> {
        let mut events = Vec::new();
        while let Some(event) = codec.next_event(TIMEOUT).unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_start_announces_inputs() {
        let mut codec = SoftwareCodec::new(Track::Audio, CodecMode::Decode);
        codec
            .configure(&MediaFormat::audio("audio/raw", 8_000, 1), None, CodecMode::Decode)
            .unwrap();
        codec.start().unwrap();
        let events = drain(&mut codec);
        assert_eq!(events.len(), INPUT_BUFFER_COUNT);
        assert!(events.iter().all(|e| matches!(e, CodecEvent::InputAvailable(_))));
    }

    #[test]
    fn test_encoder_reports_format_then_config() {
        let format = MediaFormat::video("video/avc", 2, 2).with_frame_rate(30);
        let mut codec = SoftwareCodec::new(Track::Video, CodecMode::Encode);
        codec.configure(&format, None, CodecMode::Encode).unwrap();
        codec.start().unwrap();
        drain(&mut codec);

        codec.queue_input(0, &[1, 2, 3], 0, BufferFlags::empty()).unwrap();
        let events = drain(&mut codec);
        assert!(matches!(&events[0], CodecEvent::OutputFormatChanged(f) if f.csd.len() == 2));
        assert!(matches!(events[1], CodecEvent::OutputAvailable(_, info) if info.is_codec_config()));
        match events[2] {
            CodecEvent::OutputAvailable(index, info) => {
                assert!(info.is_key_frame());
                assert_eq!(codec.output_buffer(index).unwrap(), &[1, 2, 3]);
            }
            ref other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events[3], CodecEvent::InputAvailable(0));
    }

    #[test]
    fn test_end_of_stream_output() {
        let mut codec = SoftwareCodec::new(Track::Audio, CodecMode::Encode);
        codec
            .configure(&MediaFormat::audio("audio/mp4a-latm", 8_000, 1), None, CodecMode::Encode)
            .unwrap();
        codec.start().unwrap();
        drain(&mut codec);

        codec.queue_input(1, &[], 0, BufferFlags::END_OF_STREAM).unwrap();
        match codec.next_event(TIMEOUT).unwrap() {
            Some(CodecEvent::OutputAvailable(_, info)) => assert!(info.is_end_of_stream()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_injected_failure() {
        let mut codec = SoftwareCodec::new(Track::Video, CodecMode::Decode).failing_after(1);
        codec
            .configure(&MediaFormat::video("video/avc", 1, 1), None, CodecMode::Decode)
            .unwrap();
        codec.start().unwrap();
        drain(&mut codec);
        codec.queue_input(0, &[0; 4], 0, BufferFlags::empty()).unwrap();
        codec.queue_input(1, &[0; 4], 1, BufferFlags::empty()).unwrap();
        assert!(matches!(
            codec.next_event(TIMEOUT),
            Err(CodecError::Runtime { track: Track::Video, .. })
        ));
    }

    #[test]
    fn test_decoder_expands_nv12() {
        let picture = Image::solid(4, 2, [10, 200, 30, 255]);
        let mut codec = SoftwareCodec::new(Track::Video, CodecMode::Decode);
        codec
            .configure(&MediaFormat::video("video/avc", 4, 2), None, CodecMode::Decode)
            .unwrap();
        codec.start().unwrap();
        drain(&mut codec);

        codec.queue_input(0, &picture.to_nv12(), 0, BufferFlags::KEY_FRAME).unwrap();
        codec.queue_input(1, picture.as_raw(), 1, BufferFlags::empty()).unwrap();
        let sizes: Vec<usize> = drain(&mut codec)
            .into_iter()
            .filter_map(|event| match event {
                CodecEvent::OutputAvailable(_, info) => Some(info.size),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![32, 32]);
    }

    #[test]
    fn test_rejects_wrong_track_mime() {
        let mut codec = SoftwareCodec::new(Track::Audio, CodecMode::Decode);
        let result = codec.configure(&MediaFormat::video("video/avc", 1, 1), None, CodecMode::Decode);
        assert!(matches!(result, Err(CodecError::Configure(_))));
    }
}
