use super::{EncodeSink, EngineHandle, EngineState, EngineTimeouts, Flow};
use crate::backend::{Codec, CodecEvent, CodecInfo, CodecMode, MediaBackend};
use crate::error::{CodecError, Result};
use flume::{Receiver, TryRecvError};
use reel_core::{BufferFlags, BufferInfo, MediaFormat, Sample, Track};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Drives one encoder from a sample queue to an [`EncodeSink`].
///
/// The queue never blocks the codec: when it is empty the engine queues an
/// empty input and tries again on the next input buffer. Once every sender is
/// gone and the queue is drained, end of stream is queued.
pub struct EncodeEngine {
    track: Track,
    codec: Box<dyn Codec>,
    queue: Receiver<Sample>,
    sink: Arc<dyn EncodeSink>,
    timeouts: EngineTimeouts,
    state: EngineState,
    encoded: u64,
    last_timestamp_us: i64,
    started: bool,
    released: bool,
}

impl EncodeEngine {
    /// Create and configure an encoder for `format`.
    pub fn new(
        backend: &dyn MediaBackend,
        info: &CodecInfo,
        format: &MediaFormat,
        queue: Receiver<Sample>,
        sink: Arc<dyn EncodeSink>,
        timeouts: EngineTimeouts,
    ) -> Result<Self> {
        let track = format
            .track()
            .ok_or_else(|| CodecError::NoCodec(format.mime.clone()))?;
        let mut codec = backend.create_encoder(info)?;
        codec.configure(format, None, CodecMode::Encode)?;
        debug!(track = %track, codec = %info.name, "Configured encoder");
        Ok(Self {
            track,
            codec,
            queue,
            sink,
            timeouts,
            state: EngineState::AwaitingInput,
            encoded: 0,
            last_timestamp_us: 0,
            started: false,
            released: false,
        })
    }

    /// Track this engine encodes.
    pub fn track(&self) -> Track {
        self.track
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Media buffers produced so far.
    pub fn encoded(&self) -> u64 {
        self.encoded
    }

    /// Start the codec.
    pub fn start(&mut self) -> Result<()> {
        self.codec.start()?;
        self.started = true;
        self.state = EngineState::AwaitingInput;
        Ok(())
    }

    /// Handle at most one codec event.
    pub fn step(&mut self) -> Result<EngineState> {
        match self.codec.next_event(self.timeouts.poll)? {
            None => {}
            Some(CodecEvent::InputAvailable(index)) => self.fill_input(index)?,
            Some(CodecEvent::OutputAvailable(index, info)) => self.drain_output(index, info)?,
            Some(CodecEvent::OutputFormatChanged(format)) => {
                debug!(track = %self.track, mime = %format.mime, "Encoder output format ready");
                if self.sink.output_format_changed(self.track, format) == Flow::Stop {
                    self.state = EngineState::Done;
                }
            }
        }
        Ok(self.state)
    }

    /// Run the engine on its own thread.
    pub fn spawn(self, name: impl Into<String>) -> Result<EngineHandle> {
        EngineHandle::spawn(name.into(), move |stop| self.run(stop))
    }

    fn run(mut self, stop: &AtomicBool) {
        if let Err(err) = self.drive(stop) {
            if stop.load(Ordering::Acquire) {
                debug!(track = %self.track, "Encoder error after stop: {}", err);
            } else {
                error!(track = %self.track, "Encoder failed: {}", err);
                self.sink.encoder_failed(self.track, err);
            }
        }
        self.release();
    }

    fn drive(&mut self, stop: &AtomicBool) -> Result<()> {
        self.start()?;
        while !stop.load(Ordering::Acquire) {
            if self.step()? == EngineState::Done {
                break;
            }
        }
        Ok(())
    }

    fn fill_input(&mut self, index: usize) -> Result<()> {
        if self.state != EngineState::AwaitingInput {
            return Ok(());
        }
        match self.queue.try_recv() {
            Ok(sample) => {
                self.last_timestamp_us = sample.timestamp_us;
                self.codec.queue_input(
                    index,
                    sample.data(),
                    sample.timestamp_us,
                    BufferFlags::empty(),
                )
            }
            Err(TryRecvError::Empty) => {
                self.codec
                    .queue_input(index, &[], self.last_timestamp_us, BufferFlags::empty())
            }
            Err(TryRecvError::Disconnected) => {
                trace!(track = %self.track, "Sample queue closed, queueing end of stream");
                self.state = EngineState::AwaitingOutput;
                self.codec.queue_input(
                    index,
                    &[],
                    self.last_timestamp_us,
                    BufferFlags::END_OF_STREAM,
                )
            }
        }
    }

    fn drain_output(&mut self, index: usize, info: BufferInfo) -> Result<()> {
        if info.is_codec_config() {
            return self.codec.release_output(index, false);
        }

        if !info.is_empty() {
            let resume = self.state;
            self.state = EngineState::Draining;
            self.encoded += 1;
            let data = self.codec.output_buffer(index)?;
            let flow = self.sink.submit(self.track, data, &info, self.encoded);
            if flow == Flow::Stop {
                trace!(track = %self.track, encoded = self.encoded, "Holding final encoder output");
                self.state = EngineState::Done;
                return Ok(());
            }
            self.state = resume;
        }
        self.codec.release_output(index, false)?;

        if info.is_end_of_stream() {
            debug!(track = %self.track, encoded = self.encoded, "Encoder reached end of stream");
            self.state = EngineState::Done;
            self.sink.encoder_finished(self.track);
        }
        Ok(())
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if self.started {
            if let Err(err) = self.codec.stop() {
                debug!(track = %self.track, "Failed to stop encoder: {}", err);
            }
        }
    }
}

impl Drop for EncodeEngine {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareBackend;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        formats: Mutex<Vec<MediaFormat>>,
        submitted: Mutex<Vec<(usize, i64, u64)>>,
        finished: Mutex<bool>,
        hold_at: Option<u64>,
    }

    impl EncodeSink for RecordingSink {
        fn output_format_changed(&self, _track: Track, format: MediaFormat) -> Flow {
            self.formats.lock().push(format);
            Flow::Continue
        }

        fn submit(&self, _track: Track, data: &[u8], info: &BufferInfo, encoded: u64) -> Flow {
            self.submitted
                .lock()
                .push((data.len(), info.presentation_time_us, encoded));
            if self.hold_at == Some(encoded) {
                Flow::Stop
            } else {
                Flow::Continue
            }
        }

        fn encoder_finished(&self, _track: Track) {
            *self.finished.lock() = true;
        }

        fn encoder_failed(&self, track: Track, error: CodecError) {
            panic!("{} encoder failed: {}", track, error);
        }
    }

    fn engine(sink: Arc<RecordingSink>, queue: Receiver<Sample>) -> EncodeEngine {
        let backend = SoftwareBackend::new();
        let info = backend.find_encoder("audio/mp4a-latm").unwrap();
        let format = MediaFormat::audio("audio/mp4a-latm", 44_100, 2);
        EncodeEngine::new(&backend, &info, &format, queue, sink, EngineTimeouts::default())
            .unwrap()
    }

    fn run_to_end(engine: &mut EncodeEngine) {
        engine.start().unwrap();
        run_to_end_started(engine);
    }

    fn run_to_end_started(engine: &mut EncodeEngine) {
        for _ in 0..10_000 {
            if engine.step().unwrap() == EngineState::Done {
                return;
            }
        }
        panic!("encoder did not finish");
    }

    #[test]
    fn test_drains_queue_then_finishes() {
        let (tx, rx) = flume::bounded(8);
        for n in 0..5 {
            tx.send(Sample::new(vec![n as u8; 16], n * 1000)).unwrap();
        }
        drop(tx);

        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine(sink.clone(), rx);
        run_to_end(&mut engine);

        assert_eq!(sink.formats.lock().len(), 1);
        let submitted = sink.submitted.lock();
        assert_eq!(submitted.len(), 5);
        assert_eq!(submitted[4], (16, 4000, 5));
        assert!(*sink.finished.lock());
        assert_eq!(engine.encoded(), 5);
    }

    #[test]
    fn test_empty_queue_keeps_encoder_waiting() {
        let (tx, rx) = flume::bounded(8);
        let sink = Arc::new(RecordingSink::default());
        let mut engine = engine(sink.clone(), rx);
        engine.start().unwrap();

        for _ in 0..20 {
            assert_eq!(engine.step().unwrap(), EngineState::AwaitingInput);
        }
        assert!(sink.submitted.lock().is_empty());

        tx.send(Sample::new(vec![1; 4], 0)).unwrap();
        drop(tx);
        run_to_end_started(&mut engine);
        assert_eq!(sink.submitted.lock().len(), 1);
    }

    #[test]
    fn test_stop_holds_output() {
        let (tx, rx) = flume::bounded(8);
        for n in 0..4 {
            tx.send(Sample::new(vec![0; 8], n)).unwrap();
        }
        drop(tx);

        let sink = Arc::new(RecordingSink {
            hold_at: Some(2),
            ..Default::default()
        });
        let mut engine = engine(sink.clone(), rx);
        run_to_end(&mut engine);

        assert_eq!(sink.submitted.lock().len(), 2);
        assert!(!*sink.finished.lock());
    }
}
