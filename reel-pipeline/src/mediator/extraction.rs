use super::{send_control, Control, Mediator};
use crate::error::{PipelineError, Result};
use crate::filter::FilterChain;
use crate::listener::ProgressListener;
use flume::Sender;
use reel_codec::{CodecError, DecodeSink, Decoded, Flow};
use reel_core::{Image, Track};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Filters decoded frames and hands them to the caller.
pub(crate) struct ExtractionMediator {
    target: u64,
    delivered: AtomicU64,
    filters: FilterChain,
    listener: Arc<dyn ProgressListener<Image>>,
    control: Sender<Control>,
    closed: AtomicBool,
}

impl ExtractionMediator {
    /// Mediator delivering `target` frames to `listener`.
    pub fn new(
        target: u64,
        filters: FilterChain,
        listener: Arc<dyn ProgressListener<Image>>,
        control: Sender<Control>,
    ) -> Self {
        if target == 0 {
            send_control(&control, Control::Completed);
        }
        Self {
            target,
            delivered: AtomicU64::new(0),
            filters,
            listener,
            control,
            closed: AtomicBool::new(target == 0),
        }
    }

    /// Frames handed to the listener so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn fail(&self, err: PipelineError) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            send_control(&self.control, Control::Failed(err));
        }
    }
}

impl DecodeSink for ExtractionMediator {
    fn transfer(&self, track: Track, data: Decoded, timestamp_us: i64) -> Flow {
        if self.closed.load(Ordering::Acquire) {
            return Flow::Stop;
        }
        let Decoded::Image(image) = data else {
            self.fail(PipelineError::Aborted(format!(
                "extraction cannot handle {} data",
                track
            )));
            return Flow::Stop;
        };
        let image = match self.filters.apply(image) {
            Ok(image) => image,
            Err(err) => {
                self.fail(err);
                return Flow::Stop;
            }
        };

        let count = self.delivered.fetch_add(1, Ordering::AcqRel) + 1;
        if count > self.target {
            return Flow::Stop;
        }
        trace!(count, timestamp_us, "Delivering frame");
        self.listener.on_progress(image);

        if count == self.target {
            debug!(count, "Extraction reached its target");
            self.closed.store(true, Ordering::Release);
            send_control(&self.control, Control::Completed);
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn decoder_finished(&self, track: Track) {
        debug!(track = %track, delivered = self.delivered(), "Decoder finished");
        self.fail(PipelineError::Truncated {
            expected: self.target,
            delivered: self.delivered(),
        });
    }

    fn decoder_failed(&self, _track: Track, error: CodecError) {
        self.fail(error.into());
    }
}

impl Mediator for ExtractionMediator {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn release(&self, _success: bool) -> Result<()> {
        self.close();
        Ok(())
    }

    fn notify_complete(&self) {
        self.listener.on_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FnFilter;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Frames {
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl ProgressListener<Image> for Frames {
        fn on_progress(&self, image: Image) {
            self.seen.lock().push(image.dimensions());
        }

        fn on_complete(&self) {}
    }

    fn frame() -> Decoded {
        Decoded::Image(Image::solid(4, 4, [1, 2, 3, 255]))
    }

    #[test]
    fn test_stops_at_target() {
        let (tx, rx) = flume::unbounded();
        let listener = Arc::new(Frames::default());
        let mediator = ExtractionMediator::new(2, FilterChain::new(), listener.clone(), tx);

        assert_eq!(mediator.transfer(Track::Video, frame(), 0), Flow::Continue);
        assert_eq!(mediator.transfer(Track::Video, frame(), 1), Flow::Stop);
        assert_eq!(mediator.transfer(Track::Video, frame(), 2), Flow::Stop);
        assert_eq!(listener.seen.lock().len(), 2);
        assert!(matches!(rx.try_recv(), Ok(Control::Completed)));
        assert!(rx.try_recv().is_err());

        // A late end of stream is not a failure once the target was reached.
        mediator.decoder_finished(Track::Video);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_applies_filters() {
        let (tx, _rx) = flume::unbounded();
        let listener = Arc::new(Frames::default());
        let filters = FilterChain::from_filters([Arc::new(FnFilter::new("shrink", |image: &Image| {
            Ok(image.resized(2, 1))
        })) as Arc<dyn crate::filter::ImageFilter>]);
        let mediator = ExtractionMediator::new(5, filters, listener.clone(), tx);
        mediator.transfer(Track::Video, frame(), 0);
        assert_eq!(listener.seen.lock().as_slice(), &[(2, 1)]);
    }

    #[test]
    fn test_early_end_of_stream() {
        let (tx, rx) = flume::unbounded();
        let mediator = ExtractionMediator::new(3, FilterChain::new(), Arc::new(Frames::default()), tx);
        mediator.transfer(Track::Video, frame(), 0);
        mediator.decoder_finished(Track::Video);
        match rx.try_recv() {
            Ok(Control::Failed(PipelineError::Truncated { expected, delivered })) => {
                assert_eq!((expected, delivered), (3, 1));
            }
            other => panic!("unexpected control message: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_audio() {
        let (tx, rx) = flume::unbounded();
        let mediator = ExtractionMediator::new(3, FilterChain::new(), Arc::new(Frames::default()), tx);
        let flow = mediator.transfer(Track::Audio, Decoded::Pcm(vec![0; 16]), 0);
        assert_eq!(flow, Flow::Stop);
        assert!(matches!(rx.try_recv(), Ok(Control::Failed(PipelineError::Aborted(_)))));
    }

    #[test]
    fn test_zero_target_completes_immediately() {
        let (tx, rx) = flume::unbounded();
        let mediator = ExtractionMediator::new(0, FilterChain::new(), Arc::new(Frames::default()), tx);
        assert!(matches!(rx.try_recv(), Ok(Control::Completed)));
        assert_eq!(mediator.transfer(Track::Video, frame(), 0), Flow::Stop);
    }
}
