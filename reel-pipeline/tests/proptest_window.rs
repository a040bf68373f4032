//! Property tests for frame window arithmetic.

use proptest::prelude::*;
use reel_codec::DecodeWindow;
use reel_pipeline::{frames_to_process, FrameWindow};

proptest! {
    #[test]
    fn window_never_exceeds_video(
        total in 1u64..2_000,
        interval in 1u64..64,
        num in 1u64..4_000,
        start in 0u64..2_000,
    ) {
        prop_assume!(interval + start < total);
        let num = num.min(total);
        let count = frames_to_process(total, interval, num, start);
        prop_assert!(count <= num.min(total));
    }

    #[test]
    fn unclamped_window_is_whole_intervals(
        interval in 1u64..64,
        extra in 0u64..200,
        start in 0u64..500,
        slack in 1u64..500,
    ) {
        // The window fits inside the video with room to spare.
        let num = interval + extra;
        let total = start + num * interval + slack;
        let count = frames_to_process(total, interval, num, start);
        prop_assert_eq!(count % interval, 0, "count {} interval {}", count, interval);
        prop_assert_eq!(count, num - num % interval);
    }

    #[test]
    fn decoder_delivers_target(
        total in 1u64..1_000,
        interval in 1u64..32,
        num in 1u64..1_000,
        start in 0u64..1_000,
    ) {
        prop_assume!(interval + start < total);
        let num = num.min(total);
        let target = frames_to_process(total, interval, num, start);
        let window = DecodeWindow::new(interval, num, start);
        let admitted = (0..total).filter(|count| window.admits_video(*count)).count() as u64;
        prop_assert!(admitted >= target, "admitted {} < target {}", admitted, target);
    }

    #[test]
    fn positive_windows_validate(interval in 1i32.., num in 1i32.., start in 0i32..) {
        prop_assert!(FrameWindow::new(interval, num, start).validate().is_ok());
    }

    #[test]
    fn negative_values_rejected(interval in i32::MIN..=0, num in 1i32.., start in 0i32..) {
        prop_assert!(FrameWindow::new(interval, num, start).validate().is_err());
    }
}
