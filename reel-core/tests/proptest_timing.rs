//! Property-based tests for frame/timestamp conversion.

use proptest::prelude::*;
use reel_core::timing::{frame_count, frame_to_timestamp, timestamp_to_frame};

proptest! {
    #[test]
    fn frame_timestamp_roundtrip(frame in 0u64..10_000_000, fps in 1u32..=240) {
        prop_assert_eq!(timestamp_to_frame(frame_to_timestamp(frame, fps), fps), frame);
    }

    #[test]
    fn timestamps_are_monotonic(frame in 0u64..1_000_000, fps in 1u32..=240) {
        prop_assert!(frame_to_timestamp(frame + 1, fps) > frame_to_timestamp(frame, fps));
    }

    #[test]
    fn frame_count_matches_last_timestamp(frames in 1u64..100_000, fps in 1u32..=120) {
        let duration = frame_to_timestamp(frames, fps);
        prop_assert_eq!(frame_count(duration, fps), frames);
    }
}
