//! Encoded sample buffers and codec buffer metadata.

use bitflags::bitflags;

bitflags! {
    /// Flags carried by codec buffers and extractor samples.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// Buffer starts a key frame (sync sample).
        const KEY_FRAME = 0x0001;
        /// Buffer holds codec configuration, not media data.
        const CODEC_CONFIG = 0x0002;
        /// Last buffer of the stream.
        const END_OF_STREAM = 0x0004;
    }
}

/// Metadata describing a codec output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl BufferInfo {
    /// Describe `size` bytes at offset zero.
    pub fn new(size: usize, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            offset: 0,
            size,
            presentation_time_us,
            flags,
        }
    }

    /// An empty buffer marking the end of the stream.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(0, presentation_time_us, BufferFlags::END_OF_STREAM)
    }

    /// Check for the end-of-stream flag.
    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }

    /// Check for the codec-config flag.
    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }

    /// Check for the key-frame flag.
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }

    /// Check if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// A raw buffer waiting to be fed to an encoder.
#[derive(Clone, PartialEq, Eq)]
pub struct Sample {
    data: Vec<u8>,
    /// Presentation time in microseconds.
    pub timestamp_us: i64,
}

impl Sample {
    /// Wrap sample bytes with their presentation time.
    pub fn new(data: Vec<u8>, timestamp_us: i64) -> Self {
        Self { data, timestamp_us }
    }

    /// Sample bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take the sample bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Get sample size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the sample has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sample")
            .field("size", &self.data.len())
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}
