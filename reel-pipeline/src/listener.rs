/// Receives results from a running pipeline.
///
/// `T` is [`Image`](reel_core::Image) for extraction and `f32` (export
/// progress in `[0, 1]`) for export. Calls arrive on pipeline threads.
pub trait ProgressListener<T>: Send + Sync {
    fn on_progress(&self, value: T);

    /// Called exactly once, after every pipeline resource has been released.
    fn on_complete(&self);
}
