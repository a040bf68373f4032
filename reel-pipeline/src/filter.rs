//! Image filters applied to every decoded frame.

use crate::error::Result;
use reel_core::Image;
use std::fmt;
use std::sync::Arc;

/// How a filter's output combines with the frames before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionMode {
    /// Process the running result and replace it.
    #[default]
    CompoundWithPreviousOutput,
    /// Process the unfiltered frame and alpha-composite the output on top of
    /// the running result, scaled to its size.
    OverlayOnOriginalImage,
}

/// A per-frame image transform.
///
/// Filters are shared across threads and called once per frame.
pub trait ImageFilter: Send + Sync {
    /// Filter name, used in error reports.
    fn name(&self) -> &str;

    fn composition_mode(&self) -> CompositionMode {
        CompositionMode::CompoundWithPreviousOutput
    }

    /// Process one frame.
    fn process(&self, image: &Image) -> Result<Image>;
}

/// Ordered list of filters.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn ImageFilter>>,
}

impl FilterChain {
    /// Create an empty filter chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a chain applying `filters` in order.
    pub fn from_filters(filters: impl IntoIterator<Item = Arc<dyn ImageFilter>>) -> Self {
        Self {
            filters: filters.into_iter().collect(),
        }
    }

    /// Add a filter to the end of the chain.
    pub fn add(&mut self, filter: Arc<dyn ImageFilter>) {
        self.filters.push(filter);
    }

    /// Get number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if the chain has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run `image` through every filter in order.
    pub fn apply(&self, image: Image) -> Result<Image> {
        if self.filters.is_empty() {
            return Ok(image);
        }

        let mut result: Option<Image> = None;
        for filter in &self.filters {
            let current = result.as_ref().unwrap_or(&image);
            let next = match filter.composition_mode() {
                CompositionMode::CompoundWithPreviousOutput => filter.process(current)?,
                CompositionMode::OverlayOnOriginalImage => {
                    let overlay = filter.process(&image)?;
                    current.overlaid_with(&overlay)
                }
            };
            result = Some(next);
        }
        Ok(result.unwrap_or(image))
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|filter| filter.name()))
            .finish()
    }
}

/// Resize frames to a fixed size.
#[derive(Debug, Clone)]
pub struct ScaleFilter {
    name: String,
    width: u32,
    height: u32,
}

impl ScaleFilter {
    /// Scale every frame to `width`x`height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            name: format!("scale_{}x{}", width, height),
            width,
            height,
        }
    }
}

impl ImageFilter for ScaleFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, image: &Image) -> Result<Image> {
        Ok(image.resized(self.width, self.height))
    }
}

type FilterFn = dyn Fn(&Image) -> Result<Image> + Send + Sync;

/// A filter backed by a closure.
pub struct FnFilter {
    name: String,
    mode: CompositionMode,
    func: Box<FilterFn>,
}

impl FnFilter {
    /// Filter running `func` on each frame.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Image) -> Result<Image> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            mode: CompositionMode::default(),
            func: Box::new(func),
        }
    }

    /// Set how the result combines with the input frame.
    #[must_use]
    pub fn with_composition_mode(mut self, mode: CompositionMode) -> Self {
        self.mode = mode;
        self
    }
}

impl ImageFilter for FnFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn composition_mode(&self) -> CompositionMode {
        self.mode
    }

    fn process(&self, image: &Image) -> Result<Image> {
        (self.func)(image)
    }
}

impl fmt::Debug for FnFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFilter")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn fill(name: &str, rgba: [u8; 4], mode: CompositionMode) -> Arc<dyn ImageFilter> {
        Arc::new(
            FnFilter::new(name, move |image: &Image| {
                Ok(Image::solid(image.width(), image.height(), rgba))
            })
            .with_composition_mode(mode),
        )
    }

    #[test]
    fn test_empty_chain_passes_through() {
        let chain = FilterChain::new();
        let image = Image::solid(4, 4, RED);
        assert_eq!(chain.apply(image.clone()).unwrap(), image);
    }

    #[test]
    fn test_compound_uses_previous_output() {
        let chain = FilterChain::from_filters([
            Arc::new(ScaleFilter::new(8, 2)) as Arc<dyn ImageFilter>,
            Arc::new(FnFilter::new("halve", |image: &Image| {
                Ok(image.resized(image.width() / 2, image.height()))
            })),
        ]);
        let out = chain.apply(Image::solid(4, 4, RED)).unwrap();
        assert_eq!(out.dimensions(), (4, 2));
    }

    #[test]
    fn test_overlay_processes_original() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let mut chain = FilterChain::new();
        chain.add(fill("blue", BLUE, CompositionMode::CompoundWithPreviousOutput));
        chain.add(Arc::new(
            FnFilter::new("overlay", move |image: &Image| {
                record.lock().push(image.pixel(0, 0));
                Ok(Image::solid(1, 1, [0, 255, 0, 0]))
            })
            .with_composition_mode(CompositionMode::OverlayOnOriginalImage),
        ));

        let out = chain.apply(Image::solid(4, 4, RED)).unwrap();
        // The overlay saw the unfiltered frame.
        assert_eq!(seen.lock().as_slice(), &[RED]);
        // A transparent overlay leaves the running result untouched.
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.pixel(2, 2), BLUE);
    }

    #[test]
    fn test_opaque_overlay_covers_result() {
        let chain = FilterChain::from_filters([
            fill("red", RED, CompositionMode::CompoundWithPreviousOutput),
            fill("blue", BLUE, CompositionMode::OverlayOnOriginalImage),
        ]);
        let out = chain.apply(Image::solid(3, 3, [0, 0, 0, 255])).unwrap();
        assert_eq!(out.pixel(1, 1), BLUE);
    }

    #[test]
    fn test_filter_error_propagates() {
        let chain = FilterChain::from_filters([Arc::new(FnFilter::new("broken", |_: &Image| {
            Err(PipelineError::filter("broken", "no model"))
        })) as Arc<dyn ImageFilter>]);
        assert!(matches!(
            chain.apply(Image::solid(2, 2, RED)),
            Err(PipelineError::Filter { .. })
        ));
        assert_eq!(format!("{:?}", chain), "[\"broken\"]");
    }
}
