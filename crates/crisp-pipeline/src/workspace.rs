//! Buffers of one problem size, allocated once and reused across runs.
//!
//! During a wave the buffers a stage writes are moved out of the
//! workspace into a [`Slot`] owned by that stage, while every other
//! buffer stays behind and is shared read-only. A stage can therefore
//! never observe a buffer another stage of the same wave is writing.

use crate::graph::{BufferId, ReadySet};
use crate::reduce::{Accumulator, ReduceOp};
use crate::types::{Dimensions, Image, PipelineError, ensure_dimensions};

/// A buffer on loan to the stage that writes it.
#[derive(Debug)]
pub(crate) enum Slot {
    Image(Image),
    Scalar(Accumulator),
}

/// All pipeline buffers for one image size.
#[derive(Debug)]
pub struct Workspace {
    dimensions: Dimensions,
    /// Indexed by [`BufferId::index`]; scalar buffers hold an empty image.
    images: Vec<Image>,
    minimum: Accumulator,
    maximum: Accumulator,
    ready: ReadySet,
}

impl Workspace {
    /// Allocate every buffer for `dimensions`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyImage`] if either side is zero.
    pub fn new(dimensions: Dimensions) -> Result<Self, PipelineError> {
        if dimensions.is_empty() {
            return Err(PipelineError::EmptyImage);
        }
        let images = BufferId::ALL
            .iter()
            .map(|id| {
                if id.is_scalar() {
                    Image::new(0, 0)
                } else {
                    Image::new(dimensions.width, dimensions.height)
                }
            })
            .collect();
        Ok(Self {
            dimensions,
            images,
            minimum: Accumulator::new(ReduceOp::Min),
            maximum: Accumulator::new(ReduceOp::Max),
            ready: ReadySet::empty(),
        })
    }

    /// Size of every image buffer.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// An image buffer. Scalar ids yield an empty image.
    #[must_use]
    pub fn image(&self, id: BufferId) -> &Image {
        &self.images[id.index()]
    }

    /// Current value of a scalar buffer. Image ids yield `NaN`.
    #[must_use]
    pub fn scalar(&self, id: BufferId) -> f32 {
        match id {
            BufferId::Minimum => self.minimum.load(),
            BufferId::Maximum => self.maximum.load(),
            _ => f32::NAN,
        }
    }

    /// Buffers written since the last [`load_source`](Self::load_source).
    #[must_use]
    pub const fn ready(&self) -> ReadySet {
        self.ready
    }

    /// Copy `image` into the source buffer and invalidate every other
    /// buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] if `image` does not
    /// match the workspace dimensions.
    pub fn load_source(&mut self, image: &Image) -> Result<(), PipelineError> {
        ensure_dimensions(self.dimensions, Dimensions::of(image))?;
        let source: &mut [f32] = &mut self.images[BufferId::Source.index()];
        source.copy_from_slice(image.as_raw());
        self.ready = ReadySet::empty();
        self.ready.insert(BufferId::Source);
        Ok(())
    }

    pub(crate) fn mark_ready(&mut self, id: BufferId) {
        self.ready.insert(id);
    }

    /// Move the buffer `id` out for writing.
    pub(crate) fn take(&mut self, id: BufferId) -> Slot {
        match id {
            BufferId::Minimum => Slot::Scalar(std::mem::replace(
                &mut self.minimum,
                Accumulator::new(ReduceOp::Min),
            )),
            BufferId::Maximum => Slot::Scalar(std::mem::replace(
                &mut self.maximum,
                Accumulator::new(ReduceOp::Max),
            )),
            _ => Slot::Image(std::mem::replace(
                &mut self.images[id.index()],
                Image::new(0, 0),
            )),
        }
    }

    /// Return a buffer taken with [`take`](Self::take).
    pub(crate) fn restore(&mut self, id: BufferId, slot: Slot) {
        match (id, slot) {
            (BufferId::Minimum, Slot::Scalar(acc)) => self.minimum = acc,
            (BufferId::Maximum, Slot::Scalar(acc)) => self.maximum = acc,
            (_, Slot::Image(image)) => self.images[id.index()] = image,
            (_, Slot::Scalar(_)) => {}
        }
    }
}
