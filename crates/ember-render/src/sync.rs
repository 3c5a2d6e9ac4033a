// SPDX-License-Identifier: CEPL-1.0
use tracing::debug;

use crate::device::RenderDevice;
use crate::error::RenderResult;
use crate::MAX_FRAMES_IN_FLIGHT;

/// Per-slot semaphores and fences for one surface chain.
///
/// Slots rotate independently of image indices. `images_in_flight` is keyed
/// by image index and records which slot's fence last rendered into that
/// image, so an image handed back out of order is never reused while a
/// different slot is still drawing to it.
pub struct FrameSync<D: RenderDevice> {
    image_available: Vec<D::Semaphore>,
    render_finished: Vec<D::Semaphore>,
    in_flight: Vec<D::Fence>,
    images_in_flight: Vec<Option<usize>>,
    current_slot: usize,
}

impl<D: RenderDevice> FrameSync<D> {
    pub fn new(device: &D, image_count: usize) -> RenderResult<Self> {
        let mut image_available = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        let mut render_finished = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        let mut in_flight = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);

        // Fences start signaled so the first wait on each slot returns at once.
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            image_available.push(device.create_semaphore()?);
            render_finished.push(device.create_semaphore()?);
            in_flight.push(device.create_fence(true)?);
        }

        debug!(
            slots = MAX_FRAMES_IN_FLIGHT,
            images = image_count,
            "frame sync objects created"
        );

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
            images_in_flight: vec![None; image_count],
            current_slot: 0,
        })
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn slot_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    pub fn image_available(&self, slot: usize) -> &D::Semaphore {
        &self.image_available[slot]
    }

    pub fn render_finished(&self, slot: usize) -> &D::Semaphore {
        &self.render_finished[slot]
    }

    pub fn in_flight(&self, slot: usize) -> &D::Fence {
        &self.in_flight[slot]
    }

    /// Slot whose fence last covered `image_index`, if any.
    pub fn image_owner(&self, image_index: usize) -> Option<usize> {
        self.images_in_flight[image_index]
    }

    /// Record that the current slot is about to render into `image_index`,
    /// returning the slot that previously held it.
    pub fn claim_image(&mut self, image_index: usize) -> Option<usize> {
        self.images_in_flight[image_index].replace(self.current_slot)
    }

    pub fn advance(&mut self) {
        self.current_slot = (self.current_slot + 1) % MAX_FRAMES_IN_FLIGHT;
    }
}
