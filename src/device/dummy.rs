// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy device whose only purpose is to let the decoder
//! run so we can test it in isolation.
//!
//! Every call is recorded as a [`DeviceOp`], and submitted buffers are captured with the bytes
//! they carried at release time, so tests can check the exact buffer traffic of a decoder.

use std::collections::BTreeMap;

use anyhow::anyhow;
use bytes::Bytes;
use log::trace;

use crate::device::BufferDesc;
use crate::device::BufferType;
use crate::device::DecoderOpenParams;
use crate::device::DecoderProfile;
use crate::device::DeviceError;
use crate::device::DeviceResult;
use crate::device::OutputView;
use crate::device::VideoDecoderDevice;
use crate::DecodedFormat;
use crate::Resolution;

/// Capacity of the buffers of every kind, unless overridden.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// A buffer as captured at submission time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmittedBuffer {
    pub desc: BufferDesc,
    /// The `data_size` bytes starting at `data_offset`.
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceOp {
    Reset,
    Open {
        format: DecodedFormat,
        coded_resolution: Resolution,
        num_output_views: usize,
        profile: DecoderProfile,
    },
    BeginFrame(OutputView),
    EndFrame,
    GetBuffer(BufferType),
    ReleaseBuffer(BufferType),
    Submit(Vec<SubmittedBuffer>),
}

#[derive(Default)]
struct DummyBuffer {
    memory: Vec<u8>,
    mapped: bool,
    /// Contents at release time, until submitted.
    released: Option<Bytes>,
}

struct OpenState {
    num_output_views: usize,
    generation: u32,
}

pub struct DummyDevice {
    capacities: BTreeMap<BufferType, usize>,
    buffers: BTreeMap<BufferType, DummyBuffer>,
    supported_profiles: Vec<DecoderProfile>,
    failing_buffer: Option<BufferType>,
    opened: Option<OpenState>,
    /// Generation of the views handed out by the next instance.
    next_generation: u32,
    free_views: Vec<OutputView>,
    frame: Option<OutputView>,
    ops: Vec<DeviceOp>,
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDevice {
    pub fn new() -> Self {
        Self {
            capacities: Default::default(),
            buffers: Default::default(),
            supported_profiles: DecoderProfile::H264.to_vec(),
            failing_buffer: None,
            opened: None,
            next_generation: 0,
            free_views: Default::default(),
            frame: None,
            ops: Default::default(),
        }
    }

    /// Sets the capacity of the buffers of kind `buffer_type` acquired from now on.
    pub fn with_buffer_capacity(mut self, buffer_type: BufferType, capacity: usize) -> Self {
        self.set_buffer_capacity(buffer_type, capacity);
        self
    }

    pub fn set_buffer_capacity(&mut self, buffer_type: BufferType, capacity: usize) {
        self.capacities.insert(buffer_type, capacity);
    }

    pub fn with_supported_profiles(mut self, profiles: &[DecoderProfile]) -> Self {
        self.supported_profiles = profiles.to_vec();
        self
    }

    /// Makes every acquisition of a `buffer_type` buffer fail, or none if `None`.
    pub fn fail_buffer_acquisition(&mut self, buffer_type: Option<BufferType>) {
        self.failing_buffer = buffer_type;
    }

    /// Returns all the operations performed so far.
    pub fn ops(&self) -> &[DeviceOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Returns the buffer lists submitted so far, in submission order.
    pub fn submissions(&self) -> impl Iterator<Item = &[SubmittedBuffer]> {
        self.ops.iter().filter_map(|op| match op {
            DeviceOp::Submit(buffers) => Some(buffers.as_slice()),
            _ => None,
        })
    }

    pub fn num_free_views(&self) -> usize {
        self.free_views.len()
    }

    pub fn frame_in_progress(&self) -> bool {
        self.frame.is_some()
    }

    fn check_view(&self, view: OutputView) -> DeviceResult<()> {
        let opened = self.opened.as_ref().ok_or(DeviceError::NotOpened)?;
        if view.generation() == opened.generation
            && usize::from(view.view_id()) < opened.num_output_views
        {
            Ok(())
        } else {
            Err(DeviceError::InvalidView(view))
        }
    }

    fn capacity(&self, buffer_type: BufferType) -> usize {
        self.capacities
            .get(&buffer_type)
            .copied()
            .unwrap_or(DEFAULT_BUFFER_CAPACITY)
    }
}

impl VideoDecoderDevice for DummyDevice {
    fn open(&mut self, params: &DecoderOpenParams) -> DeviceResult<()> {
        let profile = params
            .profiles
            .iter()
            .find(|profile| self.supported_profiles.contains(profile))
            .copied()
            .ok_or_else(|| DeviceError::UnsupportedProfiles(params.profiles.to_vec()))?;

        let num_views = u8::try_from(params.num_output_views)
            .ok()
            .filter(|num| *num <= OutputView::MAX_VIEW_ID + 1)
            .ok_or_else(|| anyhow!("cannot allocate {} views", params.num_output_views))?;

        let generation = self.next_generation;
        self.next_generation = generation.wrapping_add(1);

        // Pop order hands out view 0 first.
        self.free_views = (0..num_views)
            .rev()
            .filter_map(OutputView::new)
            .map(|view| view.with_generation(generation))
            .collect();
        self.opened = Some(OpenState {
            num_output_views: params.num_output_views,
            generation,
        });
        self.ops.push(DeviceOp::Open {
            format: params.format,
            coded_resolution: params.coded_resolution,
            num_output_views: params.num_output_views,
            profile,
        });

        Ok(())
    }

    fn reset(&mut self) {
        self.opened = None;
        self.free_views.clear();
        self.buffers.clear();
        self.frame = None;
        self.ops.push(DeviceOp::Reset);
    }

    fn is_opened(&self) -> bool {
        self.opened.is_some()
    }

    fn acquire_output_view(&mut self) -> DeviceResult<OutputView> {
        if self.opened.is_none() {
            return Err(DeviceError::NotOpened);
        }

        self.free_views.pop().ok_or(DeviceError::NoOutputView)
    }

    fn release_output_view(&mut self, view: OutputView) {
        // Views from a previous instance are ignored.
        if self.check_view(view).is_ok() && !self.free_views.contains(&view) {
            self.free_views.push(view);
        }
    }

    fn begin_frame(&mut self, view: OutputView) -> DeviceResult<()> {
        self.check_view(view)?;
        if let Some(current) = self.frame {
            return Err(anyhow!("frame for view {:?} is still in progress", current).into());
        }

        self.frame = Some(view);
        self.ops.push(DeviceOp::BeginFrame(view));

        Ok(())
    }

    fn end_frame(&mut self) -> DeviceResult<()> {
        self.frame
            .take()
            .ok_or(DeviceError::NoFrameInProgress("end_frame"))?;
        self.ops.push(DeviceOp::EndFrame);

        Ok(())
    }

    fn get_decoder_buffer(&mut self, buffer_type: BufferType) -> DeviceResult<&mut [u8]> {
        if self.frame.is_none() {
            return Err(DeviceError::NoFrameInProgress("get_decoder_buffer"));
        }
        if self.failing_buffer == Some(buffer_type) {
            return Err(DeviceError::AcquireBuffer(buffer_type));
        }

        let capacity = self.capacity(buffer_type);
        let buffer = self.buffers.entry(buffer_type).or_default();
        if buffer.mapped {
            return Err(anyhow!("{:?} buffer is already acquired", buffer_type).into());
        }

        trace!("Dummy device hands out {:?} buffer of {} bytes", buffer_type, capacity);
        buffer.memory = vec![0; capacity];
        buffer.mapped = true;
        buffer.released = None;
        self.ops.push(DeviceOp::GetBuffer(buffer_type));

        Ok(&mut buffer.memory[..])
    }

    fn mapped_decoder_buffer(&mut self, buffer_type: BufferType) -> DeviceResult<&mut [u8]> {
        match self.buffers.get_mut(&buffer_type) {
            Some(buffer) if buffer.mapped => Ok(&mut buffer.memory[..]),
            _ => Err(DeviceError::BufferNotAcquired(buffer_type)),
        }
    }

    fn release_decoder_buffer(&mut self, buffer_type: BufferType) -> DeviceResult<()> {
        let buffer = match self.buffers.get_mut(&buffer_type) {
            Some(buffer) if buffer.mapped => buffer,
            _ => return Err(DeviceError::BufferNotAcquired(buffer_type)),
        };

        buffer.mapped = false;
        buffer.released = Some(Bytes::copy_from_slice(&buffer.memory));
        self.ops.push(DeviceOp::ReleaseBuffer(buffer_type));

        Ok(())
    }

    fn submit_decoder_buffers(&mut self, buffers: &[BufferDesc]) -> DeviceResult<()> {
        if self.frame.is_none() {
            return Err(DeviceError::NoFrameInProgress("submit_decoder_buffers"));
        }

        let mut submitted = Vec::with_capacity(buffers.len());
        for desc in buffers {
            let released = self
                .buffers
                .get(&desc.buffer_type)
                .and_then(|buffer| buffer.released.as_ref())
                .ok_or(DeviceError::BufferNotAcquired(desc.buffer_type))?;

            let start = desc.data_offset as usize;
            let end = start + desc.data_size as usize;
            if end > released.len() {
                return Err(DeviceError::BufferTooSmall {
                    buffer_type: desc.buffer_type,
                    needed: end,
                    capacity: released.len(),
                });
            }

            submitted.push(SubmittedBuffer {
                desc: *desc,
                data: released.slice(start..end),
            });
        }

        // A buffer must be acquired again before its next submission.
        for desc in buffers {
            if let Some(buffer) = self.buffers.get_mut(&desc.buffer_type) {
                buffer.released = None;
            }
        }

        self.ops.push(DeviceOp::Submit(submitted));

        Ok(())
    }

    fn copy_output_view(&mut self, view: OutputView, dst: &mut [u8]) -> DeviceResult<()> {
        self.check_view(view)?;
        // Output content is the view id, so tests can tell which view was copied.
        dst.fill(view.view_id());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_params(num_output_views: usize) -> DecoderOpenParams<'static> {
        DecoderOpenParams {
            format: DecodedFormat::NV12,
            coded_resolution: Resolution::from((64, 64)),
            num_output_views,
            profiles: &DecoderProfile::H264,
        }
    }

    #[test]
    fn buffer_cycle_is_recorded() {
        let mut device = DummyDevice::new().with_buffer_capacity(BufferType::Bitstream, 8);
        device.open(&open_params(2)).unwrap();

        let view = device.acquire_output_view().unwrap();
        device.begin_frame(view).unwrap();

        let buffer = device.get_decoder_buffer(BufferType::Bitstream).unwrap();
        assert_eq!(buffer.len(), 8);
        buffer[..3].copy_from_slice(&[0, 0, 1]);
        device.mapped_decoder_buffer(BufferType::Bitstream).unwrap()[3] = 0x65;
        device.release_decoder_buffer(BufferType::Bitstream).unwrap();

        let desc = BufferDesc::new(BufferType::Bitstream, 4).unwrap();
        device.submit_decoder_buffers(&[desc]).unwrap();
        device.end_frame().unwrap();

        let submissions: Vec<_> = device.submissions().collect();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0][0].data.as_ref(), &[0, 0, 1, 0x65]);

        // Submitted buffers must be acquired again.
        device.begin_frame(view).unwrap();
        assert!(matches!(
            device.submit_decoder_buffers(&[desc]),
            Err(DeviceError::BufferNotAcquired(BufferType::Bitstream))
        ));
    }

    #[test]
    fn mapped_buffers_cannot_be_submitted() {
        let mut device = DummyDevice::new();
        device.open(&open_params(1)).unwrap();
        let view = device.acquire_output_view().unwrap();
        device.begin_frame(view).unwrap();
        device.get_decoder_buffer(BufferType::SliceControl).unwrap();

        let desc = BufferDesc::new(BufferType::SliceControl, 10).unwrap();
        assert!(device.submit_decoder_buffers(&[desc]).is_err());
    }

    #[test]
    fn output_views_are_pooled() {
        let mut device = DummyDevice::new();
        assert!(matches!(
            device.acquire_output_view(),
            Err(DeviceError::NotOpened)
        ));

        device.open(&open_params(2)).unwrap();
        let first = device.acquire_output_view().unwrap();
        let second = device.acquire_output_view().unwrap();
        assert_eq!((first.view_id(), second.view_id()), (0, 1));
        assert!(matches!(
            device.acquire_output_view(),
            Err(DeviceError::NoOutputView)
        ));

        device.release_output_view(first);
        assert_eq!(device.num_free_views(), 1);

        device.reset();
        device.release_output_view(second);
        assert_eq!(device.num_free_views(), 0);
    }

    #[test]
    fn views_of_previous_instance_are_rejected() {
        let mut device = DummyDevice::new();
        device.open(&open_params(2)).unwrap();
        let stale = device.acquire_output_view().unwrap();

        device.reset();
        device.open(&open_params(2)).unwrap();
        let live = device.acquire_output_view().unwrap();
        assert_eq!(live.view_id(), stale.view_id());
        assert_ne!(live, stale);

        // The stale view must not be handed out again while `live` uses its index.
        device.release_output_view(stale);
        assert_eq!(device.num_free_views(), 1);
        assert_ne!(device.acquire_output_view().unwrap().view_id(), live.view_id());

        let mut dst = [0u8; 4];
        assert!(matches!(
            device.copy_output_view(stale, &mut dst),
            Err(DeviceError::InvalidView(view)) if view == stale
        ));
        assert!(device.begin_frame(stale).is_err());
        device.begin_frame(live).unwrap();
    }

    #[test]
    fn unsupported_profiles() {
        let mut device = DummyDevice::new().with_supported_profiles(&[]);
        assert!(matches!(
            device.open(&open_params(4)),
            Err(DeviceError::UnsupportedProfiles(_))
        ));
        assert!(!device.is_opened());
    }
}
