// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Packetization of slice NAL units into the device bitstream buffers.

use std::cmp::min;

use log::debug;
use log::trace;

use crate::backend::dxva::SliceChopping;
use crate::backend::dxva::SliceH264Short;
use crate::decoder::stateless::DecodeError;
use crate::device::BufferType;
use crate::device::DeviceError;
use crate::device::DeviceResult;
use crate::device::VideoDecoderDevice;

/// Prefix of every slice in the bitstream buffer.
pub const START_CODE: [u8; 3] = [0, 0, 1];

/// Bitstream written so far for the picture being decoded, since the last submission.
#[derive(Debug, Default)]
pub struct PictureAssembly {
    /// Size of the mapped bitstream buffer, or `None` if no buffer is acquired.
    capacity: Option<usize>,
    /// Write position in the mapped bitstream buffer.
    offset: usize,
    /// Slice control records of the chunks written in the mapped buffer.
    slices: Vec<SliceH264Short>,
}

/// Copies bytes `start..start + dst.len()` of `START_CODE` followed by `nalu` into `dst`.
fn copy_with_start_code(dst: &mut [u8], start: usize, nalu: &[u8]) {
    let start_code = START_CODE.get(start..).unwrap_or_default();
    let from_start_code = min(start_code.len(), dst.len());
    let (dst_start_code, dst_payload) = dst.split_at_mut(from_start_code);

    dst_start_code.copy_from_slice(&start_code[..from_start_code]);

    let payload_start = start.saturating_sub(START_CODE.len());
    dst_payload.copy_from_slice(&nalu[payload_start..payload_start + dst_payload.len()]);
}

impl PictureAssembly {
    pub fn new() -> Self {
        Default::default()
    }

    /// Maps a new bitstream buffer and starts writing at its beginning.
    pub fn acquire_bitstream_buffer<D: VideoDecoderDevice + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> DeviceResult<()> {
        let capacity = device.get_decoder_buffer(BufferType::Bitstream)?.len();
        trace!("Acquired bitstream buffer of {} bytes", capacity);

        self.capacity = Some(capacity);
        self.offset = 0;

        Ok(())
    }

    /// Whether a bitstream buffer is currently mapped.
    pub fn has_buffer(&self) -> bool {
        self.capacity.is_some()
    }

    /// Number of bytes written in the mapped buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Free space left in the mapped buffer.
    pub fn remaining(&self) -> usize {
        self.capacity.unwrap_or(0) - self.offset
    }

    /// Slice control records of the chunks not submitted yet, in writing order.
    pub fn slices(&self) -> &[SliceH264Short] {
        &self.slices
    }

    /// Forgets the mapped buffer and its content. To be called once the buffer has been released.
    pub fn reset(&mut self) {
        self.capacity = None;
        self.offset = 0;
        self.slices.clear();
    }

    /// Writes `nalu`, prefixed with a start code, into the bitstream buffer.
    ///
    /// When the slice does not fit in the space left and the buffer already holds data, `flush`
    /// is called to submit the buffer, after which a new one is acquired. A slice larger than a
    /// whole buffer is split into as many chunks as needed, each with its own slice control
    /// record.
    pub fn append_slice<D, F>(
        &mut self,
        device: &mut D,
        nalu: &[u8],
        mut flush: F,
    ) -> Result<(), DecodeError>
    where
        D: VideoDecoderDevice + ?Sized,
        F: FnMut(&mut D, &mut PictureAssembly) -> Result<(), DecodeError>,
    {
        let total = START_CODE.len() + nalu.len();
        let mut written = 0;

        while written < total {
            let left = total - written;

            if self.remaining() < left && !self.slices.is_empty() {
                debug!(
                    "Bitstream buffer full ({} bytes left, {} needed), flushing {} slice chunks",
                    self.remaining(),
                    left,
                    self.slices.len()
                );
                flush(device, self)?;
                self.acquire_bitstream_buffer(device)?;
            }

            if !self.has_buffer() {
                return Err(DeviceError::BufferNotAcquired(BufferType::Bitstream).into());
            }

            let chunk = min(left, self.remaining());
            if chunk == 0 {
                return Err(DeviceError::BufferTooSmall {
                    buffer_type: BufferType::Bitstream,
                    needed: left,
                    capacity: 0,
                }
                .into());
            }

            let buffer = device.mapped_decoder_buffer(BufferType::Bitstream)?;
            let capacity = buffer.len();
            let dst = buffer
                .get_mut(self.offset..self.offset + chunk)
                .ok_or(DeviceError::BufferTooSmall {
                    buffer_type: BufferType::Bitstream,
                    needed: self.offset + chunk,
                    capacity,
                })?;
            copy_with_start_code(dst, written, nalu);

            let bad_slice_chopping = SliceChopping::new(written == 0, written + chunk == total);
            trace!(
                "Slice chunk of {} bytes at offset {}: {:?}",
                chunk,
                self.offset,
                bad_slice_chopping
            );

            self.slices.push(SliceH264Short {
                bs_nal_unit_data_location: self.offset as u32,
                slice_bytes_in_buffer: chunk as u32,
                bad_slice_chopping,
            });

            self.offset += chunk;
            written += chunk;
        }

        Ok(())
    }
}
