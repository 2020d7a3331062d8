// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interface to the hardware decoding device.
//!
//! The device owns the decoder instance, its pool of output views and the typed buffers through
//! which parameters and bitstream are handed over. Decoders drive it through
//! [`VideoDecoderDevice`]; [`dummy::DummyDevice`] is an in-memory implementation that records
//! everything it is asked to do.

pub mod dummy;

use std::fmt;

use enumn::N;
use thiserror::Error;

use crate::DecodedFormat;
use crate::Resolution;

/// Kinds of buffers the decoder device accepts. Values match `D3D11_VIDEO_DECODER_BUFFER_TYPE`.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum BufferType {
    PictureParameters = 0,
    MacroblockControl = 1,
    ResidualDifference = 2,
    DeblockingControl = 3,
    InverseQuantizationMatrix = 4,
    SliceControl = 5,
    Bitstream = 6,
    MotionVector = 7,
    FilmGrain = 8,
}

/// Describes one buffer of a submission: its kind and the byte range to consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub buffer_type: BufferType,
    pub data_offset: u32,
    pub data_size: u32,
}

impl BufferDesc {
    pub fn new(buffer_type: BufferType, data_size: usize) -> Result<Self, DeviceError> {
        let data_size = u32::try_from(data_size).map_err(|_| DeviceError::BufferTooSmall {
            buffer_type,
            needed: data_size,
            capacity: u32::MAX as usize,
        })?;

        Ok(Self {
            buffer_type,
            data_offset: 0,
            data_size,
        })
    }
}

/// A Windows-style GUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.data1, self.data2, self.data3, self.data4[0], self.data4[1]
        )?;
        self.data4[2..]
            .iter()
            .try_for_each(|byte| write!(f, "{:02x}", byte))
    }
}

const DXVA_H264_DATA4: [u8; 8] = [0xb9, 0x84, 0x00, 0xc0, 0x4f, 0x2e, 0x73, 0xc5];

/// Decoder profiles a device may advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecoderProfile {
    /// `DXVA_ModeH264_D`: IDCT level acceleration with film grain.
    H264IdctFgt,
    /// `DXVA_ModeH264_E`: bitstream level acceleration without film grain.
    H264VldNoFgt,
    /// `DXVA_ModeH264_F`: bitstream level acceleration with film grain.
    H264VldFgt,
}

impl DecoderProfile {
    /// Profiles the H.264 decoder can drive, in order of preference.
    pub const H264: [DecoderProfile; 3] = [
        DecoderProfile::H264IdctFgt,
        DecoderProfile::H264VldNoFgt,
        DecoderProfile::H264VldFgt,
    ];

    pub fn guid(&self) -> Guid {
        let data1 = match self {
            DecoderProfile::H264IdctFgt => 0x1b81be67,
            DecoderProfile::H264VldNoFgt => 0x1b81be68,
            DecoderProfile::H264VldFgt => 0x1b81be69,
        };

        Guid {
            data1,
            data2: 0xa0c7,
            data3: 0x11d3,
            data4: DXVA_H264_DATA4,
        }
    }
}

/// Parameters used to (re)create the hardware decoder instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderOpenParams<'a> {
    pub format: DecodedFormat,
    pub coded_resolution: Resolution,
    /// Number of output views to allocate.
    pub num_output_views: usize,
    /// Acceptable profiles, in order of preference.
    pub profiles: &'a [DecoderProfile],
}

/// An output surface the hardware decodes into.
///
/// A view is only valid for the device instance that handed it out. Each `open` starts a new
/// generation, and views of older generations must be rejected by the device even when their
/// index is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputView {
    view_id: u8,
    generation: u32,
}

impl OutputView {
    /// Hardware surface indices are carried in 7 bits.
    pub const MAX_VIEW_ID: u8 = 0x7f;

    pub fn new(view_id: u8) -> Option<Self> {
        (view_id <= Self::MAX_VIEW_ID).then_some(Self {
            view_id,
            generation: 0,
        })
    }

    pub fn with_generation(self, generation: u32) -> Self {
        Self { generation, ..self }
    }

    pub fn view_id(&self) -> u8 {
        self.view_id
    }

    /// Device instance this view belongs to.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("decoder device is not opened")]
    NotOpened,
    #[error("none of the decoder profiles {0:?} is supported")]
    UnsupportedProfiles(Vec<DecoderProfile>),
    #[error("no available output view")]
    NoOutputView,
    #[error("output view {0:?} does not belong to this decoder")]
    InvalidView(OutputView),
    #[error("failed to acquire {0:?} buffer")]
    AcquireBuffer(BufferType),
    #[error("{0:?} buffer is not acquired")]
    BufferNotAcquired(BufferType),
    #[error("{buffer_type:?} buffer is too small: {needed} bytes needed, {capacity} available")]
    BufferTooSmall {
        buffer_type: BufferType,
        needed: usize,
        capacity: usize,
    },
    #[error("{0} is not allowed outside of a frame")]
    NoFrameInProgress(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Operations of a hardware video decoder device.
///
/// Buffers follow an acquire, fill, release, submit cycle: [`get_decoder_buffer`] maps a buffer
/// of the requested kind and returns its memory, whose length is the capacity available to the
/// caller. The mapping stays valid, and can be retrieved again with [`mapped_decoder_buffer`],
/// until [`release_decoder_buffer`] is called. Only released buffers may be submitted.
///
/// [`get_decoder_buffer`]: VideoDecoderDevice::get_decoder_buffer
/// [`mapped_decoder_buffer`]: VideoDecoderDevice::mapped_decoder_buffer
/// [`release_decoder_buffer`]: VideoDecoderDevice::release_decoder_buffer
pub trait VideoDecoderDevice {
    /// Creates the decoder instance and its output views.
    fn open(&mut self, params: &DecoderOpenParams) -> DeviceResult<()>;

    /// Destroys the decoder instance and its output views.
    fn reset(&mut self);

    fn is_opened(&self) -> bool;

    /// Takes a free output view from the pool.
    fn acquire_output_view(&mut self) -> DeviceResult<OutputView>;

    /// Returns `view` to the pool. Views handed out before the last `open` are ignored.
    fn release_output_view(&mut self, view: OutputView);

    /// Starts decoding a picture into `view`, which must belong to the current instance.
    fn begin_frame(&mut self, view: OutputView) -> DeviceResult<()>;

    /// Completes the picture started with `begin_frame`.
    fn end_frame(&mut self) -> DeviceResult<()>;

    /// Acquires and maps a buffer of kind `buffer_type`.
    fn get_decoder_buffer(&mut self, buffer_type: BufferType) -> DeviceResult<&mut [u8]>;

    /// Returns the memory of the currently acquired buffer of kind `buffer_type`.
    fn mapped_decoder_buffer(&mut self, buffer_type: BufferType) -> DeviceResult<&mut [u8]>;

    /// Unmaps the buffer of kind `buffer_type`, making it ready for submission.
    fn release_decoder_buffer(&mut self, buffer_type: BufferType) -> DeviceResult<()>;

    /// Hands the described buffers to the hardware.
    fn submit_decoder_buffers(&mut self, buffers: &[BufferDesc]) -> DeviceResult<()>;

    /// Copies the decoded content of `view` into `dst`, without padding. Fails with
    /// `DeviceError::InvalidView` if `view` belongs to a previous instance.
    fn copy_output_view(&mut self, view: OutputView, dst: &mut [u8]) -> DeviceResult<()>;
}
