// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.264 decoder driving a DXVA-style device.
//!
//! The upstream decoding process calls [`H264Decoder`] at every sequence, picture and slice
//! boundary. For each picture, the reference frame table is built from the DPB, every slice is
//! translated into picture parameters and packetized into bitstream buffers, and the resulting
//! buffers are submitted to the device. Bitstream buffers that fill up before the end of the
//! picture are flushed to the device early.

pub mod bitstream;
pub mod dxva;
pub mod submit;

use anyhow::anyhow;
use bytes::Bytes;
use log::debug;
use log::info;
use log::warn;

use crate::backend::dxva::PicParamsH264;
use crate::backend::dxva::QmatrixH264;
use crate::codec::h264::dpb::Dpb;
use crate::codec::h264::dpb::PicId;
use crate::codec::h264::parser::ParameterSets;
use crate::codec::h264::parser::Slice;
use crate::codec::h264::parser::Sps;
use crate::decoded_frame_size;
use crate::decoder::stateless::h264::bitstream::PictureAssembly;
use crate::decoder::stateless::h264::dxva::RefFrameTable;
use crate::decoder::stateless::DecodeError;
use crate::decoder::stateless::DecodingState;
use crate::decoder::CodecFrame;
use crate::decoder::DecodedFrame;
use crate::decoder::DecoderConfig;
use crate::decoder::DecoderEvent;
use crate::decoder::ParamsResubmission;
use crate::decoder::ReadyFramesQueue;
use crate::decoder::StreamInfo;
use crate::device::BufferType;
use crate::device::DecoderOpenParams;
use crate::device::DecoderProfile;
use crate::device::OutputView;
use crate::device::VideoDecoderDevice;
use crate::DecodedFormat;
use crate::Resolution;

/// Sequence parameters whose change requires the device to be reopened.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SequenceInfo {
    coded_resolution: Resolution,
    display_resolution: Resolution,
    bit_depth: u8,
    chroma_format_idc: u8,
}

impl From<&Sps> for SequenceInfo {
    fn from(sps: &Sps) -> Self {
        Self {
            coded_resolution: sps.coded_resolution(),
            display_resolution: sps.display_resolution(),
            bit_depth: sps.bit_depth_luma(),
            chroma_format_idc: sps.chroma_format_idc,
        }
    }
}

/// State of the picture being currently decoded.
///
/// Returned by [`H264Decoder::start_picture`] and passed to the following calls for the same
/// picture, until [`H264Decoder::end_picture`] consumes it.
pub struct CurrentPicState {
    /// Identifies the picture in flight in the decoder that created this state.
    serial: u64,
    pic: PicId,
    view: OutputView,
    /// Reference frames, built once at the start of the picture.
    ref_frames: RefFrameTable,
    assembly: PictureAssembly,
    /// Parameters of the last slice, submitted with the end of the picture.
    pic_params: Option<PicParamsH264>,
    iq_matrix: Option<QmatrixH264>,
}

impl CurrentPicState {
    pub fn picture(&self) -> PicId {
        self.pic
    }

    pub fn view(&self) -> OutputView {
        self.view
    }

    pub fn ref_frames(&self) -> &RefFrameTable {
        &self.ref_frames
    }

    pub fn assembly(&self) -> &PictureAssembly {
        &self.assembly
    }

    pub fn pic_params(&self) -> Option<&PicParamsH264> {
        self.pic_params.as_ref()
    }

    pub fn iq_matrix(&self) -> Option<&QmatrixH264> {
        self.iq_matrix.as_ref()
    }
}

pub struct H264Decoder<D: VideoDecoderDevice> {
    device: D,
    config: DecoderConfig,
    state: DecodingState,

    /// Parameters of the sequence the device is opened for.
    sequence: Option<SequenceInfo>,
    stream_info: Option<StreamInfo>,

    /// Picture created by the last `new_picture`, until it is attached to a frame.
    current_picture: Option<PicId>,
    /// Serial of the picture between `start_picture` and `end_picture`.
    in_flight: Option<u64>,
    next_serial: u64,

    /// Frames waiting for their picture to be output.
    pending_frames: Vec<CodecFrame>,
    ready_queue: ReadyFramesQueue<DecoderEvent>,
}

impl<D: VideoDecoderDevice> H264Decoder<D> {
    pub fn new(device: D, config: DecoderConfig) -> Self {
        Self {
            device,
            config,
            state: Default::default(),
            sequence: None,
            stream_info: None,
            current_picture: None,
            in_flight: None,
            next_serial: 0,
            pending_frames: Default::default(),
            ready_queue: Default::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn state(&self) -> DecodingState {
        self.state
    }

    /// Returns the parameters of the current stream, if a sequence has been configured.
    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.stream_info.as_ref()
    }

    pub fn current_picture(&self) -> Option<PicId> {
        self.current_picture
    }

    pub fn num_pending_frames(&self) -> usize {
        self.pending_frames.len()
    }

    /// Configures the decoder for the sequence described by `sps`.
    ///
    /// The device is reopened if it is not opened yet or if the resolution, bit depth or chroma
    /// format changed, in which case a [`DecoderEvent::FormatChanged`] event is queued.
    pub fn new_sequence(&mut self, sps: &Sps) -> Result<(), DecodeError> {
        self.state.check(
            "new_sequence",
            &[
                DecodingState::Idle,
                DecodingState::SequenceReady,
                DecodingState::PictureSubmitted,
            ],
        )?;

        let sequence = SequenceInfo::from(sps);
        if self.device.is_opened() && self.sequence.as_ref() == Some(&sequence) {
            debug!("Sequence parameters unchanged");
            return Ok(());
        }

        let format =
            DecodedFormat::from_bit_depth_and_chroma(sequence.bit_depth, sequence.chroma_format_idc)
                .ok_or(DecodeError::UnsupportedFormat {
                    bit_depth: sequence.bit_depth,
                    chroma_format_idc: sequence.chroma_format_idc,
                })?;

        info!(
            "New sequence: coded {}x{}, display {}x{}, {:?}",
            sequence.coded_resolution.width,
            sequence.coded_resolution.height,
            sequence.display_resolution.width,
            sequence.display_resolution.height,
            format
        );

        self.sequence = None;
        self.stream_info = None;
        self.device.reset();

        let opened = self.device.open(&DecoderOpenParams {
            format,
            coded_resolution: sequence.coded_resolution,
            num_output_views: self.config.num_output_views,
            profiles: &DecoderProfile::H264,
        });
        if let Err(e) = opened {
            self.state = DecodingState::Idle;
            return Err(e.into());
        }

        let stream_info = StreamInfo {
            format,
            coded_resolution: sequence.coded_resolution,
            display_resolution: sequence.display_resolution,
            min_num_views: self.config.num_output_views,
        };
        self.ready_queue
            .push(DecoderEvent::FormatChanged(stream_info.clone()));
        self.stream_info = Some(stream_info);
        self.sequence = Some(sequence);

        if self.state == DecodingState::Idle {
            self.state = DecodingState::SequenceReady;
        }

        Ok(())
    }

    /// Gives picture `pic` an output view and makes it the current picture.
    pub fn new_picture(&mut self, dpb: &mut Dpb<OutputView>, pic: PicId) -> Result<(), DecodeError> {
        self.state.check(
            "new_picture",
            &[DecodingState::SequenceReady, DecodingState::PictureSubmitted],
        )?;

        if dpb.picture(pic).is_none() {
            return Err(DecodeError::UnknownPicture(pic));
        }

        let view = self.device.acquire_output_view()?;
        debug!("Picture {:?} decodes into view {}", pic, view.view_id());

        match dpb.set_handle(pic, view) {
            Ok(Some(previous)) => self.device.release_output_view(previous),
            Ok(None) => (),
            Err(view) => {
                self.device.release_output_view(view);
                return Err(DecodeError::UnknownPicture(pic));
            }
        }
        dpb.retain(pic);

        if let Some(previous) = self.current_picture.replace(pic) {
            warn!(
                "Picture {:?} was never attached to a frame, dropping it",
                previous
            );
            self.release_picture(dpb, previous);
        }

        Ok(())
    }

    /// Starts decoding picture `pic`, which must have an output view.
    pub fn start_picture(
        &mut self,
        dpb: &Dpb<OutputView>,
        pic: PicId,
    ) -> Result<CurrentPicState, DecodeError> {
        self.state.check(
            "start_picture",
            &[DecodingState::SequenceReady, DecodingState::PictureSubmitted],
        )?;

        // Nothing has been started yet, so failures up to `begin_frame` keep the current state.
        let view = *dpb.handle(pic).ok_or(DecodeError::NoOutputView(pic))?;
        self.device.begin_frame(view)?;

        let serial = self.next_serial;
        self.next_serial += 1;
        self.in_flight = Some(serial);

        let mut cur = CurrentPicState {
            serial,
            pic,
            view,
            ref_frames: RefFrameTable::build(dpb, view.generation()),
            assembly: PictureAssembly::new(),
            pic_params: None,
            iq_matrix: None,
        };
        debug!(
            "Started picture {:?} on view {} with {} reference frames",
            pic,
            view.view_id(),
            cur.ref_frames.num_valid_entries()
        );

        if let Err(e) = cur.assembly.acquire_bitstream_buffer(&mut self.device) {
            self.abort_picture(&mut cur);
            return Err(e.into());
        }

        self.state = DecodingState::PictureOpen;

        Ok(cur)
    }

    /// Translates the parameters of `slice` and appends its data to the picture bitstream.
    ///
    /// On error the picture is dropped and the decoder is ready for the next one.
    pub fn decode_slice(
        &mut self,
        cur: &mut CurrentPicState,
        slice: &Slice,
        parameter_sets: &ParameterSets,
        dpb: &Dpb<OutputView>,
    ) -> Result<(), DecodeError> {
        self.check_in_flight("decode_slice", cur)?;

        match self.handle_slice(cur, slice, parameter_sets, dpb) {
            Ok(()) => {
                self.state = DecodingState::SliceAppended;
                Ok(())
            }
            Err(e) => {
                self.abort_picture(cur);
                Err(e)
            }
        }
    }

    fn handle_slice(
        &mut self,
        cur: &mut CurrentPicState,
        slice: &Slice,
        parameter_sets: &ParameterSets,
        dpb: &Dpb<OutputView>,
    ) -> Result<(), DecodeError> {
        let hdr = &slice.header;
        let (sps, pps) = parameter_sets.resolve(hdr)?;
        let picture = dpb
            .picture(cur.pic)
            .ok_or(DecodeError::UnknownPicture(cur.pic))?;

        let pic_params = dxva::build_pic_params(hdr, sps, pps, picture, cur.view, &cur.ref_frames);
        let iq_matrix = dxva::build_iq_matrix(sps, pps);

        debug!(
            "Decoding {:?} slice of {} bytes, first_mb_in_slice {}",
            hdr.slice_type,
            slice.nalu.len(),
            hdr.first_mb_in_slice
        );

        let resubmission = self.config.params_resubmission;
        cur.assembly
            .append_slice(&mut self.device, slice.nalu, |device, assembly| {
                match resubmission {
                    ParamsResubmission::EndOfPicture => {
                        submit::flush_mid_picture(device, assembly, None)
                    }
                    ParamsResubmission::EveryFlush => submit::flush_mid_picture(
                        device,
                        assembly,
                        Some((&pic_params, &iq_matrix)),
                    ),
                }
            })?;

        cur.pic_params = Some(pic_params);
        cur.iq_matrix = Some(iq_matrix);

        Ok(())
    }

    /// Submits the remaining buffers of the picture and ends the device frame.
    ///
    /// On error the picture is dropped and the decoder is ready for the next one.
    pub fn end_picture(&mut self, mut cur: CurrentPicState) -> Result<(), DecodeError> {
        self.check_in_flight("end_picture", &cur)?;

        match self.submit_picture(&mut cur) {
            Ok(()) => {
                debug!("Submitted picture {:?}", cur.pic);
                self.in_flight = None;
                self.state = DecodingState::PictureSubmitted;
                Ok(())
            }
            Err(e) => {
                self.abort_picture(&mut cur);
                Err(e)
            }
        }
    }

    fn submit_picture(&mut self, cur: &mut CurrentPicState) -> Result<(), DecodeError> {
        let (pic_params, iq_matrix) = match (&cur.pic_params, &cur.iq_matrix) {
            (Some(pic_params), Some(iq_matrix)) => (pic_params, iq_matrix),
            _ => return Err(DecodeError::NothingToSubmit),
        };

        submit::submit_picture(&mut self.device, &mut cur.assembly, pic_params, iq_matrix)?;
        self.device.end_frame()?;

        Ok(())
    }

    /// Attaches the current picture to `frame`, which then waits for the picture to be output.
    ///
    /// The frame is dropped if there is no current picture.
    pub fn handle_frame(&mut self, mut frame: CodecFrame) -> Result<(), DecodeError> {
        self.state
            .check("handle_frame", &[DecodingState::PictureSubmitted])?;

        let pic = match self.current_picture.take() {
            Some(pic) => pic,
            None => {
                warn!(
                    "Dropping frame {}: no current picture",
                    frame.system_frame_number
                );
                return Err(DecodeError::NoCurrentPicture);
            }
        };

        frame.picture = Some(pic);
        self.pending_frames.push(frame);
        self.state = DecodingState::SequenceReady;

        Ok(())
    }

    /// Copies picture `pic` out of its output view and queues it as a
    /// [`DecoderEvent::FrameReady`] event.
    ///
    /// The reference held by the frame of `pic` is released, which gives the output view back
    /// to the device if nothing else holds the picture.
    pub fn output_picture(
        &mut self,
        dpb: &mut Dpb<OutputView>,
        pic: PicId,
    ) -> Result<(), DecodeError> {
        self.state.check(
            "output_picture",
            &[
                DecodingState::SequenceReady,
                DecodingState::PictureOpen,
                DecodingState::SliceAppended,
                DecodingState::PictureSubmitted,
            ],
        )?;

        let timestamp = dpb
            .picture(pic)
            .ok_or(DecodeError::UnknownPicture(pic))?
            .timestamp;
        let view = *dpb.handle(pic).ok_or(DecodeError::NoOutputView(pic))?;
        let (format, coded_resolution, display_resolution) = match &self.stream_info {
            Some(info) => (info.format, info.coded_resolution, info.display_resolution),
            None => return Err(anyhow!("no stream information to output a picture").into()),
        };

        let frame = match self
            .pending_frames
            .iter()
            .position(|frame| frame.picture == Some(pic))
        {
            Some(position) => Some(self.pending_frames.remove(position)),
            None => {
                warn!("No frame for picture {:?}, using its timestamp", pic);
                None
            }
        };

        let mut data = vec![
            0u8;
            decoded_frame_size(
                format,
                display_resolution.width as usize,
                display_resolution.height as usize
            )
        ];
        let copied = self.device.copy_output_view(view, &mut data);

        if frame.is_some() {
            self.release_picture(dpb, pic);
        }
        copied?;

        let decoded_frame = DecodedFrame {
            system_frame_number: frame.as_ref().map(|frame| frame.system_frame_number),
            pts: frame.as_ref().map_or(timestamp, |frame| frame.pts),
            duration: frame.as_ref().map_or(0, |frame| frame.duration),
            format,
            coded_resolution,
            display_resolution,
            data: Bytes::from(data),
        };
        debug!(
            "Output picture {:?} with pts {}",
            pic, decoded_frame.pts
        );
        self.ready_queue.push(DecoderEvent::FrameReady(decoded_frame));

        Ok(())
    }

    /// Number of events waiting to be retrieved with `next_event`.
    pub fn num_pending_events(&self) -> usize {
        self.ready_queue.len()
    }

    /// Returns the next event, if any, in the order they were emitted.
    pub fn next_event(&mut self) -> Option<DecoderEvent> {
        (&mut self.ready_queue).next()
    }

    /// Gives `view` back to the device, e.g. after its picture left the DPB.
    pub fn recycle_view(&mut self, view: OutputView) {
        self.device.release_output_view(view);
    }

    fn release_picture(&mut self, dpb: &mut Dpb<OutputView>, pic: PicId) {
        if let Some(view) = dpb.release(pic) {
            debug!("Recycling view {} of picture {:?}", view.view_id(), pic);
            self.device.release_output_view(view);
        }
    }

    fn check_in_flight(
        &self,
        operation: &'static str,
        cur: &CurrentPicState,
    ) -> Result<(), DecodeError> {
        self.state.check(
            operation,
            &[DecodingState::PictureOpen, DecodingState::SliceAppended],
        )?;

        if self.in_flight != Some(cur.serial) {
            return Err(anyhow!(
                "{} called with picture {:?}, which is not being decoded",
                operation,
                cur.pic
            )
            .into());
        }

        Ok(())
    }

    /// Drops the picture in flight and makes the decoder ready for the next one.
    fn abort_picture(&mut self, cur: &mut CurrentPicState) {
        warn!("Dropping picture {:?}", cur.pic);

        if cur.assembly.has_buffer() {
            if let Err(e) = self.device.release_decoder_buffer(BufferType::Bitstream) {
                debug!("While releasing bitstream buffer: {}", e);
            }
        }
        cur.assembly.reset();

        if let Err(e) = self.device.end_frame() {
            debug!("While ending frame: {}", e);
        }

        self.in_flight = None;
        self.state = DecodingState::SequenceReady;
    }
}
