// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hand-over of the picture buffers to the device.
//!
//! Each buffer goes through an acquire, fill and release cycle before the descriptors of all the
//! buffers of a submission are passed to the device in one call. A failure at any step aborts
//! the submission, and the picture must be dropped.

use log::debug;

use crate::backend::dxva::PicParamsH264;
use crate::backend::dxva::QmatrixH264;
use crate::backend::dxva::SliceH264Short;
use crate::decoder::stateless::h264::bitstream::PictureAssembly;
use crate::decoder::stateless::DecodeError;
use crate::device::BufferDesc;
use crate::device::BufferType;
use crate::device::DeviceError;
use crate::device::DeviceResult;
use crate::device::VideoDecoderDevice;

/// Acquires a buffer of kind `buffer_type`, copies `data` at its start and releases it.
///
/// The buffer is released even if it turns out to be too small.
fn fill_buffer<D: VideoDecoderDevice + ?Sized>(
    device: &mut D,
    buffer_type: BufferType,
    data: &[u8],
) -> DeviceResult<BufferDesc> {
    let buffer = device.get_decoder_buffer(buffer_type)?;
    let capacity = buffer.len();
    let filled = match buffer.get_mut(..data.len()) {
        Some(dst) => {
            dst.copy_from_slice(data);
            Ok(())
        }
        None => Err(DeviceError::BufferTooSmall {
            buffer_type,
            needed: data.len(),
            capacity,
        }),
    };

    device.release_decoder_buffer(buffer_type)?;
    filled?;

    BufferDesc::new(buffer_type, data.len())
}

/// Writes the picture parameters and the inverse quantization matrix.
fn fill_param_buffers<D: VideoDecoderDevice + ?Sized>(
    device: &mut D,
    pic_params: &PicParamsH264,
    iq_matrix: &QmatrixH264,
) -> DeviceResult<[BufferDesc; 2]> {
    Ok([
        fill_buffer(device, BufferType::PictureParameters, &pic_params.to_bytes())?,
        fill_buffer(
            device,
            BufferType::InverseQuantizationMatrix,
            &iq_matrix.to_bytes(),
        )?,
    ])
}

/// Writes the slice control records of `assembly`, releases its bitstream buffer and submits
/// both, preceded by `param_buffers`. Resets `assembly` on success.
fn submit_slices<D: VideoDecoderDevice + ?Sized>(
    device: &mut D,
    assembly: &mut PictureAssembly,
    param_buffers: &[BufferDesc],
) -> Result<(), DecodeError> {
    let slices = assembly.slices();
    if slices.is_empty() {
        return Err(DecodeError::NothingToSubmit);
    }

    let mut slice_control = Vec::with_capacity(slices.len() * SliceH264Short::SIZE);
    for slice in slices {
        slice_control.extend_from_slice(&slice.to_bytes());
    }

    let slice_control = fill_buffer(device, BufferType::SliceControl, &slice_control)?;

    device.release_decoder_buffer(BufferType::Bitstream)?;
    let bitstream = BufferDesc::new(BufferType::Bitstream, assembly.offset())?;

    let mut buffers = param_buffers.to_vec();
    buffers.push(slice_control);
    buffers.push(bitstream);

    debug!(
        "Submitting {} buffers: {} slice chunks, {} bitstream bytes",
        buffers.len(),
        assembly.slices().len(),
        assembly.offset()
    );
    device.submit_decoder_buffers(&buffers)?;

    assembly.reset();

    Ok(())
}

/// Submits the last buffers of a picture along with its parameters.
pub fn submit_picture<D: VideoDecoderDevice + ?Sized>(
    device: &mut D,
    assembly: &mut PictureAssembly,
    pic_params: &PicParamsH264,
    iq_matrix: &QmatrixH264,
) -> Result<(), DecodeError> {
    if assembly.slices().is_empty() {
        return Err(DecodeError::NothingToSubmit);
    }

    let param_buffers = fill_param_buffers(device, pic_params, iq_matrix)?;
    submit_slices(device, assembly, &param_buffers)
}

/// Submits the full bitstream buffer of a picture still being decoded.
///
/// `params` are resubmitted along with the slices if given, otherwise only the slice control and
/// bitstream buffers are.
pub fn flush_mid_picture<D: VideoDecoderDevice + ?Sized>(
    device: &mut D,
    assembly: &mut PictureAssembly,
    params: Option<(&PicParamsH264, &QmatrixH264)>,
) -> Result<(), DecodeError> {
    match params {
        Some((pic_params, iq_matrix)) => submit_picture(device, assembly, pic_params, iq_matrix),
        None => submit_slices(device, assembly, &[]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dummy::DeviceOp;
    use crate::device::dummy::DummyDevice;
    use crate::device::DecoderOpenParams;
    use crate::device::DecoderProfile;
    use crate::device::OutputView;
    use crate::DecodedFormat;
    use crate::Resolution;

    fn device_in_frame() -> DummyDevice {
        let mut device = DummyDevice::new();
        device
            .open(&DecoderOpenParams {
                format: DecodedFormat::NV12,
                coded_resolution: Resolution::from((16, 16)),
                num_output_views: 1,
                profiles: &DecoderProfile::H264,
            })
            .unwrap();
        device.begin_frame(OutputView::new(0).unwrap()).unwrap();
        device.clear_ops();
        device
    }

    fn assembly_with_slices(device: &mut DummyDevice, nalus: &[&[u8]]) -> PictureAssembly {
        let mut assembly = PictureAssembly::new();
        assembly.acquire_bitstream_buffer(device).unwrap();
        for nalu in nalus {
            assembly
                .append_slice(device, nalu, |_, _| unreachable!())
                .unwrap();
        }
        assembly
    }

    fn iq_matrix() -> QmatrixH264 {
        QmatrixH264 {
            scaling_lists_4x4: [[16; 16]; 6],
            scaling_lists_8x8: [[16; 64]; 2],
        }
    }

    #[test]
    fn final_submission() {
        let mut device = device_in_frame();
        let mut assembly = assembly_with_slices(&mut device, &[&[0x65, 1], &[0x65, 2, 3]]);

        let pic_params = PicParamsH264 {
            frame_num: 4,
            ..Default::default()
        };
        submit_picture(&mut device, &mut assembly, &pic_params, &iq_matrix()).unwrap();

        let submissions: Vec<_> = device.submissions().collect();
        assert_eq!(submissions.len(), 1);
        let buffers = submissions[0];

        let kinds: Vec<_> = buffers.iter().map(|b| b.desc.buffer_type).collect();
        assert_eq!(
            kinds,
            vec![
                BufferType::PictureParameters,
                BufferType::InverseQuantizationMatrix,
                BufferType::SliceControl,
                BufferType::Bitstream,
            ]
        );
        assert!(buffers.iter().all(|b| b.desc.data_offset == 0));

        assert_eq!(buffers[0].data.as_ref(), &pic_params.to_bytes()[..]);
        assert_eq!(buffers[1].desc.data_size, 224);
        assert_eq!(buffers[2].desc.data_size, 20);
        let second = SliceH264Short::from_bytes(&buffers[2].data[10..]).unwrap();
        assert_eq!(second.bs_nal_unit_data_location, 5);
        assert_eq!(second.slice_bytes_in_buffer, 6);
        assert_eq!(
            buffers[3].data.as_ref(),
            &[0, 0, 1, 0x65, 1, 0, 0, 1, 0x65, 2, 3]
        );

        // Buffers are filled and released one kind after the other.
        assert_eq!(
            &device.ops()[..8],
            &[
                DeviceOp::GetBuffer(BufferType::Bitstream),
                DeviceOp::GetBuffer(BufferType::PictureParameters),
                DeviceOp::ReleaseBuffer(BufferType::PictureParameters),
                DeviceOp::GetBuffer(BufferType::InverseQuantizationMatrix),
                DeviceOp::ReleaseBuffer(BufferType::InverseQuantizationMatrix),
                DeviceOp::GetBuffer(BufferType::SliceControl),
                DeviceOp::ReleaseBuffer(BufferType::SliceControl),
                DeviceOp::ReleaseBuffer(BufferType::Bitstream),
            ]
        );

        assert!(assembly.slices().is_empty());
        assert!(!assembly.has_buffer());
        assert_eq!(assembly.offset(), 0);
    }

    #[test]
    fn mid_picture_flush_without_params() {
        let mut device = device_in_frame();
        let mut assembly = assembly_with_slices(&mut device, &[&[0x65]]);

        flush_mid_picture(&mut device, &mut assembly, None).unwrap();

        let submissions: Vec<_> = device.submissions().collect();
        let kinds: Vec<_> = submissions[0].iter().map(|b| b.desc.buffer_type).collect();
        assert_eq!(kinds, vec![BufferType::SliceControl, BufferType::Bitstream]);
        assert!(!device
            .ops()
            .contains(&DeviceOp::GetBuffer(BufferType::PictureParameters)));
    }

    #[test]
    fn mid_picture_flush_with_params() {
        let mut device = device_in_frame();
        let mut assembly = assembly_with_slices(&mut device, &[&[0x65]]);

        let pic_params = PicParamsH264::default();
        let iq_matrix = iq_matrix();
        flush_mid_picture(&mut device, &mut assembly, Some((&pic_params, &iq_matrix))).unwrap();

        let submissions: Vec<_> = device.submissions().collect();
        assert_eq!(submissions[0].len(), 4);
    }

    #[test]
    fn empty_picture_is_not_submitted() {
        let mut device = device_in_frame();
        let mut assembly = assembly_with_slices(&mut device, &[]);

        let result = submit_picture(
            &mut device,
            &mut assembly,
            &PicParamsH264::default(),
            &iq_matrix(),
        );
        assert!(matches!(result, Err(DecodeError::NothingToSubmit)));
        assert_eq!(device.submissions().count(), 0);
    }

    #[test]
    fn small_buffer_is_released() {
        let mut device = device_in_frame();
        device.set_buffer_capacity(BufferType::PictureParameters, 16);
        let mut assembly = assembly_with_slices(&mut device, &[&[0x65]]);

        let result = submit_picture(
            &mut device,
            &mut assembly,
            &PicParamsH264::default(),
            &iq_matrix(),
        );
        assert!(matches!(
            result,
            Err(DecodeError::DeviceError(DeviceError::BufferTooSmall {
                buffer_type: BufferType::PictureParameters,
                needed: 1040,
                capacity: 16,
            }))
        ));
        assert_eq!(
            device.ops().last(),
            Some(&DeviceOp::ReleaseBuffer(BufferType::PictureParameters))
        );
        assert_eq!(device.submissions().count(), 0);
    }

    #[test]
    fn acquisition_failure_aborts() {
        let mut device = device_in_frame();
        device.fail_buffer_acquisition(Some(BufferType::SliceControl));
        let mut assembly = assembly_with_slices(&mut device, &[&[0x65]]);

        let result = submit_picture(
            &mut device,
            &mut assembly,
            &PicParamsH264::default(),
            &iq_matrix(),
        );
        assert!(matches!(
            result,
            Err(DecodeError::DeviceError(DeviceError::AcquireBuffer(
                BufferType::SliceControl
            )))
        ));
        assert_eq!(device.submissions().count(), 0);
        assert_eq!(assembly.slices().len(), 1);
    }
}
