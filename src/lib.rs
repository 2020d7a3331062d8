// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! H.264 decoding through a fixed-function, buffer-based acceleration interface.
//!
//! This crate turns parsed H.264 syntax (parameter sets, slice headers and the decoded picture
//! buffer) into the binary parameter, quantization matrix, slice control and bitstream buffers a
//! DXVA-style hardware decoder consumes. The hardware itself is reached through the
//! [`device::VideoDecoderDevice`] trait.

pub mod backend;
pub mod codec;
pub mod decoder;
pub mod device;

use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// Formats the hardware can decode into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DecodedFormat {
    /// 8-bit Y plane followed by an interleaved UV plane.
    NV12,
    /// 10-bit samples stored in the 10 most significant bits of 16-bit little-endian words,
    /// laid out like NV12.
    P010,
}

impl DecodedFormat {
    /// Returns the output format for a given luma bit depth and `chroma_format_idc`, if the
    /// hardware can produce it.
    pub fn from_bit_depth_and_chroma(bit_depth: u8, chroma_format_idc: u8) -> Option<Self> {
        match (bit_depth, chroma_format_idc) {
            (8, 1) => Some(DecodedFormat::NV12),
            (10, 1) => Some(DecodedFormat::P010),
            _ => None,
        }
    }
}

impl FromStr for DecodedFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nv12" | "NV12" => Ok(DecodedFormat::NV12),
            "p010" | "P010" => Ok(DecodedFormat::P010),
            _ => Err("unrecognized output format. Valid values: nv12, p010"),
        }
    }
}

/// Returns the size required to store a frame of `format` with size `width`x`height`, without any
/// padding.
pub fn decoded_frame_size(format: DecodedFormat, width: usize, height: usize) -> usize {
    let bytes_per_sample = match format {
        DecodedFormat::NV12 => 1,
        DecodedFormat::P010 => 2,
    };

    let y_size = width * height;
    // The UV plane is aligned to 2 in both directions.
    let uv_size = ((width + 1) / 2) * ((height + 1) / 2) * 2;

    (y_size + uv_size) * bytes_per_sample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_selection() {
        assert_eq!(
            DecodedFormat::from_bit_depth_and_chroma(8, 1),
            Some(DecodedFormat::NV12)
        );
        assert_eq!(
            DecodedFormat::from_bit_depth_and_chroma(10, 1),
            Some(DecodedFormat::P010)
        );
        assert_eq!(DecodedFormat::from_bit_depth_and_chroma(8, 2), None);
        assert_eq!(DecodedFormat::from_bit_depth_and_chroma(10, 3), None);
        assert_eq!(DecodedFormat::from_bit_depth_and_chroma(12, 1), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!("nv12".parse::<DecodedFormat>(), Ok(DecodedFormat::NV12));
        assert_eq!("P010".parse::<DecodedFormat>(), Ok(DecodedFormat::P010));
        assert!("i420".parse::<DecodedFormat>().is_err());
    }

    #[test]
    fn frame_sizes() {
        assert_eq!(decoded_frame_size(DecodedFormat::NV12, 16, 16), 384);
        assert_eq!(decoded_frame_size(DecodedFormat::P010, 16, 16), 768);
        // Odd sizes round the chroma plane up.
        assert_eq!(decoded_frame_size(DecodedFormat::NV12, 3, 3), 9 + 8);
    }
}
