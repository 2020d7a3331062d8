// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Stateless decoders.
//!
//! Stateless here refers to the device API targeted by these decoders: every picture is
//! described to the hardware in full, through parameter and bitstream buffers. The upstream
//! decoding process (parsing, picture order counts, reference marking) keeps the decoding state
//! and calls the decoder at each sequence, picture and slice boundary.

pub mod h264;

use thiserror::Error;

use crate::codec::h264::dpb::PicId;
use crate::codec::h264::parser::ParameterSetError;
use crate::device::DeviceError;

/// Position of a decoder in the per-picture protocol.
///
/// A decoder goes through `SequenceReady -> PictureOpen -> SliceAppended* -> PictureSubmitted`
/// for every picture and comes back to `SequenceReady` once the picture has been attached to its
/// frame. Any failure while a picture is in flight also brings it back to `SequenceReady`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodingState {
    /// No sequence has been configured yet.
    #[default]
    Idle,
    /// The device is opened for the current sequence and no picture is in flight.
    SequenceReady,
    /// A picture has been started but has no slice yet.
    PictureOpen,
    /// At least one slice of the current picture has been packetized.
    SliceAppended,
    /// The current picture has been submitted and waits for its frame.
    PictureSubmitted,
}

impl DecodingState {
    /// Returns an error unless the current state is one of `allowed`.
    pub(crate) fn check(
        self,
        operation: &'static str,
        allowed: &[DecodingState],
    ) -> Result<(), DecodeError> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(DecodeError::InvalidState {
                operation,
                state: self,
            })
        }
    }
}

/// Error returned by the decoder operations.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported stream: bit depth {bit_depth} with chroma_format_idc {chroma_format_idc}")]
    UnsupportedFormat { bit_depth: u8, chroma_format_idc: u8 },
    #[error("{operation} cannot be called in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: DecodingState,
    },
    #[error("picture {0:?} does not exist")]
    UnknownPicture(PicId),
    #[error("picture {0:?} has no output view")]
    NoOutputView(PicId),
    #[error("no current picture to hand over")]
    NoCurrentPicture,
    #[error("picture has no slice to submit")]
    NothingToSubmit,
    #[error(transparent)]
    MissingParameterSet(#[from] ParameterSetError),
    #[error(transparent)]
    DeviceError(#[from] DeviceError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_check() {
        let state = DecodingState::PictureOpen;
        assert!(state
            .check(
                "decode_slice",
                &[DecodingState::PictureOpen, DecodingState::SliceAppended]
            )
            .is_ok());

        match state.check("handle_frame", &[DecodingState::PictureSubmitted]) {
            Err(DecodeError::InvalidState { operation, state }) => {
                assert_eq!(operation, "handle_frame");
                assert_eq!(state, DecodingState::PictureOpen);
            }
            _ => panic!("expected an invalid state error"),
        }
    }
}
