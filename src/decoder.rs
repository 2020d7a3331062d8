// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod stateless;

use std::collections::VecDeque;

use bytes::Bytes;

use crate::codec::h264::dpb::PicId;
use crate::DecodedFormat;
use crate::Resolution;

/// Number of output views allocated by default: a full DPB plus some margin for the frames being
/// decoded and displayed.
pub const DEFAULT_NUM_OUTPUT_VIEWS: usize = 16 + 4;

/// When the picture parameters and inverse quantization matrix are handed to the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamsResubmission {
    /// Only with the final submission of a picture. Mid-picture flushes carry the slice control
    /// and bitstream buffers only.
    #[default]
    EndOfPicture,
    /// With every submission, for devices that expect a complete buffer set each time.
    EveryFlush,
}

/// Decoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Number of output views requested when opening the device.
    pub num_output_views: usize,
    pub params_resubmission: ParamsResubmission,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            num_output_views: DEFAULT_NUM_OUTPUT_VIEWS,
            params_resubmission: Default::default(),
        }
    }
}

impl DecoderConfig {
    pub fn num_output_views(mut self, num_output_views: usize) -> Self {
        self.num_output_views = num_output_views;
        self
    }

    pub fn params_resubmission(mut self, params_resubmission: ParamsResubmission) -> Self {
        self.params_resubmission = params_resubmission;
        self
    }
}

/// Stream parameters, as reported when the sequence changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Format of the decoded frames.
    pub format: DecodedFormat,
    /// Resolution of the coded pictures, including padding macroblocks.
    pub coded_resolution: Resolution,
    /// Visible part of the pictures.
    pub display_resolution: Resolution,
    /// Number of output views allocated on the device.
    pub min_num_views: usize,
}

/// An input frame waiting for its decoded picture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecFrame {
    pub system_frame_number: u32,
    pub pts: u64,
    pub duration: u64,
    /// The picture decoded from this frame, once it has been handed over.
    pub picture: Option<PicId>,
}

impl CodecFrame {
    pub fn new(system_frame_number: u32, pts: u64, duration: u64) -> Self {
        Self {
            system_frame_number,
            pts,
            duration,
            picture: None,
        }
    }
}

/// A decoded frame, copied out of its output view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub system_frame_number: Option<u32>,
    pub pts: u64,
    pub duration: u64,
    pub format: DecodedFormat,
    pub coded_resolution: Resolution,
    pub display_resolution: Resolution,
    /// Frame content, without padding.
    pub data: Bytes,
}

/// Events that can be retrieved using the `next_event` method of a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// The next frame has been decoded.
    FrameReady(DecodedFrame),
    /// The format of the stream has changed and the device has been reopened accordingly.
    FormatChanged(StreamInfo),
}

/// A queue where events wait until they are retrieved by the client.
pub(crate) struct ReadyFramesQueue<T> {
    /// Queue of all the events waiting to be sent to the client.
    queue: VecDeque<T>,
}

impl<T> Default for ReadyFramesQueue<T> {
    fn default() -> Self {
        Self {
            queue: Default::default(),
        }
    }
}

impl<T> ReadyFramesQueue<T> {
    /// Push `item` to the back of the queue.
    pub(crate) fn push(&mut self, item: T) {
        self.queue.push_back(item)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Allows us to manipulate the queue like an iterator without consuming it.
impl<'a, T> Iterator for &'a mut ReadyFramesQueue<T> {
    type Item = T;

    /// Returns the next item (if any) waiting to be dequeued.
    fn next(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DecoderConfig::default();
        assert_eq!(config.num_output_views, 20);
        assert_eq!(config.params_resubmission, ParamsResubmission::EndOfPicture);

        let config = config
            .num_output_views(8)
            .params_resubmission(ParamsResubmission::EveryFlush);
        assert_eq!(config.num_output_views, 8);
        assert_eq!(config.params_resubmission, ParamsResubmission::EveryFlush);
    }

    #[test]
    fn queue_is_fifo() {
        let mut queue = ReadyFramesQueue::default();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);

        assert_eq!((&mut queue).next(), Some(1));
        assert_eq!((&mut queue).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(queue.len(), 0);
    }
}
