// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::h264::parser::SliceHeader;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Field {
    #[default]
    Frame,
    Top,
    Bottom,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Reference {
    #[default]
    None,
    ShortTerm,
    LongTerm,
}

/// Data associated with an h.264 picture, as maintained by the upstream decoding process
/// (picture order count derivation and reference marking).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PictureData {
    pub pic_order_cnt: i32,
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,

    pub frame_num: i32,
    pub long_term_pic_num: i32,

    /// Whether the current picture is a reference, i.e. its `nal_ref_idc` is not zero.
    pub nal_ref_idc: u8,

    pub field: Field,
    /// Whether this picture was inserted to fill a gap in `frame_num`.
    pub nonexisting: bool,

    reference: Reference,

    /// Presentation timestamp of the input this picture was decoded from.
    pub timestamp: u64,
}

impl PictureData {
    /// Creates the picture data for a new picture starting with the slice described by `hdr`.
    pub fn new_from_slice(hdr: &SliceHeader, nal_ref_idc: u8, timestamp: u64) -> Self {
        let reference = if nal_ref_idc != 0 {
            Reference::ShortTerm
        } else {
            Reference::None
        };

        Self {
            frame_num: i32::from(hdr.frame_num),
            nal_ref_idc,
            field: hdr.field(),
            reference,
            timestamp,
            ..Default::default()
        }
    }

    /// Creates a placeholder for a missing reference frame.
    pub fn new_non_existing(frame_num: i32, timestamp: u64) -> Self {
        Self {
            frame_num,
            nonexisting: true,
            reference: Reference::ShortTerm,
            timestamp,
            ..Default::default()
        }
    }

    /// Whether the picture is used for reference, short or long term.
    pub fn is_ref(&self) -> bool {
        !matches!(self.reference, Reference::None)
    }

    pub fn is_long_term_ref(&self) -> bool {
        matches!(self.reference, Reference::LongTerm)
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn set_reference(&mut self, reference: Reference) {
        log::trace!(
            "Set reference of picture (frame_num {}) to {:?}",
            self.frame_num,
            reference
        );
        self.reference = reference;
    }

    /// Sets the picture order counts of both fields, deriving the picture's own count from the
    /// fields it codes.
    pub fn set_field_order_cnts(&mut self, top: i32, bottom: i32) {
        self.top_field_order_cnt = top;
        self.bottom_field_order_cnt = bottom;
        self.pic_order_cnt = match self.field {
            Field::Frame => std::cmp::min(top, bottom),
            Field::Top => top,
            Field::Bottom => bottom,
        };
    }
}
