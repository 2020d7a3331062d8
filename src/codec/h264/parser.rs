// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsed H.264 syntax structures.
//!
//! Bitstream parsing happens upstream. This module only holds the syntax elements the
//! acceleration backend consumes, plus a store of the active parameter sets so slice headers can
//! be resolved to their PPS and SPS.

use std::collections::BTreeMap;
use std::rc::Rc;

use enumn::N;
use thiserror::Error;

use crate::codec::h264::picture::Field;
use crate::Resolution;

/// Flat_4x4_16, the scaling list in effect when no matrix is transmitted.
pub(crate) const FLAT_4X4_16: [u8; 16] = [16; 16];

/// Flat_8x8_16, the scaling list in effect when no matrix is transmitted.
pub(crate) const FLAT_8X8_16: [u8; 64] = [16; 64];

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect<T> {
    pub min: Point<T>,
    pub max: Point<T>,
}

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
/// See table 7-6 in ITU-T H.264.
pub enum SliceType {
    P = 0,
    B = 1,
    I = 2,
    Sp = 3,
    Si = 4,
}

impl SliceType {
    /// Builds a slice type from the `slice_type` syntax element, which uses values 5..9 to
    /// signal that all slices of the picture share the same type.
    pub fn from_syntax(slice_type: u8) -> Option<Self> {
        Self::n(slice_type % 5)
    }

    /// Whether this is a P slice. See table 7-6 in ITU-T H.264.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-6 in ITU-T H.264.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-6 in ITU-T H.264.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }

    /// Whether this is a SP slice. See table 7-6 in ITU-T H.264.
    pub fn is_sp(&self) -> bool {
        matches!(self, SliceType::Sp)
    }

    /// Whether this is a SI slice. See table 7-6 in ITU-T H.264.
    pub fn is_si(&self) -> bool {
        matches!(self, SliceType::Si)
    }
}

impl Default for SliceType {
    fn default() -> Self {
        Self::P
    }
}

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Profile {
    Baseline = 66,
    Main = 77,
    Extended = 88,
    High = 100,
    High10 = 110,
    High422P = 122,
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    #[default]
    L1 = 10,
    L1B = 9,
    L1_1 = 11,
    L1_2 = 12,
    L1_3 = 13,
    L2_0 = 20,
    L2_1 = 21,
    L2_2 = 22,
    L3 = 30,
    L3_1 = 31,
    L3_2 = 32,
    L4 = 40,
    L4_1 = 41,
    L4_2 = 42,
    L5 = 50,
    L5_1 = 51,
    L5_2 = 52,
    L6 = 60,
    L6_1 = 61,
    L6_2 = 62,
}

/// A H264 Sequence Parameter Set, restricted to the syntax elements consumed by acceleration
/// backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    /// Identifies the sequence parameter set that is referred to by the picture
    /// parameter set
    pub seq_parameter_set_id: u8,

    /// Profile to which the coded video sequence conforms
    pub profile_idc: u8,

    /// Level to which the coded video sequence conforms
    pub level_idc: Level,

    /// Specifies the chroma sampling relative to the luma sampling as specified
    /// in clause 6.2.
    pub chroma_format_idc: u8,

    /// Specifies whether the three colour components of the 4:4:4 chroma format
    /// are coded separately.
    pub separate_colour_plane_flag: bool,

    /// Specifies the bit depth of the samples of the luma array. See 7-3 and 7-4.
    pub bit_depth_luma_minus8: u8,

    /// Specifies the bit depth of the samples of the chroma arrays. See 7-5 and 7-6.
    pub bit_depth_chroma_minus8: u8,

    /// Whether `seq_scaling_list_present_flag[i]` is present or whether the
    /// sequence level scaling list shall be specified by Flat_4x4_16 and
    /// Flat_8x8_16.
    pub seq_scaling_matrix_present_flag: bool,

    /// 4x4 Scaling list as read with 7.3.2.1.1.1
    pub scaling_lists_4x4: [[u8; 16]; 6],
    /// 8x8 Scaling list as read with 7.3.2.1.1.1
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Specifies the value of the variable MaxFrameNum: MaxFrameNum = 2 ^
    /// (log2_max_frame_num_minus4 + 4 )
    pub log2_max_frame_num_minus4: u8,

    /// Specifies the method to decode picture order count (as specified in
    /// clause 8.2.1)
    pub pic_order_cnt_type: u8,

    /// Specifies the value of the variable MaxPicOrderCntLsb: MaxPicOrderCntLsb = 2 ^ (
    /// log2_max_pic_order_cnt_lsb_minus4 + 4 ).
    pub log2_max_pic_order_cnt_lsb_minus4: u8,

    /// If true, specifies that `delta_pic_order_cnt[0]` and
    /// `delta_pic_order_cnt[1]` are not present in the slice headers of the
    /// sequence and shall be inferred to be equal to 0.
    pub delta_pic_order_always_zero_flag: bool,

    /// Specifies the maximum number of short-term and long-term reference
    /// frames, complementary reference field pairs, and non-paired reference
    /// fields that may be used by the decoding process for inter prediction.
    pub max_num_ref_frames: u8,

    /// Plus 1 specifies the width of each decoded picture in units of
    /// macroblocks.
    pub pic_width_in_mbs_minus1: u16,
    /// Plus 1 specifies the height in slice group map units of a decoded frame
    /// or field.
    pub pic_height_in_map_units_minus1: u16,

    /// If true, specifies that every coded picture of the coded video sequence
    /// is a coded frame containing only frame macroblocks.
    pub frame_mbs_only_flag: bool,

    /// If true, specifies the possible use of switching between frame and field
    /// macroblocks within frames.
    pub mb_adaptive_frame_field_flag: bool,

    /// Specifies the method used in the derivation process for luma motion
    /// vectors for B_Skip, B_Direct_16x16 and B_Direct_8x8 as specified in
    /// clause 8.4.1.2.
    pub direct_8x8_inference_flag: bool,

    /// If true, specifies that the frame cropping offset parameters follow.
    pub frame_cropping_flag: bool,

    /// Cropping offsets, in units of `CropUnitX`/`CropUnitY`.
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,
}

impl Sps {
    /// Returns the coded width of the stream.
    ///
    /// See 7-13 through 7-17 in ITU-T H.264.
    pub const fn width(&self) -> u32 {
        (self.pic_width_in_mbs_minus1 as u32 + 1) * 16
    }

    /// Returns the coded height of the stream.
    ///
    /// See 7-13 through 7-17 in ITU-T H.264.
    pub const fn height(&self) -> u32 {
        (self.pic_height_in_map_units_minus1 as u32 + 1)
            * 16
            * (2 - self.frame_mbs_only_flag as u32)
    }

    /// Returns the height of a whole frame in macroblocks, minus one.
    pub fn frame_height_in_mbs_minus1(&self) -> u16 {
        let interlaced = u16::from(!self.frame_mbs_only_flag);
        ((self.pic_height_in_map_units_minus1 + 1) << interlaced) - 1
    }

    /// Bit depth of the luma samples.
    pub const fn bit_depth_luma(&self) -> u8 {
        self.bit_depth_luma_minus8 + 8
    }

    /// Returns `ChromaArrayType`, as computed in ITU-T H.264.
    pub const fn chroma_array_type(&self) -> u8 {
        match self.separate_colour_plane_flag {
            false => self.chroma_format_idc,
            true => 0,
        }
    }

    /// Returns `SubWidthC` and `SubHeightC`.
    ///
    /// See table 6-1 in ITU-T H.264.
    fn sub_width_height_c(&self) -> (u32, u32) {
        match (self.chroma_format_idc, self.separate_colour_plane_flag) {
            (1, false) => (2, 2),
            (2, false) => (2, 1),
            (3, false) => (1, 1),
            // undefined.
            _ => (1, 1),
        }
    }

    /// Returns `CropUnitX` and `CropUnitY`.
    ///
    /// See 7-19 through 7-22 in ITU-T H.264.
    fn crop_unit_x_y(&self) -> (u32, u32) {
        match self.chroma_array_type() {
            0 => (1, 2 - u32::from(self.frame_mbs_only_flag)),
            _ => {
                let (sub_width_c, sub_height_c) = self.sub_width_height_c();
                (
                    sub_width_c,
                    sub_height_c * (2 - u32::from(self.frame_mbs_only_flag)),
                )
            }
        }
    }

    /// Same as MaxFrameNum. See 7-10 in ITU-T H.264.
    pub fn max_frame_num(&self) -> u32 {
        1 << (self.log2_max_frame_num_minus4 + 4)
    }

    pub fn visible_rectangle(&self) -> Rect<u32> {
        if !self.frame_cropping_flag {
            return Rect {
                min: Point { x: 0, y: 0 },
                max: Point {
                    x: self.width(),
                    y: self.height(),
                },
            };
        }

        let (crop_unit_x, crop_unit_y) = self.crop_unit_x_y();

        let crop_left = crop_unit_x * self.frame_crop_left_offset;
        let crop_right = crop_unit_x * self.frame_crop_right_offset;
        let crop_top = crop_unit_y * self.frame_crop_top_offset;
        let crop_bottom = crop_unit_y * self.frame_crop_bottom_offset;

        Rect {
            min: Point {
                x: crop_left,
                y: crop_top,
            },
            max: Point {
                x: self.width().saturating_sub(crop_right),
                y: self.height().saturating_sub(crop_bottom),
            },
        }
    }

    /// Resolution of the coded pictures.
    pub fn coded_resolution(&self) -> Resolution {
        Resolution::from((self.width(), self.height()))
    }

    /// Resolution of the pictures once cropped.
    pub fn display_resolution(&self) -> Resolution {
        let rect = self.visible_rectangle();
        Resolution::from((rect.max.x - rect.min.x, rect.max.y - rect.min.y))
    }
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            seq_parameter_set_id: Default::default(),
            profile_idc: Profile::High as u8,
            level_idc: Default::default(),
            chroma_format_idc: 1,
            separate_colour_plane_flag: Default::default(),
            bit_depth_luma_minus8: Default::default(),
            bit_depth_chroma_minus8: Default::default(),
            seq_scaling_matrix_present_flag: Default::default(),
            scaling_lists_4x4: [FLAT_4X4_16; 6],
            scaling_lists_8x8: [FLAT_8X8_16; 6],
            log2_max_frame_num_minus4: Default::default(),
            pic_order_cnt_type: Default::default(),
            log2_max_pic_order_cnt_lsb_minus4: Default::default(),
            delta_pic_order_always_zero_flag: Default::default(),
            max_num_ref_frames: Default::default(),
            pic_width_in_mbs_minus1: Default::default(),
            pic_height_in_map_units_minus1: Default::default(),
            frame_mbs_only_flag: true,
            mb_adaptive_frame_field_flag: Default::default(),
            direct_8x8_inference_flag: Default::default(),
            frame_cropping_flag: Default::default(),
            frame_crop_left_offset: Default::default(),
            frame_crop_right_offset: Default::default(),
            frame_crop_top_offset: Default::default(),
            frame_crop_bottom_offset: Default::default(),
        }
    }
}

#[derive(Default)]
pub struct SpsBuilder(Sps);

impl SpsBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn seq_parameter_set_id(mut self, value: u8) -> Self {
        self.0.seq_parameter_set_id = value;
        self
    }

    pub fn profile_idc(mut self, value: Profile) -> Self {
        self.0.profile_idc = value as u8;
        self
    }

    pub fn level_idc(mut self, value: Level) -> Self {
        self.0.level_idc = value;
        self
    }

    pub fn frame_crop_offsets(mut self, top: u32, bottom: u32, left: u32, right: u32) -> Self {
        self.0.frame_cropping_flag = true;
        self.0.frame_crop_top_offset = top;
        self.0.frame_crop_bottom_offset = bottom;
        self.0.frame_crop_left_offset = left;
        self.0.frame_crop_right_offset = right;
        self
    }

    pub fn frame_crop(self, top: u32, bottom: u32, left: u32, right: u32) -> Self {
        let (crop_unit_x, crop_unit_y) = self.0.crop_unit_x_y();

        self.frame_crop_offsets(
            top / crop_unit_y,
            bottom / crop_unit_y,
            left / crop_unit_x,
            right / crop_unit_x,
        )
    }

    /// Sets the coded size from a display size, adding cropping offsets when the size is not
    /// a multiple of the macroblock grid. Call after `frame_mbs_only_flag` and
    /// `chroma_format_idc`.
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        const MB_SIZE: u32 = 16;

        let map_unit_height = MB_SIZE * (2 - u32::from(self.0.frame_mbs_only_flag));

        let mb_width = (width + MB_SIZE - 1) / MB_SIZE;
        let map_units_height = (height + map_unit_height - 1) / map_unit_height;

        self.0.pic_width_in_mbs_minus1 = (mb_width - 1) as u16;
        self.0.pic_height_in_map_units_minus1 = (map_units_height - 1) as u16;

        let compressed_width = mb_width * MB_SIZE;
        let compressed_height = map_units_height * map_unit_height;

        if compressed_width != width || compressed_height != height {
            self = self.frame_crop(0, compressed_height - height, 0, compressed_width - width);
        }

        self
    }

    pub fn chroma_format_idc(mut self, value: u8) -> Self {
        self.0.chroma_format_idc = value;
        self
    }

    pub fn separate_colour_plane_flag(mut self, value: bool) -> Self {
        self.0.separate_colour_plane_flag = value;
        self
    }

    pub fn max_num_ref_frames(mut self, value: u8) -> Self {
        self.0.max_num_ref_frames = value;
        self
    }

    pub fn frame_mbs_only_flag(mut self, value: bool) -> Self {
        self.0.frame_mbs_only_flag = value;
        self
    }

    pub fn mb_adaptive_frame_field_flag(mut self, value: bool) -> Self {
        self.0.mb_adaptive_frame_field_flag = value;
        self
    }

    pub fn direct_8x8_inference_flag(mut self, value: bool) -> Self {
        self.0.direct_8x8_inference_flag = value;
        self
    }

    /// Sets explicit sequence scaling lists.
    pub fn scaling_lists(
        mut self,
        lists_4x4: [[u8; 16]; 6],
        lists_8x8: [[u8; 64]; 6],
    ) -> Self {
        self.0.seq_scaling_matrix_present_flag = true;
        self.0.scaling_lists_4x4 = lists_4x4;
        self.0.scaling_lists_8x8 = lists_8x8;
        self
    }

    pub fn log2_max_frame_num_minus4(mut self, value: u8) -> Self {
        self.0.log2_max_frame_num_minus4 = value;
        self
    }

    pub fn pic_order_cnt_type(mut self, value: u8) -> Self {
        self.0.pic_order_cnt_type = value;
        self
    }

    pub fn log2_max_pic_order_cnt_lsb_minus4(mut self, value: u8) -> Self {
        self.0.log2_max_pic_order_cnt_lsb_minus4 = value;
        self
    }

    pub fn delta_pic_order_always_zero_flag(mut self, value: bool) -> Self {
        self.0.delta_pic_order_always_zero_flag = value;
        self
    }

    pub fn bit_depth_chroma_minus8(mut self, value: u8) -> Self {
        self.0.bit_depth_chroma_minus8 = value;
        self
    }

    pub fn bit_depth_chroma(self, value: u8) -> Self {
        self.bit_depth_chroma_minus8(value - 8)
    }

    pub fn bit_depth_luma_minus8(mut self, value: u8) -> Self {
        self.0.bit_depth_luma_minus8 = value;
        self
    }

    pub fn bit_depth_luma(self, value: u8) -> Self {
        self.bit_depth_luma_minus8(value - 8)
    }

    pub fn build(self) -> Rc<Sps> {
        Rc::new(self.0)
    }
}

/// A H264 Picture Parameter Set, restricted to the syntax elements consumed by acceleration
/// backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    /// Identifies the picture parameter set that is referred to in the slice header.
    pub pic_parameter_set_id: u8,

    /// Refers to the active sequence parameter set.
    pub seq_parameter_set_id: u8,

    /// Selects CAVLC (false) or CABAC (true) entropy decoding.
    pub entropy_coding_mode_flag: bool,

    /// If true, specifies that the syntax elements delta_pic_order_cnt_bottom
    /// or `delta_pic_order_cnt[1]` are present in the slice headers for coded
    /// frames.
    pub bottom_field_pic_order_in_frame_present_flag: bool,

    /// Plus 1 specifies the number of slice groups for a picture.
    pub num_slice_groups_minus1: u32,

    /// Specifies how slice groups are mapped to macroblocks. Only meaningful when
    /// `num_slice_groups_minus1` is greater than 0.
    pub slice_group_map_type: u8,

    /// Specifies how `num_ref_idx_l0_active_minus1` is inferred for P, SP, and
    /// B slices with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l0_default_active_minus1: u8,

    /// Specifies how `num_ref_idx_l1_active_minus1` is inferred for B slices
    /// with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l1_default_active_minus1: u8,

    /// If set, specifies that explicit weighted prediction shall be applied to P and SP slices.
    pub weighted_pred_flag: bool,

    /// 0: default, 1: explicit, 2: implicit weighted prediction for B slices.
    pub weighted_bipred_idc: u8,

    /// Specifies the initial value minus 26 of SliceQPY for each slice.
    pub pic_init_qp_minus26: i8,

    /// Specifies the initial value minus 26 of SliceQSY for all macroblocks in
    /// SP or SI slices.
    pub pic_init_qs_minus26: i8,

    /// Specifies the offset that shall be added to QP Y and QSY for addressing
    /// the table of QPC values for the Cb chroma component.
    pub chroma_qp_index_offset: i8,

    /// If set, specifies that a set of syntax elements controlling the
    /// characteristics of the deblocking filter is present in the slice header.
    pub deblocking_filter_control_present_flag: bool,

    /// If set, specifies constrained intra prediction.
    pub constrained_intra_pred_flag: bool,

    /// If set, specifies that the `redundant_pic_cnt` syntax element is present in all slice
    /// headers.
    pub redundant_pic_cnt_present_flag: bool,

    /// If set, specifies that the 8x8 transform decoding process may be in use
    /// (see clause 8.5).
    pub transform_8x8_mode_flag: bool,

    ///  If set, specifies that parameters are present to modify the scaling
    ///  lists specified in the sequence parameter set. If not set, the scaling lists used for
    ///  the picture shall be inferred to be equal to those specified by the sequence parameter
    ///  set.
    pub pic_scaling_matrix_present_flag: bool,

    /// 4x4 Scaling list as read with 7.3.2.1.1.1
    pub scaling_lists_4x4: [[u8; 16]; 6],
    /// 8x8 Scaling list as read with 7.3.2.1.1.1
    pub scaling_lists_8x8: [[u8; 64]; 6],

    /// Specifies the offset that shall be added to QPY and QSY for addressing
    /// the table of QPC values for the Cr chroma component.
    pub second_chroma_qp_index_offset: i8,
}

pub struct PpsBuilder(Pps);

impl PpsBuilder {
    pub fn new(sps: &Sps) -> Self {
        PpsBuilder(Pps {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: sps.seq_parameter_set_id,
            entropy_coding_mode_flag: false,
            bottom_field_pic_order_in_frame_present_flag: false,
            num_slice_groups_minus1: 0,
            slice_group_map_type: 0,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            weighted_pred_flag: false,
            weighted_bipred_idc: 0,
            pic_init_qp_minus26: 0,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            deblocking_filter_control_present_flag: false,
            constrained_intra_pred_flag: false,
            redundant_pic_cnt_present_flag: false,
            transform_8x8_mode_flag: false,
            pic_scaling_matrix_present_flag: false,
            scaling_lists_4x4: sps.scaling_lists_4x4,
            scaling_lists_8x8: sps.scaling_lists_8x8,
            second_chroma_qp_index_offset: 0,
        })
    }

    pub fn pic_parameter_set_id(mut self, value: u8) -> Self {
        self.0.pic_parameter_set_id = value;
        self
    }

    pub fn seq_parameter_set_id(mut self, value: u8) -> Self {
        self.0.seq_parameter_set_id = value;
        self
    }

    pub fn entropy_coding_mode_flag(mut self, value: bool) -> Self {
        self.0.entropy_coding_mode_flag = value;
        self
    }

    pub fn bottom_field_pic_order_in_frame_present_flag(mut self, value: bool) -> Self {
        self.0.bottom_field_pic_order_in_frame_present_flag = value;
        self
    }

    pub fn slice_groups(mut self, num_slice_groups_minus1: u32, map_type: u8) -> Self {
        self.0.num_slice_groups_minus1 = num_slice_groups_minus1;
        self.0.slice_group_map_type = map_type;
        self
    }

    pub fn weighted_pred_flag(mut self, value: bool) -> Self {
        self.0.weighted_pred_flag = value;
        self
    }

    pub fn weighted_bipred_idc(mut self, value: u8) -> Self {
        self.0.weighted_bipred_idc = value;
        self
    }

    pub fn pic_init_qp_minus26(mut self, value: i8) -> Self {
        self.0.pic_init_qp_minus26 = value;
        self
    }

    pub fn pic_init_qp(self, value: u8) -> Self {
        self.pic_init_qp_minus26(value as i8 - 26)
    }

    pub fn pic_init_qs_minus26(mut self, value: i8) -> Self {
        self.0.pic_init_qs_minus26 = value;
        self
    }

    pub fn chroma_qp_index_offsets(mut self, first: i8, second: i8) -> Self {
        self.0.chroma_qp_index_offset = first;
        self.0.second_chroma_qp_index_offset = second;
        self
    }

    pub fn deblocking_filter_control_present_flag(mut self, value: bool) -> Self {
        self.0.deblocking_filter_control_present_flag = value;
        self
    }

    pub fn constrained_intra_pred_flag(mut self, value: bool) -> Self {
        self.0.constrained_intra_pred_flag = value;
        self
    }

    pub fn redundant_pic_cnt_present_flag(mut self, value: bool) -> Self {
        self.0.redundant_pic_cnt_present_flag = value;
        self
    }

    pub fn transform_8x8_mode_flag(mut self, value: bool) -> Self {
        self.0.transform_8x8_mode_flag = value;
        self
    }

    /// Sets picture-level scaling lists overriding the sequence ones.
    pub fn scaling_lists(
        mut self,
        lists_4x4: [[u8; 16]; 6],
        lists_8x8: [[u8; 64]; 6],
    ) -> Self {
        self.0.pic_scaling_matrix_present_flag = true;
        self.0.scaling_lists_4x4 = lists_4x4;
        self.0.scaling_lists_8x8 = lists_8x8;
        self
    }

    pub fn num_ref_idx_l0_default_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_l0_default_active_minus1 = value;
        self
    }

    pub fn num_ref_idx_l0_default_active(self, value: u8) -> Self {
        self.num_ref_idx_l0_default_active_minus1(value - 1)
    }

    pub fn num_ref_idx_l1_default_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_l1_default_active_minus1 = value;
        self
    }

    pub fn num_ref_idx_l1_default_active(self, value: u8) -> Self {
        self.num_ref_idx_l1_default_active_minus1(value - 1)
    }

    pub fn build(self) -> Rc<Pps> {
        Rc::new(self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    /// Specifies the address of the first macroblock in the slice.
    pub first_mb_in_slice: u32,

    /// Specifies the coding type of the slice according to Table 7-6.
    pub slice_type: SliceType,

    // Specifies the picture parameter set in use
    pub pic_parameter_set_id: u8,

    /// Used as an identifier for pictures and shall be represented by
    /// `log2_max_frame_num_minus4 + 4` bits in the bitstream.
    pub frame_num: u16,

    /// If set, specifies that the slice is a slice of a coded field. If not
    /// set, specifies that the slice is a slice of a coded frame.
    pub field_pic_flag: bool,

    /// If set, specifies that the slice is part of a coded bottom field. If not
    /// set, specifies that the picture is a coded top field.
    pub bottom_field_flag: bool,

    /// Identifies an IDR picture.
    pub idr_pic_id: u16,

    /// Specifies the picture order count modulo `MaxPicOrderCntLsb` for the top
    /// field of a coded frame or for a coded field.
    pub pic_order_cnt_lsb: u16,

    /// Whether `num_ref_idx_l0_active_minus1`/`num_ref_idx_l1_active_minus1` are present.
    pub num_ref_idx_active_override_flag: bool,

    /// Specifies the maximum reference index for reference picture list 0 that
    /// shall be used to decode the slice.
    pub num_ref_idx_l0_active_minus1: u8,

    /// Specifies the maximum reference index for reference picture list 1 that
    /// shall be used to decode the slice.
    pub num_ref_idx_l1_active_minus1: u8,

    /// Specifies the decoding process to be used to decode P macroblocks in an
    /// SP slice.
    pub sp_for_switch_flag: bool,

    /// Specifies the initial value of QP Y to be used for all the macroblocks
    /// in the slice.
    pub slice_qp_delta: i8,
}

impl SliceHeader {
    /// Returns the field that is coded by this header.
    pub fn field(&self) -> Field {
        if self.field_pic_flag {
            if self.bottom_field_flag {
                Field::Bottom
            } else {
                Field::Top
            }
        } else {
            Field::Frame
        }
    }
}

pub struct SliceHeaderBuilder(SliceHeader);

impl SliceHeaderBuilder {
    pub fn new(pps: &Pps) -> Self {
        SliceHeaderBuilder(SliceHeader {
            pic_parameter_set_id: pps.pic_parameter_set_id,
            num_ref_idx_l0_active_minus1: pps.num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_active_minus1: pps.num_ref_idx_l1_default_active_minus1,
            ..Default::default()
        })
    }

    pub fn slice_type(mut self, type_: SliceType) -> Self {
        self.0.slice_type = type_;
        self
    }

    pub fn first_mb_in_slice(mut self, value: u32) -> Self {
        self.0.first_mb_in_slice = value;
        self
    }

    pub fn frame_num(mut self, value: u16) -> Self {
        self.0.frame_num = value;
        self
    }

    /// Makes the slice part of a coded field.
    pub fn field(mut self, bottom: bool) -> Self {
        self.0.field_pic_flag = true;
        self.0.bottom_field_flag = bottom;
        self
    }

    pub fn pic_order_cnt_lsb(mut self, value: u16) -> Self {
        self.0.pic_order_cnt_lsb = value;
        self
    }

    pub fn idr_pic_id(mut self, value: u16) -> Self {
        self.0.idr_pic_id = value;
        self
    }

    pub fn sp_for_switch_flag(mut self, value: bool) -> Self {
        self.0.sp_for_switch_flag = value;
        self
    }

    pub fn num_ref_idx_l0_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_active_override_flag = true;
        self.0.num_ref_idx_l0_active_minus1 = value;
        self
    }

    pub fn num_ref_idx_l1_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_active_override_flag = true;
        self.0.num_ref_idx_l1_active_minus1 = value;
        self
    }

    pub fn build(self) -> SliceHeader {
        self.0
    }
}

/// A H264 slice. An integer number of macroblocks or macroblock pairs ordered
/// consecutively in the raster scan within a particular slice group
pub struct Slice<'a> {
    /// The slice header.
    pub header: SliceHeader,
    /// The NAL unit carrying this slice, header byte included and start code excluded.
    pub nalu: &'a [u8],
}

/// Error returned when a slice header cannot be tied to its parameter sets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterSetError {
    #[error("no PPS with id {0}")]
    MissingPps(u8),
    #[error("PPS {pps_id} refers to missing SPS {sps_id}")]
    MissingSps { pps_id: u8, sps_id: u8 },
}

/// The parameter sets received so far, indexed by their ids.
///
/// A newer set with the same id replaces the previous one.
#[derive(Debug, Default)]
pub struct ParameterSets {
    active_spses: BTreeMap<u8, Rc<Sps>>,
    active_ppses: BTreeMap<u8, Rc<Pps>>,
}

impl ParameterSets {
    pub fn add_sps(&mut self, sps: Rc<Sps>) {
        self.active_spses.insert(sps.seq_parameter_set_id, sps);
    }

    pub fn add_pps(&mut self, pps: Rc<Pps>) {
        self.active_ppses.insert(pps.pic_parameter_set_id, pps);
    }

    pub fn get_sps(&self, sps_id: u8) -> Option<&Rc<Sps>> {
        self.active_spses.get(&sps_id)
    }

    pub fn get_pps(&self, pps_id: u8) -> Option<&Rc<Pps>> {
        self.active_ppses.get(&pps_id)
    }

    /// Returns the PPS referenced by `hdr` and the SPS that PPS refers to.
    pub fn resolve(&self, hdr: &SliceHeader) -> Result<(&Rc<Sps>, &Rc<Pps>), ParameterSetError> {
        let pps = self
            .get_pps(hdr.pic_parameter_set_id)
            .ok_or(ParameterSetError::MissingPps(hdr.pic_parameter_set_id))?;

        let sps = self
            .get_sps(pps.seq_parameter_set_id)
            .ok_or(ParameterSetError::MissingSps {
                pps_id: pps.pic_parameter_set_id,
                sps_id: pps.seq_parameter_set_id,
            })?;

        Ok((sps, pps))
    }
}
