// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! DXVA H.264 buffer layouts.
//!
//! These mirror `DXVA_PicParams_H264`, `DXVA_Qmatrix_H264` and `DXVA_Slice_H264_Short` from
//! `dxva.h`. The structures there are packed and little-endian, so each record is serialized
//! field by field at its fixed offset rather than relying on Rust layout.

use byteorder::ByteOrder;
use byteorder::LittleEndian;
use enumn::N;

/// `DXVA_PicEntry_H264`: a 7-bit surface index plus a one bit flag whose meaning depends on the
/// field it is used in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PicEntry(u8);

impl PicEntry {
    /// Entry used for unused slots.
    pub const INVALID: PicEntry = PicEntry(0xff);

    pub fn new(index: u8, associated_flag: bool) -> Self {
        PicEntry((index & 0x7f) | (u8::from(associated_flag) << 7))
    }

    pub fn index(&self) -> u8 {
        self.0 & 0x7f
    }

    pub fn associated_flag(&self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

impl Default for PicEntry {
    fn default() -> Self {
        Self::INVALID
    }
}

/// The bit fields packed in `wBitFields`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PicParamsBitFields {
    pub field_pic_flag: bool,
    pub mbaff_frame_flag: bool,
    pub residual_colour_transform_flag: bool,
    pub sp_for_switch_flag: bool,
    /// 2 bits.
    pub chroma_format_idc: u8,
    pub ref_pic_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub weighted_pred_flag: bool,
    /// 2 bits.
    pub weighted_bipred_idc: u8,
    pub mbs_consecutive_flag: bool,
    pub frame_mbs_only_flag: bool,
    pub transform_8x8_mode_flag: bool,
    pub min_luma_bipred_size8x8_flag: bool,
    pub intra_pic_flag: bool,
}

impl PicParamsBitFields {
    pub fn bits(&self) -> u16 {
        u16::from(self.field_pic_flag)
            | u16::from(self.mbaff_frame_flag) << 1
            | u16::from(self.residual_colour_transform_flag) << 2
            | u16::from(self.sp_for_switch_flag) << 3
            | u16::from(self.chroma_format_idc & 0x3) << 4
            | u16::from(self.ref_pic_flag) << 6
            | u16::from(self.constrained_intra_pred_flag) << 7
            | u16::from(self.weighted_pred_flag) << 8
            | u16::from(self.weighted_bipred_idc & 0x3) << 9
            | u16::from(self.mbs_consecutive_flag) << 11
            | u16::from(self.frame_mbs_only_flag) << 12
            | u16::from(self.transform_8x8_mode_flag) << 13
            | u16::from(self.min_luma_bipred_size8x8_flag) << 14
            | u16::from(self.intra_pic_flag) << 15
    }
}

/// `DXVA_PicParams_H264`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PicParamsH264 {
    pub frame_width_in_mbs_minus1: u16,
    pub frame_height_in_mbs_minus1: u16,
    pub curr_pic: PicEntry,
    pub num_ref_frames: u8,
    pub bit_fields: PicParamsBitFields,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub reserved_16_bits: u16,
    pub status_report_feedback_number: u32,
    pub ref_frame_list: [PicEntry; 16],
    pub curr_field_order_cnt: [i32; 2],
    pub field_order_cnt_list: [[i32; 2]; 16],
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub second_chroma_qp_index_offset: i8,
    pub continuation_flag: u8,
    pub pic_init_qp_minus26: i8,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub reserved_8_bits_a: u8,
    pub frame_num_list: [u16; 16],
    pub used_for_reference_flags: u32,
    pub non_existing_frame_flags: u16,
    pub frame_num: u16,
    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub delta_pic_order_always_zero_flag: u8,
    pub direct_8x8_inference_flag: u8,
    pub entropy_coding_mode_flag: u8,
    pub pic_order_present_flag: u8,
    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    pub deblocking_filter_control_present_flag: u8,
    pub redundant_pic_cnt_present_flag: u8,
    pub reserved_8_bits_b: u8,
    pub slice_group_change_rate_minus1: u16,
    pub slice_group_map: [u8; 810],
}

impl Default for PicParamsH264 {
    fn default() -> Self {
        Self {
            frame_width_in_mbs_minus1: 0,
            frame_height_in_mbs_minus1: 0,
            curr_pic: PicEntry(0),
            num_ref_frames: 0,
            bit_fields: Default::default(),
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            reserved_16_bits: 0,
            status_report_feedback_number: 0,
            ref_frame_list: [PicEntry::INVALID; 16],
            curr_field_order_cnt: [0; 2],
            field_order_cnt_list: [[0; 2]; 16],
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            second_chroma_qp_index_offset: 0,
            continuation_flag: 0,
            pic_init_qp_minus26: 0,
            num_ref_idx_l0_active_minus1: 0,
            num_ref_idx_l1_active_minus1: 0,
            reserved_8_bits_a: 0,
            frame_num_list: [0; 16],
            used_for_reference_flags: 0,
            non_existing_frame_flags: 0,
            frame_num: 0,
            log2_max_frame_num_minus4: 0,
            pic_order_cnt_type: 0,
            log2_max_pic_order_cnt_lsb_minus4: 0,
            delta_pic_order_always_zero_flag: 0,
            direct_8x8_inference_flag: 0,
            entropy_coding_mode_flag: 0,
            pic_order_present_flag: 0,
            num_slice_groups_minus1: 0,
            slice_group_map_type: 0,
            deblocking_filter_control_present_flag: 0,
            redundant_pic_cnt_present_flag: 0,
            reserved_8_bits_b: 0,
            slice_group_change_rate_minus1: 0,
            slice_group_map: [0; 810],
        }
    }
}

impl PicParamsH264 {
    /// `sizeof(DXVA_PicParams_H264)`.
    pub const SIZE: usize = 1040;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        LittleEndian::write_u16(&mut buf[0..], self.frame_width_in_mbs_minus1);
        LittleEndian::write_u16(&mut buf[2..], self.frame_height_in_mbs_minus1);
        buf[4] = self.curr_pic.bits();
        buf[5] = self.num_ref_frames;
        LittleEndian::write_u16(&mut buf[6..], self.bit_fields.bits());
        buf[8] = self.bit_depth_luma_minus8;
        buf[9] = self.bit_depth_chroma_minus8;
        LittleEndian::write_u16(&mut buf[10..], self.reserved_16_bits);
        LittleEndian::write_u32(&mut buf[12..], self.status_report_feedback_number);

        for (dst, entry) in buf[16..32].iter_mut().zip(self.ref_frame_list.iter()) {
            *dst = entry.bits();
        }

        LittleEndian::write_i32_into(&self.curr_field_order_cnt, &mut buf[32..40]);
        for (i, cnts) in self.field_order_cnt_list.iter().enumerate() {
            let offset = 40 + i * 8;
            LittleEndian::write_i32_into(cnts, &mut buf[offset..offset + 8]);
        }

        buf[168] = self.pic_init_qs_minus26 as u8;
        buf[169] = self.chroma_qp_index_offset as u8;
        buf[170] = self.second_chroma_qp_index_offset as u8;
        buf[171] = self.continuation_flag;
        buf[172] = self.pic_init_qp_minus26 as u8;
        buf[173] = self.num_ref_idx_l0_active_minus1;
        buf[174] = self.num_ref_idx_l1_active_minus1;
        buf[175] = self.reserved_8_bits_a;

        LittleEndian::write_u16_into(&self.frame_num_list, &mut buf[176..208]);
        LittleEndian::write_u32(&mut buf[208..], self.used_for_reference_flags);
        LittleEndian::write_u16(&mut buf[212..], self.non_existing_frame_flags);
        LittleEndian::write_u16(&mut buf[214..], self.frame_num);

        buf[216] = self.log2_max_frame_num_minus4;
        buf[217] = self.pic_order_cnt_type;
        buf[218] = self.log2_max_pic_order_cnt_lsb_minus4;
        buf[219] = self.delta_pic_order_always_zero_flag;
        buf[220] = self.direct_8x8_inference_flag;
        buf[221] = self.entropy_coding_mode_flag;
        buf[222] = self.pic_order_present_flag;
        buf[223] = self.num_slice_groups_minus1;
        buf[224] = self.slice_group_map_type;
        buf[225] = self.deblocking_filter_control_present_flag;
        buf[226] = self.redundant_pic_cnt_present_flag;
        buf[227] = self.reserved_8_bits_b;
        LittleEndian::write_u16(&mut buf[228..], self.slice_group_change_rate_minus1);
        buf[230..].copy_from_slice(&self.slice_group_map);

        buf
    }
}

/// `DXVA_Qmatrix_H264`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QmatrixH264 {
    pub scaling_lists_4x4: [[u8; 16]; 6],
    pub scaling_lists_8x8: [[u8; 64]; 2],
}

impl QmatrixH264 {
    /// `sizeof(DXVA_Qmatrix_H264)`.
    pub const SIZE: usize = 6 * 16 + 2 * 64;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let (lists_4x4, lists_8x8) = buf.split_at_mut(6 * 16);

        for (dst, list) in lists_4x4.chunks_exact_mut(16).zip(&self.scaling_lists_4x4) {
            dst.copy_from_slice(list);
        }
        for (dst, list) in lists_8x8.chunks_exact_mut(64).zip(&self.scaling_lists_8x8) {
            dst.copy_from_slice(list);
        }

        buf
    }
}

/// The `wBadSliceChopping` values, telling whether a bitstream chunk holds the start and/or the
/// end of its slice.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum SliceChopping {
    /// The whole slice is in the buffer.
    Whole = 0,
    /// The start of the slice is in the buffer, its end is in a later one.
    Start = 1,
    /// The end of the slice is in the buffer, its start was in an earlier one.
    End = 2,
    /// Neither the start nor the end of the slice are in the buffer.
    Middle = 3,
}

impl SliceChopping {
    pub fn new(is_first: bool, is_last: bool) -> Self {
        match (is_first, is_last) {
            (true, true) => SliceChopping::Whole,
            (true, false) => SliceChopping::Start,
            (false, true) => SliceChopping::End,
            (false, false) => SliceChopping::Middle,
        }
    }
}

/// `DXVA_Slice_H264_Short`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceH264Short {
    /// Offset of the chunk in the bitstream buffer.
    pub bs_nal_unit_data_location: u32,
    pub slice_bytes_in_buffer: u32,
    pub bad_slice_chopping: SliceChopping,
}

impl SliceH264Short {
    /// `sizeof(DXVA_Slice_H264_Short)`.
    pub const SIZE: usize = 10;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];

        LittleEndian::write_u32(&mut buf[0..], self.bs_nal_unit_data_location);
        LittleEndian::write_u32(&mut buf[4..], self.slice_bytes_in_buffer);
        LittleEndian::write_u16(&mut buf[8..], self.bad_slice_chopping as u16);

        buf
    }

    /// Parses a record back, mostly useful to inspect submitted buffers.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            bs_nal_unit_data_location: LittleEndian::read_u32(&buf[0..]),
            slice_bytes_in_buffer: LittleEndian::read_u32(&buf[4..]),
            bad_slice_chopping: SliceChopping::n(LittleEndian::read_u16(&buf[8..]))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pic_entry_bits() {
        let entry = PicEntry::new(5, true);
        assert_eq!(entry.bits(), 0x85);
        assert_eq!(entry.index(), 5);
        assert!(entry.associated_flag());
        assert!(PicEntry::default().is_invalid());
        assert!(!PicEntry::new(0x7f, false).is_invalid());
    }

    #[test]
    fn bit_fields_positions() {
        let fields = PicParamsBitFields {
            field_pic_flag: true,
            chroma_format_idc: 1,
            weighted_bipred_idc: 2,
            mbs_consecutive_flag: true,
            intra_pic_flag: true,
            ..Default::default()
        };

        assert_eq!(fields.bits(), 0x0001 | 0x0010 | 0x0400 | 0x0800 | 0x8000);
    }

    #[test]
    fn pic_params_layout() {
        let mut params = PicParamsH264 {
            frame_width_in_mbs_minus1: 0x0102,
            curr_pic: PicEntry::new(3, false),
            reserved_16_bits: 3,
            status_report_feedback_number: 1,
            curr_field_order_cnt: [-2, 7],
            continuation_flag: 1,
            pic_init_qp_minus26: -3,
            used_for_reference_flags: 0x0c33,
            frame_num: 0xbeef,
            reserved_8_bits_b: 0,
            slice_group_change_rate_minus1: 0x1234,
            ..Default::default()
        };
        params.ref_frame_list[1] = PicEntry::new(9, true);
        params.field_order_cnt_list[15] = [100, 101];
        params.frame_num_list[15] = 0x4321;
        params.slice_group_map[809] = 0xaa;

        let buf = params.to_bytes();

        assert_eq!(buf.len(), 1040);
        assert_eq!(&buf[0..2], &[0x02, 0x01]);
        assert_eq!(buf[4], 3);
        assert_eq!(LittleEndian::read_u16(&buf[10..]), 3);
        assert_eq!(LittleEndian::read_u32(&buf[12..]), 1);
        assert_eq!(buf[16], 0xff);
        assert_eq!(buf[17], 0x89);
        assert_eq!(LittleEndian::read_i32(&buf[32..]), -2);
        assert_eq!(LittleEndian::read_i32(&buf[36..]), 7);
        assert_eq!(LittleEndian::read_i32(&buf[160..]), 100);
        assert_eq!(LittleEndian::read_i32(&buf[164..]), 101);
        assert_eq!(buf[171], 1);
        assert_eq!(buf[172], 0xfd);
        assert_eq!(LittleEndian::read_u16(&buf[206..]), 0x4321);
        assert_eq!(LittleEndian::read_u32(&buf[208..]), 0x0c33);
        assert_eq!(LittleEndian::read_u16(&buf[214..]), 0xbeef);
        assert_eq!(LittleEndian::read_u16(&buf[228..]), 0x1234);
        assert_eq!(buf[1039], 0xaa);
    }

    #[test]
    fn qmatrix_layout() {
        let mut matrix = QmatrixH264 {
            scaling_lists_4x4: [[16; 16]; 6],
            scaling_lists_8x8: [[16; 64]; 2],
        };
        matrix.scaling_lists_4x4[5][15] = 1;
        matrix.scaling_lists_8x8[1][0] = 2;

        let buf = matrix.to_bytes();
        assert_eq!(buf.len(), 224);
        assert_eq!(buf[95], 1);
        assert_eq!(buf[96 + 64], 2);
    }

    #[test]
    fn slice_short_layout() {
        let slice = SliceH264Short {
            bs_nal_unit_data_location: 6,
            slice_bytes_in_buffer: 0x01020304,
            bad_slice_chopping: SliceChopping::End,
        };

        let buf = slice.to_bytes();
        assert_eq!(buf, [6, 0, 0, 0, 4, 3, 2, 1, 2, 0]);
        assert_eq!(SliceH264Short::from_bytes(&buf), Some(slice));
    }

    #[test]
    fn chopping_codes() {
        assert_eq!(SliceChopping::new(true, true) as u16, 0);
        assert_eq!(SliceChopping::new(true, false) as u16, 1);
        assert_eq!(SliceChopping::new(false, true) as u16, 2);
        assert_eq!(SliceChopping::new(false, false) as u16, 3);
    }
}
