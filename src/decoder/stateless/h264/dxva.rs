// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Translation of the H.264 decoding state into DXVA records.

use log::trace;

use crate::backend::dxva::PicEntry;
use crate::backend::dxva::PicParamsH264;
use crate::backend::dxva::QmatrixH264;
use crate::codec::h264::dpb::Dpb;
use crate::codec::h264::parser::Level;
use crate::codec::h264::parser::Pps;
use crate::codec::h264::parser::SliceHeader;
use crate::codec::h264::parser::Sps;
use crate::codec::h264::picture::PictureData;
use crate::device::OutputView;

/// Number of entries of the reference frame table.
pub const NUM_REF_FRAMES: usize = 16;

/// Value set in `UsedForReferenceFlags` for each reference frame: both fields are used.
const USED_FOR_REFERENCE: u32 = 0b11;

/// The reference frame part of `DXVA_PicParams_H264`, rebuilt from the DPB for every picture.
///
/// Slot `i` describes the `i`-th member of the DPB, so pictures that are not used for reference
/// leave an invalid slot behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefFrameTable {
    pub ref_frame_list: [PicEntry; NUM_REF_FRAMES],
    pub field_order_cnt_list: [[i32; 2]; NUM_REF_FRAMES],
    pub frame_num_list: [u16; NUM_REF_FRAMES],
    pub used_for_reference_flags: u32,
    pub non_existing_frame_flags: u16,
}

impl Default for RefFrameTable {
    fn default() -> Self {
        Self {
            ref_frame_list: [PicEntry::INVALID; NUM_REF_FRAMES],
            field_order_cnt_list: Default::default(),
            frame_num_list: Default::default(),
            used_for_reference_flags: 0,
            non_existing_frame_flags: 0,
        }
    }
}

impl RefFrameTable {
    /// Builds the table for a picture decoded by the device instance of `generation`. Views
    /// handed out by another instance are treated as missing.
    pub fn build(dpb: &Dpb<OutputView>, generation: u32) -> Self {
        let mut table = Self::default();

        for (i, entry) in dpb.entries().take(NUM_REF_FRAMES).enumerate() {
            let pic = entry.pic;
            if !pic.is_ref() {
                continue;
            }

            let long_term = pic.is_long_term_ref();
            table.ref_frame_list[i] = match entry.handle {
                Some(view) if view.generation() == generation => {
                    PicEntry::new(view.view_id(), long_term)
                }
                Some(_) => {
                    trace!(
                        "Reference picture {:?} belongs to a previous device instance",
                        entry.id
                    );
                    PicEntry::INVALID
                }
                None => {
                    trace!("Reference picture {:?} has no output view", entry.id);
                    PicEntry::INVALID
                }
            };

            table.field_order_cnt_list[i] = [pic.top_field_order_cnt, pic.bottom_field_order_cnt];
            table.frame_num_list[i] = if long_term {
                pic.long_term_pic_num as u16
            } else {
                pic.frame_num as u16
            };

            table.used_for_reference_flags |= USED_FOR_REFERENCE << (2 * i);
            table.non_existing_frame_flags |= u16::from(pic.nonexisting) << i;
        }

        table
    }

    /// Number of slots pointing to an output view.
    pub fn num_valid_entries(&self) -> usize {
        self.ref_frame_list
            .iter()
            .filter(|entry| !entry.is_invalid())
            .count()
    }
}

fn fill_from_sps(params: &mut PicParamsH264, sps: &Sps, field_pic_flag: bool) {
    params.frame_width_in_mbs_minus1 = sps.pic_width_in_mbs_minus1;
    params.frame_height_in_mbs_minus1 = sps.frame_height_in_mbs_minus1();
    params.num_ref_frames = sps.max_num_ref_frames;

    params.bit_fields.residual_colour_transform_flag = sps.separate_colour_plane_flag;
    params.bit_fields.mbaff_frame_flag = sps.mb_adaptive_frame_field_flag && field_pic_flag;
    params.bit_fields.field_pic_flag = field_pic_flag;
    params.bit_fields.chroma_format_idc = sps.chroma_format_idc;
    params.bit_fields.frame_mbs_only_flag = sps.frame_mbs_only_flag;
    // See A.3.3.2.
    params.bit_fields.min_luma_bipred_size8x8_flag = sps.level_idc >= Level::L3_1;

    params.bit_depth_luma_minus8 = sps.bit_depth_luma_minus8;
    params.bit_depth_chroma_minus8 = sps.bit_depth_chroma_minus8;

    params.log2_max_frame_num_minus4 = sps.log2_max_frame_num_minus4;
    params.pic_order_cnt_type = sps.pic_order_cnt_type;
    params.log2_max_pic_order_cnt_lsb_minus4 = sps.log2_max_pic_order_cnt_lsb_minus4;
    params.delta_pic_order_always_zero_flag = u8::from(sps.delta_pic_order_always_zero_flag);
    params.direct_8x8_inference_flag = u8::from(sps.direct_8x8_inference_flag);
}

fn fill_from_pps(params: &mut PicParamsH264, pps: &Pps) {
    params.bit_fields.constrained_intra_pred_flag = pps.constrained_intra_pred_flag;
    params.bit_fields.weighted_pred_flag = pps.weighted_pred_flag;
    params.bit_fields.weighted_bipred_idc = pps.weighted_bipred_idc;
    params.bit_fields.transform_8x8_mode_flag = pps.transform_8x8_mode_flag;

    params.pic_init_qs_minus26 = pps.pic_init_qs_minus26;
    params.chroma_qp_index_offset = pps.chroma_qp_index_offset;
    params.second_chroma_qp_index_offset = pps.second_chroma_qp_index_offset;
    params.pic_init_qp_minus26 = pps.pic_init_qp_minus26;
    params.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
    params.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;

    params.entropy_coding_mode_flag = u8::from(pps.entropy_coding_mode_flag);
    params.pic_order_present_flag = u8::from(pps.bottom_field_pic_order_in_frame_present_flag);
    params.deblocking_filter_control_present_flag =
        u8::from(pps.deblocking_filter_control_present_flag);
    params.redundant_pic_cnt_present_flag = u8::from(pps.redundant_pic_cnt_present_flag);
    params.num_slice_groups_minus1 = pps.num_slice_groups_minus1 as u8;
    params.slice_group_map_type = pps.slice_group_map_type;
}

fn fill_from_slice_header(params: &mut PicParamsH264, hdr: &SliceHeader) {
    params.bit_fields.sp_for_switch_flag = hdr.sp_for_switch_flag;
    params.bit_fields.field_pic_flag = hdr.field_pic_flag;
    params.bit_fields.intra_pic_flag = hdr.slice_type.is_i() || hdr.slice_type.is_si();
    params.curr_pic = PicEntry::new(params.curr_pic.index(), hdr.bottom_field_flag);
}

/// Builds the picture parameters of the slice described by `hdr`, belonging to `picture` which
/// decodes into `view`.
pub fn build_pic_params(
    hdr: &SliceHeader,
    sps: &Sps,
    pps: &Pps,
    picture: &PictureData,
    view: OutputView,
    ref_frames: &RefFrameTable,
) -> PicParamsH264 {
    let mut params = PicParamsH264 {
        curr_pic: PicEntry::new(view.view_id(), false),
        reserved_16_bits: 3,
        status_report_feedback_number: 1,
        continuation_flag: 1,
        reserved_8_bits_a: 0,
        reserved_8_bits_b: 0,
        ..Default::default()
    };
    params.bit_fields.mbs_consecutive_flag = true;

    fill_from_sps(&mut params, sps, hdr.field_pic_flag);
    fill_from_pps(&mut params, pps);
    fill_from_slice_header(&mut params, hdr);

    params.bit_fields.ref_pic_flag = picture.is_ref();
    params.frame_num = picture.frame_num as u16;
    params.curr_field_order_cnt = match (hdr.field_pic_flag, hdr.bottom_field_flag) {
        (false, _) => [picture.top_field_order_cnt, picture.bottom_field_order_cnt],
        (true, false) => [picture.top_field_order_cnt, 0],
        (true, true) => [0, picture.bottom_field_order_cnt],
    };

    params.ref_frame_list = ref_frames.ref_frame_list;
    params.field_order_cnt_list = ref_frames.field_order_cnt_list;
    params.frame_num_list = ref_frames.frame_num_list;
    params.used_for_reference_flags = ref_frames.used_for_reference_flags;
    params.non_existing_frame_flags = ref_frames.non_existing_frame_flags;

    params
}

/// Builds the inverse quantization matrix from the picture scaling lists if the PPS transmits
/// some, or from the sequence ones otherwise.
///
/// Lists are passed in the order they are stored in the parameter sets.
pub fn build_iq_matrix(sps: &Sps, pps: &Pps) -> QmatrixH264 {
    let (lists_4x4, lists_8x8) = if pps.pic_scaling_matrix_present_flag {
        (&pps.scaling_lists_4x4, &pps.scaling_lists_8x8)
    } else {
        (&sps.scaling_lists_4x4, &sps.scaling_lists_8x8)
    };

    QmatrixH264 {
        scaling_lists_4x4: *lists_4x4,
        scaling_lists_8x8: [lists_8x8[0], lists_8x8[1]],
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::codec::h264::dpb::PicId;
    use crate::codec::h264::parser::PpsBuilder;
    use crate::codec::h264::parser::SliceHeaderBuilder;
    use crate::codec::h264::parser::SliceType;
    use crate::codec::h264::parser::SpsBuilder;
    use crate::codec::h264::picture::Reference;

    fn add_picture(
        dpb: &mut Dpb<OutputView>,
        frame_num: i32,
        reference: Reference,
        view_id: Option<u8>,
    ) -> PicId {
        let mut pic = PictureData::default();
        pic.frame_num = frame_num;
        pic.long_term_pic_num = 100 + frame_num;
        pic.top_field_order_cnt = 2 * frame_num;
        pic.bottom_field_order_cnt = 2 * frame_num + 1;
        pic.set_reference(reference);

        let id = dpb.new_picture(pic);
        if let Some(view) = view_id.and_then(OutputView::new) {
            dpb.set_handle(id, view).unwrap();
        }
        dpb.store_picture(id).unwrap();
        id
    }

    #[test]
    fn ref_table_slots_follow_dpb_order() {
        let mut dpb = Dpb::default();
        add_picture(&mut dpb, 0, Reference::ShortTerm, Some(3));
        add_picture(&mut dpb, 1, Reference::None, Some(4));
        add_picture(&mut dpb, 2, Reference::ShortTerm, Some(5));
        add_picture(&mut dpb, 3, Reference::None, Some(6));
        add_picture(&mut dpb, 4, Reference::None, Some(7));
        add_picture(&mut dpb, 5, Reference::LongTerm, Some(8));

        let table = RefFrameTable::build(&dpb, 0);

        assert_eq!(table.used_for_reference_flags, 0b1100_0011_0011);
        for bit in 0..32 {
            let set = table.used_for_reference_flags & (1 << bit) != 0;
            assert_eq!(set, [0, 1, 4, 5, 10, 11].contains(&bit));
        }
        assert_eq!(table.non_existing_frame_flags, 0);

        assert_eq!(table.ref_frame_list[0], PicEntry::new(3, false));
        assert!(table.ref_frame_list[1].is_invalid());
        assert_eq!(table.ref_frame_list[2], PicEntry::new(5, false));
        assert_eq!(table.ref_frame_list[5], PicEntry::new(8, true));
        assert_eq!(table.num_valid_entries(), dpb.num_ref_frames());

        assert_eq!(table.field_order_cnt_list[2], [4, 5]);
        assert_eq!(table.field_order_cnt_list[1], [0, 0]);
        assert_eq!(table.frame_num_list[2], 2);
        // Long-term references carry their long-term picture number.
        assert_eq!(table.frame_num_list[5], 105);
    }

    #[test]
    fn ref_table_non_existing_frames() {
        let mut dpb = Dpb::default();
        add_picture(&mut dpb, 0, Reference::ShortTerm, Some(0));
        add_picture(&mut dpb, 1, Reference::None, Some(1));
        add_picture(&mut dpb, 2, Reference::ShortTerm, None);
        let gap = dpb.new_picture(PictureData::new_non_existing(3, 0));
        dpb.store_picture(gap).unwrap();

        let table = RefFrameTable::build(&dpb, 0);

        // The non-existing frame has no view either.
        assert_eq!(table.non_existing_frame_flags, 1 << 3);
        assert!(table.ref_frame_list[2].is_invalid());
        assert!(table.ref_frame_list[3].is_invalid());
        assert_eq!(table.used_for_reference_flags, 0b11 | 0b11 << 4 | 0b11 << 6);
        assert!(table.num_valid_entries() <= dpb.num_ref_frames());
    }

    #[test]
    fn ref_table_ignores_views_of_previous_instance() {
        let mut dpb = Dpb::default();
        add_picture(&mut dpb, 0, Reference::ShortTerm, Some(0));
        let reopened = add_picture(&mut dpb, 1, Reference::ShortTerm, None);
        dpb.set_handle(reopened, OutputView::new(0).unwrap().with_generation(1))
            .unwrap();

        let table = RefFrameTable::build(&dpb, 1);

        // The old picture keeps its slot but no longer points to a surface.
        assert!(table.ref_frame_list[0].is_invalid());
        assert_eq!(table.ref_frame_list[1], PicEntry::new(0, false));
        assert_eq!(table.used_for_reference_flags, 0b1111);
        assert_eq!(table.num_valid_entries(), 1);
    }

    #[test]
    fn ref_table_of_empty_dpb() {
        let table = RefFrameTable::build(&Dpb::default(), 0);
        assert_eq!(table, RefFrameTable::default());
        assert_eq!(table.num_valid_entries(), 0);
    }

    #[test]
    fn pic_params_fields() {
        let sps = SpsBuilder::new()
            .frame_mbs_only_flag(false)
            .resolution(720, 576)
            .mb_adaptive_frame_field_flag(true)
            .level_idc(Level::L3_1)
            .max_num_ref_frames(4)
            .log2_max_frame_num_minus4(2)
            .build();
        let pps = PpsBuilder::new(&sps)
            .entropy_coding_mode_flag(true)
            .bottom_field_pic_order_in_frame_present_flag(true)
            .weighted_bipred_idc(2)
            .pic_init_qp_minus26(-4)
            .chroma_qp_index_offsets(-2, 3)
            .num_ref_idx_l0_default_active(3)
            .slice_groups(1, 2)
            .build();
        let hdr = SliceHeaderBuilder::new(&pps)
            .slice_type(SliceType::Si)
            .field(true)
            .frame_num(9)
            .build();

        let mut picture = PictureData::new_from_slice(&hdr, 1, 0);
        picture.set_field_order_cnts(10, 11);
        let view = OutputView::new(6).unwrap();

        let params = build_pic_params(
            &hdr,
            &sps,
            &pps,
            &picture,
            view,
            &RefFrameTable::default(),
        );

        assert_eq!(params.frame_width_in_mbs_minus1, 44);
        assert_eq!(params.frame_height_in_mbs_minus1, 35);
        assert_eq!(params.num_ref_frames, 4);
        assert_eq!(params.curr_pic, PicEntry::new(6, true));
        assert!(params.bit_fields.field_pic_flag);
        assert!(params.bit_fields.mbaff_frame_flag);
        assert!(params.bit_fields.min_luma_bipred_size8x8_flag);
        assert!(params.bit_fields.intra_pic_flag);
        assert!(params.bit_fields.ref_pic_flag);
        assert!(params.bit_fields.mbs_consecutive_flag);
        assert!(!params.bit_fields.frame_mbs_only_flag);
        assert_eq!(params.bit_fields.weighted_bipred_idc, 2);
        assert_eq!(params.bit_fields.chroma_format_idc, 1);

        assert_eq!(params.reserved_16_bits, 3);
        assert_eq!(params.status_report_feedback_number, 1);
        assert_eq!(params.continuation_flag, 1);

        assert_eq!(params.pic_init_qp_minus26, -4);
        assert_eq!(params.chroma_qp_index_offset, -2);
        assert_eq!(params.second_chroma_qp_index_offset, 3);
        assert_eq!(params.num_ref_idx_l0_active_minus1, 2);
        assert_eq!(params.entropy_coding_mode_flag, 1);
        assert_eq!(params.pic_order_present_flag, 1);
        assert_eq!(params.num_slice_groups_minus1, 1);
        assert_eq!(params.slice_group_map_type, 2);
        assert_eq!(params.log2_max_frame_num_minus4, 2);

        assert_eq!(params.frame_num, 9);
        // Bottom field: only the bottom count is set.
        assert_eq!(params.curr_field_order_cnt, [0, 11]);
        assert!(params.ref_frame_list.iter().all(PicEntry::is_invalid));
    }

    #[test]
    fn curr_field_order_cnt_selection() {
        let sps = SpsBuilder::new().frame_mbs_only_flag(false).build();
        let pps = PpsBuilder::new(&sps).build();
        let view = OutputView::new(0).unwrap();
        let refs = RefFrameTable::default();

        let frame_hdr = SliceHeaderBuilder::new(&pps).build();
        let top_hdr = SliceHeaderBuilder::new(&pps).field(false).build();

        let mut picture = PictureData::new_from_slice(&frame_hdr, 0, 0);
        picture.set_field_order_cnts(4, 6);

        let frame = build_pic_params(&frame_hdr, &sps, &pps, &picture, view, &refs);
        assert_eq!(frame.curr_field_order_cnt, [4, 6]);
        assert!(!frame.bit_fields.ref_pic_flag);
        // MBAFF requires a field picture.
        assert!(!frame.bit_fields.mbaff_frame_flag);

        let top = build_pic_params(&top_hdr, &sps, &pps, &picture, view, &refs);
        assert_eq!(top.curr_field_order_cnt, [4, 0]);
        assert!(!top.curr_pic.associated_flag());
    }

    #[test]
    fn pic_params_are_reproducible() {
        let sps = SpsBuilder::new().resolution(1920, 1080).build();
        let pps = PpsBuilder::new(&sps).transform_8x8_mode_flag(true).build();
        let hdr = SliceHeaderBuilder::new(&pps).slice_type(SliceType::B).build();

        let mut dpb = Dpb::default();
        add_picture(&mut dpb, 0, Reference::ShortTerm, Some(1));
        add_picture(&mut dpb, 1, Reference::LongTerm, Some(2));
        let refs = RefFrameTable::build(&dpb, 0);
        let picture = PictureData::new_from_slice(&hdr, 1, 0);
        let view = OutputView::new(3).unwrap();

        let first = build_pic_params(&hdr, &sps, &pps, &picture, view, &refs);
        let second = build_pic_params(&hdr, &sps, &pps, &picture, view, &RefFrameTable::build(&dpb, 0));

        assert_eq!(first, second);
        assert_eq!(first.to_bytes(), second.to_bytes());
        assert_eq!(first.used_for_reference_flags, 0b1111);
    }

    #[test]
    fn iq_matrix_falls_back_to_sps_lists() {
        let mut lists_4x4 = [[16; 16]; 6];
        let mut lists_8x8 = [[16; 64]; 6];
        lists_4x4[2][0] = 6;
        lists_8x8[1][63] = 42;

        let sps = SpsBuilder::new().scaling_lists(lists_4x4, lists_8x8).build();

        // A PPS that does not transmit its own lists, but whose storage differs.
        let pps = PpsBuilder::new(&sps).build();
        let pps = Rc::new(Pps {
            scaling_lists_4x4: [[1; 16]; 6],
            scaling_lists_8x8: [[1; 64]; 6],
            ..(*pps).clone()
        });
        assert!(!pps.pic_scaling_matrix_present_flag);

        let expected = QmatrixH264 {
            scaling_lists_4x4: lists_4x4,
            scaling_lists_8x8: [lists_8x8[0], lists_8x8[1]],
        };
        assert_eq!(build_iq_matrix(&sps, &pps), expected);
        assert_eq!(build_iq_matrix(&sps, &pps).to_bytes()[223], 42);
    }

    #[test]
    fn iq_matrix_uses_pps_lists() {
        let sps = SpsBuilder::new().build();
        let pps = PpsBuilder::new(&sps)
            .scaling_lists([[7; 16]; 6], [[9; 64]; 6])
            .build();

        let matrix = build_iq_matrix(&sps, &pps);
        assert_eq!(matrix.scaling_lists_4x4, [[7; 16]; 6]);
        assert_eq!(matrix.scaling_lists_8x8, [[9; 64]; 2]);
    }
}
