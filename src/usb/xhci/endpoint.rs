//! xHCI endpoint transfer-ring TRB construction (spec §4.5 "Control
//! transfer", "Bulk and interrupt transfers", "Isochronous transfers").
//!
//! Grounded on `original_source/lib/usb/xhciendpoint.cpp`'s three
//! transfer-building paths (`Transfer` for control/bulk/interrupt,
//! the isochronous packet loop); kept as pure TRB-building functions so
//! the shape of each transfer type is testable without a ring or
//! controller.

use crate::usb::core::{Direction, SetupData};

use super::trb::{control_bits, Trb, TrbType};

/// spec §4.5: "SETUP-STAGE TRB with the setup packet immediate-data
/// encoding and a transfer-type field (NODATA, OUT, IN)".
pub fn build_setup_stage_trb(setup: SetupData, data_direction: Option<Direction>) -> Trb {
    let trt = match data_direction {
        None => control_bits::TRT_NO_DATA,
        Some(Direction::Out) => control_bits::TRT_OUT,
        Some(Direction::In) => control_bits::TRT_IN,
    };
    let parameter = (setup.bm_request_type as u64)
        | (setup.b_request as u64) << 8
        | (setup.w_value as u64) << 16
        | (setup.w_index as u64) << 32
        | (setup.w_length as u64) << 48;
    Trb {
        parameter,
        status: 8, // setup packets are always 8 bytes
        control: TrbType::SetupStage.control_bits() | control_bits::IDT | trt,
    }
}

/// spec §4.5: "Optional DATA-STAGE TRB (direction bit set for IN)".
pub fn build_data_stage_trb(buffer_addr: u64, length: u32, direction: Direction) -> Trb {
    let dir_bit = if direction == Direction::In { control_bits::DIR_IN } else { 0 };
    Trb {
        parameter: buffer_addr,
        status: length,
        control: TrbType::DataStage.control_bits() | dir_bit,
    }
}

/// spec §4.5: "STATUS-STAGE TRB in the opposite direction,
/// interrupt-on-completion". `data_direction` is the direction the
/// (optional) data stage used; the status stage always runs opposite
/// to it, or IN when there was no data stage (per USB chapter 9).
pub fn build_status_stage_trb(data_direction: Option<Direction>) -> Trb {
    let status_direction = match data_direction {
        Some(Direction::In) => Direction::Out,
        Some(Direction::Out) | None => Direction::In,
    };
    let dir_bit = if status_direction == Direction::In { control_bits::DIR_IN } else { 0 };
    Trb {
        parameter: 0,
        status: 0,
        control: TrbType::StatusStage.control_bits() | control_bits::IOC | dir_bit,
    }
}

/// spec §4.5: "Bulk and interrupt transfers use a single NORMAL TRB
/// with IOC".
pub fn build_normal_trb(buffer_addr: u64, length: u32) -> Trb {
    Trb {
        parameter: buffer_addr,
        status: length,
        control: TrbType::Normal.control_bits() | control_bits::IOC,
    }
}

/// spec §4.5: "Isochronous transfers emit `n` ISOCH TRBs with the SIA
/// ... flag set and a TD-size field decreasing to zero on the last."
/// `td_size` is the number of *remaining* packets after this one in
/// the transfer descriptor (0 on the final packet), capped at the
/// field's 5-bit width.
pub fn build_isoch_trb(buffer_addr: u64, length: u32, td_size: u8) -> Trb {
    let td_size_bits = (td_size.min(31) as u32) << 17;
    Trb {
        parameter: buffer_addr,
        status: length | td_size_bits,
        control: TrbType::Isoch.control_bits() | control_bits::IOC | control_bits::SIA,
    }
}

/// Build the full ISOCH TRB sequence for an isochronous URB's
/// per-packet buffers, with `td_size` descending to `0` on the last
/// entry (spec §4.5).
pub fn build_isoch_trb_sequence(buffers: &[(u64, u32)]) -> alloc::vec::Vec<Trb> {
    let n = buffers.len();
    buffers
        .iter()
        .enumerate()
        .map(|(i, &(addr, len))| build_isoch_trb(addr, len, (n - 1 - i) as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::core::req_type;

    #[test]
    fn setup_stage_encodes_no_data_transfer_type() {
        let setup = SetupData {
            bm_request_type: req_type::STANDARD | req_type::DEVICE,
            b_request: 5,
            w_value: 0x42,
            w_index: 0,
            w_length: 0,
        };
        let trb = build_setup_stage_trb(setup, None);
        assert_eq!(trb.control & 0x3_0000, control_bits::TRT_NO_DATA);
        assert!(trb.control & control_bits::IDT != 0);
        assert_eq!(trb.status, 8);
    }

    #[test]
    fn status_stage_runs_opposite_to_data_stage_direction() {
        let out_data = build_status_stage_trb(Some(Direction::Out));
        assert!(out_data.control & control_bits::DIR_IN != 0, "OUT data -> IN status");

        let in_data = build_status_stage_trb(Some(Direction::In));
        assert_eq!(in_data.control & control_bits::DIR_IN, 0, "IN data -> OUT status");

        let no_data = build_status_stage_trb(None);
        assert!(no_data.control & control_bits::DIR_IN != 0, "no data stage -> IN status");
    }

    #[test]
    fn isoch_sequence_td_size_descends_to_zero_on_last() {
        let buffers = [(0x1000u64, 188u32), (0x2000, 188), (0x3000, 100)];
        let trbs = build_isoch_trb_sequence(&buffers);
        assert_eq!(trbs.len(), 3);
        assert_eq!((trbs[0].status >> 17) & 0x1F, 2);
        assert_eq!((trbs[1].status >> 17) & 0x1F, 1);
        assert_eq!((trbs[2].status >> 17) & 0x1F, 0);
        for trb in &trbs {
            assert!(trb.control & control_bits::SIA != 0);
        }
    }

    #[test]
    fn normal_trb_carries_length_and_ioc() {
        let trb = build_normal_trb(0x4000, 512);
        assert_eq!(trb.parameter, 0x4000);
        assert_eq!(trb.status, 512);
        assert!(trb.control & control_bits::IOC != 0);
    }
}
