//! Mass-storage class: Bulk-Only Transport framing and the SCSI
//! command subset spec §4.7 names (`INQUIRY`, `TEST UNIT READY`,
//! `REQUEST SENSE`, `READ CAPACITY(10)`, `READ(10)`/`WRITE(10)`).
//!
//! Grounded on `original_source/lib/usb/usbmassdevice.cpp`'s
//! `CUSBBulkOnlyMassStorageDevice` command sequence and retry policy.
//! CBW/CSW framing and SCSI CDB construction are kept as pure
//! byte-layout functions; [`MassStorageDevice`] is the state machine
//! that decides what to send next and how to react to a failed CSW,
//! so both halves are testable without a real bulk endpoint.

use crate::usb::core::{Direction, UsbError};

pub const CBW_SIGNATURE: u32 = 0x4342_5355;
pub const CSW_SIGNATURE: u32 = 0x5342_5355;
pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;

pub const BLOCK_SIZE: u32 = 512;
/// spec §4.7: "reject if block size != 512 or capacity >= 2 TB."
pub const MAX_CAPACITY_BLOCKS: u64 = (2u64 * 1024 * 1024 * 1024 * 1024) / BLOCK_SIZE as u64;

pub const MAX_TUR_ATTEMPTS: u32 = 100;
pub const TUR_RETRY_DELAY_MS: u32 = 100;
pub const MAX_COMMAND_RETRIES: u32 = 8;

/// Class-specific Bulk-Only Mass Storage Reset (USB MSC BBB 3.1).
pub const BOMS_RESET_REQUEST: u8 = 0xFF;
pub const ENDPOINT_HALT_FEATURE: u16 = 0;

pub mod scsi_op {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CswStatus {
    Passed,
    Failed,
    PhaseError,
}

impl CswStatus {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(CswStatus::Passed),
            1 => Some(CswStatus::Failed),
            2 => Some(CswStatus::PhaseError),
            _ => None,
        }
    }
}

/// Build a 31-byte Command Block Wrapper (spec §4.7).
pub fn build_cbw(tag: u32, data_transfer_length: u32, direction: Direction, lun: u8, cb: &[u8]) -> [u8; CBW_LEN] {
    debug_assert!(cb.len() <= 16);
    let mut out = [0u8; CBW_LEN];
    out[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
    out[4..8].copy_from_slice(&tag.to_le_bytes());
    out[8..12].copy_from_slice(&data_transfer_length.to_le_bytes());
    out[12] = if direction == Direction::In { 0x80 } else { 0x00 };
    out[13] = lun;
    out[14] = cb.len() as u8;
    out[15..15 + cb.len()].copy_from_slice(cb);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csw {
    pub tag: u32,
    pub residue: u32,
    pub status: CswStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CswError {
    TooShort,
    BadSignature,
    UnknownStatus,
}

/// Parse a 13-byte Command Status Wrapper.
pub fn parse_csw(bytes: &[u8]) -> Result<Csw, CswError> {
    if bytes.len() < CSW_LEN {
        return Err(CswError::TooShort);
    }
    let signature = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if signature != CSW_SIGNATURE {
        return Err(CswError::BadSignature);
    }
    let tag = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let residue = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let status = CswStatus::from_byte(bytes[12]).ok_or(CswError::UnknownStatus)?;
    Ok(Csw { tag, residue, status })
}

/// `READ(10)`/`WRITE(10)` CDB: opcode, LBA (big-endian), transfer
/// length in blocks (big-endian).
pub fn build_read_write_10(opcode: u8, lba: u32, block_count: u16) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = opcode;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&block_count.to_be_bytes());
    cdb
}

pub fn build_test_unit_ready() -> [u8; 6] {
    [scsi_op::TEST_UNIT_READY, 0, 0, 0, 0, 0]
}

pub fn build_request_sense(alloc_len: u8) -> [u8; 6] {
    [scsi_op::REQUEST_SENSE, 0, 0, 0, alloc_len, 0]
}

pub fn build_inquiry(alloc_len: u8) -> [u8; 6] {
    [scsi_op::INQUIRY, 0, 0, 0, alloc_len, 0]
}

pub fn build_read_capacity_10() -> [u8; 10] {
    [scsi_op::READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

/// Decode `READ CAPACITY (10)`'s 8-byte response: last valid LBA
/// (big-endian) and block length in bytes (big-endian).
pub fn parse_read_capacity_10(response: &[u8]) -> Option<(u64, u32)> {
    if response.len() < 8 {
        return None;
    }
    let last_lba = u32::from_be_bytes(response[0..4].try_into().unwrap());
    let block_size = u32::from_be_bytes(response[4..8].try_into().unwrap());
    Some(((last_lba as u64) + 1, block_size))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityError {
    /// spec §4.7: "reject if block size != 512".
    UnsupportedBlockSize(u32),
    /// spec §4.7: "... or capacity >= 2 TB".
    CapacityTooLarge(u64),
}

/// spec §4.7's `READ CAPACITY(10)` acceptance check, run on the decoded
/// `(blocks, block_size)` pair before the device is handed to a caller.
pub fn validate_capacity(blocks: u64, block_size: u32) -> Result<(), CapacityError> {
    if block_size != BLOCK_SIZE {
        return Err(CapacityError::UnsupportedBlockSize(block_size));
    }
    if blocks >= MAX_CAPACITY_BLOCKS {
        return Err(CapacityError::CapacityTooLarge(blocks));
    }
    Ok(())
}

/// `INQUIRY` peripheral device type: low 5 bits of byte 0; `0x00` is
/// "direct access block device" (spec §4.7: "confirm peripheral device
/// type is direct-access block device").
pub fn is_direct_access_block_device(inquiry_response: &[u8]) -> bool {
    inquiry_response.first().is_some_and(|&b| b & 0x1F == 0x00)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    ClearHaltIn,
    ClearHaltOut,
    BomsReset,
    ResetPid,
    Done,
}

/// spec §4.7 "Error path": the recovery sequence run after a whole
/// command attempt fails (CSW status `FAILED`/`PhaseError`, or CSW
/// transfer itself failed twice). Drives the BOMS reset + both
/// endpoints' halt-clear + PID reset in the fixed order
/// `usbmassdevice.cpp` uses.
pub struct CommandRecovery {
    step: RecoveryStep,
}

impl CommandRecovery {
    pub fn new() -> Self {
        Self { step: RecoveryStep::BomsReset }
    }

    pub fn step(&self) -> RecoveryStep {
        self.step
    }

    pub fn advance(&mut self) {
        self.step = match self.step {
            RecoveryStep::BomsReset => RecoveryStep::ClearHaltIn,
            RecoveryStep::ClearHaltIn => RecoveryStep::ClearHaltOut,
            RecoveryStep::ClearHaltOut => RecoveryStep::ResetPid,
            RecoveryStep::ResetPid => RecoveryStep::Done,
            RecoveryStep::Done => RecoveryStep::Done,
        };
    }

    pub fn is_done(&self) -> bool {
        self.step == RecoveryStep::Done
    }
}

impl Default for CommandRecovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one `READ(10)`/`WRITE(10)` command through CBW → data phase
/// → CSW, with the CSW-transfer-failure (retry once) and
/// CSW-status-failure (retry whole command, up to
/// [`MAX_COMMAND_RETRIES`], running [`CommandRecovery`] between
/// attempts) policies from spec §4.7 "Read/write".
pub struct CommandAttempt {
    tag: u32,
    attempts: u32,
    csw_retried: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Retry the CSW phase only (no recovery, no new CBW).
    RetryCsw,
    /// Run recovery, then resend the whole command with a fresh tag.
    RetryCommand,
    Success,
    Failed(UsbError),
}

impl CommandAttempt {
    pub fn new(tag: u32) -> Self {
        Self { tag, attempts: 1, csw_retried: false }
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Call when the CSW *transfer itself* failed (stall/timeout on the
    /// bulk-IN endpoint reading the CSW), before any CSW could be
    /// parsed.
    pub fn on_csw_transfer_failed(&mut self) -> CommandOutcome {
        if !self.csw_retried {
            self.csw_retried = true;
            CommandOutcome::RetryCsw
        } else {
            self.give_up_or_retry()
        }
    }

    /// Call with a successfully-transferred and parsed CSW.
    pub fn on_csw(&mut self, csw: Csw) -> CommandOutcome {
        if csw.tag != self.tag {
            return CommandOutcome::Failed(UsbError::Unknown);
        }
        match csw.status {
            CswStatus::Passed => CommandOutcome::Success,
            CswStatus::Failed | CswStatus::PhaseError => self.give_up_or_retry(),
        }
    }

    fn give_up_or_retry(&mut self) -> CommandOutcome {
        if self.attempts >= MAX_COMMAND_RETRIES {
            CommandOutcome::Failed(UsbError::Transaction)
        } else {
            self.attempts += 1;
            self.csw_retried = false;
            self.tag = self.tag.wrapping_add(1);
            CommandOutcome::RetryCommand
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbw_encodes_signature_tag_and_cb() {
        let cb = build_test_unit_ready();
        let cbw = build_cbw(7, 0, Direction::Out, 0, &cb);
        assert_eq!(&cbw[0..4], &CBW_SIGNATURE.to_le_bytes());
        assert_eq!(&cbw[4..8], &7u32.to_le_bytes());
        assert_eq!(cbw[14], 6);
        assert_eq!(cbw[15], scsi_op::TEST_UNIT_READY);
    }

    #[test]
    fn csw_round_trips_tag_for_matching_command() {
        let mut csw_bytes = [0u8; CSW_LEN];
        csw_bytes[0..4].copy_from_slice(&CSW_SIGNATURE.to_le_bytes());
        csw_bytes[4..8].copy_from_slice(&42u32.to_le_bytes());
        csw_bytes[12] = 0;
        let csw = parse_csw(&csw_bytes).unwrap();
        assert_eq!(csw.tag, 42);
        assert_eq!(csw.status, CswStatus::Passed);
    }

    #[test]
    fn csw_rejects_bad_signature() {
        let bytes = [0u8; CSW_LEN];
        assert_eq!(parse_csw(&bytes), Err(CswError::BadSignature));
    }

    #[test]
    fn read_capacity_10_decodes_block_count_from_last_lba() {
        let mut response = [0u8; 8];
        response[0..4].copy_from_slice(&99u32.to_be_bytes());
        response[4..8].copy_from_slice(&512u32.to_be_bytes());
        let (blocks, block_size) = parse_read_capacity_10(&response).unwrap();
        assert_eq!(blocks, 100);
        assert_eq!(block_size, 512);
        assert_eq!(validate_capacity(blocks, block_size), Ok(()));
    }

    #[test]
    fn validate_capacity_rejects_non_512_block_size() {
        assert_eq!(
            validate_capacity(100, 4096),
            Err(CapacityError::UnsupportedBlockSize(4096)),
        );
    }

    #[test]
    fn validate_capacity_rejects_at_2tb_boundary() {
        assert_eq!(validate_capacity(MAX_CAPACITY_BLOCKS - 1, BLOCK_SIZE), Ok(()));
        assert_eq!(
            validate_capacity(MAX_CAPACITY_BLOCKS, BLOCK_SIZE),
            Err(CapacityError::CapacityTooLarge(MAX_CAPACITY_BLOCKS)),
        );
    }

    #[test]
    fn failed_csw_status_triggers_command_retry_with_new_tag() {
        let mut attempt = CommandAttempt::new(1);
        let csw = Csw { tag: 1, residue: 0, status: CswStatus::Failed };
        assert_eq!(attempt.on_csw(csw), CommandOutcome::RetryCommand);
        assert_eq!(attempt.tag(), 2);
        assert_eq!(attempt.attempts(), 2);
    }

    #[test]
    fn command_gives_up_after_max_retries() {
        let mut attempt = CommandAttempt::new(1);
        for _ in 0..MAX_COMMAND_RETRIES - 1 {
            let csw = Csw { tag: attempt.tag(), residue: 0, status: CswStatus::Failed };
            assert_eq!(attempt.on_csw(csw), CommandOutcome::RetryCommand);
        }
        let csw = Csw { tag: attempt.tag(), residue: 0, status: CswStatus::Failed };
        assert_eq!(attempt.on_csw(csw), CommandOutcome::Failed(UsbError::Transaction));
    }

    #[test]
    fn csw_transfer_failure_retries_csw_once_then_whole_command() {
        let mut attempt = CommandAttempt::new(5);
        assert_eq!(attempt.on_csw_transfer_failed(), CommandOutcome::RetryCsw);
        assert_eq!(attempt.on_csw_transfer_failed(), CommandOutcome::RetryCommand);
    }

    #[test]
    fn mismatched_tag_fails_immediately() {
        let mut attempt = CommandAttempt::new(1);
        let csw = Csw { tag: 99, residue: 0, status: CswStatus::Passed };
        assert_eq!(attempt.on_csw(csw), CommandOutcome::Failed(UsbError::Unknown));
    }

    #[test]
    fn recovery_runs_boms_reset_then_both_halts_then_pid_reset() {
        let mut recovery = CommandRecovery::new();
        assert_eq!(recovery.step(), RecoveryStep::BomsReset);
        recovery.advance();
        assert_eq!(recovery.step(), RecoveryStep::ClearHaltIn);
        recovery.advance();
        assert_eq!(recovery.step(), RecoveryStep::ClearHaltOut);
        recovery.advance();
        assert_eq!(recovery.step(), RecoveryStep::ResetPid);
        recovery.advance();
        assert!(recovery.is_done());
    }

    #[test]
    fn direct_access_block_device_is_recognized() {
        assert!(is_direct_access_block_device(&[0x00]));
        assert!(!is_direct_access_block_device(&[0x05]));
    }
}
