//! RTCP Sender Report construction (RFC 3550 §6.4.1).
//!
//! Only the 28-byte SR without report blocks is produced; receiver reports
//! and feedback are not part of this stack.

use std::time::{SystemTime, UNIX_EPOCH};

/// RTCP packet type for Sender Reports.
pub const RTCP_SR_PT: u8 = 200;

/// Length of the emitted Sender Report.
pub const RTCP_SR_LEN: usize = 28;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Current wall clock as a 64-bit NTP timestamp (seconds since 1900 in the
/// upper half).
pub fn ntp_now() -> u64 {
    let unix_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (unix_secs + NTP_UNIX_OFFSET) << 32
}

/// Build a Sender Report carrying the session's send state.
pub fn sender_report(
    ssrc: u32,
    ntp_timestamp: u64,
    rtp_timestamp: u32,
    packet_count: u32,
    octet_count: u32,
) -> [u8; RTCP_SR_LEN] {
    let mut sr = [0u8; RTCP_SR_LEN];
    sr[0] = 0x80; // V=2, P=0, RC=0
    sr[1] = RTCP_SR_PT;
    sr[2] = 0;
    sr[3] = 12; // length in 32-bit words minus one
    sr[4..8].copy_from_slice(&ssrc.to_be_bytes());
    sr[8..16].copy_from_slice(&ntp_timestamp.to_be_bytes());
    sr[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    sr[20..24].copy_from_slice(&packet_count.to_be_bytes());
    sr[24..28].copy_from_slice(&octet_count.to_be_bytes());
    sr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_report_layout() {
        let sr = sender_report(0x12345678, 0xAABBCCDD_00000000, 90_000, 100, 150_000);
        assert_eq!(sr.len(), 28);
        assert_eq!(sr[0] >> 6, 2);
        assert_eq!(sr[1], RTCP_SR_PT);
        assert_eq!(u16::from_be_bytes([sr[2], sr[3]]), 12);
        assert_eq!(u32::from_be_bytes([sr[4], sr[5], sr[6], sr[7]]), 0x12345678);
        assert_eq!(
            u64::from_be_bytes(sr[8..16].try_into().unwrap()),
            0xAABBCCDD_00000000
        );
        assert_eq!(u32::from_be_bytes(sr[16..20].try_into().unwrap()), 90_000);
        assert_eq!(u32::from_be_bytes(sr[20..24].try_into().unwrap()), 100);
        assert_eq!(u32::from_be_bytes(sr[24..28].try_into().unwrap()), 150_000);
    }

    #[test]
    fn ntp_epoch_offset_applied() {
        let ntp = ntp_now();
        // Upper 32 bits are seconds since 1900; must exceed the 1900→1970 gap.
        assert!(ntp >> 32 > NTP_UNIX_OFFSET);
    }
}
