//! Control-flag bits of the segment header, RFC 793 positions.

/// FIN flag - no more data from sender
pub const FIN: u8 = 1 << 0;
/// SYN flag - synchronize sequence numbers
pub const SYN: u8 = 1 << 1;
/// RST flag - reset the connection (never sent by this protocol)
pub const RST: u8 = 1 << 2;
/// PSH flag - push function (never sent by this protocol)
pub const PSH: u8 = 1 << 3;
/// ACK flag - acknowledgment field is significant
pub const ACK: u8 = 1 << 4;
/// URG flag - urgent pointer field is significant (never sent by this protocol)
pub const URG: u8 = 1 << 5;

/// Combines flag bits for human-readable display
pub fn flags_to_string(flags: u8) -> String {
    format!(
        "{}{}{}{}{}",
        if flags & SYN != 0 { "S" } else { "-" },
        if flags & ACK != 0 { "A" } else { "-" },
        if flags & FIN != 0 { "F" } else { "-" },
        if flags & RST != 0 { "R" } else { "-" },
        if flags & PSH != 0 { "P" } else { "-" },
    )
}
