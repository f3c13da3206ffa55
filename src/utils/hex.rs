//! Hexadecimal Utilities
//!
//! Helpers for formatting raw protocol frames in log output.

/// Convert byte array to lowercase hexadecimal string
///
/// # Example
///
/// ```
/// use mcsrv::utils::hex::bytes_to_hex;
///
/// assert_eq!(bytes_to_hex(&[0x01, 0x02, 0xFF]), "0102ff");
/// ```
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

/// Format byte array as space-separated hex pairs for trace output
///
/// # Example
///
/// ```
/// use mcsrv::utils::hex::format_hex_pretty;
///
/// assert_eq!(format_hex_pretty(&[0x50, 0x00, 0xA8]), "50 00 a8");
/// ```
pub fn format_hex_pretty(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
