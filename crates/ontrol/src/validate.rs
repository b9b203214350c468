//! Input validation performed before any connection is opened.

use crate::error::CoreError;

/// Four dot-separated decimal octets in `[0, 255]`. Stricter than a general
/// address parser: no hex, no shorthand, no surrounding whitespace.
pub fn ipv4(value: &str) -> Result<(), CoreError> {
    let octets: Vec<&str> = value.split('.').collect();
    if octets.len() != 4 {
        return Err(CoreError::InvalidArgument(format!(
            "'{value}' is not a dotted-quad IPv4 address"
        )));
    }
    for octet in octets {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidArgument(format!(
                "'{value}' has a malformed octet '{octet}'"
            )));
        }
        let n: u32 = octet
            .parse()
            .map_err(|_| CoreError::InvalidArgument(format!("'{value}' octet '{octet}'")))?;
        if n > 255 {
            return Err(CoreError::InvalidArgument(format!(
                "'{value}' octet {n} out of range"
            )));
        }
    }
    Ok(())
}

/// Decimal TCP/UDP port in `[1, 65535]`.
pub fn port(value: &str) -> Result<u16, CoreError> {
    let n: u32 = value
        .trim()
        .parse()
        .map_err(|_| CoreError::InvalidArgument(format!("'{value}' is not a port number")))?;
    if n == 0 || n > 65535 {
        return Err(CoreError::InvalidArgument(format!(
            "port {n} out of range 1-65535"
        )));
    }
    Ok(n as u16)
}
