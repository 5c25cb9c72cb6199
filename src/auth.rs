/// Shared-token check for the connection handshake. Compares every byte so
/// a mismatch costs the same regardless of where it occurs.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    let expected = expected.as_bytes();
    let presented = presented.as_bytes();
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(token_matches("frontdesk", "frontdesk"));
        assert!(!token_matches("frontdesk", "frontdesk "));
        assert!(!token_matches("frontdesk", "frontdesj"));
        assert!(!token_matches("frontdesk", ""));
    }
}
