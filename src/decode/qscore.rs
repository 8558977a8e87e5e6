/// Quality character used when the decoder does not estimate per-base quality
pub const PLACEHOLDER_QUAL: char = '?';

/// Placeholder quality string of `len` bases.
pub fn placeholder_qstring(len: usize) -> String {
    std::iter::repeat(PLACEHOLDER_QUAL).take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder() {
        assert_eq!(placeholder_qstring(3), "???");
        assert_eq!(placeholder_qstring(0), "");
    }
}
