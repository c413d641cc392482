//! Property block encoding and iteration.
//!
//! A message's properties travel as a block of NUL-terminated UTF-8
//! strings alternating key, value, key, value. On the wire the block is
//! preceded by a varint giving its byte length; that prefix belongs to
//! the message payload, not to this module.

/// Append one `key`/`value` pair to an encoded property block.
///
/// # Panics
///
/// Panics if either string contains a NUL byte; NUL is the pair
/// delimiter and can never appear inside a key or value.
pub fn append_property(block: &mut Vec<u8>, key: &str, value: &str) {
    assert!(
        !key.as_bytes().contains(&0) && !value.as_bytes().contains(&0),
        "property keys and values must not contain NUL"
    );
    block.extend_from_slice(key.as_bytes());
    block.push(0);
    block.extend_from_slice(value.as_bytes());
    block.push(0);
}

/// Iterator over the `(key, value)` pairs of an encoded property block.
///
/// Stops at the first malformed entry (missing terminator or invalid
/// UTF-8); a block produced by [`append_property`] never has either.
pub struct PropertiesIter<'a> {
    rest: &'a [u8],
}

impl<'a> PropertiesIter<'a> {
    /// Iterate over an encoded property block.
    pub fn new(block: &'a [u8]) -> Self {
        Self { rest: block }
    }

    fn next_string(&mut self) -> Option<&'a str> {
        let nul = self.rest.iter().position(|&b| b == 0)?;
        let (s, rest) = self.rest.split_at(nul);
        self.rest = &rest[1..];
        std::str::from_utf8(s).ok()
    }
}

impl<'a> Iterator for PropertiesIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let key = self.next_string()?;
        let value = self.next_string()?;
        Some((key, value))
    }
}

/// Look up `key` in an encoded property block.
pub fn find_property<'a>(block: &'a [u8], key: &str) -> Option<&'a str> {
    PropertiesIter::new(block).find(|(k, _)| *k == key).map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_iterate() {
        let mut block = Vec::new();
        append_property(&mut block, "Profile", "Insult");
        append_property(&mut block, "Language", "French");

        let pairs: Vec<_> = PropertiesIter::new(&block).collect();
        assert_eq!(pairs, vec![("Profile", "Insult"), ("Language", "French")]);
    }

    #[test]
    fn test_wire_layout() {
        let mut block = Vec::new();
        append_property(&mut block, "k", "v");
        assert_eq!(block, b"k\0v\0");
    }

    #[test]
    fn test_find_property() {
        let mut block = Vec::new();
        append_property(&mut block, "Profile", "Echo");
        append_property(&mut block, "Channel", "beta");

        assert_eq!(find_property(&block, "Profile"), Some("Echo"));
        assert_eq!(find_property(&block, "Channel"), Some("beta"));
        assert_eq!(find_property(&block, "Horse"), None);
    }

    #[test]
    fn test_empty_values_allowed() {
        let mut block = Vec::new();
        append_property(&mut block, "Empty", "");
        assert_eq!(find_property(&block, "Empty"), Some(""));
    }

    #[test]
    fn test_empty_block() {
        assert_eq!(PropertiesIter::new(&[]).count(), 0);
        assert_eq!(find_property(&[], "anything"), None);
    }

    #[test]
    #[should_panic(expected = "must not contain NUL")]
    fn test_nul_in_key_panics() {
        let mut block = Vec::new();
        append_property(&mut block, "bad\0key", "v");
    }

    #[test]
    #[should_panic(expected = "must not contain NUL")]
    fn test_nul_in_value_panics() {
        let mut block = Vec::new();
        append_property(&mut block, "k", "bad\0value");
    }

    #[test]
    fn test_truncated_block_stops_iteration() {
        // A value missing its terminator yields nothing for that pair.
        let block = b"key\0val";
        assert_eq!(PropertiesIter::new(block).count(), 0);
    }
}
