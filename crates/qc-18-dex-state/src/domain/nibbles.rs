use super::TrieError;

// =============================================================================
// NIBBLES: Half-byte path representation
// =============================================================================

/// Nibble path for trie traversal.
///
/// Trie keys are converted to nibbles (half-bytes, 0-15). A 32-byte key
/// becomes 64 nibbles, and nibble order is byte order, so walking children
/// 0..=15 visits keys in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Nibbles(pub Vec<u8>);

impl Nibbles {
    /// Create nibbles from arbitrary bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0F);
        }
        Nibbles(nibbles)
    }

    /// Pack an even-length nibble path back into bytes.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        if self.len() % 2 == 1 {
            return None;
        }
        Some(
            self.0
                .chunks(2)
                .map(|pair| (pair[0] << 4) | pair[1])
                .collect(),
        )
    }

    /// Get a slice of nibbles starting at offset.
    pub fn slice(&self, start: usize) -> Self {
        Nibbles(self.0[start..].to_vec())
    }

    /// Get a range slice of nibbles.
    pub fn slice_range(&self, start: usize, end: usize) -> Self {
        Nibbles(self.0[start..end].to_vec())
    }

    /// Concatenate `self`, an optional branch nibble and `tail`.
    pub fn join(&self, nibble: Option<u8>, tail: &Nibbles) -> Self {
        let mut out = Vec::with_capacity(self.len() + 1 + tail.len());
        out.extend_from_slice(&self.0);
        out.extend(nibble);
        out.extend_from_slice(&tail.0);
        Nibbles(out)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get nibble at index.
    pub fn at(&self, index: usize) -> u8 {
        self.0[index]
    }

    /// Encode nibbles with hex-prefix for RLP encoding.
    ///
    /// First nibble encodes flags: 0=extension even, 1=extension odd,
    /// 2=leaf even, 3=leaf odd. With an odd count the first path nibble
    /// shares the flag byte.
    pub fn encode_hex_prefix(&self, is_leaf: bool) -> Vec<u8> {
        let odd = self.len() % 2 == 1;
        let prefix = if is_leaf { 2 } else { 0 } + if odd { 1 } else { 0 };

        let mut result = Vec::with_capacity(self.len() / 2 + 1);

        if odd {
            result.push((prefix << 4) | self.0[0]);
            for chunk in self.0[1..].chunks(2) {
                result.push((chunk[0] << 4) | chunk[1]);
            }
        } else {
            result.push(prefix << 4);
            for chunk in self.0.chunks(2) {
                result.push((chunk[0] << 4) | chunk[1]);
            }
        }

        result
    }

    /// Decode hex-prefix encoded bytes back to nibbles.
    pub fn decode_hex_prefix(encoded: &[u8]) -> Result<(Self, bool), TrieError> {
        let Some(&first) = encoded.first() else {
            return Err(TrieError::MalformedNode("empty hex-prefix path".into()));
        };

        let prefix = first >> 4;
        if prefix > 3 {
            return Err(TrieError::MalformedNode(format!(
                "invalid hex-prefix flag {prefix}"
            )));
        }
        let is_leaf = prefix >= 2;
        let odd = prefix % 2 == 1;

        let mut nibbles = Vec::with_capacity(encoded.len() * 2);

        if odd {
            nibbles.push(first & 0x0F);
        } else if first & 0x0F != 0 {
            return Err(TrieError::MalformedNode("non-zero hex-prefix padding".into()));
        }

        for &byte in &encoded[1..] {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0F);
        }

        Ok((Nibbles(nibbles), is_leaf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nibbles_from_bytes() {
        let nibbles = Nibbles::from_bytes(&[0xAB, 0xCD, 0x0F]);
        assert_eq!(nibbles.len(), 6);
        assert_eq!(nibbles.at(0), 0x0A);
        assert_eq!(nibbles.at(3), 0x0D);
        assert_eq!(nibbles.at(5), 0x0F);
        assert_eq!(nibbles.to_bytes(), Some(vec![0xAB, 0xCD, 0x0F]));
    }

    #[test]
    fn test_odd_path_has_no_bytes() {
        assert_eq!(Nibbles(vec![1, 2, 3]).to_bytes(), None);
    }

    #[test]
    fn test_hex_prefix_encoding() {
        // Even length leaf
        let encoded = Nibbles(vec![1, 2, 3, 4]).encode_hex_prefix(true);
        assert_eq!(encoded, vec![0x20, 0x12, 0x34]);

        // Odd length leaf
        let encoded = Nibbles(vec![1, 2, 3]).encode_hex_prefix(true);
        assert_eq!(encoded, vec![0x31, 0x23]);

        // Even length extension
        let encoded = Nibbles(vec![1, 2, 3, 4]).encode_hex_prefix(false);
        assert_eq!(encoded[0] >> 4, 0);
    }

    #[test]
    fn test_hex_prefix_roundtrip() {
        let original = Nibbles(vec![1, 2, 3, 4, 5]);
        let encoded = original.encode_hex_prefix(false);
        let (decoded, is_leaf) = Nibbles::decode_hex_prefix(&encoded).unwrap();
        assert!(!is_leaf);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_hex_prefix_rejects_bad_flag() {
        assert!(Nibbles::decode_hex_prefix(&[0x40]).is_err());
        assert!(Nibbles::decode_hex_prefix(&[]).is_err());
    }

    #[test]
    fn test_join() {
        let head = Nibbles(vec![1, 2]);
        let tail = Nibbles(vec![4]);
        assert_eq!(head.join(Some(3), &tail), Nibbles(vec![1, 2, 3, 4]));
        assert_eq!(head.join(None, &tail), Nibbles(vec![1, 2, 4]));
    }
}
