/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt::Display;

use rand::Rng;

/// Size of the staging buffer used for writing and verifying. Must be a
/// power of two and a multiple of the pattern width.
pub const BUF_SIZE: usize = 1024 * 1024;

/// 32-bit value identifying a file and its content. The four little-endian
/// bytes of the value are the unit tile of the file content; the file name
/// is the value in lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern(pub u32);

impl Pattern {
    pub fn random(rng: &mut impl Rng) -> Self {
        Pattern(rng.gen())
    }

    /// File name for this pattern, 1-8 lowercase hex chars.
    pub fn name(&self) -> String {
        format!("{:x}", self.0)
    }

    /// Tile the pattern over `buf` by doubling the filled prefix, so the
    /// fill runs at memcpy speed. `buf.len()` must be a power of two >= 4.
    pub fn fill(&self, buf: &mut [u8]) {
        debug_assert!(buf.len().is_power_of_two() && buf.len() >= 4);
        buf[..4].copy_from_slice(&self.0.to_le_bytes());
        let mut len = 4;
        while len < buf.len() {
            buf.copy_within(..len, len);
            len *= 2;
        }
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// One differing byte found by [`compare`]. Offsets are absolute file
/// offsets, not window offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteDiff {
    pub offset: u64,
    pub expected: u8,
    pub actual: u8,
}

/// Byte-compare a read-back window against the expected tile content.
/// Returns every differing byte, positioned relative to `window_base`.
pub fn compare(expected: &[u8], actual: &[u8], window_base: u64) -> Vec<ByteDiff> {
    debug_assert_eq!(expected.len(), actual.len());
    let mut diffs = Vec::new();
    for (i, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
        if e != a {
            diffs.push(ByteDiff {
                offset: window_base + i as u64,
                expected: *e,
                actual: *a,
            });
        }
    }
    diffs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_tiles_pattern() {
        let pattern = Pattern(0xdeadbeef);
        let mut buf = vec![0u8; 64];
        pattern.fill(&mut buf);
        for chunk in buf.chunks(4) {
            assert_eq!(chunk, 0xdeadbeefu32.to_le_bytes());
        }
    }

    #[test]
    fn test_fill_full_buffer() {
        let pattern = Pattern(0x01020304);
        let mut buf = vec![0u8; BUF_SIZE];
        pattern.fill(&mut buf);
        let tile = 0x01020304u32.to_le_bytes();
        assert_eq!(&buf[..4], tile);
        assert_eq!(&buf[BUF_SIZE - 4..], tile);
        assert_eq!(&buf[BUF_SIZE / 2..BUF_SIZE / 2 + 4], tile);
    }

    #[test]
    fn test_name_round_trip() {
        for value in [0u32, 1, 0xff, 0xcafe, u32::MAX] {
            let name = Pattern(value).name();
            assert!(!name.is_empty() && name.len() <= 8);
            assert_eq!(name, name.to_lowercase());
            assert_eq!(value, u32::from_str_radix(&name, 16).unwrap());
        }
    }

    #[test]
    fn test_compare_equal() {
        let pattern = Pattern(42);
        let mut fst = vec![0u8; 1024];
        let mut snd = vec![0u8; 1024];
        pattern.fill(&mut fst);
        pattern.fill(&mut snd);
        assert!(compare(&fst, &snd, 0).is_empty());
    }

    #[test]
    fn test_compare_reports_offsets() {
        let mut expected = vec![0u8; 16];
        let mut actual = vec![0u8; 16];
        Pattern(7).fill(&mut expected);
        actual.copy_from_slice(&expected);
        actual[3] = !actual[3];
        actual[10] = !actual[10];
        let diffs = compare(&expected, &actual, 4096);
        assert_eq!(
            vec![4096 + 3, 4096 + 10],
            diffs.iter().map(|d| d.offset).collect::<Vec<_>>()
        );
        assert_eq!(diffs[0].expected, expected[3]);
        assert_eq!(diffs[0].actual, actual[3]);
    }
}
