//! Mixing-key derivation from the two upstream key halves.

/// Fixed permutation applied to `img_key + sub_key`.
pub const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Maximum length of a derived mixing key.
pub const MIXING_KEY_LEN: usize = 32;

/// Derives the mixing key for a key pair.
///
/// Reads `img_key + sub_key` at every position of [`MIXIN_KEY_ENC_TAB`] in
/// table order and keeps the first 32 characters. Positions past the end of an
/// abnormally short source are skipped rather than padded, so the result may
/// be shorter than 32 characters.
pub fn mixing_key(img_key: &str, sub_key: &str) -> String {
    let source: Vec<char> = img_key.chars().chain(sub_key.chars()).collect();

    MIXIN_KEY_ENC_TAB
        .iter()
        .filter_map(|&index| source.get(index))
        .take(MIXING_KEY_LEN)
        .collect()
}
