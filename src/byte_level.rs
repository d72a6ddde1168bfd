//! Byte-level codec: a fixed bijection between the 256 byte values and a
//! printable symbol alphabet.
//!
//! BPE vocabularies trained with a byte-level pre-tokenizer store their
//! tokens in this alphabet, so the table must never change between loads:
//!
//! - Bytes 33-126 (`!` to `~`), 161-172 and 174-255 map to themselves.
//! - Every other byte (controls, space, DEL, NBSP, soft hyphen) maps to
//!   U+0100 onwards, in ascending byte order.
//!
//! Space therefore becomes `Ġ` (U+0120) and newline becomes `Ċ` (U+010A).

/// Highest code point produced by the mapping, plus one.
const ALPHABET_SPAN: usize = 0x100 + 68;

const fn maps_to_itself(b: u8) -> bool {
    matches!(b, 33..=126 | 161..=172 | 174..=255)
}

const fn build_byte_to_char() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut shifted = 0u32;
    let mut b = 0usize;
    while b < 256 {
        table[b] = if maps_to_itself(b as u8) {
            b as u8 as char
        } else {
            let c = match char::from_u32(0x100 + shifted) {
                Some(c) => c,
                None => '\0',
            };
            shifted += 1;
            c
        };
        b += 1;
    }
    table
}

const fn build_char_to_byte() -> [Option<u8>; ALPHABET_SPAN] {
    let forward = build_byte_to_char();
    let mut table = [None; ALPHABET_SPAN];
    let mut b = 0usize;
    while b < 256 {
        table[forward[b] as u32 as usize] = Some(b as u8);
        b += 1;
    }
    table
}

static BYTE_TO_CHAR: [char; 256] = build_byte_to_char();
static CHAR_TO_BYTE: [Option<u8>; ALPHABET_SPAN] = build_char_to_byte();

/// Symbol for a single byte.
#[inline]
pub fn byte_to_char(byte: u8) -> char {
    BYTE_TO_CHAR[byte as usize]
}

/// Byte for a symbol, or `None` when `ch` is outside the alphabet.
#[inline]
pub fn char_to_byte(ch: char) -> Option<u8> {
    CHAR_TO_BYTE.get(ch as u32 as usize).copied().flatten()
}

/// Maps raw bytes to their byte-level symbol string.
pub fn encode_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| byte_to_char(b)).collect()
}

/// Inverts [`encode_bytes`].
///
/// Characters outside the alphabet (literal added tokens, SentencePiece-style
/// `▁` markers) pass through as their own UTF-8 bytes.
pub fn decode_symbols(symbols: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(symbols.len());
    for ch in symbols.chars() {
        match char_to_byte(ch) {
            Some(b) => bytes.push(b),
            None => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    bytes
}

/// Strict inverse of [`encode_bytes`]: `None` if any character is outside
/// the alphabet.
pub fn decode_symbols_strict(symbols: &str) -> Option<Vec<u8>> {
    symbols.chars().map(char_to_byte).collect()
}
