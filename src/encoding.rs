// Text encodings the tolerant loader can try.
//
// Source exports from the store back-office arrive as UTF-8, Latin-1 or
// Windows-1252 depending on which machine produced them, so decoding is an
// explicit step before CSV parsing rather than something the CSV reader
// guesses at.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
    Ascii,
    Utf16,
    Utf32,
    Windows1252,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("non-ASCII byte 0x{byte:02x} at offset {offset}")]
    NonAscii { byte: u8, offset: usize },

    #[error("byte 0x{byte:02x} at offset {offset} is undefined in windows-1252")]
    Undefined { byte: u8, offset: usize },

    #[error("input length {len} is not a multiple of {unit}")]
    Truncated { len: usize, unit: usize },

    #[error("invalid UTF-16 sequence")]
    Utf16,

    #[error("invalid UTF-32 code point 0x{0:08x}")]
    Utf32(u32),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown text encoding {0:?}")]
pub struct UnknownEncoding(pub String);

// 0x80..=0x9F; the rest of windows-1252 coincides with Latin-1.
const WINDOWS_1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
    Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
    Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
    Some('\u{0152}'), None, Some('\u{017D}'), None,
    None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
    Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
    Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Utf16 => "utf-16",
            TextEncoding::Utf32 => "utf-32",
            TextEncoding::Windows1252 => "windows-1252",
        }
    }

    pub fn join_labels(encodings: &[TextEncoding]) -> String {
        encodings
            .iter()
            .map(|e| e.label())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse a comma separated list such as `"latin1, iso-8859-1, utf-8"`.
    pub fn parse_list(list: &str) -> Result<Vec<TextEncoding>, UnknownEncoding> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        match self {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
                Ok(std::str::from_utf8(bytes)?.to_string())
            }
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Ascii => bytes
                .iter()
                .enumerate()
                .map(|(offset, &byte)| {
                    if byte.is_ascii() {
                        Ok(byte as char)
                    } else {
                        Err(DecodeError::NonAscii { byte, offset })
                    }
                })
                .collect(),
            TextEncoding::Windows1252 => bytes
                .iter()
                .enumerate()
                .map(|(offset, &byte)| match byte {
                    0x80..=0x9F => WINDOWS_1252_HIGH[(byte - 0x80) as usize]
                        .ok_or(DecodeError::Undefined { byte, offset }),
                    _ => Ok(byte as char),
                })
                .collect(),
            TextEncoding::Utf16 => decode_utf16(bytes),
            TextEncoding::Utf32 => decode_utf32(bytes),
        }
    }
}

fn decode_utf16(bytes: &[u8]) -> Result<String, DecodeError> {
    let (big_endian, body) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (true, rest),
        [0xFF, 0xFE, rest @ ..] => (false, rest),
        _ => (false, bytes),
    };
    if body.len() % 2 != 0 {
        return Err(DecodeError::Truncated {
            len: body.len(),
            unit: 2,
        });
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|c| {
            if big_endian {
                u16::from_be_bytes([c[0], c[1]])
            } else {
                u16::from_le_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16(&units).map_err(|_| DecodeError::Utf16)
}

fn decode_utf32(bytes: &[u8]) -> Result<String, DecodeError> {
    let body = bytes.strip_prefix(&[0xFF, 0xFE, 0x00, 0x00]).unwrap_or(bytes);
    if body.len() % 4 != 0 {
        return Err(DecodeError::Truncated {
            len: body.len(),
            unit: 4,
        });
    }
    body.chunks_exact(4)
        .map(|c| {
            let code = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            char::from_u32(code).ok_or(DecodeError::Utf32(code))
        })
        .collect()
}

impl FromStr for TextEncoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" | "l1" => Ok(TextEncoding::Latin1),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            "utf-16" | "utf16" | "utf-16le" => Ok(TextEncoding::Utf16),
            "utf-32" | "utf32" | "utf-32le" => Ok(TextEncoding::Utf32),
            "cp1252" | "windows-1252" => Ok(TextEncoding::Windows1252),
            _ => Err(UnknownEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
