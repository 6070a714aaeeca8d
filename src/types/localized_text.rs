// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    fmt,
    io::{Read, Write},
};

use crate::types::{encoding::*, string::*};

bitflags! {
    struct LocalizedTextMask: u8 {
        const HAS_LOCALE = 0x1;
        const HAS_TEXT = 0x2;
    }
}

/// Human readable text with an optional locale. Null or empty fields are omitted from the stream.
#[derive(PartialEq, Eq, Default, Debug, Clone, Hash, Serialize, Deserialize)]
pub struct LocalizedText {
    pub locale: UAString,
    pub text: UAString,
}

impl<'a> From<&'a str> for LocalizedText {
    fn from(value: &'a str) -> Self {
        Self::new("", value)
    }
}

impl From<String> for LocalizedText {
    fn from(value: String) -> Self {
        Self {
            locale: UAString::from(""),
            text: UAString::from(value),
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl LocalizedText {
    pub fn new(locale: &str, text: &str) -> LocalizedText {
        LocalizedText {
            locale: UAString::from(locale),
            text: UAString::from(text),
        }
    }

    pub fn null() -> LocalizedText {
        LocalizedText {
            locale: UAString::null(),
            text: UAString::null(),
        }
    }

    fn encoding_mask(&self) -> LocalizedTextMask {
        let mut mask = LocalizedTextMask::empty();
        mask.set(LocalizedTextMask::HAS_LOCALE, !self.locale.is_empty());
        mask.set(LocalizedTextMask::HAS_TEXT, !self.text.is_empty());
        mask
    }
}

impl BinaryEncoder<LocalizedText> for LocalizedText {
    fn byte_len(&self) -> usize {
        let mask = self.encoding_mask();
        let mut size = 1;
        if mask.contains(LocalizedTextMask::HAS_LOCALE) {
            size += self.locale.byte_len();
        }
        if mask.contains(LocalizedTextMask::HAS_TEXT) {
            size += self.text.byte_len();
        }
        size
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mask = self.encoding_mask();
        let mut size = mask.bits().encode(stream)?;
        if mask.contains(LocalizedTextMask::HAS_LOCALE) {
            size += self.locale.encode(stream)?;
        }
        if mask.contains(LocalizedTextMask::HAS_TEXT) {
            size += self.text.encode(stream)?;
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let mask = LocalizedTextMask::from_bits_truncate(u8::decode(stream, decoding_options)?);
        let locale = if mask.contains(LocalizedTextMask::HAS_LOCALE) {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        let text = if mask.contains(LocalizedTextMask::HAS_TEXT) {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        Ok(LocalizedText { locale, text })
    }
}
