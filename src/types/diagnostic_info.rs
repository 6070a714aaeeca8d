// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::io::{Read, Write};

use crate::types::{encoding::*, status_code::StatusCode, string::UAString};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Present: u8 {
        const SYMBOLIC_ID = 0x01;
        const NAMESPACE = 0x02;
        const LOCALIZED_TEXT = 0x04;
        const LOCALE = 0x08;
        const ADDITIONAL_INFO = 0x10;
        const INNER_STATUS_CODE = 0x20;
        const INNER_DIAGNOSTIC_INFO = 0x40;
    }
}

/// Vendor diagnostics attached to a status. The integer fields index the string table of the
/// response header.
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub locale: Option<i32>,
    pub localized_text: Option<i32>,
    pub additional_info: Option<UAString>,
    pub inner_status_code: Option<StatusCode>,
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    pub fn null() -> DiagnosticInfo {
        DiagnosticInfo::default()
    }

    /// The string table indexes in wire order, each with its flag.
    fn indexes(&self) -> [(Present, Option<i32>); 4] {
        [
            (Present::SYMBOLIC_ID, self.symbolic_id),
            (Present::NAMESPACE, self.namespace_uri),
            (Present::LOCALE, self.locale),
            (Present::LOCALIZED_TEXT, self.localized_text),
        ]
    }

    fn present(&self) -> Present {
        let mut present = self
            .indexes()
            .iter()
            .filter(|(_, index)| index.is_some())
            .fold(Present::empty(), |present, (flag, _)| present | *flag);
        present.set(Present::ADDITIONAL_INFO, self.additional_info.is_some());
        present.set(Present::INNER_STATUS_CODE, self.inner_status_code.is_some());
        present.set(Present::INNER_DIAGNOSTIC_INFO, self.inner_diagnostic_info.is_some());
        present
    }
}

impl BinaryEncoder<DiagnosticInfo> for DiagnosticInfo {
    fn byte_len(&self) -> usize {
        let indexes = self.indexes().iter().filter(|(_, i)| i.is_some()).count() * 4;
        1 + indexes
            + self.additional_info.as_ref().map_or(0, |v| v.byte_len())
            + self.inner_status_code.map_or(0, |_| 4)
            + self.inner_diagnostic_info.as_ref().map_or(0, |v| v.byte_len())
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let mut size = write_u8(stream, self.present().bits())?;
        for index in self.indexes().iter().filter_map(|(_, i)| *i) {
            size += write_i32(stream, index)?;
        }
        if let Some(additional_info) = &self.additional_info {
            size += additional_info.encode(stream)?;
        }
        if let Some(status) = &self.inner_status_code {
            size += status.encode(stream)?;
        }
        if let Some(inner) = &self.inner_diagnostic_info {
            size += inner.encode(stream)?;
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let present = Present::from_bits_truncate(read_u8(stream)?);
        let index = |flag: Present, stream: &mut S| -> EncodingResult<Option<i32>> {
            if present.contains(flag) {
                read_i32(stream).map(Some)
            } else {
                Ok(None)
            }
        };
        let symbolic_id = index(Present::SYMBOLIC_ID, stream)?;
        let namespace_uri = index(Present::NAMESPACE, stream)?;
        let locale = index(Present::LOCALE, stream)?;
        let localized_text = index(Present::LOCALIZED_TEXT, stream)?;

        let additional_info = if present.contains(Present::ADDITIONAL_INFO) {
            Some(UAString::decode(stream, decoding_options)?)
        } else {
            None
        };
        let inner_status_code = if present.contains(Present::INNER_STATUS_CODE) {
            Some(StatusCode::decode(stream, decoding_options)?)
        } else {
            None
        };
        let inner_diagnostic_info = if present.contains(Present::INNER_DIAGNOSTIC_INFO) {
            // Diagnostics nest, so each level counts against the depth limit
            let _depth_lock = decoding_options.depth_lock()?;
            Some(Box::new(DiagnosticInfo::decode(stream, decoding_options)?))
        } else {
            None
        };

        Ok(DiagnosticInfo {
            symbolic_id,
            namespace_uri,
            locale,
            localized_text,
            additional_info,
            inner_status_code,
            inner_diagnostic_info,
        })
    }
}
