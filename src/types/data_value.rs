// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::io::{Read, Write};

use crate::types::{
    byte_string::ByteString, date_time::*, encoding::*, guid::Guid,
    localized_text::LocalizedText, node_id::NodeId, qualified_name::QualifiedName,
    status_code::StatusCode, string::UAString, variant::Variant,
};

bitflags! {
    /// Which of the optional fields follow the mask. Picoseconds only count with their timestamp.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Fields: u8 {
        const VALUE = 0x1;
        const STATUS = 0x2;
        const SOURCE_TIMESTAMP = 0x4;
        const SERVER_TIMESTAMP = 0x8;
        const SOURCE_PICOSECONDS = 0x10;
        const SERVER_PICOSECONDS = 0x20;
    }
}

/// A value with its status and timestamps. Every field is optional on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Option<Variant>,
    /// None means Good
    pub status: Option<StatusCode>,
    pub source_timestamp: Option<DateTime>,
    /// 10 picosecond intervals added to the source timestamp, ignored without one
    pub source_picoseconds: Option<u16>,
    pub server_timestamp: Option<DateTime>,
    /// 10 picosecond intervals added to the server timestamp, ignored without one
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    pub fn null() -> DataValue {
        DataValue::default()
    }

    pub fn value_only<V>(value: V) -> DataValue
    where
        V: Into<Variant>,
    {
        DataValue {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// A good value with both timestamps set to now.
    pub fn new_now<V>(value: V) -> DataValue
    where
        V: Into<Variant>,
    {
        let now = DateTime::now();
        DataValue {
            status: Some(StatusCode::Good),
            source_timestamp: Some(now),
            server_timestamp: Some(now),
            ..DataValue::value_only(value)
        }
    }

    pub fn status_only(status: StatusCode) -> DataValue {
        DataValue {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::Good)
    }

    pub fn is_valid(&self) -> bool {
        self.status().is_good()
    }

    fn fields(&self) -> Fields {
        let source = self.source_timestamp.is_some();
        let server = self.server_timestamp.is_some();
        let mut fields = Fields::empty();
        fields.set(Fields::VALUE, self.value.is_some());
        fields.set(Fields::STATUS, self.status.is_some());
        fields.set(Fields::SOURCE_TIMESTAMP, source);
        fields.set(Fields::SOURCE_PICOSECONDS, source && self.source_picoseconds.is_some());
        fields.set(Fields::SERVER_TIMESTAMP, server);
        fields.set(Fields::SERVER_PICOSECONDS, server && self.server_picoseconds.is_some());
        fields
    }
}

/// Decodes a `T` when `field` is in the mask.
fn read_field<S: Read, T: BinaryEncoder<T>>(
    stream: &mut S,
    fields: Fields,
    field: Fields,
    decoding_options: &DecodingOptions,
) -> EncodingResult<Option<T>> {
    if fields.contains(field) {
        T::decode(stream, decoding_options).map(Some)
    } else {
        Ok(None)
    }
}

impl BinaryEncoder<DataValue> for DataValue {
    fn byte_len(&self) -> usize {
        let fields = self.fields();
        let fixed: [(Fields, usize); 5] = [
            (Fields::STATUS, 4),
            (Fields::SOURCE_TIMESTAMP, 8),
            (Fields::SOURCE_PICOSECONDS, 2),
            (Fields::SERVER_TIMESTAMP, 8),
            (Fields::SERVER_PICOSECONDS, 2),
        ];
        let fixed: usize = fixed
            .iter()
            .filter(|(field, _)| fields.contains(*field))
            .map(|(_, len)| len)
            .sum();
        1 + fixed + self.value.as_ref().map_or(0, |value| value.byte_len())
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        let fields = self.fields();
        let mut size = write_u8(stream, fields.bits())?;
        if let Some(value) = &self.value {
            size += value.encode(stream)?;
        }
        if let Some(status) = &self.status {
            size += status.encode(stream)?;
        }
        if let Some(timestamp) = &self.source_timestamp {
            size += timestamp.encode(stream)?;
            if fields.contains(Fields::SOURCE_PICOSECONDS) {
                size += write_u16(stream, self.source_picoseconds.unwrap_or_default())?;
            }
        }
        if let Some(timestamp) = &self.server_timestamp {
            size += timestamp.encode(stream)?;
            if fields.contains(Fields::SERVER_PICOSECONDS) {
                size += write_u16(stream, self.server_picoseconds.unwrap_or_default())?;
            }
        }
        Ok(size)
    }

    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<Self> {
        let fields = Fields::from_bits_truncate(read_u8(stream)?);

        let value = if fields.contains(Fields::VALUE) {
            let _depth_lock = decoding_options.depth_lock()?;
            Some(Variant::decode(stream, decoding_options)?)
        } else {
            None
        };
        let status = read_field(stream, fields, Fields::STATUS, decoding_options)?;
        // Clock skew is only corrected on the server's own timestamps
        let source_options = DecodingOptions {
            client_offset: chrono::Duration::zero(),
            ..decoding_options.clone()
        };
        let source_timestamp: Option<DateTime> =
            read_field(stream, fields, Fields::SOURCE_TIMESTAMP, &source_options)?;
        let source_picoseconds =
            read_field(stream, fields, Fields::SOURCE_PICOSECONDS, decoding_options)?;
        let server_timestamp: Option<DateTime> =
            read_field(stream, fields, Fields::SERVER_TIMESTAMP, decoding_options)?;
        let server_picoseconds =
            read_field(stream, fields, Fields::SERVER_PICOSECONDS, decoding_options)?;

        Ok(DataValue {
            value,
            status,
            source_picoseconds: source_timestamp.and(source_picoseconds),
            source_timestamp,
            server_picoseconds: server_timestamp.and(server_picoseconds),
            server_timestamp,
        })
    }
}

macro_rules! data_value_from {
    ( $( $t:ty ),* ) => {
        $(
            impl From<$t> for DataValue {
                fn from(v: $t) -> Self {
                    DataValue::value_only(v)
                }
            }
        )*
    };
}

data_value_from!(
    Variant, bool, i8, u8, i16, u16, i32, u32, i64, u64, f32, f64, &str, String, UAString,
    DateTime, Guid, StatusCode, ByteString, QualifiedName, LocalizedText, NodeId
);

impl From<(Variant, StatusCode)> for DataValue {
    fn from((value, status): (Variant, StatusCode)) -> Self {
        DataValue {
            value: Some(value),
            status: Some(status),
            ..Default::default()
        }
    }
}
