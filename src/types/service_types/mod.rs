// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The service request / response messages and the structures they are built from. Only the
//! services the client uses are defined.

use crate::types::node_ids::ObjectId;

/// Implemented by messages and by structures carried inside extension objects
pub trait MessageInfo {
    /// The object id associated with the message
    fn object_id(&self) -> ObjectId;
}

/// Declares a structure whose binary encoding is its fields in order. An object id after the
/// name implements `MessageInfo` for it.
macro_rules! ua_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident $( = $object_id:ident )? {
            $( $(#[$fmeta:meta])* pub $field:ident : $ftype:ty, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $( $(#[$fmeta])* pub $field: $ftype, )*
        }

        $(
            impl $crate::types::service_types::MessageInfo for $name {
                fn object_id(&self) -> $crate::types::node_ids::ObjectId {
                    $crate::types::node_ids::ObjectId::$object_id
                }
            }
        )?

        impl $crate::types::encoding::BinaryEncoder<$name> for $name {
            #[allow(unused_mut)]
            fn byte_len(&self) -> usize {
                let mut size = 0;
                $( size += $crate::types::encoding::BinaryEncoder::byte_len(&self.$field); )*
                size
            }

            #[allow(unused_mut)]
            fn encode<S: std::io::Write>(
                &self,
                stream: &mut S,
            ) -> $crate::types::encoding::EncodingResult<usize> {
                let mut size = 0;
                $( size += $crate::types::encoding::BinaryEncoder::encode(&self.$field, stream)?; )*
                Ok(size)
            }

            #[allow(unused_variables)]
            fn decode<S: std::io::Read>(
                stream: &mut S,
                decoding_options: &$crate::types::encoding::DecodingOptions,
            ) -> $crate::types::encoding::EncodingResult<Self> {
                $(
                    let $field = <$ftype as $crate::types::encoding::BinaryEncoder<$ftype>>::decode(
                        stream,
                        decoding_options,
                    )?;
                )*
                Ok($name { $( $field, )* })
            }
        }
    };
}

/// Declares an enumeration, encoded as an Int32
macro_rules! ua_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )*
        }

        impl TryFrom<i32> for $name {
            type Error = $crate::types::status_code::StatusCode;

            fn try_from(value: i32) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok($name::$variant), )*
                    value => {
                        error!("Invalid value {} for enum {}", value, stringify!($name));
                        Err($crate::types::status_code::StatusCode::BadDecodingError)
                    }
                }
            }
        }

        impl $crate::types::encoding::BinaryEncoder<$name> for $name {
            fn byte_len(&self) -> usize {
                4
            }

            fn encode<S: std::io::Write>(
                &self,
                stream: &mut S,
            ) -> $crate::types::encoding::EncodingResult<usize> {
                $crate::types::encoding::write_i32(stream, *self as i32)
            }

            fn decode<S: std::io::Read>(
                stream: &mut S,
                _: &$crate::types::encoding::DecodingOptions,
            ) -> $crate::types::encoding::EncodingResult<Self> {
                $name::try_from($crate::types::encoding::read_i32(stream)?)
            }
        }
    };
}

mod attributes;
mod endpoints;
mod enums;
mod headers;
mod method;
mod monitored_item;
mod notification;
mod secure_channel;
mod session;
mod subscription;
mod view;

pub use self::{
    attributes::*, endpoints::*, enums::*, headers::*, method::*, monitored_item::*,
    notification::*, secure_channel::*, session::*, subscription::*, view::*,
};
