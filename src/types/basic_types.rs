// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Binary encoding of the simple scalar types.
//!
//! | UA      | Rust   |
//! |---------|--------|
//! | Boolean | `bool` |
//! | SByte   | `i8`   |
//! | Byte    | `u8`   |
//! | Int16   | `i16`  |
//! | UInt16  | `u16`  |
//! | Int32   | `i32`  |
//! | UInt32  | `u32`  |
//! | Int64   | `i64`  |
//! | UInt64  | `u64`  |
//! | Float   | `f32`  |
//! | Double  | `f64`  |

use std::io::{Read, Write};

use crate::types::encoding::*;

/// Identifiers handed out by the server (request handles, subscription ids, sequence numbers).
pub type IntegerId = u32;

impl BinaryEncoder<bool> for bool {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u8(stream, u8::from(*self))
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        // Any non-zero value is true
        Ok(read_u8(stream)? != 0)
    }
}

impl BinaryEncoder<i8> for i8 {
    fn byte_len(&self) -> usize {
        1
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_u8(stream, *self as u8)
    }

    fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(read_u8(stream)? as i8)
    }
}

macro_rules! fixed_size_encoder {
    ( $t:ty, $size:expr, $write:ident, $read:ident ) => {
        impl BinaryEncoder<$t> for $t {
            fn byte_len(&self) -> usize {
                $size
            }

            fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
                $write(stream, *self)
            }

            fn decode<S: Read>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
                $read(stream)
            }
        }
    };
}

fixed_size_encoder!(u8, 1, write_u8, read_u8);
fixed_size_encoder!(i16, 2, write_i16, read_i16);
fixed_size_encoder!(u16, 2, write_u16, read_u16);
fixed_size_encoder!(i32, 4, write_i32, read_i32);
fixed_size_encoder!(u32, 4, write_u32, read_u32);
fixed_size_encoder!(i64, 8, write_i64, read_i64);
fixed_size_encoder!(u64, 8, write_u64, read_u64);
fixed_size_encoder!(f32, 4, write_f32, read_f32);
fixed_size_encoder!(f64, 8, write_f64, read_f64);
