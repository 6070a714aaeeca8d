// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The `BinaryEncoder` trait, decoding limits and the little endian primitives every other type
//! is encoded with.

use std::{
    fmt::Debug,
    io::{self, Cursor, Read, Write},
    sync::Arc,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::Duration;

use crate::{
    sync::Mutex,
    types::{constants, status_code::StatusCode},
};

pub type EncodingResult<T> = std::result::Result<T, StatusCode>;

/// Tracks how deeply nested the value being decoded is. Variants, data values, diagnostics and
/// extension objects can contain themselves, so each of them takes a [`DepthLock`] first.
#[derive(Debug)]
pub struct DepthGauge {
    /// Decoding fails once `current_depth` reaches this
    pub(crate) max_depth: usize,
    pub(crate) current_depth: usize,
}

impl Default for DepthGauge {
    fn default() -> Self {
        Self::with_max_depth(constants::MAX_DECODING_DEPTH)
    }
}

impl DepthGauge {
    fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            current_depth: 0,
        }
    }

    pub fn minimal() -> Self {
        Self::with_max_depth(1)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn current_depth(&self) -> usize {
        self.current_depth
    }
}

/// One level of nesting held on a [`DepthGauge`]. The level is given back on drop, so a decode
/// that fails half way leaves the gauge where it found it.
#[derive(Debug)]
pub struct DepthLock {
    depth_gauge: Arc<Mutex<DepthGauge>>,
}

impl DepthLock {
    pub fn obtain(depth_gauge: Arc<Mutex<DepthGauge>>) -> EncodingResult<DepthLock> {
        {
            let mut gauge = trace_lock!(depth_gauge);
            if gauge.current_depth >= gauge.max_depth {
                warn!(
                    "Value is nested deeper than the limit of {}, decoding stops",
                    gauge.max_depth
                );
                return Err(StatusCode::BadDecodingError);
            }
            gauge.current_depth += 1;
        }
        Ok(Self { depth_gauge })
    }
}

impl Drop for DepthLock {
    fn drop(&mut self) {
        let mut gauge = trace_lock!(self.depth_gauge);
        gauge.current_depth = gauge.current_depth.saturating_sub(1);
    }
}

/// Limits applied while decoding anything received from the server.
#[derive(Clone, Debug)]
pub struct DecodingOptions {
    /// Added to the server's clock when timestamps are decoded. Only set when the client is
    /// told to ignore clock skew.
    pub client_offset: Duration,
    /// 0 is no limit
    pub max_message_size: usize,
    /// 0 is no limit
    pub max_chunk_count: usize,
    /// Longest string in bytes. Unlike the message limits, 0 really means no strings.
    pub max_string_length: usize,
    pub max_byte_string_length: usize,
    pub max_array_length: usize,
    pub decoding_depth_gauge: Arc<Mutex<DepthGauge>>,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        DecodingOptions {
            client_offset: Duration::zero(),
            max_message_size: constants::MAX_MESSAGE_SIZE,
            max_chunk_count: constants::MAX_CHUNK_COUNT,
            max_string_length: constants::MAX_STRING_LENGTH,
            max_byte_string_length: constants::MAX_BYTE_STRING_LENGTH,
            max_array_length: constants::MAX_ARRAY_LENGTH,
            decoding_depth_gauge: Arc::new(Mutex::new(DepthGauge::default())),
        }
    }
}

impl DecodingOptions {
    /// Tight limits for small payloads such as the body of an extension object.
    pub fn minimal() -> Self {
        const SMALL: usize = 8192;
        DecodingOptions {
            max_string_length: SMALL,
            max_byte_string_length: SMALL,
            max_array_length: SMALL,
            decoding_depth_gauge: Arc::new(Mutex::new(DepthGauge::minimal())),
            ..Default::default()
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self::default()
    }

    pub fn depth_lock(&self) -> EncodingResult<DepthLock> {
        DepthLock::obtain(Arc::clone(&self.decoding_depth_gauge))
    }
}

/// OPC UA binary encoding, Part 6 section 5.2.
pub trait BinaryEncoder<T> {
    /// The number of bytes `encode` writes.
    fn byte_len(&self) -> usize;

    /// Writes the value and returns the number of bytes written.
    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize>;

    /// Reads a value. Anything breaking a limit in `decoding_options` fails with
    /// `BadDecodingError` before more of the stream is consumed than necessary.
    fn decode<S: Read>(stream: &mut S, decoding_options: &DecodingOptions) -> EncodingResult<T>;

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::with_capacity(self.byte_len()));
        // Writing into a Vec cannot fail
        let _ = self.encode(&mut buffer);
        buffer.into_inner()
    }
}

/// An array is an Int32 count then its elements. A count of -1 is the null array, which is
/// not the same value as the empty array.
impl<T> BinaryEncoder<Option<Vec<T>>> for Option<Vec<T>>
where
    T: BinaryEncoder<T>,
{
    fn byte_len(&self) -> usize {
        byte_len_array(self)
    }

    fn encode<S: Write>(&self, stream: &mut S) -> EncodingResult<usize> {
        write_array(stream, self)
    }

    fn decode<S: Read>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Option<Vec<T>>> {
        read_array(stream, decoding_options)
    }
}

pub fn process_encode_io_result<T>(result: io::Result<T>) -> EncodingResult<T> {
    result.map_err(|err| {
        trace!("Encoding failed, {}", err);
        StatusCode::BadEncodingError
    })
}

pub fn process_decode_io_result<T>(result: io::Result<T>) -> EncodingResult<T>
where
    T: Debug,
{
    result.map_err(|err| {
        trace!("Decoding failed, {}", err);
        StatusCode::BadDecodingError
    })
}

pub fn byte_len_array<T: BinaryEncoder<T>>(values: &Option<Vec<T>>) -> usize {
    let elements: usize = values
        .iter()
        .flat_map(|v| v.iter())
        .map(BinaryEncoder::byte_len)
        .sum();
    4 + elements
}

pub fn write_array<S: Write, T: BinaryEncoder<T>>(
    stream: &mut S,
    values: &Option<Vec<T>>,
) -> EncodingResult<usize> {
    let Some(values) = values else {
        return write_i32(stream, -1);
    };
    let count = i32::try_from(values.len()).map_err(|_| {
        error!("An array of {} elements is too long to encode", values.len());
        StatusCode::BadEncodingError
    })?;
    values
        .iter()
        .try_fold(write_i32(stream, count)?, |size, value| {
            Ok(size + value.encode(stream)?)
        })
}

pub fn read_array<S: Read, T: BinaryEncoder<T>>(
    stream: &mut S,
    decoding_options: &DecodingOptions,
) -> EncodingResult<Option<Vec<T>>> {
    let len = match read_i32(stream)? {
        -1 => return Ok(None),
        len if len < -1 => {
            error!("Array has the invalid length {}", len);
            return Err(StatusCode::BadDecodingError);
        }
        len => len as usize,
    };
    if len > decoding_options.max_array_length {
        error!(
            "Array of {} elements is over the limit of {}",
            len, decoding_options.max_array_length
        );
        return Err(StatusCode::BadEncodingLimitsExceeded);
    }
    (0..len)
        .map(|_| T::decode(stream, decoding_options))
        .collect::<EncodingResult<Vec<T>>>()
        .map(Some)
}

pub fn write_all(stream: &mut dyn Write, buf: &[u8]) -> EncodingResult<usize> {
    process_encode_io_result(stream.write_all(buf))?;
    Ok(buf.len())
}

/// Writes `count` copies of `value`, as used for padding.
pub fn write_bytes(stream: &mut dyn Write, value: u8, count: usize) -> EncodingResult<usize> {
    const BLOCK: usize = 64;
    let block = [value; BLOCK];
    let mut remaining = count;
    while remaining > 0 {
        let n = remaining.min(BLOCK);
        write_all(stream, &block[..n])?;
        remaining -= n;
    }
    Ok(count)
}

pub fn read_bytes(stream: &mut dyn Read, buf: &mut [u8]) -> EncodingResult<usize> {
    process_decode_io_result(stream.read_exact(buf))?;
    Ok(buf.len())
}

/// Octets preceded by their Int32 length, where a length of -1 stands for null.
pub(crate) fn write_sized(stream: &mut dyn Write, value: Option<&[u8]>) -> EncodingResult<usize> {
    let Some(value) = value else {
        return write_i32(stream, -1);
    };
    let len = i32::try_from(value.len()).map_err(|_| StatusCode::BadEncodingError)?;
    Ok(write_i32(stream, len)? + write_all(stream, value)?)
}

/// Reads what [`write_sized`] writes, refusing anything longer than `limit`.
pub(crate) fn read_sized(
    stream: &mut dyn Read,
    limit: usize,
    what: &str,
) -> EncodingResult<Option<Vec<u8>>> {
    let len = match read_i32(stream)? {
        -1 => return Ok(None),
        len if len < -1 => {
            error!("{} has the invalid length {}", what, len);
            return Err(StatusCode::BadDecodingError);
        }
        len => len as usize,
    };
    if len > limit {
        error!("{} of {} bytes is over the limit of {}", what, len, limit);
        return Err(StatusCode::BadDecodingError);
    }
    let mut buf = vec![0u8; len];
    read_bytes(stream, &mut buf)?;
    Ok(Some(buf))
}

pub fn write_u8<T>(stream: &mut dyn Write, value: T) -> EncodingResult<usize>
where
    T: Into<u8>,
{
    process_encode_io_result(stream.write_u8(value.into()))?;
    Ok(1)
}

pub fn read_u8(stream: &mut dyn Read) -> EncodingResult<u8> {
    process_decode_io_result(stream.read_u8())
}

// Multi byte scalars are all little endian
macro_rules! little_endian {
    ($($ty:ty, $size:expr, $write:ident, $read:ident;)*) => {
        $(
            pub fn $write<T>(stream: &mut dyn Write, value: T) -> EncodingResult<usize>
            where
                T: Into<$ty>,
            {
                process_encode_io_result(stream.$write::<LittleEndian>(value.into()))?;
                Ok($size)
            }

            pub fn $read(stream: &mut dyn Read) -> EncodingResult<$ty> {
                process_decode_io_result(stream.$read::<LittleEndian>())
            }
        )*
    };
}

little_endian! {
    i16, 2, write_i16, read_i16;
    u16, 2, write_u16, read_u16;
    i32, 4, write_i32, read_i32;
    u32, 4, write_u32, read_u32;
    i64, 8, write_i64, read_i64;
    u64, 8, write_u64, read_u64;
    f32, 4, write_f32, read_f32;
    f64, 8, write_f64, read_f64;
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn scalars_are_little_endian() {
        let mut out = Cursor::new(Vec::new());
        assert_eq!(write_u16(&mut out, 0x0102u16).unwrap(), 2);
        assert_eq!(write_i32(&mut out, -2i32).unwrap(), 4);
        assert_eq!(
            out.get_ref().as_slice(),
            &[0x02, 0x01, 0xfe, 0xff, 0xff, 0xff]
        );

        let mut input = Cursor::new(out.into_inner());
        assert_eq!(read_u16(&mut input).unwrap(), 0x0102);
        assert_eq!(read_i32(&mut input).unwrap(), -2);
        assert_eq!(read_u8(&mut input), Err(StatusCode::BadDecodingError));
    }

    #[test]
    fn padding_spans_blocks() {
        let mut out = Cursor::new(Vec::new());
        assert_eq!(write_bytes(&mut out, 0xaa, 150).unwrap(), 150);
        assert_eq!(out.get_ref().len(), 150);
        assert!(out.get_ref().iter().all(|b| *b == 0xaa));
    }

    #[test]
    fn array_over_the_limit_is_rejected() {
        let options = DecodingOptions {
            max_array_length: 2,
            ..DecodingOptions::test()
        };
        let three: Option<Vec<u32>> = Some(vec![1, 2, 3]);
        let mut stream = Cursor::new(three.encode_to_vec());
        assert_eq!(
            <Option<Vec<u32>>>::decode(&mut stream, &options),
            Err(StatusCode::BadDecodingError)
        );

        let mut stream = Cursor::new(vec![0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(
            <Option<Vec<u32>>>::decode(&mut stream, &options),
            Err(StatusCode::BadDecodingError)
        );
    }
}
