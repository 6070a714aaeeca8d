// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The core module holds functionality underneath the client session: message chunking, the
//! secure channel, the TCP codec and the handshake messages.

/// Contains debugging utility helper functions
pub mod debug {
    /// Prints out the content of a slice in hex and visible char format to aid debugging. Format
    /// is similar to corresponding functionality in node-opcua
    pub fn log_buffer(message: &str, buf: &[u8]) {
        // No point doing anything unless trace level is on
        if !log_enabled!(target: "hex", log::Level::Trace) {
            return;
        }

        let line_len = 32;
        trace!(target: "hex", "{}", message);

        for (line, chunk) in buf.chunks(line_len).enumerate() {
            let mut hex_line = format!("{:08x}: ", line * line_len);
            let mut char_line = String::with_capacity(line_len);
            for value in chunk {
                hex_line.push_str(&format!(" {:02x}", value));
                char_line.push(if (32..=126).contains(value) {
                    *value as char
                } else {
                    '.'
                });
            }
            for _ in chunk.len()..line_len {
                hex_line.push_str("   ");
            }
            trace!(target: "hex", "{} {}", hex_line, char_line);
        }
    }
}

#[cfg(test)]
mod tests;

pub mod constants {
    /// Default OPC UA port number, used implicitly in opc.tcp:// urls that omit the port.
    pub const DEFAULT_OPC_UA_SERVER_PORT: u16 = 4840;
}

pub mod comms;
pub mod config;
pub mod handle;
#[rustfmt::skip]
pub mod supported_message;
