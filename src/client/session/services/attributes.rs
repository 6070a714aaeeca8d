// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::{
    client::{
        session::{session_debug, session_error, unpack_response},
        Error, Session,
    },
    types::{DataValue, ReadRequest, ReadValueId, StatusCode, TimestampsToReturn, WriteRequest, WriteValue},
};

use super::one_per_operation;

impl Session {
    /// Reads attributes of nodes (Read, Part 4 5.10.2).
    ///
    /// A `max_age` of 0 makes the server go to the data source instead of a cache. The values
    /// line up with `nodes_to_read`, and a node that could not be read has a bad status in its
    /// value rather than failing the call.
    pub async fn read(
        &self,
        nodes_to_read: &[ReadValueId],
        timestamps_to_return: TimestampsToReturn,
        max_age: f64,
    ) -> Result<Vec<DataValue>, Error> {
        if nodes_to_read.is_empty() {
            session_error!(self, "Nothing to read");
            return Err(Error::InvalidArgument("no nodes to read".into()));
        }
        session_debug!(self, "Reading {:?}", nodes_to_read);
        let request = ReadRequest {
            request_header: self.make_request_header(),
            max_age,
            timestamps_to_return,
            nodes_to_read: Some(nodes_to_read.to_vec()),
        };
        let response = unpack_response!(self, self.send(request).await?, ReadResponse, "read");
        Ok(one_per_operation(response.results, nodes_to_read.len())?)
    }

    /// Writes attribute values (Write, Part 4 5.10.4). Each value gets its own status, in the
    /// order of `nodes_to_write`.
    pub async fn write(&self, nodes_to_write: &[WriteValue]) -> Result<Vec<StatusCode>, Error> {
        if nodes_to_write.is_empty() {
            session_error!(self, "Nothing to write");
            return Err(Error::InvalidArgument("no values to write".into()));
        }
        let request = WriteRequest {
            request_header: self.make_request_header(),
            nodes_to_write: Some(nodes_to_write.to_vec()),
        };
        let response = unpack_response!(self, self.send(request).await?, WriteResponse, "write");
        Ok(one_per_operation(response.results, nodes_to_write.len())?)
    }
}
