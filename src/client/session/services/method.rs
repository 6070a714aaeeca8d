// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::{
    client::{
        session::{session_debug, session_error, unpack_response},
        Error, Session,
    },
    types::{CallMethodRequest, CallMethodResult, CallRequest, NodeId, StatusCode, Variant},
};

use super::one_per_operation;

impl Session {
    /// Calls methods (Call, Part 4 5.11.2). A method that fails on the server does not fail the
    /// call, its result carries the bad status.
    pub async fn call(
        &self,
        methods: Vec<CallMethodRequest>,
    ) -> Result<Vec<CallMethodResult>, Error> {
        if methods.is_empty() {
            session_error!(self, "No methods to call");
            return Err(Error::InvalidArgument("no methods to call".into()));
        }
        let count = methods.len();
        session_debug!(self, "Calling {} methods", count);
        let request = CallRequest {
            request_header: self.make_request_header(),
            methods_to_call: Some(methods),
        };
        let response = unpack_response!(self, self.send(request).await?, CallResponse, "call");
        Ok(one_per_operation(response.results, count)?)
    }

    /// Calls one method of an object.
    pub async fn call_one(
        &self,
        object_id: NodeId,
        method_id: NodeId,
        input_arguments: Option<Vec<Variant>>,
    ) -> Result<CallMethodResult, Error> {
        let method = CallMethodRequest {
            object_id,
            method_id,
            input_arguments,
        };
        self.call(vec![method])
            .await?
            .pop()
            .ok_or(Error::Protocol(StatusCode::BadUnknownResponse))
    }
}
