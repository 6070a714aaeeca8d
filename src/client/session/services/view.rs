// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::{
    client::{
        session::{session_debug, session_error, unpack_response},
        Error, Session,
    },
    types::{
        BrowseDescription, BrowseNextRequest, BrowseRequest, BrowseResult, ByteString,
        ViewDescription,
    },
};

use super::one_per_operation;

impl Session {
    /// Follows the references of nodes (Browse, Part 4 5.8.2).
    ///
    /// `max_references_per_node` of 0 leaves the limit to the server. A node with more
    /// references than fit gets a continuation point for [`Session::browse_next`]. With no
    /// `view` the whole address space is browsed.
    pub async fn browse(
        &self,
        nodes_to_browse: &[BrowseDescription],
        max_references_per_node: u32,
        view: Option<ViewDescription>,
    ) -> Result<Vec<BrowseResult>, Error> {
        if nodes_to_browse.is_empty() {
            session_error!(self, "Nothing to browse");
            return Err(Error::InvalidArgument("no nodes to browse".into()));
        }
        let request = BrowseRequest {
            request_header: self.make_request_header(),
            view: view.unwrap_or_default(),
            requested_max_references_per_node: max_references_per_node,
            nodes_to_browse: Some(nodes_to_browse.to_vec()),
        };
        let response = unpack_response!(self, self.send(request).await?, BrowseResponse, "browse");
        session_debug!(self, "Browsed {} nodes", nodes_to_browse.len());
        Ok(one_per_operation(response.results, nodes_to_browse.len())?)
    }

    /// BrowseNext, Part 4 5.8.3. With `release_continuation_points` the server only frees the
    /// points and sends no references.
    pub async fn browse_next(
        &self,
        release_continuation_points: bool,
        continuation_points: &[ByteString],
    ) -> Result<Vec<BrowseResult>, Error> {
        if continuation_points.is_empty() {
            return Err(Error::InvalidArgument("no continuation points".into()));
        }
        let request = BrowseNextRequest {
            request_header: self.make_request_header(),
            continuation_points: Some(continuation_points.to_vec()),
            release_continuation_points,
        };
        let response = unpack_response!(
            self,
            self.send(request).await?,
            BrowseNextResponse,
            "browse_next"
        );
        Ok(one_per_operation(response.results, continuation_points.len())?)
    }

    /// Browses every node to the end, following continuation points with `BrowseNext`. The
    /// references of each node are gathered into a single result.
    pub async fn browse_all(
        &self,
        nodes_to_browse: &[BrowseDescription],
    ) -> Result<Vec<BrowseResult>, Error> {
        let mut results = self.browse(nodes_to_browse, 0, None).await?;
        loop {
            let pending: Vec<(usize, ByteString)> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.status_code.is_good() && !r.continuation_point.is_empty())
                .map(|(idx, r)| (idx, r.continuation_point.clone()))
                .collect();
            if pending.is_empty() {
                break;
            }
            let points: Vec<ByteString> = pending.iter().map(|(_, p)| p.clone()).collect();
            let next = self.browse_next(false, &points).await?;
            for ((idx, _), next) in pending.into_iter().zip(next) {
                let result = &mut results[idx];
                result.continuation_point = next.continuation_point;
                if next.status_code.is_bad() {
                    result.status_code = next.status_code;
                    result.continuation_point = ByteString::null();
                }
                if let Some(more) = next.references {
                    result.references.get_or_insert_with(Vec::new).extend(more);
                }
            }
        }
        Ok(results)
    }
}
