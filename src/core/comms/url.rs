// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Endpoint url helpers. Urls without a port are taken to use 4840.

use url::Url;

use crate::core::constants::DEFAULT_OPC_UA_SERVER_PORT;
use crate::types::status_code::StatusCode;

pub const OPC_TCP_SCHEME: &str = "opc.tcp";

fn parse(s: &str) -> Result<Url, ()> {
    Url::parse(s).map_err(|e| error!("\"{}\" is not a url, {}", s, e))
}

/// Parses with the default port filled in.
fn opc_url(s: &str) -> Result<Url, ()> {
    let mut url = parse(s)?;
    if url.port().is_none() {
        url.set_port(Some(DEFAULT_OPC_UA_SERVER_PORT))?;
    }
    Ok(url)
}

pub fn url_with_replaced_hostname(url: &str, hostname: &str) -> Result<String, ()> {
    let mut url = opc_url(url)?;
    url.set_host(Some(hostname))
        .map_err(|e| error!("\"{}\" cannot be a host name, {}", hostname, e))?;
    Ok(url.into())
}

/// True when the urls differ at most in their host. Servers often report endpoints under
/// another name than the one that was dialled, `localhost` for `127.0.0.1` say.
pub fn url_matches_except_host(url1: &str, url2: &str) -> bool {
    let without_host = |s: &str| {
        let mut url = opc_url(s).ok()?;
        url.set_host(Some("host")).ok()?;
        Some(url)
    };
    match (without_host(url1), without_host(url2)) {
        (Some(url1), Some(url2)) => url1 == url2,
        _ => false,
    }
}

/// Just the scheme, host and port of an endpoint url. The default port is left out.
pub fn server_url_from_endpoint_url(endpoint_url: &str) -> Result<String, ()> {
    let mut url = opc_url(endpoint_url)?;
    url.set_query(None);
    if url.port() == Some(DEFAULT_OPC_UA_SERVER_PORT) {
        url.set_port(None)?;
    }
    Ok(url.into())
}

pub fn is_opc_ua_binary_url(url: &str) -> bool {
    matches!(opc_url(url), Ok(url) if url.scheme() == OPC_TCP_SCHEME)
}

pub fn hostname_from_url(url: &str) -> Result<String, ()> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned))
        .ok_or(())
}

/// The host and port to dial for an `opc.tcp` url.
pub fn hostname_port_from_url(url: &str, default_port: u16) -> Result<(String, u16), StatusCode> {
    let url = Url::parse(url).map_err(|_| StatusCode::BadTcpEndpointUrlInvalid)?;
    match url.host_str() {
        Some(host) if url.scheme() == OPC_TCP_SCHEME => {
            Ok((host.to_owned(), url.port().unwrap_or(default_port)))
        }
        _ => Err(StatusCode::BadTcpEndpointUrlInvalid),
    }
}
