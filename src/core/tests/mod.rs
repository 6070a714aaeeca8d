// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use crate::core::comms::secure_channel::{Role, SecureChannel};
use crate::crypto::SecurityPolicy;
use crate::types::{service_types::ChannelSecurityToken, DateTime, MessageSecurityMode};

mod chunk;

/// A client and a server channel with matching keys, so each side can read what the other
/// secures.
pub fn keyed_channel_pair(
    security_policy: SecurityPolicy,
    security_mode: MessageSecurityMode,
) -> (SecureChannel, SecureChannel) {
    let mut client = SecureChannel::new_no_certificate_store();
    let mut server = SecureChannel::new_no_certificate_store();
    for (channel, role) in [(&mut client, Role::Client), (&mut server, Role::Server)] {
        *channel = SecureChannel::new_with_keys(role, None, None, channel.decoding_options());
        channel.set_security_policy(security_policy);
        channel.set_security_mode(security_mode);
        channel.create_random_nonce();
        channel.set_security_token(ChannelSecurityToken {
            channel_id: 7,
            token_id: 1,
            created_at: DateTime::now(),
            revised_lifetime: 60000,
        });
    }
    let client_nonce = client.local_nonce().to_vec();
    let server_nonce = server.local_nonce().to_vec();
    client.set_remote_nonce(&server_nonce);
    server.set_remote_nonce(&client_nonce);
    client.derive_keys().unwrap();
    server.derive_keys().unwrap();
    (client, server)
}
