// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The published nodes document, a JSON array of entries each naming an endpoint and the
//! nodes to monitor on it.
//!
//! Entries written before versioning describe a single node with
//! `"NodeId": { "Identifier": "..." }`. They are migrated into the current form, which lists
//! the nodes under `"OpcNodes"`, when the document is parsed.

use std::{collections::BTreeMap, fs, path::Path, str::FromStr, time::Duration};

use serde_json::{Map, Value};

use crate::{
    core::comms::url::is_opc_ua_binary_url,
    crypto::SecurityPolicy,
    types::{ExpandedNodeId, MessageSecurityMode, NodeId, StatusCode},
};

use super::{
    facade::EndpointDescriptor, Error, IdentityToken, MonitoredItemRequest, QueueSize,
};

/// The version of published node entries written by this crate
pub const PUBLISHED_NODES_VERSION: u32 = 2;

const OPC_UA_NAMESPACE_URI: &str = "http://opcfoundation.org/UA/";

/// Publishing interval used when neither the node nor its entry sets one
const DEFAULT_PUBLISHING_INTERVAL_MS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpcAuthenticationMode {
    #[default]
    Anonymous,
    UsernamePassword,
}

/// One node to monitor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OpcNode {
    /// Node id in `ns=<n>;<type>=<value>` form, or an expanded node id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Node id in `nsu=<uri>;<type>=<value>` form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opc_publishing_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opc_sampling_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_first: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u32>,
    /// Derive the queue size from the publishing and sampling intervals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_set_queue_size: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discard_new: Option<bool>,
}

impl OpcNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    fn id_text(&self) -> Option<&str> {
        self.expanded_node_id.as_deref().or(self.id.as_deref())
    }

    /// Resolves the id of the node. A namespace uri is looked up in `namespaces`, the
    /// namespace array of the server.
    pub fn node_id(&self, namespaces: &[String]) -> Result<NodeId, Error> {
        let text = self
            .id_text()
            .ok_or_else(|| Error::InvalidArgument("Node has neither an Id nor an ExpandedNodeId".into()))?;
        if text.starts_with("nsu=") || text.starts_with("svr=") {
            let expanded = if text.starts_with("svr=") {
                ExpandedNodeId::from_str(text)
            } else {
                ExpandedNodeId::from_str(&format!("svr=0;{}", text))
            }
            .map_err(|_| Error::InvalidArgument(format!("Invalid expanded node id {}", text)))?;
            resolve_expanded(expanded, namespaces)
        } else {
            NodeId::from_str(text)
                .map_err(|_| Error::InvalidArgument(format!("Invalid node id {}", text)))
        }
    }

    /// The monitored item request for the node.
    pub fn monitored_item_request(
        &self,
        namespaces: &[String],
    ) -> Result<MonitoredItemRequest, Error> {
        let node_id = self.node_id(namespaces)?;
        let queue_size = if self.auto_set_queue_size.unwrap_or(false) {
            QueueSize::Auto
        } else {
            QueueSize::Fixed(self.queue_size.unwrap_or(1).max(1))
        };
        let sampling_interval = self
            .opc_sampling_interval
            .map(|ms| ms as f64)
            .unwrap_or(-1.0);
        Ok(MonitoredItemRequest::new(node_id)
            .sampling_interval(sampling_interval)
            .queue_size(queue_size)
            .discard_oldest(!self.discard_new.unwrap_or(false)))
    }
}

fn resolve_expanded(expanded: ExpandedNodeId, namespaces: &[String]) -> Result<NodeId, Error> {
    if expanded.server_index != 0 {
        return Err(Error::InvalidArgument(format!(
            "Node {} is on another server",
            expanded
        )));
    }
    if expanded.namespace_uri.is_empty() {
        return Ok(expanded.node_id);
    }
    let uri = expanded.namespace_uri.as_ref();
    let index = if uri == OPC_UA_NAMESPACE_URI {
        Some(0)
    } else {
        namespaces.iter().position(|ns| ns == uri)
    };
    let Some(index) = index else {
        return Err(Error::ServiceFault(StatusCode::BadNodeIdUnknown));
    };
    let mut node_id = expanded.node_id;
    node_id.namespace = index as u16;
    Ok(node_id)
}

/// An endpoint and the nodes published from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublishedNode {
    #[serde(default = "PublishedNode::current_version")]
    pub version: u32,
    pub endpoint_url: String,
    #[serde(default)]
    pub use_security: bool,
    /// Overrides `use_security` when present, e.g. `"Sign"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_security_mode: Option<String>,
    /// Overrides `use_security` when present, e.g. `"Basic256Sha256"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_security_policy: Option<String>,
    #[serde(default)]
    pub opc_authentication_mode: OpcAuthenticationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_authentication_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_authentication_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set_writer_id: Option<String>,
    /// Default publishing interval of the nodes of the entry, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set_publishing_interval: Option<u32>,
    #[serde(default)]
    pub opc_nodes: Vec<OpcNode>,
}

impl PublishedNode {
    fn current_version() -> u32 {
        PUBLISHED_NODES_VERSION
    }

    pub fn new(endpoint_url: impl Into<String>, opc_nodes: Vec<OpcNode>) -> Self {
        Self {
            version: PUBLISHED_NODES_VERSION,
            endpoint_url: endpoint_url.into(),
            use_security: false,
            endpoint_security_mode: None,
            endpoint_security_policy: None,
            opc_authentication_mode: OpcAuthenticationMode::Anonymous,
            opc_authentication_username: None,
            opc_authentication_password: None,
            data_set_writer_id: None,
            data_set_publishing_interval: None,
            opc_nodes,
        }
    }

    /// The publishing interval of `node` within this entry.
    pub fn publishing_interval(&self, node: &OpcNode) -> Duration {
        let ms = node
            .opc_publishing_interval
            .or(self.data_set_publishing_interval)
            .unwrap_or(DEFAULT_PUBLISHING_INTERVAL_MS);
        Duration::from_millis(ms as u64)
    }

    /// The nodes of the entry grouped by publishing interval, each group becomes one
    /// subscription.
    pub fn groups(&self) -> BTreeMap<Duration, Vec<&OpcNode>> {
        let mut groups: BTreeMap<Duration, Vec<&OpcNode>> = BTreeMap::new();
        for node in &self.opc_nodes {
            groups
                .entry(self.publishing_interval(node))
                .or_default()
                .push(node);
        }
        groups
    }

    /// The endpoint to connect to. Security without an explicit policy asks for the
    /// strongest policy this client implements.
    pub fn endpoint_descriptor(&self) -> Result<EndpointDescriptor, Error> {
        let security_mode = match &self.endpoint_security_mode {
            Some(mode) => match MessageSecurityMode::from(mode.as_str()) {
                MessageSecurityMode::Invalid => {
                    return Err(Error::Config(format!("Invalid security mode {}", mode)))
                }
                mode => mode,
            },
            None if self.use_security => MessageSecurityMode::SignAndEncrypt,
            None => MessageSecurityMode::None,
        };
        let security_policy = match &self.endpoint_security_policy {
            Some(policy) => match SecurityPolicy::from_str(policy) {
                Ok(SecurityPolicy::Unknown) | Err(_) => {
                    return Err(Error::Config(format!("Invalid security policy {}", policy)))
                }
                Ok(policy) => policy,
            },
            None if security_mode == MessageSecurityMode::None => SecurityPolicy::None,
            None => SecurityPolicy::Basic256Sha256,
        };
        let identity = match self.opc_authentication_mode {
            OpcAuthenticationMode::Anonymous => IdentityToken::Anonymous,
            OpcAuthenticationMode::UsernamePassword => IdentityToken::UserName(
                self.opc_authentication_username.clone().unwrap_or_default(),
                self.opc_authentication_password.clone().unwrap_or_default(),
            ),
        };
        Ok(EndpointDescriptor::new(&self.endpoint_url)
            .security(security_mode, security_policy)
            .identity(identity))
    }

    fn validate(&self, errors: &mut Vec<String>) {
        if !is_opc_ua_binary_url(&self.endpoint_url) {
            errors.push(format!("Endpoint url {} is not valid", self.endpoint_url));
        }
        if self.opc_nodes.is_empty() {
            errors.push(format!("Entry for {} has no nodes", self.endpoint_url));
        }
        self.opc_nodes
            .iter()
            .filter(|n| n.id_text().is_none())
            .for_each(|_| {
                errors.push(format!(
                    "Entry for {} has a node with neither an Id nor an ExpandedNodeId",
                    self.endpoint_url
                ))
            });
    }
}

/// The whole published nodes document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishedNodes {
    pub entries: Vec<PublishedNode>,
}

impl PublishedNodes {
    pub fn load(path: &Path) -> Result<PublishedNodes, Error> {
        let s = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("Cannot read {}, {}", path.to_string_lossy(), err))
        })?;
        Self::from_json(&s)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let s = serde_json::to_string_pretty(self)
            .map_err(|err| Error::Config(format!("Cannot serialize published nodes, {}", err)))?;
        fs::write(path, s).map_err(|err| {
            Error::Config(format!("Cannot write {}, {}", path.to_string_lossy(), err))
        })
    }

    /// Parses a document, migrating legacy entries, then validates it.
    pub fn from_json(s: &str) -> Result<PublishedNodes, Error> {
        let value: Value = serde_json::from_str(s)
            .map_err(|err| Error::Config(format!("Cannot parse published nodes, {}", err)))?;
        let Value::Array(entries) = value else {
            return Err(Error::Config(
                "Published nodes document must be an array of entries".into(),
            ));
        };
        let entries = entries
            .into_iter()
            .map(|entry| {
                let entry = Self::migrate(entry)?;
                serde_json::from_value::<PublishedNode>(entry).map_err(|err| {
                    Error::Config(format!("Invalid published nodes entry, {}", err))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let nodes = PublishedNodes { entries };
        nodes.validate()?;
        Ok(nodes)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self)
            .map_err(|err| Error::Config(format!("Cannot serialize published nodes, {}", err)))
    }

    /// Moves a legacy `NodeId` into `OpcNodes` and stamps the current version.
    fn migrate(entry: Value) -> Result<Value, Error> {
        let Value::Object(mut entry) = entry else {
            return Err(Error::Config("Published nodes entry must be an object".into()));
        };
        let version = entry
            .get("Version")
            .and_then(Value::as_u64)
            .unwrap_or(1);
        if version > PUBLISHED_NODES_VERSION as u64 {
            return Err(Error::Config(format!(
                "Published nodes version {} is newer than {}",
                version, PUBLISHED_NODES_VERSION
            )));
        }
        if let Some(legacy) = entry.remove("NodeId") {
            let id = match legacy {
                Value::Object(o) => o.get("Identifier").cloned(),
                s @ Value::String(_) => Some(s),
                _ => None,
            }
            .ok_or_else(|| Error::Config("Legacy NodeId has no Identifier".into()))?;
            let mut node = Map::new();
            node.insert("Id".into(), id);
            match entry.get_mut("OpcNodes") {
                Some(Value::Array(nodes)) => nodes.push(Value::Object(node)),
                _ => {
                    entry.insert("OpcNodes".into(), Value::Array(vec![Value::Object(node)]));
                }
            }
        }
        entry.insert("Version".into(), Value::from(PUBLISHED_NODES_VERSION));
        Ok(Value::Object(entry))
    }

    fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        self.entries.iter().for_each(|e| e.validate(&mut errors));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join(", ")))
        }
    }

    /// Folds entries for the same endpoint into one, keeping the order of their nodes.
    pub fn by_endpoint(&self) -> Vec<PublishedNode> {
        let mut merged: Vec<PublishedNode> = Vec::new();
        for entry in &self.entries {
            let existing = merged.iter_mut().find(|m| {
                m.endpoint_url == entry.endpoint_url
                    && m.use_security == entry.use_security
                    && m.endpoint_security_mode == entry.endpoint_security_mode
                    && m.endpoint_security_policy == entry.endpoint_security_policy
                    && m.opc_authentication_mode == entry.opc_authentication_mode
                    && m.opc_authentication_username == entry.opc_authentication_username
                    && m.data_set_publishing_interval == entry.data_set_publishing_interval
            });
            match existing {
                Some(m) => m.opc_nodes.extend(entry.opc_nodes.iter().cloned()),
                None => merged.push(entry.clone()),
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_entries_migrate_to_opc_nodes() {
        let doc = r#"[
            { "EndpointUrl": "opc.tcp://localhost:50000", "NodeId": { "Identifier": "i=2258" } },
            { "EndpointUrl": "opc.tcp://localhost:50000", "NodeId": { "Identifier": "ns=0;i=2261" } },
            {
                "EndpointUrl": "opc.tcp://localhost:50000",
                "OpcNodes": [ { "ExpandedNodeId": "nsu=http://microsoft.com/Opc/OpcPlc/;s=AlternatingBoolean" } ]
            }
        ]"#;
        let nodes = PublishedNodes::from_json(doc).unwrap();
        assert_eq!(nodes.entries.len(), 3);
        assert!(nodes.entries.iter().all(|e| e.version == PUBLISHED_NODES_VERSION));
        assert_eq!(nodes.entries[0].opc_nodes, vec![OpcNode::new("i=2258")]);
        assert_eq!(nodes.entries[1].opc_nodes[0].id.as_deref(), Some("ns=0;i=2261"));

        let merged = nodes.by_endpoint();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].opc_nodes.len(), 3);

        // The migrated document reads back unchanged
        let again = PublishedNodes::from_json(&nodes.to_json().unwrap()).unwrap();
        assert_eq!(again, nodes);
    }

    #[test]
    fn newer_versions_are_rejected() {
        let doc = r#"[ { "Version": 9, "EndpointUrl": "opc.tcp://localhost:50000", "OpcNodes": [ { "Id": "i=2258" } ] } ]"#;
        assert!(matches!(PublishedNodes::from_json(doc), Err(Error::Config(_))));
    }

    #[test]
    fn invalid_entries_are_reported() {
        let doc = r#"[ { "EndpointUrl": "http://localhost", "OpcNodes": [ { "DisplayName": "x" } ] } ]"#;
        let Err(Error::Config(msg)) = PublishedNodes::from_json(doc) else {
            panic!("expected a config error");
        };
        assert!(msg.contains("http://localhost"));
        assert!(msg.contains("neither an Id"));
    }

    #[test]
    fn nodes_group_by_publishing_interval() {
        let mut fast = OpcNode::new("i=2258");
        fast.opc_publishing_interval = Some(250);
        let mut entry = PublishedNode::new(
            "opc.tcp://localhost:50000",
            vec![fast, OpcNode::new("i=2259"), OpcNode::new("i=2260")],
        );
        entry.data_set_publishing_interval = Some(2000);
        let groups = entry.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&Duration::from_millis(250)].len(), 1);
        assert_eq!(groups[&Duration::from_millis(2000)].len(), 2);
    }

    #[test]
    fn expanded_node_ids_resolve_against_namespaces() {
        let namespaces = vec![
            "http://opcfoundation.org/UA/".to_string(),
            "urn:server".to_string(),
            "http://microsoft.com/Opc/OpcPlc/".to_string(),
        ];
        let mut node = OpcNode::default();
        node.expanded_node_id = Some("nsu=http://microsoft.com/Opc/OpcPlc/;s=DipData".into());
        assert_eq!(node.node_id(&namespaces).unwrap(), NodeId::new(2, "DipData"));

        node.expanded_node_id = Some("nsu=urn:unknown;s=DipData".into());
        assert!(node.node_id(&namespaces).is_err());

        assert_eq!(
            OpcNode::new("ns=1;i=5").node_id(&[]).unwrap(),
            NodeId::new(1, 5u32)
        );
    }

    #[test]
    fn security_settings_map_to_descriptor() {
        let mut entry = PublishedNode::new("opc.tcp://localhost:50000", vec![OpcNode::new("i=2258")]);
        let d = entry.endpoint_descriptor().unwrap();
        assert_eq!(d.security_mode, MessageSecurityMode::None);
        assert_eq!(d.security_policy, SecurityPolicy::None);

        entry.use_security = true;
        let d = entry.endpoint_descriptor().unwrap();
        assert_eq!(d.security_mode, MessageSecurityMode::SignAndEncrypt);
        assert_eq!(d.security_policy, SecurityPolicy::Basic256Sha256);

        entry.endpoint_security_policy = Some("Nonsense".into());
        assert!(entry.endpoint_security_policy.is_some());
        assert!(matches!(entry.endpoint_descriptor(), Err(Error::Config(_))));
    }
}
