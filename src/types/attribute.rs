// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

/// Node attributes, Part 4 Figure B.7. The client reads and writes `Value`, the others are
/// what a server may report back in a `ReadValueId` it rejects.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u32)]
pub enum AttributeId {
    NodeId = 1,
    NodeClass,
    BrowseName,
    DisplayName,
    Description,
    WriteMask,
    UserWriteMask,
    IsAbstract,
    Symmetric,
    InverseName,
    ContainsNoLoops,
    EventNotifier,
    Value,
    DataType,
    ValueRank,
    ArrayDimensions,
    AccessLevel,
    UserAccessLevel,
    MinimumSamplingInterval,
    Historizing,
    Executable,
    UserExecutable,
    DataTypeDefinition,
    RolePermissions,
    UserRolePermissions,
    AccessRestrictions,
    AccessLevelEx,
}

const ATTRIBUTES: [AttributeId; 27] = [
    AttributeId::NodeId,
    AttributeId::NodeClass,
    AttributeId::BrowseName,
    AttributeId::DisplayName,
    AttributeId::Description,
    AttributeId::WriteMask,
    AttributeId::UserWriteMask,
    AttributeId::IsAbstract,
    AttributeId::Symmetric,
    AttributeId::InverseName,
    AttributeId::ContainsNoLoops,
    AttributeId::EventNotifier,
    AttributeId::Value,
    AttributeId::DataType,
    AttributeId::ValueRank,
    AttributeId::ArrayDimensions,
    AttributeId::AccessLevel,
    AttributeId::UserAccessLevel,
    AttributeId::MinimumSamplingInterval,
    AttributeId::Historizing,
    AttributeId::Executable,
    AttributeId::UserExecutable,
    AttributeId::DataTypeDefinition,
    AttributeId::RolePermissions,
    AttributeId::UserRolePermissions,
    AttributeId::AccessRestrictions,
    AttributeId::AccessLevelEx,
];

impl TryFrom<u32> for AttributeId {
    type Error = u32;

    fn try_from(attribute_id: u32) -> Result<Self, Self::Error> {
        attribute_id
            .checked_sub(1)
            .and_then(|i| ATTRIBUTES.get(i as usize))
            .copied()
            .ok_or(attribute_id)
    }
}

#[test]
fn attribute_ids_are_numbered_from_one() {
    assert_eq!(AttributeId::Value as u32, 13);
    assert_eq!(AttributeId::AccessLevelEx as u32, 27);
    for (i, a) in ATTRIBUTES.iter().enumerate() {
        assert_eq!(AttributeId::try_from(i as u32 + 1), Ok(*a));
    }
    assert_eq!(AttributeId::try_from(0), Err(0));
    assert_eq!(AttributeId::try_from(28), Err(28));
}
