// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Well known node ids from namespace 0 that the client refers to.

macro_rules! node_id_enum {
    ( $(#[$meta:meta])* $name:ident { $( $variant:ident = $value:literal ),* $(,)? } ) => {
        $(#[$meta])*
        #[allow(non_camel_case_types)]
        #[derive(Debug, PartialEq, Eq, Copy, Clone, Hash)]
        pub enum $name {
            $( $variant = $value, )*
        }

        impl TryFrom<u32> for $name {
            type Error = ();

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok($name::$variant), )*
                    _ => Err(()),
                }
            }
        }
    };
}

node_id_enum! {
    /// Objects, including the binary encoding ids of the service messages and extension objects
    ObjectId {
        RootFolder = 84,
        ObjectsFolder = 85,
        TypesFolder = 86,
        ViewsFolder = 87,
        Server = 2253,

        Argument_Encoding_DefaultBinary = 298,
        AnonymousIdentityToken_Encoding_DefaultBinary = 321,
        UserNameIdentityToken_Encoding_DefaultBinary = 324,
        X509IdentityToken_Encoding_DefaultBinary = 327,
        IssuedIdentityToken_Encoding_DefaultBinary = 940,
        ServiceFault_Encoding_DefaultBinary = 397,
        GetEndpointsRequest_Encoding_DefaultBinary = 428,
        GetEndpointsResponse_Encoding_DefaultBinary = 431,
        OpenSecureChannelRequest_Encoding_DefaultBinary = 446,
        OpenSecureChannelResponse_Encoding_DefaultBinary = 449,
        CloseSecureChannelRequest_Encoding_DefaultBinary = 452,
        CloseSecureChannelResponse_Encoding_DefaultBinary = 455,
        CreateSessionRequest_Encoding_DefaultBinary = 461,
        CreateSessionResponse_Encoding_DefaultBinary = 464,
        ActivateSessionRequest_Encoding_DefaultBinary = 467,
        ActivateSessionResponse_Encoding_DefaultBinary = 470,
        CloseSessionRequest_Encoding_DefaultBinary = 473,
        CloseSessionResponse_Encoding_DefaultBinary = 476,
        CancelRequest_Encoding_DefaultBinary = 479,
        CancelResponse_Encoding_DefaultBinary = 482,
        BrowseRequest_Encoding_DefaultBinary = 527,
        BrowseResponse_Encoding_DefaultBinary = 530,
        BrowseNextRequest_Encoding_DefaultBinary = 533,
        BrowseNextResponse_Encoding_DefaultBinary = 536,
        ReadRequest_Encoding_DefaultBinary = 631,
        ReadResponse_Encoding_DefaultBinary = 634,
        WriteRequest_Encoding_DefaultBinary = 673,
        WriteResponse_Encoding_DefaultBinary = 676,
        CallRequest_Encoding_DefaultBinary = 712,
        CallResponse_Encoding_DefaultBinary = 715,
        DataChangeFilter_Encoding_DefaultBinary = 724,
        EventFilter_Encoding_DefaultBinary = 727,
        CreateMonitoredItemsRequest_Encoding_DefaultBinary = 751,
        CreateMonitoredItemsResponse_Encoding_DefaultBinary = 754,
        ModifyMonitoredItemsRequest_Encoding_DefaultBinary = 763,
        ModifyMonitoredItemsResponse_Encoding_DefaultBinary = 766,
        SetMonitoringModeRequest_Encoding_DefaultBinary = 769,
        SetMonitoringModeResponse_Encoding_DefaultBinary = 772,
        SetTriggeringRequest_Encoding_DefaultBinary = 775,
        SetTriggeringResponse_Encoding_DefaultBinary = 778,
        DeleteMonitoredItemsRequest_Encoding_DefaultBinary = 781,
        DeleteMonitoredItemsResponse_Encoding_DefaultBinary = 784,
        CreateSubscriptionRequest_Encoding_DefaultBinary = 787,
        CreateSubscriptionResponse_Encoding_DefaultBinary = 790,
        ModifySubscriptionRequest_Encoding_DefaultBinary = 793,
        ModifySubscriptionResponse_Encoding_DefaultBinary = 796,
        SetPublishingModeRequest_Encoding_DefaultBinary = 799,
        SetPublishingModeResponse_Encoding_DefaultBinary = 802,
        DataChangeNotification_Encoding_DefaultBinary = 811,
        StatusChangeNotification_Encoding_DefaultBinary = 820,
        PublishRequest_Encoding_DefaultBinary = 826,
        PublishResponse_Encoding_DefaultBinary = 829,
        RepublishRequest_Encoding_DefaultBinary = 832,
        RepublishResponse_Encoding_DefaultBinary = 835,
        TransferSubscriptionsRequest_Encoding_DefaultBinary = 841,
        TransferSubscriptionsResponse_Encoding_DefaultBinary = 844,
        DeleteSubscriptionsRequest_Encoding_DefaultBinary = 847,
        DeleteSubscriptionsResponse_Encoding_DefaultBinary = 850,
        EventNotificationList_Encoding_DefaultBinary = 916,
    }
}

node_id_enum! {
    /// Variables of the server object
    VariableId {
        Server_NamespaceArray = 2255,
        Server_ServerArray = 2254,
        Server_ServerStatus = 2256,
        Server_ServerStatus_StartTime = 2257,
        Server_ServerStatus_CurrentTime = 2258,
        Server_ServerStatus_State = 2259,
        Server_ServiceLevel = 2267,
    }
}

node_id_enum! {
    ReferenceTypeId {
        References = 31,
        NonHierarchicalReferences = 32,
        HierarchicalReferences = 33,
        HasChild = 34,
        Organizes = 35,
        HasEventSource = 36,
        HasModellingRule = 37,
        HasEncoding = 38,
        HasTypeDefinition = 40,
        HasSubtype = 45,
        HasProperty = 46,
        HasComponent = 47,
        HasNotifier = 48,
    }
}

node_id_enum! {
    /// Data types, where the built-in types share their numeric values with the variant type ids
    DataTypeId {
        Boolean = 1,
        SByte = 2,
        Byte = 3,
        Int16 = 4,
        UInt16 = 5,
        Int32 = 6,
        UInt32 = 7,
        Int64 = 8,
        UInt64 = 9,
        Float = 10,
        Double = 11,
        String = 12,
        DateTime = 13,
        Guid = 14,
        ByteString = 15,
        XmlElement = 16,
        NodeId = 17,
        ExpandedNodeId = 18,
        StatusCode = 19,
        QualifiedName = 20,
        LocalizedText = 21,
        Structure = 22,
        DataValue = 23,
        BaseDataType = 24,
        DiagnosticInfo = 25,
        Number = 26,
        Integer = 27,
        UInteger = 28,
        Enumeration = 29,
        Duration = 290,
        UtcTime = 294,
    }
}

#[test]
fn node_id_enum_try_from() {
    assert_eq!(
        ObjectId::try_from(631),
        Ok(ObjectId::ReadRequest_Encoding_DefaultBinary)
    );
    assert_eq!(
        VariableId::try_from(2259),
        Ok(VariableId::Server_ServerStatus_State)
    );
    assert!(ReferenceTypeId::try_from(1).is_err());
}
