// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

ua_enum! {
    pub enum MessageSecurityMode {
        Invalid = 0,
        None = 1,
        Sign = 2,
        SignAndEncrypt = 3,
    }
}

ua_enum! {
    pub enum SecurityTokenRequestType {
        Issue = 0,
        Renew = 1,
    }
}

ua_enum! {
    pub enum ApplicationType {
        Server = 0,
        Client = 1,
        ClientAndServer = 2,
        DiscoveryServer = 3,
    }
}

ua_enum! {
    /// The type of user identity token supported by an endpoint.
    pub enum UserTokenType {
        Anonymous = 0,
        UserName = 1,
        Certificate = 2,
        IssuedToken = 3,
    }
}

ua_enum! {
    pub enum TimestampsToReturn {
        Source = 0,
        Server = 1,
        Both = 2,
        Neither = 3,
        Invalid = 4,
    }
}

ua_enum! {
    pub enum BrowseDirection {
        Forward = 0,
        Inverse = 1,
        Both = 2,
        Invalid = 3,
    }
}

ua_enum! {
    pub enum NodeClass {
        Unspecified = 0,
        Object = 1,
        Variable = 2,
        Method = 4,
        ObjectType = 8,
        VariableType = 16,
        ReferenceType = 32,
        DataType = 64,
        View = 128,
    }
}

ua_enum! {
    pub enum MonitoringMode {
        Disabled = 0,
        Sampling = 1,
        Reporting = 2,
    }
}

ua_enum! {
    pub enum DataChangeTrigger {
        Status = 0,
        StatusValue = 1,
        StatusValueTimestamp = 2,
    }
}

ua_enum! {
    pub enum DeadbandType {
        None = 0,
        Absolute = 1,
        Percent = 2,
    }
}

ua_enum! {
    pub enum FilterOperator {
        Equals = 0,
        IsNull = 1,
        GreaterThan = 2,
        LessThan = 3,
        GreaterThanOrEqual = 4,
        LessThanOrEqual = 5,
        Like = 6,
        Not = 7,
        Between = 8,
        InList = 9,
        And = 10,
        Or = 11,
        Cast = 12,
        InView = 13,
        OfType = 14,
        RelatedTo = 15,
        BitwiseAnd = 16,
        BitwiseOr = 17,
    }
}

ua_enum! {
    /// State of the server, read from `Server_ServerStatus_State` by the keep-alive.
    pub enum ServerState {
        Running = 0,
        Failed = 1,
        NoConfiguration = 2,
        Suspended = 3,
        Shutdown = 4,
        Test = 5,
        CommunicationFault = 6,
        Unknown = 7,
    }
}

impl MessageSecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSecurityMode::Invalid => "Invalid",
            MessageSecurityMode::None => "None",
            MessageSecurityMode::Sign => "Sign",
            MessageSecurityMode::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl From<&str> for MessageSecurityMode {
    fn from(value: &str) -> Self {
        match value {
            "None" => MessageSecurityMode::None,
            "Sign" => MessageSecurityMode::Sign,
            "SignAndEncrypt" => MessageSecurityMode::SignAndEncrypt,
            _ => {
                error!("Specified security mode \"{}\" is not recognized", value);
                MessageSecurityMode::Invalid
            }
        }
    }
}
