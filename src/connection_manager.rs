use crate::{
    action::{Action, ActionError, ActionErrorCode, IntoValueList},
    service::{ArgumentScanner, Service},
    service_variables::{SVariable, StateVariableDescriptor},
    templates::{service_description::ServiceDescription, SpecVersion},
    urn::{ServiceType, UrnType, URN},
};

pub const CONNECTION_MANAGER_URN: URN = URN {
    version: 1,
    urn_type: UrnType::Service(ServiceType::ConnectionManager),
};

/// CSV list of protocolInfo values the device can originate
#[derive(Debug)]
pub struct SourceProtocolInfo;

impl SVariable for SourceProtocolInfo {
    type VarType = String;

    const VAR_NAME: &str = "SourceProtocolInfo";
    const SEND_EVENTS: bool = true;
}

/// CSV list of protocolInfo values the device can render
#[derive(Debug)]
pub struct SinkProtocolInfo;

impl SVariable for SinkProtocolInfo {
    type VarType = String;

    const VAR_NAME: &str = "SinkProtocolInfo";
    const SEND_EVENTS: bool = true;
}

/// CSV list of ids of currently ongoing connections
#[derive(Debug)]
pub struct CurrentConnectionIDs;

impl SVariable for CurrentConnectionIDs {
    type VarType = String;

    const VAR_NAME: &str = "CurrentConnectionIDs";
    const SEND_EVENTS: bool = true;
}

#[derive(Debug)]
pub struct ArgConnectionStatus;

impl SVariable for ArgConnectionStatus {
    type VarType = String;

    const VAR_NAME: &str = "A_ARG_TYPE_ConnectionStatus";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&[
        "OK",
        "ContentFormatMismatch",
        "InsufficientBandwidth",
        "UnreliableChannel",
        "Unknown",
    ]);
}

#[derive(Debug)]
pub struct ArgConnectionManager;

impl SVariable for ArgConnectionManager {
    type VarType = String;

    const VAR_NAME: &str = "A_ARG_TYPE_ConnectionManager";
}

#[derive(Debug)]
pub struct ArgDirection;

impl SVariable for ArgDirection {
    type VarType = String;

    const VAR_NAME: &str = "A_ARG_TYPE_Direction";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["Input", "Output"]);
}

#[derive(Debug)]
pub struct ArgProtocolInfo;

impl SVariable for ArgProtocolInfo {
    type VarType = String;

    const VAR_NAME: &str = "A_ARG_TYPE_ProtocolInfo";
}

#[derive(Debug)]
pub struct ArgConnectionID;

impl SVariable for ArgConnectionID {
    type VarType = i32;

    const VAR_NAME: &str = "A_ARG_TYPE_ConnectionID";
}

#[derive(Debug)]
pub struct ArgAVTransportID;

impl SVariable for ArgAVTransportID {
    type VarType = i32;

    const VAR_NAME: &str = "A_ARG_TYPE_AVTransportID";
}

#[derive(Debug)]
pub struct ArgRcsID;

impl SVariable for ArgRcsID {
    type VarType = i32;

    const VAR_NAME: &str = "A_ARG_TYPE_RcsID";
}

/// ConnectionManager with a single static connection (id 0), which is what
/// devices without `PrepareForConnection` advertise.
#[derive(Debug, Clone)]
pub struct ConnectionManagerService {
    /// protocolInfo values the device can originate
    pub source_protocols: String,
    /// protocolInfo values the device can render
    pub sink_protocols: String,
}

impl ConnectionManagerService {
    pub fn new(source_protocols: impl Into<String>, sink_protocols: impl Into<String>) -> Self {
        Self {
            source_protocols: source_protocols.into(),
            sink_protocols: sink_protocols.into(),
        }
    }
}

impl Service for ConnectionManagerService {
    const NAME: &str = "connection_manager";
    const URN: URN = CONNECTION_MANAGER_URN;

    fn service_description() -> ServiceDescription {
        let variables = vec![
            StateVariableDescriptor::from_variable::<SourceProtocolInfo>(),
            StateVariableDescriptor::from_variable::<SinkProtocolInfo>(),
            StateVariableDescriptor::from_variable::<CurrentConnectionIDs>(),
            StateVariableDescriptor::from_variable::<ArgConnectionStatus>(),
            StateVariableDescriptor::from_variable::<ArgConnectionManager>(),
            StateVariableDescriptor::from_variable::<ArgDirection>(),
            StateVariableDescriptor::from_variable::<ArgProtocolInfo>(),
            StateVariableDescriptor::from_variable::<ArgConnectionID>(),
            StateVariableDescriptor::from_variable::<ArgAVTransportID>(),
            StateVariableDescriptor::from_variable::<ArgRcsID>(),
        ];
        ServiceDescription {
            spec_version: SpecVersion::upnp_v1(),
            variables,
            actions: Self::actions(),
        }
    }

    fn actions() -> Vec<Action> {
        let mut protocol_info = Action::empty("GetProtocolInfo");
        protocol_info.add_output::<SourceProtocolInfo>("Source");
        protocol_info.add_output::<SinkProtocolInfo>("Sink");

        let mut connection_ids = Action::empty("GetCurrentConnectionIDs");
        connection_ids.add_output::<CurrentConnectionIDs>("ConnectionIDs");

        let mut connection_info = Action::empty("GetCurrentConnectionInfo");
        connection_info.add_input::<ArgConnectionID>("ConnectionID");
        connection_info.add_output::<ArgRcsID>("RcsID");
        connection_info.add_output::<ArgAVTransportID>("AVTransportID");
        connection_info.add_output::<ArgProtocolInfo>("ProtocolInfo");
        connection_info.add_output::<ArgConnectionManager>("PeerConnectionManager");
        connection_info.add_output::<ArgConnectionID>("PeerConnectionID");
        connection_info.add_output::<ArgDirection>("Direction");
        connection_info.add_output::<ArgConnectionStatus>("Status");

        vec![protocol_info, connection_ids, connection_info]
    }

    async fn control_handler<'a>(
        &self,
        name: &'a str,
        mut inputs: ArgumentScanner<'a>,
    ) -> Result<impl IntoValueList, ActionError> {
        tracing::debug!(action = name, "ConnectionManager action");
        let values = match name {
            "GetProtocolInfo" => (
                self.source_protocols.clone(),
                self.sink_protocols.clone(),
            )
                .into_value_list(),
            "GetCurrentConnectionIDs" => "0".to_string().into_value_list(),
            "GetCurrentConnectionInfo" => {
                let _connection_id: i32 = inputs.next()?;
                (
                    0i32,
                    0i32,
                    String::new(),
                    String::new(),
                    -1i32,
                    "Output".to_string(),
                    "OK".to_string(),
                )
                    .into_value_list()
            }
            _ => return Err(ActionErrorCode::InvalidAction.into()),
        };
        Ok(values)
    }
}
