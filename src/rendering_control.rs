use crate::{
    action::{Action, ActionError, ActionErrorCode, IntoValueList},
    service::{ArgumentScanner, Service},
    service_variables::{Range, SVariable, StateVariableDescriptor},
    templates::{service_description::ServiceDescription, SpecVersion},
    urn::{ServiceType, UrnType, URN},
};

pub const RENDERING_CONTROL_URN: URN = URN {
    version: 1,
    urn_type: UrnType::Service(ServiceType::RenderingControl),
};

/// Loudness of the associated audio channel, on the device's own scale.
#[derive(Debug)]
pub struct Volume;

impl SVariable for Volume {
    type VarType = u16;

    const VAR_NAME: &str = "Volume";
    const RANGE: Option<Range> = Some(Range {
        start: 0,
        end: 100,
        step: Some(1),
    });
}

#[derive(Debug)]
pub struct Mute;

impl SVariable for Mute {
    type VarType = bool;

    const VAR_NAME: &str = "Mute";
}

/// Audio channel an action applies to. Only the master channel is modeled.
#[derive(Debug)]
pub struct ArgChannel;

impl SVariable for ArgChannel {
    type VarType = String;

    const VAR_NAME: &str = "A_ARG_TYPE_Channel";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["Master"]);
}

#[derive(Debug)]
pub struct ArgInstanceID;

impl SVariable for ArgInstanceID {
    type VarType = u32;

    const VAR_NAME: &str = "A_ARG_TYPE_InstanceID";
}

/// CSV list of the device's preset names
#[derive(Debug)]
pub struct PresetNameList;

impl SVariable for PresetNameList {
    type VarType = String;

    const VAR_NAME: &str = "PresetNameList";
}

#[derive(Debug)]
pub struct ArgPresetName;

impl SVariable for ArgPresetName {
    type VarType = String;

    const VAR_NAME: &str = "A_ARG_TYPE_PresetName";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["FactoryDefaults"]);
}

/// Evented digest of the rendering state, same mechanism as AVTransport's
/// `LastChange`.
#[derive(Debug)]
pub struct LastChange;

impl SVariable for LastChange {
    type VarType = String;

    const VAR_NAME: &str = "LastChange";
    const SEND_EVENTS: bool = true;
}

/// What a renderer application implements for volume control.
pub trait RenderingControlHandler {
    fn volume(&self) -> impl std::future::Future<Output = Result<u16, ActionError>> + Send;
    fn set_volume(
        &self,
        volume: u16,
    ) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn mute(&self) -> impl std::future::Future<Output = Result<bool, ActionError>> + Send;
    fn set_mute(
        &self,
        mute: bool,
    ) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
}

#[derive(Debug, Clone)]
pub struct RenderingControlService<T: RenderingControlHandler> {
    pub handler: T,
}

impl<T: RenderingControlHandler> RenderingControlService<T> {
    pub fn new(handler: T) -> Self {
        Self { handler }
    }
}

impl<T: RenderingControlHandler + Send + Sync + 'static> Service for RenderingControlService<T> {
    const NAME: &str = "rendering_control";
    const URN: URN = RENDERING_CONTROL_URN;

    fn service_description() -> ServiceDescription {
        let variables = vec![
            StateVariableDescriptor::from_variable::<Volume>(),
            StateVariableDescriptor::from_variable::<Mute>(),
            StateVariableDescriptor::from_variable::<PresetNameList>(),
            StateVariableDescriptor::from_variable::<LastChange>(),
            StateVariableDescriptor::from_variable::<ArgChannel>(),
            StateVariableDescriptor::from_variable::<ArgInstanceID>(),
            StateVariableDescriptor::from_variable::<ArgPresetName>(),
        ];
        ServiceDescription {
            spec_version: SpecVersion::upnp_v1(),
            variables,
            actions: Self::actions(),
        }
    }

    fn actions() -> Vec<Action> {
        let mut list_presets = Action::empty("ListPresets");
        list_presets.add_input::<ArgInstanceID>("InstanceID");
        list_presets.add_output::<PresetNameList>("CurrentPresetNameList");

        let mut select_preset = Action::empty("SelectPreset");
        select_preset.add_input::<ArgInstanceID>("InstanceID");
        select_preset.add_input::<ArgPresetName>("PresetName");

        let mut get_volume = Action::empty("GetVolume");
        get_volume.add_input::<ArgInstanceID>("InstanceID");
        get_volume.add_input::<ArgChannel>("Channel");
        get_volume.add_output::<Volume>("CurrentVolume");

        let mut set_volume = Action::empty("SetVolume");
        set_volume.add_input::<ArgInstanceID>("InstanceID");
        set_volume.add_input::<ArgChannel>("Channel");
        set_volume.add_input::<Volume>("DesiredVolume");

        let mut get_mute = Action::empty("GetMute");
        get_mute.add_input::<ArgInstanceID>("InstanceID");
        get_mute.add_input::<ArgChannel>("Channel");
        get_mute.add_output::<Mute>("CurrentMute");

        let mut set_mute = Action::empty("SetMute");
        set_mute.add_input::<ArgInstanceID>("InstanceID");
        set_mute.add_input::<ArgChannel>("Channel");
        set_mute.add_input::<Mute>("DesiredMute");

        vec![
            list_presets,
            select_preset,
            get_volume,
            set_volume,
            get_mute,
            set_mute,
        ]
    }

    async fn control_handler<'a>(
        &self,
        name: &'a str,
        mut inputs: ArgumentScanner<'a>,
    ) -> Result<impl IntoValueList, ActionError> {
        tracing::debug!(action = name, "RenderingControl action");
        let values = match name {
            "ListPresets" => {
                let _instance: u32 = inputs.next()?;
                "FactoryDefaults".to_string().into_value_list()
            }
            "SelectPreset" => {
                let _instance: u32 = inputs.next()?;
                let _preset: String = inputs.next()?;
                ().into_value_list()
            }
            "GetVolume" => {
                let _instance: u32 = inputs.next()?;
                let _channel: String = inputs.next()?;
                self.handler.volume().await?.into_value_list()
            }
            "SetVolume" => {
                let _instance: u32 = inputs.next()?;
                let _channel: String = inputs.next()?;
                let volume = inputs.next()?;
                self.handler.set_volume(volume).await?;
                ().into_value_list()
            }
            "GetMute" => {
                let _instance: u32 = inputs.next()?;
                let _channel: String = inputs.next()?;
                self.handler.mute().await?.into_value_list()
            }
            "SetMute" => {
                let _instance: u32 = inputs.next()?;
                let _channel: String = inputs.next()?;
                let mute = inputs.next()?;
                self.handler.set_mute(mute).await?;
                ().into_value_list()
            }
            _ => return Err(ActionErrorCode::InvalidAction.into()),
        };
        Ok(values)
    }
}
