use std::str::FromStr;

use crate::{
    action::{Action, ActionError, ActionErrorCode, IntoValueList},
    service::{ArgumentScanner, Service},
    service_variables::{IntoUpnpValue, SVariable, StateVariableDescriptor, UpnpDuration},
    templates::{service_description::ServiceDescription, SpecVersion},
    urn::{ServiceType, UrnType, URN},
    IntoXml,
};

pub const AV_TRANSPORT_URN: URN = URN {
    version: 1,
    urn_type: UrnType::Service(ServiceType::AVTransport),
};

/// This REQUIRED state variable forms the core of the AVTransport service. It
/// defines the conceptually top-level state of the transport, for example,
/// whether it is playing, or stopped.
///
/// Control points that find the transport in a state they do not understand
/// are encouraged to refrain from interacting with it until it transits back
/// into a state that they understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Transitioning,
    /// In case the media contains video, indicates output of a still image
    PausedPlayback,
    NoMediaPresent,
}

impl SVariable for TransportState {
    type VarType = Self;

    const VAR_NAME: &str = "TransportState";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&[
        "STOPPED",
        "PLAYING",
        "TRANSITIONING",
        "PAUSED_PLAYBACK",
        "NO_MEDIA_PRESENT",
    ]);
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Stopped => "STOPPED",
            TransportState::Playing => "PLAYING",
            TransportState::Transitioning => "TRANSITIONING",
            TransportState::PausedPlayback => "PAUSED_PLAYBACK",
            TransportState::NoMediaPresent => "NO_MEDIA_PRESENT",
        }
    }
}

impl IntoUpnpValue for TransportState {
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        let out = match value {
            "STOPPED" => Self::Stopped,
            "PLAYING" => Self::Playing,
            "TRANSITIONING" => Self::Transitioning,
            "PAUSED_PLAYBACK" => Self::PausedPlayback,
            "NO_MEDIA_PRESENT" => Self::NoMediaPresent,
            _ => Err(anyhow::anyhow!("Unrecognized value: {value}"))?,
        };
        Ok(out)
    }
}

impl IntoXml for TransportState {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> quick_xml::Result<()> {
        self.as_str().write_xml(w)
    }
}

/// This REQUIRED state variable is used to indicate asynchronous errors that
/// cannot be returned by a normal action, such as network congestion while a
/// stream is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportStatus {
    #[default]
    Ok,
    ErrorOccurred,
}

impl SVariable for TransportStatus {
    type VarType = Self;

    const VAR_NAME: &str = "TransportStatus";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["OK", "ERROR_OCCURRED"]);
}

impl IntoUpnpValue for TransportStatus {
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        let out = match value {
            "OK" => Self::Ok,
            "ERROR_OCCURRED" => Self::ErrorOccurred,
            _ => Err(anyhow::anyhow!("Unrecognized value: {value}"))?,
        };
        Ok(out)
    }
}

impl IntoXml for TransportStatus {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> quick_xml::Result<()> {
        let msg = match self {
            TransportStatus::Ok => "OK",
            TransportStatus::ErrorOccurred => "ERROR_OCCURRED",
        };
        msg.write_xml(w)
    }
}

/// Storage medium of the resource specified by `AVTransportURI`. A resource
/// received from the UPnP network reports `NETWORK`.
#[derive(Debug)]
pub struct PlaybackStorageMedium;

impl SVariable for PlaybackStorageMedium {
    type VarType = String;

    const VAR_NAME: &str = "PlaybackStorageMedium";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["NONE", "NETWORK", "UNKNOWN"]);
}

#[derive(Debug)]
pub struct RecordStorageMedium;

impl SVariable for RecordStorageMedium {
    type VarType = String;

    const VAR_NAME: &str = "RecordStorageMedium";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["NOT_IMPLEMENTED"]);
}

/// CSV list of storage media the device can play back
#[derive(Debug)]
pub struct PossiblePlaybackStorageMedia;

impl SVariable for PossiblePlaybackStorageMedia {
    type VarType = String;

    const VAR_NAME: &str = "PossiblePlaybackStorageMedia";
}

#[derive(Debug)]
pub struct PossibleRecordStorageMedia;

impl SVariable for PossibleRecordStorageMedia {
    type VarType = String;

    const VAR_NAME: &str = "PossibleRecordStorageMedia";
}

#[derive(Debug)]
pub struct PossibleRecordQualityModes;

impl SVariable for PossibleRecordQualityModes {
    type VarType = String;

    const VAR_NAME: &str = "PossibleRecordQualityModes";
}

/// Playback speed relative to normal speed, expressed as a fraction;
/// "1" is normal speed.
#[derive(Debug)]
pub struct TransportPlaySpeed;

impl SVariable for TransportPlaySpeed {
    type VarType = String;

    const VAR_NAME: &str = "TransportPlaySpeed";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["1"]);
}

#[derive(Debug)]
pub struct NumberOfTracks;

impl SVariable for NumberOfTracks {
    type VarType = u32;

    const VAR_NAME: &str = "NumberOfTracks";
}

#[derive(Debug)]
pub struct CurrentTrack;

impl SVariable for CurrentTrack {
    type VarType = u32;

    const VAR_NAME: &str = "CurrentTrack";
}

#[derive(Debug)]
pub struct CurrentTrackDuration;

impl SVariable for CurrentTrackDuration {
    type VarType = UpnpDuration;

    const VAR_NAME: &str = "CurrentTrackDuration";
}

#[derive(Debug)]
pub struct CurrentMediaDuration;

impl SVariable for CurrentMediaDuration {
    type VarType = UpnpDuration;

    const VAR_NAME: &str = "CurrentMediaDuration";
}

#[derive(Debug)]
pub struct CurrentTrackMetaData;

impl SVariable for CurrentTrackMetaData {
    type VarType = String;

    const VAR_NAME: &str = "CurrentTrackMetaData";
}

#[derive(Debug)]
pub struct CurrentTrackURI;

impl SVariable for CurrentTrackURI {
    type VarType = String;

    const VAR_NAME: &str = "CurrentTrackURI";
}

#[derive(Debug)]
pub struct AVTransportURI;

impl SVariable for AVTransportURI {
    type VarType = String;

    const VAR_NAME: &str = "AVTransportURI";
}

/// DIDL-Lite metadata of the resource at `AVTransportURI`, carried as an
/// escaped document
#[derive(Debug)]
pub struct AVTransportURIMetaData;

impl SVariable for AVTransportURIMetaData {
    type VarType = String;

    const VAR_NAME: &str = "AVTransportURIMetaData";
}

#[derive(Debug)]
pub struct NextAVTransportURI;

impl SVariable for NextAVTransportURI {
    type VarType = String;

    const VAR_NAME: &str = "NextAVTransportURI";
}

#[derive(Debug)]
pub struct NextAVTransportURIMetaData;

impl SVariable for NextAVTransportURIMetaData {
    type VarType = String;

    const VAR_NAME: &str = "NextAVTransportURIMetaData";
}

/// Current position within the track, as `HH:MM:SS` from its beginning
#[derive(Debug)]
pub struct RelativeTimePosition;

impl SVariable for RelativeTimePosition {
    type VarType = UpnpDuration;

    const VAR_NAME: &str = "RelativeTimePosition";
}

#[derive(Debug)]
pub struct AbsoluteTimePosition;

impl SVariable for AbsoluteTimePosition {
    type VarType = UpnpDuration;

    const VAR_NAME: &str = "AbsoluteTimePosition";
}

#[derive(Debug)]
pub struct RelativeCounterPosition;

impl SVariable for RelativeCounterPosition {
    type VarType = i32;

    const VAR_NAME: &str = "RelativeCounterPosition";
}

#[derive(Debug)]
pub struct AbsoluteCounterPosition;

impl SVariable for AbsoluteCounterPosition {
    type VarType = i32;

    const VAR_NAME: &str = "AbsoluteCounterPosition";
}

#[derive(Debug)]
pub struct CurrentTransportActions;

impl SVariable for CurrentTransportActions {
    type VarType = String;

    const VAR_NAME: &str = "CurrentTransportActions";
}

/// Evented digest of the service state: the value is an escaped `<Event>`
/// document listing the instance variables that changed since the last
/// notification.
#[derive(Debug)]
pub struct LastChange;

impl SVariable for LastChange {
    type VarType = String;

    const VAR_NAME: &str = "LastChange";
    const SEND_EVENTS: bool = true;
}

/// Seek mode of the `Seek` action's `Unit` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    TrackNr,
    AbsTime,
    RelTime,
}

impl SVariable for SeekMode {
    type VarType = Self;

    const VAR_NAME: &str = "A_ARG_TYPE_SeekMode";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["TRACK_NR", "ABS_TIME", "REL_TIME"]);
}

impl FromStr for SeekMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRACK_NR" => Ok(Self::TrackNr),
            "ABS_TIME" => Ok(Self::AbsTime),
            "REL_TIME" => Ok(Self::RelTime),
            _ => Err(anyhow::anyhow!("Unrecognized seek mode: {s}")),
        }
    }
}

impl IntoUpnpValue for SeekMode {
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl IntoXml for SeekMode {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> quick_xml::Result<()> {
        let msg = match self {
            SeekMode::TrackNr => "TRACK_NR",
            SeekMode::AbsTime => "ABS_TIME",
            SeekMode::RelTime => "REL_TIME",
        };
        msg.write_xml(w)
    }
}

#[derive(Debug)]
pub struct ArgSeekTarget;

impl SVariable for ArgSeekTarget {
    type VarType = String;

    const VAR_NAME: &str = "A_ARG_TYPE_SeekTarget";
}

/// Identifies the virtual instance of the AVTransport service an action
/// applies to. Devices without `PrepareForConnection` implement a single
/// static instance addressed as "0".
#[derive(Debug)]
pub struct ArgInstanceID;

impl SVariable for ArgInstanceID {
    type VarType = u32;

    const VAR_NAME: &str = "A_ARG_TYPE_InstanceID";
}

/// Snapshot returned by `GetTransportInfo`.
#[derive(Debug, Clone, Default)]
pub struct TransportInfo {
    pub state: TransportState,
    pub status: TransportStatus,
    pub speed: String,
}

/// Snapshot returned by `GetPositionInfo`.
#[derive(Debug, Clone, Default)]
pub struct PositionInfo {
    pub track: u32,
    pub duration: UpnpDuration,
    pub metadata: String,
    pub uri: String,
    pub rel_time: UpnpDuration,
    pub abs_time: UpnpDuration,
    pub rel_count: i32,
    pub abs_count: i32,
}

/// Snapshot returned by `GetMediaInfo`.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub nr_tracks: u32,
    pub media_duration: UpnpDuration,
    pub current_uri: String,
    pub current_uri_metadata: String,
    pub next_uri: String,
    pub next_uri_metadata: String,
}

/// What a renderer application implements; the service translates SOAP
/// actions into these calls and state snapshots back into response
/// arguments.
pub trait AvTransportHandler {
    fn set_uri(
        &self,
        uri: String,
        metadata: String,
    ) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn set_next_uri(
        &self,
        uri: String,
        metadata: String,
    ) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn play(&self, speed: String)
        -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn stop(&self) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn pause(&self) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn next(&self) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn previous(&self) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn seek(
        &self,
        mode: SeekMode,
        target: String,
    ) -> impl std::future::Future<Output = Result<(), ActionError>> + Send;
    fn transport_info(
        &self,
    ) -> impl std::future::Future<Output = Result<TransportInfo, ActionError>> + Send;
    fn position_info(
        &self,
    ) -> impl std::future::Future<Output = Result<PositionInfo, ActionError>> + Send;
    fn media_info(
        &self,
    ) -> impl std::future::Future<Output = Result<MediaInfo, ActionError>> + Send;
}

#[derive(Debug, Clone)]
pub struct AvTransportService<T: AvTransportHandler> {
    pub handler: T,
}

impl<T: AvTransportHandler> AvTransportService<T> {
    pub fn new(handler: T) -> Self {
        Self { handler }
    }
}

impl<T: AvTransportHandler + Send + Sync + 'static> Service for AvTransportService<T> {
    const NAME: &str = "av_transport";
    const URN: URN = AV_TRANSPORT_URN;

    fn service_description() -> ServiceDescription {
        let variables = vec![
            StateVariableDescriptor::from_variable::<TransportState>(),
            StateVariableDescriptor::from_variable::<TransportStatus>(),
            StateVariableDescriptor::from_variable::<PlaybackStorageMedium>(),
            StateVariableDescriptor::from_variable::<RecordStorageMedium>(),
            StateVariableDescriptor::from_variable::<PossiblePlaybackStorageMedia>(),
            StateVariableDescriptor::from_variable::<PossibleRecordStorageMedia>(),
            StateVariableDescriptor::from_variable::<PossibleRecordQualityModes>(),
            StateVariableDescriptor::from_variable::<TransportPlaySpeed>(),
            StateVariableDescriptor::from_variable::<NumberOfTracks>(),
            StateVariableDescriptor::from_variable::<CurrentTrack>(),
            StateVariableDescriptor::from_variable::<CurrentTrackDuration>(),
            StateVariableDescriptor::from_variable::<CurrentMediaDuration>(),
            StateVariableDescriptor::from_variable::<CurrentTrackMetaData>(),
            StateVariableDescriptor::from_variable::<CurrentTrackURI>(),
            StateVariableDescriptor::from_variable::<AVTransportURI>(),
            StateVariableDescriptor::from_variable::<AVTransportURIMetaData>(),
            StateVariableDescriptor::from_variable::<NextAVTransportURI>(),
            StateVariableDescriptor::from_variable::<NextAVTransportURIMetaData>(),
            StateVariableDescriptor::from_variable::<RelativeTimePosition>(),
            StateVariableDescriptor::from_variable::<AbsoluteTimePosition>(),
            StateVariableDescriptor::from_variable::<RelativeCounterPosition>(),
            StateVariableDescriptor::from_variable::<AbsoluteCounterPosition>(),
            StateVariableDescriptor::from_variable::<CurrentTransportActions>(),
            StateVariableDescriptor::from_variable::<LastChange>(),
            StateVariableDescriptor::from_variable::<SeekMode>(),
            StateVariableDescriptor::from_variable::<ArgSeekTarget>(),
            StateVariableDescriptor::from_variable::<ArgInstanceID>(),
        ];
        ServiceDescription {
            spec_version: SpecVersion::upnp_v1(),
            variables,
            actions: Self::actions(),
        }
    }

    fn actions() -> Vec<Action> {
        let mut set_uri = Action::empty("SetAVTransportURI");
        set_uri.add_input::<ArgInstanceID>("InstanceID");
        set_uri.add_input::<AVTransportURI>("CurrentURI");
        set_uri.add_input::<AVTransportURIMetaData>("CurrentURIMetaData");

        let mut set_next_uri = Action::empty("SetNextAVTransportURI");
        set_next_uri.add_input::<ArgInstanceID>("InstanceID");
        set_next_uri.add_input::<NextAVTransportURI>("NextURI");
        set_next_uri.add_input::<NextAVTransportURIMetaData>("NextURIMetaData");

        let mut media_info = Action::empty("GetMediaInfo");
        media_info.add_input::<ArgInstanceID>("InstanceID");
        media_info.add_output::<NumberOfTracks>("NrTracks");
        media_info.add_output::<CurrentMediaDuration>("MediaDuration");
        media_info.add_output::<AVTransportURI>("CurrentURI");
        media_info.add_output::<AVTransportURIMetaData>("CurrentURIMetaData");
        media_info.add_output::<NextAVTransportURI>("NextURI");
        media_info.add_output::<NextAVTransportURIMetaData>("NextURIMetaData");
        media_info.add_output::<PlaybackStorageMedium>("PlayMedium");
        media_info.add_output::<RecordStorageMedium>("RecordMedium");

        let mut transport_info = Action::empty("GetTransportInfo");
        transport_info.add_input::<ArgInstanceID>("InstanceID");
        transport_info.add_output::<TransportState>("CurrentTransportState");
        transport_info.add_output::<TransportStatus>("CurrentTransportStatus");
        transport_info.add_output::<TransportPlaySpeed>("CurrentSpeed");

        let mut position_info = Action::empty("GetPositionInfo");
        position_info.add_input::<ArgInstanceID>("InstanceID");
        position_info.add_output::<CurrentTrack>("Track");
        position_info.add_output::<CurrentTrackDuration>("TrackDuration");
        position_info.add_output::<CurrentTrackMetaData>("TrackMetaData");
        position_info.add_output::<CurrentTrackURI>("TrackURI");
        position_info.add_output::<RelativeTimePosition>("RelTime");
        position_info.add_output::<AbsoluteTimePosition>("AbsTime");
        position_info.add_output::<RelativeCounterPosition>("RelCount");
        position_info.add_output::<AbsoluteCounterPosition>("AbsCount");

        let mut device_capabilities = Action::empty("GetDeviceCapabilities");
        device_capabilities.add_input::<ArgInstanceID>("InstanceID");
        device_capabilities.add_output::<PossiblePlaybackStorageMedia>("PlayMedia");
        device_capabilities.add_output::<PossibleRecordStorageMedia>("RecMedia");
        device_capabilities.add_output::<PossibleRecordQualityModes>("RecQualityModes");

        let mut stop = Action::empty("Stop");
        stop.add_input::<ArgInstanceID>("InstanceID");

        let mut play = Action::empty("Play");
        play.add_input::<ArgInstanceID>("InstanceID");
        play.add_input::<TransportPlaySpeed>("Speed");

        let mut pause = Action::empty("Pause");
        pause.add_input::<ArgInstanceID>("InstanceID");

        let mut seek = Action::empty("Seek");
        seek.add_input::<ArgInstanceID>("InstanceID");
        seek.add_input::<SeekMode>("Unit");
        seek.add_input::<ArgSeekTarget>("Target");

        let mut next = Action::empty("Next");
        next.add_input::<ArgInstanceID>("InstanceID");

        let mut previous = Action::empty("Previous");
        previous.add_input::<ArgInstanceID>("InstanceID");

        let mut transport_actions = Action::empty("GetCurrentTransportActions");
        transport_actions.add_input::<ArgInstanceID>("InstanceID");
        transport_actions.add_output::<CurrentTransportActions>("Actions");

        vec![
            set_uri,
            set_next_uri,
            media_info,
            transport_info,
            position_info,
            device_capabilities,
            stop,
            play,
            pause,
            seek,
            next,
            previous,
            transport_actions,
        ]
    }

    async fn control_handler<'a>(
        &self,
        name: &'a str,
        mut inputs: ArgumentScanner<'a>,
    ) -> Result<impl IntoValueList, ActionError> {
        tracing::debug!(action = name, "AVTransport action");
        let values = match name {
            "SetAVTransportURI" => {
                let _instance: u32 = inputs.next()?;
                let uri = inputs.next()?;
                let metadata = inputs.next()?;
                self.handler.set_uri(uri, metadata).await?;
                ().into_value_list()
            }
            "SetNextAVTransportURI" => {
                let _instance: u32 = inputs.next()?;
                let uri = inputs.next()?;
                let metadata = inputs.next()?;
                self.handler.set_next_uri(uri, metadata).await?;
                ().into_value_list()
            }
            "GetMediaInfo" => {
                let _instance: u32 = inputs.next()?;
                let info = self.handler.media_info().await?;
                (
                    info.nr_tracks,
                    info.media_duration,
                    info.current_uri,
                    info.current_uri_metadata,
                    info.next_uri,
                    info.next_uri_metadata,
                    "NETWORK".to_string(),
                    "NOT_IMPLEMENTED".to_string(),
                )
                    .into_value_list()
            }
            "GetTransportInfo" => {
                let _instance: u32 = inputs.next()?;
                let info = self.handler.transport_info().await?;
                (info.state, info.status, info.speed).into_value_list()
            }
            "GetPositionInfo" => {
                let _instance: u32 = inputs.next()?;
                let info = self.handler.position_info().await?;
                (
                    info.track,
                    info.duration,
                    info.metadata,
                    info.uri,
                    info.rel_time,
                    info.abs_time,
                    info.rel_count,
                    info.abs_count,
                )
                    .into_value_list()
            }
            "GetDeviceCapabilities" => {
                let _instance: u32 = inputs.next()?;
                (
                    "NETWORK".to_string(),
                    "NOT_IMPLEMENTED".to_string(),
                    "NOT_IMPLEMENTED".to_string(),
                )
                    .into_value_list()
            }
            "Stop" => {
                let _instance: u32 = inputs.next()?;
                self.handler.stop().await?;
                ().into_value_list()
            }
            "Play" => {
                let _instance: u32 = inputs.next()?;
                let speed = inputs.next()?;
                self.handler.play(speed).await?;
                ().into_value_list()
            }
            "Pause" => {
                let _instance: u32 = inputs.next()?;
                self.handler.pause().await?;
                ().into_value_list()
            }
            "Seek" => {
                let _instance: u32 = inputs.next()?;
                let mode = inputs.next()?;
                let target = inputs.next()?;
                self.handler.seek(mode, target).await?;
                ().into_value_list()
            }
            "Next" => {
                let _instance: u32 = inputs.next()?;
                self.handler.next().await?;
                ().into_value_list()
            }
            "Previous" => {
                let _instance: u32 = inputs.next()?;
                self.handler.previous().await?;
                ().into_value_list()
            }
            "GetCurrentTransportActions" => {
                let _instance: u32 = inputs.next()?;
                let info = self.handler.transport_info().await?;
                let actions = match info.state {
                    TransportState::Playing => "Stop,Pause,Seek,Next,Previous",
                    TransportState::PausedPlayback => "Stop,Play,Seek,Next,Previous",
                    TransportState::Stopped => "Play",
                    _ => "",
                };
                actions.to_string().into_value_list()
            }
            _ => return Err(ActionErrorCode::InvalidAction.into()),
        };
        Ok(values)
    }
}
