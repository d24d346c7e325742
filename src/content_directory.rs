use std::{fmt::Display, str::FromStr};

use quick_xml::events::{BytesStart, BytesText, Event};

use crate::{
    action::{Action, ActionError, ActionErrorCode, IntoValueList},
    service::{ArgumentScanner, Service},
    service_variables::{IntoUpnpValue, SVariable, StateVariableDescriptor},
    templates::{service_description::ServiceDescription, SpecVersion},
    urn::{ServiceType, UrnType, URN},
    IntoXml, XmlWriter,
};

pub const CONTENT_DIRECTORY_URN: URN = URN {
    version: 1,
    urn_type: UrnType::Service(ServiceType::ContentDirectory),
};

/// Kind of content a [MediaItem] describes, mapped to the DIDL-Lite
/// `upnp:class` hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaClass {
    Music,
    Radio,
    Video,
    Photo,
    Folder,
    #[default]
    Unknown,
}

impl MediaClass {
    pub fn upnp_class(&self) -> &'static str {
        match self {
            MediaClass::Music => "object.item.audioItem.musicTrack",
            MediaClass::Radio => "object.item.audioItem.audioBroadcast",
            MediaClass::Video => "object.item.videoItem",
            MediaClass::Photo => "object.item.imageItem.photo",
            MediaClass::Folder => "object.container.storageFolder",
            MediaClass::Unknown => "object.item",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, MediaClass::Folder)
    }
}

/// One entry of a Browse result. Folders become DIDL-Lite containers,
/// everything else an `<item>` with an optional `<res>` resource.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: String,
    pub parent_id: String,
    pub restricted: bool,
    pub title: String,
    pub resource_uri: Option<String>,
    pub mime_type: Option<String>,
    pub class: MediaClass,
}

impl MediaItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: "0".to_string(),
            restricted: true,
            title: title.into(),
            resource_uri: None,
            mime_type: None,
            class: MediaClass::Unknown,
        }
    }

    pub fn folder(id: impl Into<String>, title: impl Into<String>) -> Self {
        let mut item = Self::new(id, title);
        item.class = MediaClass::Folder;
        item
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = parent_id.into();
        self
    }

    pub fn with_resource(
        mut self,
        uri: impl Into<String>,
        mime_type: impl Into<String>,
        class: MediaClass,
    ) -> Self {
        self.resource_uri = Some(uri.into());
        self.mime_type = Some(mime_type.into());
        self.class = class;
        self
    }
}

impl IntoXml for MediaItem {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        let tag_name = if self.class.is_container() {
            "container"
        } else {
            "item"
        };
        let tag = BytesStart::new(tag_name).with_attributes([
            ("id", self.id.as_str()),
            ("parentID", self.parent_id.as_str()),
            ("restricted", if self.restricted { "1" } else { "0" }),
        ]);
        let tag_end = tag.to_end().into_owned();
        w.write_event(Event::Start(tag))?;
        w.create_element("dc:title")
            .write_text_content(BytesText::new(&self.title))?;
        w.create_element("upnp:class")
            .write_text_content(BytesText::new(self.class.upnp_class()))?;
        if let Some(resource_uri) = &self.resource_uri {
            let protocol_info = format!(
                "http-get:*:{}:*",
                self.mime_type.as_deref().unwrap_or("*")
            );
            w.create_element("res")
                .with_attribute(("protocolInfo", protocol_info.as_str()))
                .write_text_content(BytesText::new(resource_uri))?;
        }
        w.write_event(Event::End(tag_end))
    }
}

/// Render items into a DIDL-Lite document, the payload of a `Browse`
/// response's `Result` argument.
pub fn didl_document(items: &[MediaItem]) -> anyhow::Result<String> {
    let mut w = quick_xml::Writer::new(Vec::new());
    let root = BytesStart::new("DIDL-Lite").with_attributes([
        ("xmlns", "urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"),
        ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
        ("xmlns:upnp", "urn:schemas-upnp-org:metadata-1-0/upnp/"),
    ]);
    let root_end = root.to_end().into_owned();
    w.write_event(Event::Start(root))?;
    for item in items {
        item.write_xml(&mut w)?;
    }
    w.write_event(Event::End(root_end))?;
    Ok(String::from_utf8(w.into_inner())?)
}

/// Browse option of the `Browse` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrowseFlag {
    /// Return the direct children of a container
    BrowseDirectChildren,
    /// Return metadata of the object itself
    BrowseMetadata,
}

impl Display for BrowseFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowseFlag::BrowseDirectChildren => write!(f, "BrowseDirectChildren"),
            BrowseFlag::BrowseMetadata => write!(f, "BrowseMetadata"),
        }
    }
}

impl FromStr for BrowseFlag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BrowseMetadata" => Ok(Self::BrowseMetadata),
            "BrowseDirectChildren" => Ok(Self::BrowseDirectChildren),
            _ => Err(anyhow::anyhow!("Unknown browse flag: {s}")),
        }
    }
}

impl IntoXml for BrowseFlag {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        w.write_event(Event::Text(BytesText::from_escaped(self.to_string())))
    }
}

impl IntoUpnpValue for BrowseFlag {
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl SVariable for BrowseFlag {
    type VarType = Self;
    const VAR_NAME: &str = "A_ARG_TYPE_BrowseFlag";
    const ALLOWED_VALUE_LIST: Option<&[&str]> = Some(&["BrowseMetadata", "BrowseDirectChildren"]);
}

#[derive(Debug)]
struct ContainerUpdateIDs;
impl SVariable for ContainerUpdateIDs {
    type VarType = String;
    const VAR_NAME: &str = "ContainerUpdateIDs";
    const SEND_EVENTS: bool = true;
}

#[derive(Debug)]
struct SystemUpdateId;
impl SVariable for SystemUpdateId {
    type VarType = u32;
    const VAR_NAME: &str = "SystemUpdateID";
    const SEND_EVENTS: bool = true;
}

#[derive(Debug)]
struct Count;
impl SVariable for Count {
    type VarType = u32;
    const VAR_NAME: &str = "A_ARG_TYPE_Count";
}

#[derive(Debug)]
struct SortCriteria;
impl SVariable for SortCriteria {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_SortCriteria";
}

#[derive(Debug)]
struct SortCapabilities;
impl SVariable for SortCapabilities {
    type VarType = String;
    const VAR_NAME: &str = "SortCapabilities";
}

#[derive(Debug)]
struct Index;
impl SVariable for Index {
    type VarType = u32;
    const VAR_NAME: &str = "A_ARG_TYPE_Index";
}

#[derive(Debug)]
struct ObjectID;
impl SVariable for ObjectID {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_ObjectID";
}

#[derive(Debug)]
struct UpdateID;
impl SVariable for UpdateID {
    type VarType = u32;
    const VAR_NAME: &str = "A_ARG_TYPE_UpdateID";
}

#[derive(Debug)]
struct ArgResult;
impl SVariable for ArgResult {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_Result";
}

#[derive(Debug)]
struct ArgFilter;
impl SVariable for ArgFilter {
    type VarType = String;
    const VAR_NAME: &str = "A_ARG_TYPE_Filter";
}

#[derive(Debug)]
struct SearchCapabilities;
impl SVariable for SearchCapabilities {
    type VarType = String;
    const VAR_NAME: &str = "SearchCapabilities";
}

/// One page of a Browse result.
#[derive(Debug, Clone, Default)]
pub struct BrowseResult {
    pub items: Vec<MediaItem>,
    /// Total matching objects, of which `items` may be a window
    pub total_matches: u32,
}

impl BrowseResult {
    pub fn full(items: Vec<MediaItem>) -> Self {
        let total_matches = items.len() as u32;
        Self {
            items,
            total_matches,
        }
    }
}

/// What a media server application implements: the actual content tree.
pub trait ContentDirectoryHandler {
    fn browse_direct_children(
        &self,
        object_id: &str,
        start_index: u32,
        requested_count: u32,
    ) -> impl std::future::Future<Output = Result<BrowseResult, ActionError>> + Send;
    fn browse_metadata(
        &self,
        object_id: &str,
    ) -> impl std::future::Future<Output = Result<BrowseResult, ActionError>> + Send;
    fn system_update_id(&self) -> impl std::future::Future<Output = u32> + Send;
}

#[derive(Debug, Clone)]
pub struct ContentDirectoryService<T: ContentDirectoryHandler> {
    pub handler: T,
}

impl<T: ContentDirectoryHandler> ContentDirectoryService<T> {
    pub fn new(handler: T) -> Self {
        Self { handler }
    }

    async fn browse(
        &self,
        object_id: String,
        browse_flag: BrowseFlag,
        _filter: String,
        start_index: u32,
        requested_count: u32,
        _sort_criteria: String,
    ) -> Result<(String, u32, u32, u32), ActionError> {
        let update_id = self.handler.system_update_id().await;
        tracing::debug!(
            object_id,
            %browse_flag,
            start_index,
            requested_count,
            "Invoking browse action"
        );
        let result = match browse_flag {
            BrowseFlag::BrowseDirectChildren => {
                self.handler
                    .browse_direct_children(&object_id, start_index, requested_count)
                    .await?
            }
            BrowseFlag::BrowseMetadata => self.handler.browse_metadata(&object_id).await?,
        };
        let number_returned = result.items.len() as u32;
        let didl = didl_document(&result.items)?;
        Ok((didl, number_returned, result.total_matches, update_id))
    }
}

impl<T: ContentDirectoryHandler + Send + Sync + 'static> Service for ContentDirectoryService<T> {
    const NAME: &str = "content_directory";
    const URN: URN = CONTENT_DIRECTORY_URN;

    fn service_description() -> ServiceDescription {
        let variables = vec![
            StateVariableDescriptor::from_variable::<BrowseFlag>(),
            StateVariableDescriptor::from_variable::<ContainerUpdateIDs>(),
            StateVariableDescriptor::from_variable::<SystemUpdateId>(),
            StateVariableDescriptor::from_variable::<Count>(),
            StateVariableDescriptor::from_variable::<SortCriteria>(),
            StateVariableDescriptor::from_variable::<SortCapabilities>(),
            StateVariableDescriptor::from_variable::<Index>(),
            StateVariableDescriptor::from_variable::<ObjectID>(),
            StateVariableDescriptor::from_variable::<UpdateID>(),
            StateVariableDescriptor::from_variable::<ArgResult>(),
            StateVariableDescriptor::from_variable::<ArgFilter>(),
            StateVariableDescriptor::from_variable::<SearchCapabilities>(),
        ];
        ServiceDescription {
            spec_version: SpecVersion::upnp_v1(),
            variables,
            actions: Self::actions(),
        }
    }

    fn actions() -> Vec<Action> {
        let mut browse = Action::empty("Browse");
        browse.add_input::<ObjectID>("ObjectID");
        browse.add_input::<BrowseFlag>("BrowseFlag");
        browse.add_input::<ArgFilter>("Filter");
        browse.add_input::<Index>("StartingIndex");
        browse.add_input::<Count>("RequestedCount");
        browse.add_input::<SortCriteria>("SortCriteria");
        browse.add_output::<ArgResult>("Result");
        browse.add_output::<Count>("NumberReturned");
        browse.add_output::<Count>("TotalMatches");
        browse.add_output::<UpdateID>("UpdateID");

        let mut sort_capabilities = Action::empty("GetSortCapabilities");
        sort_capabilities.add_output::<SortCapabilities>("SortCaps");

        let mut system_update_id = Action::empty("GetSystemUpdateID");
        system_update_id.add_output::<SystemUpdateId>("Id");

        let mut search_capabilities = Action::empty("GetSearchCapabilities");
        search_capabilities.add_output::<SearchCapabilities>("SearchCaps");

        vec![
            browse,
            sort_capabilities,
            system_update_id,
            search_capabilities,
        ]
    }

    async fn control_handler<'a>(
        &self,
        name: &'a str,
        mut inputs: ArgumentScanner<'a>,
    ) -> Result<impl IntoValueList, ActionError> {
        tracing::debug!(action = name, "ContentDirectory action");
        let values = match name {
            "Browse" => {
                let browse_result = self
                    .browse(
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                        inputs.next()?,
                    )
                    .await?;
                browse_result.into_value_list()
            }
            "GetSortCapabilities" => "dc:title".to_string().into_value_list(),
            "GetSearchCapabilities" => String::new().into_value_list(),
            "GetSystemUpdateID" => self.handler.system_update_id().await.into_value_list(),
            _ => return Err(ActionErrorCode::InvalidAction.into()),
        };
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::{didl_document, MediaClass, MediaItem};

    #[test]
    fn didl_document_shapes_items_and_containers() {
        let items = vec![
            MediaItem::folder("1", "Albums"),
            MediaItem::new("1$1", "Intro").with_parent("1").with_resource(
                "http://192.168.1.20:44757/media/intro.mp3",
                "audio/mpeg",
                MediaClass::Music,
            ),
        ];
        let didl = didl_document(&items).unwrap();
        assert!(didl.starts_with(
            "<DIDL-Lite xmlns=\"urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/\""
        ));
        assert!(didl.contains("<container id=\"1\" parentID=\"0\" restricted=\"1\">"));
        assert!(didl.contains("<upnp:class>object.container.storageFolder</upnp:class>"));
        assert!(didl.contains("<item id=\"1$1\" parentID=\"1\" restricted=\"1\">"));
        assert!(didl.contains(
            "<res protocolInfo=\"http-get:*:audio/mpeg:*\">http://192.168.1.20:44757/media/intro.mp3</res>"
        ));
    }

    #[test]
    fn titles_are_escaped() {
        let item = MediaItem::new("5", "Tom & Jerry <live>");
        let didl = didl_document(&[item]).unwrap();
        assert!(didl.contains("<dc:title>Tom &amp; Jerry &lt;live&gt;</dc:title>"));
    }
}
