use std::{borrow::Cow, fmt::Display, str::FromStr};

use anyhow::Context;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};

use crate::{FromXml, IntoXml, XmlReaderExt};

use super::templates::SpecVersion;

/// Device description document: `<root>` with spec version, optional
/// `<URLBase>` and the device record. Emitted by the device router, fetched
/// and parsed by the control point registry.
#[derive(Debug)]
pub struct DeviceDescription<'a> {
    pub spec_version: SpecVersion,
    pub url_base: Option<Cow<'a, str>>,
    pub device: Device<'a>,
}

impl DeviceDescription<'_> {
    pub fn into_xml(&self) -> anyhow::Result<String> {
        use quick_xml::Writer;
        let mut w = Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", None, None)))?;
        let root = BytesStart::new("root").with_attributes([
            ("xmlns", "urn:schemas-upnp-org:device-1-0"),
            ("xmlns:dlna", "urn:schemas-dlna-org:device-1-0"),
        ]);
        let root_end = root.to_end().into_owned();
        w.write_event(Event::Start(root))?;
        self.spec_version.write_xml(&mut w)?;
        if let Some(url_base) = &self.url_base {
            w.create_element("URLBase")
                .write_text_content(BytesText::new(url_base))?;
        }
        self.device.write_xml(&mut w)?;

        w.write_event(Event::End(root_end))?;
        Ok(String::from_utf8(w.into_inner())?)
    }
}

impl IntoXml for SpecVersion {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> quick_xml::Result<()> {
        w.write_serializable("specVersion", self)
            .expect("serialization not fail");
        Ok(())
    }
}

impl<'a> FromXml<'a> for SpecVersion {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let spec_version = r.read_to_start()?;
        anyhow::ensure!(spec_version.local_name().as_ref() == b"specVersion");
        let major = r.read_to_start()?;
        let major: usize = r.read_text(major.name())?.parse()?;
        let minor = r.read_to_start()?;
        let minor: usize = r.read_text(minor.name())?.parse()?;
        r.read_to_end(spec_version.name())?;
        Ok(Self { major, minor })
    }
}

impl<'a> FromXml<'a> for DeviceDescription<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let root = r.read_to_start()?;
        anyhow::ensure!(root.local_name().as_ref() == b"root");

        let spec_version = SpecVersion::read_xml(r)?;

        let mut url_base = None;
        let mut device = None;
        loop {
            match r.read_event_err_eof()? {
                Event::Start(start) => {
                    let end_name = start.name();
                    match start.local_name().as_ref() {
                        b"URLBase" => url_base = Some(r.read_text(end_name)?),
                        b"device" => device = Some(Device::read_xml(r)?),
                        _ => {
                            r.read_to_end(end_name)?;
                        }
                    }
                }
                Event::End(end) if end.local_name().as_ref() == b"root" => break,
                _ => {}
            }
        }

        Ok(Self {
            spec_version,
            url_base,
            device: device.context("missing device element")?,
        })
    }
}

impl<'a> DeviceDescription<'a> {
    pub fn new(device: Device<'a>) -> Self {
        Self {
            spec_version: SpecVersion::upnp_v1(),
            url_base: None,
            device,
        }
    }
}

#[derive(Debug)]
pub struct Device<'a> {
    pub device_type: Cow<'a, str>,
    pub friendly_name: Cow<'a, str>,
    /// Manufacturer name. Should be < 64 characters.
    pub manufacturer: Cow<'a, str>,
    pub manufacturer_url: Option<Cow<'a, str>>,
    /// Should be < 128 characters
    pub model_description: Option<Cow<'a, str>>,
    pub model_name: Cow<'a, str>,
    pub model_number: Option<Cow<'a, str>>,
    pub model_url: Option<Cow<'a, str>>,
    pub serial_number: Option<Cow<'a, str>>,
    pub udn: Udn,
    pub icon_list: Vec<Icon<'a>>,
    pub service_list: Vec<DeviceService<'a>>,
    pub device_list: Vec<Device<'a>>,
    pub presentation_url: Option<Cow<'a, str>>,
}

impl<'a> Device<'a> {
    pub fn all_services(&'a self) -> Box<dyn Iterator<Item = &'a DeviceService<'a>> + 'a> {
        let self_services = self.service_list.iter();
        let nested_services = self.device_list.iter().flat_map(|d| d.all_services());
        Box::new(self_services.chain(nested_services))
    }
}

impl IntoXml for Device<'_> {
    fn write_xml(&self, w: &mut crate::XmlWriter) -> quick_xml::Result<()> {
        let device = BytesStart::new("device");
        let device_end = device.to_end().into_owned();
        w.write_event(Event::Start(device))?;
        w.create_element("deviceType")
            .write_text_content(BytesText::new(&self.device_type))?;
        w.create_element("friendlyName")
            .write_text_content(BytesText::new(&self.friendly_name))?;
        w.create_element("manufacturer")
            .write_text_content(BytesText::new(&self.manufacturer))?;
        if let Some(manufacturer_url) = &self.manufacturer_url {
            w.create_element("manufacturerURL")
                .write_text_content(BytesText::new(manufacturer_url))?;
        }
        if let Some(model_description) = &self.model_description {
            w.create_element("modelDescription")
                .write_text_content(BytesText::new(model_description))?;
        }
        w.create_element("modelName")
            .write_text_content(BytesText::new(&self.model_name))?;
        if let Some(model_number) = &self.model_number {
            w.create_element("modelNumber")
                .write_text_content(BytesText::new(model_number))?;
        }
        if let Some(model_url) = &self.model_url {
            w.create_element("modelURL")
                .write_text_content(BytesText::new(model_url))?;
        }
        if let Some(serial_number) = &self.serial_number {
            w.create_element("serialNumber")
                .write_text_content(BytesText::new(serial_number))?;
        }
        let udn = self.udn.to_string();
        w.create_element("UDN")
            .write_text_content(BytesText::new(&udn))?;
        if !self.icon_list.is_empty() {
            w.create_element("iconList").write_inner_content(|w| {
                for icon in &self.icon_list {
                    w.write_serializable("icon", icon)
                        .expect("serialization not fail");
                }
                Ok::<(), quick_xml::Error>(())
            })?;
        }
        w.create_element("serviceList").write_inner_content(|w| {
            for service in &self.service_list {
                w.write_serializable("service", service)
                    .expect("serialization not fail");
            }
            Ok::<(), quick_xml::Error>(())
        })?;
        if !self.device_list.is_empty() {
            w.create_element("deviceList").write_inner_content(|w| {
                for device in &self.device_list {
                    device.write_xml(w)?;
                }
                Ok::<(), quick_xml::Error>(())
            })?;
        }

        if let Some(presentation_url) = &self.presentation_url {
            w.create_element("presentationURL")
                .write_text_content(BytesText::new(presentation_url))?;
        }
        w.write_event(Event::End(device_end))
    }
}

impl<'a> FromXml<'a> for Device<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut device_type = None;
        let mut friendly_name = None;
        let mut manufacturer = None;
        let mut manufacturer_url = None;
        let mut model_description = None;
        let mut model_name = None;
        let mut model_number = None;
        let mut model_url = None;
        let mut serial_number = None;
        let mut udn = None;
        let mut icon_list = Vec::new();
        let mut service_list = Vec::new();
        let mut device_list = Vec::new();
        let mut presentation_url = None;

        while let Ok(event) = r.read_event_err_eof() {
            match event {
                Event::Start(start) => {
                    let end_name = start.name();
                    match start.local_name().as_ref() {
                        b"deviceType" => device_type = Some(r.read_text(end_name)?),
                        b"friendlyName" => friendly_name = Some(r.read_text(end_name)?),
                        b"manufacturer" => manufacturer = Some(r.read_text(end_name)?),
                        b"manufacturerURL" => manufacturer_url = Some(r.read_text(end_name)?),
                        b"modelDescription" => model_description = Some(r.read_text(end_name)?),
                        b"modelName" => model_name = Some(r.read_text(end_name)?),
                        b"modelNumber" => model_number = Some(r.read_text(end_name)?),
                        b"modelURL" => model_url = Some(r.read_text(end_name)?),
                        b"serialNumber" => serial_number = Some(r.read_text(end_name)?),
                        b"UDN" => {
                            let text = r.read_text(end_name)?;
                            udn = Some(Udn::from_str(&text)?);
                        }
                        b"iconList" => {
                            while let Ok(e) = r.read_event() {
                                match e {
                                    Event::Start(start) => {
                                        anyhow::ensure!(start.local_name().as_ref() == b"icon");
                                        icon_list.push(Icon::read_xml(r)?);
                                    }
                                    Event::End(end) => {
                                        anyhow::ensure!(end.local_name().as_ref() == b"iconList");
                                        break;
                                    }
                                    Event::Text(_) => {}
                                    r => Err(anyhow::anyhow!(
                                        "Expected icon start or list end, got {:?}",
                                        r
                                    ))?,
                                }
                            }
                        }
                        b"serviceList" => {
                            while let Ok(e) = r.read_event() {
                                match e {
                                    Event::Start(start) => {
                                        anyhow::ensure!(start.local_name().as_ref() == b"service");
                                        service_list.push(DeviceService::read_xml(r)?);
                                    }
                                    Event::End(end) => {
                                        anyhow::ensure!(
                                            end.local_name().as_ref() == b"serviceList"
                                        );
                                        break;
                                    }
                                    Event::Text(_) => {}
                                    r => Err(anyhow::anyhow!(
                                        "Expected service start or list end, got {:?}",
                                        r
                                    ))?,
                                }
                            }
                        }
                        b"deviceList" => {
                            while let Ok(e) = r.read_event() {
                                match e {
                                    Event::Start(start) => {
                                        anyhow::ensure!(start.local_name().as_ref() == b"device");
                                        device_list.push(Device::read_xml(r)?);
                                    }
                                    Event::End(end) => {
                                        anyhow::ensure!(end.local_name().as_ref() == b"deviceList");
                                        break;
                                    }
                                    Event::Text(_) => {}
                                    r => Err(anyhow::anyhow!(
                                        "Expected device start or list end, got {:?}",
                                        r
                                    ))?,
                                }
                            }
                        }
                        b"presentationURL" => presentation_url = Some(r.read_text(end_name)?),
                        _ => {
                            r.read_to_end(end_name)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(
                        end.local_name().as_ref() == b"device",
                        "expected device end, got {:?}",
                        end
                    );
                    break;
                }
                _ => {}
            }
        }

        // partial parse is accepted, a missing UDN is not
        let udn = udn.context("udn")?;
        let device_type = device_type.context("device type")?;
        let friendly_name = friendly_name.unwrap_or_default();
        let manufacturer = manufacturer.unwrap_or_default();
        let model_name = model_name.unwrap_or_default();

        Ok(Self {
            device_type,
            friendly_name,
            manufacturer,
            manufacturer_url,
            model_description,
            model_name,
            model_number,
            model_url,
            serial_number,
            udn,
            icon_list,
            service_list,
            device_list,
            presentation_url,
        })
    }
}

/// Unique Device Name. Universally-unique identifier for the device, whether
/// root or embedded. Shall be the same over time for a specific device
/// instance (i.e. shall survive reboots).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Udn(uuid::Uuid);

impl Udn {
    pub const fn new(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Serialize for Udn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl Display for Udn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "uuid:{}", self.0)
    }
}

impl FromStr for Udn {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s
            .strip_prefix("uuid:")
            .context("udn should start with uuid:")?
            .parse()
            .context("parse uuid")?;
        Ok(Self::new(uuid))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Icon<'a> {
    pub mimetype: Cow<'a, str>,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub url: Cow<'a, str>,
}

impl<'a> FromXml<'a> for Icon<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut mimetype = None;
        let mut width = None;
        let mut height = None;
        let mut depth = None;
        let mut url = None;

        while let Ok(event) = r.read_event() {
            match event {
                Event::Start(start) => {
                    let end = start.name();
                    match start.local_name().as_ref() {
                        b"mimetype" => mimetype = Some(r.read_text(end)?),
                        b"width" => width = Some(r.read_text(end)?.parse()?),
                        b"height" => height = Some(r.read_text(end)?.parse()?),
                        b"depth" => depth = Some(r.read_text(end)?.parse()?),
                        b"url" => url = Some(r.read_text(end)?),
                        _ => {
                            // skip unknown tags
                            r.read_to_end(end)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(end.local_name().as_ref() == b"icon");
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            mimetype: mimetype.context("get mimetype")?,
            width: width.context("get width")?,
            height: height.context("get height")?,
            depth: depth.context("get depth")?,
            url: url.context("get url")?,
        })
    }
}

/// One `<service>` entry of a device description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceService<'a> {
    #[serde(rename = "serviceType")]
    pub service_type: Cow<'a, str>,
    #[serde(rename = "serviceId")]
    pub service_id: Cow<'a, str>,
    /// URL for the service description, relative to the device description URL
    #[serde(rename = "SCPDURL")]
    pub scpd_url: Cow<'a, str>,
    #[serde(rename = "controlURL")]
    pub control_url: Cow<'a, str>,
    #[serde(rename = "eventSubURL")]
    pub event_sub_url: Cow<'a, str>,
}

impl<'a> FromXml<'a> for DeviceService<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut service_type = None;
        let mut service_id = None;
        let mut scpdurl = None;
        let mut control_url = None;
        let mut event_sub_url = None;

        while let Ok(event) = r.read_event() {
            match event {
                Event::Start(start) => {
                    let end = start.name();
                    match start.local_name().as_ref() {
                        b"serviceType" => service_type = Some(r.read_text(end)?),
                        b"serviceId" => service_id = Some(r.read_text(end)?),
                        b"SCPDURL" => scpdurl = Some(r.read_text(end)?),
                        b"controlURL" => control_url = Some(r.read_text(end)?),
                        b"eventSubURL" => event_sub_url = Some(r.read_text(end)?),
                        _ => {
                            // skip unknown tags
                            r.read_to_end(end)?;
                        }
                    }
                }
                Event::End(end) => {
                    anyhow::ensure!(end.local_name().as_ref() == b"service");
                    break;
                }
                _ => {}
            }
        }

        Ok(Self {
            service_type: service_type.context("service type")?,
            service_id: service_id.context("service id")?,
            scpd_url: scpdurl.context("scpdurl")?,
            control_url: control_url.context("control url")?,
            event_sub_url: event_sub_url.context("event sub url")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::str::FromStr;

    use crate::FromXml;

    use super::{Device, DeviceDescription, DeviceService, Udn};

    fn renderer_device() -> Device<'static> {
        Device {
            device_type: "urn:schemas-upnp-org:device:MediaRenderer:1".into(),
            friendly_name: "Living room speaker".into(),
            manufacturer: "upnp-av".into(),
            manufacturer_url: None,
            model_description: Some("Network renderer".into()),
            model_name: "upnp-av renderer".into(),
            model_number: Some("1.0".into()),
            model_url: None,
            serial_number: Some("0001".into()),
            udn: Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap(),
            icon_list: vec![],
            service_list: vec![DeviceService {
                service_type: Cow::Borrowed("urn:schemas-upnp-org:service:AVTransport:1"),
                service_id: Cow::Borrowed("urn:upnp-org:serviceId:AVTransport"),
                scpd_url: Cow::Borrowed("/upnp/av_transport/scpd.xml"),
                control_url: Cow::Borrowed("/upnp/av_transport/control.xml"),
                event_sub_url: Cow::Borrowed("/upnp/av_transport/event.xml"),
            }],
            device_list: vec![],
            presentation_url: None,
        }
    }

    #[test]
    fn description_round_trip() {
        let mut description = DeviceDescription::new(renderer_device());
        description.url_base = Some("http://192.168.1.20:44757".into());
        let xml = description.into_xml().unwrap();
        let parsed =
            DeviceDescription::read_xml(&mut quick_xml::Reader::from_str(&xml)).unwrap();
        assert_eq!(parsed.spec_version.major, 1);
        assert_eq!(parsed.spec_version.minor, 0);
        assert_eq!(parsed.url_base.as_deref(), Some("http://192.168.1.20:44757"));
        assert_eq!(parsed.device.udn, description.device.udn);
        assert_eq!(parsed.device.friendly_name, "Living room speaker");
        let services: Vec<_> = parsed.device.all_services().collect();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].control_url, "/upnp/av_transport/control.xml");
    }

    #[test]
    fn missing_udn_aborts_parse() {
        let raw = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
<specVersion><major>1</major><minor>0</minor></specVersion>
<device>
<deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
<friendlyName>Nameless</friendlyName>
</device>
</root>"#;
        assert!(DeviceDescription::read_xml(&mut quick_xml::Reader::from_str(raw)).is_err());
    }

    #[test]
    fn unknown_elements_are_skipped() {
        let raw = r#"<root xmlns="urn:schemas-upnp-org:device-1-0">
<specVersion><major>1</major><minor>0</minor></specVersion>
<device>
<deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
<friendlyName>srv</friendlyName>
<manufacturer>x</manufacturer>
<modelName>y</modelName>
<X_Custom><nested>ignored</nested></X_Custom>
<UDN>uuid:abc0abc0-0000-1111-2222-333344445555</UDN>
<serviceList>
<service>
<serviceType>urn:schemas-upnp-org:service:ContentDirectory:1</serviceType>
<serviceId>urn:upnp-org:serviceId:ContentDirectory</serviceId>
<SCPDURL>/upnp/content_directory/scpd.xml</SCPDURL>
<controlURL>/upnp/content_directory/control.xml</controlURL>
<eventSubURL>/upnp/content_directory/event.xml</eventSubURL>
</service>
</serviceList>
</device>
</root>"#;
        let parsed = DeviceDescription::read_xml(&mut quick_xml::Reader::from_str(raw)).unwrap();
        assert_eq!(parsed.device.service_list.len(), 1);
        assert!(parsed.url_base.is_none());
    }
}
