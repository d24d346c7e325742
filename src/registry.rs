use std::{str::FromStr, time::Instant};

use anyhow::Context;

use crate::{
    device_description::{DeviceDescription, Udn},
    eventing::SubscriptionState,
    ssdp::{USNkind, USN},
    urn::{UrnType, URN},
    FromXml,
};

/// A discovered device's service as the control point tracks it, including
/// the state of its event subscription.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub service_type: String,
    pub service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
    /// Current subscription id, when subscribed
    pub event_sub_sid: Option<String>,
    pub subscription_state: SubscriptionState,
    pub time_subscription_started: Option<Instant>,
    pub time_subscription_confirmed: Option<Instant>,
    pub time_subscription_expires: Option<Instant>,
    /// `LastChange` namespace abbreviation ("AVT", "RCS", "CMS")
    pub subscription_namespace_abbrev: String,
    pub instance_id: u32,
    pub active: bool,
}

impl ServiceInfo {
    fn from_description(service: &crate::device_description::DeviceService<'_>) -> Self {
        let abbrev = URN::from_str(&service.service_type)
            .ok()
            .and_then(|urn| match urn.urn_type {
                UrnType::Service(service_type) => {
                    Some(service_type.event_abbreviation().to_string())
                }
                UrnType::Device(_) => None,
            })
            .unwrap_or_default();
        Self {
            service_type: service.service_type.to_string(),
            service_id: service.service_id.to_string(),
            scpd_url: service.scpd_url.to_string(),
            control_url: service.control_url.to_string(),
            event_sub_url: service.event_sub_url.to_string(),
            event_sub_sid: None,
            subscription_state: SubscriptionState::Unsubscribed,
            time_subscription_started: None,
            time_subscription_confirmed: None,
            time_subscription_expires: None,
            subscription_namespace_abbrev: abbrev,
            instance_id: 0,
            active: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IconInfo {
    pub mime: String,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
    pub url: String,
}

/// A discovered device. Identity is the UDN: two records with equal UDN are
/// the same device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub udn: Udn,
    pub device_type: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub manufacturer_url: Option<String>,
    pub model_name: String,
    pub model_number: Option<String>,
    pub model_description: Option<String>,
    pub model_url: Option<String>,
    pub serial_number: Option<String>,
    /// Root all relative service urls are joined against
    pub base_url: String,
    pub device_description_url: String,
    pub icons: Vec<IconInfo>,
    pub services: Vec<ServiceInfo>,
    pub active: bool,
    pub last_seen: Instant,
}

impl DeviceInfo {
    /// Build the record from a fetched description document.
    ///
    /// When the description has no `<URLBase>`, the base url is derived from
    /// the description url root (`scheme://host:port`).
    pub fn from_description(
        description: &DeviceDescription<'_>,
        description_url: &str,
    ) -> anyhow::Result<Self> {
        let base_url = match description.url_base.as_deref().filter(|base| !base.is_empty()) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => url_root(description_url).context("derive base url")?,
        };
        let device = &description.device;
        Ok(Self {
            udn: device.udn.clone(),
            device_type: device.device_type.to_string(),
            friendly_name: device.friendly_name.to_string(),
            manufacturer: device.manufacturer.to_string(),
            manufacturer_url: device.manufacturer_url.as_deref().map(str::to_string),
            model_name: device.model_name.to_string(),
            model_number: device.model_number.as_deref().map(str::to_string),
            model_description: device.model_description.as_deref().map(str::to_string),
            model_url: device.model_url.as_deref().map(str::to_string),
            serial_number: device.serial_number.as_deref().map(str::to_string),
            base_url,
            device_description_url: description_url.to_string(),
            icons: device
                .icon_list
                .iter()
                .map(|icon| IconInfo {
                    mime: icon.mimetype.to_string(),
                    width: icon.width,
                    height: icon.height,
                    depth: icon.depth,
                    url: icon.url.to_string(),
                })
                .collect(),
            services: device
                .all_services()
                .map(ServiceInfo::from_description)
                .collect(),
            active: true,
            last_seen: Instant::now(),
        })
    }

    pub fn service_by_type_suffix(&self, suffix: &str) -> Option<&ServiceInfo> {
        self.services
            .iter()
            .find(|service| service.service_type.ends_with(suffix))
    }
}

/// `scheme://host:port` of an absolute url.
fn url_root(url: &str) -> Option<String> {
    let scheme_end = url.find("://")?;
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    Some(format!(
        "{}://{}",
        &url[..scheme_end],
        &rest[..authority_end]
    ))
}

/// Deduplicated set of discovered devices, keyed by UDN.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceInfo>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device unless its UDN is already known; a duplicate refreshes
    /// the existing record's activity instead.
    pub fn add_device(&mut self, device: DeviceInfo) -> bool {
        if let Some(existing) = self.find_by_udn_mut(&device.udn) {
            tracing::debug!(udn = %device.udn, "Device already known");
            existing.last_seen = Instant::now();
            existing.active = true;
            return false;
        }
        tracing::info!(udn = %device.udn, name = device.friendly_name, "Device added");
        self.devices.push(device);
        true
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [DeviceInfo] {
        &mut self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn find_by_udn(&self, udn: &Udn) -> Option<&DeviceInfo> {
        self.devices.iter().find(|device| device.udn == *udn)
    }

    pub fn find_by_udn_mut(&mut self, udn: &Udn) -> Option<&mut DeviceInfo> {
        self.devices.iter_mut().find(|device| device.udn == *udn)
    }

    pub fn find_by_location(&self, location: &str) -> Option<&DeviceInfo> {
        self.devices
            .iter()
            .find(|device| device.device_description_url == location)
    }

    /// Refresh activity for an advertised device; true when the device is
    /// known.
    pub fn mark_seen(&mut self, udn: &Udn) -> bool {
        match self.find_by_udn_mut(udn) {
            Some(device) => {
                device.last_seen = Instant::now();
                device.active = true;
                true
            }
            None => false,
        }
    }

    /// Handle an ssdp:byebye: services matching the USN suffix go inactive;
    /// a root/device-level USN deactivates the whole record. The record
    /// itself stays in the registry.
    pub fn mark_byebye(&mut self, usn: &USN) {
        let Some(device) = self.find_by_udn_mut(usn.udn()) else {
            return;
        };
        match usn.kind() {
            USNkind::URN(urn) => {
                let urn = urn.to_string();
                for service in &mut device.services {
                    if service.service_type == urn {
                        tracing::debug!(udn = %device.udn, service = service.service_id, "Service went offline");
                        service.active = false;
                    }
                }
            }
            USNkind::RootDevice | USNkind::DeviceUuid => {
                tracing::debug!(udn = %device.udn, "Device went offline");
                device.active = false;
                for service in &mut device.services {
                    service.active = false;
                }
            }
        }
    }

    pub fn find_service(&self, service_id: &str) -> Option<(&DeviceInfo, &ServiceInfo)> {
        self.devices.iter().find_map(|device| {
            device
                .services
                .iter()
                .find(|service| service.service_id == service_id)
                .map(|service| (device, service))
        })
    }

    /// The device owning a service, by the service's identity.
    pub fn device_of_service(&self, service_id: &str) -> Option<&DeviceInfo> {
        self.find_service(service_id).map(|(device, _)| device)
    }

    pub fn find_service_mut(&mut self, service_id: &str) -> Option<&mut ServiceInfo> {
        self.devices.iter_mut().find_map(|device| {
            device
                .services
                .iter_mut()
                .find(|service| service.service_id == service_id)
        })
    }

    pub fn find_service_by_sid(&mut self, sid: &str) -> Option<&mut ServiceInfo> {
        self.devices.iter_mut().find_map(|device| {
            device
                .services
                .iter_mut()
                .find(|service| service.event_sub_sid.as_deref() == Some(sid))
        })
    }
}

/// GET and parse a device description. Any failure leaves no partial state:
/// the caller only adds the returned record on success.
pub async fn fetch_device_description(
    client: &reqwest::Client,
    location: &str,
) -> anyhow::Result<DeviceInfo> {
    let response = client
        .get(location)
        .send()
        .await
        .with_context(|| format!("GET {location}"))?;
    anyhow::ensure!(
        response.status() == reqwest::StatusCode::OK,
        "description fetch answered {}",
        response.status()
    );
    let body = response.text().await.context("read description body")?;
    let description = DeviceDescription::read_xml(&mut quick_xml::Reader::from_str(&body))
        .context("parse device description")?;
    DeviceInfo::from_description(&description, location)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::{
        device_description::{DeviceDescription, Udn},
        ssdp::USN,
        urn::URN,
        FromXml,
    };

    use super::{url_root, DeviceInfo, DeviceRegistry};

    const RENDERER_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
<specVersion><major>1</major><minor>0</minor></specVersion>
<device>
<deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
<friendlyName>Shelf speaker</friendlyName>
<manufacturer>upnp-av</manufacturer>
<modelName>renderer</modelName>
<UDN>uuid:abc0abc0-0000-1111-2222-333344445555</UDN>
<serviceList>
<service>
<serviceType>urn:schemas-upnp-org:service:AVTransport:1</serviceType>
<serviceId>urn:upnp-org:serviceId:AVTransport</serviceId>
<SCPDURL>/upnp/av_transport/scpd.xml</SCPDURL>
<controlURL>/upnp/av_transport/control.xml</controlURL>
<eventSubURL>/upnp/av_transport/event.xml</eventSubURL>
</service>
<service>
<serviceType>urn:schemas-upnp-org:service:RenderingControl:1</serviceType>
<serviceId>urn:upnp-org:serviceId:RenderingControl</serviceId>
<SCPDURL>/upnp/rendering_control/scpd.xml</SCPDURL>
<controlURL>/upnp/rendering_control/control.xml</controlURL>
<eventSubURL>/upnp/rendering_control/event.xml</eventSubURL>
</service>
</serviceList>
</device>
</root>"#;

    fn renderer_info() -> DeviceInfo {
        let description =
            DeviceDescription::read_xml(&mut quick_xml::Reader::from_str(RENDERER_XML)).unwrap();
        DeviceInfo::from_description(&description, "http://192.168.1.20:44757/upnp/devicedesc.xml")
            .unwrap()
    }

    #[test]
    fn base_url_derived_from_description_url() {
        let info = renderer_info();
        assert_eq!(info.base_url, "http://192.168.1.20:44757");
        assert_eq!(info.services.len(), 2);
        assert_eq!(info.services[0].subscription_namespace_abbrev, "AVT");
        assert_eq!(info.services[1].subscription_namespace_abbrev, "RCS");
    }

    #[test]
    fn duplicate_udn_is_rejected() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.add_device(renderer_info()));
        assert!(!registry.add_device(renderer_info()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn byebye_marks_matching_service_inactive() {
        let mut registry = DeviceRegistry::new();
        registry.add_device(renderer_info());
        let udn = Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap();
        let usn = USN::urn(udn.clone(), URN::service(crate::urn::ServiceType::AVTransport));
        registry.mark_byebye(&usn);
        let device = registry.find_by_udn(&udn).unwrap();
        assert!(!device.services[0].active);
        assert!(device.services[1].active);
        // device record itself remains
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn url_root_strips_path() {
        assert_eq!(
            url_root("http://192.168.1.20:44757/dlna/device.xml").as_deref(),
            Some("http://192.168.1.20:44757")
        );
        assert_eq!(url_root("no-scheme"), None);
    }
}
