use std::{fmt::Display, str::FromStr};

use anyhow::Context;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceType {
    MediaServer,
    MediaRenderer,
    Other(String),
}

impl From<&str> for DeviceType {
    fn from(value: &str) -> DeviceType {
        match value {
            "MediaServer" => DeviceType::MediaServer,
            "MediaRenderer" => DeviceType::MediaRenderer,
            _ => DeviceType::Other(value.to_string()),
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceType::MediaServer => "MediaServer",
            DeviceType::MediaRenderer => "MediaRenderer",
            DeviceType::Other(other) => other,
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceType {
    ContentDirectory,
    ConnectionManager,
    AVTransport,
    RenderingControl,
    Other(String),
}

impl ServiceType {
    /// Namespace abbreviation used in `LastChange` event documents,
    /// e.g. `urn:schemas-upnp-org:metadata-1-0/AVT/`.
    pub fn event_abbreviation(&self) -> &str {
        match self {
            ServiceType::ContentDirectory => "CDS",
            ServiceType::ConnectionManager => "CMS",
            ServiceType::AVTransport => "AVT",
            ServiceType::RenderingControl => "RCS",
            ServiceType::Other(other) => other,
        }
    }
}

impl Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceType::ContentDirectory => "ContentDirectory",
            ServiceType::ConnectionManager => "ConnectionManager",
            ServiceType::AVTransport => "AVTransport",
            ServiceType::RenderingControl => "RenderingControl",
            ServiceType::Other(other) => other,
        };
        write!(f, "{name}")
    }
}

impl From<&str> for ServiceType {
    fn from(value: &str) -> ServiceType {
        match value {
            "ContentDirectory" => ServiceType::ContentDirectory,
            "ConnectionManager" => ServiceType::ConnectionManager,
            "AVTransport" => ServiceType::AVTransport,
            "RenderingControl" => ServiceType::RenderingControl,
            other => ServiceType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrnType {
    Device(DeviceType),
    Service(ServiceType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Uniform Resource Name. Provides a unique and persistent identifier for a resource.
pub struct URN {
    pub version: u8,
    pub urn_type: UrnType,
}

impl Serialize for URN {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl URN {
    pub const fn media_server() -> Self {
        Self {
            version: 1,
            urn_type: UrnType::Device(DeviceType::MediaServer),
        }
    }
    pub const fn media_renderer() -> Self {
        Self {
            version: 1,
            urn_type: UrnType::Device(DeviceType::MediaRenderer),
        }
    }
    pub const fn service(service: ServiceType) -> Self {
        Self {
            version: 1,
            urn_type: UrnType::Service(service),
        }
    }
}

impl Display for URN {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (urn_type, name) = match &self.urn_type {
            UrnType::Device(device) => ("device", device.to_string()),
            UrnType::Service(service) => ("service", service.to_string()),
        };

        write!(
            f,
            "urn:schemas-upnp-org:{urn_type}:{name}:{version}",
            version = self.version
        )
    }
}

impl FromStr for URN {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(5, ':');
        let urn = parts.next().context("urn prefix")?;
        anyhow::ensure!(urn == "urn");
        let _schema = parts.next().context("schema")?;
        let schema_type = parts.next().context("schema_type")?;
        let name = parts.next().context("service/device name")?;
        let version = parts.next().context("service/device version")?.parse()?;
        let urn_type = match schema_type {
            "device" => UrnType::Device(DeviceType::from(name)),
            "service" => UrnType::Service(ServiceType::from(name)),
            rest => return Err(anyhow::anyhow!("unknown urn type: {rest}")),
        };
        Ok(URN { version, urn_type })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::{ServiceType, UrnType, URN};

    #[test]
    fn parse_service_urn() {
        let urn = URN::from_str("urn:schemas-upnp-org:service:AVTransport:1").unwrap();
        assert_eq!(urn.version, 1);
        assert_eq!(urn.urn_type, UrnType::Service(ServiceType::AVTransport));
        assert_eq!(
            urn.to_string(),
            "urn:schemas-upnp-org:service:AVTransport:1"
        );
    }

    #[test]
    fn parse_device_urn() {
        let urn = URN::from_str("urn:schemas-upnp-org:device:MediaRenderer:1").unwrap();
        assert_eq!(urn, URN::media_renderer());
    }
}
