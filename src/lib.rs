#![doc = include_str!("../README.md")]
pub mod action;
/// [AVTransport:1](https://www.upnp.org/specs/av/UPnP-av-AVTransport-v1-Service.pdf) service implementation
///
/// This service type enables control over the transport of audio and video streams. It defines a
/// common model for A/V transport control suitable for a generic user interface and can be used to
/// control a wide variety of media renderers.
///
/// The service is related to the ConnectionManager service, which describes A/V connection setup
/// procedures, and the ContentDirectory service, which offers meta-information about the resources
/// stored on the media.
pub mod av_transport;
pub mod config;
/// [ConnectionManager:1](https://www.upnp.org/specs/av/UPnP-av-ConnectionManager-v1-Service.pdf) service implementation
///
/// This service type enables modeling of streaming capabilities of A/V devices, and binding of
/// those capabilities between devices. Each device that is able to send or receive a stream
/// according to the UPnP AV Architecture has one instance of the ConnectionManager service.
///
/// It provides a mechanism for control points to perform capability matching between source and
/// sink devices and to find information about currently ongoing transfers in the network.
pub mod connection_manager;
/// [ContentDirectory:1](https://www.upnp.org/specs/av/UPnP-av-ContentDirectory-v1-Service.pdf) service implementation
///
/// A MediaServer device contains various types of content that other devices would like to access
/// (music, videos, still images). The ContentDirectory service provides the uniform mechanism UI
/// devices use to browse that content and obtain detailed information about individual objects.
/// Results are carried as DIDL-Lite documents inside the `Browse` action's `Result` argument.
pub mod content_directory;
/// Device-side runtime: owns the device record, the SSDP announcement
/// schedules and the event publisher, and runs them in a single task.
pub mod device;
pub mod device_description;
/// GENA eventing: device-side publisher and control-point-side subscriber.
pub mod eventing;
/// Control-point device registry: discovered devices keyed by UDN.
pub mod registry;
/// [RenderingControl:1](https://www.upnp.org/specs/av/UPnP-av-RenderingControl-v1-Service.pdf) service implementation
///
/// This service type enables control over rendering attributes such as volume and mute. Most of
/// its state is evented through the `LastChange` mechanism rather than individual variables.
pub mod rendering_control;
/// Axum router exposing the device description, SCPD, control and event endpoints
pub mod router;
pub mod scheduler;
mod service;
pub mod service_variables;
/// Simple Service Discovery Protocol ([SSDP](https://en.wikipedia.org/wiki/Simple_Service_Discovery_Protocol)) implementation
pub mod ssdp;
pub mod templates;
pub mod urn;
/// Incremental XML event stream used where documents arrive as byte chunks
pub mod xml_stream;

/// High level control point API: discovery, action queue, event subscriptions.
pub mod control_point;

pub use service::{ArgumentScanner, Service, UpnpService};

/// Useful utility functions for [Reader](quick_xml::Reader)
pub trait XmlReaderExt<'a> {
    fn read_event_err_eof(&mut self) -> anyhow::Result<quick_xml::events::Event<'a>>;
    fn read_to_start(&mut self) -> anyhow::Result<quick_xml::events::BytesStart<'a>>;
    fn read_to_start_or_empty(
        &mut self,
    ) -> anyhow::Result<(bool, quick_xml::events::BytesStart<'a>)>;
    fn read_end(&mut self) -> anyhow::Result<quick_xml::events::BytesEnd<'a>>;
    fn read_text(&mut self) -> anyhow::Result<quick_xml::events::BytesText<'a>>;
}

impl<'a> XmlReaderExt<'a> for quick_xml::Reader<&'a [u8]> {
    fn read_event_err_eof(&mut self) -> anyhow::Result<quick_xml::events::Event<'a>> {
        let event = self.read_event()?;
        match event {
            quick_xml::events::Event::Eof => Err(anyhow::anyhow!("early eof")),
            _ => Ok(event),
        }
    }
    fn read_to_start(&mut self) -> anyhow::Result<quick_xml::events::BytesStart<'a>> {
        loop {
            let event = self.read_event_err_eof()?.into_owned();
            if let quick_xml::events::Event::Start(e) = event {
                break Ok(e);
            }
        }
    }
    fn read_to_start_or_empty(
        &mut self,
    ) -> anyhow::Result<(bool, quick_xml::events::BytesStart<'a>)> {
        loop {
            let event = self.read_event_err_eof()?.into_owned();
            match event {
                quick_xml::events::Event::Start(e) => break Ok((false, e)),
                quick_xml::events::Event::Empty(e) => break Ok((true, e)),
                _ => (),
            }
        }
    }
    fn read_end(&mut self) -> anyhow::Result<quick_xml::events::BytesEnd<'a>> {
        let event = self.read_event()?;
        match event {
            quick_xml::events::Event::End(e) => Ok(e),
            e => anyhow::bail!("expected end, got {:?}", e),
        }
    }
    fn read_text(&mut self) -> anyhow::Result<quick_xml::events::BytesText<'a>> {
        let event = self.read_event()?;
        match event {
            quick_xml::events::Event::Text(e) => Ok(e),
            e => anyhow::bail!("expected text, got {:?}", e),
        }
    }
}

pub type XmlWriter = quick_xml::Writer<Vec<u8>>;

/// Allows structs to serialize themselves into xml fragments
pub trait IntoXml {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()>;

    fn into_string(&self) -> quick_xml::Result<String> {
        let mut w = quick_xml::Writer::new(Vec::new());
        self.write_xml(&mut w)?;
        Ok(String::from_utf8(w.into_inner()).expect("produced value to be utf-8"))
    }
}

impl std::fmt::Debug for Box<dyn IntoXml + Send + Sync> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_string().unwrap())
    }
}

/// Allows structs to deserialize themselves from xml reader
pub trait FromXml<'a> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self>
    where
        Self: Sized;
}

impl<T: IntoXml> IntoXml for Vec<T> {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        for el in self {
            el.write_xml(w)?;
        }
        Ok(())
    }
}
