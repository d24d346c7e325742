use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex},
};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use upnp_av::{
    action::ActionError,
    av_transport::{
        AvTransportHandler, AvTransportService, MediaInfo, PositionInfo, SeekMode,
        TransportInfo, TransportState,
    },
    config::UpnpConfig,
    connection_manager::ConnectionManagerService,
    device::DeviceHost,
    device_description::{Device, DeviceDescription, DeviceService, Udn},
    eventing::EventPublisher,
    rendering_control::{RenderingControlHandler, RenderingControlService},
    router::UpnpRouter,
    ssdp,
};

#[derive(Parser)]
struct Args {
    /// Port the device http surface listens on
    #[arg(long, default_value_t = 44757)]
    port: u16,
    /// Name shown by control points
    #[arg(long, default_value = "Stub renderer")]
    friendly_name: String,
}

#[derive(Debug, Default)]
struct RendererState {
    uri: String,
    transport_state: TransportState,
    volume: u16,
    mute: bool,
}

#[derive(Debug, Clone)]
struct StubRenderer {
    state: Arc<Mutex<RendererState>>,
    publisher: Arc<EventPublisher>,
}

impl StubRenderer {
    fn notify_transport_state(&self, state: TransportState) {
        let _ = self.publisher.add_change("av_transport", "AVT", 0, &move |w| {
            w.create_element("TransportState")
                .with_attribute(("val", state.as_str()))
                .write_empty()?;
            Ok(())
        });
    }
}

impl AvTransportHandler for StubRenderer {
    async fn set_uri(&self, uri: String, _metadata: String) -> Result<(), ActionError> {
        tracing::info!(uri, "SetAVTransportURI");
        self.state.lock().unwrap().uri = uri;
        Ok(())
    }

    async fn set_next_uri(&self, uri: String, _metadata: String) -> Result<(), ActionError> {
        tracing::info!(uri, "SetNextAVTransportURI");
        Ok(())
    }

    async fn play(&self, speed: String) -> Result<(), ActionError> {
        tracing::info!(speed, "Play");
        self.state.lock().unwrap().transport_state = TransportState::Playing;
        self.notify_transport_state(TransportState::Playing);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ActionError> {
        tracing::info!("Stop");
        self.state.lock().unwrap().transport_state = TransportState::Stopped;
        self.notify_transport_state(TransportState::Stopped);
        Ok(())
    }

    async fn pause(&self) -> Result<(), ActionError> {
        tracing::info!("Pause");
        self.state.lock().unwrap().transport_state = TransportState::PausedPlayback;
        self.notify_transport_state(TransportState::PausedPlayback);
        Ok(())
    }

    async fn next(&self) -> Result<(), ActionError> {
        Ok(())
    }

    async fn previous(&self) -> Result<(), ActionError> {
        Ok(())
    }

    async fn seek(&self, mode: SeekMode, target: String) -> Result<(), ActionError> {
        tracing::info!(?mode, target, "Seek");
        Ok(())
    }

    async fn transport_info(&self) -> Result<TransportInfo, ActionError> {
        let state = self.state.lock().unwrap();
        Ok(TransportInfo {
            state: state.transport_state,
            status: Default::default(),
            speed: "1".to_string(),
        })
    }

    async fn position_info(&self) -> Result<PositionInfo, ActionError> {
        let state = self.state.lock().unwrap();
        Ok(PositionInfo {
            uri: state.uri.clone(),
            ..Default::default()
        })
    }

    async fn media_info(&self) -> Result<MediaInfo, ActionError> {
        let state = self.state.lock().unwrap();
        Ok(MediaInfo {
            current_uri: state.uri.clone(),
            ..Default::default()
        })
    }
}

impl RenderingControlHandler for StubRenderer {
    async fn volume(&self) -> Result<u16, ActionError> {
        Ok(self.state.lock().unwrap().volume)
    }

    async fn set_volume(&self, volume: u16) -> Result<(), ActionError> {
        tracing::info!(volume, "SetVolume");
        self.state.lock().unwrap().volume = volume;
        Ok(())
    }

    async fn mute(&self) -> Result<bool, ActionError> {
        Ok(self.state.lock().unwrap().mute)
    }

    async fn set_mute(&self, mute: bool) -> Result<(), ActionError> {
        tracing::info!(mute, "SetMute");
        self.state.lock().unwrap().mute = mute;
        Ok(())
    }
}

fn renderer_description(friendly_name: &str, udn: Udn) -> DeviceDescription<'static> {
    DeviceDescription::new(Device {
        device_type: "urn:schemas-upnp-org:device:MediaRenderer:1".into(),
        friendly_name: friendly_name.to_string().into(),
        manufacturer: "upnp-av".into(),
        manufacturer_url: None,
        model_description: Some("Stub network renderer".into()),
        model_name: "upnp-av stub renderer".into(),
        model_number: Some("1.0".into()),
        model_url: None,
        serial_number: None,
        udn,
        icon_list: vec![],
        service_list: vec![
            DeviceService {
                service_type: "urn:schemas-upnp-org:service:AVTransport:1".into(),
                service_id: "urn:upnp-org:serviceId:AVTransport".into(),
                scpd_url: "/upnp/av_transport/scpd.xml".into(),
                control_url: "/upnp/av_transport/control.xml".into(),
                event_sub_url: "/upnp/av_transport/event.xml".into(),
            },
            DeviceService {
                service_type: "urn:schemas-upnp-org:service:RenderingControl:1".into(),
                service_id: "urn:upnp-org:serviceId:RenderingControl".into(),
                scpd_url: "/upnp/rendering_control/scpd.xml".into(),
                control_url: "/upnp/rendering_control/control.xml".into(),
                event_sub_url: "/upnp/rendering_control/event.xml".into(),
            },
            DeviceService {
                service_type: "urn:schemas-upnp-org:service:ConnectionManager:1".into(),
                service_id: "urn:upnp-org:serviceId:ConnectionManager".into(),
                scpd_url: "/upnp/connection_manager/scpd.xml".into(),
                control_url: "/upnp/connection_manager/control.xml".into(),
                event_sub_url: "/upnp/connection_manager/event.xml".into(),
            },
        ],
        device_list: vec![],
        presentation_url: None,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = UpnpConfig::default();

    let publisher = Arc::new(EventPublisher::new(config.max_notify_retries));
    let renderer = StubRenderer {
        state: Arc::default(),
        publisher: publisher.clone(),
    };

    let udn = Udn::new(uuid::Uuid::new_v4());
    let description = renderer_description(&args.friendly_name, udn);
    let local_ip = ssdp::resolve_local_addr().await?;
    let location = format!(
        "http://{local_ip}:{port}/upnp/devicedesc.xml",
        port = args.port
    );

    let router = UpnpRouter::new("/upnp", description.into_xml()?, publisher.clone())
        .register_service(AvTransportService::new(renderer.clone()))
        .register_service(RenderingControlService::new(renderer.clone()))
        .register_service(ConnectionManagerService::new(
            "",
            "http-get:*:audio/mpeg:*,http-get:*:audio/flac:*",
        ));

    let host = DeviceHost::bind(&description, &location, publisher, config).await?;

    let listener =
        tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, args.port)).await?;
    tracing::info!(location, "Renderer up");

    let cancellation = CancellationToken::new();
    let ssdp_task = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move { host.run(cancellation).await })
    };

    let server_task = tokio::spawn(async move {
        axum::serve(listener, axum::Router::from(router)).await
    });
    tokio::select! {
        result = server_task => result.context("http server task")?.context("http server")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            cancellation.cancel();
            let _ = ssdp_task.await;
        }
    }
    Ok(())
}
