use std::{
    net::SocketAddr,
    str::FromStr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{extract::State, http::HeaderMap, response::IntoResponse, routing::any, Router};
use upnp_av::{
    action::{ActionError, ActionRequest},
    av_transport::{
        AvTransportHandler, AvTransportService, MediaInfo, PositionInfo, SeekMode,
        TransportInfo,
    },
    device_description::{DeviceDescription, Udn},
    eventing::{EventPublisher, EventSubscriber, SubscriptionState},
    registry::{DeviceInfo, DeviceRegistry},
    rendering_control::{RenderingControlHandler, RenderingControlService},
    router::UpnpRouter,
    urn::{ServiceType, URN},
    FromXml,
};

#[derive(Debug, Clone, Default)]
struct RecordingRenderer {
    uri: Arc<Mutex<Option<String>>>,
    volume: Arc<Mutex<u16>>,
}

impl AvTransportHandler for RecordingRenderer {
    async fn set_uri(&self, uri: String, _metadata: String) -> Result<(), ActionError> {
        *self.uri.lock().unwrap() = Some(uri);
        Ok(())
    }
    async fn set_next_uri(&self, _uri: String, _metadata: String) -> Result<(), ActionError> {
        Ok(())
    }
    async fn play(&self, _speed: String) -> Result<(), ActionError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), ActionError> {
        Ok(())
    }
    async fn pause(&self) -> Result<(), ActionError> {
        Ok(())
    }
    async fn next(&self) -> Result<(), ActionError> {
        Ok(())
    }
    async fn previous(&self) -> Result<(), ActionError> {
        Ok(())
    }
    async fn seek(&self, _mode: SeekMode, _target: String) -> Result<(), ActionError> {
        Ok(())
    }
    async fn transport_info(&self) -> Result<TransportInfo, ActionError> {
        Ok(TransportInfo {
            speed: "1".into(),
            ..Default::default()
        })
    }
    async fn position_info(&self) -> Result<PositionInfo, ActionError> {
        Ok(PositionInfo::default())
    }
    async fn media_info(&self) -> Result<MediaInfo, ActionError> {
        Ok(MediaInfo::default())
    }
}

impl RenderingControlHandler for RecordingRenderer {
    async fn volume(&self) -> Result<u16, ActionError> {
        Ok(*self.volume.lock().unwrap())
    }
    async fn set_volume(&self, volume: u16) -> Result<(), ActionError> {
        *self.volume.lock().unwrap() = volume;
        Ok(())
    }
    async fn mute(&self) -> Result<bool, ActionError> {
        Ok(false)
    }
    async fn set_mute(&self, _mute: bool) -> Result<(), ActionError> {
        Ok(())
    }
}

const DESCRIPTION_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
<specVersion><major>1</major><minor>0</minor></specVersion>
<device>
<deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
<friendlyName>Test renderer</friendlyName>
<manufacturer>upnp-av</manufacturer>
<modelName>test</modelName>
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

/// Serve a renderer's http surface on an ephemeral loopback port.
async fn spawn_device(
    renderer: RecordingRenderer,
    publisher: Arc<EventPublisher>,
) -> SocketAddr {
    let router = UpnpRouter::new("/upnp", DESCRIPTION_XML.to_string(), publisher)
        .register_service(AvTransportService::new(renderer.clone()))
        .register_service(RenderingControlService::new(renderer));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::from(router)).await.unwrap();
    });
    addr
}

#[derive(Debug, Clone)]
struct SeenNotify {
    sid: String,
    seq: String,
    body: String,
}

type NotifyLog = Arc<Mutex<Vec<SeenNotify>>>;

async fn notify_sink(
    State(log): State<NotifyLog>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    log.lock().unwrap().push(SeenNotify {
        sid: headers
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        seq: headers
            .get("SEQ")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        body,
    });
    axum::http::StatusCode::OK
}

/// Serve a bare NOTIFY collector on an ephemeral loopback port.
async fn spawn_notify_sink() -> (SocketAddr, NotifyLog) {
    let log: NotifyLog = Arc::default();
    let router = Router::new()
        .route("/evt", any(notify_sink))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, log)
}

fn subscribe_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"SUBSCRIBE").unwrap()
}

fn unsubscribe_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"UNSUBSCRIBE").unwrap()
}

#[tokio::test]
async fn subscribe_then_notify() {
    let publisher = Arc::new(EventPublisher::new(3));
    let device = spawn_device(RecordingRenderer::default(), publisher.clone()).await;
    let (sink, log) = spawn_notify_sink().await;
    let client = reqwest::Client::new();

    let event_url = format!("http://{device}/upnp/av_transport/event.xml");
    let response = client
        .request(subscribe_method(), &event_url)
        .header("CALLBACK", format!("<http://{sink}/evt>"))
        .header("NT", "upnp:event")
        .header("TIMEOUT", "Second-1800")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let sid = response.headers()["SID"].to_str().unwrap().to_string();
    assert!(sid.starts_with("uuid:"));
    assert_eq!(response.headers()["TIMEOUT"].to_str().unwrap(), "Second-1800");

    publisher
        .add_change("av_transport", "AVT", 0, &|w| {
            w.create_element("TransportState")
                .with_attribute(("val", "PLAYING"))
                .write_empty()?;
            Ok(())
        })
        .unwrap();
    publisher.publish().await;

    let seen = log.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].sid, sid);
    assert_eq!(seen[0].seq, "0");
    assert!(seen[0].body.contains("<e:propertyset"));
    assert!(seen[0].body.contains("<LastChange>"));
    assert!(seen[0]
        .body
        .contains("&lt;Event xmlns=\"urn:schemas-upnp-org:metadata-1-0/AVT/\"&gt;"));

    // second change goes out with the next sequence number
    publisher
        .add_change("av_transport", "AVT", 0, &|w| {
            w.create_element("TransportState")
                .with_attribute(("val", "STOPPED"))
                .write_empty()?;
            Ok(())
        })
        .unwrap();
    publisher.publish().await;
    let seen = log.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].seq, "1");

    // renewal with the same sid answers the same sid
    let response = client
        .request(subscribe_method(), &event_url)
        .header("SID", &sid)
        .header("TIMEOUT", "Second-300")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["SID"].to_str().unwrap(), sid);

    // unsubscribe, then the sid is gone
    let response = client
        .request(unsubscribe_method(), &event_url)
        .header("SID", &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let response = client
        .request(unsubscribe_method(), &event_url)
        .header("SID", &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn subscribe_without_callback_is_rejected() {
    let publisher = Arc::new(EventPublisher::new(3));
    let device = spawn_device(RecordingRenderer::default(), publisher).await;
    let client = reqwest::Client::new();
    let response = client
        .request(
            subscribe_method(),
            format!("http://{device}/upnp/av_transport/event.xml"),
        )
        .header("NT", "upnp:event")
        .header("TIMEOUT", "Second-1800")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn soap_action_round_trip() {
    let renderer = RecordingRenderer::default();
    let publisher = Arc::new(EventPublisher::new(3));
    let device = spawn_device(renderer.clone(), publisher).await;
    let client = reqwest::Client::new();

    let mut request = ActionRequest::new(
        URN::service(ServiceType::AVTransport),
        format!("http://{device}/upnp/av_transport/control.xml"),
        "SetAVTransportURI",
    );
    request.add_argument("InstanceID", "0");
    request.add_argument("CurrentURI", "http://x/y.mp3");
    request.add_argument("CurrentURIMetaData", "");

    let response = client
        .post(&request.control_url)
        .header("SOAPACTION", request.soap_action_header())
        .header("Content-Type", "text/xml")
        .body(request.to_envelope().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("<u:SetAVTransportURIResponse"));
    assert_eq!(
        renderer.uri.lock().unwrap().as_deref(),
        Some("http://x/y.mp3")
    );

    // volume query returns a typed value
    let mut request = ActionRequest::new(
        URN::service(ServiceType::RenderingControl),
        format!("http://{device}/upnp/rendering_control/control.xml"),
        "GetVolume",
    );
    request.add_argument("InstanceID", "0");
    request.add_argument("Channel", "Master");
    let response = client
        .post(&request.control_url)
        .header("SOAPACTION", request.soap_action_header())
        .header("Content-Type", "text/xml")
        .body(request.to_envelope().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();
    let reply = upnp_av::action::parse_action_reply(&body).unwrap().unwrap();
    assert_eq!(reply.argument("CurrentVolume"), Some("0"));
}

#[tokio::test]
async fn unknown_action_answers_bad_request() {
    let publisher = Arc::new(EventPublisher::new(3));
    let device = spawn_device(RecordingRenderer::default(), publisher).await;
    let client = reqwest::Client::new();

    let mut request = ActionRequest::new(
        URN::service(ServiceType::AVTransport),
        format!("http://{device}/upnp/av_transport/control.xml"),
        "FlyToTheMoon",
    );
    request.add_argument("InstanceID", "0");
    let response = client
        .post(&request.control_url)
        .header("SOAPACTION", request.soap_action_header())
        .header("Content-Type", "text/xml")
        .body(request.to_envelope().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body = response.text().await.unwrap();
    assert!(body.contains("<errorCode>401</errorCode>"));
}

#[tokio::test]
async fn scpd_documents_are_served() {
    let publisher = Arc::new(EventPublisher::new(3));
    let device = spawn_device(RecordingRenderer::default(), publisher).await;
    let client = reqwest::Client::new();
    let body = client
        .get(format!("http://{device}/upnp/av_transport/scpd.xml"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let scpd = upnp_av::templates::service_description::Scpd::read_xml(
        &mut quick_xml::Reader::from_str(&body),
    )
    .unwrap();
    assert!(scpd.actions.iter().any(|a| a.name == "SetAVTransportURI"));
    assert!(scpd.actions.iter().any(|a| a.name == "Play"));

    // description aliases resolve to the same document
    let desc = client
        .get(format!("http://{device}/upnp/devicedesc.xml"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let alias = client
        .get(format!("http://{device}/dlna/device.xml"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(desc, alias);
    assert!(desc.contains("<UDN>uuid:abc0abc0-0000-1111-2222-333344445555</UDN>"));
}

#[tokio::test]
async fn subscriber_reaches_subscribed_state_and_renews() {
    let publisher = Arc::new(EventPublisher::new(3));
    let device = spawn_device(RecordingRenderer::default(), publisher).await;

    let description =
        DeviceDescription::read_xml(&mut quick_xml::Reader::from_str(DESCRIPTION_XML)).unwrap();
    let info = DeviceInfo::from_description(
        &description,
        &format!("http://{device}/upnp/devicedesc.xml"),
    )
    .unwrap();
    let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
    registry.lock().unwrap().add_device(info);

    let subscriber = EventSubscriber::new(
        reqwest::Client::new(),
        registry.clone(),
        "http://127.0.0.1:9/evt".to_string(),
        5,
        0,
        Arc::new(|_, _, _| {}),
    );
    subscriber.set_active(true).await;

    let (sid, expires) = {
        let registry = registry.lock().unwrap();
        let udn = Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap();
        let device = registry.find_by_udn(&udn).unwrap();
        let service = &device.services[0];
        assert_eq!(service.subscription_state, SubscriptionState::Subscribed);
        (
            service.event_sub_sid.clone().unwrap(),
            service.time_subscription_expires.unwrap(),
        )
    };

    // inside the renewal margin the same sid is used and the lease extends
    tokio::time::sleep(Duration::from_millis(10)).await;
    subscriber.tick(expires - Duration::from_millis(400)).await;
    {
        let registry = registry.lock().unwrap();
        let udn = Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap();
        let device = registry.find_by_udn(&udn).unwrap();
        let service = &device.services[0];
        assert_eq!(service.subscription_state, SubscriptionState::Subscribed);
        assert_eq!(service.event_sub_sid.as_deref(), Some(sid.as_str()));
        assert!(service.time_subscription_expires.unwrap() > expires);
    }
}
