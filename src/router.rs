use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Router,
};
use axum_extra::headers::{self, HeaderMapExt};

use crate::{
    action::{ActionError, ActionPayload, ActionResponse, InArgumentPayload, SoapMessage},
    eventing::{parse_callback_header, parse_timeout_header, publisher::SubscribeOutcome, EventPublisher},
    service::{Service, UpnpService},
};

pub const DESC_PATH: &str = "/devicedesc.xml";

/// Routes the HTTP side of a UPnP device: the description document, per
/// service the SCPD, control and event endpoints, plus the conventional
/// aliases some control points probe for.
#[derive(Debug)]
pub struct UpnpRouter {
    path: String,
    router: Router,
    description_xml: Arc<str>,
    publisher: Arc<EventPublisher>,
    icon: Option<(String, Bytes, String)>,
}

fn xml_response(body: impl Into<String>) -> (HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.typed_insert(headers::ContentType::xml());
    (headers, body.into())
}

impl UpnpRouter {
    /// `path` is the prefix every device route lives under, e.g. `/upnp`.
    pub fn new(path: &str, description_xml: String, publisher: Arc<EventPublisher>) -> Self {
        let description_xml: Arc<str> = description_xml.into();
        let desc = description_xml.clone();
        let router = Router::new().route(
            DESC_PATH,
            get(move || {
                let desc = desc.clone();
                async move {
                    tracing::debug!("Serving device description");
                    xml_response(desc.to_string())
                }
            }),
        );
        Self {
            path: path.to_string(),
            router,
            description_xml,
            publisher,
            icon: None,
        }
    }

    /// Absolute path of the device description document.
    pub fn description_path(&self) -> String {
        format!("{}{}", self.path, DESC_PATH)
    }

    /// Serve icon bytes under `url_path` and as `/favicon.ico`.
    pub fn with_icon(mut self, mime: &str, bytes: impl Into<Bytes>, url_path: &str) -> Self {
        self.icon = Some((mime.to_string(), bytes.into(), url_path.to_string()));
        self
    }

    /// Mount one service: GET SCPD, POST control, SUBSCRIBE/UNSUBSCRIBE
    /// events.
    pub fn register_service<S: Service + Send + Sync + Clone + 'static>(
        mut self,
        service: S,
    ) -> Self {
        let base_path = format!("/{}", S::NAME);
        let scpd_path = format!("{base_path}/scpd.xml");
        let control_path = format!("{base_path}/control.xml");
        let event_path = format!("{base_path}/event.xml");
        let service = UpnpService::new(service);

        let action_handler = move |headers: HeaderMap, body: String| async move {
            let mut header = headers
                .get("soapaction")
                .context("soapaction header")?
                .to_str()
                .context("convert header to string")?;
            if let Some(stripped) = header.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                header = stripped;
            }
            let (_urn, action_name) = header.split_once('#').context("split soapaction header")?;
            tracing::info!("Action {action_name} invoked");
            let action: SoapMessage<ActionPayload<InArgumentPayload>> =
                SoapMessage::from_xml(body.as_bytes())?;
            let action = action.into_inner();

            if action.name() != action_name {
                tracing::warn!(
                    "Inconsistent soapaction header and action payload: {} vs {}",
                    action_name,
                    action.name(),
                );
            }
            let expected_action = service.find_action(action_name)?;
            let scanner = expected_action.input_scanner(action.arguments);

            let out_arguments = service.s.control_handler(action_name, scanner).await?;

            let args = expected_action.map_out_variables(
                crate::action::IntoValueList::into_value_list(out_arguments),
            );

            let action_response = ActionResponse {
                service_urn: S::URN,
                action_name: action_name.to_string(),
                args,
            };
            Ok::<_, ActionError>(action_response)
        };

        let scpd = S::service_description()
            .into_xml()
            .expect("services serialize without errors");
        let scpd_handler = move || async move {
            let response = String::from_utf8(scpd).expect("scpd to be utf-8");
            xml_response(response)
        };

        let publisher = self.publisher.clone();
        let event_handler = move |request: Request| async move {
            handle_event_request(publisher, S::NAME, request).await
        };

        self.router = self.router.route(&scpd_path, get(scpd_handler));
        self.router = self.router.route(&control_path, post(action_handler));
        self.router = self.router.route(&event_path, any(event_handler));
        self
    }
}

/// GENA entry point on a service's event path.
async fn handle_event_request(
    publisher: Arc<EventPublisher>,
    service_name: &'static str,
    request: Request,
) -> Response {
    let method = request.method().as_str().to_owned();
    let headers = request.headers();
    match method.as_str() {
        "SUBSCRIBE" => {
            let callback = headers
                .get("CALLBACK")
                .and_then(|v| v.to_str().ok())
                .map(parse_callback_header)
                .unwrap_or_default();
            let sid = headers.get("SID").and_then(|v| v.to_str().ok());
            let timeout_sec = parse_timeout_header(
                headers.get("TIMEOUT").and_then(|v| v.to_str().ok()),
                1800,
            );
            match publisher.subscribe(service_name, &callback, sid, timeout_sec) {
                SubscribeOutcome::Accepted { sid, timeout_sec } => Response::builder()
                    .status(StatusCode::OK)
                    .header("SID", sid)
                    .header("TIMEOUT", format!("Second-{timeout_sec}"))
                    .body(axum::body::Body::empty())
                    .expect("valid subscribe response"),
                SubscribeOutcome::MissingCallback => {
                    StatusCode::PRECONDITION_FAILED.into_response()
                }
            }
        }
        "UNSUBSCRIBE" => {
            let sid = headers
                .get("SID")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if publisher.unsubscribe(service_name, sid) {
                StatusCode::OK.into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

impl From<UpnpRouter> for Router {
    fn from(upnp_router: UpnpRouter) -> Self {
        let description_xml = upnp_router.description_xml.clone();
        let desc_handler = move || {
            let desc = description_xml.clone();
            async move { xml_response(desc.to_string()) }
        };

        let mut router = Router::new().nest(&upnp_router.path, upnp_router.router);
        // conventional aliases resolve to the device description
        for alias in ["/", "/index.html", "/dlna/device.xml"] {
            router = router.route(alias, get(desc_handler.clone()));
        }
        if let Some((mime, bytes, url_path)) = upnp_router.icon {
            let icon_handler = move || {
                let mime = mime.clone();
                let bytes = bytes.clone();
                async move { ([("Content-Type", mime)], bytes) }
            };
            if url_path != "/favicon.ico" {
                router = router.route(&url_path, get(icon_handler.clone()));
            }
            router = router.route("/favicon.ico", get(icon_handler));
        }
        router
    }
}
