use core::str;
use std::{borrow::Cow, collections::HashMap, fmt::Display, str::FromStr};

use anyhow::Context;
use axum::{http::HeaderMap, response::IntoResponse};
use axum_extra::headers::{self, HeaderMapExt};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use reqwest::StatusCode;

use crate::{service::ArgumentScanner, XmlReaderExt};

use super::{
    service_variables::{IntoUpnpValue, SVariable, StateVariableDescriptor},
    urn::URN,
    FromXml, IntoXml, XmlWriter,
};

#[derive(Debug, Clone)]
pub struct Argument {
    name: &'static str,
    related_variable: StateVariableDescriptor,
}

#[derive(Debug, Clone, Copy)]
pub enum ArgumentDirection {
    In,
    Out,
}

impl FromStr for ArgumentDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            _ => Err(anyhow::anyhow!("expected in or out, got {s}")),
        }
    }
}

impl From<ArgumentDirection> for &str {
    fn from(value: ArgumentDirection) -> Self {
        match value {
            ArgumentDirection::In => "in",
            ArgumentDirection::Out => "out",
        }
    }
}

impl Argument {
    fn into_sv<S: SVariable>(name: &'static str) -> Self {
        Self {
            name,
            related_variable: StateVariableDescriptor::from_variable::<S>(),
        }
    }

    /// `<argument>` triple of an SCPD action list entry.
    pub fn write_xml(
        &self,
        w: &mut XmlWriter,
        direction: ArgumentDirection,
    ) -> quick_xml::Result<()> {
        let parent = BytesStart::new("argument");
        w.write_event(Event::Start(parent.clone()))?;
        w.create_element("name")
            .write_text_content(BytesText::new(self.name))?;

        w.create_element("direction")
            .write_text_content(BytesText::new(direction.into()))?;

        w.create_element("relatedStateVariable")
            .write_text_content(BytesText::new(self.related_variable.name))?;
        w.write_event(Event::End(parent.to_end()))?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.name
    }
}

/// A device-side action: the rule table entry the SOAP dispatcher matches
/// against, and the SCPD `<action>` element.
#[derive(Debug, Clone)]
pub struct Action {
    action_name: String,
    in_variables: Vec<Argument>,
    out_variables: Vec<Argument>,
}

impl Action {
    pub fn empty(name: &str) -> Self {
        Self {
            action_name: name.to_string(),
            in_variables: Vec::new(),
            out_variables: Vec::new(),
        }
    }

    pub fn add_input<T: SVariable>(&mut self, name: &'static str) {
        self.in_variables.push(Argument::into_sv::<T>(name));
    }

    pub fn add_output<T: SVariable>(&mut self, name: &'static str) {
        self.out_variables.push(Argument::into_sv::<T>(name));
    }

    pub fn name(&self) -> &str {
        &self.action_name
    }

    pub fn in_variables(&self) -> &[Argument] {
        &self.in_variables
    }

    pub fn out_variables(&self) -> &[Argument] {
        &self.out_variables
    }

    pub fn input_scanner<'a>(&'a self, input: Vec<InArgumentPayload<'a>>) -> ArgumentScanner<'a> {
        ArgumentScanner::new(
            input,
            self.in_variables.iter().map(|v| v.name()).collect(),
        )
    }

    pub fn map_out_variables(
        &self,
        list: Vec<Box<dyn IntoXml + Send + Sync>>,
    ) -> Vec<OutArgumentsPayload> {
        if list.len() != self.out_variables.len() {
            tracing::warn!(
                "Mismatched output arguments length from {} action ({}/{})",
                self.name(),
                list.len(),
                self.out_variables.len(),
            );
        }
        self.out_variables
            .iter()
            .zip(list)
            .map(|(arg, val)| OutArgumentsPayload {
                name: arg.name().to_owned(),
                value: val,
            })
            .collect()
    }
}

impl IntoXml for Action {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        let parent = BytesStart::new("action");
        w.write_event(Event::Start(parent.clone()))?;

        w.create_element("name")
            .write_text_content(BytesText::new(&self.action_name))?;

        let argument_list = BytesStart::new("argumentList");
        w.write_event(Event::Start(argument_list.clone()))?;
        for argument in &self.in_variables {
            argument.write_xml(w, ArgumentDirection::In)?;
        }
        for argument in &self.out_variables {
            argument.write_xml(w, ArgumentDirection::Out)?;
        }
        w.write_event(Event::End(argument_list.to_end()))?;

        w.write_event(Event::End(parent.to_end()))?;
        Ok(())
    }
}

/// `<s:Envelope>`/`<s:Body>` wrapper around a payload.
#[derive(Debug)]
pub struct SoapMessage<T> {
    inner: T,
}

impl<T> SoapMessage<T> {
    pub fn new(payload: T) -> Self {
        Self { inner: payload }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<'a, T: FromXml<'a>> SoapMessage<T> {
    pub fn from_xml(raw_xml: &'a [u8]) -> anyhow::Result<Self> {
        let mut r = quick_xml::Reader::from_reader(raw_xml);
        Self::read_xml(&mut r)
    }
}

impl<'a, T: FromXml<'a>> FromXml<'a> for SoapMessage<T> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let envelope = r.read_to_start()?.into_owned();
        anyhow::ensure!(envelope.local_name().as_ref() == b"Envelope");
        let body = r.read_to_start()?.into_owned();
        anyhow::ensure!(body.local_name().as_ref() == b"Body");

        let payload = T::read_xml(r)?;

        r.read_to_end(body.name())?;
        r.read_to_end(envelope.name())?;
        Ok(Self { inner: payload })
    }
}

impl<T: IntoXml> SoapMessage<T> {
    pub fn into_xml(self) -> anyhow::Result<String> {
        use quick_xml::Writer;
        let mut w = Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let envelope = BytesStart::new("s:Envelope").with_attributes([
            ("xmlns:s", "http://schemas.xmlsoap.org/soap/envelope/"),
            (
                "s:encodingStyle",
                "http://schemas.xmlsoap.org/soap/encoding/",
            ),
        ]);
        let envelope_end = envelope.to_end().into_owned();
        w.write_event(Event::Start(envelope.clone()))?;

        let body = BytesStart::new("s:Body");
        let body_end = body.to_end().into_owned();
        w.write_event(Event::Start(body))?;

        self.inner.write_xml(&mut w)?;

        w.write_event(Event::End(body_end))?;
        w.write_event(Event::End(envelope_end))?;
        Ok(String::from_utf8(w.into_inner())?)
    }
}

impl<T: IntoXml> IntoResponse for SoapMessage<T> {
    fn into_response(self) -> axum::response::Response {
        let mut header_map = HeaderMap::new();
        header_map.typed_insert(headers::ContentType::xml());
        let body = self.into_xml().expect("serialization not fail");
        (header_map, body).into_response()
    }
}

/// An action invocation inside a SOAP body.
#[derive(Debug, Clone)]
pub struct ActionPayload<T> {
    pub name: String,
    pub arguments: Vec<T>,
}

impl<'a> FromXml<'a> for ActionPayload<InArgumentPayload<'a>> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self>
    where
        Self: Sized,
    {
        let action_name_tag = r.read_to_start()?;
        let action_name_tag_end = action_name_tag.to_end().into_owned();
        let action_name = String::from_utf8(action_name_tag.local_name().into_inner().to_vec())?;
        let mut arguments = Vec::new();

        loop {
            let next = r.read_event_err_eof()?;
            match next {
                Event::Start(var) => {
                    let name = String::from_utf8(var.local_name().into_inner().to_vec())?;
                    let value = r.read_text(var.name())?;
                    arguments.push(InArgumentPayload { name, value });
                }
                Event::Empty(var) => {
                    let name = String::from_utf8(var.local_name().into_inner().to_vec())?;
                    arguments.push(InArgumentPayload {
                        name,
                        value: Cow::Borrowed(""),
                    });
                }
                Event::End(end) if end == action_name_tag_end => {
                    break;
                }
                _ => (),
            }
        }

        Ok(Self {
            name: action_name,
            arguments,
        })
    }
}

impl<'a> ActionPayload<InArgumentPayload<'a>> {
    pub fn arguments_map(&self) -> HashMap<String, &str> {
        self.arguments
            .iter()
            .map(|a| (a.name.clone(), a.value.as_ref()))
            .collect()
    }
}

impl<T> ActionPayload<T> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Inbound argument: name plus the raw (still entity-encoded) value.
#[derive(Debug, Clone)]
pub struct InArgumentPayload<'a> {
    pub name: String,
    pub value: Cow<'a, str>,
}

impl InArgumentPayload<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub struct OutArgumentsPayload {
    pub name: String,
    pub value: Box<dyn IntoXml + Send + Sync>,
}

impl OutArgumentsPayload {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// `<u:<ActionName>Response>` with its output arguments.
#[derive(Debug)]
pub struct ActionResponse<T> {
    pub action_name: String,
    pub service_urn: URN,
    pub args: Vec<T>,
}

impl IntoXml for ActionResponse<OutArgumentsPayload> {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        let action = BytesStart::new(format!("u:{}Response", self.action_name))
            .with_attributes([("xmlns:u", self.service_urn.to_string().as_str())]);
        let action_end = action.to_end().into_owned();
        w.write_event(Event::Start(action))?;

        for argument in &self.args {
            w.create_element(argument.name())
                .write_inner_content(|w| argument.value.write_xml(w))?;
        }

        w.write_event(Event::End(action_end))
    }
}

impl<'a> ActionResponse<InArgumentPayload<'a>> {
    pub fn read_xml(
        r: &mut quick_xml::Reader<&'a [u8]>,
        urn: URN,
        action_tag_name: quick_xml::name::QName<'_>,
    ) -> anyhow::Result<Self> {
        let mut arguments = Vec::new();

        while let Ok(event) = r.read_event() {
            match event {
                Event::Start(start) => {
                    let name = String::from_utf8(start.local_name().as_ref().to_vec())?;
                    let value = r.read_text(start.name())?;
                    arguments.push(InArgumentPayload { name, value });
                }
                Event::Empty(start) => {
                    let name = String::from_utf8(start.local_name().as_ref().to_vec())?;
                    arguments.push(InArgumentPayload {
                        name,
                        value: Cow::Borrowed(""),
                    });
                }
                Event::End(end) if end.name() == action_tag_name => {
                    break;
                }
                Event::Text(_) => {}
                r => {
                    anyhow::bail!("expected action end, got {:?}", r);
                }
            }
        }

        let action_name = str::from_utf8(action_tag_name.local_name().into_inner())
            .context("convert action tag name to string")?;
        let action_name = action_name
            .strip_suffix("Response")
            .context("strip Response suffix")?
            .to_owned();

        Ok(Self {
            action_name,
            service_urn: urn,
            args: arguments,
        })
    }
}

impl IntoResponse for ActionResponse<OutArgumentsPayload> {
    fn into_response(self) -> axum::response::Response {
        SoapMessage::new(self).into_response()
    }
}

impl<'a> FromXml<'a> for Result<ActionResponse<InArgumentPayload<'a>>, ActionError> {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let start = r.read_to_start()?;
        match start.local_name().as_ref() {
            b"Fault" => Ok(Err(ActionError::read_xml(r, start.name())?)),
            other if other.ends_with(b"Response") => {
                let urn = start
                    .attributes()
                    .flatten()
                    .filter_map(|attr| attr.unescape_value().ok())
                    .find_map(|attr| attr.starts_with("urn").then(|| URN::from_str(&attr)));
                let urn = urn.context("urn attribute is not found")?;
                let urn = urn.context("failed to parse urn attribute")?;
                ActionResponse::read_xml(r, urn, start.name()).map(Ok)
            }
            r => Err(anyhow::anyhow!("expected fault or response, got {:?}", r)),
        }
    }
}

/// A single action a control point wants to invoke: the target service's
/// type urn and control url, the action name, and the ordered arguments.
/// Built by the caller, consumed once by the dispatcher.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub service_type: URN,
    pub control_url: String,
    pub action: String,
    pub arguments: Vec<(String, String)>,
}

impl ActionRequest {
    pub fn new(service_type: URN, control_url: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            service_type,
            control_url: control_url.into(),
            action: action.into(),
            arguments: Vec::new(),
        }
    }

    pub fn add_argument(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    /// `SOAPACTION` header value, quotes included.
    pub fn soap_action_header(&self) -> String {
        format!("\"{}#{}\"", self.service_type, self.action)
    }

    /// Serialize into the SOAP envelope posted to the control url.
    pub fn to_envelope(&self) -> anyhow::Result<String> {
        let mut w = quick_xml::Writer::new(Vec::new());
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let envelope = BytesStart::new("s:Envelope").with_attributes([
            ("xmlns:s", "http://schemas.xmlsoap.org/soap/envelope/"),
            (
                "s:encodingStyle",
                "http://schemas.xmlsoap.org/soap/encoding/",
            ),
        ]);
        w.write_event(Event::Start(envelope))?;
        w.write_event(Event::Start(BytesStart::new("s:Body")))?;

        let action_name = format!("u:{}", self.action);
        let urn = self.service_type.to_string();
        let action =
            BytesStart::new(action_name.as_str()).with_attributes([("xmlns:u", urn.as_str())]);
        w.write_event(Event::Start(action))?;
        for (name, value) in &self.arguments {
            w.create_element(name.as_str())
                .write_text_content(BytesText::new(value))?;
        }
        w.write_event(Event::End(BytesEnd::new(action_name.as_str())))?;

        w.write_event(Event::End(BytesEnd::new("s:Body")))?;
        w.write_event(Event::End(BytesEnd::new("s:Envelope")))?;
        Ok(String::from_utf8(w.into_inner())?)
    }
}

/// Join the device base url with a (possibly absolute) control path,
/// collapsing a doubled slash at the seam.
pub fn join_control_url(base_url: &str, control_url: &str) -> String {
    if control_url.starts_with("http://") || control_url.starts_with("https://") {
        return control_url.to_string();
    }
    let base = base_url.trim_end_matches('/');
    let path = control_url.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Unescape the entity substitutions the SOAP printer applied to argument
/// values. The `Result` argument is exempt so embedded DIDL-Lite survives
/// round-tripping.
fn unescape_argument(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Outcome of one posted action: validity flag plus the ordered response
/// arguments exactly as the SOAP response listed them.
#[derive(Debug, Clone, Default)]
pub struct ActionReply {
    pub valid: bool,
    pub arguments: Vec<(String, String)>,
}

impl ActionReply {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            arguments: Vec::new(),
        }
    }

    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn from_response(response: ActionResponse<InArgumentPayload<'_>>) -> Self {
        let arguments = response
            .args
            .into_iter()
            .map(|arg| {
                let value = if arg.name == "Result" {
                    arg.value.into_owned()
                } else {
                    unescape_argument(&arg.value)
                };
                (arg.name, value)
            })
            .collect();
        Self {
            valid: true,
            arguments,
        }
    }
}

/// Parse the body of a 200 response to an action POST.
pub fn parse_action_reply(body: &str) -> anyhow::Result<Result<ActionReply, ActionError>> {
    let mut reader = quick_xml::Reader::from_str(body);
    let response =
        SoapMessage::<Result<ActionResponse<InArgumentPayload>, ActionError>>::read_xml(
            &mut reader,
        )?
        .into_inner();
    Ok(response.map(ActionReply::from_response))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorCode {
    /// No action by that name at this service
    InvalidAction,
    /// Not enough in args, args in the wrong order, or args of the wrong type
    InvalidArguments,
    /// Current state of the service prevents invoking the action
    ActionFailed,
    /// The argument value is invalid
    ArgumentInvalid,
    /// An argument value is outside the allowed range or value list
    ArgumentValueOutOfRange,
    OptionalActionNotImplemented,
    Other(u16),
}

impl ActionErrorCode {
    pub fn code(&self) -> u16 {
        match self {
            ActionErrorCode::InvalidAction => 401,
            ActionErrorCode::InvalidArguments => 402,
            ActionErrorCode::ActionFailed => 501,
            ActionErrorCode::ArgumentInvalid => 600,
            ActionErrorCode::ArgumentValueOutOfRange => 601,
            ActionErrorCode::OptionalActionNotImplemented => 602,
            ActionErrorCode::Other(code) => *code,
        }
    }
}

impl From<u16> for ActionErrorCode {
    fn from(value: u16) -> Self {
        match value {
            401 => ActionErrorCode::InvalidAction,
            402 => ActionErrorCode::InvalidArguments,
            501 => ActionErrorCode::ActionFailed,
            600 => ActionErrorCode::ArgumentInvalid,
            601 => ActionErrorCode::ArgumentValueOutOfRange,
            602 => ActionErrorCode::OptionalActionNotImplemented,
            _ => ActionErrorCode::Other(value),
        }
    }
}

impl From<ActionErrorCode> for ActionError {
    fn from(code: ActionErrorCode) -> Self {
        Self {
            code,
            description: None,
        }
    }
}

#[derive(Debug)]
pub struct ActionError {
    pub code: ActionErrorCode,
    pub description: Option<String>,
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            code: ActionErrorCode::ActionFailed,
            description: Some(err.to_string()),
        }
    }
}

impl Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(description) = &self.description {
            write!(f, "{}: {}", self.code.code(), description)
        } else {
            write!(f, "{}", self.code.code())
        }
    }
}
impl std::error::Error for ActionError {}

impl IntoXml for ActionError {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        let parent = BytesStart::new("s:Fault");
        let parent_end = parent.to_end().into_owned();
        w.write_event(Event::Start(parent.clone()))?;

        w.create_element("faultcode")
            .write_text_content(BytesText::new("s:Client"))?;
        w.create_element("faultstring")
            .write_text_content(BytesText::new("UPnPError"))?;
        let detail = BytesStart::new("detail");
        let detail_end = detail.to_end().into_owned();
        w.write_event(Event::Start(detail.clone()))?;

        w.create_element("UPnPError")
            .with_attribute(("xmlns", "urn:schemas-upnp-org:control-1-0"))
            .write_inner_content(|w| {
                w.create_element("errorCode")
                    .write_text_content(BytesText::new(&self.code.code().to_string()))?;
                if let Some(description) = &self.description {
                    w.create_element("errorDescription")
                        .write_text_content(BytesText::new(description))?;
                }
                Ok::<(), quick_xml::Error>(())
            })?;

        w.write_event(Event::End(detail_end))?;
        w.write_event(Event::End(parent_end))
    }
}

impl ActionError {
    fn read_xml<'a>(
        r: &mut quick_xml::Reader<&'a [u8]>,
        end_tag: quick_xml::name::QName<'_>,
    ) -> anyhow::Result<Self> {
        let fault_code = r.read_to_start()?;
        anyhow::ensure!(fault_code.local_name().as_ref() == b"faultcode");
        r.read_to_end(fault_code.name())?;
        let fault_string = r.read_to_start()?;
        anyhow::ensure!(fault_string.local_name().as_ref() == b"faultstring");
        let fault_string_text = r.read_text(fault_string.name())?;
        anyhow::ensure!(fault_string_text == "UPnPError");
        let detail = r.read_to_start()?;
        anyhow::ensure!(detail.local_name().as_ref() == b"detail");
        let upnp_error = r.read_to_start()?;
        anyhow::ensure!(upnp_error.local_name().as_ref() == b"UPnPError");
        let error_code = r.read_to_start()?;
        anyhow::ensure!(error_code.local_name().as_ref() == b"errorCode");
        let code = r.read_text(error_code.name())?;
        let code: u16 = code.parse().context("parse error code")?;
        let mut description = None;

        while let Ok(event) = r.read_event() {
            match event {
                Event::Start(start) => {
                    anyhow::ensure!(start.local_name().as_ref() == b"errorDescription");
                    description = Some(r.read_text(start.name())?.to_string());
                    r.read_to_end(upnp_error.name())?;
                    break;
                }
                Event::End(end) => {
                    anyhow::ensure!(end == upnp_error.to_end());
                    break;
                }
                Event::Text(_) => {}
                r => Err(anyhow::anyhow!(
                    "expected description or fault end, got {:?}",
                    r
                ))?,
            }
        }

        r.read_to_end(detail.name())?;
        r.read_to_end(end_tag)?;

        Ok(Self {
            code: code.into(),
            description,
        })
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> axum::response::Response {
        // unmatched actions and argument mismatches are the caller's fault
        let status_code = match self.code {
            ActionErrorCode::InvalidAction | ActionErrorCode::InvalidArguments => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = SoapMessage::new(self);
        (status_code, body).into_response()
    }
}

/// Conversion of handler return values into the dispatcher's boxed output
/// argument list.
pub trait IntoValueList {
    fn into_value_list(self) -> Vec<Box<dyn IntoXml + Send + Sync>>;
}

impl<T: IntoUpnpValue + Send + Sync + 'static> IntoValueList for T {
    fn into_value_list(self) -> Vec<Box<dyn IntoXml + Send + Sync>> {
        vec![Box::new(self)]
    }
}

impl IntoValueList for () {
    fn into_value_list(self) -> Vec<Box<dyn IntoXml + Send + Sync>> {
        vec![]
    }
}

impl IntoValueList for Vec<Box<dyn IntoXml + Send + Sync>> {
    fn into_value_list(self) -> Vec<Box<dyn IntoXml + Send + Sync>> {
        self
    }
}

macro_rules! impl_tuples_into_value_list {
    ($(($($types:ident),*)),*) => {
        $(
            #[allow(non_snake_case, unused_variables)]
            impl<$($types: IntoUpnpValue + Send + Sync + 'static),*> IntoValueList for ($($types,)*) {
                fn into_value_list(self) -> Vec<Box<dyn IntoXml + Send + Sync>> {
                    let ($($types,)*) = self;
                    let mut args: Vec<Box<dyn IntoXml + Send + Sync>> = Vec::new();
                    $(
                        args.push(Box::new($types));
                    )*
                    args
                }
            }
        )*
    };
}

impl_tuples_into_value_list! {
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F),
    (A, B, C, D, E, F, G),
    (A, B, C, D, E, F, G, H),
    (A, B, C, D, E, F, G, H, I)
}

#[cfg(test)]
mod tests {

    use crate::{
        action::{ActionRequest, InArgumentPayload, SoapMessage},
        urn::{ServiceType, URN},
    };

    use super::{join_control_url, parse_action_reply, ActionPayload};

    #[test]
    fn parse_action_payload_xml() {
        let raw = br#"<?xml version="1.0"?>
<s:Envelope
xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
<s:Body>
<u:actionName xmlns:u="urn:schemas-upnp-org:service:serviceType:v">
<argumentName>in arg value</argumentName>
<anotherArgument>another value</anotherArgument>
<!-- other in args and their values go here, if any -->
</u:actionName>
</s:Body>
</s:Envelope>"#;
        let payload: SoapMessage<ActionPayload<InArgumentPayload>> =
            SoapMessage::from_xml(raw).unwrap();
        let payload = payload.into_inner();
        assert_eq!(payload.name, "actionName");
        let args = payload.arguments_map();
        assert_eq!(args.get("argumentName"), Some("in arg value").as_ref());
        assert_eq!(args.get("anotherArgument"), Some("another value").as_ref());
    }

    #[test]
    fn request_envelope_round_trip() {
        let mut request = ActionRequest::new(
            URN::service(ServiceType::AVTransport),
            "http://192.168.1.20:44757/upnp/av_transport/control.xml",
            "SetAVTransportURI",
        );
        request.add_argument("InstanceID", "0");
        request.add_argument("CurrentURI", "http://x/y.mp3");
        request.add_argument("CurrentURIMetaData", "");
        assert_eq!(
            request.soap_action_header(),
            "\"urn:schemas-upnp-org:service:AVTransport:1#SetAVTransportURI\""
        );
        let envelope = request.to_envelope().unwrap();
        let payload: SoapMessage<ActionPayload<InArgumentPayload>> =
            SoapMessage::from_xml(envelope.as_bytes()).unwrap();
        let payload = payload.into_inner();
        assert_eq!(payload.name, "SetAVTransportURI");
        let names: Vec<&str> = payload.arguments.iter().map(|a| a.name()).collect();
        assert_eq!(names, ["InstanceID", "CurrentURI", "CurrentURIMetaData"]);
        assert_eq!(payload.arguments[1].value, "http://x/y.mp3");
    }

    #[test]
    fn response_preserves_result_and_unescapes_others() {
        let body = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
<s:Body>
<u:BrowseResponse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1">
<Result>&lt;DIDL-Lite&gt;&lt;item id="1"/&gt;&lt;/DIDL-Lite&gt;</Result>
<NumberReturned>1</NumberReturned>
<Note>a &amp; b &quot;c&quot;</Note>
</u:BrowseResponse>
</s:Body>
</s:Envelope>"#;
        let reply = parse_action_reply(body).unwrap().unwrap();
        assert!(reply.valid);
        let names: Vec<&str> = reply.arguments.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["Result", "NumberReturned", "Note"]);
        assert_eq!(
            reply.argument("Result"),
            Some("&lt;DIDL-Lite&gt;&lt;item id=\"1\"/&gt;&lt;/DIDL-Lite&gt;")
        );
        assert_eq!(reply.argument("Note"), Some("a & b \"c\""));
    }

    #[test]
    fn fault_parses_into_action_error() {
        let body = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
<s:Body>
<s:Fault>
<faultcode>s:Client</faultcode>
<faultstring>UPnPError</faultstring>
<detail>
<UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
<errorCode>401</errorCode>
</UPnPError>
</detail>
</s:Fault>
</s:Body>
</s:Envelope>"#;
        let error = parse_action_reply(body).unwrap().unwrap_err();
        assert_eq!(error.code.code(), 401);
    }

    #[test]
    fn control_url_join_normalizes_slashes() {
        assert_eq!(
            join_control_url("http://192.168.1.20:44757/", "/AVT/control"),
            "http://192.168.1.20:44757/AVT/control"
        );
        assert_eq!(
            join_control_url("http://192.168.1.20:44757", "AVT/control"),
            "http://192.168.1.20:44757/AVT/control"
        );
        assert_eq!(
            join_control_url("http://h", "http://other/control"),
            "http://other/control"
        );
    }
}
