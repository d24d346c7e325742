use std::sync::Arc;

use crate::{
    action::{ActionError, ActionErrorCode, InArgumentPayload, IntoValueList},
    service_variables::IntoUpnpValue,
};

use super::{action::Action, templates::service_description::ServiceDescription, urn::URN};

/// A device-side UPnP service: its identity, SCPD document, and the control
/// handler the SOAP dispatcher invokes.
pub trait Service {
    /// Path segment the router mounts the service under
    const NAME: &str;
    const URN: URN;

    fn service_description() -> ServiceDescription;
    fn actions() -> Vec<Action>;
    fn control_handler<'a>(
        &self,
        name: &'a str,
        inputs: ArgumentScanner<'a>,
    ) -> impl std::future::Future<Output = Result<impl IntoValueList, ActionError>> + Send;
}

/// Walks inbound SOAP arguments against the action's declared inputs,
/// enforcing name order and converting values as it goes.
#[derive(Debug)]
pub struct ArgumentScanner<'a> {
    payload: std::vec::IntoIter<InArgumentPayload<'a>>,
    expected: std::vec::IntoIter<&'a str>,
}

impl<'a> ArgumentScanner<'a> {
    pub fn new(payload: Vec<InArgumentPayload<'a>>, expected: Vec<&'a str>) -> Self {
        Self {
            payload: payload.into_iter(),
            expected: expected.into_iter(),
        }
    }

    pub fn next<T: IntoUpnpValue>(&mut self) -> Result<T, ActionError> {
        let Some(expected_next) = self.expected.next() else {
            return Err(ActionErrorCode::InvalidArguments.into());
        };
        let Some(next) = self.payload.next() else {
            return Err(ActionErrorCode::InvalidArguments.into());
        };
        if next.name() != expected_next {
            return Err(ActionErrorCode::InvalidArguments.into());
        }
        let Ok(arg) = T::from_xml_value(&next.value) else {
            return Err(ActionErrorCode::InvalidArguments.into());
        };
        Ok(arg)
    }
}

/// A registered service together with its resolved action rule table.
#[derive(Debug, Clone)]
pub struct UpnpService<S: Service> {
    pub actions: Arc<Vec<Action>>,
    pub s: S,
}

impl<S: Service> UpnpService<S> {
    pub fn new(service: S) -> Self {
        Self {
            actions: Arc::new(S::actions()),
            s: service,
        }
    }

    /// First rule whose name equals the invoked action wins; no rule means
    /// the request is answered with an invalid action fault.
    pub fn find_action(&self, name: &str) -> Result<&Action, ActionError> {
        Ok(self
            .actions
            .iter()
            .find(|a| a.name() == name)
            .ok_or(ActionErrorCode::InvalidAction)?)
    }
}
