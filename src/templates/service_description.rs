use quick_xml::{
    events::{BytesStart, Event},
    Writer,
};

use crate::{
    action::{Action, ArgumentDirection},
    service_variables::StateVariableDescriptor,
    FromXml, IntoXml, XmlReaderExt,
};

use super::SpecVersion;

/// Service Control Protocol Description document, device side.
///
/// Streams `<scpd>` with the action list and the service state table. The
/// action and state variable sets are fixed per service by UPnP AV 1.0.
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub spec_version: SpecVersion,
    pub variables: Vec<StateVariableDescriptor>,
    pub actions: Vec<Action>,
}

impl ServiceDescription {
    pub fn into_xml(&self) -> anyhow::Result<Vec<u8>> {
        let mut w = Writer::new(Vec::new());
        let parent =
            BytesStart::new("scpd").with_attributes([("xmlns", "urn:schemas-upnp-org:service-1-0")]);
        let parent_end = parent.to_end().into_owned();
        w.write_event(Event::Start(parent))?;

        w.write_serializable("specVersion", &self.spec_version)?;

        let action_list = BytesStart::new("actionList");
        w.write_event(Event::Start(action_list.to_owned()))?;
        for action in &self.actions {
            action.write_xml(&mut w)?;
        }
        w.write_event(Event::End(action_list.to_end()))?;

        let service_state_table = BytesStart::new("serviceStateTable");
        w.write_event(Event::Start(service_state_table.to_owned()))?;
        for variable in &self.variables {
            variable.write_xml(&mut w)?;
        }
        w.write_event(Event::End(service_state_table.to_end()))?;

        w.write_event(Event::End(parent_end))?;
        Ok(w.into_inner())
    }
}

/// An SCPD document fetched from a remote service, control point side.
///
/// Only the action table is retained; it is what the action builder needs to
/// validate argument names and order.
#[derive(Debug)]
pub struct Scpd {
    pub spec_version: SpecVersion,
    pub actions: Vec<ScpdAction>,
}

#[derive(Debug)]
pub struct ScpdAction {
    pub name: String,
    pub arguments: Vec<ScpdArgument>,
}

#[derive(Debug)]
pub struct ScpdArgument {
    pub name: String,
    pub direction: ArgumentDirection,
    pub related_state_variable: String,
}

impl<'a> FromXml<'a> for Scpd {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let scpd = r.read_to_start()?;
        anyhow::ensure!(scpd.local_name().as_ref() == b"scpd");

        let mut spec_version = SpecVersion::upnp_v1();
        let mut actions = Vec::new();

        loop {
            match r.read_event()? {
                Event::Start(start) => {
                    let end_name = start.name();
                    match start.local_name().as_ref() {
                        b"specVersion" => {
                            let major = r.read_to_start()?;
                            let major: usize = r.read_text(major.name())?.parse()?;
                            let minor = r.read_to_start()?;
                            let minor: usize = r.read_text(minor.name())?.parse()?;
                            spec_version = SpecVersion { major, minor };
                            r.read_to_end(end_name)?;
                        }
                        b"actionList" => loop {
                            match r.read_event_err_eof()? {
                                Event::Start(action) => {
                                    anyhow::ensure!(action.local_name().as_ref() == b"action");
                                    actions.push(ScpdAction::read_xml(r)?);
                                }
                                Event::End(end) if end.local_name().as_ref() == b"actionList" => {
                                    break;
                                }
                                _ => (),
                            }
                        },
                        _ => {
                            r.read_to_end(end_name)?;
                        }
                    }
                }
                Event::End(end) if end.local_name().as_ref() == b"scpd" => break,
                Event::Eof => anyhow::bail!("unterminated scpd document"),
                _ => (),
            }
        }

        Ok(Self {
            spec_version,
            actions,
        })
    }
}

impl<'a> FromXml<'a> for ScpdAction {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut name = String::new();
        let mut arguments = Vec::new();
        loop {
            match r.read_event_err_eof()? {
                Event::Start(start) => {
                    let end_name = start.name();
                    match start.local_name().as_ref() {
                        b"name" => name = r.read_text(end_name)?.to_string(),
                        b"argumentList" => loop {
                            match r.read_event_err_eof()? {
                                Event::Start(arg) => {
                                    anyhow::ensure!(arg.local_name().as_ref() == b"argument");
                                    arguments.push(ScpdArgument::read_xml(r)?);
                                }
                                Event::End(end)
                                    if end.local_name().as_ref() == b"argumentList" =>
                                {
                                    break;
                                }
                                _ => (),
                            }
                        },
                        _ => {
                            r.read_to_end(end_name)?;
                        }
                    }
                }
                Event::End(end) if end.local_name().as_ref() == b"action" => break,
                _ => (),
            }
        }
        anyhow::ensure!(!name.is_empty(), "action without a name");
        Ok(Self { name, arguments })
    }
}

impl<'a> FromXml<'a> for ScpdArgument {
    fn read_xml(r: &mut quick_xml::Reader<&'a [u8]>) -> anyhow::Result<Self> {
        let mut name = String::new();
        let mut direction = ArgumentDirection::In;
        let mut related_state_variable = String::new();
        loop {
            match r.read_event_err_eof()? {
                Event::Start(start) => {
                    let end_name = start.name();
                    match start.local_name().as_ref() {
                        b"name" => name = r.read_text(end_name)?.to_string(),
                        b"direction" => {
                            direction = r.read_text(end_name)?.parse()?;
                        }
                        b"relatedStateVariable" => {
                            related_state_variable = r.read_text(end_name)?.to_string();
                        }
                        _ => {
                            r.read_to_end(end_name)?;
                        }
                    }
                }
                Event::End(end) if end.local_name().as_ref() == b"argument" => break,
                _ => (),
            }
        }
        Ok(Self {
            name,
            direction,
            related_state_variable,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{action::ArgumentDirection, FromXml};

    use super::Scpd;

    #[test]
    fn parse_scpd_actions() {
        let raw = r#"<?xml version="1.0"?>
<scpd xmlns="urn:schemas-upnp-org:service-1-0">
<specVersion><major>1</major><minor>0</minor></specVersion>
<actionList>
<action>
<name>Play</name>
<argumentList>
<argument><name>InstanceID</name><direction>in</direction><relatedStateVariable>A_ARG_TYPE_InstanceID</relatedStateVariable></argument>
<argument><name>Speed</name><direction>in</direction><relatedStateVariable>TransportPlaySpeed</relatedStateVariable></argument>
</argumentList>
</action>
<action><name>GetTransportInfo</name></action>
</actionList>
<serviceStateTable>
<stateVariable sendEvents="no"><name>TransportPlaySpeed</name><dataType>string</dataType></stateVariable>
</serviceStateTable>
</scpd>"#;
        let scpd = Scpd::read_xml(&mut quick_xml::Reader::from_str(raw)).unwrap();
        assert_eq!(scpd.spec_version.major, 1);
        assert_eq!(scpd.actions.len(), 2);
        let play = &scpd.actions[0];
        assert_eq!(play.name, "Play");
        assert_eq!(play.arguments.len(), 2);
        assert_eq!(play.arguments[0].name, "InstanceID");
        assert!(matches!(play.arguments[0].direction, ArgumentDirection::In));
        assert_eq!(
            play.arguments[1].related_state_variable,
            "TransportPlaySpeed"
        );
    }
}
