use core::str;
use std::{fmt::Display, str::FromStr};

use anyhow::Context;
use quick_xml::events::{BytesStart, BytesText, Event};

use super::{IntoXml, XmlWriter};

/// UPnP data types as they appear in `<dataType>` elements of an SCPD document.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum DataType {
    Ui1,
    Ui2,
    Ui4,
    I1,
    I2,
    I4,
    Int,
    R4,
    R8,
    Number,
    Fixed14_4,
    Char,
    #[default]
    String,
    Date,
    DateTime,
    Time,
    Boolean,
    BinBase64,
    BinHex,
    Uri,
    Uuid,
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Ui1 => "ui1",
            DataType::Ui2 => "ui2",
            DataType::Ui4 => "ui4",
            DataType::I1 => "i1",
            DataType::I2 => "i2",
            DataType::I4 => "i4",
            DataType::Int => "int",
            DataType::R4 => "r4",
            DataType::R8 => "r8",
            DataType::Number => "number",
            DataType::Fixed14_4 => "fixed.14.4",
            DataType::Char => "char",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::DateTime => "dateTime",
            DataType::Time => "time",
            DataType::Boolean => "boolean",
            DataType::BinBase64 => "bin.base64",
            DataType::BinHex => "bin.hex",
            DataType::Uri => "uri",
            DataType::Uuid => "uuid",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DataType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ui1" => Ok(DataType::Ui1),
            "ui2" => Ok(DataType::Ui2),
            "ui4" => Ok(DataType::Ui4),
            "i1" => Ok(DataType::I1),
            "i2" => Ok(DataType::I2),
            "i4" => Ok(DataType::I4),
            "int" => Ok(DataType::Int),
            "r4" => Ok(DataType::R4),
            "r8" => Ok(DataType::R8),
            "number" => Ok(DataType::Number),
            "fixed.14.4" => Ok(DataType::Fixed14_4),
            "char" => Ok(DataType::Char),
            "string" => Ok(DataType::String),
            "date" => Ok(DataType::Date),
            "dateTime" => Ok(DataType::DateTime),
            "time" => Ok(DataType::Time),
            "boolean" => Ok(DataType::Boolean),
            "bin.base64" => Ok(DataType::BinBase64),
            "bin.hex" => Ok(DataType::BinHex),
            "uri" => Ok(DataType::Uri),
            "uuid" => Ok(DataType::Uuid),
            data_type => Err(anyhow::anyhow!("unrecognized data type: {data_type}")),
        }
    }
}

fn parse_bool(str_val: &str) -> anyhow::Result<bool> {
    match str_val {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(anyhow::anyhow!("unknown boolean value: {str_val}")),
    }
}

/// Conversion between Rust types and the textual values carried in SOAP
/// arguments and evented variables.
pub trait IntoUpnpValue: IntoXml {
    const TYPE_NAME: DataType = DataType::String;
    fn from_xml_value(value: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}

macro_rules! impl_numeric_upnp_value {
    ($(($ty:ty, $data_type:expr)),* $(,)?) => {
        $(
            impl IntoUpnpValue for $ty {
                const TYPE_NAME: DataType = $data_type;

                fn from_xml_value(value: &str) -> anyhow::Result<Self> {
                    value.parse().context(concat!("parse ", stringify!($ty)))
                }
            }

            impl IntoXml for $ty {
                fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
                    w.write_event(Event::Text(BytesText::from_escaped(self.to_string())))
                }
            }
        )*
    };
}

impl_numeric_upnp_value! {
    (u8, DataType::Ui1),
    (u16, DataType::Ui2),
    (u32, DataType::Ui4),
    (i8, DataType::I1),
    (i16, DataType::I2),
    (i32, DataType::I4),
}

impl IntoUpnpValue for bool {
    const TYPE_NAME: DataType = DataType::Boolean;
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        parse_bool(value)
    }
}

impl IntoXml for bool {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        // UPnP carries booleans as "1"/"0" on the wire
        let val = if *self { "1" } else { "0" };
        w.write_event(Event::Text(BytesText::new(val)))
    }
}

impl IntoUpnpValue for uuid::Uuid {
    const TYPE_NAME: DataType = DataType::Uuid;
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        value.parse().context("parse uuid")
    }
}

impl IntoXml for uuid::Uuid {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        w.write_event(Event::Text(BytesText::from_escaped(self.to_string())))
    }
}

impl IntoUpnpValue for String {
    const TYPE_NAME: DataType = DataType::String;
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        Ok(value.to_owned())
    }
}

impl IntoXml for String {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        w.write_event(Event::Text(BytesText::new(self)))
    }
}

impl IntoXml for &str {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        w.write_event(Event::Text(BytesText::new(self)))
    }
}

impl<T: IntoUpnpValue> IntoUpnpValue for Option<T> {
    fn from_xml_value(value: &str) -> anyhow::Result<Self>
    where
        Self: Sized,
    {
        if value.is_empty() {
            Ok(Self::None)
        } else {
            T::from_xml_value(value).map(Some)
        }
    }
}

impl<T: IntoXml> IntoXml for Option<T> {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        match self {
            Some(v) => v.write_xml(w),
            None => Ok(()),
        }
    }
}

/// Playback position or duration, carried as `HH:MM:SS` with two-digit fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpnpDuration(pub std::time::Duration);

impl UpnpDuration {
    pub fn new(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<std::time::Duration> for UpnpDuration {
    fn from(value: std::time::Duration) -> Self {
        Self(value)
    }
}

impl FromStr for UpnpDuration {
    type Err = anyhow::Error;

    fn from_str(mut s: &str) -> Result<Self, Self::Err> {
        if let Some(stripped) = s.strip_prefix('+').or_else(|| s.strip_prefix('-')) {
            s = stripped;
        };
        let mut parts = s.split(':');
        let hours: u64 = parts
            .next()
            .context("get hours")
            .and_then(|h| h.parse().context("parse hours number"))?;
        let minutes = parts.next().context("get minutes")?;
        anyhow::ensure!(minutes.len() == 2);
        let minutes: u64 = minutes.parse().context("parse minutes number")?;
        let seconds = parts.next().context("get seconds")?;
        // truncate an optional fractional part
        let seconds: u64 = match seconds.split_once('.') {
            Some((full, _)) => full.parse().context("parse seconds")?,
            None => seconds.parse().context("parse seconds")?,
        };
        let total = hours * 60 * 60 + minutes * 60 + seconds;
        Ok(UpnpDuration(std::time::Duration::from_secs(total)))
    }
}

impl Display for UpnpDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seconds = self.0.as_secs();
        let minutes = seconds / 60;
        let hours = minutes / 60;
        write!(f, "{:0>2}:{:0>2}:{:0>2}", hours, minutes % 60, seconds % 60)
    }
}

impl IntoUpnpValue for UpnpDuration {
    fn from_xml_value(value: &str) -> anyhow::Result<Self> {
        value.parse()
    }
}

impl IntoXml for UpnpDuration {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        w.write_event(Event::Text(BytesText::from_escaped(self.to_string())))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub start: isize,
    pub end: isize,
    pub step: Option<isize>,
}

impl IntoXml for Range {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        let parent = BytesStart::new("allowedValueRange");
        w.write_event(Event::Start(parent.clone()))?;
        w.create_element("minimum")
            .write_text_content(BytesText::new(&self.start.to_string()))?;
        w.create_element("maximum")
            .write_text_content(BytesText::new(&self.end.to_string()))?;
        if let Some(step) = self.step {
            w.create_element("step")
                .write_text_content(BytesText::new(&step.to_string()))?;
        }
        w.write_event(Event::End(parent.to_end()))
    }
}

/// Everything an SCPD `<stateVariable>` element needs to render itself.
#[derive(Clone)]
pub struct StateVariableDescriptor {
    pub name: &'static str,
    pub kind: DataType,
    pub send_events: bool,
    pub range: Option<Range>,
    pub allowed_list: Option<&'static [&'static str]>,
    pub default: Option<&'static (dyn IntoXml + Send + Sync)>,
}

impl std::fmt::Debug for StateVariableDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("StateVariableDescriptor");
        s.field("name", &self.name);
        s.field("kind", &self.kind);
        s.field("send_events", &self.send_events);
        s.field("range", &self.range);
        s.field("allowed_list", &self.allowed_list);
        let default = self.default.map(|d| d.into_string().unwrap());
        s.field("default", &default);
        s.finish()
    }
}

impl StateVariableDescriptor {
    pub fn from_variable<S: SVariable>() -> Self {
        Self {
            name: S::VAR_NAME,
            kind: S::VarType::TYPE_NAME,
            send_events: S::SEND_EVENTS,
            allowed_list: S::ALLOWED_VALUE_LIST,
            range: S::RANGE,
            default: S::default(),
        }
    }
}

impl IntoXml for StateVariableDescriptor {
    fn write_xml(&self, w: &mut XmlWriter) -> quick_xml::Result<()> {
        let send_events = match self.send_events {
            true => "yes",
            false => "no",
        };
        let parent =
            BytesStart::new("stateVariable").with_attributes([("sendEvents", send_events)]);
        w.write_event(Event::Start(parent.clone()))?;
        w.create_element("name")
            .write_text_content(BytesText::new(self.name))?;
        w.create_element("dataType")
            .write_text_content(BytesText::new(&self.kind.to_string()))?;
        if let Some(allowed_list) = self.allowed_list {
            w.create_element("allowedValueList")
                .write_inner_content(|w| {
                    for val in allowed_list {
                        w.create_element("allowedValue")
                            .write_text_content(BytesText::new(val))?;
                    }
                    Ok::<(), quick_xml::Error>(())
                })?;
        };
        if let Some(range) = self.range {
            range.write_xml(w)?;
        }
        if let Some(default_value) = self.default {
            w.create_element("defaultValue")
                .write_inner_content(|w| default_value.write_xml(w))?;
        }
        w.write_event(Event::End(parent.to_end()))?;
        Ok(())
    }
}

/// A named UPnP state variable. Implementors are marker types; the value
/// itself lives in `VarType`.
pub trait SVariable: Sized {
    type VarType: IntoUpnpValue;

    const VAR_NAME: &str;
    const SEND_EVENTS: bool = false;
    const RANGE: Option<Range> = None;
    const ALLOWED_VALUE_LIST: Option<&[&str]> = None;

    fn default() -> Option<&'static (dyn IntoXml + Send + Sync)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::UpnpDuration;

    #[test]
    fn duration_round_trip() {
        let d = UpnpDuration::new(Duration::from_secs(1 * 3600 + 2 * 60 + 3));
        assert_eq!(d.to_string(), "01:02:03");
        assert_eq!("01:02:03".parse::<UpnpDuration>().unwrap(), d);
    }

    #[test]
    fn duration_parses_fraction() {
        let d: UpnpDuration = "0:00:01.500".parse().unwrap();
        assert_eq!(d.0, Duration::from_secs(1));
    }

    #[test]
    fn zero_duration_has_two_digit_fields() {
        assert_eq!(UpnpDuration::default().to_string(), "00:00:00");
    }
}
