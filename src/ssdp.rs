use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
    str::FromStr,
};

use anyhow::Context;
use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;

use super::{device_description::Udn, urn};

pub const SSDP_IP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(SSDP_IP_ADDR, 1900));
pub const DEFAULT_SSDP_TTL: u32 = 2;

/// max-age advertised in alive announcements and search replies
pub(crate) const CACHE_CONTROL_MAX_AGE: usize = 1800;

/// Multicast socket shared by devices and control points: joined to the SSDP
/// group on port 1900, non-blocking, with address reuse so several endpoints
/// can coexist on one host.
pub fn bind_ssdp_socket(ttl: Option<u32>) -> anyhow::Result<UdpSocket> {
    let local_ip = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 1900);
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_ttl(ttl.unwrap_or(DEFAULT_SSDP_TTL))?;
    socket.set_reuse_address(true)?;
    #[cfg(target_os = "linux")]
    socket.set_reuse_port(false)?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_loop_v4(true)?;
    socket.join_multicast_v4(&SSDP_IP_ADDR, &Ipv4Addr::UNSPECIFIED)?;
    socket.bind(&SocketAddr::V4(local_ip).into())?;
    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// Best-effort local address discovery, used to build the LOCATION url.
pub async fn resolve_local_addr() -> anyhow::Result<IpAddr> {
    let probe = Ipv4Addr::new(8, 8, 8, 8);
    let socket =
        UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket
        .connect(SocketAddr::V4(SocketAddrV4::new(probe, 0)))
        .await?;
    Ok(socket.local_addr().context("get local addr")?.ip())
}

/// Discovery netmask filter: a peer is eligible only when it shares the
/// local subnet under `mask`. Non-IPv4 addresses bypass the filter.
pub fn same_subnet(local: IpAddr, peer: IpAddr, mask: Ipv4Addr) -> bool {
    match (local, peer) {
        (IpAddr::V4(local), IpAddr::V4(peer)) => {
            let mask = u32::from(mask);
            u32::from(local) & mask == u32::from(peer) & mask
        }
        _ => true,
    }
}

/// Unique Service Name. Identifies a unique instance of a device or service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct USN {
    udn: Udn,
    kind: USNkind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum USNkind {
    RootDevice,
    DeviceUuid,
    URN(urn::URN),
}

impl USN {
    pub const fn root_device(udn: Udn) -> Self {
        Self {
            udn,
            kind: USNkind::RootDevice,
        }
    }
    pub const fn device_uuid(udn: Udn) -> Self {
        Self {
            udn,
            kind: USNkind::DeviceUuid,
        }
    }
    pub const fn urn(udn: Udn, urn: urn::URN) -> Self {
        Self {
            udn,
            kind: USNkind::URN(urn),
        }
    }

    /// The UDN prefix, up to but not including `::`.
    pub fn udn(&self) -> &Udn {
        &self.udn
    }

    pub fn kind(&self) -> &USNkind {
        &self.kind
    }
}

impl Display for USN {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.udn)?;
        match &self.kind {
            USNkind::RootDevice => write!(f, "::upnp:rootdevice"),
            USNkind::DeviceUuid => Ok(()),
            USNkind::URN(urn) => write!(f, "::{urn}"),
        }
    }
}

impl FromStr for USN {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((start, rest)) = s.split_once("::") else {
            let udn = Udn::from_str(s)?;
            return Ok(Self::device_uuid(udn));
        };
        let udn = Udn::from_str(start)?;

        if rest == "upnp:rootdevice" {
            return Ok(Self::root_device(udn));
        }

        let urn = urn::URN::from_str(rest)?;
        Ok(Self {
            udn,
            kind: USNkind::URN(urn),
        })
    }
}

/// Search target / notification type header value (`ST` / `NT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationType {
    /// `ssdp:all`: matches every device and service on the network
    All,
    /// `upnp:rootdevice`
    RootDevice,
    /// A specific device instance (`uuid:...`)
    Uuid(uuid::Uuid),
    Urn(urn::URN),
}

impl FromStr for NotificationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ssdp:all" => Self::All,
            "upnp:rootdevice" => Self::RootDevice,
            rest if rest.starts_with("urn:") => Self::Urn(urn::URN::from_str(rest)?),
            rest if rest.starts_with("uuid:") => Self::Uuid(
                rest.strip_prefix("uuid:")
                    .expect("prefix checked above")
                    .parse()?,
            ),
            rest => Err(anyhow::anyhow!("Unknown notification type: {rest}"))?,
        })
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationType::All => write!(f, "ssdp:all"),
            NotificationType::RootDevice => write!(f, "upnp:rootdevice"),
            NotificationType::Uuid(id) => write!(f, "uuid:{id}"),
            NotificationType::Urn(urn) => write!(f, "{urn}"),
        }
    }
}

/// Notification subtype (`NTS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSubType {
    /// Sent when a device joins the network and periodically to reaffirm its presence
    Alive,
    /// Sent when a device is being removed from the network or shutting down
    ByeBye,
}

impl Display for NotificationSubType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            NotificationSubType::Alive => "alive",
            NotificationSubType::ByeBye => "byebye",
        };
        write!(f, "ssdp:{msg}")
    }
}

impl FromStr for NotificationSubType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ssdp:alive" => Self::Alive,
            "ssdp:byebye" => Self::ByeBye,
            rest => Err(anyhow::anyhow!("Unknown notification sub type: {rest}"))?,
        })
    }
}

/// `M-SEARCH * HTTP/1.1` discovery request.
#[derive(Debug, Clone)]
pub struct SearchMessage {
    pub host: SocketAddr,
    pub st: NotificationType,
    /// Maximum wait in seconds (1..=5). Replies should be delayed a random
    /// duration within it to spread load at the control point.
    pub mx: Option<usize>,
}

impl Display for SearchMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "M-SEARCH * HTTP/1.1\r\n\
HOST: {host}\r\n\
MAN: \"ssdp:discover\"\r\n",
            host = self.host,
        )?;
        if let Some(mx) = self.mx {
            write!(f, "MX: {mx}\r\n")?;
        }
        write!(f, "ST: {st}\r\n\r\n", st = self.st)
    }
}

/// `NOTIFY * HTTP/1.1` with `NTS: ssdp:alive`.
#[derive(Debug, Clone)]
pub struct NotifyAliveMessage {
    /// Url of the device description
    pub location: String,
    pub usn: USN,
    pub nt: NotificationType,
    /// Advertisement lifetime in seconds
    pub cache_control: usize,
}

impl Display for NotifyAliveMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
CACHE-CONTROL: max-age = {cache_control}\r\n\
LOCATION: {location}\r\n\
NT: {nt}\r\n\
NTS: ssdp:alive\r\n\
USN: {usn}\r\n\r\n",
            cache_control = self.cache_control,
            location = self.location,
            nt = self.nt,
            usn = self.usn,
        )
    }
}

/// `NOTIFY * HTTP/1.1` with `NTS: ssdp:byebye`.
#[derive(Debug, Clone)]
pub struct NotifyByeByeMessage {
    pub usn: USN,
    pub nt: NotificationType,
}

impl Display for NotifyByeByeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
LOCATION: *\r\n\
NT: {nt}\r\n\
NTS: ssdp:byebye\r\n\
USN: {usn}\r\n\r\n",
            nt = self.nt,
            usn = self.usn,
        )
    }
}

/// `HTTP/1.1 200 OK` unicast reply to an M-SEARCH.
#[derive(Debug, Clone)]
pub struct SearchReplyMessage {
    pub location: String,
    pub st: NotificationType,
    pub usn: USN,
    pub cache_control: usize,
}

impl Display for SearchReplyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let now = time::OffsetDateTime::now_utc();
        let format = time::format_description::parse_borrowed::<2>("[weekday repr:short], [day padding:zero] [month repr:short] [year] [hour]:[minute]:[second] GMT").expect("infallible");
        let formatted_date = now.format(&format).expect("infallible");
        write!(
            f,
            "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age = {cache_control}\r\n\
DATE: {date}\r\n\
EXT:\r\n\
LOCATION: {location}\r\n\
ST: {st}\r\n\
USN: {usn}\r\n\r\n",
            cache_control = self.cache_control,
            date = formatted_date,
            location = self.location,
            st = self.st,
            usn = self.usn,
        )
    }
}

/// Inbound `NOTIFY` datagram, either subtype. Alive messages carry LOCATION;
/// some stacks also deliver eventing fields (SID, SEQ, a propertyset body)
/// over unicast NOTIFY, which are kept when present.
#[derive(Debug, Clone)]
pub struct NotifyMessage {
    pub nts: NotificationSubType,
    pub nt: NotificationType,
    pub usn: USN,
    pub location: Option<String>,
    pub sid: Option<String>,
    pub seq: Option<u32>,
    /// Raw `<e:propertyset>...</e:propertyset>` block, when the datagram carried one
    pub propertyset: Option<String>,
}

/// A parsed inbound SSDP datagram.
#[derive(Debug, Clone)]
pub enum SsdpMessage {
    Search(SearchMessage),
    Notify(NotifyMessage),
    /// Unicast 200 OK search reply
    SearchReply {
        location: String,
        st: NotificationType,
        usn: USN,
    },
}

impl SsdpMessage {
    /// Parse one datagram. Header names are matched case-insensitively;
    /// unknown headers are ignored.
    pub fn parse(payload: &str) -> anyhow::Result<SsdpMessage> {
        let (head, body) = match payload.split_once("\r\n\r\n") {
            Some((head, body)) => (head, body),
            None => (payload, ""),
        };
        let mut lines = head.lines();
        let request_line = lines.next().context("request line")?;
        let headers = lines.filter_map(|l| l.split_once(':'));

        let mut location = None;
        let mut st = None;
        let mut nt = None;
        let mut nts = None;
        let mut usn = None;
        let mut mx = None;
        let mut host = None;
        let mut sid = None;
        let mut seq = None;
        for (name, value) in headers {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "host" => {
                    host = SocketAddrV4::from_str(value)
                        .ok()
                        .map(|v| SocketAddr::V4(v));
                }
                "location" => location = Some(value.to_owned()),
                "st" => st = Some(NotificationType::from_str(value)?),
                "nt" => nt = Some(NotificationType::from_str(value)?),
                "nts" => nts = Some(NotificationSubType::from_str(value)?),
                "usn" => usn = Some(USN::from_str(value)?),
                "mx" => mx = value.parse().ok(),
                "sid" => sid = Some(value.to_owned()),
                "seq" => seq = value.parse().ok(),
                _ => (),
            }
        }

        if request_line.starts_with("M-SEARCH") {
            return Ok(SsdpMessage::Search(SearchMessage {
                host: host.unwrap_or(SSDP_ADDR),
                st: st.context("missing st")?,
                mx,
            }));
        }
        if request_line.starts_with("NOTIFY") {
            let nts = nts.context("missing nts")?;
            if nts == NotificationSubType::Alive {
                location.as_ref().context("missing location")?;
            }
            let propertyset = body
                .find("<e:propertyset")
                .and_then(|start| {
                    body[start..]
                        .find("</e:propertyset>")
                        .map(|end| body[start..start + end + "</e:propertyset>".len()].to_owned())
                });
            return Ok(SsdpMessage::Notify(NotifyMessage {
                nts,
                nt: nt.context("missing nt")?,
                usn: usn.context("missing usn")?,
                location,
                sid,
                seq,
                propertyset,
            }));
        }
        if request_line.starts_with("HTTP/1.1 200") || request_line.starts_with("HTTP/1.0 200") {
            return Ok(SsdpMessage::SearchReply {
                location: location.context("missing location")?,
                st: st.context("missing st")?,
                usn: usn.context("missing usn")?,
            });
        }
        Err(anyhow::anyhow!(
            "Unknown ssdp start line: {request_line}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use crate::device_description::Udn;

    use super::{
        same_subnet, NotificationSubType, NotificationType, SearchMessage, SsdpMessage, USN,
        SSDP_ADDR,
    };

    #[test]
    fn search_message_shape() {
        let msg = SearchMessage {
            host: SSDP_ADDR,
            st: NotificationType::All,
            mx: Some(3),
        };
        assert_eq!(
            msg.to_string(),
            "M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nMX: 3\r\nST: ssdp:all\r\n\r\n"
        );
    }

    #[test]
    fn parse_notify_alive() {
        let notify = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
CACHE-CONTROL: max-age=1800\r\n\
Location: http://192.168.1.1:49152/devicedesc.xml\r\n\
NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
NTS: ssdp:alive\r\n\
SERVER: Linux/3.14, UPnP/1.0\r\n\
USN: uuid:ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        let parsed = SsdpMessage::parse(notify).unwrap();
        let SsdpMessage::Notify(msg) = parsed else {
            panic!("expected notify");
        };
        assert_eq!(msg.nts, NotificationSubType::Alive);
        assert_eq!(
            msg.location.as_deref(),
            Some("http://192.168.1.1:49152/devicedesc.xml")
        );
        assert_eq!(msg.usn.udn().to_string(), "uuid:ebf5a0a0-1dd1-11b2-a92f-e89f80eb7241");
    }

    #[test]
    fn parse_msearch_with_lowercase_headers() {
        let m_search = "M-SEARCH * HTTP/1.1\r\n\
Host: 239.255.255.250:1900\r\n\
Man: \"ssdp:discover\"\r\n\
Mx: 2\r\n\
St: upnp:rootdevice\r\n\r\n";
        let parsed = SsdpMessage::parse(m_search).unwrap();
        let SsdpMessage::Search(msg) = parsed else {
            panic!("expected search");
        };
        assert_eq!(msg.mx, Some(2));
        assert_eq!(msg.st, NotificationType::RootDevice);
    }

    #[test]
    fn parse_search_reply() {
        let reply = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age = 1800\r\n\
EXT:\r\n\
LOCATION: http://192.168.1.20:44757/dlna/device.xml\r\n\
ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n\
USN: uuid:abc0abc0-0000-1111-2222-333344445555::urn:schemas-upnp-org:device:MediaRenderer:1\r\n\r\n";
        let parsed = SsdpMessage::parse(reply).unwrap();
        let SsdpMessage::SearchReply { location, .. } = parsed else {
            panic!("expected search reply");
        };
        assert_eq!(location, "http://192.168.1.20:44757/dlna/device.xml");
    }

    #[test]
    fn byebye_message_shape() {
        let udn = Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap();
        let msg = super::NotifyByeByeMessage {
            usn: USN::root_device(udn),
            nt: NotificationType::RootDevice,
        };
        let encoded = msg.to_string();
        assert!(encoded.contains("NTS: ssdp:byebye\r\n"));
        assert!(encoded.contains("LOCATION: *\r\n"));
        assert!(encoded.ends_with("\r\n\r\n"));
    }

    #[test]
    fn netmask_filter() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        assert!(same_subnet(
            "192.168.1.10".parse().unwrap(),
            "192.168.1.200".parse().unwrap(),
            mask
        ));
        assert!(!same_subnet(
            "192.168.1.10".parse().unwrap(),
            "192.168.2.4".parse().unwrap(),
            mask
        ));
        // non-IPv4 peers bypass the filter
        assert!(same_subnet(
            "192.168.1.10".parse().unwrap(),
            "fe80::1".parse().unwrap(),
            mask
        ));
    }

    #[test]
    fn parse_notify_with_eventing_fields() {
        let notify = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
LOCATION: http://192.168.1.7:80/desc.xml\r\n\
NT: upnp:rootdevice\r\n\
NTS: ssdp:alive\r\n\
CACHE-CONTROL: max-age = 100\r\n\
SID: uuid:77\r\n\
SEQ: 4\r\n\
USN: uuid:abc0abc0-0000-1111-2222-333344445555::upnp:rootdevice\r\n\r\n\
<e:propertyset xmlns:e=\"urn:schemas-upnp-org:metadata-1-0/events\"><e:property><Volume>3</Volume></e:property></e:propertyset>";
        let SsdpMessage::Notify(msg) = SsdpMessage::parse(notify).unwrap() else {
            panic!("expected notify");
        };
        assert_eq!(msg.sid.as_deref(), Some("uuid:77"));
        assert_eq!(msg.seq, Some(4));
        assert!(msg.propertyset.unwrap().contains("<Volume>3</Volume>"));
    }
}
