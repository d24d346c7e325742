use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::{
    config::UpnpConfig,
    device_description::DeviceDescription,
    eventing::EventPublisher,
    scheduler::{DeviceAnnouncement, Schedule, ScheduleEffect, Scheduler},
    ssdp::{self, bind_ssdp_socket, same_subnet, NotificationType, SsdpMessage},
    urn::URN,
};

/// Build the announcement record the SSDP schedules render from.
pub fn device_announcement(
    description: &DeviceDescription<'_>,
    location: &str,
) -> anyhow::Result<DeviceAnnouncement> {
    let device = &description.device;
    let device_type =
        URN::from_str(&device.device_type).context("parse device type urn")?;
    let service_types = device
        .all_services()
        .filter_map(|service| URN::from_str(&service.service_type).ok())
        .collect();
    Ok(DeviceAnnouncement {
        udn: device.udn.clone(),
        device_type,
        service_types,
        location: location.to_string(),
    })
}

/// True when a device answers an M-SEARCH for `st`: everything, the root
/// device, its own UDN, its device type or one of its service types.
pub fn accepts_search_target(announcement: &DeviceAnnouncement, st: &NotificationType) -> bool {
    match st {
        NotificationType::All | NotificationType::RootDevice => true,
        NotificationType::Uuid(uuid) => *uuid == announcement.udn.uuid(),
        NotificationType::Urn(urn) => {
            *urn == announcement.device_type || announcement.service_types.contains(urn)
        }
    }
}

/// Device-side runtime: answers M-SEARCH, repeats alive announcements,
/// delivers queued event notifications, and says goodbye on shutdown.
///
/// The HTTP surface lives in [crate::router::UpnpRouter]; the host only
/// drives UDP and the periodic work, all owned by the task running
/// [DeviceHost::run].
pub struct DeviceHost {
    config: UpnpConfig,
    announcement: DeviceAnnouncement,
    publisher: Arc<EventPublisher>,
    socket: Arc<UdpSocket>,
    local_ip: IpAddr,
    scheduler: Scheduler,
}

impl DeviceHost {
    /// Validate the device record, bind the multicast socket and seed the
    /// announcement schedules.
    pub async fn bind(
        description: &DeviceDescription<'_>,
        location: &str,
        publisher: Arc<EventPublisher>,
        config: UpnpConfig,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !location.contains("localhost"),
            "device location must be reachable by peers, got {location}"
        );
        for service in description.device.all_services() {
            anyhow::ensure!(
                !service.scpd_url.is_empty()
                    && !service.control_url.is_empty()
                    && !service.event_sub_url.is_empty(),
                "service {} misses one of its urls",
                service.service_id
            );
        }

        let announcement = device_announcement(description, location)?;
        let socket = Arc::new(bind_ssdp_socket(None).context("bind ssdp socket")?);
        let local_ip = ssdp::resolve_local_addr().await.unwrap_or(IpAddr::V4(
            std::net::Ipv4Addr::UNSPECIFIED,
        ));

        let mut scheduler = Scheduler::new();
        let now = Instant::now();
        let repeat =
            (config.post_alive_repeat_ms > 0).then(|| Duration::from_millis(config.post_alive_repeat_ms));
        // announce twice, slightly staggered: datagrams are lossy
        scheduler.add(Schedule::post_alive(now, repeat));
        scheduler.add(Schedule::post_alive(now + Duration::from_millis(100), repeat));

        Ok(Self {
            config,
            announcement,
            publisher,
            socket,
            local_ip,
            scheduler,
        })
    }

    pub fn announcement(&self) -> &DeviceAnnouncement {
        &self.announcement
    }

    fn accepts_search_target(&self, st: &NotificationType) -> bool {
        accepts_search_target(&self.announcement, st)
    }

    fn handle_datagram(&mut self, data: &[u8], sender: SocketAddr) -> anyhow::Result<()> {
        let payload = std::str::from_utf8(data).context("construct string from bytes")?;
        let message = SsdpMessage::parse(payload)?;
        let SsdpMessage::Search(search) = message else {
            // peers' announcements are control point business
            return Ok(());
        };
        if !self.accepts_search_target(&search.st) {
            tracing::trace!(st = %search.st, "Ignoring search for foreign target");
            return Ok(());
        }
        if !same_subnet(self.local_ip, sender.ip(), self.config.discovery_netmask) {
            tracing::debug!(peer = %sender, "Discovery request filtered by netmask");
            return Ok(());
        }
        tracing::debug!(st = %search.st, peer = %sender, mx = ?search.mx, "Search message");
        self.scheduler.add(Schedule::msearch_reply_out(
            search.st,
            sender,
            search.mx.unwrap_or(1),
            Instant::now(),
        ));
        Ok(())
    }

    async fn flush_effects(&mut self) -> anyhow::Result<()> {
        let effects = self
            .scheduler
            .execute(Instant::now(), Some(&self.announcement));
        for effect in effects {
            if let ScheduleEffect::Send { target, payload } = effect {
                self.socket.send_to(payload.as_bytes(), target).await?;
            }
        }
        Ok(())
    }

    /// Run until cancelled. On cancellation three byebye rounds go out over
    /// roughly two seconds before the loop returns.
    pub async fn run(mut self, cancellation: CancellationToken) -> anyhow::Result<()> {
        let mut scheduler_interval =
            tokio::time::interval(Duration::from_millis(self.config.scheduler_interval_ms.max(1)));
        let mut publish_interval = tokio::time::interval(Duration::from_millis(
            self.config.subscriptions_interval_ms.max(1),
        ));
        let socket = self.socket.clone();
        let mut buf = [0; 2048];
        loop {
            tokio::select! {
                Ok((read, sender)) = socket.recv_from(&mut buf) => {
                    if let Err(e) = self.handle_datagram(&buf[..read], sender) {
                        tracing::debug!("Discarding ssdp datagram: {e}");
                    }
                }
                _ = scheduler_interval.tick() => {
                    self.flush_effects().await?;
                }
                _ = publish_interval.tick() => {
                    self.publisher.publish().await;
                    self.publisher.remove_expired(Instant::now());
                }
                _ = cancellation.cancelled() => {
                    self.shutdown().await?;
                    return Ok(());
                }
            }
        }
    }

    async fn shutdown(&mut self) -> anyhow::Result<()> {
        tracing::info!("Sending byebye messages");
        self.scheduler.set_enabled(true);
        let mut bye = Schedule::post_bye(Instant::now(), Some(Duration::from_millis(800)));
        bye.end_time = Some(Instant::now() + Duration::from_millis(2000));
        self.scheduler.add(bye);
        let deadline = Instant::now() + Duration::from_millis(2100);
        while Instant::now() < deadline {
            self.flush_effects().await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::{
        device_description::Udn,
        scheduler::DeviceAnnouncement,
        ssdp::NotificationType,
        urn::{ServiceType, URN},
    };

    fn announcement() -> DeviceAnnouncement {
        DeviceAnnouncement {
            udn: Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap(),
            device_type: URN::media_renderer(),
            service_types: vec![URN::service(ServiceType::AVTransport)],
            location: "http://192.168.1.20:44757/upnp/devicedesc.xml".into(),
        }
    }

    #[test]
    fn search_target_filter() {
        let announcement = announcement();
        let accepts = |st: &NotificationType| super::accepts_search_target(&announcement, st);
        assert!(accepts(&NotificationType::All));
        assert!(accepts(&NotificationType::RootDevice));
        assert!(accepts(&NotificationType::Uuid(announcement.udn.uuid())));
        assert!(accepts(&NotificationType::Urn(URN::media_renderer())));
        assert!(accepts(&NotificationType::Urn(URN::service(
            ServiceType::AVTransport
        ))));
        assert!(!accepts(&NotificationType::Urn(URN::media_server())));
        assert!(!accepts(&NotificationType::Urn(URN::service(
            ServiceType::ContentDirectory
        ))));
    }
}
