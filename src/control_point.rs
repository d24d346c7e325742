use std::{
    net::IpAddr,
    str::FromStr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::Context;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::{
    action::{join_control_url, parse_action_reply, ActionReply, ActionRequest},
    config::UpnpConfig,
    eventing::subscriber::{EventCallback, EventSubscriber},
    registry::{fetch_device_description, DeviceRegistry},
    scheduler::{DiscoveryEvent, Schedule, ScheduleEffect, ScheduleTask, Scheduler},
    ssdp::{self, bind_ssdp_socket, same_subnet, NotificationSubType, NotificationType, SsdpMessage},
    templates::service_description::Scpd,
    urn::URN,
    FromXml,
};

/// UPnP control point: discovers devices over SSDP, keeps a deduplicated
/// registry, posts SOAP actions, and optionally maintains event
/// subscriptions with a local NOTIFY callback server.
///
/// All state is owned by the task driving [ControlPoint::step]; nothing here
/// runs on its own.
pub struct ControlPoint {
    config: UpnpConfig,
    http: reqwest::Client,
    registry: Arc<Mutex<DeviceRegistry>>,
    scheduler: Scheduler,
    socket: UdpSocket,
    local_ip: IpAddr,
    search_target: NotificationType,
    subscriber: Option<EventSubscriber>,
    actions: Vec<ActionRequest>,
}

impl ControlPoint {
    pub async fn new(config: UpnpConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_request_timeout_ms))
            .build()
            .context("build http client")?;
        let socket = bind_ssdp_socket(None).context("bind ssdp socket")?;
        let local_ip = ssdp::resolve_local_addr()
            .await
            .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        Ok(Self {
            config,
            http,
            registry: Arc::new(Mutex::new(DeviceRegistry::new())),
            scheduler: Scheduler::new(),
            socket,
            local_ip,
            search_target: NotificationType::All,
            subscriber: None,
            actions: Vec::new(),
        })
    }

    pub fn registry(&self) -> Arc<Mutex<DeviceRegistry>> {
        self.registry.clone()
    }

    /// Register the application's event callback. `local_callback_url` is
    /// the absolute url remote devices will NOTIFY; its path is where
    /// [ControlPoint::callback_router] listens.
    pub fn set_event_callback(&mut self, local_callback_url: String, callback: EventCallback) {
        self.subscriber = Some(EventSubscriber::new(
            self.http.clone(),
            self.registry.clone(),
            local_callback_url,
            self.config.subscribe_repeat_sec,
            self.config.event_subscription_retry_ms,
            callback,
        ));
    }

    /// Router answering NOTIFY callbacks; `None` until an event callback is
    /// registered.
    pub fn callback_router(&self, path: &str) -> Option<axum::Router> {
        self.subscriber.as_ref().map(|s| s.router(path))
    }

    /// Serve the NOTIFY callback router until cancelled.
    pub fn spawn_callback_server(
        &self,
        path: &str,
        listener: TcpListener,
        cancellation: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let router = self.callback_router(path)?;
        Some(tokio::spawn(async move {
            let shutdown = async move { cancellation.cancelled().await };
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!(%error, "Callback server stopped");
            }
        }))
    }

    /// Subscribe to (or drop subscriptions of) every discovered service with
    /// an event url.
    pub async fn set_subscriptions_active(&self, active: bool) -> anyhow::Result<()> {
        let subscriber = self
            .subscriber
            .as_ref()
            .context("no event callback registered")?;
        subscriber.set_active(active).await;
        Ok(())
    }

    /// Run discovery: emit M-SEARCH for `search_target`, repeated every
    /// `msearch_repeat_ms` within a `max_wait` window, and process replies.
    ///
    /// Returns once `max_wait` elapsed, or as soon as at least one device is
    /// known and `min_wait` elapsed. The result tells whether any device was
    /// found.
    pub async fn begin(
        &mut self,
        search_target: NotificationType,
        min_wait: Duration,
        max_wait: Duration,
    ) -> anyhow::Result<bool> {
        let min_wait = min_wait.min(max_wait);
        self.search_target = search_target.clone();
        let now = Instant::now();
        self.scheduler.add(Schedule::msearch_send(
            search_target,
            3,
            now,
            Duration::from_millis(self.config.msearch_repeat_ms),
            max_wait,
        ));

        let min_end = now + min_wait;
        let max_end = now + max_wait;
        loop {
            let now = Instant::now();
            if now >= max_end {
                break;
            }
            if now >= min_end && !self.registry.lock().expect("registry lock").is_empty() {
                break;
            }
            self.step().await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        self.scheduler.stop_msearch();
        let found = !self.registry.lock().expect("registry lock").is_empty();
        tracing::info!(
            devices = self.registry.lock().expect("registry lock").len(),
            "Discovery window closed"
        );
        Ok(found)
    }

    /// One cooperative cycle: drain one UDP datagram, run due schedules,
    /// process the discovery events they yield, tick the event subscriber.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        let mut buf = [0; 2048];
        match self.socket.try_recv_from(&mut buf) {
            Ok((read, sender)) => {
                if let Err(e) = self.admit_datagram(&buf[..read], sender.ip()) {
                    tracing::debug!("Discarding ssdp datagram: {e}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e).context("udp receive"),
        }

        let effects = self.scheduler.execute(Instant::now(), None);
        for effect in effects {
            match effect {
                ScheduleEffect::Send { target, payload } => {
                    self.socket.send_to(payload.as_bytes(), target).await?;
                }
                ScheduleEffect::Discovery(event) => self.process_discovery(event).await,
            }
        }

        if let Some(subscriber) = &self.subscriber {
            subscriber.tick(Instant::now()).await;
        }
        Ok(())
    }

    /// Parse an inbound datagram into a scheduled discovery record.
    fn admit_datagram(&mut self, data: &[u8], peer: IpAddr) -> anyhow::Result<()> {
        let payload = std::str::from_utf8(data).context("construct string from bytes")?;
        let message = SsdpMessage::parse(payload)?;
        let task = match message {
            SsdpMessage::SearchReply { location, usn, st } => {
                if !same_subnet(self.local_ip, peer, self.config.discovery_netmask) {
                    tracing::debug!(%peer, "Search reply filtered by netmask");
                    return Ok(());
                }
                ScheduleTask::MSearchReplyIn { location, usn, st }
            }
            SsdpMessage::Notify(notify) => {
                if notify.nts == NotificationSubType::Alive
                    && !same_subnet(self.local_ip, peer, self.config.discovery_netmask)
                {
                    tracing::debug!(%peer, "Advertisement filtered by netmask");
                    return Ok(());
                }
                ScheduleTask::NotifyReplyIn(notify)
            }
            // search requests are device business
            SsdpMessage::Search(_) => return Ok(()),
        };
        self.scheduler.add(Schedule::inbound(task, Instant::now()));
        Ok(())
    }

    async fn process_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::SearchReply { location, usn, .. } => {
                self.device_seen(&location, &usn).await;
            }
            DiscoveryEvent::Notify(notify) => match notify.nts {
                NotificationSubType::Alive => {
                    if let Some(location) = &notify.location {
                        self.device_seen(location, &notify.usn).await;
                    }
                    if let (Some(propertyset), Some(subscriber)) =
                        (&notify.propertyset, &self.subscriber)
                    {
                        // some stacks push eventing over unicast NOTIFY datagrams
                        let sid = notify.sid.as_deref().unwrap_or_default();
                        subscriber.dispatch_notify(sid, propertyset.as_bytes());
                    }
                }
                NotificationSubType::ByeBye => {
                    self.registry
                        .lock()
                        .expect("registry lock")
                        .mark_byebye(&notify.usn);
                }
            },
        }
    }

    /// Refresh a known device or fetch and add an unknown one.
    async fn device_seen(&mut self, location: &str, usn: &ssdp::USN) {
        if !self.matches_search_target(usn) {
            tracing::trace!(%usn, "Advertisement outside search target");
            return;
        }
        {
            let mut registry = self.registry.lock().expect("registry lock");
            if registry.mark_seen(usn.udn()) {
                return;
            }
        }
        match fetch_device_description(&self.http, location).await {
            Ok(device) => {
                self.registry
                    .lock()
                    .expect("registry lock")
                    .add_device(device);
            }
            Err(error) => {
                // peer stays eligible for the next advertisement
                tracing::warn!(location, %error, "Failed to add device");
            }
        }
    }

    fn matches_search_target(&self, usn: &ssdp::USN) -> bool {
        match &self.search_target {
            NotificationType::All => true,
            target => usn.to_string().contains(&target.to_string()),
        }
    }

    /// Build an action request against a discovered service, with the
    /// control url resolved against the device base url.
    pub fn action_for(
        &self,
        service_id: &str,
        action_name: &str,
    ) -> anyhow::Result<ActionRequest> {
        let registry = self.registry.lock().expect("registry lock");
        let (device, service) = registry
            .find_service(service_id)
            .with_context(|| format!("unknown service {service_id}"))?;
        let service_type =
            URN::from_str(&service.service_type).context("parse service type urn")?;
        Ok(ActionRequest::new(
            service_type,
            join_control_url(&device.base_url, &service.control_url),
            action_name,
        ))
    }

    /// Queue an action for [ControlPoint::execute_actions].
    pub fn add_action(&mut self, action: ActionRequest) {
        self.actions.push(action);
    }

    /// POST every queued action in submission order.
    ///
    /// Replies overwrite each other: the returned [ActionReply] carries the
    /// last action's arguments, and is only valid when every action in the
    /// batch succeeded.
    pub async fn execute_actions(&mut self) -> ActionReply {
        let actions = std::mem::take(&mut self.actions);
        let mut batch_valid = true;
        let mut last = ActionReply::invalid();
        for action in actions {
            let reply = self.post_action(&action).await;
            batch_valid &= reply.valid;
            last = reply;
        }
        last.valid = last.valid && batch_valid;
        last
    }

    /// POST one action and parse its response.
    pub async fn post_action(&self, action: &ActionRequest) -> ActionReply {
        let envelope = match action.to_envelope() {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(action = action.action, %error, "Failed to serialize action");
                return ActionReply::invalid();
            }
        };
        let response = self
            .http
            .post(&action.control_url)
            .header("SOAPACTION", action.soap_action_header())
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .header(reqwest::header::CONTENT_LENGTH, envelope.len())
            .body(envelope)
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(action = action.action, %error, "Action POST failed");
                return ActionReply::invalid();
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            tracing::warn!(
                action = action.action,
                status = %response.status(),
                "Action answered with error"
            );
            return ActionReply::invalid();
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(_) => return ActionReply::invalid(),
        };
        match parse_action_reply(&body) {
            Ok(Ok(reply)) => reply,
            Ok(Err(fault)) => {
                tracing::warn!(action = action.action, %fault, "Action fault");
                ActionReply::invalid()
            }
            // malformed but successful response: valid with no arguments
            Err(_) => ActionReply {
                valid: true,
                arguments: Vec::new(),
            },
        }
    }

    /// Fetch and parse a discovered service's SCPD document.
    pub async fn fetch_scpd(&self, service_id: &str) -> anyhow::Result<Scpd> {
        let url = {
            let registry = self.registry.lock().expect("registry lock");
            let (device, service) = registry
                .find_service(service_id)
                .with_context(|| format!("unknown service {service_id}"))?;
            join_control_url(&device.base_url, &service.scpd_url)
        };
        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Scpd::read_xml(&mut quick_xml::Reader::from_str(&body))
    }

    /// True while the discovery window still emits M-SEARCH.
    pub fn is_msearch_active(&self) -> bool {
        self.scheduler.is_msearch_active()
    }
}
