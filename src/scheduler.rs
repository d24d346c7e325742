use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use rand::Rng;

use crate::{
    device_description::Udn,
    ssdp::{
        NotificationType, NotifyAliveMessage, NotifyByeByeMessage, NotifyMessage,
        SearchMessage, SearchReplyMessage, USN, CACHE_CONTROL_MAX_AGE, SSDP_ADDR,
    },
    urn::URN,
};

/// What a device announces about itself; the announcement schedules render
/// their datagrams from this.
#[derive(Debug, Clone)]
pub struct DeviceAnnouncement {
    pub udn: Udn,
    pub device_type: URN,
    pub service_types: Vec<URN>,
    /// Absolute url of the device description document
    pub location: String,
}

impl DeviceAnnouncement {
    /// One (NT, USN) pair per advertisement: the bare UDN, the root device,
    /// the device type and every service type. Datagrams are lossy, so the
    /// caller typically queues this set more than once.
    fn notification_set(&self) -> Vec<(NotificationType, USN)> {
        let mut set = vec![
            (
                NotificationType::Uuid(self.udn.uuid()),
                USN::device_uuid(self.udn.clone()),
            ),
            (
                NotificationType::RootDevice,
                USN::root_device(self.udn.clone()),
            ),
            (
                NotificationType::Urn(self.device_type.clone()),
                USN::urn(self.udn.clone(), self.device_type.clone()),
            ),
        ];
        for service in &self.service_types {
            set.push((
                NotificationType::Urn(service.clone()),
                USN::urn(self.udn.clone(), service.clone()),
            ));
        }
        set
    }

    fn usn_for(&self, st: &NotificationType) -> (NotificationType, USN) {
        match st {
            NotificationType::All | NotificationType::RootDevice => (
                NotificationType::RootDevice,
                USN::root_device(self.udn.clone()),
            ),
            NotificationType::Uuid(_) => (
                NotificationType::Uuid(self.udn.uuid()),
                USN::device_uuid(self.udn.clone()),
            ),
            NotificationType::Urn(urn) => (
                NotificationType::Urn(urn.clone()),
                USN::urn(self.udn.clone(), urn.clone()),
            ),
        }
    }
}

/// The work a [Schedule] performs when due.
#[derive(Debug, Clone)]
pub enum ScheduleTask {
    /// Emit an M-SEARCH to the multicast address (control point)
    MSearchSend {
        search_target: NotificationType,
        mx: usize,
    },
    /// Emit a unicast 200 OK search reply (device)
    MSearchReplyOut { st: NotificationType },
    /// Emit the ssdp:alive advertisement set (device)
    PostAlive,
    /// Emit ssdp:byebye (device)
    PostBye,
    /// Emit a unicast SUBSCRIBE over UDP
    SubscribeSend {
        path: String,
        callback: String,
        duration_sec: u32,
    },
    /// A parsed search reply waiting for control point processing
    MSearchReplyIn {
        location: String,
        usn: USN,
        st: NotificationType,
    },
    /// A parsed NOTIFY waiting for control point processing
    NotifyReplyIn(NotifyMessage),
}

impl ScheduleTask {
    fn name(&self) -> &'static str {
        match self {
            ScheduleTask::MSearchSend { .. } => "MSearchSend",
            ScheduleTask::MSearchReplyOut { .. } => "MSearchReplyOut",
            ScheduleTask::PostAlive => "PostAlive",
            ScheduleTask::PostBye => "PostBye",
            ScheduleTask::SubscribeSend { .. } => "SubscribeSend",
            ScheduleTask::MSearchReplyIn { .. } => "MSearchReplyIn",
            ScheduleTask::NotifyReplyIn(_) => "NotifyReplyIn",
        }
    }
}

/// A time-triggered task: one-shot when `repeat` is `None`, periodic
/// otherwise, optionally bounded by `end_time`.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub fire_at: Instant,
    pub repeat: Option<Duration>,
    pub end_time: Option<Instant>,
    pub active: bool,
    /// Destination of emitted datagrams (requester or multicast group)
    pub target: SocketAddr,
    pub task: ScheduleTask,
}

impl Schedule {
    pub fn msearch_send(
        search_target: NotificationType,
        mx: usize,
        now: Instant,
        repeat: Duration,
        window: Duration,
    ) -> Self {
        Self {
            fire_at: now,
            repeat: Some(repeat),
            end_time: Some(now + window),
            active: false,
            target: SSDP_ADDR,
            task: ScheduleTask::MSearchSend { search_target, mx },
        }
    }

    /// Device-side search reply, delayed by a random share of the MX window.
    pub fn msearch_reply_out(
        st: NotificationType,
        requester: SocketAddr,
        mx: usize,
        now: Instant,
    ) -> Self {
        let mx = mx.clamp(1, 5) as u64;
        let jitter = rand::rng().random_range(0..mx * 1000);
        Self {
            fire_at: now + Duration::from_millis(jitter),
            repeat: None,
            end_time: None,
            active: false,
            target: requester,
            task: ScheduleTask::MSearchReplyOut { st },
        }
    }

    pub fn post_alive(now: Instant, repeat: Option<Duration>) -> Self {
        Self {
            fire_at: now,
            repeat,
            end_time: None,
            active: false,
            target: SSDP_ADDR,
            task: ScheduleTask::PostAlive,
        }
    }

    pub fn post_bye(now: Instant, repeat: Option<Duration>) -> Self {
        Self {
            fire_at: now,
            repeat,
            end_time: None,
            active: false,
            target: SSDP_ADDR,
            task: ScheduleTask::PostBye,
        }
    }

    pub fn inbound(task: ScheduleTask, now: Instant) -> Self {
        Self {
            fire_at: now,
            repeat: None,
            end_time: None,
            active: false,
            target: SSDP_ADDR,
            task,
        }
    }

    fn render(&self, device: Option<&DeviceAnnouncement>) -> Vec<ScheduleEffect> {
        match &self.task {
            ScheduleTask::MSearchSend { search_target, mx } => {
                let msg = SearchMessage {
                    host: SSDP_ADDR,
                    st: search_target.clone(),
                    mx: Some(*mx),
                };
                vec![ScheduleEffect::Send {
                    target: self.target,
                    payload: msg.to_string(),
                }]
            }
            ScheduleTask::MSearchReplyOut { st } => {
                let Some(device) = device else {
                    return Vec::new();
                };
                let (st, usn) = device.usn_for(st);
                let msg = SearchReplyMessage {
                    location: device.location.clone(),
                    st,
                    usn,
                    cache_control: CACHE_CONTROL_MAX_AGE,
                };
                vec![ScheduleEffect::Send {
                    target: self.target,
                    payload: msg.to_string(),
                }]
            }
            ScheduleTask::PostAlive => {
                let Some(device) = device else {
                    return Vec::new();
                };
                device
                    .notification_set()
                    .into_iter()
                    .map(|(nt, usn)| {
                        let msg = NotifyAliveMessage {
                            location: device.location.clone(),
                            usn,
                            nt,
                            cache_control: CACHE_CONTROL_MAX_AGE,
                        };
                        ScheduleEffect::Send {
                            target: self.target,
                            payload: msg.to_string(),
                        }
                    })
                    .collect()
            }
            ScheduleTask::PostBye => {
                let Some(device) = device else {
                    return Vec::new();
                };
                let msg = NotifyByeByeMessage {
                    usn: USN::urn(device.udn.clone(), device.device_type.clone()),
                    nt: NotificationType::Urn(device.device_type.clone()),
                };
                vec![ScheduleEffect::Send {
                    target: self.target,
                    payload: msg.to_string(),
                }]
            }
            ScheduleTask::SubscribeSend {
                path,
                callback,
                duration_sec,
            } => {
                let payload = format!(
                    "SUBSCRIBE {path} HTTP/1.1\r\n\
HOST: {host}\r\n\
CALLBACK: <{callback}>\r\n\
NT: upnp:event\r\n\
TIMEOUT: Second-{duration_sec}\r\n\r\n",
                    host = self.target,
                );
                vec![ScheduleEffect::Send {
                    target: self.target,
                    payload,
                }]
            }
            ScheduleTask::MSearchReplyIn { location, usn, st } => {
                vec![ScheduleEffect::Discovery(DiscoveryEvent::SearchReply {
                    location: location.clone(),
                    usn: usn.clone(),
                    st: st.clone(),
                })]
            }
            ScheduleTask::NotifyReplyIn(notify) => {
                vec![ScheduleEffect::Discovery(DiscoveryEvent::Notify(
                    notify.clone(),
                ))]
            }
        }
    }
}

/// Result of one due schedule firing: either a datagram to put on the wire
/// or a discovery event for the control point to consume.
#[derive(Debug)]
pub enum ScheduleEffect {
    Send { target: SocketAddr, payload: String },
    Discovery(DiscoveryEvent),
}

#[derive(Debug)]
pub enum DiscoveryEvent {
    SearchReply {
        location: String,
        usn: USN,
        st: NotificationType,
    },
    Notify(NotifyMessage),
}

/// Ordered queue of time-triggered tasks.
///
/// Due schedules fire in insertion order within one pass; repeating
/// schedules keep their queue position. Cancellation is `active = false`;
/// inactive entries are reclaimed at the end of the next pass, never
/// synchronously.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: Vec<Schedule>,
    disabled: bool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut schedule: Schedule) {
        schedule.active = true;
        tracing::debug!(task = schedule.task.name(), "Scheduling");
        self.queue.push(schedule);
    }

    /// Run all due schedules and reclaim inactive entries.
    pub fn execute(
        &mut self,
        now: Instant,
        device: Option<&DeviceAnnouncement>,
    ) -> Vec<ScheduleEffect> {
        let mut effects = Vec::new();
        if self.disabled {
            return effects;
        }
        for schedule in self.queue.iter_mut() {
            if !schedule.active || schedule.fire_at > now {
                continue;
            }
            if schedule.end_time.is_some_and(|end| now > end) {
                schedule.active = false;
                continue;
            }
            tracing::trace!(task = schedule.task.name(), "Executing schedule");
            effects.extend(schedule.render(device));
            match schedule.repeat {
                Some(repeat) => schedule.fire_at = now + repeat,
                None => schedule.active = false,
            }
        }
        self.queue.retain(|s| s.active);
        effects
    }

    /// True while an active M-SEARCH emission schedule exists.
    pub fn is_msearch_active(&self) -> bool {
        self.queue
            .iter()
            .any(|s| s.active && matches!(s.task, ScheduleTask::MSearchSend { .. }))
    }

    /// Deactivate every M-SEARCH emission schedule.
    pub fn stop_msearch(&mut self) {
        for schedule in self.queue.iter_mut() {
            if matches!(schedule.task, ScheduleTask::MSearchSend { .. }) {
                schedule.active = false;
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.disabled = !enabled;
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::{Duration, Instant};

    use crate::{
        device_description::Udn,
        ssdp::{NotificationType, SSDP_ADDR},
        urn::URN,
    };

    use super::{DeviceAnnouncement, Schedule, ScheduleEffect, ScheduleTask, Scheduler};

    fn test_device() -> DeviceAnnouncement {
        DeviceAnnouncement {
            udn: Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap(),
            device_type: URN::media_renderer(),
            service_types: vec![
                URN::service(crate::urn::ServiceType::AVTransport),
                URN::service(crate::urn::ServiceType::RenderingControl),
            ],
            location: "http://192.168.1.20:44757/upnp/devicedesc.xml".to_string(),
        }
    }

    #[test]
    fn one_shot_fires_once_and_is_reclaimed() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::post_bye(now, None));
        let effects = scheduler.execute(now, Some(&test_device()));
        assert_eq!(effects.len(), 1);
        assert_eq!(scheduler.len(), 0);
        let effects = scheduler.execute(now + Duration::from_secs(1), Some(&test_device()));
        assert!(effects.is_empty());
    }

    #[test]
    fn repeating_schedule_keeps_firing() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::post_alive(now, Some(Duration::from_millis(100))));
        assert_eq!(scheduler.execute(now, Some(&test_device())).len(), 5);
        // not due yet
        assert!(scheduler
            .execute(now + Duration::from_millis(50), Some(&test_device()))
            .is_empty());
        assert_eq!(
            scheduler
                .execute(now + Duration::from_millis(150), Some(&test_device()))
                .len(),
            5
        );
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn end_time_deactivates_before_firing() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        let mut schedule = Schedule::msearch_send(
            NotificationType::All,
            3,
            now,
            Duration::from_millis(100),
            Duration::from_millis(250),
        );
        schedule.fire_at = now;
        scheduler.add(schedule);
        assert_eq!(scheduler.execute(now, None).len(), 1);
        assert!(scheduler.is_msearch_active());
        assert_eq!(
            scheduler
                .execute(now + Duration::from_millis(100), None)
                .len(),
            1
        );
        // past the window: deactivated without firing
        assert!(scheduler
            .execute(now + Duration::from_millis(300), None)
            .is_empty());
        assert!(!scheduler.is_msearch_active());
        assert_eq!(scheduler.len(), 0);
    }

    #[test]
    fn due_schedules_fire_in_insertion_order() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        let mut bye = Schedule::post_bye(now, None);
        bye.target = SSDP_ADDR;
        scheduler.add(bye);
        scheduler.add(Schedule::msearch_send(
            NotificationType::All,
            2,
            now,
            Duration::from_secs(1),
            Duration::from_secs(10),
        ));
        let effects = scheduler.execute(now, Some(&test_device()));
        assert_eq!(effects.len(), 2);
        let ScheduleEffect::Send { payload, .. } = &effects[0] else {
            panic!("expected send");
        };
        assert!(payload.contains("ssdp:byebye"));
        let ScheduleEffect::Send { payload, .. } = &effects[1] else {
            panic!("expected send");
        };
        assert!(payload.starts_with("M-SEARCH"));
    }

    #[test]
    fn disabled_scheduler_keeps_entries_without_firing() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::post_bye(now, None));
        scheduler.set_enabled(false);
        assert!(scheduler.execute(now, Some(&test_device())).is_empty());
        assert_eq!(scheduler.len(), 1);
        scheduler.set_enabled(true);
        assert_eq!(scheduler.execute(now, Some(&test_device())).len(), 1);
    }

    #[test]
    fn msearch_reply_delay_stays_within_mx_window() {
        let now = Instant::now();
        for _ in 0..32 {
            let schedule = Schedule::msearch_reply_out(
                NotificationType::RootDevice,
                SSDP_ADDR,
                2,
                now,
            );
            let delay = schedule.fire_at - now;
            assert!(delay < Duration::from_millis(2000));
        }
    }

    #[test]
    fn alive_set_covers_udn_root_type_and_services() {
        let now = Instant::now();
        let device = test_device();
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::post_alive(now, None));
        let effects = scheduler.execute(now, Some(&device));
        let payloads: Vec<String> = effects
            .into_iter()
            .map(|e| match e {
                ScheduleEffect::Send { payload, .. } => payload,
                _ => panic!("expected send"),
            })
            .collect();
        assert_eq!(payloads.len(), 5);
        assert!(payloads[0].contains("NT: uuid:abc0abc0-0000-1111-2222-333344445555\r\n"));
        assert!(payloads[1].contains("NT: upnp:rootdevice\r\n"));
        assert!(payloads[1]
            .contains("USN: uuid:abc0abc0-0000-1111-2222-333344445555::upnp:rootdevice\r\n"));
        assert!(payloads[2].contains("NT: urn:schemas-upnp-org:device:MediaRenderer:1\r\n"));
        assert!(payloads[3].contains("NT: urn:schemas-upnp-org:service:AVTransport:1\r\n"));
        assert!(payloads[4].contains("NT: urn:schemas-upnp-org:service:RenderingControl:1\r\n"));
        for payload in &payloads {
            assert!(payload.contains("NTS: ssdp:alive\r\n"));
            assert!(payload.contains("LOCATION: http://192.168.1.20:44757/upnp/devicedesc.xml\r\n"));
        }
    }

    #[test]
    fn msearch_reply_carries_location_st_and_composite_usn() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        let mut reply = Schedule::msearch_reply_out(
            NotificationType::Urn(URN::media_renderer()),
            "192.168.1.5:3000".parse().unwrap(),
            2,
            now,
        );
        reply.fire_at = now;
        scheduler.add(reply);
        let effects = scheduler.execute(now, Some(&test_device()));
        assert_eq!(effects.len(), 1);
        let ScheduleEffect::Send { target, payload } = &effects[0] else {
            panic!("expected send");
        };
        assert_eq!(target.to_string(), "192.168.1.5:3000");
        assert!(payload.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(payload.contains("LOCATION: http://192.168.1.20:44757/upnp/devicedesc.xml\r\n"));
        assert!(payload.contains("ST: urn:schemas-upnp-org:device:MediaRenderer:1\r\n"));
        assert!(payload.contains(
            "USN: uuid:abc0abc0-0000-1111-2222-333344445555::urn:schemas-upnp-org:device:MediaRenderer:1\r\n"
        ));
    }

    #[test]
    fn inbound_schedule_produces_discovery_event() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.add(Schedule::inbound(
            ScheduleTask::MSearchReplyIn {
                location: "http://192.168.1.9/desc.xml".into(),
                usn: crate::ssdp::USN::root_device(
                    Udn::from_str("uuid:abc0abc0-0000-1111-2222-333344445555").unwrap(),
                ),
                st: NotificationType::RootDevice,
            },
            now,
        ));
        let effects = scheduler.execute(now, None);
        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], ScheduleEffect::Discovery(_)));
        assert_eq!(scheduler.len(), 0);
    }
}
