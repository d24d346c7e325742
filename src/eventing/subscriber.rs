use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use reqwest::Method;

use crate::{action::join_control_url, registry::DeviceRegistry};

use super::{parse_property_set, parse_timeout_header};

/// Control-point-side lifecycle of one service's event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Unsubscribing,
}

/// Application callback for property change events:
/// `(sid, variable, new_value)`. Whatever context the application needs
/// travels inside the closure.
pub type EventCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

struct SubscribeJob {
    service_id: String,
    url: String,
    sid: Option<String>,
}

enum JobOutcome {
    Subscribed { sid: String, timeout_sec: u32 },
    Failed,
}

/// Subscribes to remote services, receives their NOTIFY callbacks and
/// renews leases before they expire.
#[derive(Clone)]
pub struct EventSubscriber {
    http: reqwest::Client,
    registry: Arc<Mutex<DeviceRegistry>>,
    /// Url remote devices deliver NOTIFY requests to
    local_callback_url: String,
    duration_sec: u32,
    retry: Option<Duration>,
    active: Arc<AtomicBool>,
    last_event_notify: Arc<Mutex<Option<Instant>>>,
    callback: EventCallback,
}

impl EventSubscriber {
    pub fn new(
        http: reqwest::Client,
        registry: Arc<Mutex<DeviceRegistry>>,
        local_callback_url: String,
        duration_sec: u32,
        retry_ms: u64,
        callback: EventCallback,
    ) -> Self {
        Self {
            http,
            registry,
            local_callback_url,
            duration_sec,
            retry: (retry_ms > 0).then(|| Duration::from_millis(retry_ms)),
            active: Arc::new(AtomicBool::new(false)),
            last_event_notify: Arc::new(Mutex::new(None)),
            callback,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn last_event_notify(&self) -> Option<Instant> {
        *self.last_event_notify.lock().expect("notify stamp lock")
    }

    /// Start or stop maintaining subscriptions: on activation every service
    /// with an event url is subscribed, on deactivation everything is
    /// unsubscribed.
    pub async fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
        if active {
            self.subscribe_due(Instant::now(), true).await;
        } else {
            self.unsubscribe_all().await;
        }
    }

    /// Periodic maintenance: renew subscriptions that approach expiry and
    /// retry ones that never made it.
    pub async fn tick(&self, now: Instant) {
        if !self.is_active() {
            return;
        }
        self.subscribe_due(now, false).await;
    }

    /// Lease renewal margin: a tenth of the subscription duration, at least
    /// half a second. Renewal happens once `now + margin` reaches expiry.
    fn renewal_margin(&self) -> Duration {
        Duration::from_millis((u64::from(self.duration_sec) * 100).max(500))
    }

    async fn subscribe_due(&self, now: Instant, force: bool) {
        let margin = self.renewal_margin();
        let jobs: Vec<SubscribeJob> = {
            let mut registry = self.registry.lock().expect("registry lock");
            let retry = self.retry;
            let mut jobs = Vec::new();
            for device in registry.devices_mut() {
                if !device.active {
                    continue;
                }
                let base_url = device.base_url.clone();
                for service in &mut device.services {
                    if service.event_sub_url.is_empty() {
                        continue;
                    }
                    let due = match service.subscription_state {
                        SubscriptionState::Subscribed => service
                            .time_subscription_expires
                            .map_or(true, |expires| now + margin >= expires),
                        // a failed subscription is retried only when a
                        // backoff is configured
                        SubscriptionState::Unsubscribed => match (force, retry) {
                            (true, _) => true,
                            (false, None) => false,
                            (false, Some(retry)) => service
                                .time_subscription_started
                                .map_or(true, |started| now.duration_since(started) >= retry),
                        },
                        SubscriptionState::Subscribing | SubscriptionState::Unsubscribing => false,
                    };
                    if !due {
                        continue;
                    }
                    service.subscription_state = SubscriptionState::Subscribing;
                    service.time_subscription_started = Some(now);
                    jobs.push(SubscribeJob {
                        service_id: service.service_id.clone(),
                        url: join_control_url(&base_url, &service.event_sub_url),
                        sid: service.event_sub_sid.clone(),
                    });
                }
            }
            jobs
        };

        for job in jobs {
            let outcome = match self.send_subscribe(&job).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::warn!(url = job.url, %error, "SUBSCRIBE failed");
                    JobOutcome::Failed
                }
            };
            let mut registry = self.registry.lock().expect("registry lock");
            let Some(service) = registry.find_service_mut(&job.service_id) else {
                continue;
            };
            match outcome {
                JobOutcome::Subscribed { sid, timeout_sec } => {
                    let now = Instant::now();
                    service.event_sub_sid = Some(sid);
                    service.subscription_state = SubscriptionState::Subscribed;
                    service.time_subscription_confirmed = Some(now);
                    service.time_subscription_expires =
                        Some(now + Duration::from_secs(timeout_sec.into()));
                }
                JobOutcome::Failed => {
                    service.subscription_state = SubscriptionState::Unsubscribed;
                }
            }
        }
    }

    async fn send_subscribe(&self, job: &SubscribeJob) -> anyhow::Result<JobOutcome> {
        let method = Method::from_bytes(b"SUBSCRIBE").expect("valid method");
        let mut request = self
            .http
            .request(method, &job.url)
            .header("TIMEOUT", format!("Second-{}", self.duration_sec));
        // a renewal carries the SID alone, a fresh subscription the callback
        match &job.sid {
            Some(sid) => request = request.header("SID", sid),
            None => {
                request = request
                    .header("NT", "upnp:event")
                    .header("CALLBACK", format!("<{}>", self.local_callback_url));
            }
        }
        let response = request.send().await?;
        if response.status() != reqwest::StatusCode::OK {
            anyhow::bail!("subscribe answered {}", response.status());
        }
        let sid = response
            .headers()
            .get("SID")
            .and_then(|sid| sid.to_str().ok())
            .context("subscribe response misses SID")?
            .to_string();
        let timeout_sec = parse_timeout_header(
            response
                .headers()
                .get("TIMEOUT")
                .and_then(|t| t.to_str().ok()),
            self.duration_sec,
        );
        tracing::debug!(url = job.url, sid, timeout_sec, "Subscribed");
        Ok(JobOutcome::Subscribed { sid, timeout_sec })
    }

    async fn unsubscribe_all(&self) {
        let jobs: Vec<(String, String, String)> = {
            let mut registry = self.registry.lock().expect("registry lock");
            let mut jobs = Vec::new();
            for device in registry.devices_mut() {
                let base_url = device.base_url.clone();
                for service in &mut device.services {
                    let Some(sid) = service.event_sub_sid.clone() else {
                        continue;
                    };
                    if service.subscription_state != SubscriptionState::Subscribed {
                        continue;
                    }
                    service.subscription_state = SubscriptionState::Unsubscribing;
                    jobs.push((
                        service.service_id.clone(),
                        join_control_url(&base_url, &service.event_sub_url),
                        sid,
                    ));
                }
            }
            jobs
        };

        for (service_id, url, sid) in jobs {
            let method = Method::from_bytes(b"UNSUBSCRIBE").expect("valid method");
            let ok = match self.http.request(method, &url).header("SID", &sid).send().await {
                Ok(response) => response.status() == reqwest::StatusCode::OK,
                Err(error) => {
                    tracing::warn!(url, %error, "UNSUBSCRIBE failed");
                    false
                }
            };
            let mut registry = self.registry.lock().expect("registry lock");
            let Some(service) = registry.find_service_mut(&service_id) else {
                continue;
            };
            if ok {
                service.event_sub_sid = None;
                service.subscription_state = SubscriptionState::Unsubscribed;
                service.time_subscription_confirmed = None;
                service.time_subscription_expires = None;
            } else {
                // remote refused; lease will lapse on its own
                service.subscription_state = SubscriptionState::Subscribed;
            }
        }
    }

    /// Router serving the local NOTIFY callback path.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, any(handle_notify))
            .with_state(self.clone())
    }

    pub(crate) fn dispatch_notify(&self, sid: &str, body: &[u8]) {
        *self.last_event_notify.lock().expect("notify stamp lock") = Some(Instant::now());
        {
            let mut registry = self.registry.lock().expect("registry lock");
            if let Some(service) = registry.find_service_by_sid(sid) {
                service.time_subscription_confirmed = Some(Instant::now());
                service.subscription_state = SubscriptionState::Subscribed;
            }
        }
        for (variable, value) in parse_property_set(body) {
            tracing::trace!(sid, variable, "Event notification");
            (self.callback)(sid, &variable, &value);
        }
    }
}

async fn handle_notify(
    State(subscriber): State<EventSubscriber>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let sid = headers
        .get("SID")
        .and_then(|sid| sid.to_str().ok())
        .unwrap_or_default()
        .to_string();
    subscriber.dispatch_notify(&sid, &body);
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::registry::DeviceRegistry;

    use super::{EventCallback, EventSubscriber};

    #[test]
    fn notify_dispatch_invokes_callback_per_property() {
        let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
        let seen: Arc<Mutex<Vec<(String, String, String)>>> = Arc::default();
        let seen_in_callback = seen.clone();
        let callback: EventCallback = Arc::new(move |sid, var, value| {
            seen_in_callback
                .lock()
                .unwrap()
                .push((sid.to_string(), var.to_string(), value.to_string()));
        });
        let subscriber = EventSubscriber::new(
            reqwest::Client::new(),
            registry,
            "http://192.168.1.5:9001/evt".into(),
            1800,
            0,
            callback,
        );
        let body = b"<e:propertyset xmlns:e=\"urn:schemas-upnp-org:metadata-1-0/events\">\
<e:property><Volume>11</Volume></e:property>\
<e:property><Mute>0</Mute></e:property>\
</e:propertyset>";
        subscriber.dispatch_notify("uuid:s1", body);
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("uuid:s1".to_string(), "Volume".to_string(), "11".to_string()),
                ("uuid:s1".to_string(), "Mute".to_string(), "0".to_string()),
            ]
        );
        assert!(subscriber.last_event_notify().is_some());
    }
}
