use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use reqwest::StatusCode;

use crate::XmlWriter;

use super::last_change_body;

/// One GENA subscriber of a service, identified by `(service, sid)`.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub sid: String,
    pub callback_url: String,
    pub timeout_sec: u32,
    /// Event key of the next notification; the first delivery carries 0
    pub seq: u32,
    pub expires_at: Instant,
}

#[derive(Debug)]
struct PendingNotification {
    id: u64,
    service: String,
    sid: String,
    /// Sequence number captured when the change was enqueued
    seq: u32,
    body: Arc<str>,
    error_count: u32,
}

#[derive(Debug, Default)]
struct PublisherState {
    disabled: bool,
    subscriptions: Vec<(String, Vec<Subscription>)>,
    pending: VecDeque<PendingNotification>,
    next_entry_id: u64,
}

impl PublisherState {
    fn service_subscriptions(&mut self, service: &str) -> &mut Vec<Subscription> {
        if let Some(idx) = self.subscriptions.iter().position(|(s, _)| s == service) {
            return &mut self.subscriptions[idx].1;
        }
        self.subscriptions.push((service.to_string(), Vec::new()));
        &mut self.subscriptions.last_mut().expect("just pushed").1
    }

    fn remove_subscription(&mut self, service: &str, sid: &str) -> bool {
        let Some(list) = self
            .subscriptions
            .iter_mut()
            .find_map(|(s, list)| (s.as_str() == service).then_some(list))
        else {
            return false;
        };
        let before = list.len();
        list.retain(|sub| sub.sid != sid);
        if list.len() == before {
            return false;
        }
        // eagerly purge queued notifications of the dead subscription
        self.pending
            .retain(|entry| !(entry.service == service && entry.sid == sid));
        true
    }

    fn is_live(&self, service: &str, sid: &str) -> bool {
        self.subscriptions
            .iter()
            .filter(|(s, _)| s == service)
            .flat_map(|(_, list)| list)
            .any(|sub| sub.sid == sid)
    }
}

/// Outcome of a SUBSCRIBE request handled by the publisher.
#[derive(Debug)]
pub enum SubscribeOutcome {
    /// New or renewed subscription
    Accepted { sid: String, timeout_sec: u32 },
    /// A new subscription arrived without a CALLBACK header
    MissingCallback,
}

/// Device-side subscription manager: accepts SUBSCRIBE/UNSUBSCRIBE, queues
/// state change notifications, and delivers them in order with strictly
/// increasing SEQ per subscription.
#[derive(Debug)]
pub struct EventPublisher {
    state: Mutex<PublisherState>,
    http: reqwest::Client,
    max_notify_retries: u32,
}

impl EventPublisher {
    pub fn new(max_notify_retries: u32) -> Self {
        Self {
            state: Mutex::new(PublisherState::default()),
            http: reqwest::Client::new(),
            max_notify_retries,
        }
    }

    /// Register or renew a subscription.
    ///
    /// A non-empty `sid` matching an existing subscription renews it in
    /// place (the SID is retained). A new subscription without a callback is
    /// refused; GENA requires CALLBACK on first subscribe.
    pub fn subscribe(
        &self,
        service: &str,
        callback_url: &str,
        sid: Option<&str>,
        timeout_sec: u32,
    ) -> SubscribeOutcome {
        let mut state = self.state.lock().expect("publisher lock");
        let subscriptions = state.service_subscriptions(service);

        if let Some(sid) = sid.filter(|sid| !sid.is_empty()) {
            if let Some(existing) = subscriptions.iter_mut().find(|sub| sub.sid == sid) {
                existing.timeout_sec = timeout_sec;
                existing.expires_at = Instant::now() + Duration::from_secs(timeout_sec.into());
                if !callback_url.is_empty() {
                    existing.callback_url = callback_url.to_string();
                }
                tracing::debug!(service, sid, "Renewed subscription");
                return SubscribeOutcome::Accepted {
                    sid: sid.to_string(),
                    timeout_sec,
                };
            }
        }

        if callback_url.is_empty() {
            return SubscribeOutcome::MissingCallback;
        }

        let sid = format!("uuid:{}", uuid::Uuid::new_v4());
        subscriptions.push(Subscription {
            sid: sid.clone(),
            callback_url: callback_url.to_string(),
            timeout_sec,
            seq: 0,
            expires_at: Instant::now() + Duration::from_secs(timeout_sec.into()),
        });
        tracing::debug!(service, sid, callback_url, "New subscription");
        SubscribeOutcome::Accepted { sid, timeout_sec }
    }

    /// Remove a subscription and any notifications still queued for it.
    pub fn unsubscribe(&self, service: &str, sid: &str) -> bool {
        let mut state = self.state.lock().expect("publisher lock");
        let found = state.remove_subscription(service, sid);
        tracing::debug!(service, sid, found, "Unsubscribe");
        found
    }

    /// Queue a state change of `service` for every subscriber.
    ///
    /// The current sequence number is captured into the queue entry, then
    /// incremented, so the first notification of a subscription goes out
    /// with `SEQ: 0`. No-op while the publisher is disabled.
    pub fn add_change(
        &self,
        service: &str,
        namespace_abbrev: &str,
        instance_id: u32,
        writer: &(dyn Fn(&mut XmlWriter) -> quick_xml::Result<()> + Send + Sync),
    ) -> anyhow::Result<()> {
        let body: Arc<str> = last_change_body(namespace_abbrev, instance_id, writer)?.into();
        let mut state = self.state.lock().expect("publisher lock");
        if state.disabled {
            return Ok(());
        }
        let mut queued = Vec::new();
        for subscription in state.service_subscriptions(service) {
            queued.push(PendingNotification {
                id: 0,
                service: service.to_string(),
                sid: subscription.sid.clone(),
                seq: subscription.seq,
                body: body.clone(),
                error_count: 0,
            });
            subscription.seq = subscription.seq.wrapping_add(1);
        }
        for mut entry in queued {
            state.next_entry_id += 1;
            entry.id = state.next_entry_id;
            state.pending.push_back(entry);
        }
        Ok(())
    }

    /// Deliver queued notifications in order.
    ///
    /// Entries whose subscription died are dropped. A delivery that does not
    /// come back `200 OK` bumps the entry's error count; past the retry cap
    /// the entry is dropped, otherwise it stays in place for the next pass.
    pub async fn publish(&self) {
        let batch: Vec<(u64, String, String, u32, Arc<str>)> = {
            let state = self.state.lock().expect("publisher lock");
            state
                .pending
                .iter()
                .filter(|entry| state.is_live(&entry.service, &entry.sid))
                .map(|entry| {
                    let callback = state
                        .subscriptions
                        .iter()
                        .filter(|(s, _)| *s == entry.service)
                        .flat_map(|(_, list)| list)
                        .find(|sub| sub.sid == entry.sid)
                        .map(|sub| sub.callback_url.clone())
                        .unwrap_or_default();
                    (entry.id, callback, entry.sid.clone(), entry.seq, entry.body.clone())
                })
                .collect()
        };

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for (id, callback, sid, seq, body) in batch {
            match self.notify(&callback, &sid, seq, &body).await {
                Ok(()) => delivered.push(id),
                Err(error) => {
                    tracing::warn!(callback, sid, seq, %error, "NOTIFY delivery failed");
                    failed.push(id);
                }
            }
        }

        let mut state = self.state.lock().expect("publisher lock");
        let max_retries = self.max_notify_retries;
        state.pending.retain_mut(|entry| {
            if delivered.contains(&entry.id) {
                return false;
            }
            if failed.contains(&entry.id) {
                entry.error_count += 1;
                if entry.error_count > max_retries {
                    tracing::warn!(
                        sid = %entry.sid,
                        seq = entry.seq,
                        "Dropping notification after {max_retries} retries"
                    );
                    return false;
                }
            }
            // entries of dead subscriptions are already purged by unsubscribe
            true
        });
    }

    async fn notify(&self, callback: &str, sid: &str, seq: u32, body: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .request(reqwest::Method::from_bytes(b"NOTIFY")?, callback)
            .header("Content-Type", "text/xml")
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SID", sid)
            .header("SEQ", seq.to_string())
            .body(body.to_string())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            anyhow::bail!("notify answered {}", response.status());
        }
        Ok(())
    }

    /// Drop every subscription whose lease ran out, with its queued
    /// notifications.
    pub fn remove_expired(&self, now: Instant) {
        let expired: Vec<(String, String)> = {
            let state = self.state.lock().expect("publisher lock");
            state
                .subscriptions
                .iter()
                .flat_map(|(service, list)| {
                    list.iter()
                        .filter(|sub| sub.expires_at <= now)
                        .map(|sub| (service.clone(), sub.sid.clone()))
                })
                .collect()
        };
        for (service, sid) in expired {
            tracing::debug!(service, sid, "Subscription expired");
            self.unsubscribe(&service, &sid);
        }
    }

    /// Disabling clears the pending queue and suppresses future enqueues.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().expect("publisher lock");
        state.disabled = !enabled;
        if !enabled {
            state.pending.clear();
        }
    }

    pub fn subscription_count(&self, service: &str) -> usize {
        let state = self.state.lock().expect("publisher lock");
        state
            .subscriptions
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, list)| list.len())
            .sum()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("publisher lock").pending.len()
    }

    #[cfg(test)]
    fn pending_snapshot(&self) -> Vec<(String, u32)> {
        let state = self.state.lock().expect("publisher lock");
        state
            .pending
            .iter()
            .map(|entry| (entry.sid.clone(), entry.seq))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use quick_xml::events::BytesText;

    use super::{EventPublisher, SubscribeOutcome};

    fn volume_writer(w: &mut crate::XmlWriter) -> quick_xml::Result<()> {
        w.create_element("Volume")
            .write_text_content(BytesText::new("5"))?;
        Ok(())
    }

    fn accepted_sid(outcome: SubscribeOutcome) -> String {
        match outcome {
            SubscribeOutcome::Accepted { sid, .. } => sid,
            SubscribeOutcome::MissingCallback => panic!("subscription refused"),
        }
    }

    #[test]
    fn new_subscription_requires_callback() {
        let publisher = EventPublisher::new(3);
        assert!(matches!(
            publisher.subscribe("rendering_control", "", None, 1800),
            SubscribeOutcome::MissingCallback
        ));
        assert_eq!(publisher.subscription_count("rendering_control"), 0);
    }

    #[test]
    fn renewal_keeps_sid_and_subscription_count() {
        let publisher = EventPublisher::new(3);
        let sid = accepted_sid(publisher.subscribe(
            "rendering_control",
            "http://192.168.1.5:9001/evt",
            None,
            1800,
        ));
        let renewed = accepted_sid(publisher.subscribe(
            "rendering_control",
            "",
            Some(&sid),
            900,
        ));
        assert_eq!(renewed, sid);
        assert_eq!(publisher.subscription_count("rendering_control"), 1);
    }

    #[test]
    fn unknown_sid_with_callback_creates_new_subscription() {
        let publisher = EventPublisher::new(3);
        let sid = accepted_sid(publisher.subscribe(
            "rendering_control",
            "http://192.168.1.5:9001/evt",
            Some("uuid:gone"),
            1800,
        ));
        assert_ne!(sid, "uuid:gone");
        assert!(sid.starts_with("uuid:"));
    }

    #[test]
    fn first_notification_carries_seq_zero() {
        let publisher = EventPublisher::new(3);
        let sid = accepted_sid(publisher.subscribe(
            "rendering_control",
            "http://192.168.1.5:9001/evt",
            None,
            1800,
        ));
        publisher
            .add_change("rendering_control", "RCS", 0, &volume_writer)
            .unwrap();
        publisher
            .add_change("rendering_control", "RCS", 0, &volume_writer)
            .unwrap();
        let pending = publisher.pending_snapshot();
        assert_eq!(pending, vec![(sid.clone(), 0), (sid, 1)]);
    }

    #[test]
    fn unsubscribe_purges_pending_notifications() {
        let publisher = EventPublisher::new(3);
        let sid = accepted_sid(publisher.subscribe(
            "av_transport",
            "http://192.168.1.5:9001/evt",
            None,
            1800,
        ));
        publisher
            .add_change("av_transport", "AVT", 0, &volume_writer)
            .unwrap();
        assert_eq!(publisher.pending_count(), 1);
        assert!(publisher.unsubscribe("av_transport", &sid));
        assert_eq!(publisher.pending_count(), 0);
        assert!(!publisher.unsubscribe("av_transport", &sid));
    }

    #[test]
    fn expired_subscriptions_are_reaped() {
        let publisher = EventPublisher::new(3);
        accepted_sid(publisher.subscribe(
            "av_transport",
            "http://192.168.1.5:9001/evt",
            None,
            1,
        ));
        publisher
            .add_change("av_transport", "AVT", 0, &volume_writer)
            .unwrap();
        publisher.remove_expired(Instant::now() + Duration::from_secs(2));
        assert_eq!(publisher.subscription_count("av_transport"), 0);
        assert_eq!(publisher.pending_count(), 0);
    }

    #[test]
    fn disabled_publisher_drops_queue_and_ignores_changes() {
        let publisher = EventPublisher::new(3);
        accepted_sid(publisher.subscribe(
            "av_transport",
            "http://192.168.1.5:9001/evt",
            None,
            1800,
        ));
        publisher
            .add_change("av_transport", "AVT", 0, &volume_writer)
            .unwrap();
        publisher.set_enabled(false);
        assert_eq!(publisher.pending_count(), 0);
        publisher
            .add_change("av_transport", "AVT", 0, &volume_writer)
            .unwrap();
        assert_eq!(publisher.pending_count(), 0);
    }
}
