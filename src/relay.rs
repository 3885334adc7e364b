//! Input report relay
//!
//! Every inbound interrupt report either goes to the foreground consumer,
//! whose replies are sent back to the originating host under the same
//! report id, or is dropped with an `ActionRequired` alert. Nothing is
//! queued: a stale HID report replayed later means nothing to the host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::controller::ReportListener;
use crate::device::InputReport;
use crate::events::{Notification, SharedSink};
use crate::platform::ReportSender;

/// Foreground consumer that turns one inbound report into outbound reports
pub trait ReportConsumer: Send + Sync {
    fn handle_report(&self, raw: &[u8]) -> Vec<Vec<u8>>;

    /// Entry point used by the relay. Consumers that need the source or
    /// report id override this; the rest only see the payload.
    fn handle_input(&self, report: &InputReport) -> Vec<Vec<u8>> {
        self.handle_report(&report.data)
    }
}

/// Fate of one inbound report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Handed to the consumer; `sent` of `produced` replies reached the host
    Delivered { produced: usize, sent: usize },
    /// No consumer was active; the report was dropped and the user alerted
    DeliveryUnavailable { alerted: bool },
}

pub struct ReportRelay {
    consumer: RwLock<Option<Arc<dyn ReportConsumer>>>,
    sink: SharedSink,
    alerts_enabled: AtomicBool,
}

impl ReportRelay {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            consumer: RwLock::new(None),
            sink,
            alerts_enabled: AtomicBool::new(true),
        }
    }

    /// A foreground session started
    pub fn attach_consumer(&self, consumer: Arc<dyn ReportConsumer>) {
        let replaced = self
            .consumer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(consumer)
            .is_some();
        tracing::info!(replaced, "Report consumer attached");
    }

    /// The foreground session ended. Returns `true` if one was attached.
    pub fn detach_consumer(&self) -> bool {
        let detached = self
            .consumer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if detached {
            tracing::info!("Report consumer detached");
        }
        detached
    }

    pub fn is_active(&self) -> bool {
        self.active_consumer().is_some()
    }

    pub fn set_alerts_enabled(&self, enabled: bool) {
        self.alerts_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Deliver or drop one report
    pub fn relay(&self, report: &InputReport, host: &dyn ReportSender) -> RelayOutcome {
        let Some(consumer) = self.active_consumer() else {
            return RelayOutcome::DeliveryUnavailable {
                alerted: self.raise_alert(report),
            };
        };

        let replies = consumer.handle_input(report);
        let produced = replies.len();
        let mut sent = 0;

        for reply in &replies {
            match host.send_report(&report.source, report.report_id, reply) {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(
                    address = %report.source,
                    report_id = report.report_id,
                    error = %e,
                    "Failed to send outbound report"
                ),
            }
        }

        tracing::trace!(address = %report.source, report_id = report.report_id, produced, sent, "Report relayed");
        RelayOutcome::Delivered { produced, sent }
    }

    fn raise_alert(&self, report: &InputReport) -> bool {
        if !self.alerts_enabled.load(Ordering::SeqCst) {
            tracing::debug!(address = %report.source, "No active consumer, report dropped (alerts disabled)");
            return false;
        }

        tracing::warn!(address = %report.source, "No active consumer, asking user to open the app");
        match self.sink.publish(Notification::ActionRequired {
            source: report.source.clone(),
        }) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Could not raise user alert");
                false
            }
        }
    }

    fn active_consumer(&self) -> Option<Arc<dyn ReportConsumer>> {
        self.consumer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ReportListener for ReportRelay {
    fn on_interrupt_data(&self, report: InputReport, host: &dyn ReportSender) {
        self.relay(&report, host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceAddress;
    use crate::testing::{RecordingPlatform, RecordingSink, ScriptedConsumer};

    fn report(data: &[u8]) -> InputReport {
        InputReport::new(DeviceAddress::parse("0C:00:00:00:00:03").unwrap(), 7, data.to_vec())
    }

    #[test]
    fn test_no_consumer_alerts_once() {
        let sink = Arc::new(RecordingSink::new());
        let relay = ReportRelay::new(sink.clone());
        let platform = RecordingPlatform::new();

        let outcome = relay.relay(&report(&[1, 2, 3]), &platform);

        assert_eq!(outcome, RelayOutcome::DeliveryUnavailable { alerted: true });
        assert!(platform.sent_reports().is_empty());
        assert_eq!(
            sink.notifications(),
            vec![Notification::ActionRequired {
                source: report(&[]).source
            }]
        );
    }

    #[test]
    fn test_consumer_replies_in_order_with_report_id() {
        let sink = Arc::new(RecordingSink::new());
        let relay = ReportRelay::new(sink.clone());
        let platform = RecordingPlatform::new();
        let consumer = Arc::new(ScriptedConsumer::new(vec![vec![0xA1], vec![0xA2], vec![0xA3]]));
        relay.attach_consumer(consumer.clone());

        let inbound = report(&[9, 9]);
        let outcome = relay.relay(&inbound, &platform);

        assert_eq!(outcome, RelayOutcome::Delivered { produced: 3, sent: 3 });
        assert_eq!(consumer.received(), vec![vec![9, 9]]);
        assert_eq!(
            platform.sent_reports(),
            vec![
                (inbound.source.clone(), 7, vec![0xA1]),
                (inbound.source.clone(), 7, vec![0xA2]),
                (inbound.source, 7, vec![0xA3]),
            ]
        );
        assert!(sink.notifications().is_empty());
    }

    #[test]
    fn test_consumer_with_no_replies() {
        let relay = ReportRelay::new(Arc::new(RecordingSink::new()));
        let platform = RecordingPlatform::new();
        relay.attach_consumer(Arc::new(ScriptedConsumer::new(vec![])));

        let outcome = relay.relay(&report(&[1]), &platform);
        assert_eq!(outcome, RelayOutcome::Delivered { produced: 0, sent: 0 });
    }

    #[test]
    fn test_send_failures_are_not_fatal() {
        let relay = ReportRelay::new(Arc::new(RecordingSink::new()));
        let platform = RecordingPlatform::new();
        platform.fail_sends(true);
        relay.attach_consumer(Arc::new(ScriptedConsumer::new(vec![vec![1], vec![2]])));

        let outcome = relay.relay(&report(&[1]), &platform);
        assert_eq!(outcome, RelayOutcome::Delivered { produced: 2, sent: 0 });
    }

    #[test]
    fn test_detach_reverts_to_alert_and_nothing_replays() {
        let sink = Arc::new(RecordingSink::new());
        let relay = ReportRelay::new(sink.clone());
        let platform = RecordingPlatform::new();

        relay.relay(&report(&[1]), &platform);

        relay.attach_consumer(Arc::new(ScriptedConsumer::new(vec![vec![0xFF]])));
        assert!(relay.is_active());
        relay.relay(&report(&[2]), &platform);

        // Only the report that arrived while active produced output
        assert_eq!(platform.sent_reports().len(), 1);

        assert!(relay.detach_consumer());
        assert!(!relay.detach_consumer());
        assert!(!relay.is_active());
        relay.relay(&report(&[3]), &platform);
        assert_eq!(
            sink.count(|n| matches!(n, Notification::ActionRequired { .. })),
            2
        );
    }

    #[test]
    fn test_alert_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink::new());
        sink.fail_alerts(true);
        let relay = ReportRelay::new(sink.clone());

        let outcome = relay.relay(&report(&[1]), &RecordingPlatform::new());
        assert_eq!(outcome, RelayOutcome::DeliveryUnavailable { alerted: false });
    }

    struct SourceTagger;

    impl ReportConsumer for SourceTagger {
        fn handle_report(&self, _raw: &[u8]) -> Vec<Vec<u8>> {
            Vec::new()
        }

        fn handle_input(&self, report: &InputReport) -> Vec<Vec<u8>> {
            vec![vec![report.report_id, report.data.len() as u8]]
        }
    }

    #[test]
    fn test_consumer_sees_whole_report() {
        let relay = ReportRelay::new(Arc::new(RecordingSink::new()));
        let platform = RecordingPlatform::new();
        relay.attach_consumer(Arc::new(SourceTagger));

        let inbound = report(&[1, 2, 3]);
        relay.relay(&inbound, &platform);
        assert_eq!(platform.sent_reports(), vec![(inbound.source, 7, vec![7, 3])]);
    }

    #[test]
    fn test_alerts_disabled() {
        let sink = Arc::new(RecordingSink::new());
        let relay = ReportRelay::new(sink.clone());
        relay.set_alerts_enabled(false);

        let outcome = relay.relay(&report(&[1]), &RecordingPlatform::new());
        assert_eq!(outcome, RelayOutcome::DeliveryUnavailable { alerted: false });
        assert!(sink.notifications().is_empty());
    }
}
