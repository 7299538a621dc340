//! Manager metrics
//!
//! OpenTelemetry instruments for connection and subscription health. They
//! are exported through whatever meter provider is installed globally (see
//! `chainsub_core::init_telemetry`).
//!
//! - **connections.open**: sockets currently registered (gauge)
//! - **connections.opened**: sockets opened (counter)
//! - **reconnection.attempts** / **reconnection.success** (counters)
//! - **subscriptions.created** / **confirmed** / **failed** (counters)
//! - **subscriptions.reissued**: subscribe calls re-sent after recovery (counter)
//! - **notifications.routed**: notifications delivered to handlers (counter)
//! - **handlers.failed**: handler or callback failures (counter)
//! - **frames.dropped**: inbound frames that matched nothing (counter)

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
    KeyValue,
};
use std::sync::atomic::{AtomicI64, Ordering};

/// Metrics shared by the connection and subscription managers
pub struct ManagerMetrics {
    pub connections_open: Gauge<i64>,
    pub connections_opened: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    pub subscriptions_created: Counter<u64>,
    pub subscriptions_confirmed: Counter<u64>,
    pub subscriptions_failed: Counter<u64>,
    pub subscriptions_reissued: Counter<u64>,
    pub notifications_routed: Counter<u64>,
    pub handlers_failed: Counter<u64>,
    pub frames_dropped: Counter<u64>,
    open: AtomicI64,
}

impl ManagerMetrics {
    /// Create metrics on the global meter provider
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    /// Create metrics on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connections_open: meter
                .i64_gauge("chainsub.connections.open")
                .with_description("Number of registered sockets")
                .build(),
            connections_opened: meter
                .u64_counter("chainsub.connections.opened")
                .with_description("Total number of sockets opened")
                .build(),
            reconnection_attempts: meter
                .u64_counter("chainsub.reconnection.attempts")
                .with_description("Total number of delayed connection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("chainsub.reconnection.success")
                .with_description("Total number of connections that became usable")
                .build(),
            subscriptions_created: meter
                .u64_counter("chainsub.subscriptions.created")
                .with_description("Total number of subscriptions created")
                .build(),
            subscriptions_confirmed: meter
                .u64_counter("chainsub.subscriptions.confirmed")
                .with_description("Total number of subscribe calls confirmed")
                .build(),
            subscriptions_failed: meter
                .u64_counter("chainsub.subscriptions.failed")
                .with_description("Total number of subscribe calls rejected")
                .build(),
            subscriptions_reissued: meter
                .u64_counter("chainsub.subscriptions.reissued")
                .with_description("Total number of subscribe calls re-sent after recovery")
                .build(),
            notifications_routed: meter
                .u64_counter("chainsub.notifications.routed")
                .with_description("Total number of notifications delivered to handlers")
                .build(),
            handlers_failed: meter
                .u64_counter("chainsub.handlers.failed")
                .with_description("Total number of failed handler or callback invocations")
                .build(),
            frames_dropped: meter
                .u64_counter("chainsub.frames.dropped")
                .with_description("Total number of inbound frames dropped")
                .build(),
            open: AtomicI64::new(0),
        }
    }

    pub fn record_connection_opened(&self, network: &str) {
        self.connections_opened
            .add(1, &[KeyValue::new("network", network.to_string())]);
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.connections_open.record(open, &[]);
    }

    pub fn record_connection_closed(&self) {
        let previous = self
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some((n - 1).max(0)))
            .unwrap_or(0);
        self.connections_open.record((previous - 1).max(0), &[]);
    }

    pub fn record_reconnection_attempt(&self, network: &str) {
        self.reconnection_attempts
            .add(1, &[KeyValue::new("network", network.to_string())]);
    }

    pub fn record_reconnection_success(&self, network: &str) {
        self.reconnection_success
            .add(1, &[KeyValue::new("network", network.to_string())]);
    }

    pub fn record_subscription(&self, method: &str) {
        self.subscriptions_created
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_confirmation(&self, method: &str) {
        self.subscriptions_confirmed
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_subscription_failure(&self, method: &str) {
        self.subscriptions_failed
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_reissued(&self, network: &str, count: u64) {
        self.subscriptions_reissued
            .add(count, &[KeyValue::new("network", network.to_string())]);
    }

    pub fn record_notification(&self, method: &str, delivered: u64, failed: u64) {
        let attributes = &[KeyValue::new("method", method.to_string())];
        self.notifications_routed.add(delivered, attributes);
        if failed > 0 {
            self.handlers_failed.add(failed, attributes);
        }
    }

    pub fn record_handler_failure(&self, kind: &str) {
        self.handlers_failed
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }

    pub fn record_dropped_frame(&self, reason: &str) {
        self.frames_dropped
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }
}
