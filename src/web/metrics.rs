use std::sync::atomic::{AtomicU64, Ordering};

static MATRIX_EVENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static CONTENT_EVENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static CONTENT_EVENTS_FAILED: AtomicU64 = AtomicU64::new(0);
static MEDIA_UPLOADED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_SENT: AtomicU64 = AtomicU64::new(0);
static ROOM_DELIVERY_FAILURES: AtomicU64 = AtomicU64::new(0);
static PROVISIONING_REJECTED: AtomicU64 = AtomicU64::new(0);

pub struct Metrics;

impl Metrics {
    pub fn matrix_event_received() {
        MATRIX_EVENTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn content_event_received() {
        CONTENT_EVENTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn content_event_failed() {
        CONTENT_EVENTS_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn media_uploaded() {
        MEDIA_UPLOADED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent() {
        MESSAGES_SENT.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_delivery_failed() {
        ROOM_DELIVERY_FAILURES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provisioning_rejected() {
        PROVISIONING_REJECTED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn format_prometheus(uptime_seconds: u64, control_rooms: usize) -> String {
    format!(
        r#"# HELP bridge_uptime_seconds Number of seconds the bridge has been running
# TYPE bridge_uptime_seconds gauge
bridge_uptime_seconds {}

# HELP bridge_control_rooms Number of registered control rooms
# TYPE bridge_control_rooms gauge
bridge_control_rooms {}

# HELP matrix_events_received_total Matrix events accepted from appservice transactions
# TYPE matrix_events_received_total counter
matrix_events_received_total {}

# HELP content_events_received_total Content source notifications handled
# TYPE content_events_received_total counter
content_events_received_total {}

# HELP content_events_failed_total Content source notifications that were dropped
# TYPE content_events_failed_total counter
content_events_failed_total {}

# HELP media_uploaded_total Media items copied into the content repository
# TYPE media_uploaded_total counter
media_uploaded_total {}

# HELP messages_sent_total Messages relayed into Matrix rooms
# TYPE messages_sent_total counter
messages_sent_total {}

# HELP room_delivery_failures_total Relay rooms a post could not be delivered to
# TYPE room_delivery_failures_total counter
room_delivery_failures_total {}

# HELP provisioning_rejected_total Alias queries rejected without creating a room
# TYPE provisioning_rejected_total counter
provisioning_rejected_total {}
"#,
        uptime_seconds,
        control_rooms,
        MATRIX_EVENTS_RECEIVED.load(Ordering::Relaxed),
        CONTENT_EVENTS_RECEIVED.load(Ordering::Relaxed),
        CONTENT_EVENTS_FAILED.load(Ordering::Relaxed),
        MEDIA_UPLOADED.load(Ordering::Relaxed),
        MESSAGES_SENT.load(Ordering::Relaxed),
        ROOM_DELIVERY_FAILURES.load(Ordering::Relaxed),
        PROVISIONING_REJECTED.load(Ordering::Relaxed),
    )
}
