use crate::alert::Alert;

/// Pushes alerts to a long-lived live channel (e.g. a UI's websocket
/// connections). Non-blocking by contract: an implementation with no
/// listeners, or a full channel, drops the message rather than waiting.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, topic: &str, alert: &Alert);
}
