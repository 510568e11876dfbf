//! Health check handler.

/// Plain `OK` once the listener is serving.
pub async fn handle_health() -> &'static str {
    "OK"
}
