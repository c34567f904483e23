pub const METRICS: &str = "/metrics";
pub const CHANNELS: &str = "/api/channels";
pub const RECORDINGS: &str = "/api/recordings";
pub const RECORDINGS_SCHEDULED: &str = "/api/recordings/scheduled";
pub const RECORDINGS_HISTORY: &str = "/api/recordings/history";

pub fn recording(id: &str) -> String {
    format!("/api/recordings/{}", id)
}
