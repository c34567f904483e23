use api::recorder::RecordingState;
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::recording::Transition;

lazy_static! {
    pub static ref RECORDINGS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("recordings", "live recordings by state"),
        &["state"]
    )
    .unwrap();
    pub static ref FINISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("recordings_finished", "recordings that reached a terminal state"),
        &["state"]
    )
    .unwrap();
    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("liverec".to_string()), None).unwrap();
    pub static ref ENCODER: TextEncoder = TextEncoder::new();
}

pub fn register() {
    // already registered when several servers share a process
    let _ = REGISTRY.register(Box::new(RECORDINGS.clone()));
    let _ = REGISTRY.register(Box::new(FINISHED.clone()));
}

pub fn created() {
    RECORDINGS
        .with_label_values(&[RecordingState::Pending.to_string().as_str()])
        .inc();
}

pub fn observe(transition: &Transition) {
    RECORDINGS
        .with_label_values(&[transition.from.to_string().as_str()])
        .dec();
    let to = transition.to.to_string();
    if transition.to.is_terminal() {
        FINISHED.with_label_values(&[to.as_str()]).inc();
    } else {
        RECORDINGS.with_label_values(&[to.as_str()]).inc();
    }
}

pub fn render() -> String {
    ENCODER
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_else(|e| format!("# metrics encode error: {}", e))
}
