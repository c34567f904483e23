use crate::scheduler::Scheduler;

pub mod channel;
pub mod recording;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
}
