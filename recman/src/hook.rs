use crate::recording::Transition;

#[derive(Clone, Debug)]
pub enum Event {
    Recording(Transition),
}
