#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Sleeping,
    Pumping,
    Draining,
}

impl PumpState {
    pub fn is_sleeping(self) -> bool {
        matches!(self, Self::Sleeping)
    }
}

pub fn can_transition(from: PumpState, to: PumpState) -> bool {
    matches!(
        (from, to),
        (PumpState::Sleeping, PumpState::Pumping)
            | (PumpState::Pumping, PumpState::Draining)
            | (PumpState::Draining, PumpState::Sleeping)
    ) || from == to
}
