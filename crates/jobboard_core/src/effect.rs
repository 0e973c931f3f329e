use crate::JobMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write the job map to the durable cache.
    PersistJobs(JobMap),
    /// Switch the polling cadence.
    SetPollMode(PollMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// The event stream is down; polling is the only update path.
    Fallback,
    /// The event stream is up; polling only guards against missed events.
    Backstop,
}

impl PollMode {
    pub fn for_connection(state: crate::ConnectionState) -> Self {
        if state.is_connected() {
            Self::Backstop
        } else {
            Self::Fallback
        }
    }
}
