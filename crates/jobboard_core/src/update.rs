use crate::{Effect, JobStore, Msg, PollMode};

/// Pure update function: applies a message to the store and returns any effects.
pub fn update(mut store: JobStore, msg: Msg) -> (JobStore, Vec<Effect>) {
    let effects = match msg {
        Msg::CacheLoaded(jobs) => {
            // Seeded jobs came from the cache; writing them back is pointless.
            store.seed(jobs);
            Vec::new()
        }
        Msg::EventReceived { event, at } => {
            store.apply_event(&event, at);
            vec![Effect::PersistJobs(store.jobs().clone())]
        }
        Msg::SnapshotFetched { jobs, requested_at } => {
            if store.apply_snapshot(jobs, requested_at) {
                vec![Effect::PersistJobs(store.jobs().clone())]
            } else {
                Vec::new()
            }
        }
        Msg::SnapshotFailed { error, at } => {
            store.record_error(error, at);
            Vec::new()
        }
        Msg::ConnectionChanged(state) => {
            let before = PollMode::for_connection(store.connection());
            store.set_connection(state);
            let after = PollMode::for_connection(state);
            if before == after {
                Vec::new()
            } else {
                vec![Effect::SetPollMode(after)]
            }
        }
        Msg::JobHidden(id) => {
            if store.hide(&id) {
                vec![Effect::PersistJobs(store.jobs().clone())]
            } else {
                Vec::new()
            }
        }
        Msg::Tick { now } => {
            store.expire_error(now);
            Vec::new()
        }
    };

    (store, effects)
}
