use jobboard_core::ConnectionState::{self, *};

const ALL: [ConnectionState; 4] = [Disconnected, Connecting, Connected, Error];

#[test]
fn lifecycle_edges_are_allowed() {
    assert!(Disconnected.can_transition_to(Connecting));
    assert!(Connecting.can_transition_to(Connected));
    assert!(Connected.can_transition_to(Error));
    assert!(Connected.can_transition_to(Disconnected));
    assert!(Error.can_transition_to(Connecting));
}

#[test]
fn explicit_disconnect_is_reachable_from_every_state() {
    for state in ALL {
        assert!(state.can_transition_to(Disconnected), "{state} -> disconnected");
    }
}

#[test]
fn shortcuts_are_rejected() {
    assert!(!Disconnected.can_transition_to(Connected));
    assert!(!Error.can_transition_to(Connected));
    assert!(!Connected.can_transition_to(Connecting));
    assert!(!Disconnected.can_transition_to(Error));
}
