use leptos::*;

/// Context wrapper for the application router's readiness signal.
///
/// While the signal is false, no query under the current scope will dispatch
/// a fetch; queries stay in [`QueryState::Created`](crate::QueryState) until
/// routing has settled.
#[derive(Clone, Copy)]
pub struct RouterReady(pub Signal<bool>);

/// Provides the router-ready signal to the current scope.
///
/// Call this alongside [`provide_query_client`](crate::provide_query_client())
/// in the root of your app, with a signal that flips to true once the router
/// has finished resolving the initial navigation.
pub fn provide_router_ready(ready: impl Into<Signal<bool>>) {
    provide_context(RouterReady(ready.into()));
}

/// Retrieves the router-ready signal from the current scope.
///
/// When no signal was provided, queries are treated as always ready.
pub fn use_router_ready() -> Signal<bool> {
    match use_context::<RouterReady>() {
        Some(RouterReady(ready)) => ready,
        None => Signal::derive(|| true),
    }
}

// The effective execution gate for one query: the router must be ready AND
// the caller's `enabled` option (if any) must be true.
pub(crate) fn execution_gate(enabled: Option<Signal<bool>>) -> Signal<bool> {
    let ready = use_router_ready();
    Signal::derive(move || ready.get() && enabled.map(|e| e.get()).unwrap_or(true))
}

#[cfg(all(test, not(any(feature = "csr", feature = "hydrate"))))]
mod tests {
    use super::*;

    #[test]
    fn gate_defaults_open_without_context() {
        let _ = create_runtime();

        let gate = execution_gate(None);
        assert!(gate.get_untracked());
    }

    #[test]
    fn gate_closed_while_router_not_ready() {
        let _ = create_runtime();

        let (ready, set_ready) = create_signal(false);
        provide_router_ready(ready);

        // Even an explicitly enabled query must not run before readiness.
        let gate = execution_gate(Some(Signal::derive(|| true)));
        assert!(!gate.get_untracked());

        set_ready.set(true);
        assert!(gate.get_untracked());
    }

    #[test]
    fn gate_closed_while_disabled() {
        let _ = create_runtime();

        let (ready, _) = create_signal(true);
        provide_router_ready(ready);

        let (enabled, set_enabled) = create_signal(false);
        let gate = execution_gate(Some(enabled.into()));
        assert!(!gate.get_untracked());

        set_enabled.set(true);
        assert!(gate.get_untracked());
    }
}
