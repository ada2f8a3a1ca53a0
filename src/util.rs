use std::{cell::Cell, rc::Rc, time::Duration};

use leptos::{leptos_dom::helpers::TimeoutHandle, *};

use crate::Instant;

// Re-arms a timeout whenever the producing function runs, clearing the
// previous handle on re-run and on scope cleanup.
pub(crate) fn use_timeout(func: impl Fn() -> Option<TimeoutHandle> + 'static) {
    let stored: Rc<Cell<Option<TimeoutHandle>>> = Rc::new(Cell::new(None));

    on_cleanup({
        let stored = stored.clone();
        move || {
            if let Some(handle) = stored.take() {
                handle.clear();
            }
        }
    });

    create_effect(move |prev: Option<Option<TimeoutHandle>>| {
        if let Some(handle) = prev.flatten() {
            handle.clear();
        }
        let handle = func();
        stored.set(handle);
        handle
    });
}

pub(crate) fn time_until_stale(updated_at: Instant, stale_time: Duration) -> Duration {
    let updated_at = updated_at.0.as_millis() as i64;
    let now = Instant::now().0.as_millis() as i64;
    let stale_time = stale_time.as_millis() as i64;
    let result = (updated_at + stale_time) - now;
    Duration::from_millis(result.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_in_the_future() {
        let now = Instant::now();
        let remaining = time_until_stale(now, Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(50));
    }

    #[test]
    fn already_stale_clamps_to_zero() {
        let past = Instant(Instant::now().0 - Duration::from_secs(120));
        let remaining = time_until_stale(past, Duration::from_secs(60));
        assert!(remaining.is_zero());
    }
}
