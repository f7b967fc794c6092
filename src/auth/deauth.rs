use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use http::StatusCode;
use tracing::{error, info};

/// Why the session was voided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeauthEvent {
    pub path: String,
    pub status: StatusCode,
    pub message: String,
}

pub type DeauthCallback = Arc<dyn Fn(&DeauthEvent) + Send + Sync>;

/// One registrable "authentication irrecoverably failed" handler.
///
/// Registering replaces the previous handler. The handler runs on the
/// network layer's task; a panic inside it is logged and swallowed.
#[derive(Clone, Default)]
pub struct DeauthHook {
    callback: Arc<RwLock<Option<DeauthCallback>>>,
    // last session the hook fired for
    fired_for: Arc<Mutex<Option<u64>>>,
}

impl DeauthHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, callback: F)
    where
        F: Fn(&DeauthEvent) + Send + Sync + 'static,
    {
        let mut slot = self.callback.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            info!("replacing deauthentication handler");
        }
        *slot = Some(Arc::new(callback));
    }

    pub fn unregister(&self) {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_registered(&self) -> bool {
        self.callback.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Fire for `session` unless that session already fired. Returns whether
    /// this call was the first for the session.
    pub fn invoke_once(&self, session: u64, event: &DeauthEvent) -> bool {
        {
            let mut fired_for = self.fired_for.lock().unwrap_or_else(PoisonError::into_inner);
            if *fired_for == Some(session) {
                return false;
            }
            *fired_for = Some(session);
        }
        self.invoke(event);
        true
    }

    /// Returns whether a handler ran to completion.
    pub fn invoke(&self, event: &DeauthEvent) -> bool {
        // clone out so the handler may re-register without deadlocking
        let callback = self.callback.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(callback) = callback else {
            return false;
        };

        match catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(()) => true,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                error!(path = %event.path, reason = %reason, "deauthentication handler panicked");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> DeauthEvent {
        DeauthEvent {
            path: "/dashboard".into(),
            status: StatusCode::UNAUTHORIZED,
            message: "Token expired".into(),
        }
    }

    #[test]
    fn invoke_without_handler_is_a_noop() {
        assert!(!DeauthHook::new().invoke(&event()));
    }

    #[test]
    fn last_registration_wins() {
        let hook = DeauthHook::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        hook.register(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        hook.register(move |e| {
            assert_eq!(e.path, "/dashboard");
            s.fetch_add(1, Ordering::SeqCst);
        });

        assert!(hook.invoke(&event()));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_is_swallowed() {
        let hook = DeauthHook::new();
        hook.register(|_| panic!("navigation stack gone"));
        assert!(!hook.invoke(&event()));
        // still usable afterwards
        assert!(hook.is_registered());
    }

    #[test]
    fn unregister_clears_handler() {
        let hook = DeauthHook::new();
        hook.register(|_| {});
        hook.unregister();
        assert!(!hook.is_registered());
        assert!(!hook.invoke(&event()));
    }

    #[test]
    fn fires_once_per_session() {
        let hook = DeauthHook::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        hook.register(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert!(hook.invoke_once(3, &event()));
        assert!(!hook.invoke_once(3, &event()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(hook.invoke_once(4, &event()));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
