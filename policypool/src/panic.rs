//! Panic containment helpers.
//!
//! Task bodies, callbacks and telemetry sinks all run inside
//! `catch_unwind` so a panic can never leave permits or counters behind.
//! [`install_hook`] additionally routes uncaught panics through `tracing`
//! before chaining to the previous hook.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};

use thiserror::Error;
use tracing::{error, warn};

/// A panic captured from a task body.
#[derive(Debug, Clone, Error)]
#[error("task panicked: {message}")]
pub struct PanicError {
    pub message: String,
}

/// Renders a panic payload as text.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs a hook, logging and swallowing any panic it raises.
pub(crate) fn contain(hook: &'static str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        warn!(
            hook = hook,
            panic = %panic_message(payload.as_ref()),
            "Hook panicked; continuing"
        );
    }
}

/// Installs a panic hook that logs the panic location before delegating to
/// the previously installed hook.
pub fn install_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let thread = std::thread::current();
        error!(
            thread = thread.name().unwrap_or("unnamed"),
            location = %location,
            panic = %panic_message(info.payload()),
            "Uncaught panic"
        );
        original_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let static_payload: Box<dyn Any + Send> = Box::new("boom");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other_payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(static_payload.as_ref()), "boom");
        assert_eq!(panic_message(owned_payload.as_ref()), "bang");
        assert_eq!(panic_message(other_payload.as_ref()), "non-string panic payload");
    }

    #[test]
    fn test_contain_swallows_panic() {
        let mut reached = false;
        contain("test", || panic!("inside hook"));
        contain("test", || reached = true);
        assert!(reached);
    }
}
