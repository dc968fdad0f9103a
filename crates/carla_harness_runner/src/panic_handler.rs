//! Remembers the most recent panic so the runner can report it after `catch_unwind`.
use std::panic as stdp;
use std::sync::Mutex;

use crate::protocol::PanicOutcome;

lazy_static::lazy_static! {
    static ref LAST_PANIC: Mutex<Option<PanicOutcome>> = Mutex::new(None);
}

/// Install a panic hook which records the panic, then defers to the previous hook so it is still printed.
pub fn install_panic_handler() {
    let old_handler = stdp::take_hook();

    stdp::set_hook(Box::new(move |p_info| {
        let outcome = PanicOutcome {
            panic_info: p_info.to_string(),
            location: p_info.location().map(|x| x.to_string()),
            backtrace: std::backtrace::Backtrace::force_capture().to_string(),
        };
        log::error!("Panic: {}", outcome.panic_info);

        // A poisoned lock means a panic while recording a panic.  Keep the first one.
        if let Ok(mut last) = LAST_PANIC.lock() {
            *last = Some(outcome);
        }
        old_handler(p_info);
    }));
}

/// Take the panic recorded since the last call, if any.
pub fn take_last_panic() -> Option<PanicOutcome> {
    LAST_PANIC.lock().ok()?.take()
}
