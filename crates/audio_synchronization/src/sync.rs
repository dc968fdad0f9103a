//! Indirection over std and loom, so that the primitives in this crate can be model checked with `--cfg loom`.
#[cfg(not(loom))]
mod not_loom {
    pub use std::hint::spin_loop;
    pub use std::sync::atomic::*;
    pub use std::sync::Arc;
    pub use std::thread::{current, park, spawn, Thread};

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        what()
    }
}

#[cfg(not(loom))]
pub(crate) use not_loom::*;

#[cfg(loom)]
mod with_loom {
    pub use loom::hint::spin_loop;
    pub use loom::sync::atomic::*;
    pub use loom::sync::Arc;
    pub use loom::thread::{current, park, spawn, Thread};

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        loom::model(what)
    }
}

#[cfg(loom)]
pub(crate) use with_loom::*;
