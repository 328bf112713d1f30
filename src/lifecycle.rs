//! # Two-Phase Component Lifecycle
//!
//! Long-lived components do not rely on `Drop` for anything that can
//! fail. Instead they expose an explicit `initialize` / `uninitialize`
//! pair so that teardown errors propagate to the caller instead of
//! vanishing inside a destructor.
//!
//! ## Contract
//!
//! - `initialize` is idempotent: a second call returns `Ok` and does
//!   nothing.
//! - `uninitialize` is idempotent the same way, releases everything
//!   `initialize` acquired, and aggregates errors rather than aborting on
//!   the first (see [`crate::error::ErrorBatch`]).
//! - Components uninitialize in strict reverse order of initialization.
//!
//! ## Safety Net
//!
//! [`UninitializeGuard`] is the scope-exit check: if the component is
//! still initialized when the guard drops, the configured
//! [`UninitPolicy`] decides between logging, best-effort uninitialize,
//! and aborting the process. The guard never panics across the drop
//! boundary; everything it has to say goes through `tracing`.

use tracing::error;

/// The two-phase lifecycle every long-lived component implements.
pub trait Initializable {
    /// Acquires resources. Idempotent.
    fn initialize(&mut self) -> eyre::Result<()>;

    /// Releases resources acquired by `initialize`. Idempotent; must make
    /// progress even when parts of the teardown fail.
    fn uninitialize(&mut self) -> eyre::Result<()>;

    fn is_initialized(&self) -> bool;
}

/// What an [`UninitializeGuard`] does when its component reaches scope
/// exit still initialized, or fails to uninitialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninitPolicy {
    /// Quietly invoke `uninitialize` and swallow any error. Not
    /// recommended outside tests.
    Silent,
    /// Log that `uninitialize` was missed, then invoke it and log (but
    /// tolerate) errors.
    WarnIfNotUninitialized,
    /// Like `WarnIfNotUninitialized`; an error from the forced
    /// `uninitialize` is logged loudly.
    WarnIfUninitializeError,
    /// Abort the process if the forced `uninitialize` fails.
    AbortIfUninitializeError,
    /// Abort the process whenever the component is still initialized at
    /// scope exit; missing the explicit call is treated as a fatal bug.
    AbortIfNotUninitialized,
}

/// Scoped guard verifying that `uninitialize()` was called before the
/// component left scope. Wraps a mutable borrow; access the component
/// through [`get`](Self::get) / [`get_mut`](Self::get_mut).
pub struct UninitializeGuard<'a, T: Initializable + ?Sized> {
    target: &'a mut T,
    policy: UninitPolicy,
}

impl<'a, T: Initializable + ?Sized> UninitializeGuard<'a, T> {
    pub fn new(target: &'a mut T, policy: UninitPolicy) -> Self {
        Self { target, policy }
    }

    pub fn get(&self) -> &T {
        self.target
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T: Initializable + ?Sized> Drop for UninitializeGuard<'_, T> {
    fn drop(&mut self) {
        if !self.target.is_initialized() {
            return;
        }
        if self.policy != UninitPolicy::Silent {
            error!(
                "a component left scope without uninitialize(); \
                 uninitialize() must be called before drop"
            );
        }
        if self.policy == UninitPolicy::AbortIfNotUninitialized {
            error!("aborting per AbortIfNotUninitialized policy");
            std::process::abort();
        }
        match self.target.uninitialize() {
            Ok(()) => {}
            Err(report) => match self.policy {
                UninitPolicy::AbortIfUninitializeError => {
                    error!(error = %report, "forced uninitialize failed; aborting");
                    std::process::abort();
                }
                UninitPolicy::WarnIfUninitializeError | UninitPolicy::WarnIfNotUninitialized => {
                    error!(error = %report, "forced uninitialize failed");
                }
                UninitPolicy::Silent => {}
                UninitPolicy::AbortIfNotUninitialized => unreachable!(),
            },
        }
    }
}
