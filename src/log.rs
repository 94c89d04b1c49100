use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Environment variable set by the Jupyter launcher for spawned kernels.
pub const JUPYTER_PARENT_ENV: &str = "JPY_PARENT_PID";

#[inline(always)]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::SeqCst)
}

pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst)
}

pub fn enable() {
    ENABLED.store(true, Ordering::SeqCst)
}

/// Silence diagnostics when the kernel was spawned by a Jupyter server.
///
/// A server restarted with running kernels keeps them alive without std streams,
/// writing to those streams kills the kernel with SIGPIPE.
pub fn silence_under_jupyter() -> bool {
    if std::env::var_os(JUPYTER_PARENT_ENV).is_some() {
        disable();
        return true;
    }
    false
}

#[macro_export]
macro_rules! _log {
    ($log_fn: path, target: $target:expr, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            $log_fn!(target: $target, $($arg)+)
        }
    };
    ($log_fn: path, $($arg:tt)+) => {
        if $crate::log::is_enabled() {
            $log_fn!($($arg)+)
        }
    };
}

#[macro_export]
macro_rules! xr_info {
    ($($arg:tt)+) => {
        $crate::_log!(log::info, $($arg)+)
    };
}

#[macro_export]
macro_rules! xr_warn {
    ($($arg:tt)+) => {
        $crate::_log!(log::warn, $($arg)+)
    };
}

#[macro_export]
macro_rules! xr_error {
    ($($arg:tt)+) => {
        $crate::_log!(log::error, $($arg)+)
    };
}

#[macro_export]
macro_rules! xr_debug {
    ($($arg:tt)+) => {
        $crate::_log!(log::debug, $($arg)+)
    };
}
