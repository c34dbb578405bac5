// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! Failure reporting for the root of trust.
//!
//! Every rejected payload, manifest or capsule is reported in two places:
//! as an [`Error`] returned to the caller, and as a log line emitted where
//! the check failed. The log half goes through the macros in this module,
//! which expand to nothing unless the `log` feature is on; a production
//! image then carries neither the calls nor their format strings.
//!
//! Nothing else in `pfr` names the [`log`] crate.

use core::fmt;

#[cfg(doc)]
use __raw_log as log;

/// A `pfr` failure, always spelled `pfr::Error<E>`.
///
/// `E` is the module-level reason (a [`keychain::Error`], a
/// [`recovery::Error`], and so on). Values are only minted by [`check!`]
/// and [`fail!`], so every one of them has already been logged.
///
/// Reasons stay coarse on purpose for authentication: callers learn that a
/// payload was rejected and roughly which stage rejected it, nothing about
/// which signature byte was off.
///
/// [`keychain::Error`]: crate::keychain::Error
/// [`recovery::Error`]: crate::recovery::Error
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Error<E> {
    reason: E,
}

impl<E> Error<E> {
    #[doc(hidden)]
    pub fn __new(reason: E) -> Self {
        Self { reason }
    }

    /// Re-expresses this failure in terms of an outer module's reason type.
    pub fn cast<F: From<E>>(self) -> Error<F> {
        Error {
            reason: self.reason.into(),
        }
    }

    /// Returns the reason for this failure.
    pub fn into_inner(self) -> E {
        self.reason
    }
}

impl<E> AsRef<E> for Error<E> {
    fn as_ref(&self) -> &E {
        &self.reason
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pfr: {}", self.reason)
    }
}

/// Lets a `pfr::Error<$f>` bubble up through `?` as a `pfr::Error<$e>`.
///
/// A blanket `impl<E1, E2: From<E1>> From<Error<E1>> for Error<E2>` would
/// overlap with `impl<T> From<T> for T`, so each conversion is spelled out:
/// ```compile_fail
/// # use pfr::Error;
/// impl<E1, E2> From<Error<E1>> for Error<E2> where E2: From<E1> {
///     fn from(e: Error<E1>) -> Error<E2> {
///         e.cast()
///     }
/// }
/// ```
///
/// `@plain` covers the bare errors of integrator traits such as
/// [`Flash`](crate::hardware::flash::Flash) and
/// [`Nvm`](crate::hardware::nvm::Nvm). Those never went through [`fail!`],
/// so they are logged here as they are wrapped.
macro_rules! debug_from {
    (@plain $e:ty => $($f:ty),+ $(,)?) => {$(
        impl From<$f> for $crate::Error<$e> {
            fn from(e: $f) -> Self {
                error!("platform error: {:?}", e);
                $crate::debug::Error::__new(e.into())
            }
        }
    )*};
    ($e:ty => $($f:ty),+ $(,)?) => {$(
        impl From<$crate::Error<$f>> for $crate::Error<$e> {
            fn from(e: $crate::Error<$f>) -> Self {
                e.cast()
            }
        }
    )*};
}

/// Bails out of the enclosing function with `$error` unless `$cond` holds.
///
/// The log line names the failed condition, so a rejected Block1 reads as
/// `check failed: header.magic == Magic::Block1 as u32 (BadMagic)`.
macro_rules! check {
    ($cond:expr, $error:expr) => {
        if !$cond {
            let error = $error;
            fail!(
                error,
                "check failed: {} ({:?})",
                stringify!($cond),
                error,
            )?;
        }
    };
}

/// Logs `$error` and evaluates to `Err(pfr::Error($error))`.
///
/// Written `return fail!(Error::BadLength)` where one would otherwise write
/// `return Err(..)`. A format string may follow the error to replace the
/// default log line.
macro_rules! fail {
    ($error:expr, $($format:tt)+) => {{
        error!($($format)+);
        Err($crate::debug::Error::__new($error))
    }};
    ($error:expr) => {{
        let error = $error;
        error!("failed: {:?}", error);
        Err($crate::debug::Error::__new(error))
    }};
}

/// [`log::trace!()`], compiled out without the `log` feature.
macro_rules! trace {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        let _ = __raw_log::trace!($($args)*);
    }
}

/// [`log::info!()`], compiled out without the `log` feature.
macro_rules! info {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        let _ = __raw_log::info!($($args)*);
    }
}

/// [`log::warn!()`], compiled out without the `log` feature.
macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        let _ = __raw_log::warn!($($args)*);
    }
}

/// [`log::error!()`], compiled out without the `log` feature.
macro_rules! error {
    ($($args:tt)*) => {
        #[cfg(feature = "log")]
        let _ = __raw_log::error!($($args)*);
    }
}

/// Installs a stderr logger for unit tests before the harness starts.
///
/// Lines go through `eprintln!` so that the harness captures them and only
/// shows the log of a failing test.
#[cfg(test)]
#[ctor::ctor]
fn init_test_logger() {
    env_logger::builder()
        .format(|_, record| {
            let module = record.module_path().unwrap_or("pfr");
            for line in record.args().to_string().trim().lines() {
                eprintln!(
                    "{:<5} {}:{} {}",
                    record.level(),
                    module,
                    record.line().unwrap_or(0),
                    line,
                );
            }
            Ok(())
        })
        .init();
}
