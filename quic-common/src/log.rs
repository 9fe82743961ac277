// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Thin wrapper around the `log` crate.  Call sites use the `q*!` macros
//! below rather than `log::debug!` etc. directly so that a context value
//! (anything `Display`) can be threaded into the message uniformly.

use std::sync::Once;

static INIT: Once = Once::new();

/// Install an `env_logger` subscriber.  Safe to call more than once; only
/// the first call takes effect.  `default_level` sets the floor when
/// `RUST_LOG` is unset.
pub fn init(default_level: Option<log::LevelFilter>) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_env(
            env_logger::Env::default()
                .default_filter_or(default_level.unwrap_or(log::LevelFilter::Info).as_str()),
        );
        builder.format_timestamp_micros();
        let _ = builder.try_init();
    });
}

#[macro_export]
macro_rules! qtrace {
    ([$ctx:expr], $($arg:tt)*) => { ::log::trace!("{} {}", $ctx, format_args!($($arg)*)) };
    ($($arg:tt)*) => { ::log::trace!($($arg)*) };
}

#[macro_export]
macro_rules! qdebug {
    ([$ctx:expr], $($arg:tt)*) => { ::log::debug!("{} {}", $ctx, format_args!($($arg)*)) };
    ($($arg:tt)*) => { ::log::debug!($($arg)*) };
}

#[macro_export]
macro_rules! qinfo {
    ([$ctx:expr], $($arg:tt)*) => { ::log::info!("{} {}", $ctx, format_args!($($arg)*)) };
    ($($arg:tt)*) => { ::log::info!($($arg)*) };
}

#[macro_export]
macro_rules! qwarn {
    ([$ctx:expr], $($arg:tt)*) => { ::log::warn!("{} {}", $ctx, format_args!($($arg)*)) };
    ($($arg:tt)*) => { ::log::warn!($($arg)*) };
}

#[macro_export]
macro_rules! qerror {
    ([$ctx:expr], $($arg:tt)*) => { ::log::error!("{} {}", $ctx, format_args!($($arg)*)) };
    ($($arg:tt)*) => { ::log::error!($($arg)*) };
}
