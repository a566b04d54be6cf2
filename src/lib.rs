//! Resolves the latest successful CI artifact of catalog apps and caches it behind a stable release.
//!
//! The resolution of one catalog entry walks the GitHub REST API in strictly sequential steps:
//!
//! 1. [`workflow::latest_successful_run`] finds the newest run with a `success` conclusion.
//! 2. [`workflow::artifact::artifacts_for_run`] lists its live artifacts, and
//!    [`workflow::artifact::select_artifact`] picks the one with the requested name.
//! 3. [`transactions::resolve_entry`] looks the cache release up and either returns the existing
//!    asset or downloads the artifact and uploads it under the requested name.
//!
//! Entries are resolved independently through [`transactions::run_batch`].

pub mod catalog;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod framework;
pub mod release;
pub mod repository;
pub mod shutdown;
pub mod transactions;
pub mod workflow;

/// A shorthand to define a statically allocated variable using a [`std::sync::LazyLock`].
///
/// # Examples
///
/// ```rust
/// # use artifact_cache::static_lazy_lock;
/// # use std::sync::LazyLock;
/// static_lazy_lock!{
///     pub VAR_1: String = String::from("a static variable");
/// }
/// // ...equals to...
/// pub static VAR_2: LazyLock<String> = LazyLock::new(|| String::from("a static variable"));
/// ```
#[macro_export]
macro_rules! static_lazy_lock {
    ($(#[$meta:meta])* $vis:vis $name:ident: $type:ty = $expr:expr $(;)?) => {
        $(#[$meta])*
        $vis static $name: $crate::__priv_macro_use::LazyLock<$type> =
            $crate::__priv_macro_use::LazyLock::new(|| $expr);
    };
}

#[doc(hidden)]
pub mod __priv_macro_use {
    pub use std::sync::LazyLock;
}
