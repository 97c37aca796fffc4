//! Session output streaming for Forge.
//!
//! A session's output travels as [`stream::SequencedEvent`]s over a lossy,
//! unordered [`stream::BroadcastChannel`]. [`stream::SessionView`] rebuilds an
//! ordered, gap-annotated log from it, or falls back to the durable
//! [`record::ExecutionRecord`] when no subscription can be made.
//! [`session::SessionController`] starts and stops sessions.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the caller.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod errors;
pub mod exec;
pub mod record;
pub mod services;
pub mod session;
pub mod stream;

pub use config::ForgeConfig;
pub use errors::ConfigError;
pub use errors::LifecycleError;
pub use errors::RecordError;
pub use errors::RunnerError;
pub use errors::SubscribeError;
pub use exec::LocalProcessRunner;
pub use exec::RunnerSettings;
pub use services::ForgeServices;
