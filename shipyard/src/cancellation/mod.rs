//! Structured cancellation for pipeline runs.
//!
//! A run is cancelled either by the user (Ctrl-C in the CLI) or by the
//! executor's run timeout. Both go through the same [`CancellationToken`].

mod token;

pub use token::CancellationToken;
