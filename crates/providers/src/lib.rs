//! `providers` crate — the `CapabilityProvider` trait and the providers that
//! ship with the orchestrator.
//!
//! A capability provider is an opaque unit of work: given a step's merged
//! inputs it asynchronously produces an output, reporting what the call cost
//! and how long it took. The engine crate dispatches every step through this
//! trait object and never looks inside.

pub mod echo;
pub mod error;
pub mod mock;
pub mod traits;

pub use echo::EchoProvider;
pub use error::ProviderError;
pub use traits::{CapabilityProvider, ProviderOutput};
