//! Model resolution for planact.
//!
//! Backends implement `planact_core::Provider` elsewhere and are registered
//! here under a provider name. The resolver turns a model identifier or
//! alias into the canonical id plus the provider that serves it.

pub mod resolver;

pub use resolver::{ModelResolver, ResolvedModel};
