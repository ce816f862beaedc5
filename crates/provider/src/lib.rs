//! Image Generation Provider abstraction.
//!
//! The scheduler core never talks to a concrete image-generation HTTP API;
//! it only sees the [`ImageProvider`] trait and the [`ProviderError`]
//! taxonomy. Concrete providers (and their transports) live outside this
//! workspace. [`StubProvider`] is a development/test implementation.

pub mod error;
pub mod provider;
pub mod stub;

pub use error::ProviderError;
pub use provider::ImageProvider;
pub use stub::StubProvider;
