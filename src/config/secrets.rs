//! Secret handling utilities.
//!
//! Re-exports secrecy types used throughout the echolog configuration.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
