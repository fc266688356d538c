//! Core types shared by every part of the update agent.
//!
//! Currently this is the error taxonomy ([`UpdateError`]) and the user-facing
//! error reporting built on top of it ([`ErrorContext`], [`user_friendly_error`]).

pub mod error;

pub use error::{ErrorContext, UpdateError, user_friendly_error};

/// Result alias used throughout the library.
pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
