//! Error interface for this crate.
//! 
//! Every error type this crate exposes implements [`Error`],
//! which extends [`std::error::Error`] with an optional help message.

use std::borrow::Cow;

/// Unified error interface for all errors in this crate.
/// 
/// Note that the [`std::fmt::Display`] implementation is used for the brief message,
/// and [`Error::help`] can be used for any extra context.
pub trait Error: std::error::Error {
    /// A clarifying message to help aid someone in how to fix the error.
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}
