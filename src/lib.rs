//! lazyfetch core library
//!
//! A convenience layer over an HTTP engine: one [`Session`] sends requests,
//! captures every response header of a redirect chain hop by hop, mirrors
//! received cookies, flattens nested form data, and resolves file references
//! for multipart uploads.
//!
//! # Architecture
//!
//! - [`capture`] - Redirect-aware header capture into per-hop variables
//! - [`cookies`] - Attribute-aware cookie store and Netscape cookie files
//! - [`form`] - Nested form flattening, encoding, and upload resolution
//! - [`transport`] - Transport seam and the reqwest-backed engine
//! - [`session`] - Request execution, accessors, and logs
//! - [`transfer`] - Download and upload helpers
//! - [`config`] - Typed session configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod capture;
pub mod config;
pub mod cookies;
pub mod env;
pub mod form;
mod paths;
pub mod redact;
pub mod session;
pub mod transfer;
pub mod transport;
mod user_agent;

// Re-export commonly used types
pub use capture::{HeaderCapture, HeaderVar, Hop, extract_ipv4};
pub use config::{ConfigWarning, SessionConfig, Setting, SettingKey};
pub use cookies::{Cookie, CookieStore};
pub use form::{FieldValue, Fields, FlatField, FormError};
pub use redact::mask_credentials;
pub use reqwest::Method;
pub use session::{ExecLog, Session};
pub use transfer::TransferError;
pub use transport::{Transport, TransportError};
