//! Cookie bookkeeping for sessions.
//!
//! - [`CookieStore`] mirrors every `Set-Cookie` the session receives, keyed by
//!   `(secure, domain, path, name)`, independently of outgoing cookie handling.
//! - [`netscape`] reads and writes Netscape cookie files for file-backed
//!   cookie handling.

pub mod netscape;
mod store;

pub use netscape::{
    CookieFileError, CookieLine, ParseResult, add_cookies_to_jar, parse_netscape_cookies,
    write_netscape_cookies,
};
pub use store::{Cookie, CookieStore, SESSION_COOKIE_LIFETIME_SECS};

pub(crate) use store::unix_now;
