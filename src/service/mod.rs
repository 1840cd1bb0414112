//! Service Module
//!
//! Everything between a parsed request and the bytes queued for the
//! client: routing, static content lookup and form decoding.
//!
//! - `handler`: [`RequestHandler`], the routing layer called by connections
//! - `content`: the [`ContentProvider`] trait and its file/in-memory sources
//! - `form`: `application/x-www-form-urlencoded` decoding

pub mod content;
pub mod form;
pub mod handler;

pub use content::{Content, ContentProvider, FileContentProvider, MemoryContentProvider};
pub use form::{parse_form_data, url_decode};
pub use handler::RequestHandler;
