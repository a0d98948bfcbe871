//! Object storage backends.
//!
//! The relational datastore is the source of truth for what is live; these
//! backends only hold bytes. [`traits::ObjectStore`] is the seam; the
//! pipeline never talks to a concrete backend directly.

pub mod http;
pub mod memory;
pub mod traits;
