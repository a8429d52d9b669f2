//! Profile API client
//!
//! Typed access to the signed-in user's profile endpoints on top of the
//! pipeline-driven [`crate::http::HttpClient`].

pub mod errors;
pub mod profile;

pub use errors::{ApiError, ApiErrorCategory};
pub use profile::{ProfilePhoto, ProfileService, UserProfile, PHOTO_ROUTE, PROFILE_ROUTE};
