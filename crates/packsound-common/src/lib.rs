//! Packsound-Common: identity, format and error types shared by the workspace.
//!
//! - **Identity**: [`resolve_reference`] maps user input to a [`CanonicalId`]
//!   and the locator the extraction backend needs.
//! - **Formats**: [`TargetFormat`] and [`AudioSpec`] describe transcoder output;
//!   [`ExtractedStream`] is what extraction hands to transcoding.
//! - **Errors**: [`MediaError`] is the resolution taxonomy, [`Error`] the
//!   crate-level error.
//!
//! # Examples
//!
//! ```
//! use packsound_common::{resolve_reference, MediaError};
//!
//! let source = resolve_reference("https://youtu.be/dQw4w9WgXcQ").unwrap();
//! assert_eq!(source.id.as_str(), "dQw4w9WgXcQ");
//!
//! assert_eq!(resolve_reference(""), Err(MediaError::InvalidReference));
//! ```

pub mod error;
pub mod ids;
pub mod types;

pub use error::{Error, MediaError, Result};
pub use ids::*;
pub use types::*;
