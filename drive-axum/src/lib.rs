//! drive-axum: Axum adapter for the drive transfer engine.
//!
//! Exposes the chunked upload, listing and range download endpoints over
//! HTTP, with Feathers-style JSON errors.

pub mod app;
pub mod headers;
pub mod routes;
pub mod state;
pub mod token;
mod error;
pub use error::{DriveAxumError, ErrorKind};
pub use state::TransferState;
pub use token::{DownloadClaims, DownloadTokens, IssuedToken};

pub use app::{drive, DriveApp};
