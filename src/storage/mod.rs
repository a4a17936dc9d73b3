//! Blob storage backends.
//!
//! The [`backend::BlobStore`] trait abstracts over where image bytes
//! physically live.  Implementations include an AWS S3 gateway and an
//! in-memory store for local runs and tests.

pub mod aws;
pub mod backend;
pub mod memory;
