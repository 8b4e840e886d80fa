//! Ember Cloud
//!
//! Concrete collaborators behind the `ember-abstraction` traits:
//! - [`AzureBlobStore`]: Azure Blob Storage over its REST API
//! - [`FsObjectStore`]: a directory tree standing in for blob containers
//! - [`KeyVaultSecretProvider`] / [`EnvSecretProvider`]: secret resolution
//! - [`InstanceMetadataClient`]: VM size lookup with a sentinel fallback

pub mod blob;
pub mod connection;
pub mod fs;
pub mod metadata;
pub mod secrets;
pub mod signing;

pub use blob::{AzureBlobStore, BlobAuth};
pub use connection::ConnectionString;
pub use fs::FsObjectStore;
pub use metadata::InstanceMetadataClient;
pub use secrets::{EnvSecretProvider, KeyVaultSecretProvider};
