//! Peersync Drive - Google Drive adapter
//!
//! Implements the [`peersync_core::ports::object_store::IObjectStore`] port
//! against the Google Drive REST API:
//! - [`client`] - authenticated HTTP client with 429/5xx retry
//! - [`files`] - file and folder operations (REST v3)
//! - [`batch`] - bulk deletion via the REST v2 batch endpoint
//! - [`layout`] - materialization of the fixed replication folder layout

pub mod batch;
pub mod client;
pub mod files;
pub mod layout;
mod provider;

pub use client::DriveClient;
pub use layout::init_drive_structure;
