//! SDK toolchain acquisition: download and expansion of SDK archives, the
//! persisted SDK location, and the resolver that ties them together.

pub mod artifacts;
pub mod catalog;
pub mod error;
pub mod resolver;
pub mod state;

pub use artifacts::{extract_zip, parse_download_url, Fetcher, HttpFetcher};
pub use catalog::{Component, ComponentKind, SdkLayout, SYSTEM_IMAGE_PACKAGE};
pub use error::ToolchainError;
pub use resolver::ToolchainResolver;
pub use state::{SdkLocationRecord, SDK_LOCATION_FILE};
