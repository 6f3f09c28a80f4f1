//! Common test infrastructure
//!
//! Integration tests build a [`TestCatalog`] (temporary db dir, media root
//! and a file-backed store) and drive it through [`FakeMediaTool`], which
//! answers probe and frame requests from the contents of the media files
//! instead of running ffprobe/ffmpeg.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestCatalog, CLIP_720P};
//!
//! #[tokio::test]
//! async fn test_scan() {
//!     let catalog = TestCatalog::new();
//!     catalog.write_media("intro.mp4", CLIP_720P);
//!     let report = catalog.scanner().scan(catalog.media_root(), None).await.unwrap();
//!     assert_eq!(report.assets.len(), 1);
//! }
//! ```

mod constants;
mod fake_tool;
mod fixtures;

pub use constants::*;
pub use fake_tool::FakeMediaTool;
pub use fixtures::TestCatalog;
