//! Output generation for the digest.
//!
//! # Submodules
//!
//! - [`json`]: Writes the [`Report`](crate::models::Report) to a dated JSON file
//! - [`markdown`]: Renders the report as a Markdown table for the terminal
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! ├── 2024-05-01.json
//! └── 2024-05-02.json
//! ```

pub mod json;
pub mod markdown;
