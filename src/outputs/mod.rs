//! Output generation: partitioned Parquet artifacts.
//!
//! # Submodules
//!
//! - [`partition`]: groups scored records by `(date, url suffix, domain)` and
//!   publishes one artifact per group
//! - [`encode`]: encodes one group into Parquet bytes
//! - [`sink`]: where the bytes go; a local directory in production
//!
//! # Output Structure
//!
//! ```text
//! bucket/
//! └── 2023-08-20/
//!     ├── com/
//!     │   └── example.parquet
//!     └── co.uk/
//!         └── bbc.parquet
//! ```

pub mod encode;
pub mod partition;
pub mod sink;
