//! Everything that talks to the outlet's web server.
//!
//! Collection follows the same two phases for every outlet:
//!
//! 1. **Indexing**: find sitemap roots ([`robots`]) and expand them into
//!    candidate article URLs ([`sitemap`])
//! 2. **Fetching**: download the surviving articles ([`fetcher`]) and reduce
//!    each page to its text ([`extract`])
//!
//! Between the two phases the date filter decides which candidates are worth
//! downloading.
//!
//! | Module | Input | Output |
//! |--------|-------|--------|
//! | [`robots`] | base URL | sitemap root URLs |
//! | [`sitemap`] | root URL | `CandidateEntry` list |
//! | [`fetcher`] | `DatedEntry` list | `FetchedArticle` / `FailedFetch` |
//! | [`extract`] | `FetchedArticle` | `ExtractedArticle` or nothing |

pub mod extract;
pub mod fetcher;
pub mod robots;
pub mod sitemap;
