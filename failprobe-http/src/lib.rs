//! Load invokers for failprobe
//!
//! Two implementations of [`failprobe_core::LoadInvoker`]:
//! - [`HttpLoadInvoker`] issues the burst in-process with reqwest
//! - [`HeyInvoker`] runs one `hey` process per burst

pub mod config;
pub mod errors;
pub mod invoker;
pub mod process;

pub use config::LoadClientConfig;
pub use errors::HttpError;
pub use invoker::HttpLoadInvoker;
pub use process::{hey_args, parse_hey_summary, HeyInvoker, HeySummary};
