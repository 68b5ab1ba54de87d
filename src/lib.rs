// Allow dead code for public API functions that may not be used internally
// but are part of the library's exposed interface
#![allow(dead_code)]

pub mod browser;
pub mod cache;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod extraction;
pub mod logger;
pub mod matcher;
pub mod merge;
pub mod resolution;
pub mod roster;
pub mod search_terms;
pub mod similarity;
pub mod worker;

pub use extraction::{ExtractionOutcome, ExtractionStatus, FinancialRecord};
pub use resolution::{MatchType, ResolutionResult};
pub use roster::CompanyInput;
