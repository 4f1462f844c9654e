//! Vote synchronization
//!
//! - `reconciler` - applies vote blocks to the store and repairs tallies
//! - `scheduler` - peer crawling and the timers that drive both tasks

pub mod reconciler;
pub mod scheduler;

pub use reconciler::{BlockObserver, BlockOutcome, ReconcileReport, VoteOutcome, VoteReconciler};
pub use scheduler::{CrawlReport, Crawler, Schedule};
