pub mod cache_sweeper;
pub mod dashboard;
pub mod farmer;
