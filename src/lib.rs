#![allow(non_camel_case_types)]

pub mod aggregation;
pub mod cache;
pub mod cache_keys;
pub mod cli;
pub mod configuration;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod helpers;
pub mod model;
pub mod provider;
pub mod ranges;
