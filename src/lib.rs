#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

pub mod batch;
pub mod config;
pub mod error;
pub mod fetch;
pub mod hls;
pub mod job;
pub mod storage;
pub mod util;
