//! CAR v1 import and export
//!
//! Repositories travel as CAR files: full exports rooted at the head commit, and
//! per-commit diffs carried by sync events.

pub mod reader;
pub mod writer;

pub use reader::{ParsedCar, parse_car_bytes, read_car};
pub use writer::{export_repo, export_repo_bytes, write_car_bytes};
