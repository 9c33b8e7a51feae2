pub mod checkpoint;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod feature;
pub mod git;
pub mod io;
pub mod observe;
pub mod paths;
pub mod run;
pub mod worker;
pub mod workflow;

pub use error::{Result, ShepError};
