//! Data model for the comparison pipeline: values, runs, and errors.

pub mod error;
pub mod run;
pub mod value;

pub use error::{ForklineError, Result};
pub use run::{Event, Run, RunStatus, Step, ERROR_EVENT, INPUT_EVENT, OUTPUT_EVENT};
pub use value::Value;
