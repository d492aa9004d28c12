#![forbid(unsafe_code)]

pub mod stdio;

pub use stdio::run_stdio;
