#![forbid(unsafe_code)]

pub mod ids;
pub mod model;
pub mod time;

pub use ids::gen_id;
pub use time::{ms_to_rfc3339, now_ms, now_rfc3339};
