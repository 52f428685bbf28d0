pub mod buffer_filler;
pub mod capture_engine;
pub(crate) mod counters;
