pub mod controller;
pub mod slot;
pub(crate) mod status;
pub(crate) mod worker;
