//! Background workers.

pub mod session_sweeper;
