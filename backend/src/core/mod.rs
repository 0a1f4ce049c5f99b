//! Core infrastructure: simulation time

pub mod time;
