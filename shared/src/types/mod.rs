//! Data types exchanged between the sampling host, the engine and exporters

pub mod sample;
pub mod snapshot;
