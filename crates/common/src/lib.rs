// parlance-common: shared chat model and wire protocol for the Parlance crates

pub mod protocol;
pub mod types;
