mod collect_observations;

pub use collect_observations::*;
