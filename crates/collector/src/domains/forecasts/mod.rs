mod collect_forecasts;

pub use collect_forecasts::*;
