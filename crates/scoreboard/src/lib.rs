pub mod db;
pub mod lead_time;
pub mod normalize;
pub mod routes;
pub mod scoring;
mod startup;
pub mod timestamps;
mod utils;

pub use db::*;
pub use lead_time::{lead_hours, local_day_bounds, parse_timezone, LeadTimeAnchors, LeadTimeError};
pub use normalize::{normalize_payload, ForecastPayload, SchemaError};
pub use routes::*;
pub use scoring::{default_score_date, score_and_refresh, ScoringReport};
pub use startup::*;
pub use utils::*;
