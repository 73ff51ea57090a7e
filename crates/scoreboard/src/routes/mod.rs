pub mod error;
pub mod health;
pub mod scores;
pub mod stations;

pub use error::*;
pub use health::*;
pub use scores::*;
pub use stations::*;
