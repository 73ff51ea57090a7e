mod domains;
mod fetcher;
mod providers;
mod retry;
mod utils;

pub use domains::*;
pub use fetcher::*;
pub use providers::*;
pub use retry::*;
pub use utils::*;
