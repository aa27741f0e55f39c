pub mod market;
pub mod order;
pub mod signal;
pub mod state;
pub mod trade;

pub use market::*;
pub use order::*;
pub use signal::*;
pub use state::*;
pub use trade::*;
