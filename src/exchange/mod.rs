pub mod factory;
pub mod retry;
mod traits;

pub use factory::{build_venue, build_venue_for, venue_builder, VenueBuilder};
pub use retry::{with_retry, RetryPolicy, RetryingVenue};
pub use traits::{parse_venue_kind, VenueAdapter, VenueKind};
