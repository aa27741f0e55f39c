use std::sync::Arc;

use crate::adapters::{CoinSwitchClient, DeltaClient};
use crate::config::AppConfig;
use crate::error::{BotError, Result};

use super::{RetryingVenue, VenueAdapter, VenueKind};

/// Builds a venue adapter on demand; used for runtime venue switches.
pub type VenueBuilder = Arc<dyn Fn(VenueKind) -> Result<Arc<dyn VenueAdapter>> + Send + Sync>;

/// Create the runtime venue adapter from `AppConfig`.
pub fn build_venue(app_config: &AppConfig) -> Result<Arc<dyn VenueAdapter>> {
    build_venue_for(app_config.venue.kind, app_config)
}

/// Create a retry-wrapped adapter for an explicit venue kind.
pub fn build_venue_for(kind: VenueKind, app_config: &AppConfig) -> Result<Arc<dyn VenueAdapter>> {
    let credentials = app_config.venue.credentials(kind);
    if !credentials.is_complete() {
        return Err(BotError::Validation(format!(
            "venue '{}' has no api_key/api_secret configured",
            kind
        )));
    }

    let raw: Arc<dyn VenueAdapter> = match kind {
        VenueKind::DeltaDemo => Arc::new(DeltaClient::new(
            credentials.base_url.as_deref(),
            &credentials.api_key,
            &credentials.api_secret,
        )?),
        VenueKind::CoinSwitchLive => Arc::new(CoinSwitchClient::new(
            credentials.base_url.as_deref(),
            &credentials.api_key,
            &credentials.api_secret,
        )?),
    };

    Ok(Arc::new(RetryingVenue::new(raw, app_config.retry.policy())))
}

/// Factory closure over a config snapshot.
pub fn venue_builder(app_config: &AppConfig) -> VenueBuilder {
    let config = app_config.clone();
    Arc::new(move |kind| build_venue_for(kind, &config))
}
