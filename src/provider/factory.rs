use std::sync::Arc;

use super::aws::AwsCliProvider;
use super::client::SpotProvider;
use super::simulated::SimulatedProvider;
use crate::config::{Config, ProviderKind};

/// Builds the [`SpotProvider`] implementation selected by the config.
pub fn build_provider(config: &Config) -> Arc<dyn SpotProvider> {
    match config.provider {
        ProviderKind::Aws => {
            let provider = match &config.region {
                Some(region) => AwsCliProvider::new().with_region(region.clone()),
                None => AwsCliProvider::new(),
            };
            Arc::new(provider)
        }
        ProviderKind::Simulated => Arc::new(SimulatedProvider::default()),
    }
}
