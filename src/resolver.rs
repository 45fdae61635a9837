//! Best-effort address resolution with a cache built from the position log.

use std::{collections::HashMap, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    dto::{Address, CoordKey, Fix},
    geocoder::Geocoder,
};

/// Addresses already known for exact coordinates, seeded from the stored fixes.
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: HashMap<CoordKey, Address>,
}

impl AddressCache {
    /// Every stored triple is reused, empty ones included: a coordinate that once failed to
    /// resolve is not sent to the geocoder again.
    pub fn from_fixes(fixes: &[Fix]) -> Self {
        let mut cache = AddressCache::default();
        // Most-recent-first input: the first address seen for a coordinate wins.
        for fix in fixes {
            cache
                .entries
                .entry(fix.coord_key())
                .or_insert_with(|| fix.address.clone());
        }
        cache
    }

    pub fn get(&self, latitude: f64, longitude: f64) -> Option<&Address> {
        self.entries.get(&CoordKey::new(latitude, longitude))
    }

    pub fn insert(&mut self, latitude: f64, longitude: f64, address: Address) {
        self.entries.insert(CoordKey::new(latitude, longitude), address);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct AddressResolver<G> {
    geocoder: G,
    cooldown: Duration,
}

impl<G: Geocoder> AddressResolver<G> {
    pub fn new(geocoder: G, cooldown: Duration) -> Self {
        AddressResolver { geocoder, cooldown }
    }

    /// Cache first, geocoder on a miss. Never fails: errors degrade to an empty address.
    pub async fn resolve(
        &self,
        cache: &mut AddressCache,
        latitude: f64,
        longitude: f64,
    ) -> Address {
        if let Some(address) = cache.get(latitude, longitude) {
            if address.is_empty() {
                debug!("Known position {}, {} has no address", latitude, longitude);
            } else {
                info!("Known position {}, {}, reusing address", latitude, longitude);
            }
            return address.clone();
        }

        info!("Requesting geocoding for {}, {}", latitude, longitude);
        let address = match self.geocoder.reverse_geocode(latitude, longitude).await {
            Ok(Some(address)) => {
                info!(
                    street = %address.street,
                    locality = %address.locality,
                    region = %address.region,
                    "Address found"
                );
                address
            }
            Ok(None) => {
                warn!("No address found for {}, {}", latitude, longitude);
                Address::default()
            }
            Err(err) => {
                warn!(error = %err, latitude, longitude, "Geocoding failed");
                Address::default()
            }
        };

        // Rate policy of the geocoding service.
        if !self.cooldown.is_zero() {
            tokio::time::sleep(self.cooldown).await;
        }

        cache.insert(latitude, longitude, address.clone());
        address
    }

    #[cfg(test)]
    pub(crate) fn geocoder(&self) -> &G {
        &self.geocoder
    }
}
