use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// One hotel's engine plus its notification hub. The hub is handed to the
/// engine as its change sink and to connections for watch subscriptions.
#[derive(Clone)]
pub struct HotelHandle {
    pub engine: Arc<Engine>,
    pub hub: Arc<NotifyHub>,
}

/// Manages per-hotel engines. Each hotel gets its own Engine + WAL +
/// reaper/compactor pair. Hotel = the property name from the connection
/// handshake.
pub struct HotelManager {
    hotels: DashMap<String, HotelHandle>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl HotelManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            hotels: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create the engine for the given hotel.
    pub fn get_or_create(&self, hotel: &str) -> std::io::Result<HotelHandle> {
        if let Some(handle) = self.hotels.get(hotel) {
            return Ok(handle.value().clone());
        }
        if hotel.len() > MAX_HOTEL_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "hotel name too long",
            ));
        }
        if self.hotels.len() >= MAX_HOTELS {
            return Err(std::io::Error::other("too many hotels"));
        }

        // Sanitize hotel name to prevent path traversal
        let safe_name: String = hotel
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty hotel name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let hub = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(hotel, wal_path, hub.clone())?);

        // Spawn reaper + compactor for this hotel
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        let handle = HotelHandle { engine, hub };
        self.hotels.insert(hotel.to_string(), handle.clone());
        metrics::gauge!(crate::observability::HOTELS_ACTIVE).set(self.hotels.len() as f64);
        Ok(handle)
    }
}
