//! In-memory pilot registry.
//!
//! Backs tests and single-process deployments. A mutex serializes writers,
//! which is exactly the consistency the registry contract asks for.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use pilotgrid_core::{PilotOutput, PilotRef, PilotStatus};

use crate::error::{RegistryError, RegistryResult};
use crate::types::{PilotFilter, PilotRecord};
use crate::PilotRegistry;

/// Mutex-backed registry over a plain map.
#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<HashMap<PilotRef, PilotRecord>>,
    /// Number of mutating operations applied; tests assert on it to check
    /// that unchanged remote statuses produce no writes.
    writes: AtomicU64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count of mutations applied so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> RegistryResult<std::sync::MutexGuard<'_, HashMap<PilotRef, PilotRecord>>> {
        self.records
            .lock()
            .map_err(|_| RegistryError::Storage("registry lock poisoned".to_string()))
    }
}

impl PilotRegistry for MemoryRegistry {
    fn add_pilots(&self, records: Vec<PilotRecord>) -> RegistryResult<()> {
        let mut map = self.lock()?;
        for record in records {
            debug!(pilot = %record.reference, queue = %record.queue, "pilot registered");
            map.insert(record.reference.clone(), record);
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn get(&self, pilot: &PilotRef) -> RegistryResult<Option<PilotRecord>> {
        Ok(self.lock()?.get(pilot).cloned())
    }

    fn select(&self, filter: &PilotFilter) -> RegistryResult<Vec<PilotRecord>> {
        Ok(self
            .lock()?
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn count(&self, filter: &PilotFilter) -> RegistryResult<u32> {
        Ok(self.lock()?.values().filter(|r| filter.matches(r)).count() as u32)
    }

    fn set_status(&self, pilot: &PilotRef, status: PilotStatus, now: u64) -> RegistryResult<()> {
        let mut map = self.lock()?;
        let record = map
            .get_mut(pilot)
            .ok_or_else(|| RegistryError::NotFound(pilot.to_string()))?;

        if record.status.is_final() {
            warn!(
                %pilot,
                current = %record.status,
                requested = %status,
                "refusing status change on finalized pilot"
            );
            return Ok(());
        }
        if record.status == status {
            return Ok(());
        }

        record.status = status;
        record.last_update = now;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn store_output(&self, pilot: &PilotRef, output: PilotOutput) -> RegistryResult<()> {
        let mut map = self.lock()?;
        let record = map
            .get_mut(pilot)
            .ok_or_else(|| RegistryError::NotFound(pilot.to_string()))?;
        record.output = Some(output);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn mark_accounted(&self, pilot: &PilotRef) -> RegistryResult<()> {
        let mut map = self.lock()?;
        let record = map
            .get_mut(pilot)
            .ok_or_else(|| RegistryError::NotFound(pilot.to_string()))?;
        record.accounted = true;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
