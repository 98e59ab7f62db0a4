//! Zaber stage state object (`SPEC_FULL.md` §4.C.2.FULL), grounded on
//! `original_source/pandora/controller/zaberstages.py`'s `ZaberController`.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{PandoraError, Result};
use crate::limits::ZABER_SLOT_TOLERANCE_MM;
use crate::model::resolve_slot;
use crate::transport::motion::MotionChain;

/// A single Zaber linear-stage axis with a named slot table (e.g. ND filter
/// positions on a filter-wheel-style mask stage).
pub struct ZaberStage {
    chain: Arc<Mutex<dyn MotionChain>>,
    slots: indexmap::IndexMap<String, f64>,
    current_slot: Option<String>,
}

impl ZaberStage {
    /// Take ownership of an already-connected motion chain and slot table.
    pub fn new(chain: Arc<Mutex<dyn MotionChain>>, slots: indexmap::IndexMap<String, f64>) -> Self {
        Self {
            chain,
            slots,
            current_slot: None,
        }
    }

    /// Move to a named slot. On success, the cached current-slot name is
    /// set directly from `slot_name` rather than re-resolved from hardware
    /// position, matching the original's caching behavior.
    pub async fn move_to_slot(&mut self, slot_name: &str) -> Result<()> {
        let target_mm = *self.slots.get(slot_name).ok_or_else(|| {
            PandoraError::DeviceRejected(format!("unknown mask slot '{slot_name}'"))
        })?;
        self.chain.lock().await.move_absolute_mm(target_mm).await?;
        self.current_slot = Some(slot_name.to_string());
        Ok(())
    }

    /// Move to an absolute position in millimeters. Clears the cached slot
    /// name since the destination is not necessarily a named slot.
    pub async fn move_to_absolute_mm(&mut self, position_mm: f64) -> Result<()> {
        self.chain.lock().await.move_absolute_mm(position_mm).await?;
        self.current_slot = None;
        Ok(())
    }

    /// Home the stage. Clears the cached slot name.
    pub async fn go_home(&mut self) -> Result<()> {
        self.chain.lock().await.home().await?;
        self.current_slot = None;
        Ok(())
    }

    /// Current position in millimeters, always re-read from hardware.
    pub async fn get_position_mm(&mut self) -> Result<f64> {
        self.chain.lock().await.get_position_mm().await
    }

    /// Set the stage's travel velocity.
    pub async fn set_velocity(&mut self, speed_mm_per_sec: f64) -> Result<()> {
        self.chain
            .lock()
            .await
            .set_velocity_mm_per_s(speed_mm_per_sec)
            .await
    }

    /// The cached slot name from the last successful `move_to_slot`, if
    /// any slot move has happened since the last position-clearing move.
    pub fn cached_slot(&self) -> Option<&str> {
        self.current_slot.as_deref()
    }

    /// Resolve the stage's current hardware position to the closest named
    /// slot within tolerance, re-reading hardware (unlike `cached_slot`).
    pub async fn resolve_current_slot(&mut self) -> Result<Option<String>> {
        let position_mm = self.get_position_mm().await?;
        Ok(resolve_slot(&self.slots, position_mm, ZABER_SLOT_TOLERANCE_MM))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::motion::MockMotionChain;

    fn sample_slots() -> indexmap::IndexMap<String, f64> {
        let mut slots = indexmap::IndexMap::new();
        slots.insert("ND05".to_string(), 7.0);
        slots.insert("CLEAR".to_string(), 148.57);
        slots
    }

    #[tokio::test]
    async fn move_to_slot_caches_slot_name_directly() {
        let chain: Arc<Mutex<dyn MotionChain>> = Arc::new(Mutex::new(MockMotionChain::new(0.0)));
        let mut stage = ZaberStage::new(chain, sample_slots());
        stage.move_to_slot("ND05").await.unwrap();
        assert_eq!(stage.cached_slot(), Some("ND05"));
        assert_eq!(stage.get_position_mm().await.unwrap(), 7.0);
    }

    #[tokio::test]
    async fn move_to_slot_rejects_unknown_name() {
        let chain: Arc<Mutex<dyn MotionChain>> = Arc::new(Mutex::new(MockMotionChain::new(0.0)));
        let mut stage = ZaberStage::new(chain, sample_slots());
        assert!(matches!(
            stage.move_to_slot("ND99").await,
            Err(PandoraError::DeviceRejected(_))
        ));
    }

    #[tokio::test]
    async fn absolute_move_clears_cached_slot() {
        let chain: Arc<Mutex<dyn MotionChain>> = Arc::new(Mutex::new(MockMotionChain::new(0.0)));
        let mut stage = ZaberStage::new(chain, sample_slots());
        stage.move_to_slot("ND05").await.unwrap();
        stage.move_to_absolute_mm(99.0).await.unwrap();
        assert_eq!(stage.cached_slot(), None);
    }
}
