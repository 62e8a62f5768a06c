//! Per-domain remediation guards.
//!
//! At most one remediation attempt per fault domain may be in flight. A
//! [`GuardToken`] is the proof of ownership; dropping it releases the domain
//! on every exit path, unwinding included.

use sentinel_common::FaultDomain;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// One flag per fault domain, created on first use
#[derive(Debug, Default)]
pub struct GuardTable {
    slots: Mutex<HashMap<FaultDomain, Arc<AtomicBool>>>,
}

impl GuardTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, domain: &FaultDomain) -> Arc<AtomicBool> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(domain.clone())
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    /// Take the domain's guard, or `None` if an attempt is already in flight.
    pub fn try_acquire(&self, domain: &FaultDomain) -> Option<GuardToken> {
        let slot = self.slot(domain);
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                debug!("Guard acquired for {}", domain);
                GuardToken {
                    domain: domain.clone(),
                    slot,
                }
            })
    }

    pub fn is_held(&self, domain: &FaultDomain) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(domain)
            .map(|slot| slot.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Domains with an attempt in flight, sorted by name
    pub fn held_domains(&self) -> Vec<FaultDomain> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut held: Vec<FaultDomain> = slots
            .iter()
            .filter(|(_, slot)| slot.load(Ordering::Acquire))
            .map(|(domain, _)| domain.clone())
            .collect();
        held.sort_by_key(|d| d.to_string());
        held
    }
}

/// Ownership of one domain's guard
#[derive(Debug)]
pub struct GuardToken {
    domain: FaultDomain,
    slot: Arc<AtomicBool>,
}

impl GuardToken {
    pub fn domain(&self) -> &FaultDomain {
        &self.domain
    }
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::Release);
        debug!("Guard released for {}", self.domain);
    }
}
