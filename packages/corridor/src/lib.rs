#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Green corridor state.
//!
//! After a dispatch, the cells along the responding unit's route are
//! granted signal priority for a fixed window. Only one corridor exists at
//! a time: activating a new one replaces the previous set wholesale.
//!
//! Expiry is enforced lazily. Nothing runs in the background; every read
//! first checks the window against the injected [`Clock`] and empties the
//! set if it has lapsed. Between the true expiry instant and the next read
//! the stored set is stale, which is harmless because signal evaluation
//! polls on a sub-second cadence and always goes through the same check.

pub mod signals;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use civic_dispatch_models::CellId;
use civic_dispatch_models::clock::Clock;
use serde::{Deserialize, Serialize};

/// How long a corridor stays active when no duration is configured.
pub const DEFAULT_CORRIDOR_SECS: i64 = 600;

/// Snapshot of the corridor as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorridorStatus {
    /// Whether any cell currently has priority.
    pub active: bool,
    /// Cells with priority, in id order.
    pub cells: Vec<CellId>,
    /// When the current window lapses, if one is open.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Window {
    cells: BTreeSet<CellId>,
    expires_at: Option<DateTime<Utc>>,
}

impl Window {
    fn reset(&mut self) {
        self.cells.clear();
        self.expires_at = None;
    }
}

/// The single, process-wide set of corridor cells.
///
/// Shared by reference (usually behind an [`Arc`]) between the allocator,
/// which writes it, and signal evaluation, which reads it.
pub struct CorridorState {
    window: Mutex<Window>,
    clock: Arc<dyn Clock>,
    duration: TimeDelta,
}

impl CorridorState {
    /// Creates an inactive corridor whose activations last `duration`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, duration: TimeDelta) -> Self {
        Self {
            window: Mutex::new(Window::default()),
            clock,
            duration,
        }
    }

    /// Creates an inactive corridor with the default 600 second window.
    #[must_use]
    pub fn with_default_duration(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, TimeDelta::seconds(DEFAULT_CORRIDOR_SECS))
    }

    /// Replaces the corridor with `cells` and opens a fresh window.
    ///
    /// The previous set is discarded, not merged. Returns the new expiry.
    pub fn activate(&self, cells: impl IntoIterator<Item = CellId>) -> DateTime<Utc> {
        let cells: BTreeSet<CellId> = cells.into_iter().collect();
        let expires_at = self.clock.now() + self.duration;

        log::info!(
            "Green corridor activated over {} cells until {expires_at}",
            cells.len()
        );

        let mut window = self.lock();
        *window = Window {
            cells,
            expires_at: Some(expires_at),
        };

        expires_at
    }

    /// Drops the corridor immediately.
    pub fn clear(&self) {
        self.lock().reset();
        log::info!("Green corridor cleared");
    }

    /// Whether `cell` currently has priority.
    #[must_use]
    pub fn is_active(&self, cell: &CellId) -> bool {
        self.live().cells.contains(cell)
    }

    /// All cells that currently have priority, in id order.
    #[must_use]
    pub fn active_cells(&self) -> Vec<CellId> {
        self.live().cells.iter().cloned().collect()
    }

    /// Full snapshot of the corridor.
    #[must_use]
    pub fn status(&self) -> CorridorStatus {
        let window = self.live();
        CorridorStatus {
            active: !window.cells.is_empty(),
            cells: window.cells.iter().cloned().collect(),
            expires_at: window.expires_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the window and applies lazy expiry before handing it out.
    fn live(&self) -> MutexGuard<'_, Window> {
        let now = self.clock.now();
        let mut window = self.lock();
        if window.expires_at.is_some_and(|expires_at| now > expires_at) {
            log::debug!("Green corridor expired");
            window.reset();
        }
        window
    }
}

impl std::fmt::Debug for CorridorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorridorState")
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}
