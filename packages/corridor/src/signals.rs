//! Traffic-signal phase evaluation.
//!
//! Each signal runs a fixed green/yellow/red cycle, staggered by an
//! offset. A signal whose cell is inside the active corridor is forced
//! green regardless of where it is in its cycle.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use civic_dispatch_grid::GridIndex;
use civic_dispatch_models::{CellId, GeoPoint};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::CorridorState;

/// Default green duration in seconds.
pub const DEFAULT_GREEN_SECS: u32 = 35;
/// Default yellow duration in seconds.
pub const DEFAULT_YELLOW_SECS: u32 = 4;
/// Default red duration in seconds.
pub const DEFAULT_RED_SECS: u32 = 35;

/// Signal phase.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalPhase {
    Green,
    Yellow,
    Red,
}

/// A signalised junction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficSignal {
    pub id: String,
    pub name: String,
    pub position: GeoPoint,
    pub green_secs: u32,
    pub yellow_secs: u32,
    pub red_secs: u32,
    /// Shift applied to the cycle so neighbouring junctions don't change
    /// in lockstep.
    pub offset_secs: u32,
}

impl TrafficSignal {
    /// Creates a signal with the default 35/4/35 second cycle.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        position: GeoPoint,
        offset_secs: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            green_secs: DEFAULT_GREEN_SECS,
            yellow_secs: DEFAULT_YELLOW_SECS,
            red_secs: DEFAULT_RED_SECS,
            offset_secs,
        }
    }

    /// Length of one full cycle.
    #[must_use]
    pub const fn cycle_secs(&self) -> u32 {
        self.green_secs + self.yellow_secs + self.red_secs
    }

    /// Phase of the cycle at `timestamp` (seconds since the epoch).
    #[must_use]
    pub fn phase_at(&self, timestamp: i64) -> SignalPhase {
        let cycle = i64::from(self.cycle_secs());
        if cycle == 0 {
            return SignalPhase::Red;
        }

        let position = (timestamp + i64::from(self.offset_secs)).rem_euclid(cycle);
        let green = i64::from(self.green_secs);

        if position < green {
            SignalPhase::Green
        } else if position < green + i64::from(self.yellow_secs) {
            SignalPhase::Yellow
        } else {
            SignalPhase::Red
        }
    }
}

/// A signal's evaluated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    pub id: String,
    pub name: String,
    pub position: GeoPoint,
    pub phase: SignalPhase,
    /// Green because of the corridor rather than the cycle.
    pub corridor_override: bool,
}

/// All signals of the operational area with their pre-resolved cells.
#[derive(Debug, Clone)]
pub struct SignalBoard {
    signals: Vec<(TrafficSignal, Option<CellId>)>,
}

impl SignalBoard {
    /// Resolves each signal's cell once up front.
    ///
    /// A signal whose position can't be resolved keeps running its cycle
    /// and is simply never overridden.
    #[must_use]
    pub fn new(grid: &GridIndex, signals: Vec<TrafficSignal>) -> Self {
        let signals = signals
            .into_iter()
            .map(|signal| {
                let cell = match grid.cell_for_point(signal.position) {
                    Ok(cell) => Some(cell),
                    Err(e) => {
                        log::warn!("Signal {} has no grid cell: {e}", signal.id);
                        None
                    }
                };
                (signal, cell)
            })
            .collect();

        Self { signals }
    }

    /// Board of the default city junctions.
    #[must_use]
    pub fn with_default_junctions(grid: &GridIndex) -> Self {
        Self::new(grid, default_junctions())
    }

    /// Number of signals on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Whether the board has no signals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Evaluates every signal at `at`, forcing green inside the corridor.
    #[must_use]
    pub fn evaluate(&self, corridor: &CorridorState, at: DateTime<Utc>) -> Vec<SignalReading> {
        let active: BTreeSet<CellId> = corridor.active_cells().into_iter().collect();
        let timestamp = at.timestamp();

        self.signals
            .iter()
            .map(|(signal, cell)| {
                let corridor_override = cell.as_ref().is_some_and(|cell| active.contains(cell));
                let phase = if corridor_override {
                    SignalPhase::Green
                } else {
                    signal.phase_at(timestamp)
                };

                SignalReading {
                    id: signal.id.clone(),
                    name: signal.name.clone(),
                    position: signal.position,
                    phase,
                    corridor_override,
                }
            })
            .collect()
    }
}

/// Major junctions of the default operational area: (name, lat, lng,
/// offset).
const JUNCTIONS: &[(&str, f64, f64, u32)] = &[
    ("Kathipara Junction", 13.0073, 80.2037, 0),
    ("Koyambedu Roundtana", 13.0761, 80.1992, 12),
    ("Guindy Kathipara", 13.0108, 80.2037, 24),
    ("Egmore Station", 13.0774, 80.2609, 5),
    ("Chennai Central", 13.0825, 80.2757, 18),
    ("Anna Nagar Roundtana", 13.0878, 80.2070, 30),
    ("T Nagar Pondy Bazaar", 13.0417, 80.2330, 8),
    ("Adyar Ananda Bhavan", 13.0040, 80.2558, 22),
    ("Velachery Main Rd", 12.9792, 80.2209, 14),
    ("Thiruvanmiyur MRTS", 12.9848, 80.2573, 6),
    ("Sholinganallur OMR", 12.9010, 80.2274, 28),
    ("Poonamallee High Rd", 13.0487, 80.1105, 10),
    ("Tambaram GST Rd", 12.9229, 80.1275, 20),
    ("Chromepet Phoenix", 12.9510, 80.1400, 2),
    ("Ambattur OT", 13.1143, 80.1548, 16),
    ("Madhavaram Milk Colony", 13.1379, 80.2490, 26),
    ("Perungudi OMR", 12.9705, 80.2414, 4),
    ("Saidapet Guindy", 13.0212, 80.2252, 32),
    ("Ashok Nagar", 13.0382, 80.2121, 11),
    ("Washermanpet", 13.1113, 80.2911, 24),
    ("Ennore Highway", 13.2144, 80.3216, 7),
    ("Anna Salai Nandanam", 13.0280, 80.2280, 19),
    ("OMR Thoraipakkam", 12.9350, 80.2280, 13),
    ("ECR Thiruvanmiyur", 12.9820, 80.2580, 1),
    ("GNT Road Red Hills", 13.1650, 80.2450, 15),
    ("Avadi Main Rd", 13.1150, 80.1010, 9),
    ("Purasawalkam", 13.0920, 80.2620, 23),
    ("Mylapore Tank", 13.0320, 80.2650, 17),
    ("Besant Nagar", 13.0060, 80.2680, 3),
    ("Vadapalani", 13.0520, 80.2120, 27),
    ("Porur", 13.0350, 80.1560, 21),
    ("Medavakkam", 12.9180, 80.1980, 5),
    ("Pallavaram", 12.9680, 80.1510, 29),
    ("Vandalur", 12.8920, 80.0810, 31),
];

/// The default junction list with ids `sig_1..sig_N`.
#[must_use]
pub fn default_junctions() -> Vec<TrafficSignal> {
    JUNCTIONS
        .iter()
        .enumerate()
        .map(|(idx, &(name, lat, lng, offset))| {
            TrafficSignal::new(
                format!("sig_{}", idx + 1),
                name,
                GeoPoint::new(lat, lng),
                offset,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use civic_dispatch_models::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn cycle_walks_through_phases() {
        let signal = TrafficSignal::new("s", "Test", GeoPoint::new(13.0, 80.2), 0);
        assert_eq!(signal.cycle_secs(), 74);
        assert_eq!(signal.phase_at(0), SignalPhase::Green);
        assert_eq!(signal.phase_at(34), SignalPhase::Green);
        assert_eq!(signal.phase_at(35), SignalPhase::Yellow);
        assert_eq!(signal.phase_at(38), SignalPhase::Yellow);
        assert_eq!(signal.phase_at(39), SignalPhase::Red);
        assert_eq!(signal.phase_at(73), SignalPhase::Red);
        assert_eq!(signal.phase_at(74), SignalPhase::Green);
    }

    #[test]
    fn offset_shifts_cycle() {
        let signal = TrafficSignal::new("s", "Test", GeoPoint::new(13.0, 80.2), 35);
        assert_eq!(signal.phase_at(0), SignalPhase::Yellow);
    }

    #[test]
    fn corridor_forces_green_until_expiry() {
        let grid = GridIndex::new(7).unwrap();
        let clock = Arc::new(ManualClock::default());
        let corridor = CorridorState::with_default_duration(clock.clone());

        // 40s into the cycle: red without an override.
        let signal = TrafficSignal::new("s", "Test", GeoPoint::new(13.0825, 80.2757), 0);
        let board = SignalBoard::new(&grid, vec![signal.clone()]);
        let at = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(40);

        let readings = board.evaluate(&corridor, at);
        assert_eq!(readings[0].phase, SignalPhase::Red);
        assert!(!readings[0].corridor_override);

        corridor.activate([grid.cell_for_point(signal.position).unwrap()]);
        let readings = board.evaluate(&corridor, at);
        assert_eq!(readings[0].phase, SignalPhase::Green);
        assert!(readings[0].corridor_override);

        clock.advance(TimeDelta::seconds(601));
        let readings = board.evaluate(&corridor, at);
        assert_eq!(readings[0].phase, SignalPhase::Red);
    }

    #[test]
    fn unresolvable_signal_keeps_cycling() {
        let grid = GridIndex::new(7).unwrap();
        let corridor = CorridorState::with_default_duration(Arc::new(ManualClock::default()));
        let board = SignalBoard::new(
            &grid,
            vec![TrafficSignal::new("bad", "Nowhere", GeoPoint::new(f64::NAN, 0.0), 0)],
        );
        let readings = board.evaluate(&corridor, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(readings[0].phase, SignalPhase::Green);
        assert!(!readings[0].corridor_override);
    }

    #[test]
    fn default_board_has_unique_ids() {
        let board = SignalBoard::with_default_junctions(&GridIndex::new(7).unwrap());
        assert_eq!(board.len(), 34);

        let ids: BTreeSet<String> = default_junctions().into_iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 34);
    }
}
