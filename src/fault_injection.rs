use crate::hal::SimHardware;
use serde::{Deserialize, Serialize};
use tracing::info;

// Per-cycle injection probability; at 100 Hz this is roughly one fault every 50 s
const SENSOR_FAULT_RATE_PERCENT: f32 = 0.02;

// Fault kind weights (must sum to 100)
const DROPOUT_WEIGHT: u8 = 50;
const OFFSET_WEIGHT: u8 = 35;
const STUCK_WEIGHT: u8 = 15;

const MIN_FAULT_DURATION_CYCLES: u32 = 1;
const MAX_FAULT_DURATION_CYCLES: u32 = 200;
const DEFAULT_OFFSET_DEG: i32 = 8;

/// Sensor faults the simulated steering feedback can suffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorFault {
    /// Every read fails.
    Dropout,
    /// Reads are shifted by a constant number of degrees.
    Offset { deg: i32 },
    /// Reads freeze at the value measured when the fault began.
    Stuck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSensorFault {
    pub fault: SensorFault,
    /// `None` holds until cleared by hand.
    pub remaining_cycles: Option<u32>,
    pub injected_at_cycle: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FaultInjectionStats {
    pub total_injected: u32,
    pub dropouts: u32,
    pub offsets: u32,
    pub stuck: u32,
    pub expired: u32,
    pub manual_cleared: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    pub enabled: bool,
    pub rate_percent: f32,
    pub dropout_weight: u8,
    pub offset_weight: u8,
    pub stuck_weight: u8,
    pub min_duration_cycles: u32,
    pub max_duration_cycles: u32,
    pub offset_deg: i32,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_percent: SENSOR_FAULT_RATE_PERCENT,
            dropout_weight: DROPOUT_WEIGHT,
            offset_weight: OFFSET_WEIGHT,
            stuck_weight: STUCK_WEIGHT,
            min_duration_cycles: MIN_FAULT_DURATION_CYCLES,
            max_duration_cycles: MAX_FAULT_DURATION_CYCLES,
            offset_deg: DEFAULT_OFFSET_DEG,
        }
    }
}

/// Probabilistic and manual sensor-fault injection for the simulated plant.
///
/// At most one fault is active at a time. Randomness comes from a fixed-seed
/// LCG so simulator runs are reproducible.
#[derive(Debug)]
pub struct FaultInjector {
    config: FaultInjectionConfig,
    active: Option<ActiveSensorFault>,
    stats: FaultInjectionStats,
    cycle_count: u64,
    rng_state: u64,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::new_with_config(FaultInjectionConfig::default())
    }

    pub fn new_with_config(config: FaultInjectionConfig) -> Self {
        Self {
            config,
            active: None,
            stats: FaultInjectionStats::default(),
            cycle_count: 0,
            rng_state: 0x1234_5678_9ABC_DEF0,
        }
    }

    /// Call once per control cycle, before the governors run.
    pub fn update(&mut self, hw: &mut SimHardware) {
        self.cycle_count += 1;

        if let Some(active) = self.active.as_mut() {
            let expired = match active.remaining_cycles.as_mut() {
                Some(0) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            };
            if expired {
                self.active = None;
                self.stats.expired += 1;
                hw.clear_injected_faults();
                info!("injected sensor fault expired at cycle {}", self.cycle_count);
            }
            return;
        }

        if !self.config.enabled || !self.should_inject() {
            return;
        }
        if let Some(fault) = self.select_fault() {
            let duration = self.random_duration();
            self.inject(fault, Some(duration), hw);
        }
    }

    /// Apply a fault now. `duration_cycles = None` keeps it until cleared.
    pub fn inject(&mut self, fault: SensorFault, duration_cycles: Option<u32>, hw: &mut SimHardware) {
        hw.clear_injected_faults();
        match fault {
            SensorFault::Dropout => {
                hw.set_read_failure(true);
                self.stats.dropouts += 1;
            }
            SensorFault::Offset { deg } => {
                hw.set_offset(deg);
                self.stats.offsets += 1;
            }
            SensorFault::Stuck => {
                let frozen = hw.plant().map_or(0, crate::hal::ServoPlant::measured);
                hw.set_stuck(Some(frozen));
                self.stats.stuck += 1;
            }
        }
        self.stats.total_injected += 1;
        // The injecting cycle counts as the first one of the fault
        self.active = Some(ActiveSensorFault {
            fault,
            remaining_cycles: duration_cycles.map(|d| d.saturating_sub(1)),
            injected_at_cycle: self.cycle_count,
        });
        info!("injected sensor fault {:?} for {:?} cycles", fault, duration_cycles);
    }

    pub fn clear(&mut self, hw: &mut SimHardware) {
        if self.active.take().is_some() {
            self.stats.manual_cleared += 1;
        }
        hw.clear_injected_faults();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn active(&self) -> Option<&ActiveSensorFault> {
        self.active.as_ref()
    }

    pub fn stats(&self) -> &FaultInjectionStats {
        &self.stats
    }

    pub fn config(&self) -> &FaultInjectionConfig {
        &self.config
    }

    fn should_inject(&mut self) -> bool {
        self.random_float() < self.config.rate_percent / 100.0
    }

    fn select_fault(&mut self) -> Option<SensorFault> {
        let total = u32::from(self.config.dropout_weight)
            + u32::from(self.config.offset_weight)
            + u32::from(self.config.stuck_weight);
        if total == 0 {
            return None;
        }
        let pick = u32::from(self.random_u8()) * total / 256;
        let dropout = u32::from(self.config.dropout_weight);
        let offset = dropout + u32::from(self.config.offset_weight);
        if pick < dropout {
            Some(SensorFault::Dropout)
        } else if pick < offset {
            Some(SensorFault::Offset {
                deg: self.config.offset_deg,
            })
        } else {
            Some(SensorFault::Stuck)
        }
    }

    fn random_duration(&mut self) -> u32 {
        let span = self
            .config
            .max_duration_cycles
            .saturating_sub(self.config.min_duration_cycles);
        if span == 0 {
            return self.config.min_duration_cycles.max(1);
        }
        (self.config.min_duration_cycles + self.random_u32() % span).max(1)
    }

    // Knuth MMIX LCG, upper bits only
    fn next_random(&mut self) -> u64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.rng_state
    }

    fn random_u8(&mut self) -> u8 {
        (self.next_random() >> 56) as u8
    }

    fn random_u32(&mut self) -> u32 {
        (self.next_random() >> 32) as u32
    }

    #[allow(clippy::cast_precision_loss)]
    fn random_float(&mut self) -> f32 {
        self.random_u32() as f32 / u32::MAX as f32
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}
