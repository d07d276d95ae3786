//! Battery charge sampling, used as an energy-proxy metric.

use std::fs;

use crate::{error::OffloadError, prelude::*};

/// Counter files we know how to read, in preference order. `charge_now` is
/// µAh, `energy_now` is µWh; a run compares deltas of the same counter, so
/// the unit never matters to us.
const COUNTER_FILES: &[&str] = &["charge_now", "energy_now"];

/// Samples a charge counter before and after a run.
///
/// A sampler value is passed into each run instead of living in process-wide
/// state, so repeated runs can't corrupt each other's baselines.
pub trait EnergySampler: Send + Sync {
    /// Read the current counter value, in the supply's native unit.
    fn sample(&self) -> Result<i64, OffloadError>;
}

/// Sampler reading a Linux power-supply sysfs directory.
pub struct SysfsEnergySampler {
    supply_dir: PathBuf,
}

impl SysfsEnergySampler {
    pub fn new(supply_dir: impl Into<PathBuf>) -> Self {
        Self {
            supply_dir: supply_dir.into(),
        }
    }

    /// Pick the first supply under `/sys/class/power_supply` that exposes a
    /// charge or energy counter.
    pub fn autodetect() -> Option<Self> {
        let entries = fs::read_dir("/sys/class/power_supply").ok()?;
        for entry in entries.flatten() {
            let dir = entry.path();
            if COUNTER_FILES.iter().any(|name| dir.join(name).is_file()) {
                return Some(Self::new(dir));
            }
        }
        None
    }
}

impl EnergySampler for SysfsEnergySampler {
    fn sample(&self) -> Result<i64, OffloadError> {
        for name in COUNTER_FILES {
            let path = self.supply_dir.join(name);
            if !path.is_file() {
                continue;
            }
            let raw = fs::read_to_string(&path).map_err(|err| {
                OffloadError::io(anyhow!("cannot read {}: {}", path.display(), err))
            })?;
            return raw.trim().parse::<i64>().map_err(|err| {
                OffloadError::io(anyhow!(
                    "bad counter value in {}: {}",
                    path.display(),
                    err
                ))
            });
        }
        Err(OffloadError::io(anyhow!(
            "no charge counter under {}",
            self.supply_dir.display()
        )))
    }
}

/// Sampler for hosts without a battery; every delta reads zero.
pub struct NullEnergySampler;

impl EnergySampler for NullEnergySampler {
    fn sample(&self) -> Result<i64, OffloadError> {
        Ok(0)
    }
}
