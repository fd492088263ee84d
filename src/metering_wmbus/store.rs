use std::sync::{Arc, RwLock};
use chrono::{DateTime, Utc};
use crate::units::{assert_quantity, convert, Quantity, Unit, UnitError};
use super::structs::{Capabilities, Readings};

/// Current values of one meter in base units (kWh, kW, m3)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSnapshot {
    pub total_energy_kwh: f64,
    pub current_power_kw: f64,
    pub total_volume_m3: f64,
    pub last_update: Option<DateTime<Utc>>,
}

impl MeasurementSnapshot {
    pub fn total_energy_consumption(&self, u: Unit) -> Result<f64, UnitError> {
        assert_quantity(u, Quantity::Energy)?;
        convert(self.total_energy_kwh, Unit::KWH, u)
    }

    pub fn current_power_consumption(&self, u: Unit) -> Result<f64, UnitError> {
        assert_quantity(u, Quantity::Power)?;
        convert(self.current_power_kw, Unit::KW, u)
    }

    pub fn total_volume(&self, u: Unit) -> Result<f64, UnitError> {
        assert_quantity(u, Quantity::Volume)?;
        convert(self.total_volume_m3, Unit::M3, u)
    }

    /// Copy with the readings the meter supports laid over, stamped with `at`
    pub fn updated_with(&self, readings: &Readings, capabilities: &Capabilities, at: DateTime<Utc>) -> Self {
        let pick = |q: Quantity, new: Option<f64>, old: f64| match new {
            Some(v) if capabilities.supports(q) => v,
            _ => old,
        };

        MeasurementSnapshot {
            total_energy_kwh: pick(Quantity::Energy, readings.total_energy_kwh, self.total_energy_kwh),
            current_power_kw: pick(Quantity::Power, readings.current_power_kw, self.current_power_kw),
            total_volume_m3: pick(Quantity::Volume, readings.total_volume_m3, self.total_volume_m3),
            last_update: Some(at),
        }
    }
}

/// Readers always see a whole snapshot, a commit swaps it in one go
#[derive(Debug, Default)]
pub struct MeasurementStore {
    current: RwLock<Arc<MeasurementSnapshot>>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        MeasurementStore::default()
    }

    pub fn snapshot(&self) -> Arc<MeasurementSnapshot> {
        match self.current.read() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn commit(&self, readings: &Readings, capabilities: &Capabilities, at: DateTime<Utc>) -> Arc<MeasurementSnapshot> {
        let mut guard = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = Arc::new(guard.updated_with(readings, capabilities, at));
        *guard = next.clone();
        return next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: Capabilities = Capabilities { energy: true, power: true, volume: true };

    #[test]
    fn test_commit_keeps_absent_quantities() {
        let store = MeasurementStore::new();
        let now = Utc::now();
        store.commit(&Readings { total_energy_kwh: Some(1.0), current_power_kw: None, total_volume_m3: Some(2.0) }, &ALL, now);
        let s = store.commit(&Readings { total_energy_kwh: None, current_power_kw: Some(1000.0), total_volume_m3: None }, &ALL, now);

        assert_eq!(s.total_energy_kwh, 1.0);
        assert_eq!(s.total_volume_m3, 2.0);
        assert_eq!(s.current_power_kw, 1000.0);
        assert_eq!(s.last_update, Some(now));
        assert_eq!(*store.snapshot(), *s);
    }

    #[test]
    fn test_commit_ignores_unsupported_quantities() {
        let store = MeasurementStore::new();
        let caps = Capabilities { energy: true, power: false, volume: false };
        let s = store.commit(&Readings { total_energy_kwh: Some(5.0), current_power_kw: Some(7.0), total_volume_m3: Some(9.0) }, &caps, Utc::now());
        assert_eq!(s.total_energy_kwh, 5.0);
        assert_eq!(s.current_power_kw, 0.0);
        assert_eq!(s.total_volume_m3, 0.0);
    }

    #[test]
    fn test_old_snapshot_is_untouched() {
        let store = MeasurementStore::new();
        let before = store.snapshot();
        store.commit(&Readings { total_energy_kwh: Some(3.0), ..Default::default() }, &ALL, Utc::now());
        assert_eq!(before.total_energy_kwh, 0.0);
        assert!(before.last_update.is_none());
        assert_eq!(store.snapshot().total_energy_kwh, 3.0);
    }

    #[test]
    fn test_unit_accessors() {
        let s = MeasurementSnapshot { total_energy_kwh: 1000.0, current_power_kw: 2.0, total_volume_m3: 1.5, last_update: None };
        assert!((s.total_energy_consumption(Unit::GJ).unwrap() - 3.6).abs() < 1e-9);
        assert_eq!(s.total_volume(Unit::L), Ok(1500.0));
        assert_eq!(s.current_power_consumption(Unit::KW), Ok(2.0));
        assert!(s.total_volume(Unit::KWH).is_err());
    }
}
