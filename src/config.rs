use std::str::FromStr;
use std::sync::Arc;

use crate::device::{DeviceBackend, SimulatedDevice, UnavailableDevice};
use crate::error::{ResidencyError, Result};

/// Selects the device backend (`simulated` or `none`).
pub const DEVICE_ENV: &str = "CUPY_XARRAY_DEVICE";
/// Device ordinal passed to the backend.
pub const DEVICE_ID_ENV: &str = "CUPY_XARRAY_DEVICE_ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Simulated,
    None,
}

impl FromStr for BackendKind {
    type Err = ResidencyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(BackendKind::Simulated),
            "none" | "off" | "cpu" => Ok(BackendKind::None),
            other => Err(ResidencyError::UnknownBackend(other.to_string())),
        }
    }
}

/// Runtime configuration of the default device provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendKind,
    pub device_id: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key → value source. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        if let Some(v) = lookup(DEVICE_ENV) {
            config.backend = v.parse()?;
        }
        if let Some(v) = lookup(DEVICE_ID_ENV) {
            config.device_id = v.trim().parse().map_err(|_| ResidencyError::InvalidConfig {
                key: DEVICE_ID_ENV.to_string(),
                value: v.clone(),
            })?;
        }
        Ok(config)
    }

    pub fn build_backend(&self) -> Arc<dyn DeviceBackend> {
        match self.backend {
            BackendKind::Simulated => Arc::new(SimulatedDevice::new(self.device_id)),
            BackendKind::None => Arc::new(UnavailableDevice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_simulated_device_zero() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.build_backend().name(), "simulated:0");
    }

    #[test]
    fn reads_backend_and_ordinal() {
        let pairs = [(DEVICE_ENV, "Simulated"), (DEVICE_ID_ENV, "3")];
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.device_id, 3);
        assert_eq!(config.build_backend().name(), "simulated:3");

        let none = Config::from_lookup(lookup(&[(DEVICE_ENV, "none")])).unwrap();
        assert!(!none.build_backend().is_available());
    }

    #[test]
    fn rejects_unknown_backend_and_bad_ordinal() {
        let err = Config::from_lookup(lookup(&[(DEVICE_ENV, "tpu")])).unwrap_err();
        assert_eq!(err, ResidencyError::UnknownBackend("tpu".into()));

        let err = Config::from_lookup(lookup(&[(DEVICE_ID_ENV, "-1")])).unwrap_err();
        assert!(matches!(err, ResidencyError::InvalidConfig { .. }));
    }
}
