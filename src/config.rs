//! # Driver Configuration
//!
//! Driver-wide tunables, loadable from JSON. Per-client timing lives in
//! [`RfParams`](crate::rfcore::types::RfParams) and is given to `open`.
//!
//! ```rust
//! use rfcore_rs::config::{ClientVariant, DriverConfig};
//!
//! let config = DriverConfig::from_json_str(r#"{"variant": "single", "pend_timeout_ms": 500}"#).unwrap();
//! assert_eq!(config.variant, ClientVariant::Single);
//! assert_eq!(config.variant.max_clients(), 1);
//! assert_eq!(config.rat_rtc_err_tol_us, 5);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FSM_TRACE_DEPTH, DEFAULT_PEND_TIMEOUT_MS, DEFAULT_PHY_SWITCHING_TIME_US,
    DEFAULT_RAT_RTC_ERR_TOL_US, N_MAX_CLIENTS,
};
use crate::error::RfError;

/// Number of clients the driver serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientVariant {
    /// One client; no PHY switching
    Single,
    /// Up to two clients sharing the radio
    #[default]
    Multi,
}

impl ClientVariant {
    pub fn max_clients(&self) -> usize {
        match self {
            ClientVariant::Single => 1,
            ClientVariant::Multi => N_MAX_CLIENTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub variant: ClientVariant,
    /// Timeout of `pend_cmd`, `run_cmd` and `close`
    pub pend_timeout_ms: u64,
    /// Switching time assumed for a client until one has been measured
    pub default_phy_switching_time_us: u32,
    /// Tolerated RAT/RTC drift
    pub rat_rtc_err_tol_us: u32,
    /// Transitions kept in the FSM history
    pub fsm_trace_depth: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            variant: ClientVariant::Multi,
            pend_timeout_ms: DEFAULT_PEND_TIMEOUT_MS,
            default_phy_switching_time_us: DEFAULT_PHY_SWITCHING_TIME_US,
            rat_rtc_err_tol_us: DEFAULT_RAT_RTC_ERR_TOL_US,
            fsm_trace_depth: DEFAULT_FSM_TRACE_DEPTH,
        }
    }
}

impl DriverConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RfError> {
        serde_json::from_str(json).map_err(|e| RfError::InvalidParams(format!("config: {e}")))
    }

    /// Load a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RfError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RfError::InvalidParams(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn pend_timeout(&self) -> Duration {
        Duration::from_millis(self.pend_timeout_ms)
    }
}
