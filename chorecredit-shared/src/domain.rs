use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Device a reward can be redeemed on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Phone,
    Pc,
    Tablet,
    Console,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Phone => "phone",
            Device::Pc => "pc",
            Device::Tablet => "tablet",
            Device::Console => "console",
        }
    }

    /// Normalize loose device names as they appear in vendor exports
    /// ("Laptop", "iPad", "Handy#", ...) to a canonical device.
    pub fn from_loose(raw: &str) -> Result<Self, ParseDeviceError> {
        let s = raw.trim().trim_end_matches('#').to_lowercase();
        if s.contains("laptop") || s.contains("computer") || s.contains("pc") {
            return Ok(Device::Pc);
        }
        if s.contains("tablet") || s.contains("ipad") {
            return Ok(Device::Tablet);
        }
        if s.contains("phone") || s.contains("handy") || s.contains("smartphone") {
            return Ok(Device::Phone);
        }
        if s.contains("console") {
            return Ok(Device::Console);
        }
        Err(ParseDeviceError(raw.trim().to_string()))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = ParseDeviceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(Device::Phone),
            "pc" => Ok(Device::Pc),
            "tablet" => Ok(Device::Tablet),
            "console" => Ok(Device::Console),
            other => Err(ParseDeviceError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device: {0}")]
pub struct ParseDeviceError(pub String);

/// How an approved reward is recorded for a (family, device) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyCode {
    /// Consumes a pre-issued code from the resource pool.
    Coded,
    /// Minutes tracked in the ledger; redemption happens out-of-band.
    Tracked,
    /// Same allocation behavior as Tracked; default when unconfigured.
    Untracked,
}

impl StrategyCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyCode::Coded => "coded",
            StrategyCode::Tracked => "tracked",
            StrategyCode::Untracked => "untracked",
        }
    }
}

impl fmt::Display for StrategyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyCode {
    type Err = ParseStrategyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coded" => Ok(StrategyCode::Coded),
            "tracked" => Ok(StrategyCode::Tracked),
            "untracked" => Ok(StrategyCode::Untracked),
            other => Err(ParseStrategyError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown strategy code: {0}")]
pub struct ParseStrategyError(pub String);

/// Submission lifecycle. `Approved` is terminal; `Retry` hands the task back
/// to the child and remains re-approvable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Retry,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Retry => "retry",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "approved" => Ok(SubmissionStatus::Approved),
            "retry" => Ok(SubmissionStatus::Retry),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown submission status: {0}")]
pub struct ParseStatusError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_normalization() {
        assert_eq!(Device::from_loose("Laptop"), Ok(Device::Pc));
        assert_eq!(Device::from_loose("computer "), Ok(Device::Pc));
        assert_eq!(Device::from_loose("iPad"), Ok(Device::Tablet));
        assert_eq!(Device::from_loose("Handy#"), Ok(Device::Phone));
        assert_eq!(Device::from_loose("Smartphone"), Ok(Device::Phone));
        assert_eq!(Device::from_loose("console"), Ok(Device::Console));
        assert!(Device::from_loose("toaster").is_err());
    }

    #[test]
    fn strategy_roundtrip() {
        for code in [
            StrategyCode::Coded,
            StrategyCode::Tracked,
            StrategyCode::Untracked,
        ] {
            assert_eq!(code.as_str().parse::<StrategyCode>(), Ok(code));
        }
        assert!("kisi".parse::<StrategyCode>().is_err());
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            SubmissionStatus::Pending,
            SubmissionStatus::Approved,
            SubmissionStatus::Retry,
        ] {
            assert_eq!(s.as_str().parse::<SubmissionStatus>(), Ok(s));
        }
    }
}
