use super::buffer::ReusePolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_N_BYTES: usize = 115_000_000;
pub const DEFAULT_N_ITER: usize = 20;
pub const DEFAULT_ADDRESS: &str = "10.0.0.4";
pub const DEFAULT_PORT: u16 = 12341;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "sender"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sender" | "client" => Ok(Role::Sender),
            "receiver" | "server" => Ok(Role::Receiver),
            other => Err(Error::configuration(format!(
                "unknown role '{}', expected sender or receiver",
                other
            ))),
        }
    }
}

/// Settings for one benchmark run. Both roles must agree on `n_bytes` and
/// `n_iter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Payload size of every transfer.
    pub n_bytes: usize,
    pub n_iter: usize,
    /// Reuse one buffer for all iterations instead of allocating per iteration.
    pub reuse_alloc: bool,
    /// Receiver address, dialed by the sender.
    pub address: String,
    /// Receiver port. 0 lets the receiver pick an ephemeral port.
    pub port: u16,
    pub role: Role,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            n_bytes: DEFAULT_N_BYTES,
            n_iter: DEFAULT_N_ITER,
            reuse_alloc: true,
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            role: Role::Receiver,
        }
    }
}

impl BenchConfig {
    /// Loads a JSON config. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::configuration(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    pub fn reuse_policy(&self) -> ReusePolicy {
        ReusePolicy::from_flag(self.reuse_alloc)
    }

    /// Rejects settings no transfer could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.n_bytes == 0 {
            return Err(Error::configuration("n_bytes must be positive"));
        }
        if self.n_iter == 0 {
            return Err(Error::configuration("n_iter must be positive"));
        }
        if self.address.trim().is_empty() {
            return Err(Error::configuration("address must not be empty"));
        }
        if self.role == Role::Sender && self.port == 0 {
            return Err(Error::configuration(
                "sender needs the receiver's bound port, got 0",
            ));
        }
        Ok(())
    }

    pub fn plan(&self) -> Result<TransferPlan> {
        self.validate()?;
        Ok(TransferPlan {
            n_bytes: self.n_bytes,
            n_iter: self.n_iter,
            policy: self.reuse_policy(),
        })
    }
}

/// The validated part of a [`BenchConfig`] the transfer loops need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub n_bytes: usize,
    pub n_iter: usize,
    pub policy: ReusePolicy,
}
