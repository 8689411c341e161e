//! Buffer provisioning for the transfer loops. The policy is picked once per
//! run; the loops only ever ask for the next buffer.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReusePolicy {
    /// One buffer serves every iteration, sequentially.
    Reuse,
    /// A new buffer per iteration.
    Fresh,
}

/// Initial buffer content. Content is never verified, it only has to be
/// real memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Zeroed,
    /// Byte `i` holds `i mod 256`.
    Ramp,
}

pub trait ProvisionBuffers: Send {
    fn buffer_len(&self) -> usize;

    /// Buffer for the next transfer. Exclusively borrowed for that transfer.
    fn next_buffer(&mut self) -> &mut [u8];

    /// Buffers allocated so far.
    fn allocations(&self) -> usize;
}

impl ReusePolicy {
    pub fn from_flag(reuse_alloc: bool) -> Self {
        if reuse_alloc {
            ReusePolicy::Reuse
        } else {
            ReusePolicy::Fresh
        }
    }

    /// Allocates the first buffer and checks its length before any
    /// transfer can use it.
    pub fn provision(self, n_bytes: usize, fill: Fill) -> Result<Box<dyn ProvisionBuffers>> {
        let provider: Box<dyn ProvisionBuffers> = match self {
            ReusePolicy::Reuse => Box::new(ReusedBuffer::new(n_bytes, fill)),
            ReusePolicy::Fresh => Box::new(FreshBuffers::new(n_bytes, fill)),
        };
        check_len(provider.buffer_len(), n_bytes)?;
        Ok(provider)
    }
}

pub fn check_len(actual: usize, n_bytes: usize) -> Result<()> {
    if actual != n_bytes {
        return Err(Error::configuration(format!(
            "buffer holds {} bytes, transfers need {}",
            actual, n_bytes
        )));
    }
    Ok(())
}

fn allocate(n_bytes: usize, fill: Fill) -> Vec<u8> {
    match fill {
        Fill::Zeroed => vec![0u8; n_bytes],
        Fill::Ramp => {
            let mut buf = vec![0u8; n_bytes];
            for (i, b) in buf.iter_mut().enumerate() {
                *b = i as u8;
            }
            buf
        }
    }
}

pub struct ReusedBuffer {
    buf: Vec<u8>,
}

impl ReusedBuffer {
    pub fn new(n_bytes: usize, fill: Fill) -> Self {
        Self {
            buf: allocate(n_bytes, fill),
        }
    }
}

impl ProvisionBuffers for ReusedBuffer {
    fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    fn next_buffer(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn allocations(&self) -> usize {
        1
    }
}

pub struct FreshBuffers {
    n_bytes: usize,
    fill: Fill,
    // Allocated up front so the length check runs before the first transfer.
    pending: Option<Vec<u8>>,
    current: Vec<u8>,
    allocations: usize,
}

impl FreshBuffers {
    pub fn new(n_bytes: usize, fill: Fill) -> Self {
        Self {
            n_bytes,
            fill,
            pending: Some(allocate(n_bytes, fill)),
            current: Vec::new(),
            allocations: 1,
        }
    }
}

impl ProvisionBuffers for FreshBuffers {
    fn buffer_len(&self) -> usize {
        self.pending.as_ref().map_or(self.n_bytes, Vec::len)
    }

    fn next_buffer(&mut self) -> &mut [u8] {
        self.current = match self.pending.take() {
            Some(buf) => buf,
            None => {
                self.allocations += 1;
                allocate(self.n_bytes, self.fill)
            }
        };
        &mut self.current
    }

    fn allocations(&self) -> usize {
        self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_hands_out_same_buffer() {
        let mut buffers = ReusePolicy::Reuse.provision(792, Fill::Zeroed).unwrap();
        let first = buffers.next_buffer().as_ptr();
        for _ in 0..20 {
            let buf = buffers.next_buffer();
            assert_eq!(buf.len(), 792);
            assert_eq!(buf.as_ptr(), first);
        }
        assert_eq!(buffers.allocations(), 1);
    }

    #[test]
    fn test_fresh_allocates_per_iteration() {
        let mut buffers = ReusePolicy::Fresh.provision(1024, Fill::Ramp).unwrap();
        assert_eq!(buffers.allocations(), 1);
        for i in 0..5 {
            let buf = buffers.next_buffer();
            assert_eq!(buf.len(), 1024);
            assert_eq!(buf[255], 255);
            assert_eq!(buf[256], 0);
            assert_eq!(buffers.allocations(), i + 1);
        }
    }

    #[test]
    fn test_stale_content_is_kept_under_reuse() {
        let mut buffers = ReusedBuffer::new(8, Fill::Zeroed);
        buffers.next_buffer()[0] = 9;
        assert_eq!(buffers.next_buffer()[0], 9);
    }

    #[test]
    fn test_length_mismatch_is_configuration_error() {
        assert!(check_len(792, 792).is_ok());
        assert!(matches!(check_len(0, 792), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_policy_from_flag() {
        assert_eq!(ReusePolicy::from_flag(true), ReusePolicy::Reuse);
        assert_eq!(ReusePolicy::from_flag(false), ReusePolicy::Fresh);
    }
}
