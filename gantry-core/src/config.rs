//! Core configuration and buffer sizing
//!
//! This module provides the tunable constants used across the forwarding
//! kernel. Tuning these values can significantly impact throughput and
//! memory footprint based on workload.

use std::time::Duration;

/// Default channel buffer size (16KB)
///
/// One buffer backs each direction of a stream. Tune based on expected
/// traffic profile:
/// - Interactive protocols (< 1KB exchanges): 4096 bytes sufficient
/// - General proxying: 16384 bytes (default)
/// - Bulk transfer: 32768 or 65536 bytes
pub const DEFAULT_BUF_SIZE: usize = 16384;

/// Small channel buffer size (4KB)
///
/// Optimized for request/response exchanges with small payloads.
pub const SMALL_BUF_SIZE: usize = 4096;

/// Upper bound on a single forwarding credit grant (2GB)
///
/// `Channel::forward` saturates its pending-credit counter at this value
/// rather than overflowing.
pub const FORWARD_MAX: u32 = 0x7FFF_FFFF;

/// Default number of buffers kept in the shared buffer pool.
pub const DEFAULT_BUF_POOL_QUOTA: usize = 64;

/// Per-stream buffer allocation quota.
///
/// An applet asking for a buffer beyond this quota parks on the
/// buffer-wait list instead of allocating.
pub const STREAM_BUF_QUOTA: usize = 2;

/// Default client/server inactivity timeouts.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default backend connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffer configuration for one stream (both directions).
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Request channel buffer size
    pub req_buf_size: usize,
    /// Response channel buffer size
    pub res_buf_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            req_buf_size: DEFAULT_BUF_SIZE,
            res_buf_size: DEFAULT_BUF_SIZE,
        }
    }
}

impl BufferConfig {
    /// Configuration optimized for small request/response exchanges.
    #[must_use]
    pub const fn small() -> Self {
        Self {
            req_buf_size: SMALL_BUF_SIZE,
            res_buf_size: SMALL_BUF_SIZE,
        }
    }

    /// Custom buffer configuration
    #[must_use]
    pub const fn custom(req_buf_size: usize, res_buf_size: usize) -> Self {
        Self {
            req_buf_size,
            res_buf_size,
        }
    }
}
