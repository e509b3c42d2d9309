//! Pluggable load-balance strategies.
//!
//! A strategy picks one usable server from a backend's list. Strategies
//! are consulted at stream setup only; they keep whatever cursor state
//! they need between picks.

use crate::topology::Server;
use rand::Rng;

/// Server selection policy.
pub trait Balance {
    fn name(&self) -> &'static str;

    /// Index of the chosen server, or `None` when no server is usable.
    fn pick(&mut self, servers: &[Server]) -> Option<usize>;
}

/// Rotate over usable servers, weight-blind.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balance for RoundRobin {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    fn pick(&mut self, servers: &[Server]) -> Option<usize> {
        if servers.is_empty() {
            return None;
        }
        for step in 0..servers.len() {
            let idx = (self.cursor + step) % servers.len();
            if servers[idx].is_usable() {
                self.cursor = idx + 1;
                return Some(idx);
            }
        }
        None
    }
}

/// Uniformly random usable server.
#[derive(Debug, Default)]
pub struct Random;

impl Balance for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    fn pick(&mut self, servers: &[Server]) -> Option<usize> {
        let usable: Vec<usize> = servers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_usable())
            .map(|(i, _)| i)
            .collect();
        if usable.is_empty() {
            return None;
        }
        let choice = rand::thread_rng().gen_range(0..usable.len());
        Some(usable[choice])
    }
}

/// The usable server with the fewest active sessions.
#[derive(Debug, Default)]
pub struct LeastConn;

impl Balance for LeastConn {
    fn name(&self) -> &'static str {
        "leastconn"
    }

    fn pick(&mut self, servers: &[Server]) -> Option<usize> {
        servers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_usable())
            .min_by_key(|(_, s)| s.served)
            .map(|(i, _)| i)
    }
}
