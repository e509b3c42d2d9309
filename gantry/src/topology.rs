//! Proxy topology: frontends, backends, servers.
//!
//! Configuration parsing lives outside this crate; callers build the
//! topology programmatically and hand it to the proxy loop. Runtime
//! changes arrive as admin orders (enable/disable server) and propagate
//! through tracking chains.

use hashbrown::HashMap;
use std::net::SocketAddr;
use tracing::info;

/// One backend server.
#[derive(Debug, Clone)]
pub struct Server {
    pub name: String,
    pub addr: SocketAddr,
    pub weight: u32,
    /// Administratively disabled via the CLI.
    pub admin_disabled: bool,
    /// Operational state, owned by external health checks.
    pub operational_up: bool,
    /// Connections currently routed here.
    pub served: u64,
    /// Total sessions ever routed here.
    pub cum_sessions: u64,
    /// Name of a server whose administrative state this one follows,
    /// as `backend/server`.
    pub track: Option<String>,
}

impl Server {
    #[must_use]
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            weight: 1,
            admin_disabled: false,
            operational_up: true,
            served: 0,
            cum_sessions: 0,
            track: None,
        }
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn tracking(mut self, target: impl Into<String>) -> Self {
        self.track = Some(target.into());
        self
    }

    /// Eligible to receive new sessions.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        !self.admin_disabled && self.operational_up && self.weight > 0
    }
}

/// A pool of servers sharing a balance policy.
#[derive(Debug, Default)]
pub struct Backend {
    pub name: String,
    pub servers: Vec<Server>,
}

impl Backend {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            servers: Vec::new(),
        }
    }

    #[must_use]
    pub fn server(mut self, server: Server) -> Self {
        self.servers.push(server);
        self
    }

    #[must_use]
    pub fn usable_count(&self) -> usize {
        self.servers.iter().filter(|s| s.is_usable()).count()
    }
}

/// One listening side of the proxy.
#[derive(Debug)]
pub struct Frontend {
    pub name: String,
    pub default_backend: String,
    /// A stopped frontend accepts nothing and drains its pools.
    pub stopped: bool,
}

impl Frontend {
    #[must_use]
    pub fn new(name: impl Into<String>, default_backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_backend: default_backend.into(),
            stopped: false,
        }
    }
}

/// The static topology plus its runtime state.
#[derive(Debug, Default)]
pub struct Topology {
    pub frontends: HashMap<String, Frontend>,
    pub backends: HashMap<String, Backend>,
}

impl Topology {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frontend(&mut self, frontend: Frontend) {
        self.frontends.insert(frontend.name.clone(), frontend);
    }

    pub fn add_backend(&mut self, backend: Backend) {
        self.backends.insert(backend.name.clone(), backend);
    }

    #[must_use]
    pub fn server(&self, backend: &str, name: &str) -> Option<&Server> {
        self.backends
            .get(backend)?
            .servers
            .iter()
            .find(|s| s.name == name)
    }

    /// Flip a server's administrative state, following tracking chains.
    ///
    /// Returns the `backend/server` identifiers whose state actually
    /// changed, in propagation order; one log line is emitted per change.
    pub fn set_server_admin_state(
        &mut self,
        backend: &str,
        name: &str,
        disabled: bool,
    ) -> Vec<String> {
        let root = format!("{backend}/{name}");
        if self.server(backend, name).is_none() {
            return Vec::new();
        }

        // Transitive closure of trackers over the whole topology.
        let mut affected = vec![root];
        let mut cursor = 0;
        while cursor < affected.len() {
            let target = affected[cursor].clone();
            cursor += 1;
            for (bname, bk) in &self.backends {
                for srv in &bk.servers {
                    if srv.track.as_deref() == Some(target.as_str()) {
                        let id = format!("{bname}/{}", srv.name);
                        if !affected.contains(&id) {
                            affected.push(id);
                        }
                    }
                }
            }
        }

        let mut changed = Vec::new();
        for id in affected {
            let (bname, sname) = id.split_once('/').expect("ids are built as backend/server");
            let Some(bk) = self.backends.get_mut(bname) else {
                continue;
            };
            let Some(srv) = bk.servers.iter_mut().find(|s| s.name == sname) else {
                continue;
            };
            if srv.admin_disabled != disabled {
                srv.admin_disabled = disabled;
                let state = if disabled { "disabled" } else { "enabled" };
                info!(
                    target: "gantry::admin",
                    server = %id,
                    state,
                    "server administrative state changed"
                );
                changed.push(id);
            }
        }
        changed
    }
}
