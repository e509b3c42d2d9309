//! The proxy loop: streams, scheduler, pools and admin orders.
//!
//! One `Proxy` owns everything a single worker thread touches: the
//! scheduler, the live streams, the shared buffer pool and the topology.
//! External collaborators (accept loops, health checks, the event
//! multiplexer) hand it work between iterations; nothing here blocks.

use crate::admin::{AdminCmd, AdminHandle, AdminQueue, AdminReply};
use crate::balance::Balance;
use crate::topology::Topology;
use gantry_core::buffer::Buffer;
use gantry_core::channel::{Channel, FORWARD_INFINITE};
use gantry_core::config::{DEFAULT_BUF_POOL_QUOTA, DEFAULT_BUF_SIZE};
use gantry_core::endpoint::Endpoint;
use gantry_core::error::CoreError;
use gantry_core::pool::Pool;
use gantry_core::sched::{Scheduler, TaskId, Tick};
use gantry_core::stream::Stream;
use hashbrown::HashMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(feature = "h2")]
use gantry_h2::H2Mux;

fn pool_buffer() -> Buffer {
    Buffer::with_capacity(DEFAULT_BUF_SIZE)
}

struct StreamEntry {
    stream: Stream,
    /// `backend/server` this stream was routed to, for accounting.
    route: Option<(String, String)>,
}

/// Single-threaded proxy worker.
pub struct Proxy {
    pub topology: Topology,
    balance: Box<dyn Balance>,
    sched: Scheduler,
    streams: HashMap<TaskId, StreamEntry>,
    buf_pool: Pool<Buffer>,
    admin: AdminQueue,
    admin_handle: AdminHandle,
    next_stream_id: u64,
    /// Total sessions ever created.
    cum_sessions: u64,
}

impl Proxy {
    #[must_use]
    pub fn new(topology: Topology, balance: Box<dyn Balance>) -> Self {
        let (admin_handle, admin) = crate::admin::admin_channel();
        Self {
            topology,
            balance,
            sched: Scheduler::new(),
            streams: HashMap::new(),
            buf_pool: Pool::new(
                "buffer",
                DEFAULT_BUF_POOL_QUOTA,
                Some(DEFAULT_BUF_POOL_QUOTA),
                pool_buffer,
            ),
            admin,
            admin_handle,
            next_stream_id: 1,
            cum_sessions: 0,
        }
    }

    /// Handle for submitting admin command lines from any thread.
    #[must_use]
    pub fn admin_handle(&self) -> AdminHandle {
        self.admin_handle.clone()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.streams.len()
    }

    // =========================
    // Session setup
    // =========================

    /// Wire a new stream skeleton with pool-backed buffers.
    ///
    /// When the pool is dry the channels start bufferless and the task
    /// parks on the pool's wait list; a release re-wakes it and buffers
    /// are attached before the next step.
    fn new_stream(&mut self, now: Tick) -> Result<Stream, CoreError> {
        let task = self.sched.create_task();
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        self.cum_sessions += 1;

        let mut req = Channel::bufferless();
        let mut res = Channel::bufferless();
        match self.buf_pool.get() {
            Ok(buf) => {
                req.attach_buffer(buf);
            }
            Err(_) => self.buf_pool.park(task),
        }
        match self.buf_pool.get() {
            Ok(buf) => {
                res.attach_buffer(buf);
            }
            Err(_) => self.buf_pool.park(task),
        }

        Ok(Stream::new(id, task, req, res, now))
    }

    /// Accept a Layer-4 pass-through session: client endpoint in, backend
    /// endpoint chosen by the balance policy and connected by the caller.
    pub fn accept_passthrough(
        &mut self,
        client: Box<dyn Endpoint>,
        backend_name: &str,
        back: Box<dyn Endpoint>,
        now: Tick,
    ) -> Result<TaskId, CoreError> {
        let server = self.route(backend_name)?;
        let mut stream = self.new_stream(now)?;
        stream.front.attach_accepted(client);

        stream.req.cto = Some(gantry_core::config::DEFAULT_CONNECT_TIMEOUT);
        let connect_exp = stream.req.cto.map(|d| now.advance(d));
        stream.back.attach_connecting(back, 0, connect_exp);

        // Pure byte forwarding: both directions free-run.
        stream.req.forward(FORWARD_INFINITE);
        stream.res.forward(FORWARD_INFINITE);
        stream.req.rto = Some(gantry_core::config::DEFAULT_READ_TIMEOUT);
        stream.req.arm_read_timeout(now);

        self.register(stream, Some((backend_name.to_string(), server)))
    }

    /// Accept an internally-terminated HTTP/2 session: the framing applet
    /// replaces the server socket.
    #[cfg(feature = "h2")]
    pub fn accept_h2(
        &mut self,
        client: Box<dyn Endpoint>,
        now: Tick,
    ) -> Result<TaskId, CoreError> {
        let mut stream = self.new_stream(now)?;
        stream.front.attach_accepted(client);
        stream.back.attach_applet(Box::new(H2Mux::new()));
        stream.req.forward(FORWARD_INFINITE);
        stream.res.forward(FORWARD_INFINITE);
        stream.req.rto = Some(gantry_core::config::DEFAULT_READ_TIMEOUT);
        stream.req.arm_read_timeout(now);

        self.register(stream, None)
    }

    fn route(&mut self, backend_name: &str) -> Result<String, CoreError> {
        let backend = self
            .topology
            .backends
            .get_mut(backend_name)
            .ok_or(CoreError::Resource("backend"))?;
        let idx = self
            .balance
            .pick(&backend.servers)
            .ok_or(CoreError::Resource("server"))?;
        let server = &mut backend.servers[idx];
        server.served += 1;
        server.cum_sessions += 1;
        Ok(server.name.clone())
    }

    fn register(
        &mut self,
        stream: Stream,
        route: Option<(String, String)>,
    ) -> Result<TaskId, CoreError> {
        let task = stream.task;
        debug!(
            target: "gantry::proxy",
            stream = stream.id,
            back = stream.back.attachment_name(),
            "session accepted"
        );
        self.sched.set_expire(task, stream.next_expiry());
        self.streams.insert(task, StreamEntry { stream, route });
        self.sched.wake(task);
        Ok(task)
    }

    /// Wake a stream whose I/O readiness changed (multiplexer callback).
    pub fn notify_io(&mut self, task: TaskId) {
        self.sched.wake(task);
    }

    // =========================
    // The loop
    // =========================

    /// Run one scheduler iteration at `now`. Returns the number of tasks
    /// stepped.
    pub fn run_once(&mut self, now: Tick) -> usize {
        self.execute_admin();

        let streams = &mut self.streams;
        let buf_pool = &mut self.buf_pool;
        let mut finished: Vec<TaskId> = Vec::new();

        let ran = self.sched.run_iteration(now, |sched, task| {
            let Some(entry) = streams.get_mut(&task) else {
                return;
            };

            // Late buffer attachment for streams that parked on the pool.
            if !entry.stream.req.has_buffer() {
                match buf_pool.get() {
                    Ok(buf) => {
                        entry.stream.req.attach_buffer(buf);
                    }
                    Err(_) => buf_pool.park(task),
                }
            }
            if !entry.stream.res.has_buffer() {
                match buf_pool.get() {
                    Ok(buf) => {
                        entry.stream.res.attach_buffer(buf);
                    }
                    Err(_) => buf_pool.park(task),
                }
            }

            let report = entry.stream.process(now);
            if report.finished {
                finished.push(task);
                return;
            }
            if report.progressed {
                sched.wake(task);
            }
            sched.set_expire(task, entry.stream.next_expiry());
        });

        for task in finished {
            self.reap(task);
        }
        ran
    }

    /// Timeout to hand to the event multiplexer.
    #[must_use]
    pub fn next_timeout(&self, now: Tick) -> Option<Duration> {
        self.sched.next_timeout(now)
    }

    fn reap(&mut self, task: TaskId) {
        let Some(mut entry) = self.streams.remove(&task) else {
            return;
        };
        self.sched.kill(task);

        info!(
            target: "gantry::proxy",
            stream = entry.stream.id,
            cause = ?entry.stream.termination(),
            bytes_in = entry.stream.bytes_in(),
            bytes_out = entry.stream.bytes_out(),
            "session closed"
        );

        if let Some((backend, server)) = &entry.route {
            if let Some(bk) = self.topology.backends.get_mut(backend) {
                if let Some(srv) = bk.servers.iter_mut().find(|s| &s.name == server) {
                    srv.served = srv.served.saturating_sub(1);
                }
            }
        }

        // Buffers go home; anyone parked on the pool gets another chance.
        let (req_buf, res_buf) = entry.stream.release_buffers();
        for buf in [req_buf, res_buf] {
            if buf.size() > 0 {
                for waiter in self.buf_pool.put(buf) {
                    self.sched.wake(waiter);
                }
            }
        }

        // A stopped frontend drains its pools as a courtesy.
        if self.topology.frontends.values().any(|f| f.stopped) && self.streams.is_empty() {
            self.buf_pool.flush();
        }
    }

    // =========================
    // Admin execution
    // =========================

    fn execute_admin(&mut self) {
        for (cmd, reply_tx) in self.admin.drain() {
            let reply = match cmd {
                AdminCmd::ShowStat => AdminReply::ok(self.render_stat()),
                AdminCmd::ShowSess => AdminReply::ok(self.render_sess()),
                AdminCmd::DisableServer { backend, server } => {
                    self.flip_server(&backend, &server, true)
                }
                AdminCmd::EnableServer { backend, server } => {
                    self.flip_server(&backend, &server, false)
                }
            };
            let _ = reply_tx.send(reply);
        }
    }

    fn flip_server(&mut self, backend: &str, server: &str, disabled: bool) -> AdminReply {
        if self.topology.server(backend, server).is_none() {
            return AdminReply::ok(format!("no such server {backend}/{server}"));
        }
        let changed = self
            .topology
            .set_server_admin_state(backend, server, disabled);
        if changed.is_empty() {
            AdminReply::ok("nothing to do")
        } else {
            AdminReply::ok(changed.join("\n"))
        }
    }

    fn render_stat(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# backend/server state served cum");
        let mut names: Vec<&String> = self.topology.backends.keys().collect();
        names.sort();
        for name in names {
            let bk = &self.topology.backends[name];
            for srv in &bk.servers {
                let state = if srv.admin_disabled {
                    "MAINT"
                } else if srv.operational_up {
                    "UP"
                } else {
                    "DOWN"
                };
                let _ = writeln!(
                    out,
                    "{}/{} {} {} {}",
                    name, srv.name, state, srv.served, srv.cum_sessions
                );
            }
        }
        let _ = writeln!(out, "# sessions active {} total {}", self.streams.len(), self.cum_sessions);
        out
    }

    fn render_sess(&self) -> String {
        let mut out = String::new();
        let mut entries: Vec<&StreamEntry> = self.streams.values().collect();
        entries.sort_by_key(|e| e.stream.id);
        for entry in entries {
            let route = entry
                .route
                .as_ref()
                .map_or_else(|| "-".to_string(), |(b, s)| format!("{b}/{s}"));
            let _ = writeln!(
                out,
                "sess {} front={:?} back={:?} route={} in={} out={}",
                entry.stream.id,
                entry.stream.front.state,
                entry.stream.back.state,
                route,
                entry.stream.bytes_in(),
                entry.stream.bytes_out(),
            );
        }
        if out.is_empty() {
            out.push_str("no active sessions\n");
        }
        out
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("sessions", &self.streams.len())
            .field("balance", &self.balance.name())
            .finish()
    }
}
