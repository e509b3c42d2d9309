//! Admin command plumbing.
//!
//! A thin CLI surface over the proxy loop: commands arrive on a flume
//! channel together with a one-shot reply sender, the loop executes them
//! between scheduler iterations and answers with text plus a binary exit
//! code (0 on success, 1 on syntax error).

use flume::{Receiver, Sender};

/// Parsed admin commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCmd {
    /// Per-server counters.
    ShowStat,
    /// Per-stream state.
    ShowSess,
    /// Administratively disable `backend/server`.
    DisableServer { backend: String, server: String },
    /// Re-enable `backend/server`.
    EnableServer { backend: String, server: String },
}

/// Command execution result.
#[derive(Debug, Clone)]
pub struct AdminReply {
    pub exit_code: i32,
    pub output: String,
}

impl AdminReply {
    #[must_use]
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    #[must_use]
    pub fn syntax_error(output: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            output: output.into(),
        }
    }
}

/// Parse one command line.
///
/// Unknown or malformed commands are syntax errors; a well-formed command
/// naming an unknown server is *not* (the reply carries a diagnostic and
/// exit code 0), so scripted sequences keep running.
pub fn parse_command(line: &str) -> Result<AdminCmd, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["show", "stat"] => Ok(AdminCmd::ShowStat),
        ["show", "sess"] => Ok(AdminCmd::ShowSess),
        ["disable", "server", target] | ["enable", "server", target] => {
            let (backend, server) = target
                .split_once('/')
                .ok_or_else(|| format!("expected backend/server, got '{target}'"))?;
            if backend.is_empty() || server.is_empty() {
                return Err(format!("expected backend/server, got '{target}'"));
            }
            let cmd = if words[0] == "disable" {
                AdminCmd::DisableServer {
                    backend: backend.to_string(),
                    server: server.to_string(),
                }
            } else {
                AdminCmd::EnableServer {
                    backend: backend.to_string(),
                    server: server.to_string(),
                }
            };
            Ok(cmd)
        }
        [] => Err("empty command".to_string()),
        _ => Err(format!("unknown command '{line}'")),
    }
}

/// Caller-side handle: submit lines, read replies.
#[derive(Clone)]
pub struct AdminHandle {
    tx: Sender<(AdminCmd, Sender<AdminReply>)>,
}

impl AdminHandle {
    /// Parse and submit one command line.
    ///
    /// Syntax errors are answered locally without touching the proxy loop.
    pub fn submit(&self, line: &str) -> Receiver<AdminReply> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        match parse_command(line) {
            Ok(cmd) => {
                if self.tx.send((cmd, reply_tx.clone())).is_err() {
                    let _ = reply_tx.send(AdminReply::syntax_error("proxy loop is gone"));
                }
            }
            Err(msg) => {
                let _ = reply_tx.send(AdminReply::syntax_error(msg));
            }
        }
        reply_rx
    }
}

/// Loop-side receiver endpoint.
pub struct AdminQueue {
    rx: Receiver<(AdminCmd, Sender<AdminReply>)>,
}

impl AdminQueue {
    /// Drain pending commands without blocking.
    pub fn drain(&self) -> Vec<(AdminCmd, Sender<AdminReply>)> {
        self.rx.try_iter().collect()
    }
}

/// Build a connected handle/queue pair.
#[must_use]
pub fn admin_channel() -> (AdminHandle, AdminQueue) {
    let (tx, rx) = flume::unbounded();
    (AdminHandle { tx }, AdminQueue { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_four_commands() {
        assert_eq!(parse_command("show stat"), Ok(AdminCmd::ShowStat));
        assert_eq!(parse_command("show sess"), Ok(AdminCmd::ShowSess));
        assert_eq!(
            parse_command("disable server web/a"),
            Ok(AdminCmd::DisableServer {
                backend: "web".into(),
                server: "a".into()
            })
        );
        assert_eq!(
            parse_command("enable server web/a"),
            Ok(AdminCmd::EnableServer {
                backend: "web".into(),
                server: "a".into()
            })
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_command("").is_err());
        assert!(parse_command("show").is_err());
        assert!(parse_command("disable server web-a").is_err());
        assert!(parse_command("disable server /a").is_err());
        assert!(parse_command("reload everything").is_err());
    }

    #[test]
    fn syntax_errors_answer_locally_with_exit_code_one() {
        let (handle, queue) = admin_channel();
        let reply = handle.submit("bogus command").recv().unwrap();
        assert_eq!(reply.exit_code, 1);
        assert!(queue.drain().is_empty(), "nothing reached the loop");
    }

    #[test]
    fn valid_commands_reach_the_queue() {
        let (handle, queue) = admin_channel();
        let _pending = handle.submit("show stat");
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, AdminCmd::ShowStat);
    }
}
