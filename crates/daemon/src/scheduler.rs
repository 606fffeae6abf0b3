//! The track scheduler: a fixed-period tick loop.
//!
//! Each tick, in order: service at most one command from the control
//! channel, service at most one request from the socket (within a small
//! poll budget), then wake the script host's waiting tracks by one tick
//! interval. Afterwards the loop sleeps until the next tick boundary;
//! there is no catch-up when a tick overruns, the boundary just advances.
//!
//! The scheduler is single-threaded by design: every peripheral is touched
//! only from this loop, so the drivers carry no synchronization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::protocol::{Reply, Request};
use crate::script::{Bindings, ScriptHost};
use crate::server::RequestSocket;

/// Tick period of the loop.
pub const TICK_INTERVAL: Duration = Duration::from_millis(5);

/// Poll budget spent on the socket each tick.
const POLL_BUDGET: Duration = Duration::from_millis(1);

/// Control-channel commands (the actor pipe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enable debug-level request logging.
    Verbose,
    /// Re-spawn the script state, abandoning suspended tracks.
    Recreate,
    /// Leave the loop after the current tick.
    Term,
}

/// The scheduler: script host, request socket and control channel.
pub struct TrackScheduler<B: Bindings> {
    host: ScriptHost<B>,
    socket: Option<RequestSocket>,
    commands: Receiver<Command>,
    interrupted: Arc<AtomicBool>,
    verbose: bool,
    terminated: bool,
}

impl<B: Bindings> TrackScheduler<B> {
    /// Build the scheduler around a script host. The socket is not bound
    /// until [`configure`](Self::configure).
    pub fn new(
        host: ScriptHost<B>,
        commands: Receiver<Command>,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            host,
            socket: None,
            commands,
            interrupted,
            verbose: false,
            terminated: false,
        }
    }

    /// Bind the request socket. Returns the actual port (useful with
    /// port 0).
    pub fn configure(&mut self, port: u16) -> std::io::Result<u16> {
        let socket = RequestSocket::bind(port)?;
        let port = socket.local_port()?;
        self.socket = Some(socket);
        Ok(port)
    }

    /// Run the tick loop until terminated or interrupted.
    pub fn run(&mut self) {
        let mut next_tick = Instant::now();
        while !self.terminated && !self.interrupted.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= next_tick {
                next_tick += TICK_INTERVAL;
                self.handle_command();
                self.handle_request();
                self.host
                    .wake_waiting_tracks(TICK_INTERVAL.as_millis() as u64);
            } else {
                thread::sleep(next_tick - now);
            }
        }
        info!("scheduler loop finished");
    }

    fn handle_command(&mut self) {
        match self.commands.try_recv() {
            Ok(Command::Verbose) => {
                info!("verbose request logging enabled");
                self.verbose = true;
            }
            Ok(Command::Recreate) => {
                if let Err(e) = self.host.recreate() {
                    warn!("recreating script state failed: {e}");
                }
            }
            Ok(Command::Term) => self.terminated = true,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }
    }

    fn handle_request(&mut self) {
        let line = match self.socket.as_mut() {
            Some(socket) => socket.poll(POLL_BUDGET),
            None => return,
        };
        let Some(line) = line else { return };
        if self.verbose {
            debug!("request: {line}");
        }
        let reply = self.dispatch(&line);
        let json = serde_json::to_string(&reply)
            .unwrap_or_else(|_| r#"{"status":"error","errormsg":"encode failed","results":{}}"#.into());
        if self.verbose {
            debug!("reply: {json}");
        }
        if let Some(socket) = self.socket.as_mut() {
            socket.send_reply(&json);
        }
    }

    fn dispatch(&mut self, line: &str) -> Reply {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => return Reply::error(format!("malformed request: {e}")),
        };
        match request.command.as_str() {
            "run" => self.host.run_chunk(&request.code, false),
            "run_coop" => self.host.run_chunk(&request.code, true),
            "recreate" => match self.host.recreate() {
                Ok(()) => Reply::ok(Default::default()),
                Err(e) => Reply::error(e.to_string()),
            },
            other => Reply::error(format!("invalid command: {other}")),
        }
    }
}
