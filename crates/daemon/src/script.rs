//! Sandboxed embedded-script host.
//!
//! The host owns one Lua interpreter generation at a time. A fresh
//! generation gets the wait-support module plus whatever script-visible
//! objects the [`Bindings`] value installs; `recreate` swaps the whole
//! generation out, abandoning any suspended tracks.
//!
//! A chunk executes either synchronously in the main state (`run`) or as a
//! new cooperative track (`run_coop`) which may suspend in `wait(ms)`.
//! Either way the reply snapshots the global `results` table as a
//! string-to-string JSON object.

use mlua::{Function, Lua, Value};
use serde_json::Map;
use tracing::{debug, warn};

use crate::protocol::Reply;

/// Wait/track support module, compiled into the binary.
const WAIT_SUPPORT: &str = include_str!("wait_support.lua");

/// Installs the script-visible objects into a fresh interpreter.
///
/// The daemon installs the real peripherals; tests install mock-backed
/// ones or nothing at all.
pub trait Bindings {
    /// Called once per interpreter generation.
    fn install(&self, lua: &Lua) -> mlua::Result<()>;
}

/// Bindings that install nothing. Chunks still get the full standard
/// library and the wait-support module.
pub struct NoBindings;

impl Bindings for NoBindings {
    fn install(&self, _lua: &Lua) -> mlua::Result<()> {
        Ok(())
    }
}

/// The interpreter plus its binding set.
pub struct ScriptHost<B: Bindings> {
    lua: Lua,
    bindings: B,
}

impl<B: Bindings> ScriptHost<B> {
    /// Build the host with its first interpreter generation.
    pub fn new(bindings: B) -> mlua::Result<Self> {
        let mut host = Self {
            lua: Lua::new(),
            bindings,
        };
        host.spawn_state()?;
        Ok(host)
    }

    /// Drop the current interpreter and build a fresh one: new state,
    /// wait-support reloaded, peripherals re-bound. Suspended tracks are
    /// abandoned, not migrated.
    pub fn recreate(&mut self) -> mlua::Result<()> {
        self.lua = Lua::new();
        self.spawn_state()
    }

    fn spawn_state(&mut self) -> mlua::Result<()> {
        self.lua
            .load(WAIT_SUPPORT)
            .set_name("wait_support")
            .exec()?;
        self.bindings.install(&self.lua)?;
        Ok(())
    }

    /// Execute one chunk and build its reply.
    ///
    /// A cooperative chunk runs up to its first `wait`; the reply carries
    /// the `results` snapshot as of that suspension and the track keeps
    /// running from the scheduler tick afterwards.
    pub fn run_chunk(&mut self, code: &str, coop: bool) -> Reply {
        let outcome = if coop {
            self.start_track(code)
        } else {
            self.lua.load(code).set_name("chunk").exec()
        };
        match outcome {
            Ok(()) => Reply::ok(self.collect_results()),
            Err(e) => Reply::error(e.to_string()),
        }
    }

    fn start_track(&mut self, code: &str) -> mlua::Result<()> {
        let chunk: Function = self.lua.load(code).set_name("track").into_function()?;
        let start: Function = self.lua.globals().get("startTrack")?;
        start.call::<()>(chunk)
    }

    /// Advance every suspended track by `interval_ms` and resume the due
    /// ones. Returns the error messages raised inside resumed tracks;
    /// there is no request left to answer for those, so the caller logs
    /// them.
    pub fn wake_waiting_tracks(&mut self, interval_ms: u64) -> Vec<String> {
        let wake: Function = match self.lua.globals().get("wakeUpWaitingThreads") {
            Ok(f) => f,
            Err(e) => {
                warn!("wait support missing from script state: {e}");
                return Vec::new();
            }
        };
        match wake.call::<Vec<String>>(interval_ms) {
            Ok(errors) => {
                for msg in &errors {
                    warn!("track failed: {msg}");
                }
                errors
            }
            Err(e) => {
                warn!("waking tracks failed: {e}");
                Vec::new()
            }
        }
    }

    /// Number of tracks currently suspended in the script state.
    pub fn waiting_tracks(&self) -> usize {
        let count: mlua::Result<Function> = self.lua.globals().get("waitingTrackCount");
        count
            .and_then(|f| f.call::<usize>(()))
            .unwrap_or_default()
    }

    /// Snapshot the global `results` table as string keys and values.
    /// Entries that coerce to neither are skipped, like the wire encoder
    /// has always done.
    fn collect_results(&self) -> Map<String, serde_json::Value> {
        let mut results = Map::new();
        let Ok(Value::Table(table)) = self.lua.globals().get::<Value>("results") else {
            debug!("no results table in script state");
            return results;
        };
        for pair in table.pairs::<Value, Value>() {
            let Ok((key, value)) = pair else { continue };
            let (Some(key), Some(value)) = (coerce_string(&key), coerce_string(&value)) else {
                continue;
            };
            results.insert(key, serde_json::Value::String(value));
        }
        results
    }
}

/// Lua string coercion: strings and numbers convert, everything else is
/// `None`.
fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string_lossy().to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
