//! Measurement/stimulation daemon.
//!
//! A remote client speaks line-delimited JSON over a request/reply TCP
//! socket; each request carries a chunk of Lua which runs inside the
//! sandboxed [`script::ScriptHost`] against the board peripherals. Chunks
//! submitted for cooperative execution become tracks: coroutines that
//! suspend in `wait(ms)` and are resumed from the fixed-period
//! [`scheduler::TrackScheduler`] tick. A UDP [`beacon::Announcer`]
//! broadcasts the instrument's presence so orchestration software can find
//! it on the LAN.

pub mod beacon;
pub mod bindings;
pub mod config;
pub mod netinfo;
pub mod protocol;
pub mod scheduler;
pub mod script;
pub mod server;
