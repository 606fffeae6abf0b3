//! UDP discovery beacon.
//!
//! A dedicated thread broadcasts the announcement datagram on a fixed
//! period until silenced. The payload is `"VP "` followed by the primary
//! MAC as `aa:bb:cc:dd:ee:ff`, 20 bytes total, so orchestration software
//! can enumerate instruments on the LAN.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

/// Default broadcast period.
pub const PUBLISH_PERIOD: Duration = Duration::from_millis(5000);

/// Build the 20-byte announcement payload for a MAC string.
pub fn announcement(mac: &str) -> Vec<u8> {
    format!("VP {mac}").into_bytes()
}

enum BeaconCmd {
    Silence,
    Terminate,
}

/// Handle to the beacon thread.
pub struct Announcer {
    commands: Sender<BeaconCmd>,
    worker: Option<JoinHandle<()>>,
}

impl Announcer {
    /// Start broadcasting `payload` to the given UDP broadcast port every
    /// `period`.
    pub fn start(port: u16, payload: Vec<u8>, period: Duration) -> io::Result<Self> {
        Self::start_to(SocketAddr::from((Ipv4Addr::BROADCAST, port)), payload, period)
    }

    /// Start broadcasting to an explicit target address.
    pub fn start_to(
        target: SocketAddr,
        payload: Vec<u8>,
        period: Duration,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("beacon".into())
            .spawn(move || {
                info!("beacon: publishing {} bytes to {target}", payload.len());
                let mut silenced = false;
                if let Err(e) = socket.send_to(&payload, target) {
                    debug!("beacon: send failed: {e}");
                }
                loop {
                    match rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !silenced {
                                if let Err(e) = socket.send_to(&payload, target) {
                                    debug!("beacon: send failed: {e}");
                                }
                            }
                        }
                        Ok(BeaconCmd::Silence) => {
                            info!("beacon: silenced");
                            silenced = true;
                        }
                        Ok(BeaconCmd::Terminate) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self {
            commands: tx,
            worker: Some(worker),
        })
    }

    /// Stop publishing without tearing the thread down.
    pub fn silence(&self) {
        let _ = self.commands.send(BeaconCmd::Silence);
    }
}

impl Drop for Announcer {
    fn drop(&mut self) {
        let _ = self.commands.send(BeaconCmd::Terminate);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("beacon: worker panicked");
            }
        }
    }
}
