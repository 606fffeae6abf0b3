//! Request/reply socket.
//!
//! Line-delimited JSON over TCP with strict reply-socket discipline: one
//! client conversation at a time, one reply per request, and no new
//! request is accepted while a reply is owed. The socket is non-blocking;
//! the scheduler polls it with a small time budget each tick.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Sleep quantum inside the poll budget.
const POLL_NAP: Duration = Duration::from_micros(200);

struct ClientConn {
    stream: TcpStream,
    buf: Vec<u8>,
}

/// The listening socket plus the active client conversation.
pub struct RequestSocket {
    listener: TcpListener,
    client: Option<ClientConn>,
    awaiting_reply: bool,
}

impl RequestSocket {
    /// Bind on all interfaces. Port 0 picks an ephemeral port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            client: None,
            awaiting_reply: false,
        })
    }

    /// The bound port.
    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Poll for one complete request line, spending at most `budget`.
    ///
    /// Returns `None` when no complete request arrived inside the budget
    /// or while a reply is still owed for the previous one.
    pub fn poll(&mut self, budget: Duration) -> Option<String> {
        if self.awaiting_reply {
            return None;
        }
        let deadline = Instant::now() + budget;
        loop {
            self.accept_client();
            self.pump_client();
            if let Some(line) = self.take_line() {
                self.awaiting_reply = true;
                return Some(line);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_NAP);
        }
    }

    /// Send the reply line for the request returned by the last
    /// [`poll`](Self::poll).
    pub fn send_reply(&mut self, line: &str) {
        self.awaiting_reply = false;
        let sent = match self.client.as_mut() {
            None => {
                warn!("reply with no client conversation");
                return;
            }
            Some(client) => {
                let mut payload = line.as_bytes().to_vec();
                payload.push(b'\n');
                match client.stream.write_all(&payload) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("reply send failed, dropping client: {e}");
                        false
                    }
                }
            }
        };
        if !sent {
            self.client = None;
        }
    }

    fn accept_client(&mut self) {
        if self.client.is_some() {
            return;
        }
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!("client connected from {peer}");
                if stream.set_nonblocking(true).is_err() {
                    return;
                }
                self.client = Some(ClientConn {
                    stream,
                    buf: Vec::new(),
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => warn!("accept failed: {e}"),
        }
    }

    fn pump_client(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        let mut chunk = [0u8; 1024];
        let mut drop_client = false;
        loop {
            match client.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("client disconnected");
                    drop_client = true;
                    break;
                }
                Ok(n) => client.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("client read failed: {e}");
                    drop_client = true;
                    break;
                }
            }
        }
        if drop_client {
            self.client = None;
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let client = self.client.as_mut()?;
        let newline = client.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = client.buf.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}
