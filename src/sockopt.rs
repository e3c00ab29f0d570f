//! Connect-time TCP socket tuning.
//!
//! Options configured on a service are applied to each accepted or dialed
//! connection before its session spawns, the moment the raw `TcpStream` is
//! still in hand. Unset options leave the operating system defaults
//! untouched.

use std::{io, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Optional TCP socket options applied at connection establishment.
#[derive(Clone, Copy, Debug, Default)]
pub struct SocketOptions {
    pub(crate) no_delay: Option<bool>,
    pub(crate) keep_alive: Option<bool>,
    pub(crate) keep_alive_period: Option<Duration>,
    pub(crate) linger: Option<Duration>,
    pub(crate) read_buffer: Option<usize>,
    pub(crate) write_buffer: Option<usize>,
}

impl SocketOptions {
    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        if let Some(no_delay) = self.no_delay {
            stream.set_nodelay(no_delay)?;
        }
        let sock = SockRef::from(stream);
        if let Some(keep_alive) = self.keep_alive {
            if keep_alive {
                let mut params = TcpKeepalive::new();
                if let Some(period) = self.keep_alive_period {
                    params = params.with_time(period);
                }
                sock.set_tcp_keepalive(&params)?;
            } else {
                sock.set_keepalive(false)?;
            }
        }
        if let Some(linger) = self.linger {
            sock.set_linger(Some(linger))?;
        }
        if let Some(size) = self.read_buffer {
            sock.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.write_buffer {
            sock.set_send_buffer_size(size)?;
        }
        Ok(())
    }
}
