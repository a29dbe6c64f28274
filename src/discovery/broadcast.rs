//! Broadcast listener: legacy CUPS browse protocol over UDP.

use std::net::SocketAddr;

use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::allow::AllowListMatcher;
use crate::daemon::DaemonEvent;
use crate::intake::IntakeEvent;

/// Delete bit in the legacy browse packet's type field; a set bit means the
/// packet announces a removal, which this daemon ignores — removal here is
/// timeout-driven, not event-driven.
pub const CUPS_PRINTER_DELETE: u32 = 0x4;

/// Remote-printer bit: set on every packet this daemon itself emits, since
/// every queue it broadcasts is a remote/shared one, never a delete.
pub const CUPS_PRINTER_REMOTE: u32 = 0x2;

/// Bind with `SO_REUSEADDR` so a daemon restart doesn't have to wait out a
/// lingering socket from the previous process; `socket2` is the idiomatic
/// way to reach that option before handing the socket to tokio.
fn bind_reuseaddr(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

pub async fn run(port: u16, allow: AllowListMatcher, tx: UnboundedSender<DaemonEvent>) -> std::io::Result<()> {
    let socket = UdpSocket::from_std(bind_reuseaddr(port)?)?;
    tracing::info!(port, "broadcast listener bound");

    let mut buf = vec![0u8; 4096];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "broadcast socket recv error; continuing");
                continue;
            }
        };

        if !allow.allowed(src.ip()) {
            debug!(source = %src, "dropping browse packet from disallowed source");
            continue;
        }

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            debug!(source = %src, "dropping non-utf8 browse packet");
            continue;
        };

        match parse_browse_packet(text) {
            Some(parsed) if parsed.ptype & CUPS_PRINTER_DELETE != 0 => {
                debug!(source = %src, "ignoring delete-type browse packet");
            }
            Some(parsed) => {
                let _ = tx.send(DaemonEvent::Intake(IntakeEvent::Broadcast { uri: parsed.uri }));
            }
            None => {
                debug!(source = %src, "dropping malformed browse packet");
            }
        }
    }
}

struct ParsedPacket {
    ptype: u32,
    #[allow(dead_code)]
    state: u32,
    uri: String,
}

/// Parse `"%x %x %s \"%s\" \"%s\" \"%s\" lease-duration=%d ..."`. Only the
/// first three whitespace-separated fields are required; the rest are best
/// effort ("missing the trailing quoted fields is still accepted").
fn parse_browse_packet(text: &str) -> Option<ParsedPacket> {
    let mut fields = text.trim().splitn(3, ' ');
    let ptype = u32::from_str_radix(fields.next()?, 16).ok()?;
    let state = u32::from_str_radix(fields.next()?, 16).ok()?;
    let uri = fields.next()?.split_whitespace().next()?.to_string();
    Some(ParsedPacket { ptype, state, uri })
}
