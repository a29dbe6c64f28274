//! The three discovery sources that feed the catalogue: mDNS/DNS-SD service
//! discovery, legacy UDP broadcast listening, and IPP subscription/poll
//! workers against configured upstream servers. Each runs as its own task
//! and forwards normalised events onto the daemon's event channel; none of
//! them touches the catalogue directly, since the catalogue is owned by
//! exactly one task.

pub mod broadcast;
pub mod mdns;
pub mod poll;

pub const IPP_SERVICE_TYPE: &str = "_ipp._tcp.local.";
pub const IPPS_SERVICE_TYPE: &str = "_ipps._tcp.local.";
