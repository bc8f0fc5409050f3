//! Port selection and listener binding for servers

use crate::random::RandomSource;
use discovery_core::ServiceRecord;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use tokio::net::TcpListener;
use tracing::debug;

/// Ports handed out when a service has no existing registration
pub const PORT_RANGE: RangeInclusive<u16> = 50000..=50999;

const LISTEN_BACKLOG: i32 = 1024;

/// Port of an existing local registration for `name`, compared case-insensitively
pub fn find_existing_port(records: &[ServiceRecord], name: &str) -> Option<u16> {
    let port = records
        .iter()
        .find(|record| record.matches(name))
        .map(|record| record.node.port);
    if let Some(port) = port {
        debug!("Found existing port {} for {}", port, name);
    }
    port
}

/// Uniformly chosen port within `range`
pub fn random_port(rng: &RandomSource, range: &RangeInclusive<u16>) -> Option<u16> {
    let port = rng.in_range(range)?;
    debug!("Chose random port {}", port);
    Some(port)
}

/// Bind a listener on all interfaces.
///
/// `SO_REUSEADDR` lets a restarted process take back a port whose previous
/// connections are still in TIME_WAIT.
pub fn bind_listener(port: u16) -> io::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_core::Node;

    #[test]
    fn test_random_port_stays_in_range() {
        let rng = RandomSource::seeded(2024);
        for _ in 0..10_000 {
            let port = random_port(&rng, &PORT_RANGE).unwrap();
            assert!((50000..=50999).contains(&port), "port {} out of range", port);
        }
    }

    #[test]
    fn test_random_port_covers_both_ends() {
        let rng = RandomSource::seeded(9);
        let range = 50000..=50001;
        let mut seen = [false; 2];
        for _ in 0..200 {
            let port = random_port(&rng, &range).unwrap();
            seen[(port - 50000) as usize] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn test_find_existing_port_case_insensitive() {
        let records = vec![
            ServiceRecord::new("other", Node::new("", 50001)),
            ServiceRecord::new("Svc-B", Node::new("", 50042)),
        ];
        assert_eq!(find_existing_port(&records, "svc-b"), Some(50042));
        assert_eq!(find_existing_port(&records, "svc-z"), None);
    }

    #[tokio::test]
    async fn test_bind_listener_ephemeral() {
        let listener = bind_listener(0).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_listener_port_in_use() {
        let first = bind_listener(0).unwrap();
        let port = first.local_addr().unwrap().port();
        assert!(bind_listener(port).is_err());
    }
}
