use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper_util::client::legacy::connect::dns::Name;
use tower_service::Service;

use crate::options::AddressFamily;

/// Raised by [`GuardedResolver`] when a host resolves into a non-public
/// range. Travels inside `std::io::Error` through the connector.
#[derive(Debug)]
pub(crate) struct BlockedAddress {
    pub(crate) host: String,
    pub(crate) address: IpAddr,
    pub(crate) range: &'static str,
}

impl std::fmt::Display for BlockedAddress {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "Domain {} resolves to a non-public ({}) IP address {}",
            self.host, self.range, self.address
        )
    }
}

impl std::error::Error for BlockedAddress {}

/// DNS resolver for the connection agent: keeps addresses of the configured
/// family and refuses hosts that resolve to internal ranges.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GuardedResolver {
    family: AddressFamily,
    allow_internal_ips: bool,
}

impl GuardedResolver {
    pub(crate) fn new(family: AddressFamily, allow_internal_ips: bool) -> Self {
        Self {
            family,
            allow_internal_ips,
        }
    }

    fn select(
        self,
        host: &str,
        addresses: impl Iterator<Item = SocketAddr>,
    ) -> std::io::Result<std::vec::IntoIter<SocketAddr>> {
        let selected = addresses
            .filter(|address| self.family.admits(address.ip()))
            .collect::<Vec<_>>();
        if selected.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no {} address found for {host}", self.family),
            ));
        }
        if !self.allow_internal_ips {
            for address in &selected {
                if let Some(range) = internal_range(address.ip()) {
                    return Err(std::io::Error::other(BlockedAddress {
                        host: host.to_owned(),
                        address: address.ip(),
                        range,
                    }));
                }
            }
        }
        Ok(selected.into_iter())
    }
}

impl Service<Name> for GuardedResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let resolver = *self;
        Box::pin(async move {
            let host = name.as_str().to_owned();
            let addresses = tokio::net::lookup_host((host.as_str(), 0)).await?;
            resolver.select(&host, addresses)
        })
    }
}

/// Walks an error chain looking for a [`BlockedAddress`].
pub(crate) fn find_blocked_address<'a>(
    error: &'a (dyn std::error::Error + 'static),
) -> Option<&'a BlockedAddress> {
    let mut current = Some(error);
    while let Some(item) = current {
        if let Some(blocked) = item.downcast_ref::<BlockedAddress>() {
            return Some(blocked);
        }
        if let Some(io_error) = item.downcast_ref::<std::io::Error>()
            && let Some(inner) = io_error.get_ref()
            && let Some(blocked) = inner.downcast_ref::<BlockedAddress>()
        {
            return Some(blocked);
        }
        current = item.source();
    }
    None
}

/// Names the non-public range `address` belongs to, if any.
pub(crate) fn internal_range(address: IpAddr) -> Option<&'static str> {
    match address {
        IpAddr::V4(address) => internal_range_v4(address),
        IpAddr::V6(address) => internal_range_v6(address),
    }
}

fn internal_range_v4(address: Ipv4Addr) -> Option<&'static str> {
    let [first, second, ..] = address.octets();
    if address.is_unspecified() {
        Some("unspecified")
    } else if address.is_loopback() {
        Some("loopback")
    } else if address.is_private() {
        Some("private")
    } else if address.is_link_local() {
        Some("linkLocal")
    } else if first == 100 && (64..128).contains(&second) {
        Some("carrierGradeNat")
    } else if address.is_broadcast() {
        Some("broadcast")
    } else if address.is_multicast() {
        Some("multicast")
    } else if first >= 240 || first == 0 {
        Some("reserved")
    } else {
        None
    }
}

fn internal_range_v6(address: Ipv6Addr) -> Option<&'static str> {
    if let Some(mapped) = address.to_ipv4_mapped() {
        return internal_range_v4(mapped);
    }
    let first_segment = address.segments()[0];
    if address.is_unspecified() {
        Some("unspecified")
    } else if address.is_loopback() {
        Some("loopback")
    } else if (first_segment & 0xfe00) == 0xfc00 {
        Some("uniqueLocal")
    } else if (first_segment & 0xffc0) == 0xfe80 {
        Some("linkLocal")
    } else if address.is_multicast() {
        Some("multicast")
    } else {
        None
    }
}
