use std::net::Ipv4Addr;

/// True for `10/8`, `172.16/12`, `192.168/16`, `127/8`, link-local
/// (`169.254/16`), multicast (`224/4`), and reserved (`240/4`, plus the
/// "this network" `0/8` and broadcast `255.255.255.255`). These addresses
/// are rejected before ever consulting the index.
pub fn is_private_or_reserved(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    addr.is_loopback()
        || addr.is_link_local()
        || addr.is_multicast()
        || addr.is_broadcast()
        || addr.is_unspecified()
        || octets[0] == 0
        || octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || octets[0] >= 240
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_private_ranges() {
        for addr in ["10.1.2.3", "172.16.0.1", "192.168.1.1", "127.0.0.1", "169.254.1.1", "224.0.0.1"] {
            assert!(is_private_or_reserved(addr.parse().unwrap()), "{addr} should be private");
        }
    }

    #[test]
    fn accepts_public_address() {
        let addr: Ipv4Addr = "72.14.213.147".parse().unwrap();
        assert!(!is_private_or_reserved(addr));
    }
}
