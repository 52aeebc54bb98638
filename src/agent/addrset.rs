//! Rule-based address filtering
//!
//! An address set is the list of addresses its interfaces currently hold,
//! passed through the set's rules in declaration order. An address is part
//! of the set as soon as one rule admits it; an address no rule admits is
//! dropped.

use std::collections::HashSet;
use std::io;
use std::net::IpAddr;

use crate::agent::config::{AddrSet, Rule};
use crate::agent::ifaddr;

/// Evaluate an address set against the current interface state.
pub fn evaluate(set: &AddrSet) -> io::Result<Vec<IpAddr>> {
    let addrs = ifaddr::collect(&set.interfaces)?;
    Ok(filter_addrs(&addrs, &set.rules))
}

/// Apply the set's rules to a collected address list. IPv4-mapped IPv6
/// addresses are folded to their IPv4 form first, so rules and record
/// classification agree on one textual representation.
pub fn filter_addrs(addrs: &[IpAddr], rules: &[Rule]) -> Vec<IpAddr> {
    let mut admitted = Vec::new();
    let mut seen = HashSet::new();

    for addr in addrs {
        let addr = fold_mapped(*addr);
        let text = addr.to_string();
        if rules.iter().any(|rule| rule.admits(&text)) && seen.insert(text) {
            admitted.push(addr);
        }
    }

    admitted
}

fn fold_mapped(addr: IpAddr) -> IpAddr {
    if let IpAddr::V6(v6) = addr {
        if let Some(v4) = v6.to_ipv4_mapped() {
            return IpAddr::V4(v4);
        }
    }
    addr
}
