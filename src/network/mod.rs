//! Network interfaces and port forwarding
//!
//! UTM only forwards ports on emulated-VLAN interfaces. Nothing here switches
//! an interface's mode on the caller's behalf.

use crate::bridge::codes::{NetworkMode, Protocol, RunState};
use crate::bridge::utm::Utm;
use crate::bridge::Bridge;
use crate::error::UvmError;
use crate::guest::ControlUtility;
use crate::vm::instance::{NetworkInterface, PortForward, VmInfo};
use crate::Result;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

pub struct NetworkConfigurator<'a> {
    utm: Utm<'a>,
}

impl<'a> NetworkConfigurator<'a> {
    pub fn new(bridge: &'a dyn Bridge) -> Self {
        Self {
            utm: Utm::new(bridge),
        }
    }

    /// Make sure the VM has an emulated-VLAN interface and return its index.
    pub fn setup_emulated_network(&self, vm: &str) -> Result<usize> {
        let info = self.utm.inspect(vm)?;
        if let Some(nic) = info.emulated_interfaces().next() {
            debug!(vm, index = nic.index, "emulated interface already present");
            return Ok(nic.index);
        }
        let index = self.utm.add_network(vm, NetworkMode::Emulated)?;
        info!(vm, index, "added emulated VLAN interface");
        Ok(index)
    }

    /// Append `rule` to interface `index`. Returns false when the same rule was
    /// already there.
    ///
    /// With a control utility and a running VM, a rule without a guest
    /// address is pinned to the VM's reported IPv4 address.
    pub fn add_port_forward(
        &self,
        vm: &str,
        index: usize,
        rule: &PortForward,
        ctl: Option<&dyn ControlUtility>,
    ) -> Result<bool> {
        let info = self.utm.inspect(vm)?;
        let nic = forwarding_interface(vm, &info, index)?;

        // Compared as the caller wrote it, before any guest address is filled in.
        if let Some(existing) = nic.forwards.iter().find(|f| f.same_route(rule)) {
            if is_same_rule(existing, rule) {
                debug!(vm, index, guest_port = rule.guest_port, "forward already present");
                return Ok(false);
            }
            return Err(UvmError::PortConflict {
                vm: vm.to_string(),
                index,
                protocol: rule.protocol.to_string(),
                guest_port: rule.guest_port,
                host_port: existing.host_port,
            });
        }

        let mut rule = rule.clone();
        if rule.guest_address.is_none() && info.state == RunState::Running {
            if let Some(ctl) = ctl {
                rule.guest_address = guest_ipv4(ctl, vm);
            }
        }

        self.utm.add_port_forward(vm, index, &rule)?;
        info!(
            vm,
            index,
            protocol = %rule.protocol,
            guest_port = rule.guest_port,
            host = %format!("{}:{}", rule.host_address, rule.host_port),
            "added port forward"
        );
        Ok(true)
    }

    /// Remove the rule for `protocol`/`guest_port`. Returns false if there was none.
    pub fn remove_port_forward(
        &self,
        vm: &str,
        index: usize,
        protocol: Protocol,
        guest_port: u16,
    ) -> Result<bool> {
        let info = self.utm.inspect(vm)?;
        let nic = info.interface(index).ok_or_else(|| UvmError::InterfaceNotFound {
            vm: vm.to_string(),
            index,
        })?;
        let present = nic
            .forwards
            .iter()
            .any(|f| f.protocol == protocol && f.guest_port == guest_port);
        if !present {
            return Ok(false);
        }
        self.utm.remove_port_forward(vm, index, protocol, guest_port)?;
        info!(vm, index, %protocol, guest_port, "removed port forward");
        Ok(true)
    }

    /// Every forward on every interface, with its interface index.
    pub fn list_port_forwards(&self, vm: &str) -> Result<Vec<(usize, PortForward)>> {
        let info = self.utm.inspect(vm)?;
        Ok(info
            .interfaces
            .into_iter()
            .flat_map(|nic| {
                let index = nic.index;
                nic.forwards.into_iter().map(move |f| (index, f))
            })
            .collect())
    }
}

fn forwarding_interface<'i>(vm: &str, info: &'i VmInfo, index: usize) -> Result<&'i NetworkInterface> {
    let nic = info.interface(index).ok_or_else(|| UvmError::InterfaceNotFound {
        vm: vm.to_string(),
        index,
    })?;
    if !nic.mode.supports_port_forwarding() {
        return Err(UvmError::UnsupportedNetworkMode {
            vm: vm.to_string(),
            index,
            mode: nic.mode.to_string(),
        });
    }
    Ok(nic)
}

/// A rule without a guest address matches whatever address the existing one has.
fn is_same_rule(existing: &PortForward, wanted: &PortForward) -> bool {
    existing.same_route(wanted)
        && existing.host_address == wanted.host_address
        && existing.host_port == wanted.host_port
        && (wanted.guest_address.is_none() || existing.guest_address == wanted.guest_address)
}

fn guest_ipv4(ctl: &dyn ControlUtility, vm: &str) -> Option<String> {
    match ctl.ip_addresses(vm) {
        Ok(addrs) => addrs
            .into_iter()
            .find(|a| a.parse::<Ipv4Addr>().is_ok()),
        Err(e) => {
            warn!(vm, error = %e, "could not resolve guest address, forwarding to any");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeUtm, FakeUtmctl};
    use crate::vm::instance::DEFAULT_HOST_ADDRESS;

    fn ssh() -> PortForward {
        PortForward::new(Protocol::Tcp, 22, 2222)
    }

    #[test]
    fn forward_on_shared_interface_needs_setup_first() {
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let net = NetworkConfigurator::new(&utm);

        let err = net.add_port_forward("dev", 0, &ssh(), None).unwrap_err();
        assert!(matches!(err, UvmError::UnsupportedNetworkMode { index: 0, .. }));
        assert!(err.to_string().contains("--setup-network"));
        assert!(utm.vm("dev").unwrap().nics[0].1.is_empty());

        let index = net.setup_emulated_network("dev").unwrap();
        assert_eq!(index, 1);
        assert!(net.add_port_forward("dev", index, &ssh(), None).unwrap());

        let forwards = net.list_port_forwards("dev").unwrap();
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0].0, 1);
        assert_eq!(forwards[0].1.guest_port, 22);
        assert_eq!(forwards[0].1.host_port, 2222);
        assert_eq!(forwards[0].1.host_address, DEFAULT_HOST_ADDRESS);
    }

    #[test]
    fn setup_twice_yields_one_emulated_interface() {
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let net = NetworkConfigurator::new(&utm);

        let first = net.setup_emulated_network("dev").unwrap();
        let second = net.setup_emulated_network("dev").unwrap();
        assert_eq!(first, second);

        let emulated = utm
            .vm("dev")
            .unwrap()
            .nics
            .iter()
            .filter(|(mode, _)| *mode == NetworkMode::Emulated)
            .count();
        assert_eq!(emulated, 1);
    }

    #[test]
    fn duplicate_and_conflicting_rules() {
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let net = NetworkConfigurator::new(&utm);
        let index = net.setup_emulated_network("dev").unwrap();

        assert!(net.add_port_forward("dev", index, &ssh(), None).unwrap());
        assert!(!net.add_port_forward("dev", index, &ssh(), None).unwrap());

        let other = PortForward::new(Protocol::Tcp, 22, 2223);
        assert!(matches!(
            net.add_port_forward("dev", index, &other, None),
            Err(UvmError::PortConflict { host_port: 2222, .. })
        ));

        // Same port over udp is a different route.
        let udp = PortForward::new(Protocol::Udp, 22, 2222);
        assert!(net.add_port_forward("dev", index, &udp, None).unwrap());
        assert_eq!(net.list_port_forwards("dev").unwrap().len(), 2);
    }

    #[test]
    fn missing_interface_is_reported() {
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let net = NetworkConfigurator::new(&utm);
        assert!(matches!(
            net.add_port_forward("dev", 7, &ssh(), None),
            Err(UvmError::InterfaceNotFound { index: 7, .. })
        ));
    }

    #[test]
    fn running_vm_forwards_to_its_ipv4_address() {
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let net = NetworkConfigurator::new(&utm);
        let index = net.setup_emulated_network("dev").unwrap();
        Utm::new(&utm).start("dev").unwrap();

        let ctl = FakeUtmctl::running("dev");
        *ctl.addresses.borrow_mut() = vec!["fe80::1".into(), "10.0.2.15".into()];
        assert!(net.add_port_forward("dev", index, &ssh(), Some(&ctl)).unwrap());

        let (_, rule) = &net.list_port_forwards("dev").unwrap()[0];
        assert_eq!(rule.guest_address.as_deref(), Some("10.0.2.15"));
    }

    #[test]
    fn readding_after_start_is_a_noop() {
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let net = NetworkConfigurator::new(&utm);
        let index = net.setup_emulated_network("dev").unwrap();
        let ctl = FakeUtmctl::running("dev");
        *ctl.addresses.borrow_mut() = vec!["10.0.2.15".into()];

        assert!(net.add_port_forward("dev", index, &ssh(), Some(&ctl)).unwrap());
        Utm::new(&utm).start("dev").unwrap();
        assert!(!net.add_port_forward("dev", index, &ssh(), Some(&ctl)).unwrap());

        let forwards = net.list_port_forwards("dev").unwrap();
        assert_eq!(forwards.len(), 1);
        assert_eq!(forwards[0].1.guest_address, None);

        // Same route, different host port is still a conflict.
        let other = PortForward::new(Protocol::Tcp, 22, 2223);
        assert!(matches!(
            net.add_port_forward("dev", index, &other, Some(&ctl)),
            Err(UvmError::PortConflict { host_port: 2222, .. })
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let utm = FakeUtm::new();
        utm.add_vm("dev");
        let net = NetworkConfigurator::new(&utm);
        let index = net.setup_emulated_network("dev").unwrap();
        net.add_port_forward("dev", index, &ssh(), None).unwrap();

        assert!(net.remove_port_forward("dev", index, Protocol::Tcp, 22).unwrap());
        assert!(!net.remove_port_forward("dev", index, Protocol::Tcp, 22).unwrap());
        assert!(net.list_port_forwards("dev").unwrap().is_empty());
    }
}
