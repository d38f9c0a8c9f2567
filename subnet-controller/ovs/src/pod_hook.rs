use crate::{cookie, gateway, FlowController, Ofctl, Result};
use ovs_subnet_controller_core::{Ipv4Net, Protocol};
use std::net::Ipv4Addr;

const SETUP_SCRIPT: &str = "sdn-pod-hook-setup-node.sh";

/// Pods are attached to the bridge by a per-pod hook. Traffic for the local
/// subnet goes to port 9, peer subnets are tunneled on port 1, and everything
/// else leaves through the gateway on port 2.
pub struct PodHook {
    ofctl: Ofctl,
}

impl PodHook {
    pub fn new(ofctl: Ofctl) -> Self {
        Self { ofctl }
    }
}

#[async_trait::async_trait]
impl FlowController for PodHook {
    async fn setup(
        &self,
        local_subnet: Ipv4Net,
        cluster_network: Ipv4Net,
        service_network: Ipv4Net,
        mtu: u32,
    ) -> Result<()> {
        let gateway = gateway(local_subnet);
        let args = vec![
            gateway.to_string(),
            local_subnet.to_string(),
            cluster_network.to_string(),
            cluster_network.prefix_len().to_string(),
            service_network.to_string(),
            mtu.to_string(),
        ];
        self.ofctl.run_setup(SETUP_SCRIPT, args).await?;

        self.ofctl
            .add_flow("table=0,priority=50,actions=output:2")
            .await?;
        for proto in ["ip", "arp"] {
            self.ofctl
                .add_flow(&format!(
                    "table=0,priority=100,{proto},nw_dst={gateway},actions=output:2"
                ))
                .await?;
        }
        Ok(())
    }

    async fn add_ofrules(
        &self,
        node_ip: Ipv4Addr,
        subnet: Ipv4Net,
        local_ip: Ipv4Addr,
    ) -> Result<()> {
        let cookie = cookie(node_ip);
        for proto in ["ip", "arp"] {
            let rule = if node_ip == local_ip {
                format!("table=0,cookie=0x{cookie},priority=75,{proto},nw_dst={subnet},actions=output:9")
            } else {
                format!("table=0,cookie=0x{cookie},priority=100,{proto},nw_dst={subnet},actions=set_field:{node_ip}->tun_dst,output:1")
            };
            self.ofctl.add_flow(&rule).await?;
        }
        Ok(())
    }

    async fn del_ofrules(&self, node_ip: Ipv4Addr, _local_ip: Ipv4Addr) -> Result<()> {
        let cookie = cookie(node_ip);
        for proto in ["ip", "arp"] {
            self.ofctl
                .del_flows(&format!("table=0,cookie=0x{cookie}/0xffffffff,{proto}"))
                .await?;
        }
        Ok(())
    }

    async fn add_service_ofrules(&self, _: u32, _: Ipv4Addr, _: Protocol, _: u16) -> Result<()> {
        Ok(())
    }

    async fn del_service_ofrules(&self, _: u32, _: Ipv4Addr, _: Protocol, _: u16) -> Result<()> {
        Ok(())
    }
}
