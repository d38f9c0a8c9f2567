use crate::{cookie, gateway, FlowController, Ofctl, Result};
use ovs_subnet_controller_core::{Ipv4Net, Protocol};
use std::net::Ipv4Addr;

const SETUP_SCRIPT: &str = "sdn-flat-setup-node.sh";

/// A single shared bridge. Local traffic enters on port 10 and leaves on the
/// tunnel (port 9); tunneled traffic for the local subnet is delivered to
/// port 10.
pub struct Flat {
    ofctl: Ofctl,
}

impl Flat {
    pub fn new(ofctl: Ofctl) -> Self {
        Self { ofctl }
    }
}

#[async_trait::async_trait]
impl FlowController for Flat {
    async fn setup(
        &self,
        local_subnet: Ipv4Net,
        cluster_network: Ipv4Net,
        _service_network: Ipv4Net,
        mtu: u32,
    ) -> Result<()> {
        let args = vec![
            gateway(local_subnet).to_string(),
            local_subnet.to_string(),
            cluster_network.to_string(),
            cluster_network.prefix_len().to_string(),
            mtu.to_string(),
        ];
        self.ofctl.run_setup(SETUP_SCRIPT, args).await
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
                format!("table=0,cookie=0x{cookie},priority=200,{proto},in_port=10,nw_dst={subnet},actions=output:9")
            } else {
                format!("table=0,cookie=0x{cookie},priority=200,{proto},in_port=9,nw_dst={subnet},actions=set_field:{node_ip}->tun_dst,output:10")
            };
            self.ofctl.add_flow(&rule).await?;
        }
        Ok(())
    }

    async fn del_ofrules(&self, node_ip: Ipv4Addr, local_ip: Ipv4Addr) -> Result<()> {
        let cookie = cookie(node_ip);
        let in_port = if node_ip == local_ip { 10 } else { 9 };
        for proto in ["ip", "arp"] {
            self.ofctl
                .del_flows(&format!(
                    "table=0,cookie=0x{cookie}/0xffffffff,{proto},in_port={in_port}"
                ))
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
