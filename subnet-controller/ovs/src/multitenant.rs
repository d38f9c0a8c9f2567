use crate::{cookie, gateway, FlowController, Ofctl, Result};
use ovs_subnet_controller_core::{netid::ADMIN_VNID, Ipv4Net, Protocol};
use std::net::Ipv4Addr;

const SETUP_SCRIPT: &str = "sdn-multitenant-setup-node.sh";

/// Isolates namespaces by network identifier.
///
/// The setup script installs the static tables; this controller maintains the
/// per-peer tunnel rules (tables 7 and 8) and per-service rules (table 4).
/// The sender's identifier, held in reg0, is carried across the tunnel as the
/// tunnel key.
pub struct MultiTenant {
    ofctl: Ofctl,
}

impl MultiTenant {
    pub fn new(ofctl: Ofctl) -> Self {
        Self { ofctl }
    }
}

#[async_trait::async_trait]
impl FlowController for MultiTenant {
    async fn setup(
        &self,
        local_subnet: Ipv4Net,
        cluster_network: Ipv4Net,
        service_network: Ipv4Net,
        mtu: u32,
    ) -> Result<()> {
        let args = vec![
            gateway(local_subnet).to_string(),
            local_subnet.to_string(),
            local_subnet.prefix_len().to_string(),
            cluster_network.to_string(),
            service_network.to_string(),
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
        // Local traffic is handled by the static tables.
        if node_ip == local_ip {
            return Ok(());
        }

        let cookie = cookie(node_ip);
        self.ofctl
            .add_flow(&format!(
                "table=7,cookie=0x{cookie},priority=100,ip,nw_dst={subnet},actions=move:NXM_NX_REG0[]->NXM_NX_TUN_ID[0..31],set_field:{node_ip}->tun_dst,output:1"
            ))
            .await?;
        self.ofctl
            .add_flow(&format!(
                "table=8,cookie=0x{cookie},priority=100,arp,nw_dst={subnet},actions=move:NXM_NX_REG0[]->NXM_NX_TUN_ID[0..31],set_field:{node_ip}->tun_dst,output:1"
            ))
            .await
    }

    async fn del_ofrules(&self, node_ip: Ipv4Addr, local_ip: Ipv4Addr) -> Result<()> {
        if node_ip == local_ip {
            return Ok(());
        }

        let cookie = cookie(node_ip);
        for table in [7, 8] {
            self.ofctl
                .del_flows(&format!("table={table},cookie=0x{cookie}/0xffffffff"))
                .await?;
        }
        Ok(())
    }

    async fn add_service_ofrules(
        &self,
        net_id: u32,
        ip: Ipv4Addr,
        protocol: Protocol,
        port: u16,
    ) -> Result<()> {
        let proto = protocol.as_match();
        // Services in the global namespace are reachable from everywhere.
        let rule = if net_id == ADMIN_VNID {
            format!("table=4,{proto},nw_dst={ip},tp_dst={port},priority=200,actions=output:2")
        } else {
            format!(
                "table=4,{proto},nw_dst={ip},tp_dst={port},priority=200,reg0={net_id},actions=output:2"
            )
        };
        self.ofctl.add_flow(&rule).await
    }

    async fn del_service_ofrules(
        &self,
        _net_id: u32,
        ip: Ipv4Addr,
        protocol: Protocol,
        port: u16,
    ) -> Result<()> {
        let proto = protocol.as_match();
        self.ofctl
            .del_flows(&format!("table=4,{proto},nw_dst={ip},tp_dst={port}"))
            .await
    }
}
