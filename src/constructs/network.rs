//! AS-006: VPC construct with its subnets, routing and NAT egress.

use super::{cfn_ref, get_att, logical_id, name_tags};
use crate::core::network as layout;
use crate::core::types::*;
use serde_json::json;

/// Logical id of the VPC.
pub const VPC_ID: &str = "VPC";

const IGW_ID: &str = "VPCIGW";
const GATEWAY_ATTACHMENT_ID: &str = "VPCVPCGW";

/// Build the network description from a resolved config.
pub fn build(config: &StackConfig) -> Result<Network, String> {
    let block = layout::parse_block(&config.network.cidr)?;
    let zones = layout::availability_zones(&config.network, &config.region);
    let allocated = layout::allocate_subnets(block, &config.network.subnets, &zones)?;

    let problems = layout::check_layout(&block, &allocated);
    if !problems.is_empty() {
        return Err(problems.join("; "));
    }

    let subnets: Vec<Subnet> = allocated
        .iter()
        .map(|a| Subnet {
            id: logical_id(&[VPC_ID, &a.group, "Subnet", &(a.az_index + 1).to_string(), "Subnet"]),
            group: a.group.clone(),
            subnet_type: a.subnet_type,
            cidr: a.cidr.to_string(),
            availability_zone: a.availability_zone.clone(),
        })
        .collect();

    // NAT gateways go into the first N public subnets, one per AZ
    let mut nat_gateways: Vec<NatGateway> = Vec::new();
    for subnet in subnets.iter().filter(|s| s.subnet_type == SubnetType::Public) {
        if nat_gateways.len() >= config.network.nat_gateways as usize {
            break;
        }
        if nat_gateways
            .iter()
            .any(|n| n.availability_zone == subnet.availability_zone)
        {
            continue;
        }
        nat_gateways.push(NatGateway {
            id: format!("{}NATGateway", subnet_base(&subnet.id)),
            subnet: subnet.id.clone(),
            availability_zone: subnet.availability_zone.clone(),
        });
    }

    Ok(Network {
        id: VPC_ID.to_string(),
        name: format!("{}-VPC", config.name),
        cidr: block.to_string(),
        availability_zones: zones,
        subnets,
        nat_gateways,
    })
}

/// Construct path prefix of a subnet (`VPCprivateSubnet1` for `VPCprivateSubnet1Subnet`).
pub fn subnet_base(subnet_id: &str) -> &str {
    subnet_id.strip_suffix("Subnet").unwrap_or(subnet_id)
}

/// NAT gateway a private subnet in `zone` routes through: same AZ if one
/// exists, otherwise the first gateway.
pub fn nat_for<'a>(network: &'a Network, zone: &str) -> Option<&'a NatGateway> {
    network
        .nat_gateways
        .iter()
        .find(|n| n.availability_zone == zone)
        .or_else(|| network.nat_gateways.first())
}

/// Check network invariants on an assembled description.
pub fn check_network(network: &Network) -> Vec<String> {
    let mut problems = Vec::new();
    let block = match layout::parse_block(&network.cidr) {
        Ok(b) => b,
        Err(e) => return vec![e],
    };
    let mut parsed = Vec::new();
    for s in &network.subnets {
        match s.cidr.parse::<ipnetwork::Ipv4Network>() {
            Ok(cidr) => parsed.push(layout::AllocatedSubnet {
                group: s.group.clone(),
                subnet_type: s.subnet_type,
                az_index: 0,
                availability_zone: s.availability_zone.clone(),
                cidr,
            }),
            Err(e) => problems.push(format!("subnet {} has invalid CIDR: {}", s.id, e)),
        }
    }
    problems.extend(layout::check_layout(&block, &parsed));

    for t in [SubnetType::Public, SubnetType::Private] {
        if network.subnets_of(t).next().is_none() {
            problems.push(format!("network has no {} subnet", t));
        }
    }
    if network.subnets_of(SubnetType::Private).next().is_some() && network.nat_gateways.is_empty()
    {
        problems.push("private subnets have no NAT egress".to_string());
    }
    for nat in &network.nat_gateways {
        let in_public = network
            .subnets_of(SubnetType::Public)
            .any(|s| s.id == nat.subnet);
        if !in_public {
            problems.push(format!("NAT gateway {} is not in a public subnet", nat.id));
        }
    }
    problems
}

/// Render VPC resources.
pub fn render(stack: &Stack, template: &mut Template) -> Result<(), String> {
    let network = &stack.network;
    let resources = &mut template.resources;

    resources.insert(
        network.id.clone(),
        CfnResource::new(
            "AWS::EC2::VPC",
            json!({
                "CidrBlock": network.cidr,
                "EnableDnsHostnames": true,
                "EnableDnsSupport": true,
                "InstanceTenancy": "default",
                "Tags": name_tags(&network.name),
            }),
        ),
    );

    for subnet in &network.subnets {
        let base = subnet_base(&subnet.id);
        let public = subnet.subnet_type == SubnetType::Public;
        let tag_name = format!("{}/{}", network.name, base.trim_start_matches(VPC_ID));

        resources.insert(
            subnet.id.clone(),
            CfnResource::new(
                "AWS::EC2::Subnet",
                json!({
                    "AvailabilityZone": subnet.availability_zone,
                    "CidrBlock": subnet.cidr,
                    "MapPublicIpOnLaunch": public,
                    "Tags": [
                        { "Key": "Name", "Value": tag_name },
                        { "Key": "subnet-name", "Value": subnet.group },
                        { "Key": "subnet-type", "Value": subnet.subnet_type.to_string() },
                    ],
                    "VpcId": cfn_ref(&network.id),
                }),
            ),
        );

        let route_table = format!("{}RouteTable", base);
        resources.insert(
            route_table.clone(),
            CfnResource::new(
                "AWS::EC2::RouteTable",
                json!({
                    "Tags": name_tags(&tag_name),
                    "VpcId": cfn_ref(&network.id),
                }),
            ),
        );

        let association = format!("{}RouteTableAssociation", base);
        resources.insert(
            association.clone(),
            CfnResource::new(
                "AWS::EC2::SubnetRouteTableAssociation",
                json!({
                    "RouteTableId": cfn_ref(&route_table),
                    "SubnetId": cfn_ref(&subnet.id),
                }),
            ),
        );

        let default_route = format!("{}DefaultRoute", base);
        if public {
            resources.insert(
                default_route.clone(),
                CfnResource::new(
                    "AWS::EC2::Route",
                    json!({
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "GatewayId": cfn_ref(IGW_ID),
                        "RouteTableId": cfn_ref(&route_table),
                    }),
                )
                .depends_on([GATEWAY_ATTACHMENT_ID]),
            );
        } else {
            let nat = nat_for(network, &subnet.availability_zone)
                .ok_or_else(|| format!("private subnet {} has no NAT gateway", subnet.id))?;
            resources.insert(
                default_route,
                CfnResource::new(
                    "AWS::EC2::Route",
                    json!({
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": cfn_ref(&nat.id),
                        "RouteTableId": cfn_ref(&route_table),
                    }),
                ),
            );
            continue;
        }

        if let Some(nat) = network.nat_gateways.iter().find(|n| n.subnet == subnet.id) {
            let eip = format!("{}EIP", base);
            resources.insert(
                eip.clone(),
                CfnResource::new(
                    "AWS::EC2::EIP",
                    json!({ "Domain": "vpc", "Tags": name_tags(&tag_name) }),
                ),
            );
            resources.insert(
                nat.id.clone(),
                CfnResource::new(
                    "AWS::EC2::NatGateway",
                    json!({
                        "AllocationId": get_att(&eip, "AllocationId"),
                        "SubnetId": cfn_ref(&subnet.id),
                        "Tags": name_tags(&tag_name),
                    }),
                )
                .depends_on([default_route, association]),
            );
        }
    }

    resources.insert(
        IGW_ID.to_string(),
        CfnResource::new(
            "AWS::EC2::InternetGateway",
            json!({ "Tags": name_tags(&network.name) }),
        ),
    );
    resources.insert(
        GATEWAY_ATTACHMENT_ID.to_string(),
        CfnResource::new(
            "AWS::EC2::VPCGatewayAttachment",
            json!({
                "InternetGatewayId": cfn_ref(IGW_ID),
                "VpcId": cfn_ref(&network.id),
            }),
        ),
    );

    Ok(())
}
