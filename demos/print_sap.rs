//! Print every SAP packet seen on the network
//!
//! Run with: cargo run --example print_sap [INTERFACE_ADDR]
//!
//! Examples:
//!   cargo run --example print_sap                 # all interfaces
//!   cargo run --example print_sap 192.168.1.20    # one interface

use std::net::Ipv4Addr;

use sap_rs::sap::{Port, PortEvent, SapConfig, UdpPort};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sap_rs=debug".parse()?)
                .add_directive("print_sap=debug".parse()?),
        )
        .init();

    let interface = match std::env::args().nth(1) {
        Some(addr) => addr.parse::<Ipv4Addr>()?,
        None => Ipv4Addr::UNSPECIFIED,
    };

    let port = UdpPort::bind(SapConfig::with_interface(interface)).await?;
    let mut rx = port.subscribe();
    println!("Listening on {} (Ctrl+C to stop)", port.local_addr()?);

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(PortEvent::Packet(packet)) => {
                let kind = if packet.is_announcement() { "announcement" } else { "deletion" };
                let payload = String::from_utf8_lossy(&packet.payload);
                println!(
                    "Received SAP {} (hash={:#06x}) from {} with {} payload:\n  {}\n",
                    kind,
                    packet.hash,
                    packet.source,
                    packet.payload_type,
                    payload.replace('\n', "\n  ")
                );
            }
            Ok(PortEvent::Error(e)) => eprintln!("Bad packet: {}", e),
            Err(RecvError::Lagged(missed)) => eprintln!("Missed {} packets", missed),
            Err(RecvError::Closed) => break,
        }
    }

    port.close();
    Ok(())
}
