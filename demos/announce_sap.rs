//! Announce one session and print the sessions others announce
//!
//! Run with: cargo run --example announce_sap [INTERFACE_ADDR]
//!
//! The session is announced for 95 seconds (or until Ctrl+C), then
//! retracted.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use sap_rs::sap::{Announcements, OwnAnnouncements, SapConfig, SessionNotice, UdpPort};
use sap_rs::{Sdp, SetEvent};

const SDP: &str = "v=0\r\n\
o=- 29054176 29054179 IN IP4 192.168.178.134\r\n\
s=Y001-Yamaha-Ri8-D-14e622 : 32\r\n\
c=IN IP4 239.69.205.203/32\r\n\
t=0 0\r\n\
a=keywds:Dante\r\n\
m=audio 5004 RTP/AVP 96\r\n\
i=1 channels: 02\r\n\
a=recvonly\r\n\
a=rtpmap:96 L24/48000/1\r\n\
a=ptime:1\r\n\
a=ts-refclk:ptp=IEEE1588-2008:00-1D-C1-FF-FE-14-E6-22:0\r\n\
a=mediaclk:direct=750129611\r\n";

const RUN_TIME: Duration = Duration::from_secs(95);

fn indent(sdp: &Sdp) -> String {
    sdp.as_str().trim_end().replace('\n', "\n  ")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sap_rs=info".parse()?)
                .add_directive("announce_sap=debug".parse()?),
        )
        .init();

    let interface = match std::env::args().nth(1) {
        Some(addr) => addr.parse::<Ipv4Addr>()?,
        None => Ipv4Addr::UNSPECIFIED,
    };
    let config = SapConfig::with_interface(interface);

    let own = OwnAnnouncements::new();
    own.add(Sdp::parse(SDP)?)?;

    let port = Arc::new(UdpPort::bind(config.clone()).await?);
    println!("Port ready on {}", port.local_addr()?);

    let announcements = Announcements::new(&*port, &config);
    announcements.ignore_from(&own);
    announcements.subscribe(|event: &SetEvent<String, Sdp, SessionNotice>| match event {
        SetEvent::Add { value, extra, .. } => {
            if let Some(notice) = extra {
                let packet = notice.packet();
                println!(
                    "+++ Received SAP (hash={:#06x}) from {}:\n  {}\n",
                    packet.hash,
                    packet.source,
                    indent(value)
                );
            }
        }
        SetEvent::Delete { prev, extra, .. } => {
            if let Some(notice) = extra {
                let packet = notice.packet();
                println!(
                    "--- {} SAP (hash={:#06x}) from {}:\n  {}\n",
                    if notice.is_explicit() { "Retracted" } else { "Timed out" },
                    packet.hash,
                    packet.source,
                    indent(prev)
                );
            }
        }
        _ => {}
    });

    let handle = own.announce_to_port(Arc::clone(&port), config.ad_interval);

    tokio::select! {
        _ = tokio::time::sleep(RUN_TIME) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    println!("Retracting");
    handle.shutdown().await;
    announcements.close();
    port.close();
    Ok(())
}
