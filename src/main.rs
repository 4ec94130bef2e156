use clap::Parser;
use filewire::tcp::{Connection, Route, TransferStats};
use filewire::{SystemClock, UdpTransport};
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Send a file over UDP with TCP-like reliability.
#[derive(Parser, Debug)]
#[command(name = "filewire", version)]
struct Args {
    /// Destination IPv4 address
    destination: Ipv4Addr,

    /// File to send
    file: PathBuf,

    /// Local UDP port
    #[arg(long, value_parser = clap::value_parser!(u16).range(5000..=65535))]
    client_port: u16,

    /// Remote UDP port
    #[arg(long, value_parser = clap::value_parser!(u16).range(5000..=65535))]
    server_port: u16,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(stats) => {
            info!(
                "sent {} bytes in {} segments ({} retransmits)",
                stats.bytes_sent, stats.segments_sent, stats.retransmits
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("transfer failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<TransferStats, Box<dyn std::error::Error>> {
    let file = std::fs::read(&args.file)?;
    info!(
        "sending {} ({} bytes) to {}:{}",
        args.file.display(),
        file.len(),
        args.destination,
        args.server_port
    );

    let transport = UdpTransport::connect(
        args.client_port,
        SocketAddrV4::new(args.destination, args.server_port),
    )?;
    let local_ip = match transport.local_addr().ip() {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => return Err("transport resolved to an IPv6 source address".into()),
    };

    let route = Route::new(local_ip, args.client_port, args.destination, args.server_port);
    let mut connection = Connection::connect(
        Box::new(transport),
        Arc::new(SystemClock),
        route,
        Connection::wall_clock_iss(),
        file,
    );
    Ok(connection.run()?)
}
