use std::io;

use clap::Parser;

use rtsp_live::{Codec, PathConfig, Server, ServerConfig};

#[derive(Parser)]
#[command(
    name = "rtsp-live",
    about = "Standalone RTSP server for live H.264/H.265 streams"
)]
struct Args {
    /// Bind host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, short, default_value_t = 8554)]
    port: u16,

    /// Stream path to register
    #[arg(long, default_value = "/live")]
    path: String,

    /// Stream codec (h264 or h265)
    #[arg(long, default_value = "h264")]
    codec: String,

    /// Require authentication with this username
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Password for --username
    #[arg(long)]
    password: Option<String>,

    /// Use Digest instead of Basic authentication
    #[arg(long)]
    digest: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let codec = match args.codec.to_ascii_lowercase().as_str() {
        "h264" => Codec::H264,
        "h265" | "hevc" => Codec::H265,
        other => {
            eprintln!("unknown codec: {}", other);
            return;
        }
    };

    let mut server = Server::new(ServerConfig {
        host: args.host.clone(),
        port: args.port,
        ..ServerConfig::default()
    });
    server.add_path(PathConfig::new(&args.path, codec));

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        if args.digest {
            server.set_auth_digest(username, password, "RTSP Server");
        } else {
            server.set_auth(username, password, "RTSP Server");
        }
    }

    if let Err(e) = server.start() {
        eprintln!("failed to start server: {}", e);
        return;
    }

    println!(
        "RTSP server on rtsp://{}:{}{} — press Enter to stop",
        args.host, args.port, args.path
    );
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    server.stop();
}
