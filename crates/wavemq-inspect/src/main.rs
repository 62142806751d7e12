//! wavemq-inspect - Decode and log a captured MQTT 3.1.1 byte stream.

use std::time::Instant;

use log::{error, info, warn};
use wavemq_client::{Config, Delivery};
use wavemq_core::{decode_packet_with_limit, Error, Packet};

struct Args {
    config_path: String,
    hex: bool,
    replay: bool,
    files: Vec<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = "wavemq.toml".to_string();
    let mut hex = false;
    let mut replay = false;
    let mut files = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                if i + 1 < args.len() {
                    config_path = args[i + 1].clone();
                    i += 2;
                    continue;
                } else {
                    eprintln!("Error: -c requires a file path");
                    std::process::exit(1);
                }
            }
            "--hex" => hex = true,
            "--replay" => replay = true,
            "-h" | "--help" => {
                println!("wavemq-inspect - Decode a captured MQTT 3.1.1 byte stream");
                println!();
                println!("Usage: wavemq-inspect [OPTIONS] <FILE>...");
                println!();
                println!("Options:");
                println!("  -c, --config <FILE>     Config file path (default: wavemq.toml)");
                println!("      --hex               Input files are hex text (whitespace ignored)");
                println!("      --replay            Feed packets to a delivery state machine and");
                println!("                          log the replies it would send");
                println!("  -h, --help              Show this help message");
                println!();
                println!("Configuration:");
                println!("  Config file uses TOML format. All settings can be overridden");
                println!("  with environment variables using WAVEMQ__ prefix:");
                println!();
                println!("  WAVEMQ__LOG__LEVEL=debug");
                println!("  WAVEMQ__CODEC__MAX_PACKET_SIZE=1048576");
                println!("  WAVEMQ__DELIVERY__RETRY_INTERVAL_MS=2000");
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
            file => files.push(file.to_string()),
        }
        i += 1;
    }

    if files.is_empty() {
        eprintln!("Error: no input files");
        eprintln!("Use --help for usage information");
        std::process::exit(1);
    }

    Args {
        config_path,
        hex,
        replay,
        files,
    }
}

/// Parse hex text, ignoring whitespace.
fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).map_err(|_| "non-ASCII input".to_string())?;
            u8::from_str_radix(s, 16).map_err(|_| format!("invalid hex byte {:?}", s))
        })
        .collect()
}

fn describe(packet: &Packet) -> String {
    match packet {
        Packet::Connect(c) => format!(
            "CONNECT client_id={} clean_session={} keep_alive={} will={} username={}",
            c.client_id,
            c.clean_session,
            c.keep_alive,
            c.will.as_ref().map_or("-", |w| w.topic.as_str()),
            c.username.as_deref().unwrap_or("-"),
        ),
        Packet::Connack(c) => format!(
            "CONNACK session_present={} code={:?}",
            c.session_present, c.code
        ),
        Packet::Publish(p) => format!(
            "PUBLISH topic={} qos={} dup={} retain={} id={} payload={}B",
            p.topic,
            p.qos as u8,
            p.dup,
            p.retain,
            p.packet_id.map_or("-".to_string(), |id| id.to_string()),
            p.payload.len(),
        ),
        Packet::Subscribe(s) => format!("SUBSCRIBE id={} topics={:?}", s.packet_id, s.topics),
        Packet::Suback(s) => format!("SUBACK id={} codes={:?}", s.packet_id, s.return_codes),
        Packet::Unsubscribe(u) => format!("UNSUBSCRIBE id={} topics={:?}", u.packet_id, u.topics),
        other => match other.packet_id() {
            Some(id) => format!("{:?} id={}", other.packet_type(), id),
            None => format!("{:?}", other.packet_type()),
        },
    }
}

/// Decode every packet in `data`. Returns false on a malformed packet.
fn inspect(
    name: &str,
    data: &[u8],
    max_packet_size: usize,
    mut delivery: Option<&mut Delivery>,
) -> bool {
    let mut offset = 0;
    let mut count = 0;

    while offset < data.len() {
        match decode_packet_with_limit(&data[offset..], max_packet_size) {
            Ok((packet, consumed)) => {
                info!("{}@{}: {} ({} bytes)", name, offset, describe(&packet), consumed);
                if let Some(delivery) = delivery.as_deref_mut() {
                    match delivery.on_packet_received(packet, Instant::now()) {
                        Ok(reaction) => {
                            if let Some(reply) = &reaction.reply {
                                info!("  -> reply {}", describe(reply));
                            }
                            if let Some(publish) = &reaction.deliver {
                                info!("  -> deliver {} ({}B)", publish.topic, publish.payload.len());
                            }
                        }
                        Err(e) => warn!("  -> {}", e),
                    }
                }
                offset += consumed;
                count += 1;
            }
            Err(Error::Incomplete { needed, have }) => {
                warn!(
                    "{}@{}: trailing partial packet ({} of {} bytes)",
                    name, offset, have, needed
                );
                break;
            }
            Err(Error::Protocol(e)) => {
                error!("{}@{}: {}", name, offset, e);
                return false;
            }
        }
    }

    info!("{}: {} packets", name, count);
    true
}

fn main() {
    let args = parse_args();

    let config = match Config::load(&args.config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logger with configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log.level))
        .init();

    let mut delivery = args
        .replay
        .then(|| Delivery::from_config(&config.delivery));

    for file in &args.files {
        let raw = match std::fs::read(file) {
            Ok(raw) => raw,
            Err(e) => {
                error!("{}: {}", file, e);
                std::process::exit(1);
            }
        };

        let data = if args.hex {
            match parse_hex(&String::from_utf8_lossy(&raw)) {
                Ok(data) => data,
                Err(e) => {
                    error!("{}: {}", file, e);
                    std::process::exit(1);
                }
            }
        } else {
            raw
        };

        if !inspect(file, &data, config.codec.max_packet_size, delivery.as_mut()) {
            std::process::exit(1);
        }
    }
}
