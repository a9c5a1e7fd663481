//! birdwire CLI — follow a streaming endpoint from the terminal.
//!
//! Usage:
//! ```bash
//! # Follow a v2 filtered stream (bearer token prepared by the caller)
//! birdwire stream --url https://api.twitter.com/2/tweets/search/stream --token $TOKEN
//!
//! # Older-generation stream with a tighter heartbeat
//! birdwire stream --url https://example.com/stream --generation 1 --heartbeat-secs 20
//! ```

use std::env;
use std::process;
use std::time::Duration;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use birdwire_core::StreamError;
use birdwire_http::open_stream;
use birdwire_stream::{
    run_with_callbacks, stop_channel, Generation, RunLoopConfig, StreamHandlers,
};

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "stream" => cmd_stream(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("birdwire {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn print_usage() {
    println!("birdwire {}", env!("CARGO_PKG_VERSION"));
    println!("Follow a Twitter streaming endpoint from the terminal\n");
    println!("USAGE:");
    println!("    birdwire <COMMAND>\n");
    println!("COMMANDS:");
    println!("    stream     Connect to a streaming endpoint and print records");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("STREAM FLAGS:");
    println!("    --url <URL>            Streaming endpoint URL  [required]");
    println!("    --token <BEARER>       Bearer token added to the request");
    println!("    --generation <1|2>     Payload dialect  [default: 2]");
    println!("    --heartbeat-secs <N>   Max silence before giving up  [default: 30]");
}

async fn cmd_stream(args: &[String]) -> Result<(), String> {
    let url = parse_flag(args, "--url").ok_or("--url is required")?;
    let token = parse_flag(args, "--token");
    let generation = match parse_flag(args, "--generation").as_deref() {
        None | Some("2") | Some("v2") => Generation::V2,
        Some("1") | Some("v1") => Generation::V1,
        Some(other) => return Err(format!("Unknown generation: {other}")),
    };
    let heartbeat_secs: u64 = match parse_flag(args, "--heartbeat-secs") {
        Some(raw) => raw.parse().map_err(|_| "--heartbeat-secs must be a number")?,
        None => 30,
    };

    let client = reqwest::Client::new();
    let mut request = client.get(&url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    println!("Connecting to {url} ({generation})...");
    let conn = open_stream(request).await.map_err(|e| e.to_string())?;
    if let Some(window) = conn.rate_limit() {
        println!(
            "Rate window: {}/{} remaining, resets at {}",
            window.remaining, window.limit, window.reset
        );
    }

    let (stop, stop_token) = stop_channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        stop.stop();
    });

    let handlers = StreamHandlers::new()
        .on_tweet(|record| {
            let dict = record.resolve();
            match &dict.author {
                Some(author) => println!("@{}: {}", author.username, dict.tweet.text),
                None => println!("[{}] {}", dict.tweet.id, dict.tweet.text),
            }
        })
        .on_system_message(|message| println!("({}) {}", message.kind, message.message))
        .on_transient_error(|error| eprintln!("skipped record: {error}"));

    let config = RunLoopConfig {
        heartbeat: Duration::from_secs(heartbeat_secs),
        ..Default::default()
    };

    match run_with_callbacks(conn, generation, handlers, config, stop_token).await {
        StreamError::Cancelled => {
            println!("Stopped.");
            Ok(())
        }
        terminal => Err(terminal.to_string()),
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
}
