mod args;

use std::env;

use mailscope_domain::{ProviderConfig, RawMessage};
use mailscope_error::{ErrorResponse, MailError};
use mailscope_inbox::format::{format_message, format_report};
use mailscope_inbox::{decode_batch, InboxService};
use tracing::{error, info};

use crate::args::{load_credentials, parse_decode, parse_fetch};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mailscope=info")),
        )
        .compact()
        .init();
}

async fn run_fetch(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let opts = parse_fetch(args)?;

    let mut config = ProviderConfig::for_provider(opts.provider.clone());
    if let Some(timeout) = opts.timeout {
        config = config.with_timeout(timeout);
    }
    let credentials = load_credentials(&opts.provider, opts.auth, |k| env::var(k).ok())?;

    let mut service = InboxService::new();
    service.register(config, credentials)?;

    let report = service.fetch_latest(&opts.provider, opts.limit).await?;
    println!("{}", format_report(&report, opts.format));
    Ok(())
}

async fn run_decode(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let (files, format) = parse_decode(args)?;

    let mut raw = Vec::with_capacity(files.len());
    for path in &files {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("read {path}: {e}"))?;
        raw.push(RawMessage::from(bytes));
    }

    let parsed = decode_batch(raw).await;
    info!(count = parsed.len(), "decoded archived messages");
    for (path, msg) in files.iter().zip(&parsed) {
        println!("{path}:\n{}", format_message(msg, format));
    }
    Ok(())
}

fn print_help() {
    eprintln!("Mailscope: fetch and decode the latest messages of an IMAP inbox");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  mailscope fetch [options]        Connect, fetch the newest messages, decode them");
    eprintln!("  mailscope decode <file.eml>...   Decode archived raw messages, no connection");
    eprintln!("  mailscope help                   Show this help");
    eprintln!();
    eprintln!("Fetch options:");
    eprintln!("  -p, --provider <name>    gmail | outlook | imap:<host> (default: gmail)");
    eprintln!("      --oauth              Authenticate with XOAUTH2 bearer token");
    eprintln!("      --password           Authenticate with LOGIN (not allowed for gmail)");
    eprintln!("  -n, --limit <N>          Newest N messages, 1..=50 (default: 10)");
    eprintln!("      --timeout <secs>     Connect/read/write deadline");
    eprintln!("  -f, --format <fmt>       compact | expanded | full (JSON)");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  GMAIL_EMAIL, GMAIL_ACCESS_TOKEN");
    eprintln!("  OUTLOOK_EMAIL, OUTLOOK_PASSWORD or OUTLOOK_ACCESS_TOKEN");
    eprintln!("  IMAP_EMAIL, IMAP_PASSWORD or IMAP_ACCESS_TOKEN (for imap:<host>)");
    eprintln!("  RUST_LOG                 Log level (default: mailscope=info)");
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let rest = args.get(2..).unwrap_or(&[]);

    let result = match cmd {
        "fetch" => run_fetch(rest).await,
        "decode" => run_decode(rest).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        unknown => {
            eprintln!("Unknown command: {unknown}");
            eprintln!("Run `mailscope help` for usage");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        match e.downcast_ref::<MailError>() {
            Some(mail) => eprintln!("{}", ErrorResponse::from(mail).to_compact()),
            None => eprintln!("error: {e}"),
        }
        error!(%e, "fatal error");
        std::process::exit(1);
    }
}
