//! radiochat - Serial Link Chat
//!
//! Chat with a microcontroller (or another radiochat) over a serial line and
//! stream bitmap images to it one brightness value at a time.

mod bitmap;
mod chat;
mod config;
mod link;
mod protocol;

use std::future::Future;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bitmap::{BitmapResult, BitmapSource, CancelToken, ImageTransfer, TransferOutcome};
use chat::ChatLog;
use config::Config;
use link::{LinkEvent, LinkManager, LinkResult, LinkState, SerialOpener};
use protocol::{encode_chat, BaudRate, Batching, ChatDecoder, ChatEntry, Direction, ImageEncoder};

/// radiochat - chat and image transfer over a serial link
#[derive(Parser)]
#[command(name = "radiochat")]
#[command(author = "radiochat contributors")]
#[command(version = "0.1.0")]
#[command(about = "Chat and send images over a serial link", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial devices on this host
    Ports,

    /// Open a link and chat interactively
    Chat {
        /// Serial device to open
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate (9600, 19200, 38400, 57600, 115200)
        #[arg(short, long)]
        baud: Option<BaudRate>,

        /// Name shown before your messages
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Send a BMP image and exit
    SendImage {
        /// BMP file to send
        path: PathBuf,

        /// Serial device to open
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate (9600, 19200, 38400, 57600, 115200)
        #[arg(short, long)]
        baud: Option<BaudRate>,

        /// Do not send the geometry header before the rows
        #[arg(long)]
        no_header: bool,

        /// per-value, per-row or chunked:<bytes>
        #[arg(long)]
        batching: Option<Batching>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Write the configuration (or the sample) to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// What a line typed into the chat prompt asks for
#[derive(Debug, PartialEq, Eq)]
enum ChatInput {
    Message(String),
    /// `/image`, with the path if one was given
    Image(Option<PathBuf>),
    History,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> ChatInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ChatInput::Empty;
    }
    match trimmed {
        "/quit" => return ChatInput::Quit,
        "/history" => return ChatInput::History,
        _ => {}
    }
    if let Some(rest) = trimmed.strip_prefix("/image") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            let path = rest.trim();
            return ChatInput::Image((!path.is_empty()).then(|| PathBuf::from(path)));
        }
    }
    ChatInput::Message(line.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    match cli.command {
        Commands::Ports => {
            list_ports()?;
        }
        Commands::Chat { port, baud, name } => {
            run_chat(config, port, baud, name).await?;
        }
        Commands::SendImage {
            path,
            port,
            baud,
            no_header,
            batching,
        } => {
            let mut config = config;
            if no_header {
                config.image.send_header = false;
            }
            if let Some(batching) = batching {
                config.image.batching = batching;
            }
            run_send_image(config, &path, port, baud).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else if let Some(path) = output {
                config.save(&path)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Print the serial devices the host reports
fn list_ports() -> anyhow::Result<()> {
    let devices = link::available_devices(&SerialOpener::default())?;

    if devices.is_empty() {
        println!("No serial devices found.");
    } else {
        println!("Serial devices:");
        for device in &devices {
            println!("  {}", device);
        }
    }

    let rates: Vec<String> = BaudRate::ALL.iter().map(|b| b.to_string()).collect();
    println!("\nBaud rates: {}", rates.join(", "));
    Ok(())
}

/// Pick the device from the command line, the config, or the only one present
fn resolve_device(
    manager: &LinkManager,
    port: Option<String>,
    config: &Config,
) -> anyhow::Result<String> {
    if let Some(port) = port.or_else(|| config.link.device.clone()) {
        return Ok(port);
    }

    let devices = link::available_devices(manager.opener())?;
    match devices.as_slice() {
        [only] => {
            tracing::info!("Using the only serial device found: {}", only);
            Ok(only.clone())
        }
        [] => anyhow::bail!("No serial devices found. Please specify --port."),
        many => anyhow::bail!(
            "Several serial devices found ({}). Please specify --port.",
            many.join(", ")
        ),
    }
}

/// Create a link manager and open it, reporting failure as a status line
fn connect(
    config: &Config,
    port: Option<String>,
    baud: Option<BaudRate>,
) -> anyhow::Result<(LinkManager, mpsc::UnboundedReceiver<LinkEvent>)> {
    let mut link = LinkManager::new(config.link.link_config());
    let events = link
        .take_event_receiver()
        .context("link event receiver already taken")?;

    let device = resolve_device(&link, port, config)?;
    let baud = baud.unwrap_or(config.link.baud);

    println!("Connecting to {} at {} baud...", device, baud);
    link.open(&device, baud)
        .with_context(|| format!("Failed to connect to {}", device))?;
    println!("Connected.");

    Ok((link, events))
}

fn print_entry(entry: &ChatEntry) {
    println!("{}", entry);
}

/// Route one link event into the chat log; returns false once the link is gone
fn handle_link_event(event: LinkEvent, decoder: &mut ChatDecoder, log: &mut ChatLog) -> bool {
    match event {
        LinkEvent::DataAvailable(data) => {
            for entry in decoder.decode(&data) {
                print_entry(log.append(entry));
            }
            true
        }
        LinkEvent::StateChanged(LinkState::Open { .. }) => true,
        LinkEvent::StateChanged(LinkState::Closed) => false,
        LinkEvent::Error { message } => {
            println!("Link error: {}", message);
            false
        }
    }
}

/// Run the interactive chat session
async fn run_chat(
    config: Config,
    port: Option<String>,
    baud: Option<BaudRate>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let name = name.unwrap_or_else(|| config.user.name.clone());
    let (mut link, mut events) = connect(&config, port, baud)?;

    let mut decoder = ChatDecoder::new(config.chat.inbound_framing, config.chat.max_line_len);
    let mut log = ChatLog::new();

    println!("\n========================================");
    println!("  radiochat");
    println!("========================================");
    if let LinkState::Open { device, baud } = link.state() {
        println!("  Device: {}", device);
        println!("  Baud: {}", baud);
    }
    println!("  Name: {}", name);
    println!("========================================");
    println!("\nType a message and press Enter to send.");
    println!("/image <file.bmp> sends an image, /history shows the log, /quit exits.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    ChatInput::Empty => {}
                    ChatInput::Quit => break,
                    ChatInput::History => {
                        if log.is_empty() {
                            println!("No messages yet.");
                        } else {
                            println!("{}", log.render());
                        }
                    }
                    ChatInput::Image(None) => {
                        tracing::debug!("No image file given, nothing sent");
                    }
                    ChatInput::Image(Some(path)) => {
                        send_image_interactive(
                            &mut link,
                            &mut events,
                            &mut decoder,
                            &mut log,
                            &config,
                            &path,
                        )
                        .await;
                    }
                    ChatInput::Message(text) => {
                        let encoded = encode_chat(&name, &text);
                        print_entry(log.append(encoded.echo));
                        let interrupt = async {
                            if tokio::signal::ctrl_c().await.is_err() {
                                std::future::pending::<()>().await;
                            }
                        };
                        let sent = send_chat(
                            &link,
                            &mut events,
                            &mut decoder,
                            &mut log,
                            encoded.wire,
                            interrupt,
                        )
                        .await;
                        match sent {
                            Some(Ok(())) => {}
                            Some(Err(e)) => println!("Send failed: {}", e),
                            None => println!("Send cancelled, the peer is not accepting data"),
                        }
                    }
                }
            }
            Some(event) = events.recv() => {
                if !handle_link_event(event, &mut decoder, &mut log) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nDisconnecting...");
                break;
            }
        }
    }

    if let Some(entry) = decoder.finish() {
        print_entry(log.append(entry));
    }
    let stats = link.stats();
    link.close();
    tracing::info!(
        "Chat ended after {} messages ({} sent, {} received; {} bytes out, {} bytes in, {} write retries)",
        log.len(),
        log.count(Direction::Outgoing),
        log.count(Direction::Incoming),
        stats.bytes_written,
        stats.bytes_read,
        stats.write_retries
    );

    Ok(())
}

/// Send one chat line while inbound traffic keeps being shown
///
/// Returns `None` if `interrupt` resolves first; the write is abandoned.
async fn send_chat<I>(
    link: &LinkManager,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    decoder: &mut ChatDecoder,
    log: &mut ChatLog,
    wire: Bytes,
    interrupt: I,
) -> Option<LinkResult<()>>
where
    I: Future<Output = ()>,
{
    let write = link.write(wire);
    tokio::pin!(write);
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            result = &mut write => return Some(result),
            Some(event) = events.recv() => {
                handle_link_event(event, decoder, log);
            }
            _ = &mut interrupt => {
                tracing::warn!("Chat send interrupted before the peer accepted it");
                return None;
            }
        }
    }
}

/// Load and send an image from inside the chat loop, reporting problems inline
async fn send_image_interactive(
    link: &mut LinkManager,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    decoder: &mut ChatDecoder,
    log: &mut ChatLog,
    config: &Config,
    path: &Path,
) {
    let source = match BitmapSource::load(path) {
        Ok(source) => source,
        Err(e) => {
            println!("Cannot send {}: {}", path.display(), e);
            return;
        }
    };
    let encoder = match ImageEncoder::new(config.image.send_header, config.image.batching) {
        Ok(encoder) => encoder,
        Err(e) => {
            println!("Invalid image settings: {}", e);
            return;
        }
    };

    match stream_image(link, events, decoder, log, &source, encoder).await {
        Ok(outcome) => report_outcome(outcome),
        Err(e) => println!("\nImage transfer failed: {}", e),
    }
}

/// Send one image and exit
async fn run_send_image(
    config: Config,
    path: &Path,
    port: Option<String>,
    baud: Option<BaudRate>,
) -> anyhow::Result<()> {
    let source = BitmapSource::load(path)?;
    let encoder = ImageEncoder::new(config.image.send_header, config.image.batching)?;
    let (mut link, mut events) = connect(&config, port, baud)?;

    let mut decoder = ChatDecoder::new(config.chat.inbound_framing, config.chat.max_line_len);
    let mut log = ChatLog::new();

    println!("Press Ctrl+C to cancel.\n");
    let outcome = stream_image(&mut link, &mut events, &mut decoder, &mut log, &source, encoder).await;
    tracing::debug!("Link stats: {:?}", link.stats());
    link.close();

    report_outcome(outcome?);
    Ok(())
}

/// Drive a transfer while still showing inbound chat; Ctrl+C cancels it
async fn stream_image(
    link: &mut LinkManager,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    decoder: &mut ChatDecoder,
    log: &mut ChatLog,
    source: &BitmapSource,
    encoder: ImageEncoder,
) -> BitmapResult<TransferOutcome> {
    let raster = source.raster();
    println!(
        "Sending {} ({}x{})",
        source.path().display(),
        raster.width(),
        raster.height()
    );

    let cancel = CancelToken::new();
    let transfer = ImageTransfer::new(encoder);
    let run = transfer.run(link, raster, &cancel, |progress| {
        print!(
            "\r  Line {}/{} ({}%)",
            progress.rows_sent,
            progress.rows_total,
            progress.percent()
        );
        let _ = std::io::stdout().flush();
    });
    tokio::pin!(run);

    loop {
        tokio::select! {
            outcome = &mut run => return outcome,
            Some(event) = events.recv() => {
                handle_link_event(event, decoder, log);
            }
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            }
        }
    }
}

fn report_outcome(outcome: TransferOutcome) {
    match outcome {
        TransferOutcome::Completed { rows, bytes } => {
            println!("\nImage sent: {} lines, {} bytes", rows, bytes);
        }
        TransferOutcome::Cancelled { rows_sent } => {
            println!("\nImage transfer cancelled after {} lines", rows_sent);
        }
    }
}
