//! parley: end-to-end encrypted chat payloads from the command line
//!
//! Commands:
//!   keygen              - generate an ephemeral key pair, print the public key or contact card
//!   seal                - encrypt a text or media file for a peer public key
//!   inspect [<file>]    - describe an encrypted message without any keys
//!   demo                - two sessions exchanging text, location and media in-process
//!   config show         - display current configuration
//!
//! Private keys are never written anywhere: a key pair lives as long as the
//! process that generated it.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use parley_core::config::ParleyConfig;
use parley_core::types::CONTACT_CARD_TYPE;
use parley_core::{ContactCard, Location, LocationMode, MediaKind, MediaMetadata};
use parley_crypto::{
    ChatMessage, ChatPayload, ChunkedEnvelope, DecryptEvent, KeyPair, LiveShare, OpenedPayload,
    Session, WireMessage, TAG_SIZE,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "parley",
    version,
    about = "End-to-end encrypted chat payloads",
    long_about = "parley: hybrid RSA-OAEP / AES-256-GCM sealing of chat text, locations and media"
)]
struct Cli {
    /// Path to parley.toml configuration file
    #[arg(long, short = 'c', env = "PARLEY_CONFIG", default_value = "parley.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log].level
    #[arg(long, env = "PARLEY_LOG")]
    log: Option<String>,

    /// Log format; overrides [log].format
    #[arg(long, env = "PARLEY_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MediaArg {
    Image,
    Video,
}

impl From<MediaArg> for MediaKind {
    fn from(arg: MediaArg) -> Self {
        match arg {
            MediaArg::Image => MediaKind::Image,
            MediaArg::Video => MediaKind::Video,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a key pair and print its public half
    ///
    /// The private key is discarded when the command exits; use `demo` for a
    /// complete exchange.
    Keygen {
        /// Print a QR contact card for this username instead of the bare key
        #[arg(long, short = 'u')]
        username: Option<String>,
        /// RSA modulus size (overrides [crypto].rsa_key_bits)
        #[arg(long)]
        bits: Option<usize>,
    },

    /// Encrypt a text message or a media file for a peer
    Seal {
        /// Peer public key (base64 SPKI) or contact card JSON
        #[arg(long, short = 'k', env = "PARLEY_PEER_KEY", conflicts_with = "peer_file")]
        peer: Option<String>,
        /// File containing the peer public key or contact card
        #[arg(long)]
        peer_file: Option<PathBuf>,
        /// Text to seal
        #[arg(long, short = 't', conflicts_with = "file")]
        text: Option<String>,
        /// Media file to seal (already compressed)
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,
        /// Media kind of --file
        #[arg(long, value_enum, default_value = "image")]
        kind: MediaArg,
        /// Write the transport JSON here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Describe a sealed message (transport JSON, tagged or legacy wire form)
    Inspect {
        /// Input file (default: stdin)
        path: Option<PathBuf>,
    },

    /// Run a two-party exchange in-process over an in-memory relay
    Demo {
        /// Text message Alice sends to Bob
        #[arg(long, default_value = "hello bob, this one is end-to-end encrypted")]
        text: String,
        /// Size of the synthetic image Alice sends
        #[arg(long, default_value_t = 2 * 1024 * 1024)]
        media_bytes: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, from_file) = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !from_file {
        warn!("config file not found: {}  (using defaults)", cli.config.display());
    }
    debug!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "parley starting");

    match cli.command {
        Commands::Keygen { username, bits } => {
            cmd_keygen(&config, username.as_deref(), bits).await
        }
        Commands::Seal { peer, peer_file, text, file, kind, output } => {
            let peer = read_peer(peer, peer_file.as_deref()).await?;
            cmd_seal(
                &config,
                &peer,
                text.as_deref(),
                file.as_deref(),
                kind.into(),
                output.as_deref(),
            )
            .await
        }
        Commands::Inspect { path } => cmd_inspect(path.as_deref()).await,
        Commands::Demo { text, media_bytes } => cmd_demo(&config, &text, media_bytes).await,
        Commands::Config { action: ConfigAction::Show } => {
            cmd_config_show(&config, &cli.config, from_file)
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries sealed output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Returns the config and whether it came from a file.
fn load_config(path: &Path) -> Result<(ParleyConfig, bool)> {
    if !path.exists() {
        return Ok((ParleyConfig::default(), false));
    }

    let config = ParleyConfig::load(path)
        .with_context(|| format!("loading config: {}", path.display()))?;
    Ok((config, true))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")
            .context("progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}

fn make_spinner(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}").context("spinner template")?,
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

// ── `parley keygen` ───────────────────────────────────────────────────────────

async fn cmd_keygen(
    config: &ParleyConfig,
    username: Option<&str>,
    bits: Option<usize>,
) -> Result<()> {
    let bits = bits.unwrap_or(config.crypto.rsa_key_bits);

    let spinner = make_spinner("keygen")?;
    spinner.set_message(format!("generating RSA-{bits} key pair"));
    let pair = tokio::task::spawn_blocking(move || KeyPair::generate(bits))
        .await
        .context("key generation task")??;
    spinner.finish_and_clear();

    let encoded = parley_crypto::keystore::encode_public_key(pair.public_key())?;
    match username {
        Some(name) => println!("{}", ContactCard::new(name, encoded).to_json()?),
        None => println!("{encoded}"),
    }

    info!(bits = pair.bits(), "public key exported; private key discarded on exit");
    Ok(())
}

// ── `parley seal` ─────────────────────────────────────────────────────────────

async fn read_peer(peer: Option<String>, peer_file: Option<&Path>) -> Result<String> {
    match (peer, peer_file) {
        (Some(peer), _) => Ok(peer),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading peer key: {}", path.display())),
        (None, None) => anyhow::bail!("a peer key is required: pass --peer or --peer-file"),
    }
}

async fn cmd_seal(
    config: &ParleyConfig,
    peer: &str,
    text: Option<&str>,
    file: Option<&Path>,
    kind: MediaKind,
    output: Option<&Path>,
) -> Result<()> {
    let mut session = Session::new(&config.crypto)?;
    if let Some(name) = session
        .keys_mut()
        .import_peer_public_key(peer)
        .context("importing peer public key")?
    {
        info!(peer = %name, "sealing for contact card");
    }

    let message = match (text, file) {
        (Some(text), _) => session.seal_text(text)?,
        (None, Some(path)) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading media: {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let metadata =
                MediaMetadata::new(kind, &name, guess_mime(path, kind), bytes.len() as u64);
            session
                .seal_media(kind, &bytes, &metadata)
                .with_context(|| format!("sealing {kind} {}", path.display()))?
        }
        (None, None) => anyhow::bail!("nothing to seal: pass --text or --file"),
    };

    let json = String::from_utf8(message.to_transport_bytes()?).context("transport JSON")?;
    match output {
        Some(path) => {
            tokio::fs::write(path, &json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(
                path = %path.display(),
                subtype = message.payload.subtype(),
                bytes = json.len(),
                "sealed message written"
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn guess_mime(path: &Path, kind: MediaKind) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => match kind {
            MediaKind::Image => "image/*",
            MediaKind::Video => "video/*",
        },
    }
}

// ── `parley inspect` ──────────────────────────────────────────────────────────

async fn cmd_inspect(path: Option<&Path>) -> Result<()> {
    let input = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("reading stdin")?;
            buf
        }
    };

    for line in describe(&input)? {
        println!("{line}");
    }
    Ok(())
}

/// Human-readable summary of a sealed message; needs no key material.
fn describe(input: &str) -> Result<Vec<String>> {
    let input = input.trim();

    if let Ok(message) = ChatMessage::from_transport_bytes(input.as_bytes()) {
        let mut lines = vec![format!(
            "chat message: {} (sealed at {})",
            message.payload.subtype(),
            message.timestamp
        )];
        if let Some(preview) = &message.preview {
            lines.push(format!("  preview:      {preview}"));
        }
        match &message.payload {
            ChatPayload::Text(wire) => lines.extend(describe_wire(wire)),
            ChatPayload::Location { mode, message } => {
                lines.push(format!("  location:     {mode}"));
                lines.extend(describe_wire(message));
            }
            ChatPayload::LiveStop => lines.push("  live location sharing ended".to_string()),
            ChatPayload::Media { kind, envelope } => {
                lines.push(format!("  media kind:   {kind}"));
                lines.extend(describe_chunked(envelope));
            }
        }
        return Ok(lines);
    }

    if let Ok(wire) = WireMessage::from_json(input) {
        return Ok(describe_wire(&wire));
    }

    if serde_json::from_str::<ContactCard>(input).is_ok_and(|c| c.card_type == CONTACT_CARD_TYPE) {
        anyhow::bail!("this is a contact card, not a sealed message");
    }

    let wire = WireMessage::from_legacy(input).context("not a parley message")?;
    let mut lines = vec!["legacy (untagged) message".to_string()];
    lines.extend(describe_wire(&wire));
    Ok(lines)
}

fn describe_wire(wire: &WireMessage) -> Vec<String> {
    match wire {
        WireMessage::Direct { ciphertext } => vec![
            "  encryption:   direct RSA-OAEP".to_string(),
            format!("  ciphertext:   {} bytes", ciphertext.len()),
        ],
        WireMessage::Hybrid(envelope) => vec![
            "  encryption:   hybrid RSA-OAEP + AES-256-GCM".to_string(),
            format!("  wrapped key:  {} bytes", envelope.encrypted_key.len()),
            format!(
                "  payload:      {} ({} plaintext)",
                fmt_bytes(envelope.encrypted_payload.len() as u64),
                fmt_bytes(envelope.encrypted_payload.len().saturating_sub(TAG_SIZE) as u64)
            ),
        ],
        WireMessage::Chunked(envelope) => describe_chunked(envelope),
    }
}

fn describe_chunked(envelope: &ChunkedEnvelope) -> Vec<String> {
    let largest = envelope.chunks.iter().map(|c| c.data.len()).max().unwrap_or(0);
    vec![
        "  encryption:   chunked AES-256-GCM, key wrapped with RSA-OAEP".to_string(),
        format!("  total size:   {}", fmt_bytes(envelope.total_size)),
        format!(
            "  chunks:       {} present of {} declared (largest {})",
            envelope.chunks.len(),
            envelope.total_chunks,
            fmt_bytes(largest.saturating_sub(TAG_SIZE) as u64)
        ),
        format!("  metadata:     {} bytes encrypted", envelope.encrypted_metadata.len()),
    ]
}

// ── `parley demo` ─────────────────────────────────────────────────────────────

async fn cmd_demo(config: &ParleyConfig, text: &str, media_bytes: usize) -> Result<()> {
    let spinner = make_spinner("keygen")?;
    spinner.set_message(format!(
        "generating two RSA-{} key pairs",
        config.crypto.rsa_key_bits
    ));
    let crypto = config.crypto.clone();
    let (mut alice, mut bob) = tokio::task::spawn_blocking(move || -> Result<(Session, Session)> {
        let mut alice = Session::new(&crypto)?;
        let mut bob = Session::new(&crypto)?;
        alice.keys_mut().generate_key_pair()?;
        bob.keys_mut().generate_key_pair()?;
        Ok((alice, bob))
    })
    .await
    .context("key generation task")??;
    spinner.finish_and_clear();

    // Out-of-band exchange: Alice shows a contact card, Bob sends a bare key
    let alice_card = alice.keys().contact_card("alice")?.to_json()?;
    let peer = bob.keys_mut().import_peer_public_key(&alice_card)?;
    alice
        .keys_mut()
        .import_peer_public_key(&bob.keys().export_public_key()?)?;
    println!("keys exchanged (bob scanned card of {})", peer.unwrap_or_default());

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(16);
    let receiver = tokio::spawn(async move {
        let mut opened = Vec::new();
        while let Some(bytes) = rx.recv().await {
            let message = ChatMessage::from_transport_bytes(&bytes)?;
            opened.push(receive(&bob, message).await?);
        }
        Ok::<_, anyhow::Error>(opened)
    });

    let location = Location::new(48.8584, 2.2945, 10.0);
    let image: Vec<u8> = (0..media_bytes)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect();
    let metadata =
        MediaMetadata::new(MediaKind::Image, "demo.webp", "image/webp", media_bytes as u64)
            .with_dimensions(1920, 1080);

    let mut outgoing = vec![alice.seal_text(text)?, alice.seal_location(&location)?];
    let mut expected = vec![
        OpenedPayload::Text(text.to_string()),
        OpenedPayload::Location {
            mode: LocationMode::Current,
            location: location.clone(),
        },
    ];

    // A short walk: the middle fix moves only a few meters and is not sent
    let mut share = LiveShare::new();
    let walk = [
        location.clone(),
        Location::new(48.85843, 2.2945, 10.0),
        Location::new(48.8587, 2.2947, 10.0),
    ];
    for fix in &walk {
        if let Some(message) = share.update(&alice, fix)? {
            outgoing.push(message);
            expected.push(OpenedPayload::Location {
                mode: LocationMode::Live,
                location: fix.clone(),
            });
        }
    }
    outgoing.push(share.stop(&alice));
    expected.push(OpenedPayload::LiveStop);

    outgoing.push(alice.seal_media(MediaKind::Image, &image, &metadata)?);
    for message in &outgoing {
        let bytes = message.to_transport_bytes()?;
        println!(
            "alice -> relay: {:<8} {}",
            message.payload.subtype(),
            fmt_bytes(bytes.len() as u64)
        );
        tx.send(bytes).await.context("relay closed")?;
    }
    drop(tx);

    let opened = receiver.await.context("receiver task")??;
    anyhow::ensure!(opened.len() == outgoing.len(), "relay lost messages");

    for (got, want) in opened.iter().zip(expected.iter()) {
        anyhow::ensure!(got == want, "decrypted payload differs from what was sent");
    }
    match &opened[expected.len()] {
        OpenedPayload::Media { media, .. } => {
            anyhow::ensure!(media.buffer == image, "decrypted media differs");
            anyhow::ensure!(media.metadata == metadata, "decrypted metadata differs");
        }
        other => anyhow::bail!("expected media, got {other:?}"),
    }

    println!("all {} payloads verified", opened.len());
    Ok(())
}

/// Bob's side: open one message, with a progress bar for media.
async fn receive(bob: &Session, message: ChatMessage) -> Result<OpenedPayload> {
    let kind = match &message.payload {
        ChatPayload::Media { kind, .. } => *kind,
        _ => return open_small(bob, message),
    };

    let mut stream = bob.open_media_stream(message)?;
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = stream.next().await {
        match event {
            DecryptEvent::Progress(progress) => {
                if bar.is_none() {
                    bar = Some(make_progress_bar(progress.total, "decrypt")?);
                }
                if let Some(bar) = &bar {
                    bar.set_position(progress.completed);
                }
            }
            DecryptEvent::Finished(result) => {
                if let Some(bar) = &bar {
                    bar.finish_and_clear();
                }
                let media = result.context("decrypting media")?;
                println!(
                    "relay -> bob:   {kind}    {} {} ({})",
                    media.metadata.original_name,
                    fmt_bytes(media.buffer.len() as u64),
                    media.metadata.mime_type
                );
                return Ok(OpenedPayload::Media { kind, media });
            }
        }
    }
    anyhow::bail!("media stream ended without a result")
}

fn open_small(bob: &Session, message: ChatMessage) -> Result<OpenedPayload> {
    let opened = bob.open(message)?;
    match &opened {
        OpenedPayload::Text(text) => println!("relay -> bob:   text     {text:?}"),
        OpenedPayload::Location { mode, location } => println!(
            "relay -> bob:   location {:.4}, {:.4} ({}, {mode})",
            location.latitude,
            location.longitude,
            location.accuracy_label()
        ),
        OpenedPayload::LiveStop => println!("relay -> bob:   live location stopped"),
        OpenedPayload::Media { kind, media } => {
            println!("relay -> bob:   {kind}    {}", fmt_bytes(media.buffer.len() as u64))
        }
    }
    Ok(opened)
}

// ── `parley config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &ParleyConfig, config_path: &Path, from_file: bool) -> Result<()> {
    if from_file {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
