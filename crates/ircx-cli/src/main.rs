//! ircx: IRC end-to-end encryption tooling
//!
//! Key management:
//!   identity show|bundle                 - this device's fingerprint / public bundle
//!   dm list|import|repair|verify|...     - peer DM bundles per (network, nick)
//!   channel list|generate|export|...     - channel keys per (channel, network)
//!   backup export|import                 - password-protected key backup
//!
//! Encryption:
//!   msg encrypt|decrypt                  - text payloads for a channel or nick
//!   media encrypt|decrypt                - file frames for a channel or nick
//!
//!   config show                          - display the active configuration

mod keychain;

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};

use ircx_core::config::{expand_tilde, EngineConfig};
use ircx_core::ConversationRef;
use ircx_engine::{E2eeEngine, EncryptedPayload};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "ircx",
    version,
    about = "IRC end-to-end encryption keys and ciphers",
    long_about = "ircx: manage DM bundles, channel keys and backups; encrypt and decrypt IRC messages and media"
)]
struct Cli {
    /// Path to the ircx configuration file
    #[arg(
        long,
        short = 'c',
        env = "IRCX_CONFIG",
        default_value = "~/.config/ircx/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long, env = "IRCX_LOG")]
    log: Option<String>,

    /// Log format; overrides the config
    #[arg(long, env = "IRCX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Keep keys in memory only (nothing is read or written)
    #[arg(long)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// This device's identity
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },

    /// Direct-message key bundles
    Dm {
        #[command(subcommand)]
        action: DmAction,
    },

    /// Channel keys
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },

    /// Password-protected backup of all keys
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Encrypt or decrypt a text message
    Msg {
        #[command(subcommand)]
        action: MsgAction,
    },

    /// Encrypt or decrypt a media file
    Media {
        #[command(subcommand)]
        action: MediaAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum IdentityAction {
    /// Print this device's fingerprint
    Show,
    /// Print this device's public bundle for sending to a peer
    Bundle,
}

#[derive(Subcommand, Debug)]
enum DmAction {
    /// List all stored peer bundles
    List,
    /// Import a peer's bundle (read from stdin when omitted)
    Import {
        network: String,
        nick: String,
        bundle: Option<String>,
    },
    /// Replace a peer's bundle after they changed identity
    Repair {
        network: String,
        nick: String,
        bundle: Option<String>,
    },
    /// Mark a peer as verified (or not) after comparing fingerprints
    Verify {
        network: String,
        nick: String,
        /// Clear the verified flag instead
        #[arg(long)]
        revoke: bool,
    },
    /// Delete a peer's bundle
    Delete { network: String, nick: String },
    /// Copy a peer's bundle to another network
    Copy {
        from_network: String,
        to_network: String,
        nick: String,
    },
    /// Move a peer's bundle to another network
    Move {
        from_network: String,
        to_network: String,
        nick: String,
    },
    /// Print a peer's fingerprint
    Fingerprint { network: String, nick: String },
}

#[derive(Subcommand, Debug)]
enum ChannelAction {
    /// List channels with a key (no key material)
    List,
    /// Create a new key, replacing any existing one
    Generate { channel: String, network: String },
    /// Print a channel key for sharing with other members
    Export { channel: String, network: String },
    /// Install a key exported by another member (read from stdin when omitted)
    Import {
        channel: String,
        network: String,
        exported: Option<String>,
    },
    /// Remove a channel key
    Remove { channel: String, network: String },
}

#[derive(Subcommand, Debug)]
enum BackupAction {
    /// Write an encrypted backup of all keys
    Export {
        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Restore keys from a backup file
    Import { input: PathBuf },
}

/// A channel or a nick on a network.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct Target {
    /// Channel conversation
    #[arg(long)]
    channel: Option<String>,
    /// Direct-message conversation
    #[arg(long)]
    nick: Option<String>,
}

impl Target {
    fn conversation(&self, network: &str) -> Result<ConversationRef> {
        match (&self.channel, &self.nick) {
            (Some(channel), None) => Ok(ConversationRef::channel(network, channel)),
            (None, Some(nick)) => Ok(ConversationRef::query(network, nick)),
            _ => bail!("exactly one of --channel or --nick is required"),
        }
    }
}

#[derive(Subcommand, Debug)]
enum MsgAction {
    /// Encrypt text and print the wire payload
    Encrypt {
        #[arg(long, short = 'n')]
        network: String,
        #[command(flatten)]
        target: Target,
        /// Text to encrypt (read from stdin when omitted)
        text: Option<String>,
    },
    /// Decrypt a wire payload and print the text
    Decrypt {
        #[arg(long, short = 'n')]
        network: String,
        #[command(flatten)]
        target: Target,
        /// Payload JSON (read from stdin when omitted)
        payload: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum MediaAction {
    /// Encrypt a file into a frame in the media temp dir
    Encrypt {
        #[arg(long, short = 'n')]
        network: String,
        #[command(flatten)]
        target: Target,
        /// Per-item id bound into the frame
        #[arg(long)]
        media_id: Option<String>,
        path: PathBuf,
    },
    /// Decrypt a frame (raw or multipart-wrapped) into the media temp dir
    Decrypt {
        #[arg(long, short = 'n')]
        network: String,
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        media_id: Option<String>,
        path: PathBuf,
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
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = match cli.log_format {
        Some(f) => f,
        None if config.logging.format == "json" => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(level, &format);

    if let Commands::Config {
        action: ConfigAction::Show,
    } = cli.command
    {
        return cmd_config_show(&config, &config_path);
    }

    let engine = open_engine(&config, cli.ephemeral)?;
    engine.ready().await.context("crypto self test")?;

    match cli.command {
        Commands::Identity { action } => cmd_identity(&engine, action).await,
        Commands::Dm { action } => cmd_dm(&engine, action).await,
        Commands::Channel { action } => cmd_channel(&engine, action).await,
        Commands::Backup { action } => cmd_backup(&engine, action).await,
        Commands::Msg { action } => cmd_msg(&engine, action).await,
        Commands::Media { action } => cmd_media(&engine, action).await,
        Commands::Config { .. } => Ok(()),
    }
}

// ── Config loading / setup ────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<EngineConfig> {
    let config = if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        EngineConfig::from_toml(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?
    } else {
        EngineConfig::default()
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout stays clean for payloads and bundles.
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

fn open_engine(config: &EngineConfig, ephemeral: bool) -> Result<E2eeEngine> {
    if ephemeral {
        return Ok(E2eeEngine::from_config(config, None)?);
    }
    let store_path = expand_tilde(&config.keystore.path);
    let key = keychain::store_key(&store_path, config.keystore.use_keychain)?;
    E2eeEngine::from_config(config, Some(key))
        .with_context(|| format!("opening key store: {}", store_path.display()))
}

/// Use the argument if given, else read all of stdin.
fn arg_or_stdin(arg: Option<String>, what: &str) -> Result<String> {
    match arg {
        Some(value) => Ok(value),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .with_context(|| format!("reading {what} from stdin"))?;
            Ok(buf.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

fn read_password(prompt: &str, confirm: bool) -> Result<SecretString> {
    if let Ok(password) = std::env::var("IRCX_BACKUP_PASSWORD") {
        return Ok(SecretString::from(password));
    }
    let password = SecretString::from(rpassword::prompt_password(prompt).context("reading password")?);
    if password.expose_secret().is_empty() {
        bail!("empty password");
    }
    if confirm {
        let again = SecretString::from(
            rpassword::prompt_password("Confirm password: ").context("reading password")?,
        );
        if again.expose_secret() != password.expose_secret() {
            bail!("passwords do not match");
        }
    }
    Ok(password)
}

// ── `ircx config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &EngineConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    print!("{}", config.to_toml().context("serializing config to TOML")?);
    Ok(())
}

// ── `ircx identity` ───────────────────────────────────────────────────────────

async fn cmd_identity(engine: &E2eeEngine, action: IdentityAction) -> Result<()> {
    let dm = &engine.stores().dm;
    match action {
        IdentityAction::Show => {
            let identity = dm.identity().await?;
            println!("Fingerprint: {}", identity.fingerprint());
            println!("Created:     {}", identity.created_at());
        }
        IdentityAction::Bundle => println!("{}", dm.export_bundle().await?),
    }
    Ok(())
}

// ── `ircx dm` ─────────────────────────────────────────────────────────────────

async fn cmd_dm(engine: &E2eeEngine, action: DmAction) -> Result<()> {
    let dm = &engine.stores().dm;
    match action {
        DmAction::List => {
            let bundles = dm.list_all_keys().await?;
            if bundles.is_empty() {
                println!("No DM bundles.");
            }
            for b in bundles {
                println!(
                    "{:<16} {:<16} {}  {}",
                    b.network,
                    b.nick,
                    b.fingerprint,
                    if b.verified { "verified" } else { "unverified" }
                );
            }
        }
        DmAction::Import {
            network,
            nick,
            bundle,
        } => {
            let bundle = arg_or_stdin(bundle, "bundle")?;
            let record = dm
                .import_bundle(&network, &nick, &bundle)
                .await
                .with_context(|| format!("importing bundle for {nick} on {network}"))?;
            println!("Imported {nick} on {network}");
            println!("Fingerprint: {}", record.fingerprint);
            if !record.verified {
                println!("Compare this fingerprint with {nick}, then run `ircx dm verify {network} {nick}`.");
            }
        }
        DmAction::Repair {
            network,
            nick,
            bundle,
        } => {
            let bundle = arg_or_stdin(bundle, "bundle")?;
            let record = dm.repair_bundle(&network, &nick, &bundle).await?;
            println!("Re-paired {nick} on {network}");
            println!("Fingerprint: {} (unverified)", record.fingerprint);
        }
        DmAction::Verify {
            network,
            nick,
            revoke,
        } => {
            dm.set_verified_for_network(&network, &nick, !revoke).await?;
            println!(
                "{nick} on {network} marked {}",
                if revoke { "unverified" } else { "verified" }
            );
        }
        DmAction::Delete { network, nick } => {
            if dm.delete_bundle_for_network(&network, &nick).await? {
                println!("Deleted {nick} on {network}");
            } else {
                println!("No bundle for {nick} on {network}");
            }
        }
        DmAction::Copy {
            from_network,
            to_network,
            nick,
        } => {
            dm.copy_bundle_to_network(&from_network, &to_network, &nick)
                .await?;
            println!("Copied {nick}: {from_network} -> {to_network}");
        }
        DmAction::Move {
            from_network,
            to_network,
            nick,
        } => {
            dm.move_bundle_to_network(&from_network, &to_network, &nick)
                .await?;
            println!("Moved {nick}: {from_network} -> {to_network}");
        }
        DmAction::Fingerprint { network, nick } => {
            println!("{}", dm.fingerprint(&network, &nick).await?);
        }
    }
    Ok(())
}

// ── `ircx channel` ────────────────────────────────────────────────────────────

async fn cmd_channel(engine: &E2eeEngine, action: ChannelAction) -> Result<()> {
    let channels = &engine.stores().channels;
    match action {
        ChannelAction::List => {
            let keys = channels.list_channel_keys().await?;
            if keys.is_empty() {
                println!("No channel keys.");
            }
            for k in keys {
                println!("{:<16} {:<24} created {}", k.network, k.channel, k.created_at);
            }
        }
        ChannelAction::Generate { channel, network } => {
            channels.generate_channel_key(&channel, &network).await?;
            println!("Generated key for {channel} on {network}");
        }
        ChannelAction::Export { channel, network } => {
            println!("{}", channels.export_channel_key(&channel, &network).await?);
        }
        ChannelAction::Import {
            channel,
            network,
            exported,
        } => {
            let exported = arg_or_stdin(exported, "channel key")?;
            channels
                .import_channel_key(&channel, &network, &exported)
                .await?;
            println!("Imported key for {channel} on {network}");
        }
        ChannelAction::Remove { channel, network } => {
            if channels.remove_channel_key(&channel, &network).await? {
                println!("Removed key for {channel} on {network}");
            } else {
                println!("No key for {channel} on {network}");
            }
        }
    }
    Ok(())
}

// ── `ircx backup` ─────────────────────────────────────────────────────────────

async fn cmd_backup(engine: &E2eeEngine, action: BackupAction) -> Result<()> {
    let backup = &engine.stores().backup;
    match action {
        BackupAction::Export { output } => {
            let password = read_password("Backup password: ", true)?;
            let data = backup.export_key_backup(&password).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, format!("{data}\n"))
                        .await
                        .with_context(|| format!("writing backup: {}", path.display()))?;
                    eprintln!("Backup written to {}", path.display());
                }
                None => println!("{data}"),
            }
        }
        BackupAction::Import { input } => {
            let data = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("reading backup: {}", input.display()))?;
            let password = read_password("Backup password: ", false)?;
            let count = backup
                .import_key_backup(&data, &password)
                .await
                .context("restoring backup")?;
            println!("Restored {count} keys");
        }
    }
    Ok(())
}

// ── `ircx msg` ────────────────────────────────────────────────────────────────

async fn cmd_msg(engine: &E2eeEngine, action: MsgAction) -> Result<()> {
    match action {
        MsgAction::Encrypt {
            network,
            target,
            text,
        } => {
            let conversation = target.conversation(&network)?;
            let text = arg_or_stdin(text, "message")?;
            let payload = engine
                .messages()
                .encrypt(&conversation, &text)
                .await
                .with_context(|| format!("encrypting for {conversation}"))?;
            println!("{}", payload.to_wire());
        }
        MsgAction::Decrypt {
            network,
            target,
            payload,
        } => {
            let conversation = target.conversation(&network)?;
            let payload = EncryptedPayload::from_wire(&arg_or_stdin(payload, "payload")?)?;
            let text = engine
                .messages()
                .decrypt(&conversation, &payload)
                .await
                .with_context(|| format!("decrypting for {conversation}"))?;
            println!("{text}");
        }
    }
    Ok(())
}

// ── `ircx media` ──────────────────────────────────────────────────────────────

async fn cmd_media(engine: &E2eeEngine, action: MediaAction) -> Result<()> {
    match action {
        MediaAction::Encrypt {
            network,
            target,
            media_id,
            path,
        } => {
            let conversation = target.conversation(&network)?;
            let out = engine
                .media()
                .encrypt_file(&path, &conversation, media_id.as_deref())
                .await
                .with_context(|| format!("encrypting {}", path.display()))?;
            println!("{}", out.path.display());
            eprintln!("{} bytes", out.len);
        }
        MediaAction::Decrypt {
            network,
            target,
            media_id,
            path,
        } => {
            let conversation = target.conversation(&network)?;
            let out = engine
                .media()
                .decrypt_file(&path, &conversation, media_id.as_deref())
                .await
                .with_context(|| format!("decrypting {}", path.display()))?;
            println!("{}", out.path.display());
            eprintln!("{} ({} bytes)", out.mime, out.len);
        }
    }
    Ok(())
}
