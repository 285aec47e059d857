//! Keycrypt CLI - Command line interface for key pairs and encrypted bundles.
//!
//! This tool generates and manages RSA key pairs, encrypts files and
//! directories into self-contained bundles, and backs up the catalog.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use keycrypt_app::{Keycrypt, OperationRunner};
use keycrypt_catalog::KeyPairRecord;
use keycrypt_common::Outcome;
use keycrypt_vault::KeycryptConfig;

#[derive(Parser)]
#[command(name = "keycrypt")]
#[command(about = "Keycrypt - Hybrid encryption with managed RSA key pairs")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog database (overrides configuration and KEYCRYPT_CATALOG).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new key pair.
    Generate {
        /// Key pair name.
        #[arg(short, long)]
        key_pair_name: String,

        /// Hint to help remember the password.
        #[arg(long)]
        hint: Option<String>,

        /// Protect the private key with a password (prompted).
        #[arg(short, long)]
        password: bool,
    },

    /// Import a key pair from PEM files.
    ImportKey {
        /// Key pair name.
        #[arg(short, long)]
        key_pair_name: String,

        /// Private key file.
        #[arg(long)]
        private_key: PathBuf,

        /// Public key file.
        #[arg(long)]
        public_key: PathBuf,

        /// Hint to help remember the password.
        #[arg(long)]
        hint: Option<String>,

        /// The private key is password protected (prompted).
        #[arg(short, long)]
        password: bool,
    },

    /// Export one key pair.
    ExportKey {
        /// Key pair name.
        #[arg(short, long)]
        key_pair_name: String,

        /// Destination directory.
        #[arg(short, long)]
        destination: PathBuf,
    },

    /// Export every key pair, each into its own directory.
    ExportAllKeys {
        /// Destination directory.
        #[arg(short, long)]
        destination: PathBuf,
    },

    /// Encrypt a file or directory.
    Encrypt {
        /// File or directory to encrypt.
        #[arg(short, long)]
        source: PathBuf,

        /// Destination directory.
        #[arg(short, long)]
        destination: PathBuf,

        /// Key pair name.
        #[arg(short, long)]
        key_pair_name: String,
    },

    /// Decrypt an encrypted bundle.
    Decrypt {
        /// Encrypted bundle.
        #[arg(short, long)]
        source: PathBuf,

        /// Destination directory.
        #[arg(short, long)]
        destination: PathBuf,

        /// Key pair name.
        #[arg(short, long)]
        key_pair_name: String,

        /// The private key is password protected (prompted).
        #[arg(short, long)]
        password: bool,
    },

    /// Create an encrypted backup of the catalog.
    DbBackup {
        /// Destination directory.
        #[arg(short, long)]
        destination: PathBuf,

        /// Password protected key pair to encrypt with.
        #[arg(short, long)]
        key_pair_name: String,
    },

    /// Restore the catalog from a backup (password prompted).
    DbRestore {
        /// Backup bundle.
        #[arg(short, long)]
        source: PathBuf,
    },

    /// Show all key pairs.
    ShowKeys,

    /// Show all archives.
    ShowArchives,

    /// Show one archive.
    ShowArchive {
        /// Archive name.
        #[arg(short, long)]
        archive_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_ref(), cli.catalog)?;
    debug!(catalog = %config.catalog_path.display(), "Using catalog");
    let app = Keycrypt::open(config).context("Failed to open catalog")?;
    let runner = OperationRunner::new(app);

    match cli.command {
        Commands::Generate {
            key_pair_name,
            hint,
            password,
        } => cmd_generate(&runner, key_pair_name, hint, password).await,

        Commands::ImportKey {
            key_pair_name,
            private_key,
            public_key,
            hint,
            password,
        } => cmd_import(&runner, key_pair_name, private_key, public_key, hint, password).await,

        Commands::ExportKey {
            key_pair_name,
            destination,
        } => cmd_export(&runner, key_pair_name, destination).await,

        Commands::ExportAllKeys { destination } => cmd_export_all(&runner, destination).await,

        Commands::Encrypt {
            source,
            destination,
            key_pair_name,
        } => cmd_encrypt(&runner, source, destination, key_pair_name).await,

        Commands::Decrypt {
            source,
            destination,
            key_pair_name,
            password,
        } => cmd_decrypt(&runner, source, destination, key_pair_name, password).await,

        Commands::DbBackup {
            destination,
            key_pair_name,
        } => cmd_backup(&runner, destination, key_pair_name).await,

        Commands::DbRestore { source } => cmd_restore(&runner, source).await,

        Commands::ShowKeys => cmd_show_keys(&runner).await,

        Commands::ShowArchives => cmd_show_archives(&runner).await,

        Commands::ShowArchive { archive_name } => cmd_show_archive(&runner, archive_name).await,
    }
}

/// Resolve configuration: file, then environment, then command line.
fn load_config(path: Option<&PathBuf>, catalog: Option<PathBuf>) -> Result<KeycryptConfig> {
    let config = match path {
        Some(path) => KeycryptConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => KeycryptConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(catalog) = catalog {
        config.catalog_path = catalog;
    }
    Ok(config)
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password))
}

fn optional_password(wanted: bool) -> Result<Option<Zeroizing<String>>> {
    if wanted {
        prompt_password("Password: ").map(Some)
    } else {
        Ok(None)
    }
}

fn print_advisories<T>(outcome: &Outcome<T>) {
    if !outcome.is_clean() {
        println!("{}", outcome.message());
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Password, hint and strength columns for a key pair.
fn password_columns(key_pair: &KeyPairRecord) -> (String, String, String) {
    match &key_pair.password {
        Some(meta) => (
            "True".to_string(),
            meta.hint.clone(),
            if meta.strong { "True" } else { "False" }.to_string(),
        ),
        None => ("False".to_string(), String::new(), String::new()),
    }
}

/// Generate a key pair.
async fn cmd_generate(
    runner: &OperationRunner,
    name: String,
    hint: Option<String>,
    password: bool,
) -> Result<()> {
    let password = if password {
        let password = prompt_password("Password: ")?;
        let confirm = prompt_password("Confirm: ")?;
        if password != confirm {
            anyhow::bail!("Password entries do not match");
        }
        Some(password)
    } else {
        None
    };

    let outcome = runner
        .run("generate", move |app| {
            app.generate_key_pair(&name, hint.as_deref(), password.as_ref().map(|p| p.as_str()))
        })
        .await
        .context("Failed to generate key pair")?;

    print_advisories(&outcome);
    println!("Key pair generated: {}", outcome.value().name);
    Ok(())
}

/// Import a key pair.
async fn cmd_import(
    runner: &OperationRunner,
    name: String,
    private_key: PathBuf,
    public_key: PathBuf,
    hint: Option<String>,
    password: bool,
) -> Result<()> {
    let password = optional_password(password)?;

    let outcome = runner
        .run("import-key", move |app| {
            app.import_key_pair(
                &name,
                &private_key,
                &public_key,
                hint.as_deref(),
                password.as_ref().map(|p| p.as_str()),
            )
        })
        .await
        .context("Failed to import key pair")?;

    print_advisories(&outcome);
    println!("Key pair imported: {}", outcome.value().name);
    Ok(())
}

/// Export one key pair.
async fn cmd_export(runner: &OperationRunner, name: String, destination: PathBuf) -> Result<()> {
    let outcome = runner
        .run("export-key", move |app| app.export_key_pair(&name, &destination))
        .await
        .context("Failed to export key pair")?;

    for path in outcome.value() {
        println!("Written: {}", path.display());
    }
    Ok(())
}

/// Export every key pair.
async fn cmd_export_all(runner: &OperationRunner, destination: PathBuf) -> Result<()> {
    let outcome = runner
        .run("export-all-keys", move |app| app.export_all_key_pairs(&destination))
        .await
        .context("Failed to export key pairs")?;

    println!("Exported {} key pair(s)", outcome.value().len());
    Ok(())
}

/// Encrypt a file or directory.
async fn cmd_encrypt(
    runner: &OperationRunner,
    source: PathBuf,
    destination: PathBuf,
    name: String,
) -> Result<()> {
    let outcome = runner
        .run("encrypt", move |app| app.encrypt(&source, &destination, &name))
        .await
        .context("Failed to encrypt")?;

    println!("Encrypted bundle: {}", outcome.value().bundle.display());
    Ok(())
}

/// Decrypt a bundle.
async fn cmd_decrypt(
    runner: &OperationRunner,
    source: PathBuf,
    destination: PathBuf,
    name: String,
    password: bool,
) -> Result<()> {
    let password = optional_password(password)?;

    let outcome = runner
        .run("decrypt", move |app| {
            app.decrypt(
                &source,
                &destination,
                &name,
                password.as_ref().map(|p| p.as_str()),
            )
        })
        .await
        .context("Failed to decrypt")?;

    println!("Decrypted {} file(s)", outcome.value().len());
    Ok(())
}

/// Back up the catalog.
async fn cmd_backup(runner: &OperationRunner, destination: PathBuf, name: String) -> Result<()> {
    let outcome = runner
        .run("db-backup", move |app| app.backup(&destination, &name))
        .await
        .context("Failed to back up catalog")?;

    print_advisories(&outcome);
    println!("Backup written: {}", outcome.value().bundle.display());
    Ok(())
}

/// Restore the catalog.
async fn cmd_restore(runner: &OperationRunner, source: PathBuf) -> Result<()> {
    let password = prompt_password("Password: ")?;

    let outcome = runner
        .run("db-restore", move |app| app.restore(&source, &password))
        .await
        .context("Failed to restore catalog")?;

    println!("Catalog restored: {}", outcome.value().catalog.display());
    println!("Previous catalog kept as: {}", outcome.value().rollover.display());
    Ok(())
}

/// Show all key pairs.
async fn cmd_show_keys(runner: &OperationRunner) -> Result<()> {
    let key_pairs = runner
        .run("show-keys", |app: &mut Keycrypt| app.key_pairs())
        .await
        .context("Failed to read key pairs")?;

    println!(
        "{:<32} {:<10} {:<64} {:<16} {:<32}",
        "Name", "Password", "Password Hint", "Strong Password", "Timestamp"
    );
    for key_pair in &key_pairs {
        let (password, hint, strong) = password_columns(key_pair);
        println!(
            "{:<32} {:<10} {:<64} {:<16} {:<32}",
            truncate(&key_pair.name, 32),
            password,
            truncate(&hint, 64),
            strong,
            timestamp(&key_pair.created_at)
        );
    }
    Ok(())
}

/// Show all archives.
async fn cmd_show_archives(runner: &OperationRunner) -> Result<()> {
    let archives = runner
        .run("show-archives", |app: &mut Keycrypt| app.archives())
        .await
        .context("Failed to read archives")?;

    println!(
        "{:<32} {:<64} {:<64} {:<32} {:<32}",
        "Name", "Source Path", "Destination Path", "Key Pair Name", "Timestamp"
    );
    for archive in &archives {
        println!(
            "{:<32} {:<64} {:<64} {:<32} {:<32}",
            truncate(&archive.name, 32),
            truncate(&archive.src_path, 64),
            truncate(&archive.dst_path, 64),
            archive.key_pair_name,
            timestamp(&archive.created_at)
        );
    }
    Ok(())
}

/// Show one archive.
async fn cmd_show_archive(runner: &OperationRunner, name: String) -> Result<()> {
    let (archive, key_pair) = runner
        .run("show-archive", move |app| {
            let archive = app.archive(&name)?;
            let key_pair = app.key_pair(&archive.key_pair_name)?;
            Ok((archive, key_pair))
        })
        .await
        .context("Failed to read archive")?;

    let (password, hint, strong) = password_columns(&key_pair);
    println!("Name             : {}", archive.name);
    println!("Source Path      : {}", archive.src_path);
    println!("Destination Path : {}", archive.dst_path);
    println!("Key Pair Name    : {}", key_pair.name);
    println!("Password         : {}", password);
    println!("Password Hint    : {}", hint);
    println!("Strong Password  : {}", strong);
    println!("Timestamp        : {}", timestamp(&archive.created_at));
    Ok(())
}
