use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use streamfs_core::{
    FileSystem, FileSystemConfig, ObjectInfo, ObjectKey, SystemMetadata, CONFIG_ENV,
};
use streamfs_storage::LocalObjectStore;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Fs = FileSystem<SystemMetadata>;

#[derive(Debug, Parser)]
#[command(
    name = "streamfs",
    about = "Stream files to and from object storage"
)]
struct Cli {
    /// Directory backing the local object store
    #[arg(long, global = true, env = "STREAMFS_ROOT", default_value = "./streamfs-data")]
    root: PathBuf,

    /// S3 bucket to mount instead of the local store
    #[arg(long, global = true, env = "STREAMFS_BUCKET")]
    bucket: Option<String>,

    /// Path to the file system config file (JSON)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a file to stdout
    Cat { path: String },
    /// Upload stdin or a local file
    Put {
        path: String,
        /// Read from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        cache_control: Option<String>,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Show metadata of a file or directory
    Stat { path: String },
    /// List names matching `<dir>|<regex>`
    Glob { pattern: String },
    /// Delete a file
    Rm { path: String },
    /// Copy a file to s3://bucket/key
    Cp { source: String, target: String },
    /// Block until a file exists
    Wait {
        path: String,
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },
    /// Print keys under a prefix, one page at a time
    Keys {
        #[arg(default_value = "/")]
        prefix: String,
        /// Stop after this many keys and print a resume cursor
        #[arg(long)]
        limit: Option<usize>,
        /// Resume after this key
        #[arg(long)]
        after: Option<String>,
    },
    /// Print a pre-signed URL
    Url {
        path: String,
        /// Sign an upload instead of a download
        #[arg(long)]
        put: bool,
        #[arg(long, default_value_t = 300)]
        ttl_secs: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_observability(cli.log_json);

    let fs = mount(&cli)?;
    debug!(?fs, "mounted");

    match cli.command {
        Commands::Cat { path } => {
            let mut file = fs.open(&path)?;
            let mut stdout = io::stdout().lock();
            io::copy(&mut file, &mut stdout).with_context(|| format!("reading {}", path))?;
            stdout.flush()?;
        }
        Commands::Put {
            path,
            file,
            content_type,
            cache_control,
        } => {
            let attributes = SystemMetadata {
                content_type: content_type.unwrap_or_default(),
                cache_control: cache_control.unwrap_or_default(),
                ..Default::default()
            };
            let mut source: Box<dyn Read> = match &file {
                Some(local) => Box::new(
                    File::open(local).with_context(|| format!("opening {}", local.display()))?,
                ),
                None => Box::new(io::stdin().lock()),
            };

            upload(&fs, &path, attributes, &mut source)?;
            let info = fs.stat(&path)?;
            info!(path = %path, size = info.size(), "uploaded");
            print_info(&info, cli.json);
        }
        Commands::Ls { path } => {
            let entries = fs.read_dir(&path)?;
            if cli.json {
                let rows: Vec<_> = entries.iter().map(info_json).collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for entry in &entries {
                    println!("{:>12}  {:<25}  {}", entry.size(), modified(entry), entry.name());
                }
            }
        }
        Commands::Stat { path } => {
            let info = fs.stat(&path)?;
            print_info(&info, cli.json);
        }
        Commands::Glob { pattern } => {
            for name in fs.glob(&pattern)? {
                println!("{}", name);
            }
        }
        Commands::Rm { path } => {
            fs.remove(&path)?;
            info!(path = %path, "removed");
        }
        Commands::Cp { source, target } => {
            fs.copy(&source, &target)?;
            info!(source = %source, target = %target, "copied");
        }
        Commands::Wait { path, timeout_secs } => {
            fs.wait(&path, Duration::from_secs(timeout_secs))?;
            println!("{} exists", path);
        }
        Commands::Keys {
            prefix,
            limit,
            after,
        } => {
            let mut seq = fs.matching(&prefix)?;
            if let Some(after) = after {
                seq = seq.continue_from(&ObjectKey::parse(after.trim_start_matches('/')));
            }
            if let Some(limit) = limit {
                seq = seq.limit(limit);
            }
            while seq.tail() {
                let key = seq.head()?;
                if cli.json {
                    println!("{}", json!({ "hash": key.hash_key, "sort": key.sort_key }));
                } else {
                    println!("{}", key);
                }
            }
            if let Some(err) = seq.error() {
                return Err(err.clone().into());
            }
            if limit.is_some() {
                let cursor = seq.cursor();
                if !cursor.is_empty() {
                    eprintln!("resume with --after {}", cursor.to_key());
                }
            }
        }
        Commands::Url {
            path,
            put,
            ttl_secs,
        } => {
            let ttl = Duration::from_secs(ttl_secs);
            let url = if put {
                fs.put_url(&path, &SystemMetadata::default(), ttl)?
            } else {
                fs.get_url(&path, ttl)?
            };
            println!("{}", url);
        }
    }

    Ok(())
}

fn mount(cli: &Cli) -> anyhow::Result<Fs> {
    let config = match &cli.config {
        Some(path) => FileSystemConfig::from_path(path)?,
        None => FileSystemConfig::default(),
    };

    if let Some(bucket) = &cli.bucket {
        return mount_bucket(bucket, config);
    }

    let store = LocalObjectStore::new(&cli.root)
        .with_context(|| format!("opening local store at {}", cli.root.display()))?;
    info!(root = %cli.root.display(), "using local object store");
    Ok(FileSystem::builder()
        .with_backend(Arc::new(store))
        .with_config(config)
        .build()?)
}

#[cfg(feature = "s3")]
fn mount_bucket(bucket: &str, config: FileSystemConfig) -> anyhow::Result<Fs> {
    let store = streamfs_storage::S3ObjectStore::new(bucket)?;
    info!(bucket, "using s3 object store");
    Ok(FileSystem::builder()
        .with_backend(Arc::new(store.clone()))
        .with_signer(Arc::new(store))
        .with_config(config)
        .build()?)
}

#[cfg(not(feature = "s3"))]
fn mount_bucket(bucket: &str, _config: FileSystemConfig) -> anyhow::Result<Fs> {
    anyhow::bail!("cannot mount bucket {}: built without the s3 feature", bucket)
}

/// Stream `source` into `path`. A failed copy cancels the upload and is
/// reported ahead of anything the cancel itself returns.
fn upload(
    fs: &Fs,
    path: &str,
    attributes: SystemMetadata,
    source: &mut dyn Read,
) -> anyhow::Result<()> {
    let mut stream = fs.create(path, attributes)?;
    if let Err(err) = io::copy(source, &mut stream) {
        if let Err(cancel_err) = stream.cancel() {
            warn!(path, error = %cancel_err, "cancel after failed copy");
        }
        return Err(err).with_context(|| format!("writing {}", path));
    }
    stream.close()?;
    Ok(())
}

fn modified(info: &ObjectInfo<SystemMetadata>) -> String {
    info.modified()
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".into())
}

fn info_json(info: &ObjectInfo<SystemMetadata>) -> serde_json::Value {
    let attributes = info.attributes();
    json!({
        "name": info.name(),
        "dir": info.is_dir(),
        "size": info.size(),
        "modified": info.modified(),
        "content_type": attributes.map(|a| a.content_type.as_str()),
        "cache_control": attributes.map(|a| a.cache_control.as_str()),
        "etag": attributes.map(|a| a.etag.as_str()),
    })
}

fn print_info(info: &ObjectInfo<SystemMetadata>, as_json: bool) {
    if as_json {
        println!("{:#}", info_json(info));
        return;
    }
    println!("name:     {}", info.name());
    println!("dir:      {}", info.is_dir());
    println!("size:     {}", info.size());
    println!("modified: {}", modified(info));
    if let Some(attrs) = info.attributes() {
        if !attrs.content_type.is_empty() {
            println!("type:     {}", attrs.content_type);
        }
        if !attrs.etag.is_empty() {
            println!("etag:     {}", attrs.etag);
        }
    }
}

fn init_observability(as_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,streamfs_core=debug,streamfs_storage=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if as_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(false)
                    .with_thread_ids(true)
                    .json(),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamfs_storage::MemoryObjectStore;

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"))
        }
    }

    fn memory() -> (Arc<MemoryObjectStore>, Fs) {
        let store = Arc::new(MemoryObjectStore::new("bucket"));
        let fs = FileSystem::builder()
            .with_backend(store.clone())
            .build()
            .unwrap();
        (store, fs)
    }

    #[test]
    fn test_upload_reports_copy_error() {
        let (store, fs) = memory();
        let err =
            upload(&fs, "/broken.txt", SystemMetadata::default(), &mut Broken).unwrap_err();

        assert_eq!(err.to_string(), "writing /broken.txt");
        let source = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
        assert!(fs.stat("/broken.txt").unwrap_err().is_not_exist());
        assert_eq!(store.pending_uploads(), 0);
    }

    #[test]
    fn test_upload_stores_source() {
        let (_, fs) = memory();
        let mut body: &[u8] = b"from stdin";
        upload(&fs, "/ok.txt", SystemMetadata::default(), &mut body).unwrap();
        assert_eq!(fs.stat("/ok.txt").unwrap().size(), 10);
    }
}
