//! coldstore CLI - content-addressed file store command line interface

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use coldstore::fs::TypeRegistry;
use coldstore::ops::{
    freeze, fsck, gc, ls, ls_recursive, pull, push, restore, snapshot_delete, snapshot_list,
    snapshot_make, status, thaw, FreezeOptions, PullOptions, PushOptions, RestoreOptions,
};
use coldstore::{Config, MetadataBackend, Remote, RemoteVolume, VolPath, Volume};

#[derive(Parser)]
#[command(name = "coldstore")]
#[command(about = "content-addressed, deduplicating file store")]
#[command(version)]
struct Cli {
    /// volume path (any directory inside the volume)
    #[arg(short = 'C', long, env = "COLDSTORE_VOLUME", default_value = ".")]
    volume: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Keydb,
    Pyramid,
}

#[derive(Subcommand)]
enum Commands {
    /// initialize a new volume
    Init {
        /// directory to turn into a volume
        #[arg(default_value = ".")]
        path: PathBuf,

        /// metadata store
        #[arg(long, value_enum, default_value = "keydb")]
        backend: Backend,
    },

    /// move regular files into the blobstore
    Freeze {
        /// volume path to freeze below
        subpath: Option<String>,
    },

    /// replace blob links with writable copies
    Thaw {
        /// volume path of a link or directory
        path: String,
    },

    /// freeze and record the tree as a snapshot
    Snapshot {
        name: String,
    },

    /// delete a snapshot (blobs stay until gc)
    SnapshotDelete {
        name: String,
    },

    /// list snapshots
    Snapshots {
        /// glob pattern
        pattern: Option<String>,
    },

    /// show what restoring a snapshot would change
    Status {
        name: String,
    },

    /// make the tree match a snapshot
    Restore {
        name: String,

        /// only show the deltas
        #[arg(long)]
        dry_run: bool,
    },

    /// fetch a snapshot from a remote and check it out
    Pull {
        /// configured remote name
        remote: String,

        /// snapshot name
        name: String,

        /// fetch blobs and store the snapshot only
        #[arg(long)]
        fetch_only: bool,

        /// local snapshot name
        #[arg(long)]
        save_as: Option<String>,
    },

    /// send a snapshot and its blobs to a remote
    Push {
        /// configured remote name
        remote: String,

        /// snapshot name
        name: String,

        /// only show what would be sent
        #[arg(long)]
        dry_run: bool,
    },

    /// delete blobs no snapshot or link refers to
    Gc {
        /// only show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// verify blob contents, permissions and references
    Fsck,

    /// list live tree entries with content types
    Ls {
        /// volume path
        #[arg(default_value = "/")]
        path: String,

        /// list recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// add a remote
    RemoteAdd {
        name: String,

        /// volume root, or object store root for buckets
        path: PathBuf,

        /// bucket name; makes this a bucket remote
        #[arg(long)]
        bucket: Option<String>,

        /// key prefix inside the bucket
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// remove a remote
    RemoteRemove {
        name: String,
    },

    /// list remotes
    Remotes,
}

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_env("COLDSTORE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_remote(volume: &Volume, name: &str) -> coldstore::Result<RemoteVolume> {
    let remote = volume
        .config()
        .get_remote(name)
        .ok_or_else(|| coldstore::Error::RemoteNotFound(name.to_string()))?;
    RemoteVolume::open(remote, &volume.config().retry)
}

fn run(cli: Cli) -> coldstore::Result<ExitCode> {
    match cli.command {
        Commands::Init { path, backend } => {
            let mut config = Config::default();
            config.metadata.backend = match backend {
                Backend::Keydb => MetadataBackend::KeyDb,
                Backend::Pyramid => MetadataBackend::Pyramid,
            };
            let volume = Volume::init_with(&path, config)?;
            println!("initialized coldstore volume at {}", volume.root().display());
        }

        Commands::Freeze { subpath } => {
            let volume = Volume::discover(&cli.volume)?;
            let opts = FreezeOptions {
                subpath: subpath.as_deref().map(VolPath::parse).transpose()?,
            };
            let stats = freeze(&volume, &opts)?;
            println!(
                "froze {} files: {} new blobs, {} duplicates, {} bytes",
                stats.files, stats.imported, stats.duplicates, stats.bytes
            );
        }

        Commands::Thaw { path } => {
            let volume = Volume::discover(&cli.volume)?;
            let count = thaw(&volume, &VolPath::parse(&path)?)?;
            println!("thawed {} links", count);
        }

        Commands::Snapshot { name } => {
            let volume = Volume::discover(&cli.volume)?;
            let snapshot = snapshot_make(&volume, &name)?;
            println!("{}: {} items", name, snapshot.len());
        }

        Commands::SnapshotDelete { name } => {
            let volume = Volume::discover(&cli.volume)?;
            snapshot_delete(&volume, &name)?;
            println!("deleted {}", name);
        }

        Commands::Snapshots { pattern } => {
            let volume = Volume::discover(&cli.volume)?;
            for name in snapshot_list(&volume, pattern.as_deref())? {
                println!("{}", name);
            }
        }

        Commands::Status { name } => {
            let volume = Volume::discover(&cli.volume)?;
            for delta in status(&volume, &name)? {
                println!("{}", delta);
            }
        }

        Commands::Restore { name, dry_run } => {
            let volume = Volume::discover(&cli.volume)?;
            let result = restore(&volume, &name, &RestoreOptions { dry_run })?;
            if dry_run {
                for delta in &result.deltas {
                    println!("{}", delta);
                }
            } else {
                println!(
                    "restored {}: {} removed, {} dirs, {} links",
                    name, result.stats.removed, result.stats.dirs, result.stats.links
                );
            }
        }

        Commands::Pull {
            remote,
            name,
            fetch_only,
            save_as,
        } => {
            let volume = Volume::discover(&cli.volume)?;
            let far = open_remote(&volume, &remote)?;
            let opts = PullOptions {
                fetch_only,
                save_as,
            };
            let result = pull(&volume, &far, &name, &opts)?;
            println!(
                "pulled {} from {}: {} blobs fetched, {} present, {} deltas applied",
                name,
                remote,
                result.fetched,
                result.present,
                result.deltas.len()
            );
        }

        Commands::Push {
            remote,
            name,
            dry_run,
        } => {
            let volume = Volume::discover(&cli.volume)?;
            let mut far = open_remote(&volume, &remote)?;
            let result = push(&volume, &mut far, &name, &PushOptions { dry_run })?;

            let action = if dry_run { "would send" } else { "sent" };
            println!(
                "{} {} blobs, {} already present",
                action,
                result.sent.len(),
                result.skipped
            );
            if !result.is_ok() {
                println!("\nfailed blobs:");
                for checksum in &result.failed {
                    println!("  {}", checksum);
                }
                println!("\nsnapshot {} was not pushed", name);
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Gc { dry_run } => {
            let volume = Volume::discover(&cli.volume)?;
            let stats = gc(&volume, dry_run)?;

            let action = if dry_run { "would remove" } else { "removed" };
            for checksum in &stats.removed {
                println!("{} {}", action, checksum);
            }
            println!(
                "{} {} of {} blobs ({} reachable)",
                action, stats.blobs_removed, stats.blobs_scanned, stats.reachable
            );
            println!("freed {} bytes", stats.bytes_freed);
        }

        Commands::Fsck => {
            let volume = Volume::discover(&cli.volume)?;
            let report = fsck(&volume)?;

            println!("blobs checked: {}", report.blobs_checked);

            if !report.corrupt.is_empty() {
                println!("\ncorrupt blobs:");
                for blob in &report.corrupt {
                    println!("  {} (content hashes to {})", blob.expected, blob.actual);
                }
            }

            if !report.writable.is_empty() {
                println!("\nwritable blobs:");
                for checksum in &report.writable {
                    println!("  {}", checksum);
                }
            }

            if !report.missing.is_empty() {
                println!("\nmissing blobs:");
                for blob in &report.missing {
                    println!("  {} (referenced by {})", blob.checksum, blob.referenced_by);
                }
            }

            if report.is_ok() {
                println!("\nvolume is healthy");
            } else {
                println!("\nvolume has issues");
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Ls { path, recursive } => {
            let volume = Volume::discover(&cli.volume)?;
            let types = TypeRegistry::with_defaults();
            let path = VolPath::parse(&path)?;
            let entries = if recursive {
                ls_recursive(&volume, &path, &types)?
            } else {
                ls(&volume, &path, &types)?
            };

            for entry in entries {
                let size = entry.size.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
                let mime = entry.mime.as_deref().unwrap_or("-");
                let checksum = entry
                    .checksum
                    .map(|c| c.to_hex())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<12} {:>10} {:<24} {} {}",
                    entry.kind.name(),
                    size,
                    mime,
                    checksum,
                    entry.path
                );
            }
        }

        Commands::RemoteAdd {
            name,
            path,
            bucket,
            prefix,
        } => {
            let mut volume = Volume::discover(&cli.volume)?;
            let remote = match bucket {
                Some(bucket) => Remote::bucket(&name, path, bucket, prefix),
                None => Remote::volume(&name, path),
            };
            volume.config_mut().add_remote(remote)?;
            volume.save_config()?;
            println!("added remote {}", name);
        }

        Commands::RemoteRemove { name } => {
            let mut volume = Volume::discover(&cli.volume)?;
            volume.config_mut().remove_remote(&name)?;
            volume.save_config()?;
            println!("removed remote {}", name);
        }

        Commands::Remotes => {
            let volume = Volume::discover(&cli.volume)?;
            for remote in &volume.config().remotes {
                match &remote.bucket {
                    Some(bucket) => println!(
                        "{}\tbucket\t{}\t{}/{}",
                        remote.name,
                        remote.path.display(),
                        bucket,
                        remote.prefix
                    ),
                    None => println!("{}\tvolume\t{}", remote.name, remote.path.display()),
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
