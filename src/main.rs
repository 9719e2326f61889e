//! # Personal OS CLI (`pos`)
//!
//! The `pos` binary drives the content pipeline: it writes posts and media
//! (persisting them as `pending` and publishing lifecycle events), runs the
//! enrichment worker that consumes those events, and answers questions
//! from an owner's posts.
//!
//! ## Usage
//!
//! ```bash
//! pos --config ./config/pos.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pos init` | Create the SQLite database and run schema migrations |
//! | `pos worker` | Run the enrichment worker until SIGINT/SIGTERM |
//! | `pos post create` | Upload an image and create a pending post |
//! | `pos post update <id>` | Edit a post and publish `post.updated` |
//! | `pos post delete <id>` | Delete a post and its original asset |
//! | `pos media upload` | Upload a file to the media library |
//! | `pos media delete <id>` | Delete a media item and its asset |
//! | `pos chat "<question>"` | Answer a question from the owner's posts |
//! | `pos reconcile` | Re-publish events for records stuck in `pending` |
//!
//! ## Examples
//!
//! ```bash
//! pos init
//! pos worker -v &
//! pos post create --owner $OWNER --title "Hello" --content "First post" \
//!     --image ./hello.jpg --status public
//! pos chat "what did I write about hello?" --owner $OWNER
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use personal_os::app::App;
use personal_os::assets::create_asset_store;
use personal_os::chat::run_chat;
use personal_os::config;
use personal_os::media::{MediaService, NewMedia};
use personal_os::migrate;
use personal_os::posts::{NewPost, PostChanges, PostService};
use personal_os::reconcile::run_reconcile;
use personal_os::worker::run_worker;
use personal_os_core::models::{Metadata, PostStatus};

/// Personal OS: content pipeline with asynchronous enrichment.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pos.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pos",
    about = "Personal OS content pipeline: posts, media, enrichment worker and chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pos.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the content tables, and the
    /// event-channel tables. Safe to run more than once.
    Init,

    /// Run the enrichment worker.
    ///
    /// Consumes `post.events` and `media.events` until SIGINT or SIGTERM,
    /// then finishes the message in hand and exits.
    Worker,

    /// Manage posts.
    Post {
        #[command(subcommand)]
        action: PostAction,
    },

    /// Manage the media library.
    Media {
        #[command(subcommand)]
        action: MediaAction,
    },

    /// Ask a question answered from the owner's own posts.
    Chat {
        /// The question.
        query: String,

        /// Owner whose posts are searched.
        #[arg(long)]
        owner: Uuid,

        /// Number of posts used as context; 0 or less means 3.
        #[arg(long, default_value_t = 3)]
        limit: i64,

        /// Print the response and sources as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Re-publish creation events for records stuck in `pending`.
    Reconcile {
        /// Only report how many records would be re-published.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum PostAction {
    /// Upload the original image and create a pending post.
    Create {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        title: String,
        /// Post body. Use `--content-file` to read it from a file.
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,
        #[arg(long)]
        content_file: Option<PathBuf>,
        /// Derived from the title when omitted.
        #[arg(long)]
        slug: Option<String>,
        /// Requested visibility: `draft`, `private` or `public`.
        #[arg(long, default_value = "draft", value_parser = parse_status)]
        status: PostStatus,
        /// Original image file.
        #[arg(long)]
        image: PathBuf,
        /// Extra metadata as `key=value` pairs.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },
    /// Edit a post. Omitted fields are left unchanged.
    Update {
        id: Uuid,
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "content_file")]
        content: Option<String>,
        #[arg(long)]
        content_file: Option<PathBuf>,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<PostStatus>,
    },
    /// Delete a post and its original asset.
    Delete {
        id: Uuid,
        #[arg(long)]
        owner: Uuid,
    },
}

#[derive(Subcommand)]
enum MediaAction {
    /// Upload a file as a pending media item.
    Upload {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        file: PathBuf,
        /// Make the item publicly visible.
        #[arg(long)]
        public: bool,
    },
    /// Delete a media item and its asset.
    Delete {
        id: Uuid,
        #[arg(long)]
        owner: Uuid,
    },
}

fn parse_status(s: &str) -> Result<PostStatus, String> {
    PostStatus::parse_requested(s)
        .ok_or_else(|| format!("invalid status '{}': expected draft, private or public", s))
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,sqlx=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn read_content(inline: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match (inline, file) {
        (Some(content), _) => Ok(Some(content)),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(Some)
            .with_context(|| format!("Failed to read content file: {}", path.display())),
        (None, None) => Ok(None),
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Worker => {
            run_worker(&cfg).await?;
        }
        Commands::Post { action } => {
            let app = App::connect(&cfg).await?;
            let service = PostService::new(
                app.store.clone(),
                create_asset_store(&cfg.assets)?,
                app.producer.clone(),
            );
            let result = run_post(&service, action).await;
            app.producer.flush().await;
            result?;
        }
        Commands::Media { action } => {
            let app = App::connect(&cfg).await?;
            let service = MediaService::new(
                app.store.clone(),
                create_asset_store(&cfg.assets)?,
                app.producer.clone(),
            );
            let result = run_media(&service, action).await;
            app.producer.flush().await;
            result?;
        }
        Commands::Chat {
            query,
            owner,
            limit,
            json,
        } => {
            run_chat(&cfg, &query, owner, limit, json).await?;
        }
        Commands::Reconcile { dry_run } => {
            run_reconcile(&cfg, dry_run).await?;
        }
    }

    Ok(())
}

async fn run_post(service: &PostService, action: PostAction) -> Result<()> {
    match action {
        PostAction::Create {
            owner,
            title,
            content,
            content_file,
            slug,
            status,
            image,
            meta,
        } => {
            let content = read_content(content, content_file.as_deref())?.unwrap_or_default();
            let metadata: Metadata = meta
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let post = service
                .create(NewPost {
                    owner_id: owner,
                    title,
                    content,
                    slug,
                    requested_status: status,
                    metadata,
                    image: read_bytes(&image)?,
                })
                .await?;
            println!("Created post {} ({}) as {}", post.id, post.slug, post.status);
        }
        PostAction::Update {
            id,
            owner,
            title,
            content,
            content_file,
            slug,
            status,
        } => {
            let changes = PostChanges {
                title,
                content: read_content(content, content_file.as_deref())?,
                slug,
                requested_status: status,
            };
            let post = service.update(id, owner, changes).await?;
            println!("Updated post {} ({}), status {}", post.id, post.slug, post.status);
        }
        PostAction::Delete { id, owner } => {
            if !service.delete(id, owner).await? {
                bail!("Post not found: {}", id);
            }
            println!("Deleted post {}", id);
        }
    }
    Ok(())
}

async fn run_media(service: &MediaService, action: MediaAction) -> Result<()> {
    match action {
        MediaAction::Upload {
            owner,
            file,
            public,
        } => {
            let mut metadata = Metadata::new();
            if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                metadata.insert("filename".to_string(), Value::String(name.to_string()));
            }
            let media = service
                .upload(NewMedia {
                    owner_id: owner,
                    is_public: public,
                    metadata,
                    data: read_bytes(&file)?,
                })
                .await?;
            println!("Uploaded media {} as {}", media.id, media.status);
        }
        MediaAction::Delete { id, owner } => {
            if !service.delete(id, owner).await? {
                bail!("Media not found: {}", id);
            }
            println!("Deleted media {}", id);
        }
    }
    Ok(())
}
