//! Feedline CLI: drives the producer-side services against Postgres and the broker.
//!
//! Reads the same environment as the worker (`DATABASE_URL`, `STAGING_DIR`, `BROKER_*`).
//! Media is only queued here; run `feedline-worker` to ingest it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use feedline_broker::{EventPublisher, MessageBroker, PgBroker};
use feedline_cli::{init_tracing, read_incoming_file};
use feedline_core::Config;
use feedline_db::{
    setup_database, CommentRepository, FeedRepository, FeedStore, RelationRepository,
    UserRepository,
};
use feedline_services::{CommentService, FeedIngestionOrchestrator, ToggleMutationEngine};
use feedline_storage::StagingArea;
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "feedline", about = "Feedline operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user
    CreateUser {
        username: String,
        email: String,
    },
    /// Create a feed and queue its media for ingestion
    CreateFeed {
        /// Owner UUID
        #[arg(long)]
        user: Uuid,
        #[arg(long, default_value = "")]
        caption: String,
        /// Media files to attach
        files: Vec<PathBuf>,
    },
    /// Show a feed with its ingested media
    GetFeed {
        id: Uuid,
    },
    /// Delete a feed and queue removal of its stored media
    DeleteFeed {
        id: Uuid,
        /// Owner UUID
        #[arg(long)]
        user: Uuid,
    },
    /// Toggle a like on a feed
    Like {
        feed: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// Toggle following another user
    Follow {
        target: Uuid,
        #[arg(long)]
        user: Uuid,
    },
    /// Comment on a feed, or reply to a comment with --parent
    Comment {
        feed: Uuid,
        text: String,
        #[arg(long)]
        user: Uuid,
        /// Parent comment UUID
        #[arg(long)]
        parent: Option<Uuid>,
    },
    /// List the comments of a feed
    Comments {
        feed: Uuid,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = setup_database(&config.database).await?;
    let broker: Arc<dyn MessageBroker> = Arc::new(
        PgBroker::connect(pool.clone(), &config.broker)
            .await
            .context("Failed to connect to the broker")?,
    );

    let feeds = Arc::new(FeedRepository::new(pool.clone()));

    match cli.command {
        Commands::CreateUser { username, email } => {
            let user = UserRepository::new(pool.clone())
                .create_user(&username, &email)
                .await?;
            print_json(&user)?;
        }
        Commands::CreateFeed {
            user,
            caption,
            files,
        } => {
            let mut incoming = Vec::with_capacity(files.len());
            for path in &files {
                incoming.push(read_incoming_file(path).await?);
            }

            let staging = StagingArea::new(config.staging.dir.clone())
                .await
                .context("Failed to open the staging directory")?;
            let orchestrator = FeedIngestionOrchestrator::new(
                feeds,
                staging,
                EventPublisher::from_config(broker.clone(), &config.broker),
            )
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs));

            let feed = orchestrator.create_feed(user, &caption, &incoming).await?;
            print_json(&serde_json::json!({
                "feed": feed,
                "queued_files": incoming.len(),
            }))?;
        }
        Commands::GetFeed { id } => {
            let feed = feeds
                .get_feed(id)
                .await?
                .with_context(|| format!("Feed {} not found", id))?;
            print_json(&feed)?;
        }
        Commands::DeleteFeed { id, user } => {
            let staging = StagingArea::new(config.staging.dir.clone())
                .await
                .context("Failed to open the staging directory")?;
            let orchestrator = FeedIngestionOrchestrator::new(
                feeds,
                staging,
                EventPublisher::from_config(broker.clone(), &config.broker),
            );
            let queued = orchestrator.delete_feed(id, user).await?;
            print_json(&serde_json::json!({ "deleted": id, "media_deletions_queued": queued }))?;
        }
        Commands::Like { feed, user } => {
            let engine = ToggleMutationEngine::new(Arc::new(RelationRepository::new(pool.clone())));
            let outcome = engine.toggle_like(user, feed).await?;
            print_json(&serde_json::json!({ "feed_id": feed, "user_id": user, "outcome": outcome }))?;
        }
        Commands::Follow { target, user } => {
            let engine = ToggleMutationEngine::new(Arc::new(RelationRepository::new(pool.clone())));
            let outcome = engine.toggle_follow(user, target).await?;
            print_json(&serde_json::json!({
                "follower_id": user,
                "following_id": target,
                "outcome": outcome,
            }))?;
        }
        Commands::Comment {
            feed,
            text,
            user,
            parent,
        } => {
            let service =
                CommentService::new(feeds, Arc::new(CommentRepository::new(pool.clone())));
            let comment = match parent {
                Some(parent) => service.create_reply(feed, parent, user, &text).await?,
                None => service.create_comment(feed, user, &text).await?,
            };
            print_json(&comment)?;
        }
        Commands::Comments { feed } => {
            let service =
                CommentService::new(feeds, Arc::new(CommentRepository::new(pool.clone())));
            print_json(&service.list_comments(feed).await?)?;
        }
    }

    broker.close().await.context("Failed to close the broker")?;
    pool.close().await;
    Ok(())
}
