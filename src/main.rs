use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use portal_blocks::api::{ApiError, PortalClient};
use portal_blocks::config::{self, Config};
use portal_blocks::container::ContainerDraft;
use portal_blocks::media::{self, UploadFile};
use portal_blocks::model::{Block, BlockData, BlockId, ContainerRef};
use portal_blocks::reconcile;
use portal_blocks::render;
use portal_blocks::session::{Role, SessionController};

#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect and synchronize block content of course sections and news items")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, ClapArgs)]
#[group(required = true, multiple = false)]
struct Target {
    /// Course section id
    #[arg(long)]
    section: Option<i64>,

    /// News item id
    #[arg(long)]
    news: Option<i64>,
}

impl Target {
    fn container(&self) -> Result<ContainerRef> {
        match (self.section, self.news) {
            (Some(id), None) => Ok(ContainerRef::Section(id)),
            (None, Some(id)) => Ok(ContainerRef::News(id)),
            _ => bail!("pass exactly one of --section or --news"),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render a container's blocks as the given role would see them
    Show {
        #[command(flatten)]
        target: Target,
        /// student, teacher or admin
        #[arg(long = "as", default_value = "student")]
        role: String,
        /// Viewer owns the content (teachers then see unpublished blocks)
        #[arg(long)]
        owner: bool,
    },
    /// Render every section of a course, honoring section gating
    Course {
        #[arg(long)]
        id: i64,
        #[arg(long = "as", default_value = "student")]
        role: String,
        #[arg(long)]
        owner: bool,
    },
    /// Push a local JSON block list to the server and write back the result
    Sync {
        #[command(flatten)]
        target: Target,
        /// JSON array of blocks
        #[arg(long)]
        blocks: PathBuf,
        /// Delete server elements missing locally without asking
        #[arg(long)]
        yes: bool,
    },
    /// Upload images into an image or gallery block of a local block list
    Upload {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        blocks: PathBuf,
        /// Id of the image or gallery block
        #[arg(long)]
        block: String,
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let role = match &args.command {
        Command::Show { role, .. } | Command::Course { role, .. } => parse_role(role)?,
        _ => Role::Teacher,
    };
    let mut session = SessionController::new(cfg.resolved_token(), role);
    session.mark_navigated();

    let result = run(&cfg, &session, args.command).await;
    if let Err(err) = &result {
        if is_unauthorized(err) {
            warn!("token rejected by the server; clearing session");
            session.logout();
        }
    }
    result
}

async fn run(cfg: &Config, session: &SessionController, command: Command) -> Result<()> {
    let client = client_for(cfg, session)?;
    match command {
        Command::Show { target, owner, .. } => {
            let container = target.container()?;
            let draft = ContainerDraft::load(container, &client).await?;
            let viewer = session.viewer_for(owner);
            println!("{}", render::render_for_viewer(draft.blocks(), viewer, Utc::now()));
        }
        Command::Course { id, owner, .. } => show_course(&client, session, id, owner).await?,
        Command::Sync { target, blocks, yes } => sync(&client, target.container()?, &blocks, yes).await?,
        Command::Upload {
            target,
            blocks,
            block,
            files,
        } => upload(cfg, &client, target.container()?, &blocks, &block, &files).await?,
    }
    Ok(())
}

fn client_for(cfg: &Config, session: &SessionController) -> Result<PortalClient> {
    PortalClient::from_config(cfg, session.token().map(str::to_owned)).context("building portal client")
}

fn parse_role(raw: &str) -> Result<Role> {
    Role::parse(raw).with_context(|| format!("unknown role {raw:?}"))
}

fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| matches!(e.downcast_ref::<ApiError>(), Some(ApiError::Unauthorized)))
}

async fn show_course(client: &PortalClient, session: &SessionController, course_id: i64, owner: bool) -> Result<()> {
    let viewer = session.viewer_for(owner);
    let now = Utc::now();
    for section in client.list_sections(course_id).await? {
        if let Some(html) = render::render_section(&section, viewer, now) {
            println!("{html}");
        }
    }
    Ok(())
}

async fn sync(client: &PortalClient, container: ContainerRef, path: &Path, yes: bool) -> Result<()> {
    let mut draft = ContainerDraft::load(container, client).await?;
    draft.replace_blocks(read_blocks(path).await?);

    let plan = reconcile::diff(container, draft.server_ids(), draft.blocks());
    for op in &plan.ops {
        println!("{op}");
    }
    let deletes = plan.deletes().count();
    if deletes > 0 && !yes && !ask(&format!("Delete {deletes} element(s) from {container}?"))? {
        bail!("aborted; nothing was changed");
    }

    match draft.save(client).await {
        Ok(report) => {
            info!(
                deleted = report.deleted.len(),
                updated = report.updated.len(),
                created = report.created.len(),
                "sync finished"
            );
            write_blocks(path, draft.blocks()).await
        }
        Err(err) => {
            // Created ids are already adopted; persist them so a rerun does not duplicate.
            write_blocks(path, draft.blocks()).await?;
            Err(err).context("sync failed")
        }
    }
}

async fn upload(
    cfg: &Config,
    client: &PortalClient,
    container: ContainerRef,
    path: &Path,
    block: &str,
    files: &[PathBuf],
) -> Result<()> {
    if files.is_empty() {
        bail!("no files given");
    }
    let mut draft = ContainerDraft::from_elements(container, Vec::new());
    draft.replace_blocks(read_blocks(path).await?);

    let id = parse_block_id(block);
    let current = draft
        .blocks()
        .iter()
        .find(|b| b.id == id)
        .map(|b| b.data.clone())
        .with_context(|| format!("block {id} not found in {}", path.display()))?;
    let ticket = draft.begin_upload(&id).context("upload already running for this block")?;

    let mut loaded = Vec::with_capacity(files.len());
    for file in files {
        loaded.push(UploadFile::from_path(file).await?);
    }

    let (data, failure) = match current {
        BlockData::Image(image) => {
            if loaded.len() != 1 {
                draft.abandon_upload(ticket);
                bail!("image blocks take exactly one file");
            }
            match media::upload_image(&image, &loaded[0], client, Some(container), cfg.max_image_bytes()).await {
                Ok(updated) => (BlockData::Image(updated), None),
                Err(err) => {
                    draft.abandon_upload(ticket);
                    return Err(err.into());
                }
            }
        }
        BlockData::Gallery(gallery) => {
            let batch = media::upload_gallery(&gallery, &loaded, client, Some(container), cfg.max_image_bytes()).await;
            info!(uploaded = batch.uploaded, "gallery batch done");
            (BlockData::Gallery(batch.data), batch.error)
        }
        other => {
            draft.abandon_upload(ticket);
            bail!("block {id} is a {} block, not image or gallery", other.content_type());
        }
    };

    draft.finish_upload(ticket, data);
    write_blocks(path, draft.blocks()).await?;
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn parse_block_id(raw: &str) -> BlockId {
    raw.parse::<i64>().map(BlockId::from).unwrap_or_else(|_| BlockId::from(raw))
}

async fn read_blocks(path: &Path) -> Result<Vec<Block>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn write_blocks(path: &Path, blocks: &[Block]) -> Result<()> {
    let json = serde_json::to_string_pretty(blocks)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))
}

fn ask(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
