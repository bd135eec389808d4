use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::api;
use crate::config;
use crate::controller::{CollectionController, ViewStatus};
use crate::model::{CollectionKind, Post};
use crate::overlay::OverlayStore;
use crate::screens::Services;
use crate::session;
use crate::storage;

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print one page of the global feed.
    Page(u32),
    Search(String),
    /// Hide a post on this device.
    Hide(String),
    /// Remember the session cookie in the config file.
    SetCookie(String),
}

impl Default for Command {
    fn default() -> Self {
        Command::Page(1)
    }
}

pub fn run(command: Command) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    init_logging(&cfg.logging.filter);

    if let Command::SetCookie(cookie) = &command {
        let path = config::save_session_cookie(None, cookie).context("save session cookie")?;
        println!("Session cookie saved to {}", friendly_path(&path));
        return Ok(());
    }

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.overlay.path.clone(),
        })
        .context("open storage")?,
    );
    let overlay = OverlayStore::new(store, cfg.overlay.key_prefix.clone());

    if let Command::Hide(id) = &command {
        if overlay
            .suppress(CollectionKind::Posts, id)
            .context("hide post")?
        {
            println!("Post {id} hidden on this device.");
        } else {
            println!("Post {id} was already hidden.");
        }
        return Ok(());
    }

    let client = api::Client::new(api::ClientConfig {
        user_agent: cfg.api.user_agent.clone(),
        base_url: Some(cfg.api.base_url.clone()),
        timeout: Some(cfg.api.timeout),
        credentials: cfg.api.credentials(),
        http_client: None,
    })
    .context("create board client")?;
    info!(base_url = %client.base_url(), "board client ready");

    let mut services = Services::board(
        Arc::new(client),
        overlay,
        cfg.mutations,
        cfg.feed.page_size,
    );
    let session = session::Manager::new(services.entities.clone());
    session.refresh();
    if let Some(user) = session.current() {
        info!(username = %user.username, "signed in");
    }
    services.session_user = session.current_user_id();
    debug!(user = ?services.session_user, "session resolved");

    // one page plus slack for a slow backend
    let timeout = cfg.api.timeout + Duration::from_secs(1);
    match command {
        Command::Page(page) => {
            let mut feed = services.front_page();
            feed.goto_page(page);
            settle(&mut feed, timeout)?;
            print_posts(&feed);
        }
        Command::Search(query) => {
            let mut search = services.search(&query);
            if search.query().is_empty() {
                bail!("search query is empty");
            }
            settle(&mut search, timeout)?;
            print_posts(&search);
        }
        Command::Hide(_) | Command::SetCookie(_) => {}
    }
    Ok(())
}

fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn settle(feed: &mut CollectionController<Post>, timeout: Duration) -> Result<()> {
    if !feed.wait(timeout) {
        bail!("timed out waiting for the board");
    }
    if let ViewStatus::Failed(message) = feed.status() {
        bail!("{message}");
    }
    Ok(())
}

fn print_posts(feed: &CollectionController<Post>) {
    let visible = feed.visible();
    if let (Some(page), Some(total)) = (feed.current_page(), feed.total_pages()) {
        println!("Page {page} of {total}");
    }
    if visible.is_empty() {
        println!("No posts.");
        return;
    }
    for post in visible {
        let author = post.username.as_deref().unwrap_or("unknown");
        println!(
            "{:>4} {}  [{}]\n     by {} | {} comments | {}",
            post.likes,
            post.title,
            post.id,
            author,
            post.comments_count,
            post.created_at.format("%Y-%m-%d %H:%M"),
        );
    }
}

fn friendly_path(path: &std::path::Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            let mut display = String::from("~");
            if !stripped.as_os_str().is_empty() {
                display.push_str(&format!("/{}", stripped.display()));
            }
            return display;
        }
    }
    path.display().to_string()
}
