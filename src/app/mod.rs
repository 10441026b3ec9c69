mod format;
mod tui;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::ani_cli::{AniCli, Downloader};
use crate::catalog::{AllAnimeCatalog, Catalog, Mode};
use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::engine::{Engine, EngineParts};
use crate::history::HistoryLog;
use crate::library::LibraryIndex;
use crate::logging;
use crate::player::{ExternalPlayer, Player};
use crate::poster::PosterCache;

use self::format::{format_episode_ranges, format_recorded_at, format_search_line, truncate};

pub fn run(cli: Cli) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let command = cli.command.unwrap_or(Command::Tui);
    if matches!(command, Command::Tui) {
        logging::init_file(&config.log_file_path())?;
    } else {
        logging::init_stderr();
    }
    tracing::debug!(?config, "configuration loaded");

    let engine = Arc::new(build_engine(&config));

    match command {
        Command::Search { query, mode } => run_search(&engine, &query, mode.or(config.mode))?,
        Command::Download {
            title,
            episode,
            mode,
        } => run_download(&engine, &title, episode, mode.or(config.mode))?,
        Command::Season {
            title,
            episodes,
            mode,
        } => run_season(&engine, &title, episodes, mode.or(config.mode))?,
        Command::Library => run_library(&engine)?,
        Command::History { clear: true } => {
            engine.clear_history();
            println!("History cleared.");
        }
        Command::History { clear: false } => run_history(&engine),
        Command::Play { title, episode } => run_play(&engine, &title, episode)?,
        Command::Tui => tui::run_tui(engine, config.mode)?,
    }

    Ok(())
}

fn build_engine(config: &Config) -> Engine {
    Engine::new(EngineParts {
        catalog: Arc::new(AllAnimeCatalog::new()) as Arc<dyn Catalog>,
        downloader: Arc::new(AniCli::new(
            config.ani_cli_bin.clone(),
            config.download_dir.clone(),
            config.download_timeout,
        )) as Arc<dyn Downloader>,
        player: Arc::new(ExternalPlayer::new(config.player.clone())) as Arc<dyn Player>,
        library: Arc::new(LibraryIndex::new(config.download_dir.clone())),
        history: Arc::new(HistoryLog::open(&config.history_db_path())),
        posters: PosterCache::new(config.posters_dir()),
    })
}

fn run_search(engine: &Engine, query: &str, mode: Mode) -> Result<()> {
    let results = engine.search(query, mode).context("search failed")?;
    if results.is_empty() {
        println!("no results");
        return Ok(());
    }
    for result in &results {
        println!("{}", format_search_line(result));
    }
    Ok(())
}

fn run_download(engine: &Engine, title: &str, episode: u32, mode: Mode) -> Result<()> {
    println!("Downloading {title} episode {episode} ({mode})...");
    let file = engine
        .ensure_downloaded(title, episode, mode)
        .with_context(|| format!("download of {title} episode {episode} failed"))?;
    println!("Ready: {}", file.filename);
    println!("  {}", file.media_reference);
    Ok(())
}

fn run_season(
    engine: &Engine,
    title: &str,
    episodes: Option<u32>,
    mode: Mode,
) -> Result<()> {
    println!("Downloading all episodes of {title} ({mode})...");
    let outcome = engine
        .ensure_season_downloaded(title, episodes, mode)
        .with_context(|| format!("season download of {title} failed"))?;
    println!("{}", outcome.message);
    if let Some(total) = outcome.total
        && outcome.downloaded < total as usize
    {
        println!(
            "{} episodes are still missing; run the command again to retry them.",
            total as usize - outcome.downloaded
        );
    }
    Ok(())
}

fn run_library(engine: &Engine) -> Result<()> {
    let entries = engine.get_library().context("failed to read library")?;
    if entries.is_empty() {
        println!(
            "No downloads in {} yet. Run `anishelf download` first.",
            engine.downloads_dir().display()
        );
        return Ok(());
    }

    println!("{:<40} {:<10} {:<30}", "TITLE", "ON DISK", "EPISODES");
    for entry in entries {
        println!(
            "{:<40} {:<10} {:<30}",
            truncate(&entry.title, 40),
            entry.progress_text(),
            truncate(&format_episode_ranges(&entry.downloaded_episodes), 30)
        );
    }
    Ok(())
}

fn run_history(engine: &Engine) {
    let events = engine.get_history();
    if events.is_empty() {
        println!("No history yet.");
        return;
    }

    println!("{:<28} {:<8} {}", "WHEN", "KIND", "SUMMARY");
    for event in events.iter().rev() {
        println!(
            "{:<28} {:<8} {}",
            format_recorded_at(&event.recorded_at),
            event.kind.label(),
            truncate(&event.summary, 60)
        );
    }
}

fn run_play(engine: &Engine, title: &str, episode: u32) -> Result<()> {
    let file = engine
        .play_downloaded(title, episode)
        .with_context(|| format!("could not play {title} episode {episode}"))?;
    println!("Played {} episode {}", file.title, file.episode);
    Ok(())
}
