use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::catalog::Mode;

#[derive(Debug, Parser)]
#[command(
    name = "anishelf",
    version,
    about = "Search, download and replay anime through ani-cli"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Search the catalog and print numbered results
    Search {
        query: String,
        #[command(flatten)]
        mode: ModeArg,
    },
    /// Download one episode
    Download {
        title: String,
        #[arg(short, long)]
        episode: u32,
        #[command(flatten)]
        mode: ModeArg,
    },
    /// Download every episode of a title
    Season {
        title: String,
        /// Total episodes to fetch; taken from the catalog when omitted
        #[arg(long)]
        episodes: Option<u32>,
        #[command(flatten)]
        mode: ModeArg,
    },
    /// List downloaded titles
    Library,
    /// Show recent activity
    History {
        /// Forget all recorded activity
        #[arg(long)]
        clear: bool,
    },
    /// Play a downloaded episode
    Play {
        title: String,
        #[arg(short, long)]
        episode: u32,
    },
    /// Open the interactive browser (the default)
    Tui,
}

#[derive(Debug, Clone, Copy, Args)]
pub struct ModeArg {
    /// Translation type; defaults to the configured mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeChoice>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeChoice {
    Sub,
    Dub,
}

impl ModeArg {
    pub(crate) fn or(self, fallback: Mode) -> Mode {
        match self.mode {
            Some(ModeChoice::Sub) => Mode::Sub,
            Some(ModeChoice::Dub) => Mode::Dub,
            None => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_leaves_command_empty() {
        let cli = Cli::try_parse_from(["anishelf"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn download_takes_episode_and_mode() {
        let cli = Cli::try_parse_from(["anishelf", "download", "Naruto", "-e", "3", "--mode", "dub"])
            .expect("parse");
        let Some(Command::Download {
            title,
            episode,
            mode,
        }) = cli.command
        else {
            panic!("expected download command");
        };
        assert_eq!(title, "Naruto");
        assert_eq!(episode, 3);
        assert_eq!(mode.or(Mode::Sub), Mode::Dub);
    }

    #[test]
    fn mode_falls_back_to_configured_value() {
        let cli = Cli::try_parse_from(["anishelf", "search", "bleach"]).expect("parse");
        let Some(Command::Search { mode, .. }) = cli.command else {
            panic!("expected search command");
        };
        assert_eq!(mode.or(Mode::Dub), Mode::Dub);
    }

    #[test]
    fn history_clear_flag_is_optional() {
        let cli = Cli::try_parse_from(["anishelf", "history", "--clear"]).expect("parse");
        assert!(matches!(cli.command, Some(Command::History { clear: true })));
        let cli = Cli::try_parse_from(["anishelf", "history"]).expect("parse");
        assert!(matches!(cli.command, Some(Command::History { clear: false })));
    }

    #[test]
    fn download_requires_an_episode() {
        assert!(Cli::try_parse_from(["anishelf", "download", "Naruto"]).is_err());
    }
}
