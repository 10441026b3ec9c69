use std::io;

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, Show};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};

/// Raw mode plus alternate screen, restored on drop.
pub(super) struct TuiSession {
    active: bool,
}

impl TuiSession {
    pub(super) fn enter() -> Result<Self> {
        let mut session = Self { active: false };
        session.activate()?;
        Ok(session)
    }

    /// Hands the real terminal to `f` (a media player, typically) and takes it back after.
    pub(super) fn suspended<T>(&mut self, f: impl FnOnce() -> T) -> Result<T> {
        self.deactivate()?;
        let out = f();
        self.activate()?;
        Ok(out)
    }

    pub(super) fn leave(mut self) -> Result<()> {
        self.deactivate()
    }

    fn activate(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }
        execute!(io::stdout(), EnterAlternateScreen, Hide)
            .context("failed to enter alternate screen")?;
        enable_raw_mode().context("failed to enable raw mode")?;
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        disable_raw_mode().context("failed to disable raw mode")?;
        execute!(io::stdout(), Show, LeaveAlternateScreen)
            .context("failed to leave alternate screen")?;
        self.active = false;
        Ok(())
    }
}

impl Drop for TuiSession {
    fn drop(&mut self) {
        if self.active {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
        }
    }
}
