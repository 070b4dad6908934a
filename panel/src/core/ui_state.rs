//! Render state of the UI view.
//!
//! Pure state transitions; timers and message plumbing live in [`crate::ui`].

use thiserror::Error;

use crate::core::message::Pong;

/// Liveness of the worker as last reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerIndicator {
    /// No status received yet.
    #[default]
    Unknown,
    Running,
    Down,
}

impl ServerIndicator {
    pub fn label(self) -> &'static str {
        match self {
            ServerIndicator::Unknown => "unknown",
            ServerIndicator::Running => "running",
            ServerIndicator::Down => "down",
        }
    }
}

/// Visual state of the save button.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaveIndicator {
    #[default]
    Idle,
    InFlight,
    Succeeded,
    Failed,
}

/// Why the view refused to send a save request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveRejected {
    #[error("commit message needs at least {min} non-blank characters (got {len})")]
    TooShort { min: usize, len: usize },
    #[error("a save is already in flight")]
    InFlight,
}

/// Save form gate: the trimmed message must reach `min_len` characters.
pub fn check_commit_message(message: &str, min_len: usize) -> Result<(), SaveRejected> {
    let len = message.trim().chars().count();
    if len == 0 || len < min_len {
        return Err(SaveRejected::TooShort { min: min_len, len });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub server: ServerIndicator,
    pub review_link: Option<String>,
    pub save: SaveIndicator,
    /// Bumped on every indicator change so stale clear timers can be ignored.
    pub indicator_generation: u64,
}

impl UiState {
    /// Apply a status answer. Returns `true` if anything visible changed.
    pub fn apply_pong(&mut self, pong: &Pong) -> bool {
        let server = if pong.server_active {
            ServerIndicator::Running
        } else {
            ServerIndicator::Down
        };
        let changed = self.server != server || self.review_link != pong.review_link;
        self.server = server;
        self.review_link.clone_from(&pong.review_link);
        changed
    }

    /// Mark a save as sent; returns the generation a clear timer must match.
    pub fn begin_save(&mut self) -> Result<u64, SaveRejected> {
        if self.save == SaveIndicator::InFlight {
            return Err(SaveRejected::InFlight);
        }
        Ok(self.set_indicator(SaveIndicator::InFlight))
    }

    pub fn finish_save(&mut self, ok: bool) -> u64 {
        let indicator = if ok {
            SaveIndicator::Succeeded
        } else {
            SaveIndicator::Failed
        };
        self.set_indicator(indicator)
    }

    /// Reset the indicator to idle unless it changed since `generation`.
    pub fn clear_indicator(&mut self, generation: u64) -> bool {
        if self.indicator_generation != generation || self.save == SaveIndicator::Idle {
            return false;
        }
        self.save = SaveIndicator::Idle;
        true
    }

    pub fn status_line(&self) -> String {
        let mut line = format!("Status: {}", self.server.label());
        match self.save {
            SaveIndicator::Idle => {}
            SaveIndicator::InFlight => line.push_str(" | saving..."),
            SaveIndicator::Succeeded => line.push_str(" | saved"),
            SaveIndicator::Failed => line.push_str(" | save failed"),
        }
        if let Some(link) = &self.review_link {
            line.push_str(" | approve here: ");
            line.push_str(link);
        }
        line
    }

    fn set_indicator(&mut self, indicator: SaveIndicator) -> u64 {
        self.save = indicator;
        self.indicator_generation += 1;
        self.indicator_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong(server_active: bool, review_link: Option<&str>) -> Pong {
        Pong {
            server_active,
            review_link: review_link.map(str::to_string),
        }
    }

    #[test]
    fn gate_requires_ten_trimmed_characters() {
        assert_eq!(
            check_commit_message("   short   ", 10),
            Err(SaveRejected::TooShort { min: 10, len: 5 })
        );
        assert!(check_commit_message("  exactly 10  ", 10).is_ok());
        assert!(check_commit_message("", 0).is_err());
    }

    #[test]
    fn pong_updates_server_and_link() {
        let mut state = UiState::default();
        assert!(state.apply_pong(&pong(true, Some("https://x.test/1"))));
        assert_eq!(state.server, ServerIndicator::Running);
        assert_eq!(state.review_link.as_deref(), Some("https://x.test/1"));

        assert!(!state.apply_pong(&pong(true, Some("https://x.test/1"))));
        assert!(state.apply_pong(&pong(false, None)));
        assert_eq!(state.server, ServerIndicator::Down);
        assert_eq!(state.review_link, None);
    }

    #[test]
    fn stale_clear_is_ignored() {
        let mut state = UiState::default();
        let sent = state.begin_save().expect("begin");
        let finished = state.finish_save(false);
        assert!(!state.clear_indicator(sent));
        assert_eq!(state.save, SaveIndicator::Failed);
        assert!(state.clear_indicator(finished));
        assert_eq!(state.save, SaveIndicator::Idle);
    }

    #[test]
    fn second_save_while_in_flight_is_rejected() {
        let mut state = UiState::default();
        state.begin_save().expect("begin");
        assert_eq!(state.begin_save(), Err(SaveRejected::InFlight));
    }

    #[test]
    fn status_line_renders_state() {
        let mut state = UiState::default();
        assert_eq!(state.status_line(), "Status: unknown");
        state.apply_pong(&pong(true, Some("https://x.test/2")));
        state.finish_save(true);
        assert_eq!(
            state.status_line(),
            "Status: running | saved | approve here: https://x.test/2"
        );
    }
}
