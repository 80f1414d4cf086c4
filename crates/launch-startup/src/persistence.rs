use std::sync::Arc;

use anyhow::Result;
use launch_core::KeyValueStore;

pub const URL_KEY: &str = "url";
pub const OPEN_GAME_KEY: &str = "open_game";
pub const OPEN_FIRST_TIME_KEY: &str = "open_first_time";

/// Typed view over the launch keys in a [`KeyValueStore`].
#[derive(Clone)]
pub struct LaunchStateStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LaunchStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchStateStore").finish_non_exhaustive()
    }
}

impl LaunchStateStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load_url(&self) -> String {
        self.store.load_string(URL_KEY, "")
    }

    pub fn save_url(&self, url: &str) -> Result<()> {
        self.store.save_string(URL_KEY, url)
    }

    pub fn is_first_run(&self) -> bool {
        parse_flag(&self.store.load_string(OPEN_FIRST_TIME_KEY, ""), true)
    }

    pub fn save_first_run(&self, first_run: bool) -> Result<()> {
        self.store
            .save_string(OPEN_FIRST_TIME_KEY, &first_run.to_string())
    }

    pub fn load_open_game(&self) -> bool {
        parse_flag(&self.store.load_string(OPEN_GAME_KEY, ""), false)
    }

    pub fn save_open_game(&self, open_game: bool) -> Result<()> {
        self.store.save_string(OPEN_GAME_KEY, &open_game.to_string())
    }

    /// Restores first-run defaults.
    pub fn reset(&self) -> Result<()> {
        self.save_url("")?;
        self.save_open_game(false)?;
        self.save_first_run(true)
    }
}

fn parse_flag(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => default,
    }
}
