use std::io::{self, IsTerminal};

use anyhow::{bail, Context, Result};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::config::{CommonConfig, PathSet};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogsConfig {
    #[serde(default = "LogsConfig::default_level")]
    pub level: String,
}

impl CommonConfig for LogsConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }

    fn complete(&mut self, _ps: &PathSet) -> Result<()> {
        self.level_filter()?;
        Ok(())
    }
}

impl LogsConfig {
    pub fn default_level() -> String {
        String::from("info")
    }

    fn level_filter(&self) -> Result<LevelFilter> {
        Ok(match self.level.as_str() {
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            _ => bail!("unknown log level '{}'", self.level),
        })
    }

    pub fn init(&self) -> Result<()> {
        let level = self.level_filter()?;

        let stdout = io::stdout();
        let is_terminal = stdout.is_terminal();

        let colors = ColoredLevelConfig::new()
            .info(Color::Green)
            .debug(Color::Magenta);

        fern::Dispatch::new()
            .format(move |out, message, record| {
                if is_terminal {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        humantime::format_rfc3339_millis(std::time::SystemTime::now()),
                        colors.color(record.level()),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        humantime::format_rfc3339_millis(std::time::SystemTime::now()),
                        record.level(),
                        message
                    ))
                }
            })
            .level(level)
            // actix and hyper are chatty at debug
            .level_for("actix_server", LevelFilter::Info)
            .level_for("hyper_util", LevelFilter::Info)
            .chain(std::io::stdout())
            .apply()
            .context("init logger")?;

        Ok(())
    }
}
