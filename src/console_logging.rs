// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Console logger for binaries and tests.

use std::{io::Write, sync::Once};

use env_logger::{fmt::Color, Builder};
use log::Level;

/// Environment variable holding the filter, in `env_logger` syntax. `RUST_LOG` is left alone
/// since cargo and other tools read it too.
pub const LOG_ENV_VAR: &str = "RUST_OPCUA_LOG";

fn level_colours(level: Level) -> (Color, Option<Color>) {
    match level {
        Level::Error => (Color::White, Some(Color::Red)),
        Level::Warn => (Color::Yellow, None),
        Level::Info => (Color::Cyan, None),
        Level::Debug => (Color::Green, None),
        Level::Trace => (Color::Ansi256(8), None),
    }
}

/// Installs the console logger. Only the first call does anything, so every test can start
/// with it.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let mut builder = Builder::from_env(LOG_ENV_VAR);
        builder.format(|f, record| {
            let (fg, bg) = level_colours(record.level());
            let mut level_style = f.style();
            level_style.set_color(fg);
            if let Some(bg) = bg {
                level_style.set_bg(bg);
            }
            let mut target_style = f.style();
            target_style.set_bold(true);
            writeln!(
                f,
                "{} {} {} {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level_style.value(format!("{:<5}", record.level())),
                target_style.value(format!("{:<40}", record.target())),
                record.args()
            )
        });
        // Fails when the test harness installed a logger of its own
        if builder.try_init().is_ok() {
            info!("Logging to the console, {} sets the filter", LOG_ENV_VAR);
        }
    });
}
