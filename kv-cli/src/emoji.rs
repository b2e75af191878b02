//! Decorative prefixes for REPL/status output, gated on terminal emoji
//! support the same way `cargo`/`wasm-pack`-style CLIs do: fall back to
//! plain ASCII when stdout isn't a fancy terminal.

use console::Emoji;

pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", ":)");
pub static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ERROR: Emoji<'_, '_> = Emoji("💥 ", "");
pub static WAVE: Emoji<'_, '_> = Emoji("👋 ", "");
