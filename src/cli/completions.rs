//! Completion scripts and the man page, both generated from the clap tree

use crate::cli::commands::Cli;
use anyhow::{anyhow, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, Generator, Shell};
use std::fs::{self, File};
use std::path::PathBuf;

/// Write the completion script for `gen` to stdout.
pub fn print_completions<G: Generator>(gen: G, cmd: &mut clap::Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut std::io::stdout());
}

/// Write `uvm.fish` into fish's per-user completions directory and return its path.
pub fn install_fish_completions() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("no home directory to install into"))?;
    let dir = home.join(".config/fish/completions");
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

    let path = dir.join("uvm.fish");
    let mut file = File::create(&path).with_context(|| format!("writing {}", path.display()))?;
    generate(Shell::Fish, &mut Cli::command(), "uvm", &mut file);
    Ok(path)
}

/// roff source for `man 1 uvm`.
pub fn render_man_page() -> Result<String> {
    let mut roff = Vec::new();
    clap_mangen::Man::new(Cli::command())
        .render(&mut roff)
        .context("rendering man page")?;
    Ok(String::from_utf8(roff)?)
}
