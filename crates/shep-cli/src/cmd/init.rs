use anyhow::Context;
use shep_core::{
    config::{Config, WarnLevel},
    db::Db,
    io, paths,
};
use std::path::Path;

const GITIGNORE_ENTRIES: [&str; 2] = [".shep/logs/", ".shep/shep.db*"];

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing shep in: {}", root.display());

    for dir in [paths::SHEP_DIR, paths::LOGS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
        Config::load(root).context("failed to load config")?
    } else {
        let cfg = Config::default();
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    // Opening the store creates the schema.
    Db::open(&paths::db_path(root)).context("failed to create run store")?;
    println!("  ready:   {}", paths::DB_FILE);

    let added = io::ensure_gitignore_entries(root, &GITIGNORE_ENTRIES)
        .context("failed to update .gitignore")?;
    if !added.is_empty() {
        println!("  ignored: {}", added.join(", "));
    }

    for w in config.validate() {
        let label = match w.level {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        };
        eprintln!("config {label}: {}", w.message);
    }

    println!("\nshep initialized. Start a feature with: shep run <feature-id>");
    Ok(())
}
