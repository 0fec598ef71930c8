//! Extraction prompt inspection

use anyhow::Result;
use expenseflow_core::prompts::{default_prompts_dir, PromptId, PromptLibrary};

fn overrides_dir_display() -> String {
    default_prompts_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(no data directory on this system)".to_string())
}

/// One row per extraction prompt: alert, chat receipt and forwarded receipt
pub fn cmd_prompts_list() -> Result<()> {
    let mut library = PromptLibrary::new();

    println!("Extraction prompts\n");
    println!("{:<28} {:<26} {:>3}  {}", "ID", "EXTRACTS FROM", "V", "LOADED FROM");
    println!("{}", "-".repeat(72));

    for info in library.list() {
        let loaded_from = match (&info.override_path, info.has_override) {
            (Some(path), true) => path.display().to_string(),
            _ => "built-in".to_string(),
        };
        println!(
            "{:<28} {:<26} {:>3}  {}",
            info.id, info.used_for, info.version, loaded_from
        );
    }

    println!();
    println!("Overrides: {}", overrides_dir_display());
    println!("Drop <id>.md there (same frontmatter, # System / # User sections).");
    println!("The bot and monitor read prompts at startup.");

    Ok(())
}

/// Print one prompt with its metadata
pub fn cmd_prompts_show(prompt_id: &str) -> Result<()> {
    let Ok(id) = prompt_id.parse::<PromptId>() else {
        let known: Vec<&str> = PromptId::all().iter().map(PromptId::as_str).collect();
        eprintln!("No extraction prompt named '{}'", prompt_id);
        eprintln!("Known prompts: {}", known.join(", "));
        return Ok(());
    };

    let mut library = PromptLibrary::new();
    let prompt = library.get(id)?;

    println!("{} (v{}, {})", prompt.metadata.id, prompt.metadata.version, id.used_for());
    match prompt.override_path {
        Some(ref path) if prompt.is_override => println!("Loaded from {}", path.display()),
        _ => println!("Built-in default"),
    }
    println!();
    println!("{}", prompt.content);

    Ok(())
}

/// Print the override directory
pub fn cmd_prompts_path() -> Result<()> {
    let Some(path) = default_prompts_dir() else {
        eprintln!("{}", overrides_dir_display());
        return Ok(());
    };

    println!("{}", path.display());
    if !path.exists() {
        eprintln!("(not created yet; built-in prompts are in use)");
    }

    Ok(())
}
