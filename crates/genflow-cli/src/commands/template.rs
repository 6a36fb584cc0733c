//! `genflow template`: validate, list, render and scaffold templates.

use genflow_core::TemplateManager;

use super::parse_json_params;

/// Load and validate a template file, warning about undeclared placeholders.
pub fn validate(file: &str) -> Result<(), String> {
    let manager = TemplateManager::new();
    let template = manager.load_template(file).map_err(|e| e.to_string())?;
    println!(
        "✅ {} ({}) is valid: {} parameter(s), {} prompt slot(s)",
        template.name,
        template.id,
        template.parameters.len(),
        template.prompt_slots.len()
    );
    let undeclared = manager.undeclared_placeholders(&template);
    if !undeclared.is_empty() {
        println!("⚠️  Placeholders without a declared parameter: {}", undeclared.join(", "));
    }
    Ok(())
}

/// List templates in a directory.
pub fn list(dir: &str) -> Result<(), String> {
    let templates = TemplateManager::new()
        .list_templates(dir)
        .map_err(|e| e.to_string())?;
    if templates.is_empty() {
        println!("No templates found in '{}'", dir);
        return Ok(());
    }

    println!("{:<24} {:<40} {:<10} {:>6}", "ID", "NAME", "VERSION", "PARAMS");
    for template in &templates {
        println!(
            "{:<24} {:<40} {:<10} {:>6}",
            template.id,
            template.name,
            template.version,
            template.parameters.len()
        );
    }
    Ok(())
}

/// Instantiate a template and print (or write) the resulting workflow JSON.
pub fn render(file: &str, params: &[String], out: Option<&str>) -> Result<(), String> {
    let manager = TemplateManager::new();
    let template = manager.load_template(file).map_err(|e| e.to_string())?;
    let values = parse_json_params(params)?;
    let workflow = manager
        .instantiate_template(&template, &values)
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&workflow).map_err(|e| e.to_string())?;

    match out {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path, e))?;
            println!("📝 Wrote workflow {} to {}", workflow.id, path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Write the stock character template to `file`.
pub fn init(file: &str, id: &str, style: &str) -> Result<(), String> {
    if std::path::Path::new(file).exists() {
        return Err(format!("'{}' already exists", file));
    }
    let manager = TemplateManager::new();
    let template = manager.builtin_template(id, style);
    manager
        .save_template(&template, file)
        .map_err(|e| e.to_string())?;
    println!("📝 Created template {} at {}", template.id, file);
    Ok(())
}
