use anyhow::Result;

use smartscan::config::SmartScanConfig;
use smartscan::embedding::ModelName;
use smartscan::index::Modality;
use smartscan::store::{collection_name, list_collections};

/// Display collection statistics in the terminal.
pub fn stats(config: &SmartScanConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = smartscan::db::open_database(&db_path)?;
    let health = smartscan::db::check_database_health(&conn)?;
    let collections = list_collections(&conn)?;

    let image = config.models.image_encoder_model;
    let text = config.models.text_encoder_model;
    let active: [(ModelName, Modality); 3] = [
        (image, Modality::Image),
        (image, Modality::Video),
        (text, Modality::Text),
    ];
    let active: Vec<String> = active
        .iter()
        .map(|(model, modality)| collection_name(*model, *modality))
        .collect();

    println!("SmartScan Statistics");
    println!("{}", "=".repeat(40));
    println!("  Database:            {}", db_path.display());
    println!("  Schema version:      {}", health.schema_version);
    println!("  sqlite-vec:          {}", health.sqlite_vec_version);
    println!(
        "  Integrity:           {}",
        if health.integrity_ok { "ok" } else { health.integrity_details.as_str() }
    );
    println!();

    println!("Models:");
    println!("  image                {image}");
    println!("  text                 {text}");
    println!();

    println!("Collections:");
    if collections.is_empty() {
        println!("  (none yet)");
    }
    for info in &collections {
        let marker = if active.contains(&info.name) { "*" } else { " " };
        println!(
            "{marker} {:<40} {:>8} items  ({}d)",
            info.name, info.count, info.dimensions
        );
    }

    Ok(())
}
