pub mod index;
pub mod stats;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use smartscan::config::{expand_tilde, ModelsConfig, SmartScanConfig};
use smartscan::embedding::{ModelKind, ModelName};

/// Download every model with a public source into the cache directory.
/// Models without one are reported so they can be placed by hand.
pub async fn model_download(config: &ModelsConfig) -> Result<()> {
    let cache_dir = expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    for model in ModelName::ALL {
        let model_path = cache_dir.join(model.onnx_file());
        let Some(source) = model.source() else {
            if model_path.exists() {
                println!("{model}: present at {}", model_path.display());
            } else {
                println!(
                    "{model}: no public download, place {} in {}",
                    model.onnx_file(),
                    cache_dir.display()
                );
            }
            continue;
        };

        if model_path.exists() {
            println!("{model}: already exists at {}", model_path.display());
        } else {
            println!("{model}: downloading {}...", model.onnx_file());
            download_file(source.model_url, &model_path).await?;
            println!("{model}: saved to {}", model_path.display());
        }

        if let (Some(url), Some(file)) = (source.tokenizer_url, model.tokenizer_file()) {
            let tokenizer_path = cache_dir.join(file);
            if !tokenizer_path.exists() {
                println!("{model}: downloading {file}...");
                download_file(url, &tokenizer_path).await?;
            }
        }
    }

    println!("Model download complete.");
    Ok(())
}

/// Select `model` for the `kind` slot and persist it to `config_path`.
/// A running server picks the change up on restart; use `PUT /api/models/...`
/// to swap a live server.
pub fn model_set(
    config: &mut SmartScanConfig,
    config_path: &Path,
    kind: ModelKind,
    model: ModelName,
) -> Result<()> {
    anyhow::ensure!(
        model.kind() == kind,
        "{model} cannot be used as the {} model",
        match kind {
            ModelKind::Image => "image",
            ModelKind::Text => "text",
        }
    );

    let slot = match kind {
        ModelKind::Image => &mut config.models.image_encoder_model,
        ModelKind::Text => &mut config.models.text_encoder_model,
    };
    if *slot == model {
        println!("{model} is already selected");
        return Ok(());
    }
    let previous = std::mem::replace(slot, model);
    config.save_to(config_path)?;

    let cache_dir = expand_tilde(&config.models.cache_dir);
    if !cache_dir.join(model.onnx_file()).exists() {
        println!(
            "warning: {} not found in {}",
            model.onnx_file(),
            cache_dir.display()
        );
    }
    println!("Model changed from {previous} to {model}");
    Ok(())
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &PathBuf) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .expect("valid template")
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_set_persists_the_choice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = SmartScanConfig::default();
        config.models.cache_dir = dir.path().to_string_lossy().into_owned();

        model_set(&mut config, &path, ModelKind::Image, ModelName::ClipVitB32Image).unwrap();

        let reloaded = SmartScanConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.models.image_encoder_model, ModelName::ClipVitB32Image);
        assert_eq!(reloaded.models.text_encoder_model, ModelName::AllMiniLmL6V2);
    }

    #[test]
    fn model_set_rejects_the_wrong_slot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = SmartScanConfig::default();

        assert!(model_set(&mut config, &path, ModelKind::Text, ModelName::Dinov2Small).is_err());
        assert!(!path.exists());
    }
}
