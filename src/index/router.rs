//! Extension-based modality classification.

use std::collections::HashMap;
use std::path::Path;

use super::{IndexError, Modality};
use crate::config::IndexingConfig;

/// Maps file extensions onto exactly one [`Modality`].
#[derive(Debug, Clone)]
pub struct ModalityRouter {
    extensions: HashMap<String, Modality>,
}

fn normalize(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl ModalityRouter {
    /// Build a router from three disjoint extension sets. Extensions are
    /// case-insensitive and may carry a leading dot.
    pub fn new<S: AsRef<str>>(image: &[S], text: &[S], video: &[S]) -> Result<Self, IndexError> {
        let mut extensions = HashMap::new();
        for (modality, list) in [
            (Modality::Image, image),
            (Modality::Text, text),
            (Modality::Video, video),
        ] {
            for ext in list {
                let ext = normalize(ext.as_ref());
                if ext.is_empty() {
                    continue;
                }
                match extensions.get(&ext) {
                    Some(&first) if first != modality => {
                        return Err(IndexError::OverlappingExtension {
                            extension: ext,
                            first,
                            second: modality,
                        });
                    }
                    Some(_) => {}
                    None => {
                        extensions.insert(ext, modality);
                    }
                }
            }
        }
        Ok(Self { extensions })
    }

    pub fn from_config(config: &IndexingConfig) -> Result<Self, IndexError> {
        Self::new(
            &config.image_extensions,
            &config.text_extensions,
            &config.video_extensions,
        )
    }

    /// `None` means the file is unsupported and never enters the pipeline.
    pub fn classify(&self, path: &Path) -> Option<Modality> {
        let ext = path.extension()?.to_str()?;
        self.extensions.get(&normalize(ext)).copied()
    }
}
