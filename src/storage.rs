use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use toml_edit::{Array, DocumentMut, Item, Value};

const PLACES_KEY: &str = "places";

// Rewrites only the `places` key, leaving the rest of the document as the user wrote it.
pub fn save_places(path: &Path, places: &[String]) -> Result<()> {
    let mut doc = if path.exists() {
        read_document(path)?
    } else {
        DocumentMut::new()
    };

    let mut array = Array::new();
    for place in places {
        array.push(place.as_str());
    }
    doc[PLACES_KEY] = Item::Value(Value::Array(array));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}

fn read_document(path: &Path) -> Result<DocumentMut> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    content
        .parse::<DocumentMut>()
        .with_context(|| format!("Failed to parse config: {}", path.display()))
}
