use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Experiment manifest: the set of recordings to process together.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentManifest {
    pub experiment: String,
    pub recordings: Vec<RecordingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingEntry {
    pub name: String,
    /// Track table path, resolved relative to the manifest file.
    pub tracks: String,
    /// Concentration factor for this recording's density normalization.
    #[serde(default = "default_concentration")]
    pub concentration: f64,
}

fn default_concentration() -> f64 {
    1.0
}

pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<ExperimentManifest> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read: {}", path.display()))?;
    let manifest: ExperimentManifest =
        serde_json::from_str(&raw).context("failed to parse experiment manifest JSON")?;

    if manifest.recordings.is_empty() {
        return Err(anyhow!("manifest lists no recordings"));
    }
    for rec in &manifest.recordings {
        if !(rec.concentration.is_finite() && rec.concentration > 0.0) {
            return Err(anyhow!(
                "recording '{}' has non-positive concentration {}",
                rec.name,
                rec.concentration
            ));
        }
    }

    // Resolve track paths relative to the manifest location.
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut manifest = manifest;
    for rec in &mut manifest.recordings {
        if Path::new(&rec.tracks).is_relative() {
            let resolved = base.join(&rec.tracks).to_string_lossy().into_owned();
            rec.tracks = resolved;
        }
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("spt-squares-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_manifest_and_resolves_paths() {
        let path = write_temp(
            "exp.json",
            r#"{
                "experiment": "glyco-2026-03",
                "recordings": [
                    {"name": "r1", "tracks": "r1_tracks.csv", "concentration": 5.0},
                    {"name": "r2", "tracks": "/abs/r2_tracks.csv"}
                ]
            }"#,
        );
        let m = read_manifest(&path).unwrap();
        assert_eq!(m.experiment, "glyco-2026-03");
        assert_eq!(m.recordings.len(), 2);
        assert_eq!(m.recordings[0].concentration, 5.0);
        assert!(m.recordings[0].tracks.ends_with("r1_tracks.csv"));
        assert_ne!(m.recordings[0].tracks, "r1_tracks.csv");
        assert_eq!(m.recordings[1].tracks, "/abs/r2_tracks.csv");
        assert_eq!(m.recordings[1].concentration, 1.0);
    }

    #[test]
    fn rejects_empty_and_invalid_manifests() {
        let empty = write_temp("empty.json", r#"{"experiment": "e", "recordings": []}"#);
        assert!(read_manifest(&empty).is_err());

        let bad = write_temp(
            "bad.json",
            r#"{"experiment": "e", "recordings": [{"name": "r", "tracks": "t.csv", "concentration": 0.0}]}"#,
        );
        assert!(read_manifest(&bad).is_err());
    }
}
