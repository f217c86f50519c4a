use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// One particle trajectory, reduced to its representative location, duration
/// and precomputed kinematic summaries. Kinematics are carried through for
/// downstream reporting, never recomputed here.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub x_um: f64,
    pub y_um: f64,
    pub duration_s: f64,
    pub max_speed: Option<f64>,
    pub median_speed: Option<f64>,
    pub displacement: Option<f64>,
    pub total_distance: Option<f64>,
    pub confinement_ratio: Option<f64>,
}

/// Reads a track table. Format is inferred from the extension:
/// CSV/TSV (optionally gz-compressed) or Parquet.
pub fn read_tracks<P: AsRef<Path>>(path: P) -> Result<Vec<Track>> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    if name.ends_with(".csv") || name.ends_with(".csv.gz") {
        read_tracks_delimited(path, b',', name.ends_with(".gz"))
    } else if name.ends_with(".tsv") || name.ends_with(".tsv.gz") || name.ends_with(".txt") {
        read_tracks_delimited(path, b'\t', name.ends_with(".gz"))
    } else if name.ends_with(".parquet") || name.ends_with(".pq") {
        read_tracks_parquet(path)
    } else {
        Err(anyhow!("unsupported tracks extension: {}", path.display()))
    }
}

fn open_maybe_gz(path: &Path, gz: bool) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("failed to open: {}", path.display()))?;
    if gz {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn read_tracks_delimited(path: &Path, delimiter: u8, gz: bool) -> Result<Vec<Track>> {
    let reader = open_maybe_gz(path, gz)?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(reader);

    let headers = rdr.headers().context("failed reading header row")?.clone();
    let col = |names: &[&str]| -> Option<usize> {
        headers.iter().position(|h| names.contains(&h))
    };

    let idx_id = col(&["track_id", "id"])
        .ok_or_else(|| anyhow!("missing required column 'track_id' (or 'id')"))?;
    let idx_x = col(&["x_um", "x"])
        .ok_or_else(|| anyhow!("missing required column 'x_um' (or 'x')"))?;
    let idx_y = col(&["y_um", "y"])
        .ok_or_else(|| anyhow!("missing required column 'y_um' (or 'y')"))?;
    let idx_duration = col(&["duration_s", "duration"])
        .ok_or_else(|| anyhow!("missing required column 'duration_s' (or 'duration')"))?;

    let idx_max_speed = col(&["max_speed"]);
    let idx_median_speed = col(&["median_speed"]);
    let idx_displacement = col(&["displacement"]);
    let idx_total_distance = col(&["total_distance"]);
    let idx_confinement = col(&["confinement_ratio"]);

    let mut out: Vec<Track> = Vec::new();
    for (row_idx, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("failed reading record {}", row_idx + 1))?;

        let field_f64 = |idx: usize, what: &str| -> Result<f64> {
            rec.get(idx)
                .ok_or_else(|| anyhow!("missing {} at record {}", what, row_idx + 1))?
                .parse()
                .with_context(|| format!("invalid {} at record {}", what, row_idx + 1))
        };
        let optional_f64 = |idx: Option<usize>| -> Option<f64> {
            idx.and_then(|i| rec.get(i)).and_then(|s| s.parse().ok())
        };

        let id = rec
            .get(idx_id)
            .ok_or_else(|| anyhow!("missing track_id at record {}", row_idx + 1))?
            .to_string();

        out.push(Track {
            id,
            x_um: field_f64(idx_x, "x")?,
            y_um: field_f64(idx_y, "y")?,
            duration_s: field_f64(idx_duration, "duration")?,
            max_speed: optional_f64(idx_max_speed),
            median_speed: optional_f64(idx_median_speed),
            displacement: optional_f64(idx_displacement),
            total_distance: optional_f64(idx_total_distance),
            confinement_ratio: optional_f64(idx_confinement),
        });
    }
    Ok(out)
}

fn read_tracks_parquet(path: &Path) -> Result<Vec<Track>> {
    use parquet::file::reader::{FileReader, SerializedFileReader};

    let file = File::open(path).with_context(|| format!("failed to open: {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("failed creating parquet reader")?;

    let mut iter = reader
        .get_row_iter(None)
        .context("failed creating parquet row iterator")?;

    let mut idx_id: Option<usize> = None;
    let mut idx_x: Option<usize> = None;
    let mut idx_y: Option<usize> = None;
    let mut idx_duration: Option<usize> = None;
    let mut idx_max_speed: Option<usize> = None;
    let mut idx_median_speed: Option<usize> = None;
    let mut idx_displacement: Option<usize> = None;
    let mut idx_total_distance: Option<usize> = None;
    let mut idx_confinement: Option<usize> = None;

    let mut out: Vec<Track> = Vec::new();
    while let Some(row) = iter.next() {
        let row = row.context("failed reading parquet row")?;

        if idx_id.is_none() || idx_x.is_none() || idx_y.is_none() || idx_duration.is_none() {
            for (i, (name, _field)) in row.get_column_iter().enumerate() {
                match name.as_str() {
                    "track_id" | "id" if idx_id.is_none() => idx_id = Some(i),
                    "x_um" | "x" if idx_x.is_none() => idx_x = Some(i),
                    "y_um" | "y" if idx_y.is_none() => idx_y = Some(i),
                    "duration_s" | "duration" if idx_duration.is_none() => idx_duration = Some(i),
                    "max_speed" if idx_max_speed.is_none() => idx_max_speed = Some(i),
                    "median_speed" if idx_median_speed.is_none() => idx_median_speed = Some(i),
                    "displacement" if idx_displacement.is_none() => idx_displacement = Some(i),
                    "total_distance" if idx_total_distance.is_none() => {
                        idx_total_distance = Some(i)
                    }
                    "confinement_ratio" if idx_confinement.is_none() => idx_confinement = Some(i),
                    _ => {}
                }
            }
        }

        let idx_id = idx_id.ok_or_else(|| anyhow!("missing required column 'track_id'"))?;
        let idx_x = idx_x.ok_or_else(|| anyhow!("missing required column 'x_um' (or 'x')"))?;
        let idx_y = idx_y.ok_or_else(|| anyhow!("missing required column 'y_um' (or 'y')"))?;
        let idx_duration =
            idx_duration.ok_or_else(|| anyhow!("missing required column 'duration_s'"))?;

        out.push(Track {
            id: row_get_string(&row, idx_id)?,
            x_um: row_get_f64(&row, idx_x)?,
            y_um: row_get_f64(&row, idx_y)?,
            duration_s: row_get_f64(&row, idx_duration)?,
            max_speed: idx_max_speed.and_then(|i| row_get_f64(&row, i).ok()),
            median_speed: idx_median_speed.and_then(|i| row_get_f64(&row, i).ok()),
            displacement: idx_displacement.and_then(|i| row_get_f64(&row, i).ok()),
            total_distance: idx_total_distance.and_then(|i| row_get_f64(&row, i).ok()),
            confinement_ratio: idx_confinement.and_then(|i| row_get_f64(&row, i).ok()),
        });
    }
    Ok(out)
}

fn row_get_string(row: &parquet::record::Row, idx: usize) -> Result<String> {
    use parquet::record::RowAccessor;
    if let Ok(s) = row.get_string(idx) {
        return Ok(s.clone());
    }
    if let Ok(b) = row.get_bytes(idx) {
        return Ok(b.as_utf8()?.to_string());
    }
    if let Ok(v) = row.get_long(idx) {
        return Ok(v.to_string());
    }
    if let Ok(v) = row.get_int(idx) {
        return Ok(v.to_string());
    }
    Err(anyhow!("cannot decode parquet id column at index {}", idx))
}

fn row_get_f64(row: &parquet::record::Row, idx: usize) -> Result<f64> {
    use parquet::record::RowAccessor;
    if let Ok(v) = row.get_double(idx) {
        return Ok(v);
    }
    if let Ok(v) = row.get_float(idx) {
        return Ok(v as f64);
    }
    if let Ok(v) = row.get_int(idx) {
        return Ok(v as f64);
    }
    if let Ok(v) = row.get_long(idx) {
        return Ok(v as f64);
    }
    if let Ok(v) = row.get_uint(idx) {
        return Ok(v as f64);
    }
    if let Ok(v) = row.get_ulong(idx) {
        return Ok(v as f64);
    }
    Err(anyhow!("cannot decode parquet numeric column at index {}", idx))
}
