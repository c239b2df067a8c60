use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;

/// Columns every batch file must provide.
pub const REQUIRED_COLUMNS: [&str; 3] = ["rtstruct", "reg", "out"];

/// One unit of work: transform `rtstruct` with the matrix in `reg`, write
/// `out`, optionally taking the frame-of-reference linkage from
/// `ref_rtstruct`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub rtstruct: PathBuf,
    pub reg: PathBuf,
    pub out: PathBuf,
    pub ref_rtstruct: Option<PathBuf>,
}

impl BatchJob {
    /// Validates that all required paths are present.
    pub fn new(
        rtstruct: &str,
        reg: &str,
        out: &str,
        ref_rtstruct: Option<&str>,
    ) -> Result<Self> {
        let missing: Vec<&str> = [("rtstruct", rtstruct), ("reg", reg), ("out", out)]
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            bail!("required paths must not be empty: {}", missing.join("/"));
        }
        Ok(Self {
            rtstruct: PathBuf::from(rtstruct.trim()),
            reg: PathBuf::from(reg.trim()),
            out: PathBuf::from(out.trim()),
            ref_rtstruct: ref_rtstruct
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BatchRow {
    #[serde(default)]
    rtstruct: String,
    #[serde(default)]
    reg: String,
    #[serde(default)]
    out: String,
    #[serde(default)]
    ref_rtstruct: Option<String>,
}

/// Picks `;` when the header line has more semicolons than commas, `,`
/// otherwise.
fn detect_delimiter<P: AsRef<Path>>(path: P) -> Result<u8> {
    let file = File::open(&path).with_context(|| {
        format!(
            "failed to open file for delimiter sniffing: {:?}",
            path.as_ref()
        )
    })?;
    let mut reader = BufReader::new(file);
    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .with_context(|| "failed to read first line for delimiter detection")?;

    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();

    if semicolons > commas {
        Ok(b';')
    } else {
        Ok(b',')
    }
}

/// Reads a batch CSV with columns `rtstruct,reg,out[,ref_rtstruct]`.
///
/// A missing column or an unreadable file fails the whole batch. Rows are
/// returned individually so that a bad row only fails its own unit.
pub fn read_batch_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Result<BatchJob>>> {
    let path = path.as_ref();
    let delim = detect_delimiter(path)?;
    let file = File::open(path)
        .with_context(|| format!("failed to open batch file {}", path.display()))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delim)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: StringRecord = rdr
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim())
        .collect();
    let mut missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| !headers.iter().any(|h| h == *col))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        bail!(
            "batch file {} is missing columns: {}",
            path.display(),
            missing.join(", ")
        );
    }
    rdr.set_headers(headers.clone());

    let jobs = rdr
        .records()
        .enumerate()
        .map(|(row, record)| {
            // header is line 1
            let line = row + 2;
            let record = record.map_err(|e| anyhow!("line {line}: {e}"))?;
            let parsed: BatchRow = record
                .deserialize(Some(&headers))
                .map_err(|e| anyhow!("line {line}: {e}"))?;
            BatchJob::new(
                &parsed.rtstruct,
                &parsed.reg,
                &parsed.out,
                parsed.ref_rtstruct.as_deref(),
            )
            .with_context(|| format!("line {line}"))
        })
        .collect();

    Ok(jobs)
}
