//! The currency table, loaded once at startup and read-only afterwards.

use super::Currency;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing column '{0}' in header")]
    MissingColumn(&'static str),

    #[error("line {line}: {reason}")]
    Row { line: usize, reason: String },

    #[error("no header row")]
    Empty,
}

/// Immutable set of currency records.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<Currency>,
}

/// Column positions resolved from the header row.
struct Columns {
    country: usize,
    name: usize,
    code: usize,
    number: usize,
}

impl Columns {
    fn from_header(header: &[String]) -> Result<Self, DatasetError> {
        let find = |name: &'static str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or(DatasetError::MissingColumn(name))
        };

        Ok(Self {
            country: find("Country")?,
            name: find("Name")?,
            code: find("Code")?,
            number: find("Number")?,
        })
    }

    fn width(&self) -> usize {
        [self.country, self.name, self.code, self.number]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 1
    }
}

impl Dataset {
    /// Load a CSV file with a `Country,Name,Code,Number` header.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let contents = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::from_csv(&contents)?;
        debug!(path = %path.display(), records = dataset.len(), "Loaded currency data");
        Ok(dataset)
    }

    pub fn from_csv(contents: &str) -> Result<Self, DatasetError> {
        let mut lines = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (header_line, header) = lines.next().ok_or(DatasetError::Empty)?;
        let header = split_row(header).map_err(|reason| DatasetError::Row {
            line: header_line + 1,
            reason,
        })?;
        let columns = Columns::from_header(&header)?;

        let mut records = Vec::new();
        for (index, line) in lines {
            let row_err = |reason: String| DatasetError::Row {
                line: index + 1,
                reason,
            };

            let fields = split_row(line).map_err(row_err)?;
            if fields.len() < columns.width() {
                return Err(row_err(format!(
                    "expected {} fields, found {}",
                    columns.width(),
                    fields.len()
                )));
            }

            records.push(Currency {
                code: fields[columns.code].trim().to_string(),
                name: fields[columns.name].trim().to_string(),
                number: fields[columns.number].trim().to_string(),
                country: fields[columns.country].trim().to_string(),
            });
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Currency] {
        &self.records
    }

    /// Records matching `filter`.
    ///
    /// An empty filter or `*` matches everything. Otherwise a record matches
    /// when its code or number equals the filter, or its name or country
    /// contains it. Comparison ignores case.
    pub fn find(&self, filter: &str) -> Vec<Currency> {
        let filter = filter.trim();
        if filter.is_empty() || filter == "*" {
            return self.records.clone();
        }

        let needle = filter.to_uppercase();
        self.records
            .iter()
            .filter(|c| {
                c.code.eq_ignore_ascii_case(filter)
                    || c.number == filter
                    || c.name.to_uppercase().contains(&needle)
                    || c.country.to_uppercase().contains(&needle)
            })
            .cloned()
            .collect()
    }
}

/// Split one CSV row. Fields may be quoted; `""` inside quotes is a quote.
fn split_row(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            ('"', true) => quoted = false,
            ('"', false) if field.trim().is_empty() => {
                field.clear();
                quoted = true;
            }
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if quoted {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}
