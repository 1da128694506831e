use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};
use csv::ByteRecord;

use super::model::{CellValue, Dataset, DeathRecord};

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

/// Names of the source columns holding the fields the aggregation needs.
/// Everything else in the file is kept as raw cells only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub sex: String,
    pub age: String,
    pub dose_status: String,
    pub reported_deaths: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            sex: "plec".to_string(),
            age: "wiek".to_string(),
            dose_status: "dawka_ost".to_string(),
            reported_deaths: "liczba_zaraportowanych_zgonow".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Field delimiter of the source files.
pub const DELIMITER: u8 = b';';

/// Load a dataset from a `;`-separated file.
pub fn load_file(path: &Path, mapping: &ColumnMapping) -> Result<Dataset> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening dataset {}", path.display()))?;
    let dataset = load_reader(file, mapping)
        .with_context(|| format!("loading dataset {}", path.display()))?;
    log::info!(
        "Loaded {} records with columns {:?} from {}",
        dataset.len(),
        dataset.column_names(),
        path.display()
    );
    Ok(dataset)
}

/// Load a dataset from any reader.
///
/// Layout: header row with column names, `;` between fields. Bytes that are
/// not valid UTF-8 are dropped rather than rejected. Any malformed row fails
/// the whole load.
pub fn load_reader<R: Read>(reader: R, mapping: &ColumnMapping) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .byte_headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| decode_dropping_invalid(h).trim().to_string())
        .collect();

    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("CSV missing '{name}' column"))
    };
    let sex_idx = position(&mapping.sex)?;
    let age_idx = position(&mapping.age)?;
    let dose_idx = position(&mapping.dose_status)?;
    let deaths_idx = position(&mapping.reported_deaths)?;

    let mut records = Vec::new();
    let mut cells = Vec::new();
    let mut raw = ByteRecord::new();
    let mut row_no = 0usize;

    while reader
        .read_byte_record(&mut raw)
        .with_context(|| format!("CSV row {row_no}"))?
    {
        let text: Vec<String> = raw
            .iter()
            .map(decode_dropping_invalid)
            .collect();
        let field = |idx: usize, name: &str| -> Result<&str> {
            text.get(idx)
                .map(|s| s.trim())
                .with_context(|| format!("CSV row {row_no}: missing '{name}' field"))
        };

        let sex = field(sex_idx, &mapping.sex)?;
        let dose_status = field(dose_idx, &mapping.dose_status)?;
        let age = parse_count(field(age_idx, &mapping.age)?, row_no, &mapping.age)?;
        let deaths = parse_count(
            field(deaths_idx, &mapping.reported_deaths)?,
            row_no,
            &mapping.reported_deaths,
        )?;
        let age = u32::try_from(age)
            .with_context(|| format!("CSV row {row_no}: age {age} out of range"))?;

        records.push(DeathRecord::new(sex, age, dose_status, deaths));
        cells.push(text.iter().map(|s| CellValue::guess(s)).collect());
        row_no += 1;
    }

    Ok(Dataset::new(records, headers, cells))
}

/// Decode `bytes` as UTF-8, skipping invalid sequences.
fn decode_dropping_invalid(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Parse a non-negative integer count. Whole-valued floats (`"3.0"`, as
/// spreadsheet exports write them) are accepted.
fn parse_count(s: &str, row: usize, col: &str) -> Result<u64> {
    if let Ok(v) = s.parse::<u64>() {
        return Ok(v);
    }
    match s.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
        Ok(_) => bail!("CSV row {row}, {col}: '{s}' is not a non-negative integer"),
        Err(_) => bail!("CSV row {row}, {col}: '{s}' is not a number"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::AgeRange;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
data_rap_zgonu;plec;wiek;dawka_ost;liczba_zaraportowanych_zgonow
2022-01-27;M;40;0;5
2022-01-27;M;45;0;3
2022-01-27;K;50;1;2
";

    #[test]
    fn loads_semicolon_separated_rows() {
        let ds = load_reader(SAMPLE.as_bytes(), &ColumnMapping::default()).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.records()[0], DeathRecord::new("M", 40, "0", 5));
        assert_eq!(ds.records()[2], DeathRecord::new("K", 50, "1", 2));
        assert_eq!(ds.age_span(), Some(AgeRange::new(40, 50)));
        assert_eq!(ds.column_names()[0], "data_rap_zgonu");
        let p = ds.project(&[0], &["data_rap_zgonu".to_string()]);
        assert_eq!(p.rows[0], vec![&CellValue::String("2022-01-27".into())]);
    }

    #[test]
    fn column_names_come_from_the_mapping() {
        let text = "sex;age;dose;deaths\nF;30;booster;4\n";
        let mapping = ColumnMapping {
            sex: "sex".into(),
            age: "age".into(),
            dose_status: "dose".into(),
            reported_deaths: "deaths".into(),
        };
        let ds = load_reader(text.as_bytes(), &mapping).unwrap();
        assert_eq!(ds.records()[0], DeathRecord::new("F", 30, "booster", 4));
    }

    #[test]
    fn missing_column_is_fatal() {
        let text = "plec;wiek;dawka_ost\nM;40;0\n";
        let err = load_reader(text.as_bytes(), &ColumnMapping::default()).unwrap_err();
        assert!(format!("{err:#}").contains("liczba_zaraportowanych_zgonow"));
    }

    #[test]
    fn malformed_age_is_fatal() {
        let text = "plec;wiek;dawka_ost;liczba_zaraportowanych_zgonow\nM;abc;0;1\n";
        let err = load_reader(text.as_bytes(), &ColumnMapping::default()).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("row 0"), "{msg}");
        assert!(msg.contains("wiek"), "{msg}");
    }

    #[test]
    fn negative_deaths_are_rejected() {
        let text = "plec;wiek;dawka_ost;liczba_zaraportowanych_zgonow\nM;40;0;-1\n";
        assert!(load_reader(text.as_bytes(), &ColumnMapping::default()).is_err());
    }

    #[test]
    fn whole_floats_are_accepted_as_counts() {
        let text = "plec;wiek;dawka_ost;liczba_zaraportowanych_zgonow\nM;40.0;0;3.0\n";
        let ds = load_reader(text.as_bytes(), &ColumnMapping::default()).unwrap();
        assert_eq!(ds.records()[0], DeathRecord::new("M", 40, "0", 3));
    }

    #[test]
    fn invalid_utf8_bytes_are_dropped() {
        let mut bytes = b"plec;wiek;dawka_ost;liczba_zaraportowanych_zgonow\nM;40;".to_vec();
        bytes.extend_from_slice(&[0xff, b'x', 0xc3]);
        bytes.extend_from_slice(b";1\nK;41;\xc5\x82;2\n");
        let ds = load_reader(bytes.as_slice(), &ColumnMapping::default()).unwrap();
        assert_eq!(ds.records()[0].dose_status, "x");
        // Valid multi-byte sequences survive.
        assert_eq!(ds.records()[1].dose_status, "\u{142}");
    }

    #[test]
    fn load_file_reports_the_path() {
        let err = load_file(Path::new("/nonexistent/deaths.csv"), &ColumnMapping::default())
            .unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/deaths.csv"));
    }
}
