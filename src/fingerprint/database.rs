// database.rs: Survey maps loaded from TSV.
//
// One record per line: `X\tY\tF1\t...\tFk`. All rows share the feature count
// of the first row (or the count the caller insists on). A trailing newline
// and blank lines are skipped; anything else that does not parse, including
// NaN and infinities, fails the whole load.

use std::path::Path;

use crate::error::LoadError;

const POSITION_COLUMNS: usize = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct FingerprintRow {
    pub x: f64,
    pub y: f64,
    pub features: Vec<f64>,
}

/// Immutable fingerprint map: surveyed positions with their feature vectors.
#[derive(Clone, Debug)]
pub struct FingerprintDatabase {
    rows: Vec<FingerprintRow>,
    dimension: usize,
}

impl FingerprintDatabase {
    /// Builds a database from rows already in memory. Every row must carry
    /// the same number of features.
    pub fn from_rows(rows: Vec<FingerprintRow>) -> Result<Self, LoadError> {
        let dimension = rows.first().ok_or(LoadError::Empty)?.features.len();
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.features.len() != dimension)
        {
            return Err(LoadError::Malformed {
                line: i + 1,
                expected: dimension + POSITION_COLUMNS,
                found: row.features.len() + POSITION_COLUMNS,
            });
        }
        Ok(Self { rows, dimension })
    }

    pub fn load(path: &Path, expected_features: Option<usize>) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self::parse(&text, expected_features)?;
        log::info!(
            "loaded {} fingerprints ({} features) from {}",
            db.len(),
            db.dimension,
            path.display()
        );
        Ok(db)
    }

    pub fn parse(text: &str, expected_features: Option<usize>) -> Result<Self, LoadError> {
        let mut expected_columns = expected_features.map(|k| k + POSITION_COLUMNS);
        let mut rows = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let record = raw.trim_end_matches('\r');
            if record.trim().is_empty() {
                continue;
            }

            let fields: Vec<&str> = record.split('\t').collect();
            let expected = *expected_columns.get_or_insert(fields.len());
            if fields.len() != expected || expected <= POSITION_COLUMNS {
                return Err(LoadError::Malformed {
                    line,
                    expected: expected.max(POSITION_COLUMNS + 1),
                    found: fields.len(),
                });
            }

            let values = fields
                .iter()
                .enumerate()
                .map(|(column, field)| {
                    field
                        .trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| LoadError::InvalidNumber {
                            line,
                            column: column + 1,
                            value: field.to_string(),
                        })
                })
                .collect::<Result<Vec<f64>, LoadError>>()?;

            rows.push(FingerprintRow {
                x: values[0],
                y: values[1],
                features: values[POSITION_COLUMNS..].to_vec(),
            });
        }

        Self::from_rows(rows)
    }

    pub fn rows(&self) -> &[FingerprintRow] {
        &self.rows
    }

    /// Feature count shared by every row.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "indoor_nav_db_{}_{}.tsv",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_parse_magnetic_rows() {
        let db = FingerprintDatabase::parse("0\t0\t10\t20\t30\n1.5\t-2\t11\t21\t31", Some(3))
            .unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.dimension(), 3);
        assert_eq!(
            db.rows()[1],
            FingerprintRow {
                x: 1.5,
                y: -2.0,
                features: vec![11.0, 21.0, 31.0],
            }
        );
    }

    #[test]
    fn test_trailing_newline_and_crlf_tolerated() {
        let db = FingerprintDatabase::parse("0\t0\t-60\t-70\r\n5\t5\t-65\t-72\r\n", None).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.dimension(), 2);
    }

    #[test]
    fn test_dimension_from_first_row() {
        let err = FingerprintDatabase::parse("0\t0\t1\t2\t3\t4\n1\t1\t1\t2\t3", None).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Malformed {
                line: 2,
                expected: 6,
                found: 5
            }
        ));
    }

    #[test]
    fn test_expected_feature_count_enforced() {
        let err = FingerprintDatabase::parse("0\t0\t10\t20", Some(3)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Malformed {
                line: 1,
                expected: 5,
                found: 4
            }
        ));
    }

    #[test]
    fn test_position_only_rows_rejected() {
        let err = FingerprintDatabase::parse("0\t0", None).unwrap_err();
        assert!(matches!(err, LoadError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_invalid_number_reports_location() {
        let err = FingerprintDatabase::parse("0\t0\t1\t2\t3\n0\t0\t1\tabc\t3", Some(3)).unwrap_err();
        match err {
            LoadError::InvalidNumber {
                line,
                column,
                value,
            } => {
                assert_eq!(line, 2);
                assert_eq!(column, 4);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }

        for (text, column) in [
            ("NaN\t0\t10\t20\t30", 1),
            ("0\tinf\t10\t20\t30", 2),
            ("0\t0\t10\t-inf\t30", 4),
        ] {
            match FingerprintDatabase::parse(text, Some(3)) {
                Err(LoadError::InvalidNumber { line: 1, column: c, .. }) => assert_eq!(c, column),
                other => panic!("unexpected result for {text:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            FingerprintDatabase::parse("", None),
            Err(LoadError::Empty)
        ));
        assert!(matches!(
            FingerprintDatabase::parse("\n\n", Some(3)),
            Err(LoadError::Empty)
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("indoor_nav_db_does_not_exist.tsv");
        let err = FingerprintDatabase::load(&path, Some(3)).unwrap_err();
        match err {
            LoadError::Io { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let path = temp_file("load", "0\t0\t10\t20\t30");
        let db = FingerprintDatabase::load(&path, Some(3)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(db.len(), 1);
        assert_eq!(db.rows()[0].features, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_from_rows_checks_dimension() {
        let rows = vec![
            FingerprintRow {
                x: 0.0,
                y: 0.0,
                features: vec![1.0, 2.0],
            },
            FingerprintRow {
                x: 1.0,
                y: 0.0,
                features: vec![1.0],
            },
        ];
        assert!(matches!(
            FingerprintDatabase::from_rows(rows),
            Err(LoadError::Malformed { line: 2, .. })
        ));
    }
}
