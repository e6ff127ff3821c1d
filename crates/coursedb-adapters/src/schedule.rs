//! Per-term schedule layouts and the canonical record they reduce to.

use std::str::FromStr;
use std::sync::LazyLock;

use coursedb_core::{AcademicRank, CanonicalRecord, Degree, ProfessorName, RecordFault};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::AdapterError;

static PROFESSOR_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(PGS|GS)(?:\.\s*|\s+))?(?:(TSKH|TS|ThS)(?:\.\s*|\s+))?(.*)$")
        .expect("professor prefix pattern is valid")
});

/// Column layout of a schedule document, selected by its term tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermFormat {
    /// `2023-2024-1`, `2023-2024-2`: code, name, credit, class, capacity, professor, day, period, location, group.
    Legacy2023,
    /// `2024-2025-1`: index, code, class, name, credit, capacity, professor, day, period, location, group.
    Fall2024,
    /// `2024-2025-2`: class, code, name, (unused), credit, group, capacity, professor, day, period, location.
    Spring2025,
}

/// Positional fields before validation.
struct RawScheduleRow<'a> {
    course_code: &'a str,
    course_class_code: &'a str,
    course_name: &'a str,
    credit: &'a str,
    capacity: &'a str,
    professor: &'a str,
    day_of_week: &'a str,
    period: &'a str,
    location: &'a str,
    group_identifier: &'a str,
}

impl TermFormat {
    pub fn from_tag(tag: &str) -> Result<Self, AdapterError> {
        match tag.trim() {
            "2023-2024-1" | "2023-2024-2" => Ok(TermFormat::Legacy2023),
            "2024-2025-1" => Ok(TermFormat::Fall2024),
            "2024-2025-2" => Ok(TermFormat::Spring2025),
            other => Err(AdapterError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn min_columns(self) -> usize {
        match self {
            TermFormat::Legacy2023 => 10,
            TermFormat::Fall2024 | TermFormat::Spring2025 => 11,
        }
    }

    fn project(self, c: &[String]) -> RawScheduleRow<'_> {
        match self {
            TermFormat::Legacy2023 => RawScheduleRow {
                course_code: &c[0],
                course_name: &c[1],
                credit: &c[2],
                course_class_code: &c[3],
                capacity: &c[4],
                professor: &c[5],
                day_of_week: &c[6],
                period: &c[7],
                location: &c[8],
                group_identifier: &c[9],
            },
            TermFormat::Fall2024 => RawScheduleRow {
                course_code: &c[1],
                course_class_code: &c[2],
                course_name: &c[3],
                credit: &c[4],
                capacity: &c[5],
                professor: &c[6],
                day_of_week: &c[7],
                period: &c[8],
                location: &c[9],
                group_identifier: &c[10],
            },
            TermFormat::Spring2025 => RawScheduleRow {
                course_class_code: &c[0],
                course_code: &c[1],
                course_name: &c[2],
                credit: &c[4],
                group_identifier: &c[5],
                capacity: &c[6],
                professor: &c[7],
                day_of_week: &c[8],
                period: &c[9],
                location: &c[10],
            },
        }
    }

    /// Reduce one raw row to a canonical record.
    pub fn adapt(self, row: &[String]) -> Result<CanonicalRecord, RecordFault> {
        if row.len() < self.min_columns() {
            return Err(RecordFault::malformed(format!(
                "row has {} cells, layout {self:?} needs {}",
                row.len(),
                self.min_columns()
            )));
        }
        let raw = self.project(row);

        let required = [
            ("course_code", raw.course_code),
            ("course_name", raw.course_name),
            ("credit", raw.credit),
            ("course_class_code", raw.course_class_code),
            ("professor", raw.professor),
            ("day_of_week", raw.day_of_week),
            ("period", raw.period),
            ("location", raw.location),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(RecordFault::malformed(format!("missing {field}")));
        }

        let credit = raw
            .credit
            .trim()
            .parse::<i32>()
            .map_err(|_| RecordFault::malformed(format!("credit {:?}", raw.credit)))?;
        let periods = parse_periods(raw.period)
            .ok_or_else(|| RecordFault::malformed(format!("period {:?}", raw.period)))?;
        let professors = parse_professor_names(raw.professor);
        if professors.is_empty() {
            return Err(RecordFault::malformed("missing professor"));
        }
        let group = raw.group_identifier.trim();

        Ok(CanonicalRecord {
            course_code: raw.course_code.trim().to_string(),
            course_class_code: raw.course_class_code.trim().to_string(),
            course_name: raw.course_name.trim().to_string(),
            credit,
            capacity: raw.capacity.trim().parse().ok(),
            professors,
            day_of_week: raw.day_of_week.trim().to_string(),
            periods,
            location: raw.location.trim().to_string(),
            group_identifier: (!group.is_empty()).then(|| group.to_string()),
        })
    }
}

impl FromStr for TermFormat {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s)
    }
}

/// Lazily adapted schedule rows; rows that fail to adapt are dropped and counted.
#[derive(Debug)]
pub struct ScheduleRecords<I> {
    format: TermFormat,
    rows: I,
    dropped: usize,
}

impl<I> ScheduleRecords<I> {
    pub fn new(format: TermFormat, rows: I) -> Self {
        Self {
            format,
            rows,
            dropped: 0,
        }
    }

    pub fn format(&self) -> TermFormat {
        self.format
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<I, R> Iterator for ScheduleRecords<I>
where
    I: Iterator<Item = R>,
    R: AsRef<[String]>,
{
    type Item = CanonicalRecord;

    fn next(&mut self) -> Option<Self::Item> {
        for row in self.rows.by_ref() {
            match self.format.adapt(row.as_ref()) {
                Ok(record) => return Some(record),
                Err(_) => self.dropped += 1,
            }
        }
        None
    }
}

/// Adapt raw rows under the layout named by `tag`.
pub fn adapt_rows<I, R>(tag: &str, rows: I) -> Result<ScheduleRecords<I::IntoIter>, AdapterError>
where
    I: IntoIterator<Item = R>,
    R: AsRef<[String]>,
{
    let format = TermFormat::from_tag(tag)?;
    Ok(ScheduleRecords::new(format, rows.into_iter()))
}

/// `"3"` → `[3]`, `"3-4-5"` → `[3, 4, 5]`; anything non-numeric is rejected.
pub fn parse_periods(value: &str) -> Option<Vec<i32>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    value
        .split('-')
        .map(|p| p.trim().parse::<i32>().ok())
        .collect()
}

/// Split a professor cell on `+` or line breaks and parse every name.
pub fn parse_professor_names(value: &str) -> Vec<ProfessorName> {
    value
        .split(['+', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_professor_name)
        .filter(|p| !p.name.is_empty())
        .collect()
}

/// Split an academic-rank/degree prefix (e.g. `PGS.TS.`) off a name.
pub fn parse_professor_name(value: &str) -> ProfessorName {
    let value = value.trim();
    match PROFESSOR_PREFIX.captures(value) {
        Some(caps) => ProfessorName {
            academic_rank: caps.get(1).and_then(|m| AcademicRank::from_prefix(m.as_str())),
            degree: caps.get(2).and_then(|m| Degree::from_prefix(m.as_str())),
            name: caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        },
        None => ProfessorName {
            name: value.to_string(),
            academic_rank: None,
            degree: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn periods_expand_to_literal_lists() {
        assert_eq!(parse_periods("3-4-5"), Some(vec![3, 4, 5]));
        assert_eq!(parse_periods(" 7 "), Some(vec![7]));
        assert_eq!(parse_periods("9-7"), Some(vec![9, 7]));
        assert_eq!(parse_periods("3-"), None);
        assert_eq!(parse_periods("sáng"), None);
        assert_eq!(parse_periods(""), None);
    }

    #[test]
    fn professor_prefixes_map_to_rank_and_degree() {
        let p = parse_professor_name("TS. Nguyen Van A");
        assert_eq!(p.name, "Nguyen Van A");
        assert_eq!(p.degree, Some(Degree::Doctor));
        assert_eq!(p.academic_rank, None);

        let p = parse_professor_name("PGS.TS. Le Thi B");
        assert_eq!(p.name, "Le Thi B");
        assert_eq!(p.academic_rank, Some(AcademicRank::AssociateProfessor));
        assert_eq!(p.degree, Some(Degree::Doctor));

        let p = parse_professor_name("GS.TSKH Tran C");
        assert_eq!(p.academic_rank, Some(AcademicRank::Professor));
        assert_eq!(p.degree, Some(Degree::DoctorOfScience));
        assert_eq!(p.name, "Tran C");

        let p = parse_professor_name("ThS.Pham D");
        assert_eq!(p.degree, Some(Degree::Master));
        assert_eq!(p.name, "Pham D");
    }

    #[test]
    fn unknown_prefix_keeps_the_whole_name() {
        let p = parse_professor_name("CN. Hoang E");
        assert_eq!(p.name, "CN. Hoang E");
        assert_eq!(p.academic_rank, None);
        assert_eq!(p.degree, None);

        let p = parse_professor_name("Tsang F");
        assert_eq!(p.name, "Tsang F");
        assert_eq!(p.degree, None);
    }

    #[test]
    fn professor_cell_splits_on_plus_and_newline() {
        let names = parse_professor_names("TS. A + ThS. B\nC\n");
        let names = names.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn unknown_tag_is_unsupported() {
        assert!(matches!(
            TermFormat::from_tag("2022-2023-1"),
            Err(AdapterError::UnsupportedFormat(tag)) if tag == "2022-2023-1"
        ));
        assert!(adapt_rows("nope", Vec::<Vec<String>>::new()).is_err());
    }

    #[test]
    fn dropped_rows_are_counted_and_order_is_preserved() {
        let rows = vec![
            row(&["INT1", "A", "3", "INT1_1", "60", "TS. X", "2", "1-2", "101", "CL"]),
            row(&["INT2", "B", "three", "INT2_1", "60", "TS. X", "2", "1-2", "101", "CL"]),
            row(&["INT3"]),
            row(&["INT4", "D", "2", "INT4_1", "", "Y", "5", "7", "102", ""]),
        ];
        let mut records = adapt_rows("2023-2024-2", rows).unwrap();
        let codes = records
            .by_ref()
            .map(|r| r.course_code)
            .collect::<Vec<_>>();
        assert_eq!(codes, vec!["INT1", "INT4"]);
        assert_eq!(records.dropped(), 2);
    }

    #[test]
    fn blank_group_and_capacity_are_unset() {
        let record = TermFormat::Legacy2023
            .adapt(&row(&["INT4", "D", "2", "INT4_1", "n/a", "Y", "5", "7", "102", "  "]))
            .unwrap();
        assert_eq!(record.group_identifier, None);
        assert_eq!(record.capacity, None);
    }
}
