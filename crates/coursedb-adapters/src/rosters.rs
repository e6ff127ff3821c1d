//! Row parsers for catalogs, enrollment grids, staff/student rosters and advisor listings.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use coursedb_core::{
    AdvisorAssignment, CatalogRow, EnrollmentRow, NewCourse, ProfessorRosterRow, RecordFault,
    StudentRosterRow,
};
use regex::Regex;

use crate::schedule::parse_professor_name;

static FACULTY_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(Khoa|Viện|Trung tâm nghiên cứu)\b").expect("faculty type pattern is valid")
});

const BIRTHDAY_FORMAT: &str = "%d/%m/%Y";

fn cell(cells: &[String], idx: usize) -> &str {
    cells.get(idx).map(|s| s.trim()).unwrap_or_default()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_birthday(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), BIRTHDAY_FORMAT).ok()
}

fn parse_hours(value: &str, field: &str) -> Result<i32, RecordFault> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| RecordFault::malformed(format!("{field} {value:?}")))
}

/// Drop the `(*)` and `(bắt buộc)` markers and collapse whitespace.
pub fn standardize_course_name(name: &str) -> String {
    name.replace("(*)", "")
        .replace("(bắt buộc)", "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a catalog row. `Ok(None)` marks rows that are not course rows at all
/// (section headings, short rows, codes containing spaces).
pub fn parse_catalog_row(cells: &[String]) -> Result<Option<CatalogRow>, RecordFault> {
    if cells.len() < 8 {
        return Ok(None);
    }
    let code = cell(cells, 1);
    if code.is_empty() || code.contains(char::is_whitespace) {
        return Ok(None);
    }

    let mut name_lines = cells[2].trim().split('\n');
    let name = standardize_course_name(name_lines.next().unwrap_or_default());
    let english_name = name_lines.next().and_then(non_empty);
    let credits = cell(cells, 3)
        .parse()
        .map_err(|_| RecordFault::malformed(format!("credits {:?}", cell(cells, 3))))?;

    Ok(Some(CatalogRow {
        course: NewCourse {
            code: code.to_string(),
            name,
            english_name,
            credits,
            practice_hours: parse_hours(cell(cells, 4), "practice_hours")?,
            theory_hours: parse_hours(cell(cells, 5), "theory_hours")?,
            self_learn_hours: parse_hours(cell(cells, 6), "self_learn_hours")?,
        },
        prerequisite_code: non_empty(cell(cells, 7)),
    }))
}

pub fn parse_enrollment_row(cells: &[String]) -> Result<EnrollmentRow, RecordFault> {
    if cells.len() < 10 {
        return Err(RecordFault::malformed(format!(
            "enrollment row has {} cells, needs 10",
            cells.len()
        )));
    }
    let credits_text = cell(cells, 8);
    let credits = if !credits_text.is_empty() && credits_text.chars().all(|c| c.is_ascii_digit()) {
        credits_text
            .parse()
            .map_err(|_| RecordFault::malformed(format!("credits {credits_text:?}")))?
    } else {
        0
    };

    Ok(EnrollmentRow {
        student_code: cell(cells, 1).to_string(),
        student_name: cell(cells, 2).to_string(),
        student_birthday: parse_birthday(cell(cells, 3)),
        administrative_class: cell(cells, 4).to_string(),
        course_class_code: cell(cells, 5).to_string(),
        course_name: cell(cells, 6).to_string(),
        group_identifier: cell(cells, 7).to_string(),
        credits,
        enrollment_type: cell(cells, 9).to_string(),
    })
}

/// Leading `Khoa`, `Viện` or `Trung tâm nghiên cứu` keyword of a faculty name.
pub fn faculty_type(faculty_name: &str) -> Option<String> {
    FACULTY_TYPE
        .captures(faculty_name.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Staff directory row; `None` for rows whose first cell is not a running number.
pub fn parse_professor_roster_row(cells: &[String]) -> Option<ProfessorRosterRow> {
    let index = cell(cells, 0);
    if cells.len() < 3 || index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let professor = parse_professor_name(cell(cells, 1));
    if professor.name.is_empty() {
        return None;
    }
    let faculty = cell(cells, 2).to_string();
    Some(ProfessorRosterRow {
        faculty_type: faculty_type(&faculty),
        professor,
        faculty,
    })
}

/// `QH-2021-I/CQ-CN8` → `CN`.
pub fn program_abbreviation(class_name: &str) -> String {
    let tail = class_name.rsplit('/').next().unwrap_or_default();
    tail.strip_prefix("CQ-")
        .unwrap_or(tail)
        .trim_matches(|c: char| c == ' ' || c.is_ascii_digit())
        .to_string()
}

/// Student roster row; `None` when the first cell does not start with a digit.
pub fn parse_student_roster_row(cells: &[String]) -> Option<StudentRosterRow> {
    let starts_with_digit = cell(cells, 0)
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit());
    if cells.len() < 6 || !starts_with_digit {
        return None;
    }
    let code = cells[1].chars().filter(|c| !c.is_whitespace()).collect::<String>();
    let administrative_class = cells.last().map(|s| s.trim()).unwrap_or_default().to_string();
    Some(StudentRosterRow {
        program_abbreviation: program_abbreviation(&administrative_class),
        code,
        name: cell(cells, 2).to_string(),
        birthday: parse_birthday(cell(cells, 3)),
        gender: non_empty(cell(cells, 4)),
        administrative_class,
    })
}

/// `"Cố vấn học tập (Nguyễn Văn A_K64CA)"` → advisor `Nguyễn Văn A`, class `K64CA`.
pub fn parse_advisor_info(heading: &str) -> Option<AdvisorAssignment> {
    let start = heading.find('(')? + 1;
    let end = heading.find(')')?;
    if start >= end {
        return None;
    }
    let parts = heading[start..end].split('_').collect::<Vec<_>>();
    let [advisor, class] = parts.as_slice() else {
        return None;
    };
    let advisor_name = non_empty(advisor)?;
    let class_name = non_empty(class)?;
    Some(AdvisorAssignment {
        advisor_name,
        class_name,
    })
}

/// Cohort short names (`K64CA`) to administrative class names, built once per run
/// from the conversion table.
#[derive(Debug, Clone, Default)]
pub struct ClassNameMap {
    converted: HashMap<String, String>,
    by_cohort: HashMap<String, String>,
}

impl ClassNameMap {
    /// Lines look like `index original_code converted_name ...`; others are ignored.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut converted = HashMap::new();
        for line in lines {
            let parts = line.split_whitespace().collect::<Vec<_>>();
            let Some(first) = parts.first() else {
                continue;
            };
            if !first.chars().all(|c| c.is_ascii_digit()) || parts.len() < 3 {
                continue;
            }
            converted.insert(parts[1].to_string(), parts[2].to_string());
        }

        let mut by_cohort = HashMap::new();
        for original in converted.keys() {
            let year = original.chars().skip(3).take(4).collect::<String>();
            let Ok(year) = year.parse::<i32>() else {
                continue;
            };
            let suffix = original
                .chars()
                .skip(13)
                .filter(|c| *c != '-')
                .collect::<String>();
            by_cohort.insert(format!("K{}{suffix}", year - 1955), original.clone());
        }

        Self {
            converted,
            by_cohort,
        }
    }

    pub fn len(&self) -> usize {
        self.converted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converted.is_empty()
    }

    pub fn standardize(&self, short_name: &str) -> Option<&str> {
        self.by_cohort
            .get(short_name)
            .and_then(|original| self.converted.get(original))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn catalog_row_standardizes_name_and_defaults_hours() {
        let parsed = parse_catalog_row(&row(&[
            "1",
            "INT2204",
            "Lập trình hướng đối tượng (*)\nObject-oriented Programming",
            "3",
            "",
            "30",
            "15",
            "INT1008",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(parsed.course.name, "Lập trình hướng đối tượng");
        assert_eq!(parsed.course.english_name.as_deref(), Some("Object-oriented Programming"));
        assert_eq!(parsed.course.practice_hours, 0);
        assert_eq!(parsed.course.theory_hours, 30);
        assert_eq!(parsed.prerequisite_code.as_deref(), Some("INT1008"));
    }

    #[test]
    fn catalog_headings_and_bad_credits() {
        assert_eq!(parse_catalog_row(&row(&["I", "Khối kiến thức chung", "", "", "", "", "", ""])).unwrap(), None);
        assert_eq!(parse_catalog_row(&row(&["1", "INT1"])).unwrap(), None);
        assert!(parse_catalog_row(&row(&["1", "INT1", "A", "x", "", "", "", ""])).is_err());
    }

    #[test]
    fn enrollment_row_tolerates_bad_birthday_and_credits() {
        let parsed = parse_enrollment_row(&row(&[
            "1",
            "21020001",
            "Nguyễn Văn A",
            "31/02/2003",
            "QH-2021-I/CQ-C-A",
            "INT2204 1",
            "Lập trình hướng đối tượng",
            "TH1",
            "-",
            "Học lần đầu",
        ]))
        .unwrap();
        assert_eq!(parsed.student_birthday, None);
        assert_eq!(parsed.credits, 0);
        assert_eq!(parsed.course_code(), "INT2204");

        let parsed = parse_enrollment_row(&row(&[
            "1", "21020001", "A", "05/09/2003", "K", "INT2204 1", "N", "CL", "3", "Học lại",
        ]))
        .unwrap();
        assert_eq!(parsed.student_birthday, NaiveDate::from_ymd_opt(2003, 9, 5));
        assert_eq!(parsed.credits, 3);

        assert!(parse_enrollment_row(&row(&["1", "2"])).is_err());
    }

    #[test]
    fn faculty_type_reads_leading_keyword() {
        assert_eq!(faculty_type("Khoa Công nghệ Thông tin").as_deref(), Some("Khoa"));
        assert_eq!(faculty_type(" Viện Tiên tiến").as_deref(), Some("Viện"));
        assert_eq!(
            faculty_type("Trung tâm nghiên cứu Điện tử").as_deref(),
            Some("Trung tâm nghiên cứu")
        );
        assert_eq!(faculty_type("Phòng Đào tạo"), None);
    }

    #[test]
    fn staff_row_needs_running_number() {
        let parsed = parse_professor_roster_row(&row(&["3", "PGS.TS. Le B", "Khoa Vật lý"])).unwrap();
        assert_eq!(parsed.professor.name, "Le B");
        assert_eq!(parsed.faculty_type.as_deref(), Some("Khoa"));
        assert!(parse_professor_roster_row(&row(&["Bộ môn", "x", "y"])).is_none());
    }

    #[test]
    fn student_row_derives_program_and_strips_code_spaces() {
        let parsed = parse_student_roster_row(&row(&[
            "12",
            "2102 0001",
            "Trần Thị C",
            "01/01/2003",
            "Nữ",
            "",
            "QH-2021-I/CQ-CN8",
        ]))
        .unwrap();
        assert_eq!(parsed.code, "21020001");
        assert_eq!(parsed.program_abbreviation, "CN");
        assert_eq!(parsed.email(), "21020001@vnu.edu.vn");
        assert!(parse_student_roster_row(&row(&["STT", "Mã", "Tên", "", "", "Lớp"])).is_none());
    }

    #[test]
    fn advisor_heading_parsing() {
        let parsed = parse_advisor_info("CVHT (Nguyễn Văn A_K64CA)").unwrap();
        assert_eq!(parsed.advisor_name, "Nguyễn Văn A");
        assert_eq!(parsed.class_name, "K64CA");
        assert!(parse_advisor_info("no parentheses").is_none());
        assert!(parse_advisor_info("(a_b_c)").is_none());
        assert!(parse_advisor_info(")(").is_none());
    }

    #[test]
    fn class_name_map_keys_by_cohort() {
        let map = ClassNameMap::from_lines([
            "STT Mã lớp cũ Mã lớp mới",
            "1 QH-2019-I/CQ-C-A QH-2019-I/CQ-CA",
            "2 QH-2019-I/CQ-C-CLC QH-2019-I/CQ-CLC1",
            "",
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.standardize("K64CA"), Some("QH-2019-I/CQ-CA"));
        assert_eq!(map.standardize("K64CCLC"), Some("QH-2019-I/CQ-CLC1"));
        assert_eq!(map.standardize("K65CA"), None);
    }
}
