use coursedb_adapters::{adapt_rows, catalog_table_rows, parse_catalog_row, TermFormat};
use coursedb_core::{Degree, RecordFault};

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}

/// One complete row per layout plus the positions of its required fields.
fn layouts() -> Vec<(&'static str, Vec<String>, Vec<usize>)> {
    vec![
        (
            "2023-2024-1",
            row(&["INT101", "Intro", "3", "INT101_1", "60", "TS. Nguyen Van A", "2", "3-4-5", "101", "CL"]),
            vec![0, 1, 2, 3, 5, 6, 7, 8],
        ),
        (
            "2024-2025-1",
            row(&["1", "INT101", "INT101_1", "Intro", "3", "60", "TS. Nguyen Van A", "2", "3-4-5", "101", "CL"]),
            vec![1, 2, 3, 4, 6, 7, 8, 9],
        ),
        (
            "2024-2025-2",
            row(&["INT101_1", "INT101", "Intro", "", "3", "CL", "60", "TS. Nguyen Van A", "2", "3-4-5", "101"]),
            vec![0, 1, 2, 4, 7, 8, 9, 10],
        ),
    ]
}

#[test]
fn every_layout_yields_the_same_canonical_record() {
    let records = layouts()
        .into_iter()
        .map(|(tag, row, _)| TermFormat::from_tag(tag).unwrap().adapt(&row).unwrap())
        .collect::<Vec<_>>();

    for record in &records {
        assert_eq!(record, &records[0]);
    }
    let record = &records[0];
    assert_eq!(record.course_code, "INT101");
    assert_eq!(record.course_class_code, "INT101_1");
    assert_eq!(record.credit, 3);
    assert_eq!(record.capacity, Some(60));
    assert_eq!(record.periods, vec![3, 4, 5]);
    assert_eq!(record.group_identifier.as_deref(), Some("CL"));
    assert_eq!(record.professors.len(), 1);
    assert_eq!(record.professors[0].name, "Nguyen Van A");
    assert_eq!(record.professors[0].degree, Some(Degree::Doctor));
}

#[test]
fn missing_required_field_is_rejected_in_every_layout() {
    for (tag, complete, required) in layouts() {
        let format = TermFormat::from_tag(tag).unwrap();
        for position in required {
            let mut broken = complete.clone();
            broken[position] = "  ".into();
            assert!(
                matches!(format.adapt(&broken), Err(RecordFault::MalformedRecord(_))),
                "{tag}: blank column {position} was accepted"
            );
        }
    }
}

#[test]
fn short_rows_are_dropped_and_long_rows_use_leading_columns() {
    for (tag, complete, _) in layouts() {
        let mut short = complete.clone();
        short.pop();
        let mut long = complete.clone();
        long.push("extra".into());

        let mut records = adapt_rows(tag, vec![short, long]).unwrap();
        assert_eq!(records.by_ref().count(), 1, "{tag}");
        assert_eq!(records.dropped(), 1, "{tag}");
    }
}

#[test]
fn catalog_html_feeds_the_row_parser() {
    let html = r#"<html><body><table>
        <tr><th>STT</th><th>Mã học phần</th><th>Học phần</th><th>Số TC</th><th>TH</th><th>LT</th><th>TH</th><th>Tiên quyết</th></tr>
        <tr><td colspan="8">I. Khối kiến thức chung</td></tr>
        <tr><td>1</td><td>PHI1006</td><td>Triết học Mác - Lênin (bắt buộc)</td><td>3</td><td></td><td>30</td><td>15</td><td></td></tr>
        <tr><td>2</td><td>INT2210</td><td>Cấu trúc dữ liệu và giải thuật</td><td>4</td><td>30</td><td>30</td><td></td><td>INT1008</td></tr>
    </table></body></html>"#;

    let parsed = catalog_table_rows(html)
        .unwrap()
        .iter()
        .filter_map(|cells| parse_catalog_row(cells).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].course.name, "Triết học Mác - Lênin");
    assert_eq!(parsed[0].prerequisite_code, None);
    assert_eq!(parsed[1].course.practice_hours, 30);
    assert_eq!(parsed[1].prerequisite_code.as_deref(), Some("INT1008"));
}
