use super::normalizer::normalize_email;
use super::schema::{MissingFieldError, Schema};
use super::table::RawTable;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// How unmatched calendar rows are treated. The source material never pins
/// this down, so it stays configurable instead of hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Drop calendar rows without a screener counterpart.
    Inner,
    /// Keep every calendar row; missing screener answers stay empty.
    Left,
}

impl JoinMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inner" => Some(Self::Inner),
            "left" => Some(Self::Left),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
        }
    }
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One upload after header resolution, keyed and ready to join.
pub(crate) struct CanonicalTable {
    pub(crate) schema: &'static Schema,
    /// Screener columns no canonical field claimed; these carry the actual
    /// survey answers into the output.
    pub(crate) answer_headers: Vec<String>,
    pub(crate) rows: Vec<CanonicalRow>,
    pub(crate) blank_emails: usize,
}

pub(crate) struct CanonicalRow {
    pub(crate) email_key: String,
    /// Values in schema field order; unresolved optional fields are empty.
    pub(crate) fields: Vec<String>,
    pub(crate) answers: Vec<String>,
}

impl CanonicalTable {
    pub(crate) fn from_raw(
        schema: &'static Schema,
        raw: &RawTable,
    ) -> Result<Self, MissingFieldError> {
        let resolved = schema.resolve(&raw.headers)?;
        let email_index = schema.email_index();

        let answer_headers = resolved
            .unclaimed
            .iter()
            .map(|&column| raw.headers[column].clone())
            .collect();

        let mut rows = Vec::with_capacity(raw.rows.len());
        let mut blank_emails = 0;
        for raw_row in &raw.rows {
            let fields: Vec<String> = resolved
                .by_field
                .iter()
                .map(|column| column.map(|index| raw_row[index].clone()).unwrap_or_default())
                .collect();
            let email_key = normalize_email(&fields[email_index]);
            if email_key.is_empty() {
                blank_emails += 1;
                continue;
            }
            let answers = resolved
                .unclaimed
                .iter()
                .map(|&column| raw_row[column].clone())
                .collect();
            rows.push(CanonicalRow { email_key, fields, answers });
        }

        Ok(Self { schema, answer_headers, rows, blank_emails })
    }
}

/// The merged result: ordered output columns with linking fields removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub(crate) struct JoinOutcome {
    pub(crate) table: CompiledTable,
    pub(crate) matched: usize,
    pub(crate) unmatched_calendar: usize,
    pub(crate) unmatched_screener: usize,
    pub(crate) duplicates_removed: usize,
}

/// Join calendar rows against screener rows on the normalized email key and
/// project away linking columns. The first screener row per email wins, so a
/// duplicated screener submission cannot fan a calendar row out into several
/// output rows.
pub(crate) fn compile_tables(
    calendar: &CanonicalTable,
    screener: &CanonicalTable,
    mode: JoinMode,
) -> JoinOutcome {
    let mut by_email: HashMap<&str, &CanonicalRow> = HashMap::new();
    for row in &screener.rows {
        by_email.entry(row.email_key.as_str()).or_insert(row);
    }

    let keep: Vec<usize> = calendar
        .schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, field)| !field.linking)
        .map(|(index, _)| index)
        .collect();

    let mut columns: Vec<String> = keep
        .iter()
        .map(|&index| calendar.schema.fields()[index].name.to_string())
        .collect();
    columns.extend(screener.answer_headers.iter().cloned());

    let answer_count = screener.answer_headers.len();
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut matched = 0;
    let mut unmatched_calendar = 0;
    let mut used: HashSet<&str> = HashSet::new();

    for row in &calendar.rows {
        let counterpart = by_email.get(row.email_key.as_str());
        match (counterpart, mode) {
            (Some(screener_row), _) => {
                used.insert(row.email_key.as_str());
                matched += 1;
                rows.push(joined_row(&keep, row, Some(screener_row), answer_count));
            }
            (None, JoinMode::Left) => {
                rows.push(joined_row(&keep, row, None, answer_count));
            }
            (None, JoinMode::Inner) => {
                unmatched_calendar += 1;
            }
        }
    }

    let unmatched_screener = screener
        .rows
        .iter()
        .filter(|row| !used.contains(row.email_key.as_str()))
        .count();

    tidy_user_names(&columns, &mut rows);
    let duplicates_removed = dedupe_rows(&columns, &mut rows);

    JoinOutcome {
        table: CompiledTable { columns, rows },
        matched,
        unmatched_calendar,
        unmatched_screener,
        duplicates_removed,
    }
}

fn joined_row(
    keep: &[usize],
    calendar_row: &CanonicalRow,
    screener_row: Option<&CanonicalRow>,
    answer_count: usize,
) -> Vec<String> {
    let mut row: Vec<String> = keep
        .iter()
        .map(|&index| calendar_row.fields[index].clone())
        .collect();
    match screener_row {
        Some(screener_row) => row.extend(screener_row.answers.iter().cloned()),
        None => row.extend(std::iter::repeat(String::new()).take(answer_count)),
    }
    row
}

fn tidy_user_names(columns: &[String], rows: &mut [Vec<String>]) {
    if let Some(column) = columns.iter().position(|name| name == "User name") {
        for row in rows {
            let trimmed = row[column].trim();
            if trimmed.len() != row[column].len() {
                row[column] = trimmed.to_string();
            }
        }
    }
}

/// Drop repeated (`User name`, `Start Time`) pairs, keeping the first. A
/// participant rebooked into the same slot shows up twice in exports.
fn dedupe_rows(columns: &[String], rows: &mut Vec<Vec<String>>) -> usize {
    let user = columns.iter().position(|name| name == "User name");
    let start = columns.iter().position(|name| name == "Start Time");
    let (Some(user), Some(start)) = (user, start) else {
        return 0;
    };

    let before = rows.len();
    let mut seen: HashSet<(String, String)> = HashSet::new();
    rows.retain(|row| seen.insert((row[user].clone(), row[start].clone())));
    before - rows.len()
}

#[cfg(test)]
mod tests {
    use super::super::schema;
    use super::*;

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|header| header.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        }
    }

    fn calendar_table(rows: &[&[&str]]) -> CanonicalTable {
        CanonicalTable::from_raw(
            schema::calendar(),
            &raw(&["User name", "Email", "Start Time"], rows),
        )
        .expect("calendar resolves")
    }

    fn screener_table(rows: &[&[&str]]) -> CanonicalTable {
        CanonicalTable::from_raw(schema::screener(), &raw(&["email", "Status", "Q1"], rows))
            .expect("screener resolves")
    }

    #[test]
    fn inner_join_drops_unmatched_rows_on_both_sides() {
        let calendar = calendar_table(&[
            &["Bob", "A@X.com", "9:00"],
            &["Eve", "eve@x.com", "10:00"],
            &["Kim", "kim@x.com", "11:00"],
        ]);
        let screener = screener_table(&[
            &["a@x.com", "Pass", "Blue"],
            &["stranger@x.com", "Fail", "Red"],
        ]);

        let outcome = compile_tables(&calendar, &screener, JoinMode::Inner);
        assert_eq!(outcome.table.rows.len(), 1);
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.unmatched_calendar, 2);
        assert_eq!(outcome.unmatched_screener, 1);
        assert_eq!(outcome.table.rows[0][0], "Bob");
        assert_eq!(*outcome.table.rows[0].last().expect("answer cell"), "Blue");
    }

    #[test]
    fn left_join_keeps_calendar_rows_with_empty_answers() {
        let calendar = calendar_table(&[
            &["Bob", "a@x.com", "9:00"],
            &["Eve", "eve@x.com", "10:00"],
        ]);
        let screener = screener_table(&[&["a@x.com", "Pass", "Blue"]]);

        let outcome = compile_tables(&calendar, &screener, JoinMode::Left);
        assert_eq!(outcome.table.rows.len(), 2);
        assert_eq!(outcome.unmatched_calendar, 0);
        assert_eq!(*outcome.table.rows[1].last().expect("answer cell"), "");
    }

    #[test]
    fn linking_columns_never_reach_the_output() {
        let calendar = calendar_table(&[&["Bob", "a@x.com", "9:00"]]);
        let screener = screener_table(&[&["a@x.com", "Pass", "Blue"]]);

        let outcome = compile_tables(&calendar, &screener, JoinMode::Inner);
        assert!(!outcome.table.columns.iter().any(|name| name == "EMAIL"));
        assert!(!outcome.table.columns.iter().any(|name| name == "STATUS"));
        assert_eq!(outcome.table.columns.first().map(String::as_str), Some("User name"));
        assert_eq!(outcome.table.columns.last().map(String::as_str), Some("Q1"));
    }

    #[test]
    fn duplicate_screener_emails_collapse_to_the_first() {
        let calendar = calendar_table(&[&["Bob", "a@x.com", "9:00"]]);
        let screener = screener_table(&[
            &["a@x.com", "Pass", "Blue"],
            &["A@X.COM", "Fail", "Red"],
        ]);

        let outcome = compile_tables(&calendar, &screener, JoinMode::Inner);
        assert_eq!(outcome.table.rows.len(), 1);
        assert_eq!(*outcome.table.rows[0].last().expect("answer cell"), "Blue");
    }

    #[test]
    fn rebooked_slots_deduplicate_on_name_and_start_time() {
        let calendar = calendar_table(&[
            &["  Bob ", "a@x.com", "9:00"],
            &["Bob", "a@x.com", "9:00"],
            &["Bob", "a@x.com", "10:00"],
        ]);
        let screener = screener_table(&[&["a@x.com", "Pass", "Blue"]]);

        let outcome = compile_tables(&calendar, &screener, JoinMode::Inner);
        assert_eq!(outcome.table.rows.len(), 2);
        assert_eq!(outcome.duplicates_removed, 1);
        assert_eq!(outcome.table.rows[0][0], "Bob");
    }

    #[test]
    fn blank_emails_are_excluded_and_counted() {
        let calendar = calendar_table(&[
            &["Bob", "a@x.com", "9:00"],
            &["Ghost", "   ", "9:30"],
        ]);
        assert_eq!(calendar.rows.len(), 1);
        assert_eq!(calendar.blank_emails, 1);
    }
}
