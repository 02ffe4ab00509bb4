use std::fmt;
use std::path::Path;

/// Which of the two uploads a file represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Calendar,
    Screener,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Calendar => "calendar",
            Role::Screener => "screener",
        }
    }

    /// Filename substrings that claim this role, including the common
    /// `calender` misspelling seen in real exports.
    fn keywords(self) -> &'static [&'static str] {
        match self {
            Role::Calendar => &["calendar", "calender"],
            Role::Screener => &["screener"],
        }
    }

    fn matches(self, file_name: &str) -> bool {
        let lowered = file_name.to_ascii_lowercase();
        self.keywords().iter().any(|keyword| lowered.contains(keyword))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("both '{first}' and '{second}' look like the {role} export")]
    Duplicate {
        role: Role,
        first: String,
        second: String,
    },
    #[error("no upload looks like the {role} export (expected '{keyword}' in a filename)")]
    Missing { role: Role, keyword: &'static str },
}

/// Indices into the `[first, second]` upload pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RoleAssignment {
    pub(crate) calendar: usize,
    pub(crate) screener: usize,
}

/// Assign roles from filenames alone. Runs before either file is decoded so
/// a mislabeled pair fails fast.
pub(crate) fn classify(first_name: &str, second_name: &str) -> Result<RoleAssignment, RoleError> {
    let names = [first_name, second_name];

    let calendar_matches: Vec<usize> = (0..names.len())
        .filter(|&index| Role::Calendar.matches(names[index]))
        .collect();

    if calendar_matches.len() > 1 {
        return Err(RoleError::Duplicate {
            role: Role::Calendar,
            first: first_name.to_string(),
            second: second_name.to_string(),
        });
    }

    let calendar = *calendar_matches.first().ok_or(RoleError::Missing {
        role: Role::Calendar,
        keyword: "calendar",
    })?;

    let screener = 1 - calendar;
    if !Role::Screener.matches(names[screener]) {
        return Err(RoleError::Missing {
            role: Role::Screener,
            keyword: "screener",
        });
    }

    Ok(RoleAssignment { calendar, screener })
}

/// Derive a project label from the calendar filename: drop the role keywords
/// and the word `copy`, collapse whitespace, trim stray separators.
pub(crate) fn project_label(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut label = stem;
    for keyword in ["calendar", "calender", "screener", "copy"] {
        label = strip_keyword(&label, keyword);
    }

    let collapsed = label.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches([' ', '-', '_']);
    if trimmed.is_empty() {
        "Project".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Remove case-insensitive occurrences of `keyword` that are not embedded in
/// a longer word, so "Copy" goes but "Copyright" stays.
fn strip_keyword(value: &str, keyword: &str) -> String {
    let lowered = value.to_ascii_lowercase();
    let mut out = String::with_capacity(value.len());
    let mut skip_until = 0;

    for (index, ch) in value.char_indices() {
        if index < skip_until {
            continue;
        }
        if lowered[index..].starts_with(keyword)
            && !preceded_by_letter(value, index)
            && !followed_by_letter(value, index + keyword.len())
        {
            skip_until = index + keyword.len();
            continue;
        }
        out.push(ch);
    }

    out
}

fn preceded_by_letter(value: &str, index: usize) -> bool {
    value[..index]
        .chars()
        .next_back()
        .is_some_and(|ch| ch.is_ascii_alphanumeric())
}

fn followed_by_letter(value: &str, index: usize) -> bool {
    value[index..]
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_alphanumeric())
}
