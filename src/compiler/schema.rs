use super::normalizer::normalize_header;
use super::roles::Role;
use std::sync::OnceLock;

pub(crate) const EMAIL_FIELD: &str = "EMAIL";

/// Static description of one canonical column.
struct FieldSpec {
    name: &'static str,
    aliases: &'static [&'static str],
    required: bool,
    /// Linking fields exist only to key or identify the join and never
    /// appear in the compiled output.
    linking: bool,
}

const CALENDAR_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "User name",
        aliases: &["User name", "User Name", "Tester Name", "Tester"],
        required: false,
        linking: false,
    },
    FieldSpec {
        name: EMAIL_FIELD,
        aliases: &["EMAIL", "Email", "Tester Email", "Participant Email"],
        required: true,
        linking: true,
    },
    FieldSpec {
        name: "Start Time",
        aliases: &["Start Time", "Start Time (", "StartTime"],
        required: false,
        linking: false,
    },
    FieldSpec {
        name: "End Time",
        aliases: &["End Time", "End Time (", "EndTime"],
        required: false,
        linking: false,
    },
    FieldSpec {
        name: "Task Link",
        aliases: &["Task Link", "Task URL", "TaskLink"],
        required: false,
        linking: false,
    },
    FieldSpec {
        name: "Moderator Link",
        aliases: &["Moderator Link", "Moderator URL", "ModeratorLink"],
        required: false,
        linking: false,
    },
    FieldSpec {
        name: "Observers Public Link",
        aliases: &[
            "Observers Public Link",
            "Observers Link",
            "Observer Link",
            "Public Observer Link",
        ],
        required: false,
        linking: false,
    },
];

// Every standard screener column is linking-only: the join happens on EMAIL
// and the rest duplicate identity data the calendar side already carries.
// Only unrecognized "answer" columns survive into the output.
const SCREENER_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "TESTER",
        aliases: &["TESTER", "Tester", "User name", "User Name", "Tester Name"],
        required: false,
        linking: true,
    },
    FieldSpec {
        name: EMAIL_FIELD,
        aliases: &["EMAIL", "Email"],
        required: true,
        linking: true,
    },
    FieldSpec {
        name: "DATE",
        aliases: &["DATE", "Date", "Submission Date", "Created At"],
        required: false,
        linking: true,
    },
    FieldSpec {
        name: "STATUS",
        aliases: &["STATUS", "Status"],
        required: false,
        linking: true,
    },
    FieldSpec {
        name: "ADMIN RATING",
        aliases: &["ADMIN RATING", "Admin Rating"],
        required: false,
        linking: true,
    },
    FieldSpec {
        name: "CLIENT RATING",
        aliases: &["CLIENT RATING", "Client Rating"],
        required: false,
        linking: true,
    },
];

/// A canonical field with its aliases pre-normalized for matching.
pub(crate) struct SchemaField {
    pub(crate) name: &'static str,
    pub(crate) required: bool,
    pub(crate) linking: bool,
    aliases: Vec<String>,
}

/// One target schema (calendar or screener) ready to resolve raw headers.
pub(crate) struct Schema {
    fields: Vec<SchemaField>,
    email_index: usize,
}

static CALENDAR_SCHEMA: OnceLock<Schema> = OnceLock::new();
static SCREENER_SCHEMA: OnceLock<Schema> = OnceLock::new();

pub(crate) fn calendar() -> &'static Schema {
    CALENDAR_SCHEMA.get_or_init(|| Schema::new(CALENDAR_FIELDS))
}

pub(crate) fn screener() -> &'static Schema {
    SCREENER_SCHEMA.get_or_init(|| Schema::new(SCREENER_FIELDS))
}

pub(crate) fn for_role(role: Role) -> &'static Schema {
    match role {
        Role::Calendar => calendar(),
        Role::Screener => screener(),
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("required column '{field}' has no matching header")]
pub(crate) struct MissingFieldError {
    pub(crate) field: &'static str,
}

/// Outcome of matching raw headers against a schema.
#[derive(Debug)]
pub(crate) struct ResolvedColumns {
    /// Source column index per schema field, in field order.
    pub(crate) by_field: Vec<Option<usize>>,
    /// Source columns no canonical field claimed, in original order.
    pub(crate) unclaimed: Vec<usize>,
}

impl Schema {
    fn new(specs: &'static [FieldSpec]) -> Self {
        let fields: Vec<SchemaField> = specs
            .iter()
            .map(|spec| SchemaField {
                name: spec.name,
                required: spec.required,
                linking: spec.linking,
                aliases: spec.aliases.iter().map(|alias| normalize_header(alias)).collect(),
            })
            .collect();
        let email_index = fields
            .iter()
            .position(|field| field.name == EMAIL_FIELD)
            .expect("every schema declares an EMAIL field");
        Self { fields, email_index }
    }

    pub(crate) fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    /// Position of the EMAIL field within `fields()`.
    pub(crate) fn email_index(&self) -> usize {
        self.email_index
    }

    #[cfg(test)]
    pub(crate) fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Match headers in two passes: exact normalized equality first, then a
    /// substring fallback for decorated headers like "Start Time (EST)".
    /// Each source column is claimed at most once.
    pub(crate) fn resolve(&self, headers: &[String]) -> Result<ResolvedColumns, MissingFieldError> {
        let normalized: Vec<String> = headers.iter().map(|header| normalize_header(header)).collect();
        let mut claimed = vec![false; headers.len()];
        let mut by_field = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            let exact = normalized.iter().enumerate().find_map(|(index, header)| {
                (!claimed[index] && field.aliases.contains(header)).then_some(index)
            });
            let found = exact.or_else(|| {
                normalized.iter().enumerate().find_map(|(index, header)| {
                    let hit = !claimed[index]
                        && field.aliases.iter().any(|alias| header.contains(alias.as_str()));
                    hit.then_some(index)
                })
            });

            if let Some(index) = found {
                claimed[index] = true;
            } else if field.required {
                return Err(MissingFieldError { field: field.name });
            }
            by_field.push(found);
        }

        let unclaimed = (0..headers.len())
            .filter(|&index| !claimed[index] && !headers[index].trim().is_empty())
            .collect();

        Ok(ResolvedColumns { by_field, unclaimed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn exact_aliases_resolve_regardless_of_case_and_whitespace() {
        let resolved = calendar()
            .resolve(&headers(&["tester  name", "  EMAIL ", "StartTime"]))
            .expect("email present");
        let user = calendar().field_index("User name").expect("field exists");
        let start = calendar().field_index("Start Time").expect("field exists");
        assert_eq!(resolved.by_field[user], Some(0));
        assert_eq!(resolved.by_field[start], Some(2));
    }

    #[test]
    fn substring_fallback_matches_decorated_headers() {
        let resolved = calendar()
            .resolve(&headers(&["Email", "Start Time (EST)", "End Time (EST)"]))
            .expect("email present");
        let start = calendar().field_index("Start Time").expect("field exists");
        let end = calendar().field_index("End Time").expect("field exists");
        assert_eq!(resolved.by_field[start], Some(1));
        assert_eq!(resolved.by_field[end], Some(2));
    }

    #[test]
    fn missing_email_is_reported_by_name() {
        let error = screener()
            .resolve(&headers(&["Tester", "Status"]))
            .expect_err("email absent");
        assert_eq!(error.field, EMAIL_FIELD);
    }

    #[test]
    fn screener_answer_columns_stay_unclaimed() {
        let resolved = screener()
            .resolve(&headers(&["EMAIL", "STATUS", "Q1: Favorite color?", "Q2"]))
            .expect("email present");
        assert_eq!(resolved.unclaimed, vec![2, 3]);
    }

    #[test]
    fn a_header_is_claimed_only_once() {
        // "Tester" is an alias for both the screener TESTER column and
        // nothing else here; a single source column must not satisfy two
        // canonical fields.
        let resolved = screener()
            .resolve(&headers(&["Tester", "EMAIL"]))
            .expect("email present");
        let tester = screener().field_index("TESTER").expect("field exists");
        assert_eq!(resolved.by_field[tester], Some(0));
        assert!(resolved.unclaimed.is_empty());
    }
}
