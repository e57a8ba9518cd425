//! Form validation
//!
//! A [`Schema`] maps each field of a closed [`FormField`] set to an ordered
//! list of [`Rule`]s. Whole-form validation checks every field and collects
//! all violations; single-field validation re-checks one field after an edit.

use std::collections::BTreeMap;
use std::fmt::Debug;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::graphql::operations::ServerFieldError;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

/// The closed set of fields a form holds
pub trait FormField: Copy + Ord + Debug + Send + Sync + 'static {
    const ALL: &'static [Self];

    /// Wire and display name, e.g. `confirmPassword`
    fn name(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|field| field.name() == name)
    }
}

/// Current text of every field. Fields start out empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormValues<F: FormField> {
    values: BTreeMap<F, String>,
}

impl<F: FormField> Default for FormValues<F> {
    fn default() -> Self {
        Self {
            values: F::ALL.iter().map(|&field| (field, String::new())).collect(),
        }
    }
}

impl<F: FormField> FormValues<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: F) -> &str {
        self.values.get(&field).map(String::as_str).unwrap_or_default()
    }

    pub fn set(&mut self, field: F, value: impl Into<String>) {
        self.values.insert(field, value.into());
    }

    pub fn with(mut self, field: F, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (F, &str)> {
        self.values.iter().map(|(field, value)| (*field, value.as_str()))
    }
}

/// Field-keyed error messages plus at most one form-level message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormErrors<F: FormField> {
    fields: BTreeMap<F, String>,
    form: Option<String>,
}

impl<F: FormField> Default for FormErrors<F> {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            form: None,
        }
    }
}

impl<F: FormField> FormErrors<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single error not tied to any field
    pub fn form_level(message: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            form: Some(message.into()),
        }
    }

    /// Normalize server-reported errors into the local shape.
    ///
    /// Paths naming no known field are folded into the form-level message.
    pub fn from_server(errors: &[ServerFieldError]) -> Self {
        let mut normalized = Self::new();
        let mut unscoped = Vec::new();
        for error in errors {
            match F::from_name(&error.path) {
                Some(field) => {
                    normalized.fields.entry(field).or_insert_with(|| error.message.clone());
                }
                None => unscoped.push(error.message.clone()),
            }
        }
        if !unscoped.is_empty() {
            normalized.form = Some(unscoped.join("; "));
        }
        normalized
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.form.is_none()
    }

    pub fn get(&self, field: F) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn form_error(&self) -> Option<&str> {
        self.form.as_deref()
    }

    pub fn insert(&mut self, field: F, message: impl Into<String>) {
        self.fields.insert(field, message.into());
    }

    pub fn remove(&mut self, field: F) -> Option<String> {
        self.fields.remove(&field)
    }

    pub fn clear_form_error(&mut self) {
        self.form = None;
    }

    pub fn fields(&self) -> impl Iterator<Item = (F, &str)> {
        self.fields.iter().map(|(field, message)| (*field, message.as_str()))
    }

    /// `name -> message` view, handy for logs and display
    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        self.fields
            .iter()
            .map(|(field, message)| (field.name(), message.clone()))
            .collect()
    }
}

/// A single check on a field's value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule<F> {
    /// Value must contain non-whitespace text
    Required(String),
    /// Value must look like an email address
    Email(String),
    MinLength(usize, String),
    MaxLength(usize, String),
    /// Value must equal another field's value
    Matches(F, String),
}

impl<F: FormField> Rule<F> {
    pub fn required(message: impl Into<String>) -> Self {
        Self::Required(message.into())
    }

    pub fn email(message: impl Into<String>) -> Self {
        Self::Email(message.into())
    }

    pub fn min_length(min: usize, message: impl Into<String>) -> Self {
        Self::MinLength(min, message.into())
    }

    pub fn max_length(max: usize, message: impl Into<String>) -> Self {
        Self::MaxLength(max, message.into())
    }

    pub fn matches(other: F, message: impl Into<String>) -> Self {
        Self::Matches(other, message.into())
    }

    /// Message if `value` violates the rule. Only `Required` rejects empty
    /// values; the other rules let them through.
    fn check(&self, value: &str, values: &FormValues<F>) -> Option<&str> {
        let passes = match self {
            Rule::Required(_) => !value.trim().is_empty(),
            _ if value.is_empty() => true,
            Rule::Email(_) => EMAIL_RE.is_match(value),
            Rule::MinLength(min, _) => value.chars().count() >= *min,
            Rule::MaxLength(max, _) => value.chars().count() <= *max,
            Rule::Matches(other, _) => value == values.get(*other),
        };
        if passes { None } else { Some(self.message()) }
    }

    fn message(&self) -> &str {
        match self {
            Rule::Required(m)
            | Rule::Email(m)
            | Rule::MinLength(_, m)
            | Rule::MaxLength(_, m)
            | Rule::Matches(_, m) => m,
        }
    }
}

/// Validation rules for every field of a form
#[derive(Debug, Clone)]
pub struct Schema<F: FormField> {
    rules: BTreeMap<F, Vec<Rule<F>>>,
}

impl<F: FormField> Default for Schema<F> {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }
}

impl<F: FormField> Schema<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule for `field`. Rules run in insertion order.
    pub fn rule(mut self, field: F, rule: Rule<F>) -> Self {
        self.rules.entry(field).or_default().push(rule);
        self
    }

    /// Validate one field. The first failing rule wins.
    pub fn validate_field(&self, field: F, values: &FormValues<F>) -> Option<String> {
        let value = values.get(field);
        self.rules
            .get(&field)?
            .iter()
            .find_map(|rule| rule.check(value, values))
            .map(str::to_string)
    }

    /// Validate every field, collecting all violations
    pub fn validate(&self, values: &FormValues<F>) -> FormErrors<F> {
        let mut errors = FormErrors::new();
        for &field in F::ALL {
            if let Some(message) = self.validate_field(field, values) {
                errors.insert(field, message);
            }
        }
        errors
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub(crate) enum Field {
        Title,
        Contact,
        Code,
        CodeAgain,
    }

    impl FormField for Field {
        const ALL: &'static [Self] = &[Field::Title, Field::Contact, Field::Code, Field::CodeAgain];

        fn name(self) -> &'static str {
            match self {
                Field::Title => "title",
                Field::Contact => "contact",
                Field::Code => "code",
                Field::CodeAgain => "codeAgain",
            }
        }
    }

    fn schema() -> Schema<Field> {
        Schema::new()
            .rule(Field::Title, Rule::required("title required"))
            .rule(Field::Title, Rule::max_length(5, "title too long"))
            .rule(Field::Contact, Rule::email("bad email"))
            .rule(Field::Code, Rule::required("code required"))
            .rule(Field::Code, Rule::min_length(4, "code too short"))
            .rule(Field::CodeAgain, Rule::matches(Field::Code, "codes differ"))
    }

    fn valid() -> FormValues<Field> {
        FormValues::new()
            .with(Field::Title, "Emma")
            .with(Field::Contact, "a@b.com")
            .with(Field::Code, "1234")
            .with(Field::CodeAgain, "1234")
    }

    #[test]
    fn test_valid_values_produce_no_errors() {
        assert!(schema().validate(&valid()).is_empty());
    }

    #[test]
    fn test_all_violations_collected() {
        let values = FormValues::new()
            .with(Field::Title, "   ")
            .with(Field::Contact, "nope")
            .with(Field::Code, "12")
            .with(Field::CodeAgain, "21");
        let errors = schema().validate(&values);

        assert_eq!(
            errors.to_map(),
            BTreeMap::from([
                ("code", "code too short".to_string()),
                ("codeAgain", "codes differ".to_string()),
                ("contact", "bad email".to_string()),
                ("title", "title required".to_string()),
            ])
        );
    }

    #[test]
    fn test_missing_required_field_flags_only_that_field() {
        let values = valid().with(Field::Title, "");
        let errors = schema().validate(&values);
        assert_eq!(errors.fields().count(), 1);
        assert_eq!(errors.get(Field::Title), Some("title required"));
    }

    #[test]
    fn test_optional_rules_skip_empty_values() {
        let values = valid().with(Field::Contact, "");
        assert_eq!(schema().validate_field(Field::Contact, &values), None);
    }

    #[test]
    fn test_first_failing_rule_wins() {
        let values = valid().with(Field::Title, "Too long title");
        assert_eq!(
            schema().validate_field(Field::Title, &values),
            Some("title too long".to_string())
        );
    }

    #[test]
    fn test_single_field_validation_ignores_other_fields() {
        let values = valid().with(Field::Title, "").with(Field::Code, "9999");
        // CodeAgain is checked against Code, Title's problem is not reported
        assert_eq!(
            schema().validate_field(Field::CodeAgain, &values),
            Some("codes differ".to_string())
        );
        assert_eq!(schema().validate_field(Field::Code, &values), None);
    }

    #[test]
    fn test_server_errors_normalize_to_fields() {
        let errors = FormErrors::<Field>::from_server(&[
            ServerFieldError { path: "contact".into(), message: "taken".into() },
            ServerFieldError { path: "contact".into(), message: "second".into() },
            ServerFieldError { path: "account".into(), message: "locked".into() },
        ]);
        assert_eq!(errors.get(Field::Contact), Some("taken"));
        assert_eq!(errors.form_error(), Some("locked"));
        assert_eq!(errors.fields().count(), 1);
    }
}
