//! Working-set classification and fill-strategy resolution.
//!
//! The declared `form_data` is never mutated; classification derives a
//! separate working set from it by probing the live page.

use chrono::NaiveDate;
use tracing::debug;

use super::cancel::CancelToken;
use crate::browser::BrowserSession;
use crate::error::AutomationError;
use crate::queue::FormField;

/// Attribute set on elements already claimed by the working set.
pub const CLAIM_MARKER: &str = "data-fr-queued";

/// Probed in order when first/last name parts have no matching field.
pub const FULL_NAME_SELECTORS: &[&str] = &[
    "#userName",
    "#name",
    "#fullName",
    "#user-name",
    r#"input[placeholder="Full Name"]"#,
    r#"input[placeholder="Name"]"#,
];

const DATE_OF_BIRTH_SELECTOR: &str = "#dateOfBirthInput";
const SEARCHABLE_DROPDOWN_SELECTORS: &[&str] = &["#state", "#city"];
const AUTOCOMPLETE_MARKER: &str = "subjectsInput";

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %B %Y", "%d %B, %Y", "%m/%d/%Y"];

/// How a working-set field is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStrategy {
    /// Calendar widget: year select, month select, day cell.
    DatePicker,
    /// Type-ahead dropdown confirmed with Enter.
    SearchableDropdown,
    /// Multi-value autocomplete confirmed with Enter.
    Autocomplete,
    /// Clickable label (styled checkbox / radio).
    Label,
    /// Native `<select>`.
    Select,
    /// File input; pauses for an upload.
    FileUpload,
    /// Native checkbox / radio.
    Toggle,
    /// Anything else: clear and type.
    Text,
}

impl FillStrategy {
    /// Widget strategies keyed on the selector itself.
    pub fn for_selector(selector: &str) -> Option<Self> {
        if selector == DATE_OF_BIRTH_SELECTOR {
            Some(Self::DatePicker)
        } else if SEARCHABLE_DROPDOWN_SELECTORS.contains(&selector) {
            Some(Self::SearchableDropdown)
        } else if selector.contains(AUTOCOMPLETE_MARKER) {
            Some(Self::Autocomplete)
        } else {
            None
        }
    }

    /// Strategy by element kind.
    pub fn for_element(tag: &str, input_type: Option<&str>) -> Self {
        match (tag, input_type.map(str::to_ascii_lowercase).as_deref()) {
            ("label", _) => Self::Label,
            ("select", _) => Self::Select,
            ("input", Some("file")) => Self::FileUpload,
            ("input", Some("checkbox" | "radio")) => Self::Toggle,
            _ => Self::Text,
        }
    }
}

/// Result of probing the page for the declared fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    pub fields: Vec<FormField>,
    /// First/last name parts were declared but one side had no field.
    pub name_fallback_needed: bool,
    /// The full-name selector substituted in, if one was found.
    pub name_fallback: Option<String>,
}

impl WorkingSet {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    fn covers(&self, selector: &str) -> bool {
        self.fields.iter().any(|f| f.selector == selector)
    }
}

/// Build the working set from the declared fields.
///
/// Unresolvable selectors are skipped; an element reached through a second
/// selector is included only once.
pub async fn classify(
    session: &dyn BrowserSession,
    declared: &[FormField],
    cancel: &CancelToken,
) -> Result<WorkingSet, AutomationError> {
    let mut set = WorkingSet::default();
    let mut first_name = String::new();
    let mut last_name = String::new();

    for field in declared {
        cancel.checkpoint()?;
        let lower = field.selector.to_lowercase();
        if lower.contains("first") {
            first_name = field.value.clone();
        }
        if lower.contains("last") {
            last_name = field.value.clone();
        }

        match session.exists(&field.selector).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(selector = %field.selector, "Declared field not on page");
                continue;
            }
            Err(e) => {
                debug!(selector = %field.selector, error = %e, "Selector did not resolve");
                continue;
            }
        }

        match session.claim_element(&field.selector, CLAIM_MARKER).await {
            Ok(false) => {}
            Ok(true) => {
                debug!(selector = %field.selector, "Element already claimed by another selector");
                continue;
            }
            Err(e) => {
                debug!(selector = %field.selector, error = %e, "Could not claim element");
                continue;
            }
        }

        // Hidden fields stay in the set; filling scrolls them into view.
        if let Ok(None) = session.bounding_box(&field.selector).await {
            debug!(selector = %field.selector, "Field has no layout box");
        }

        set.fields.push(field.clone());
    }

    let first_found = set
        .fields
        .iter()
        .any(|f| f.selector.to_lowercase().contains("first"));
    let last_found = set
        .fields
        .iter()
        .any(|f| f.selector.to_lowercase().contains("last"));

    if (!first_found || !last_found) && !first_name.is_empty() && !last_name.is_empty() {
        set.name_fallback_needed = true;
        let full_name = format!("{first_name} {last_name}");

        for selector in FULL_NAME_SELECTORS {
            cancel.checkpoint()?;
            if set.covers(selector) {
                continue;
            }
            if let Ok(true) = session.exists(selector).await {
                set.fields.push(FormField::new(*selector, full_name.clone()));
                set.name_fallback = Some(selector.to_string());
                break;
            }
        }
    }

    Ok(set)
}

/// Parse a date-of-birth value in any of the accepted layouts.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Day cell of the calendar for `day`, excluding spill-over days.
pub fn day_cell_selector(day: u32) -> String {
    format!(".react-datepicker__day--{day:03}:not(.react-datepicker__day--outside-month)")
}

#[cfg(test)]
mod tests {
    use chrono::Datelike;

    use super::*;

    #[test]
    fn widget_strategies_by_selector() {
        assert_eq!(
            FillStrategy::for_selector("#dateOfBirthInput"),
            Some(FillStrategy::DatePicker)
        );
        assert_eq!(
            FillStrategy::for_selector("#city"),
            Some(FillStrategy::SearchableDropdown)
        );
        assert_eq!(
            FillStrategy::for_selector("#subjectsInput"),
            Some(FillStrategy::Autocomplete)
        );
        assert_eq!(FillStrategy::for_selector("#email"), None);
    }

    #[test]
    fn element_strategies() {
        assert_eq!(FillStrategy::for_element("label", None), FillStrategy::Label);
        assert_eq!(FillStrategy::for_element("select", None), FillStrategy::Select);
        assert_eq!(
            FillStrategy::for_element("input", Some("FILE")),
            FillStrategy::FileUpload
        );
        assert_eq!(
            FillStrategy::for_element("input", Some("radio")),
            FillStrategy::Toggle
        );
        assert_eq!(FillStrategy::for_element("input", Some("email")), FillStrategy::Text);
        assert_eq!(FillStrategy::for_element("textarea", None), FillStrategy::Text);
    }

    #[test]
    fn parses_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(1993, 5, 15).unwrap();
        for raw in ["1993-05-15", "15 May 1993", "15 May, 1993", "05/15/1993", " 15 may 1993 "] {
            assert_eq!(parse_date(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_date("yesterday"), None);
        // Month select is zero-based.
        assert_eq!(expected.month0(), 4);
    }

    #[test]
    fn day_cell_is_zero_padded() {
        assert_eq!(
            day_cell_selector(7),
            ".react-datepicker__day--007:not(.react-datepicker__day--outside-month)"
        );
    }
}
