//! Hidden form state carried between postbacks.
//!
//! The portal keeps its pagination state in hidden `<input>` fields
//! (`__VIEWSTATE` and friends). Every postback has to echo them back,
//! together with any other hidden field the page rendered.

use scraper::{ElementRef, Html};

/// Hidden fields the server relies on to rebuild page state.
pub const CANONICAL_FIELDS: [&str; 4] = [
    "__VIEWSTATE",
    "__VIEWSTATEGENERATOR",
    "__EVENTVALIDATION",
    "__VIEWSTATEENCRYPTED",
];

pub const EVENT_TARGET: &str = "__EVENTTARGET";
pub const EVENT_ARGUMENT: &str = "__EVENTARGUMENT";

/// Ordered name/value pairs submitted with a postback.
///
/// Field order follows the source document so a replayed form looks like
/// one a browser would have sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    fields: Vec<(String, String)>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract every hidden field from a rendered page.
    ///
    /// Canonical state fields come first and are taken by name whatever
    /// their `type`; remaining `type="hidden"` inputs follow in document
    /// order. Missing fields are simply absent.
    pub fn from_html(html: &str) -> Self {
        Self::from_document(&Html::parse_document(html))
    }

    /// Same as [`from_html`](Self::from_html) for an already parsed page.
    pub fn from_document(document: &Html) -> Self {
        let inputs: Vec<ElementRef<'_>> = document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|el| el.value().name() == "input")
            .collect();

        let mut state = Self::new();
        for name in CANONICAL_FIELDS {
            let found = inputs
                .iter()
                .find(|el| el.value().attr("name") == Some(name))
                .and_then(|el| el.value().attr("value"));
            if let Some(value) = found {
                state.fields.push((name.to_string(), value.to_string()));
            }
        }

        for input in &inputs {
            let attrs = input.value();
            let is_hidden = attrs
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("hidden"));
            let Some(name) = attrs.attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            if is_hidden && state.get(name).is_none() {
                let value = attrs.attr("value").unwrap_or_default();
                state.fields.push((name.to_string(), value.to_string()));
            }
        }

        state
    }

    /// Form for navigating the grid named `event_target` to `page`.
    pub fn for_page(&self, event_target: &str, page: u32) -> Self {
        let mut form = self.clone();
        form.set(EVENT_TARGET, event_target);
        form.set(EVENT_ARGUMENT, format!("Page${page}"));
        form
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set a field, replacing its value in place if it already exists.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(field) => field.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// True when at least one canonical state field is present.
    pub fn has_page_state(&self) -> bool {
        CANONICAL_FIELDS.iter().any(|name| self.get(name).is_some())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Borrow the pairs in submission order (suitable for urlencoding).
    pub fn as_pairs(&self) -> &[(String, String)] {
        &self.fields
    }
}
