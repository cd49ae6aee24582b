//! `{key}` instruction templates resolved from shared state
//!
//! A placeholder is a brace-wrapped identifier (`[A-Za-z0-9_.-]+`). Any
//! other brace text, such as a JSON example inside an instruction, is kept
//! verbatim. `{{` and `}}` render as literal braces.

use std::collections::BTreeSet;

use switchyard_engine::{SharedState, StateError, StateValue};

enum Piece<'a> {
    Text(&'a str),
    Key(&'a str),
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn pieces(template: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(['{', '}']) {
        let (before, tail) = rest.split_at(start);
        if !before.is_empty() {
            out.push(Piece::Text(before));
        }
        if tail.starts_with("{{") {
            out.push(Piece::Text("{"));
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push(Piece::Text("}"));
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail[1..].find('}') {
                Some(end) if end > 0 && tail[1..=end].chars().all(is_key_char) => {
                    out.push(Piece::Key(&tail[1..=end]));
                    rest = &tail[end + 2..];
                }
                _ => {
                    out.push(Piece::Text("{"));
                    rest = &tail[1..];
                }
            }
        } else {
            out.push(Piece::Text("}"));
            rest = &tail[1..];
        }
    }
    if !rest.is_empty() {
        out.push(Piece::Text(rest));
    }
    out
}

/// State keys referenced by a template
pub fn placeholders(template: &str) -> BTreeSet<String> {
    pieces(template)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Key(key) => Some(key.to_string()),
            Piece::Text(_) => None,
        })
        .collect()
}

/// Text form of a state value: text as-is, everything else as JSON
pub fn display_value(value: &StateValue) -> String {
    match value {
        StateValue::Text(text) => text.clone(),
        other => other.to_json().to_string(),
    }
}

/// Substitute every placeholder; a missing key is an error
pub fn render(template: &str, state: &SharedState) -> Result<String, StateError> {
    let mut out = String::with_capacity(template.len());
    for piece in pieces(template) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Key(key) => out.push_str(&display_value(&state.require(key)?)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placeholders() {
        let keys = placeholders("Summary: {summary}\nQuestions: {questions} {summary}");
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["questions".to_string(), "summary".to_string()]
        );
    }

    #[test]
    fn test_render_from_state() {
        let state = SharedState::new();
        state.set("draft_text", "Rust is a systems language.");
        state.set_json("terms", json!(["ownership", "borrowing"])).unwrap();

        let rendered = render("Check: {draft_text} / {terms}", &state).unwrap();
        assert_eq!(
            rendered,
            r#"Check: Rust is a systems language. / ["ownership","borrowing"]"#
        );
    }

    #[test]
    fn test_json_examples_are_kept() {
        let template = r#"Reply with {"status": "ACCURATE"} about {{draft}} {draft_text}"#;
        assert_eq!(placeholders(template).len(), 1);

        let state = SharedState::new();
        state.set("draft_text", "x");
        assert_eq!(
            render(template, &state).unwrap(),
            r#"Reply with {"status": "ACCURATE"} about {draft} x"#
        );
    }

    #[test]
    fn test_missing_key() {
        let state = SharedState::new();
        assert_eq!(
            render("Read {draft_text}", &state),
            Err(StateError::Missing("draft_text".to_string()))
        );
    }

    #[test]
    fn test_unbalanced_braces() {
        let state = SharedState::new();
        assert_eq!(render("a { b } c {", &state).unwrap(), "a { b } c {");
    }
}
