//! Image references inside task descriptions.
//!
//! A description embeds images as `![alt](image:<id>)`; the payloads live in the
//! task's `images` map. A reference whose id has no payload is left as literal
//! text.

use crate::model::{generate_id, Task};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn image_ref() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"!\[(.*?)\]\(image:([a-zA-Z0-9-]+)\)").expect("image reference pattern")
    })
}

/// Substitutes payloads for every resolvable reference.
pub fn render_description(description: &str, images: &BTreeMap<String, String>) -> String {
    image_ref()
        .replace_all(description, |caps: &Captures<'_>| match images.get(&caps[2]) {
            Some(payload) => format!("![{}]({})", &caps[1], payload),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Removes every image reference; used to keep prompts small.
pub fn strip_images(description: &str) -> String {
    image_ref().replace_all(description, "").trim().to_string()
}

/// Ids referenced by the description that have no payload.
pub fn missing_images(description: &str, images: &BTreeMap<String, String>) -> Vec<String> {
    image_ref()
        .captures_iter(description)
        .map(|caps| caps[2].to_string())
        .filter(|id| !images.contains_key(id))
        .collect()
}

/// Stores `payload` under a fresh id and appends a reference to the
/// description. Returns the new id.
pub fn attach_image(task: &mut Task, alt: &str, payload: String) -> String {
    let id = generate_id();
    task.images.insert(id.clone(), payload);
    let reference = format!("![{}](image:{})", alt, id);
    task.description = Some(match task.description.take() {
        Some(existing) if !existing.trim().is_empty() => format!("{}\n\n{}", existing, reference),
        _ => reference,
    });
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn known_references_are_substituted() {
        let map = images(&[("ab-12", "data:image/png;base64,AAA")]);
        let out = render_description("see ![chart](image:ab-12) here", &map);
        assert_eq!(out, "see ![chart](data:image/png;base64,AAA) here");
    }

    #[test]
    fn unknown_references_stay_literal() {
        let map = images(&[("known", "data:x")]);
        let text = "![a](image:known) and ![b](image:gone)";
        assert_eq!(
            render_description(text, &map),
            "![a](data:x) and ![b](image:gone)"
        );
        assert_eq!(missing_images(text, &map), vec!["gone".to_string()]);
    }

    #[test]
    fn strip_removes_references_and_trims() {
        assert_eq!(
            strip_images("Call vendor ![x](image:abc)\n"),
            "Call vendor"
        );
        assert_eq!(strip_images("![x](image:abc)"), "");
    }

    #[test]
    fn attach_appends_reference() {
        let mut task = Task::new("t".into(), "Task".into(), None, 0.0);
        task.description = Some("Intro".into());
        let id = attach_image(&mut task, "shot", "data:y".into());
        assert_eq!(task.images.get(&id).map(String::as_str), Some("data:y"));
        let description = task.description.clone().unwrap();
        assert!(description.starts_with("Intro\n\n"));
        assert!(description.ends_with(&format!("![shot](image:{})", id)));
        assert!(missing_images(&description, &task.images).is_empty());
    }
}
