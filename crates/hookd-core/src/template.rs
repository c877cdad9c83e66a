//! `${VAR}` placeholder expansion for handler path templates.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::Environment;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
});

/// Expand every `${VAR}` in `template` from `env`.
///
/// Expansion is all or nothing: if any placeholder has no value the template
/// is returned unchanged.
#[must_use]
pub fn substitute(template: &str, env: &Environment) -> String {
    try_substitute(template, env).unwrap_or_else(|| template.to_string())
}

/// Expand every `${VAR}` in `template`, or `None` if one is unresolvable.
#[must_use]
pub fn try_substitute(template: &str, env: &Environment) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0)?;
        let value = env.get(&caps[1])?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }

    out.push_str(&template[last..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        [("STUDIO_ROOT", "/mnt/studio"), ("SITE", "oslo")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_substitute_single() {
        assert_eq!(
            substitute("${STUDIO_ROOT}/handlers", &env()),
            "/mnt/studio/handlers"
        );
    }

    #[test]
    fn test_substitute_multiple() {
        assert_eq!(
            substitute("${STUDIO_ROOT}/${SITE}/events", &env()),
            "/mnt/studio/oslo/events"
        );
    }

    #[test]
    fn test_substitute_no_placeholders() {
        assert_eq!(substitute("/opt/handlers", &env()), "/opt/handlers");
    }

    #[test]
    fn test_unresolvable_falls_back_to_template() {
        let template = "${STUDIO_ROOT}/${MISSING}/handlers";
        assert_eq!(substitute(template, &env()), template);
        assert!(try_substitute(template, &env()).is_none());
    }

    #[test]
    fn test_malformed_placeholders_are_literal() {
        assert_eq!(substitute("$STUDIO_ROOT/x", &env()), "$STUDIO_ROOT/x");
        assert_eq!(substitute("${}/x", &env()), "${}/x");
        assert_eq!(substitute("${STUDIO_ROOT/x", &env()), "${STUDIO_ROOT/x");
    }

    #[test]
    fn test_empty_value_substitutes() {
        let env: Environment = [("EMPTY", "")].into_iter().collect();
        assert_eq!(substitute("/a${EMPTY}/b", &env), "/a/b");
    }
}
