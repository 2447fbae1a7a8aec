//! Deterministic prompt templating.
//!
//! Templates are plain text with three constructs:
//!
//! - `{{ path }}` substitution with dotted access (`user.name`), optionally
//!   piped through filters: `{{ name | default("anonymous") | upper }}`
//! - `{% if expr %} … {% elif expr %} … {% else %} … {% endif %}`
//! - `{% for item in list %} … {% endfor %}`
//!
//! Expressions support equality (`==`, `!=`), boolean `and`/`or`/`not`, and
//! membership (`in`). Undefined paths render as the empty string unless a
//! `default(...)` filter is applied. Rendering is pure: the same template and
//! variables always produce the same output, and no construct has side
//! effects.
//!
//! A parsed [`Template`] can also report the root-level variables it
//! references via [`Template::referenced_inputs`], which callers use to
//! validate inputs before rendering and to fingerprint the variable set.

use std::collections::BTreeMap;

use serde_json::Value;

mod ast;
mod error;
mod inputs;
mod lexer;
mod parser;
mod render;

pub use error::TemplateError;
pub use inputs::InputUsage;

/// A parsed template, ready for rendering.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<ast::Node>,
}

impl Template {
    /// Parse a template source string.
    ///
    /// Unterminated `{{`/`{%` markers, unbalanced blocks and unknown filters
    /// are rejected here rather than at render time.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let segments = lexer::lex(source)?;
        let nodes = parser::parse(segments)?;

        Ok(Self { nodes })
    }

    /// Render the template against a set of variables.
    pub fn render(&self, vars: &BTreeMap<String, Value>) -> Result<String, TemplateError> {
        render::render_nodes(&self.nodes, vars)
    }

    /// Root-level variable names referenced anywhere in the template.
    ///
    /// Loop-bound names are scoped out. A variable is `required` when it is
    /// used in output position or as a `for` iterable without a `default(...)`
    /// filter; names only tested in conditions stay optional because an
    /// undefined path is simply falsy there.
    pub fn referenced_inputs(&self) -> BTreeMap<String, InputUsage> {
        inputs::collect(&self.nodes)
    }
}

/// Parse and render in one step.
pub fn render(source: &str, vars: &BTreeMap<String, Value>) -> Result<String, TemplateError> {
    Template::parse(source)?.render(vars)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vars(value: Value) -> BTreeMap<String, Value> {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => unreachable!("test vars must be an object"),
        }
    }

    #[test]
    fn renders_plain_text_untouched() {
        let out = render("Translate to French.", &BTreeMap::new()).unwrap();
        assert_eq!(out, "Translate to French.");
    }

    #[test]
    fn substitutes_dotted_paths() {
        let out = render(
            "Hello {{ user.name }}, you have {{ count }} messages.",
            &vars(json!({"user": {"name": "Ada"}, "count": 3})),
        )
        .unwrap();

        assert_eq!(out, "Hello Ada, you have 3 messages.");
    }

    #[test]
    fn undefined_path_renders_empty() {
        let out = render("[{{ missing.deeply }}]", &BTreeMap::new()).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn rendering_is_deterministic() {
        let source = "{% for t in tags %}{{ t | upper }} {% endfor %}";
        let v = vars(json!({"tags": ["a", "b"]}));

        let first = render(source, &v).unwrap();
        let second = render(source, &v).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, "A B ");
    }

    #[test]
    fn conditionals_with_elif_and_else() {
        let source = "{% if lang == \"fr\" %}Bonjour{% elif lang == \"de\" %}Hallo{% else %}Hello{% endif %}";

        assert_eq!(render(source, &vars(json!({"lang": "fr"}))).unwrap(), "Bonjour");
        assert_eq!(render(source, &vars(json!({"lang": "de"}))).unwrap(), "Hallo");
        assert_eq!(render(source, &vars(json!({"lang": "en"}))).unwrap(), "Hello");
        assert_eq!(render(source, &BTreeMap::new()).unwrap(), "Hello");
    }

    #[test]
    fn membership_over_lists_and_strings() {
        let source = "{% if \"admin\" in roles %}yes{% else %}no{% endif %}";

        assert_eq!(render(source, &vars(json!({"roles": ["admin", "user"]}))).unwrap(), "yes");
        assert_eq!(render(source, &vars(json!({"roles": ["user"]}))).unwrap(), "no");

        let substring = "{% if \"bc\" in word %}hit{% endif %}";
        assert_eq!(render(substring, &vars(json!({"word": "abcd"}))).unwrap(), "hit");
    }

    #[test]
    fn unterminated_block_is_an_error() {
        let err = Template::parse("{% if x %}never closed").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"unclosed 'if' block opened on line 1");
    }

    #[test]
    fn unknown_filter_is_an_error() {
        let err = Template::parse("{{ x | reverse }}").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"unknown filter 'reverse' on line 1");
    }
}
