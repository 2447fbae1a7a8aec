use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    ast::{Expr, Filter, Node},
    error::TemplateError,
};

/// Evaluation result of an expression. Undefined is kept distinct from JSON
/// null so that `default(...)` and truthiness behave per contract while a
/// plain `{{ missing }}` still renders as the empty string.
#[derive(Debug, Clone, PartialEq)]
enum Eval {
    Undefined,
    Value(Value),
}

impl Eval {
    fn truthy(&self) -> bool {
        match self {
            Eval::Undefined => false,
            Eval::Value(value) => match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Value::String(s) => !s.is_empty(),
                Value::Array(items) => !items.is_empty(),
                Value::Object(map) => !map.is_empty(),
            },
        }
    }

    fn stringify(&self) -> String {
        match self {
            Eval::Undefined => String::new(),
            Eval::Value(value) => match value {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
            },
        }
    }
}

struct Scope<'a> {
    root: &'a BTreeMap<String, Value>,
    /// Loop bindings, innermost last. Shadows the root map.
    locals: Vec<(String, Value)>,
}

impl Scope<'_> {
    fn lookup(&self, path: &[String]) -> Eval {
        let Some(root_name) = path.first() else {
            return Eval::Undefined;
        };

        let root_value = self
            .locals
            .iter()
            .rev()
            .find(|(name, _)| name == root_name)
            .map(|(_, value)| value)
            .or_else(|| self.root.get(root_name));

        let Some(mut current) = root_value else {
            return Eval::Undefined;
        };

        for segment in &path[1..] {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Eval::Undefined,
            }
        }

        Eval::Value(current.clone())
    }
}

pub(crate) fn render_nodes(nodes: &[Node], vars: &BTreeMap<String, Value>) -> Result<String, TemplateError> {
    let mut scope = Scope {
        root: vars,
        locals: Vec::new(),
    };
    let mut out = String::new();
    write_nodes(nodes, &mut scope, &mut out)?;
    Ok(out)
}

fn write_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(expr) => {
                let value = eval(expr, scope)?;
                out.push_str(&value.stringify());
            }
            Node::If { arms, else_body } => {
                let mut taken = false;
                for (cond, body) in arms {
                    if eval(cond, scope)?.truthy() {
                        write_nodes(body, scope, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken && let Some(body) = else_body {
                    write_nodes(body, scope, out)?;
                }
            }
            Node::For { var, iterable, body } => {
                // Iterating anything but a list renders the body zero times.
                let items = match eval(iterable, scope)? {
                    Eval::Value(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                for item in items {
                    scope.locals.push((var.clone(), item));
                    let result = write_nodes(body, scope, out);
                    scope.locals.pop();
                    result?;
                }
            }
        }
    }
    Ok(())
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Eval, TemplateError> {
    match expr {
        Expr::Literal(value) => Ok(Eval::Value(value.clone())),
        Expr::Path(path) => Ok(scope.lookup(path)),
        Expr::Not(inner) => Ok(Eval::Value(Value::Bool(!eval(inner, scope)?.truthy()))),
        Expr::And(left, right) => {
            let result = eval(left, scope)?.truthy() && eval(right, scope)?.truthy();
            Ok(Eval::Value(Value::Bool(result)))
        }
        Expr::Or(left, right) => {
            let result = eval(left, scope)?.truthy() || eval(right, scope)?.truthy();
            Ok(Eval::Value(Value::Bool(result)))
        }
        Expr::Eq(left, right) => {
            let result = values_equal(&eval(left, scope)?, &eval(right, scope)?);
            Ok(Eval::Value(Value::Bool(result)))
        }
        Expr::Ne(left, right) => {
            let result = !values_equal(&eval(left, scope)?, &eval(right, scope)?);
            Ok(Eval::Value(Value::Bool(result)))
        }
        Expr::In(needle, haystack) => {
            let result = contains(&eval(needle, scope)?, &eval(haystack, scope)?);
            Ok(Eval::Value(Value::Bool(result)))
        }
        Expr::Filter { input, filter } => apply_filter(eval(input, scope)?, filter),
    }
}

fn values_equal(left: &Eval, right: &Eval) -> bool {
    let normalize = |eval: &Eval| match eval {
        Eval::Undefined => Value::Null,
        Eval::Value(value) => value.clone(),
    };

    let (left, right) = (normalize(left), normalize(right));

    // Integer and float literals that denote the same quantity compare equal.
    if let (Value::Number(a), Value::Number(b)) = (&left, &right) {
        return a.as_f64() == b.as_f64();
    }

    left == right
}

fn contains(needle: &Eval, haystack: &Eval) -> bool {
    match haystack {
        Eval::Undefined => false,
        Eval::Value(Value::String(s)) => s.contains(&needle.stringify()),
        Eval::Value(Value::Array(items)) => items
            .iter()
            .any(|item| values_equal(needle, &Eval::Value(item.clone()))),
        Eval::Value(Value::Object(map)) => map.contains_key(&needle.stringify()),
        _ => false,
    }
}

fn apply_filter(input: Eval, filter: &Filter) -> Result<Eval, TemplateError> {
    match filter {
        Filter::Default(fallback) => match input {
            Eval::Undefined | Eval::Value(Value::Null) => Ok(Eval::Value(fallback.clone())),
            defined => Ok(defined),
        },
        Filter::Length => {
            let length = match &input {
                Eval::Undefined | Eval::Value(Value::Null) => 0,
                Eval::Value(Value::String(s)) => s.chars().count(),
                Eval::Value(Value::Array(items)) => items.len(),
                Eval::Value(Value::Object(map)) => map.len(),
                Eval::Value(other) => {
                    return Err(TemplateError::Filter {
                        filter: filter.name(),
                        message: format!("value {other} has no length"),
                    });
                }
            };
            Ok(Eval::Value(Value::from(length)))
        }
        Filter::Upper => Ok(Eval::Value(Value::String(input.stringify().to_uppercase()))),
        Filter::Title => Ok(Eval::Value(Value::String(title_case(&input.stringify())))),
        Filter::Truncate(limit) => {
            let text = input.stringify();
            let truncated: String = text.chars().take(*limit).collect();
            Ok(Eval::Value(Value::String(truncated)))
        }
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;

    for ch in text.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::render;

    fn vars(value: serde_json::Value) -> std::collections::BTreeMap<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => unreachable!("test vars must be an object"),
        }
    }

    #[test]
    fn default_filter_covers_undefined_and_null() {
        let source = "{{ name | default(\"anonymous\") }}";

        assert_eq!(render(source, &vars(json!({}))).unwrap(), "anonymous");
        assert_eq!(render(source, &vars(json!({"name": null}))).unwrap(), "anonymous");
        assert_eq!(render(source, &vars(json!({"name": "Ada"}))).unwrap(), "Ada");
    }

    #[test]
    fn filters_chain_left_to_right() {
        let source = "{{ name | default(\"ada lovelace\") | title }}";
        assert_eq!(render(source, &vars(json!({}))).unwrap(), "Ada Lovelace");
    }

    #[test]
    fn length_filter() {
        assert_eq!(render("{{ items | length }}", &vars(json!({"items": [1, 2, 3]}))).unwrap(), "3");
        assert_eq!(render("{{ word | length }}", &vars(json!({"word": "héllo"}))).unwrap(), "5");
        assert_eq!(render("{{ missing | length }}", &vars(json!({}))).unwrap(), "0");
    }

    #[test]
    fn length_of_a_number_is_an_error() {
        let err = render("{{ n | length }}", &vars(json!({"n": 5}))).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"filter 'length' cannot be applied: value 5 has no length");
    }

    #[test]
    fn truncate_cuts_characters() {
        let source = "{{ text | truncate(4) }}";
        assert_eq!(render(source, &vars(json!({"text": "abcdef"}))).unwrap(), "abcd");
        assert_eq!(render(source, &vars(json!({"text": "ab"}))).unwrap(), "ab");
    }

    #[test]
    fn loop_variable_shadows_root() {
        let source = "{% for x in xs %}{{ x }}{% endfor %}{{ x }}";
        let out = render(source, &vars(json!({"xs": [1, 2], "x": "root"}))).unwrap();
        assert_eq!(out, "12root");
    }

    #[test]
    fn for_over_non_list_renders_nothing() {
        let source = "a{% for x in nope %}{{ x }}{% endfor %}b";
        assert_eq!(render(source, &vars(json!({"nope": "string"}))).unwrap(), "ab");
        assert_eq!(render(source, &vars(json!({}))).unwrap(), "ab");
    }

    #[test]
    fn numbers_compare_across_int_and_float() {
        let source = "{% if n == 1.0 %}eq{% endif %}";
        assert_eq!(render(source, &vars(json!({"n": 1}))).unwrap(), "eq");
    }

    #[test]
    fn objects_render_as_compact_json() {
        let source = "{{ payload }}";
        let out = render(source, &vars(json!({"payload": {"a": 1}}))).unwrap();
        assert_eq!(out, r#"{"a":1}"#);
    }

    #[test]
    fn boolean_operators() {
        let source = "{% if a and not b or c %}t{% else %}f{% endif %}";
        assert_eq!(render(source, &vars(json!({"a": true, "b": false, "c": false}))).unwrap(), "t");
        assert_eq!(render(source, &vars(json!({"a": false, "b": true, "c": false}))).unwrap(), "f");
    }

    #[test]
    fn array_index_access() {
        let source = "{{ items.1.name }}";
        let out = render(source, &vars(json!({"items": [{"name": "a"}, {"name": "b"}]}))).unwrap();
        assert_eq!(out, "b");
    }
}
