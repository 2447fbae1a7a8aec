use std::collections::BTreeMap;

use crate::ast::{Expr, Filter, Node};

/// How a root-level variable is used across the whole template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputUsage {
    /// True when at least one use must resolve for rendering to make sense:
    /// output position or a `for` iterable, with no `default(...)` guard.
    /// Condition-only variables stay optional since an undefined path is
    /// simply falsy.
    pub required: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Position {
    /// Output text or a `for` iterable.
    Materialized,
    /// Inside an `if`/`elif` condition.
    Condition,
}

pub(crate) fn collect(nodes: &[Node]) -> BTreeMap<String, InputUsage> {
    let mut usages = BTreeMap::new();
    let mut bound = Vec::new();
    walk_nodes(nodes, &mut bound, &mut usages);
    usages
}

fn walk_nodes(nodes: &[Node], bound: &mut Vec<String>, usages: &mut BTreeMap<String, InputUsage>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Output(expr) => walk_expr(expr, Position::Materialized, false, bound, usages),
            Node::If { arms, else_body } => {
                for (cond, body) in arms {
                    walk_expr(cond, Position::Condition, false, bound, usages);
                    walk_nodes(body, bound, usages);
                }
                if let Some(body) = else_body {
                    walk_nodes(body, bound, usages);
                }
            }
            Node::For { var, iterable, body } => {
                walk_expr(iterable, Position::Materialized, false, bound, usages);
                bound.push(var.clone());
                walk_nodes(body, bound, usages);
                bound.pop();
            }
        }
    }
}

fn walk_expr(
    expr: &Expr,
    position: Position,
    defaulted: bool,
    bound: &mut Vec<String>,
    usages: &mut BTreeMap<String, InputUsage>,
) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Path(path) => {
            let Some(root) = path.first() else {
                return;
            };
            if bound.iter().any(|name| name == root) {
                return;
            }

            let required = position == Position::Materialized && !defaulted;
            let usage = usages.entry(root.clone()).or_insert(InputUsage { required: false });
            usage.required |= required;
        }
        Expr::Not(inner) => walk_expr(inner, position, defaulted, bound, usages),
        Expr::And(left, right) | Expr::Or(left, right) => {
            walk_expr(left, position, defaulted, bound, usages);
            walk_expr(right, position, defaulted, bound, usages);
        }
        Expr::Eq(left, right) | Expr::Ne(left, right) | Expr::In(left, right) => {
            walk_expr(left, position, defaulted, bound, usages);
            walk_expr(right, position, defaulted, bound, usages);
        }
        Expr::Filter { input, filter } => {
            let guards = matches!(filter, Filter::Default(_));
            walk_expr(input, position, defaulted || guards, bound, usages);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Template;

    fn required(source: &str) -> Vec<String> {
        Template::parse(source)
            .unwrap()
            .referenced_inputs()
            .into_iter()
            .filter(|(_, usage)| usage.required)
            .map(|(name, _)| name)
            .collect()
    }

    fn referenced(source: &str) -> Vec<String> {
        Template::parse(source)
            .unwrap()
            .referenced_inputs()
            .into_keys()
            .collect()
    }

    #[test]
    fn collects_root_names_only() {
        let names = referenced("{{ user.name }} {{ user.email }} {{ count }}");
        assert_eq!(names, ["count", "user"]);
    }

    #[test]
    fn loop_variables_are_scoped_out() {
        let names = referenced("{% for item in items %}{{ item.title }}{% endfor %}");
        assert_eq!(names, ["items"]);
    }

    #[test]
    fn defaulted_variables_are_not_required() {
        assert_eq!(required("{{ tone | default(\"neutral\") }}"), Vec::<String>::new());
        assert_eq!(referenced("{{ tone | default(\"neutral\") }}"), ["tone"]);
    }

    #[test]
    fn condition_only_variables_are_optional() {
        let source = "{% if verbose %}detail{% endif %}{{ text }}";
        assert_eq!(required(source), ["text"]);
        assert_eq!(referenced(source), ["text", "verbose"]);
    }

    #[test]
    fn mixed_use_is_required() {
        // One guarded use does not excuse an unguarded one.
        let source = "{{ name | default(\"x\") }} and {{ name }}";
        assert_eq!(required(source), ["name"]);
    }

    #[test]
    fn shadowing_inside_loop_does_not_leak() {
        let source = "{% for user in users %}{{ user }}{% endfor %}{{ user }}";
        assert_eq!(required(source), ["user", "users"]);
    }
}
