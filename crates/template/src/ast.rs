use serde_json::Value;

/// One node of a parsed template body.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Text(String),
    Output(Expr),
    If {
        /// Condition/body pairs for `if` and every `elif`, in order.
        arms: Vec<(Expr, Vec<Node>)>,
        else_body: Option<Vec<Node>>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    /// Dotted variable access, e.g. `user.name` or `items.0`.
    Path(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    /// `needle in haystack` membership.
    In(Box<Expr>, Box<Expr>),
    Filter {
        input: Box<Expr>,
        filter: Filter,
    },
}

/// The supported filter set. Arguments are literal-only and validated at
/// parse time, so rendering never sees a malformed filter call.
#[derive(Debug, Clone)]
pub(crate) enum Filter {
    Default(Value),
    Length,
    Upper,
    Title,
    Truncate(usize),
}

impl Filter {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Filter::Default(_) => "default",
            Filter::Length => "length",
            Filter::Upper => "upper",
            Filter::Title => "title",
            Filter::Truncate(_) => "truncate",
        }
    }
}
