use serde_json::Value;

use crate::{
    ast::{Expr, Filter, Node},
    error::TemplateError,
    lexer::Segment,
};

pub(crate) fn parse(segments: Vec<Segment>) -> Result<Vec<Node>, TemplateError> {
    let mut stack = vec![Frame::root()];

    for segment in segments {
        match segment {
            Segment::Text(text) => top(&mut stack).nodes.push(Node::Text(text)),
            Segment::Output { body, line } => {
                let expr = ExprParser::new(&body, line)?.parse_full()?;
                top(&mut stack).nodes.push(Node::Output(expr));
            }
            Segment::Tag { body, line } => handle_tag(&mut stack, &body, line)?,
        }
    }

    if stack.len() > 1 {
        let unclosed = stack.pop().map(|f| f.kind).unwrap_or(FrameKind::Root);
        let (kind, line) = match unclosed {
            FrameKind::If { line, .. } => ("if", line),
            FrameKind::For { line, .. } => ("for", line),
            FrameKind::Root => ("if", 0),
        };
        return Err(TemplateError::UnclosedBlock { kind, line });
    }

    let Some(root) = stack.pop() else {
        return Ok(Vec::new());
    };

    Ok(root.nodes)
}

struct Frame {
    kind: FrameKind,
    nodes: Vec<Node>,
}

enum FrameKind {
    Root,
    If {
        line: u32,
        arms: Vec<(Expr, Vec<Node>)>,
        /// Condition of the arm currently being collected; `None` once the
        /// `else` branch has started.
        pending: Option<Expr>,
    },
    For {
        line: u32,
        var: String,
        iterable: Expr,
    },
}

impl Frame {
    fn root() -> Self {
        Frame {
            kind: FrameKind::Root,
            nodes: Vec::new(),
        }
    }
}

fn top(stack: &mut [Frame]) -> &mut Frame {
    let last = stack.len() - 1;
    &mut stack[last]
}

fn handle_tag(stack: &mut Vec<Frame>, body: &str, line: u32) -> Result<(), TemplateError> {
    let mut parser = ExprParser::new(body, line)?;
    let tag = parser.expect_ident("tag name")?;

    match tag.as_str() {
        "if" => {
            let cond = parser.parse_full()?;
            stack.push(Frame {
                kind: FrameKind::If {
                    line,
                    arms: Vec::new(),
                    pending: Some(cond),
                },
                nodes: Vec::new(),
            });
        }
        "elif" => {
            let cond = parser.parse_full()?;
            let frame = top(stack);
            match &mut frame.kind {
                FrameKind::If { arms, pending, .. } if pending.is_some() => {
                    let finished = pending.replace(cond).unwrap_or_else(|| Expr::Literal(Value::Bool(false)));
                    arms.push((finished, std::mem::take(&mut frame.nodes)));
                }
                _ => return Err(TemplateError::UnexpectedTag { tag, line }),
            }
        }
        "else" => {
            let parser_done = parser.finished();
            let frame = top(stack);
            match &mut frame.kind {
                FrameKind::If { arms, pending, .. } if pending.is_some() && parser_done => {
                    let finished = pending.take().unwrap_or_else(|| Expr::Literal(Value::Bool(false)));
                    arms.push((finished, std::mem::take(&mut frame.nodes)));
                }
                _ => return Err(TemplateError::UnexpectedTag { tag, line }),
            }
        }
        "endif" => {
            let frame = stack.pop().unwrap_or_else(Frame::root);
            match frame.kind {
                FrameKind::If { mut arms, pending, .. } => {
                    let mut else_body = None;
                    match pending {
                        Some(cond) => arms.push((cond, frame.nodes)),
                        None => else_body = Some(frame.nodes),
                    }
                    top(stack).nodes.push(Node::If { arms, else_body });
                }
                other => {
                    stack.push(Frame {
                        kind: other,
                        nodes: frame.nodes,
                    });
                    return Err(TemplateError::UnexpectedTag { tag, line });
                }
            }
        }
        "for" => {
            let var = parser.expect_ident("loop variable")?;
            parser.expect_keyword("in")?;
            let iterable = parser.parse_full()?;
            stack.push(Frame {
                kind: FrameKind::For { line, var, iterable },
                nodes: Vec::new(),
            });
        }
        "endfor" => {
            let frame = stack.pop().unwrap_or_else(Frame::root);
            match frame.kind {
                FrameKind::For { var, iterable, .. } => {
                    top(stack).nodes.push(Node::For {
                        var,
                        iterable,
                        body: frame.nodes,
                    });
                }
                other => {
                    stack.push(Frame {
                        kind: other,
                        nodes: frame.nodes,
                    });
                    return Err(TemplateError::UnexpectedTag { tag, line });
                }
            }
        }
        _ => return Err(TemplateError::UnexpectedTag { tag, line }),
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Dot,
    Pipe,
    LParen,
    RParen,
    Comma,
    EqEq,
    NotEq,
}

struct ExprParser {
    tokens: Vec<Tok>,
    pos: usize,
    line: u32,
}

impl ExprParser {
    fn new(body: &str, line: u32) -> Result<Self, TemplateError> {
        Ok(Self {
            tokens: tokenize(body, line)?,
            pos: 0,
            line,
        })
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn finished(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, TemplateError> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name),
            other => Err(self.error(format!("expected {what}, found {other:?}"))),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), TemplateError> {
        match self.next() {
            Some(Tok::Ident(word)) if word == keyword => Ok(()),
            other => Err(self.error(format!("expected '{keyword}', found {other:?}"))),
        }
    }

    /// Parse a complete expression and require the input to be exhausted.
    fn parse_full(&mut self) -> Result<Expr, TemplateError> {
        let expr = self.parse_or()?;
        if let Some(tok) = self.peek() {
            return Err(self.error(format!("unexpected trailing {tok:?}")));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, TemplateError> {
        if self.eat_keyword("not") {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, TemplateError> {
        let left = self.parse_postfix()?;

        match self.peek() {
            Some(Tok::EqEq) => {
                self.pos += 1;
                let right = self.parse_postfix()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Tok::NotEq) => {
                self.pos += 1;
                let right = self.parse_postfix()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            Some(Tok::Ident(word)) if word == "in" => {
                self.pos += 1;
                let right = self.parse_postfix()?;
                Ok(Expr::In(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_primary()?;

        while matches!(self.peek(), Some(Tok::Pipe)) {
            self.pos += 1;
            let name = self.expect_ident("filter name")?;
            let args = self.parse_filter_args()?;
            let filter = self.resolve_filter(&name, args)?;
            expr = Expr::Filter {
                input: Box::new(expr),
                filter,
            };
        }

        Ok(expr)
    }

    fn parse_filter_args(&mut self) -> Result<Vec<Value>, TemplateError> {
        if !matches!(self.peek(), Some(Tok::LParen)) {
            return Ok(Vec::new());
        }
        self.pos += 1;

        let mut args = Vec::new();
        if matches!(self.peek(), Some(Tok::RParen)) {
            self.pos += 1;
            return Ok(args);
        }

        loop {
            args.push(self.parse_literal_arg()?);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => break,
                other => return Err(self.error(format!("expected ',' or ')' in filter arguments, found {other:?}"))),
            }
        }

        Ok(args)
    }

    fn parse_literal_arg(&mut self) -> Result<Value, TemplateError> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Value::String(s)),
            Some(Tok::Int(n)) => Ok(Value::from(n)),
            Some(Tok::Float(f)) => Ok(serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)),
            Some(Tok::Ident(word)) if word == "true" => Ok(Value::Bool(true)),
            Some(Tok::Ident(word)) if word == "false" => Ok(Value::Bool(false)),
            Some(Tok::Ident(word)) if word == "null" => Ok(Value::Null),
            other => Err(self.error(format!("filter arguments must be literals, found {other:?}"))),
        }
    }

    fn resolve_filter(&self, name: &str, args: Vec<Value>) -> Result<Filter, TemplateError> {
        let arity_error = |expected: &str| TemplateError::Parse {
            line: self.line,
            message: format!("filter '{name}' takes {expected}"),
        };

        match name {
            "default" => {
                let mut args = args;
                if args.len() != 1 {
                    return Err(arity_error("exactly one argument"));
                }
                Ok(Filter::Default(args.remove(0)))
            }
            "length" => {
                if !args.is_empty() {
                    return Err(arity_error("no arguments"));
                }
                Ok(Filter::Length)
            }
            "upper" => {
                if !args.is_empty() {
                    return Err(arity_error("no arguments"));
                }
                Ok(Filter::Upper)
            }
            "title" => {
                if !args.is_empty() {
                    return Err(arity_error("no arguments"));
                }
                Ok(Filter::Title)
            }
            "truncate" => match args.as_slice() {
                [Value::Number(n)] if n.as_u64().is_some() => {
                    Ok(Filter::Truncate(n.as_u64().unwrap_or_default() as usize))
                }
                _ => Err(arity_error("exactly one non-negative integer argument")),
            },
            _ => Err(TemplateError::UnknownFilter {
                name: name.to_string(),
                line: self.line,
            }),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        match self.next() {
            Some(Tok::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Tok::Int(n)) => Ok(Expr::Literal(Value::from(n))),
            Some(Tok::Float(f)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
            )),
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Tok::RParen) => Ok(inner),
                    other => Err(self.error(format!("expected ')', found {other:?}"))),
                }
            }
            Some(Tok::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => self.parse_path(word),
            },
            other => Err(self.error(format!("expected an expression, found {other:?}"))),
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr, TemplateError> {
        let mut segments = vec![root];

        while matches!(self.peek(), Some(Tok::Dot)) {
            self.pos += 1;
            match self.next() {
                Some(Tok::Ident(name)) => segments.push(name),
                Some(Tok::Int(index)) if index >= 0 => segments.push(index.to_string()),
                other => return Err(self.error(format!("expected a path segment after '.', found {other:?}"))),
            }
        }

        Ok(Expr::Path(segments))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(word)) if word == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn tokenize(body: &str, line: u32) -> Result<Vec<Tok>, TemplateError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;

    let parse_error = |message: String| TemplateError::Parse { line, message };

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '.' => {
                tokens.push(Tok::Dot);
                i += 1;
            }
            '|' => {
                tokens.push(Tok::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::EqEq);
                    i += 2;
                } else {
                    return Err(parse_error("single '=' is not an operator, use '=='".to_string()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::NotEq);
                    i += 2;
                } else {
                    return Err(parse_error("unexpected '!'".to_string()));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied();
                            match escaped {
                                Some('n') => value.push('\n'),
                                Some('t') => value.push('\t'),
                                Some(other) => value.push(other),
                                None => return Err(parse_error("unterminated string literal".to_string())),
                            }
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err(parse_error("unterminated string literal".to_string())),
                    }
                }
                tokens.push(Tok::Str(value));
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                let mut is_float = false;
                while let Some(&ch) = chars.get(i) {
                    if ch.is_ascii_digit() {
                        i += 1;
                    } else if ch == '.' && !is_float && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                        is_float = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    let value = text
                        .parse::<f64>()
                        .map_err(|_| parse_error(format!("invalid number '{text}'")))?;
                    tokens.push(Tok::Float(value));
                } else {
                    let value = text
                        .parse::<i64>()
                        .map_err(|_| parse_error(format!("invalid number '{text}'")))?;
                    tokens.push(Tok::Int(value));
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars.get(i).is_some_and(|ch| ch.is_alphanumeric() || *ch == '_') {
                    i += 1;
                }
                tokens.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(parse_error(format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use crate::Template;
    use crate::error::TemplateError;

    #[test]
    fn elif_without_if_is_rejected() {
        let err = Template::parse("{% elif x %}").unwrap_err();
        assert!(matches!(err, TemplateError::UnexpectedTag { .. }));
    }

    #[test]
    fn endfor_does_not_close_if() {
        let err = Template::parse("{% if x %}{% endfor %}").unwrap_err();
        assert!(matches!(err, TemplateError::UnexpectedTag { .. }));
    }

    #[test]
    fn nested_blocks_parse() {
        let source = "{% for item in items %}{% if item.flag %}{{ item.name }}{% endif %}{% endfor %}";
        assert!(Template::parse(source).is_ok());
    }

    #[test]
    fn filter_arity_is_checked() {
        let err = Template::parse("{{ x | default }}").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"parse error on line 1: filter 'default' takes exactly one argument");

        let err = Template::parse("{{ x | truncate(\"ten\") }}").unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"parse error on line 1: filter 'truncate' takes exactly one non-negative integer argument"
        );
    }

    #[test]
    fn else_with_condition_is_rejected() {
        let err = Template::parse("{% if x %}a{% else y %}b{% endif %}").unwrap_err();
        assert!(matches!(err, TemplateError::UnexpectedTag { .. }));
    }
}
