use crate::error::TemplateError;

/// A raw slice of the template source: literal text, a `{{ … }}` output
/// expression, or a `{% … %}` tag. Expression and tag bodies are handed to
/// the parser untokenized, together with the line they started on.
#[derive(Debug)]
pub(crate) enum Segment {
    Text(String),
    Output { body: String, line: u32 },
    Tag { body: String, line: u32 },
}

pub(crate) fn lex(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut line = 1u32;

    let bytes = source.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let rest = &source[i..];

        let (closer, is_output) = if rest.starts_with("{{") {
            ("}}", true)
        } else if rest.starts_with("{%") {
            ("%}", false)
        } else {
            let ch = rest.chars().next().unwrap_or('\0');
            if ch == '\n' {
                line += 1;
            }
            text.push(ch);
            i += ch.len_utf8();
            continue;
        };

        if !text.is_empty() {
            segments.push(Segment::Text(std::mem::take(&mut text)));
        }

        let opened_on = line;
        let inner_start = i + 2;

        let Some(end) = source[inner_start..].find(closer) else {
            return Err(if is_output {
                TemplateError::UnterminatedExpression { line: opened_on }
            } else {
                TemplateError::UnterminatedTag { line: opened_on }
            });
        };

        let body = source[inner_start..inner_start + end].to_string();
        line += body.matches('\n').count() as u32;

        segments.push(if is_output {
            Segment::Output { body, line: opened_on }
        } else {
            Segment::Tag { body, line: opened_on }
        });

        i = inner_start + end + 2;
    }

    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_text_and_markers() {
        let segments = lex("a {{ x }} b {% if y %}c{% endif %}").unwrap();

        let kinds: Vec<&str> = segments
            .iter()
            .map(|s| match s {
                Segment::Text(_) => "text",
                Segment::Output { .. } => "output",
                Segment::Tag { .. } => "tag",
            })
            .collect();

        assert_eq!(kinds, ["text", "output", "text", "tag", "text", "tag"]);
    }

    #[test]
    fn tracks_lines_for_markers() {
        let segments = lex("line one\nline two {{ x }}").unwrap();

        let Some(Segment::Output { line, .. }) = segments.last() else {
            unreachable!("expected output segment");
        };
        assert_eq!(*line, 2);
    }

    #[test]
    fn unterminated_output_errors_with_line() {
        let err = lex("text\n{{ broken").unwrap_err();
        assert_eq!(err, TemplateError::UnterminatedExpression { line: 2 });
    }

    #[test]
    fn unterminated_tag_errors_with_line() {
        let err = lex("{% if x").unwrap_err();
        assert_eq!(err, TemplateError::UnterminatedTag { line: 1 });
    }
}
