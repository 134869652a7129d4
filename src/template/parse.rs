//! Template compiler

use super::{FieldPath, Part, PathSegment, Root};
use crate::error::TemplateError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

pub(super) fn parse_parts(source: &str) -> Result<Vec<Part>, TemplateError> {
    let mut parts = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            parts.push(Part::Literal(rest[..start].to_string()));
        }
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or_else(|| TemplateError::unterminated(source))?;
        let action = after_open[..end].trim();
        parts.push(Part::Field(parse_action(source, action)?));
        rest = &after_open[end + CLOSE.len()..];
    }

    if !rest.is_empty() {
        parts.push(Part::Literal(rest.to_string()));
    }
    Ok(parts)
}

fn parse_action(source: &str, action: &str) -> Result<FieldPath, TemplateError> {
    if let Some(args) = action.strip_prefix("index") {
        if args.is_empty() || args.starts_with(char::is_whitespace) {
            return parse_index(source, action, args);
        }
    }
    parse_field_ref(source, action)
}

/// `.Root` or `.Value.a.b`
fn parse_field_ref(source: &str, text: &str) -> Result<FieldPath, TemplateError> {
    let unsupported = || TemplateError::unsupported_action(source, text);

    let body = text.strip_prefix('.').ok_or_else(unsupported)?;
    let mut segments = body.split('.');
    let root = segments
        .next()
        .and_then(Root::from_name)
        .ok_or_else(unsupported)?;

    let mut path = Vec::new();
    for segment in segments {
        if root != Root::Value || segment.is_empty() {
            return Err(unsupported());
        }
        path.push(PathSegment::Key(segment.to_string()));
    }
    Ok(FieldPath { root, path })
}

/// `index <field-ref> <arg>...` where each arg is a quoted key or an integer
fn parse_index(source: &str, action: &str, args: &str) -> Result<FieldPath, TemplateError> {
    let tokens = tokenize(action, args)?;
    let mut tokens = tokens.into_iter();

    let target = match tokens.next() {
        Some(Token::Bare(text)) => parse_field_ref(source, &text)?,
        Some(_) => {
            return Err(TemplateError::malformed_index(
                action,
                "first argument must be a field reference",
            ))
        }
        None => return Err(TemplateError::malformed_index(action, "missing arguments")),
    };
    if target.root != Root::Value {
        return Err(TemplateError::malformed_index(action, "only .Value can be indexed"));
    }

    let mut path = target.path;
    let mut keys = 0;
    for token in tokens {
        keys += 1;
        match token {
            Token::Quoted(key) => path.push(PathSegment::Key(key)),
            Token::Bare(text) => {
                let idx = text.parse::<usize>().map_err(|_| {
                    TemplateError::malformed_index(
                        action,
                        format!("{:?} is neither a quoted key nor an index", text),
                    )
                })?;
                path.push(PathSegment::Index(idx));
            }
        }
    }
    if keys == 0 {
        return Err(TemplateError::malformed_index(action, "missing index arguments"));
    }

    Ok(FieldPath {
        root: Root::Value,
        path,
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Bare(String),
    Quoted(String),
}

fn tokenize(action: &str, args: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = args.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => break,
                        },
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err(TemplateError::malformed_index(action, "unterminated string"));
                }
                tokens.push(Token::Quoted(text));
            }
            '`' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '`' {
                        closed = true;
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(TemplateError::malformed_index(action, "unterminated string"));
                }
                tokens.push(Token::Quoted(text));
            }
            _ => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    text.push(c);
                    chars.next();
                }
                tokens.push(Token::Bare(text));
            }
        }
    }
    Ok(tokens)
}
