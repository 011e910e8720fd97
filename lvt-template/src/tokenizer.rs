//! Splits template source into text runs and `{{ ... }}` directives.
//!
//! Whitespace inside the delimiters is normalized so `{{ foo }}` and
//! `{{foo}}` parse identically.

use crate::error::TemplateParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    /// The directive's inner content, whitespace-trimmed and collapsed.
    Directive { body: String, offset: usize },
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, TemplateParseError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        match source[pos..].find("{{") {
            None => {
                tokens.push(Token::Text(source[pos..].to_string()));
                break;
            }
            Some(rel_start) => {
                let start = pos + rel_start;
                if start > pos {
                    tokens.push(Token::Text(source[pos..start].to_string()));
                }
                let body_start = start + 2;
                match source[body_start..].find("}}") {
                    None => {
                        return Err(TemplateParseError::UnterminatedDirective { offset: start });
                    }
                    Some(rel_end) => {
                        let body_end = body_start + rel_end;
                        let normalized = normalize_directive(&source[body_start..body_end]);
                        tokens.push(Token::Directive {
                            body: normalized,
                            offset: start,
                        });
                        pos = body_end + 2;
                    }
                }
            }
        }
    }

    Ok(tokens)
}

/// Collapse any run of whitespace to a single space and trim the ends, so
/// `{{  if .OK  }}` and `{{if .OK}}` tokenize identically.
fn normalize_directive(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_text_and_directives() {
        let toks = tokenize("Hello {{.Name}}!").unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Text("Hello ".to_string()),
                Token::Directive { body: ".Name".to_string(), offset: 6 },
                Token::Text("!".to_string()),
            ]
        );
    }

    #[test]
    fn normalizes_whitespace_inside_directive() {
        let a = tokenize("{{ .Name }}").unwrap();
        let b = tokenize("{{.Name}}").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unterminated_directive_is_an_error() {
        let err = tokenize("Hello {{.Name").unwrap_err();
        assert!(matches!(err, TemplateParseError::UnterminatedDirective { .. }));
    }
}
