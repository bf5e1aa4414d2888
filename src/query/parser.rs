//! Filter tokenizer and recursive-descent parser.
//!
//! ```text
//! query     := expr sort?
//! expr      := and_expr ( OR and_expr )*
//! and_expr  := unary ( AND? unary )*
//! unary     := NOT unary | "(" expr ")" | predicate
//! predicate := FIELD ("=" | ":") VALUE | FIELD "~" VALUE
//!            | FIELD contains VALUE | VALUE
//! sort      := sort: ["-"] FIELD
//! ```
//!
//! Keywords and field names are case-insensitive. The sort key may appear
//! anywhere in the input.

use super::{Expr, MatchOp, Predicate, Query, QueryField, SortKey};
use crate::error::{Error, Result};
use crate::model::{CaseId, CaseStatus};
use crate::validate::find_similar;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    Op(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    /// 1-based character position of the token's first character.
    pos: usize,
}

impl Token {
    fn text(&self) -> String {
        match &self.tok {
            Tok::Word(w) => w.clone(),
            Tok::Quoted(q) => format!("\"{q}\""),
            Tok::LParen => "(".to_string(),
            Tok::RParen => ")".to_string(),
            Tok::Op(c) => c.to_string(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.tok, Tok::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn syntax(token: impl Into<String>, position: usize, message: impl Into<String>) -> Error {
    Error::QuerySyntax {
        token: token.into(),
        position,
        message: message.into(),
    }
}

fn is_operator(c: char) -> bool {
    matches!(c, '=' | ':' | '~')
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().enumerate().peekable();

    while let Some(&(i, c)) = chars.peek() {
        let pos = i + 1;
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let tok = match c {
            '(' => {
                chars.next();
                Tok::LParen
            }
            ')' => {
                chars.next();
                Tok::RParen
            }
            c if is_operator(c) => {
                chars.next();
                Tok::Op(c)
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(syntax(format!("\"{value}"), pos, "unterminated quote"));
                }
                Tok::Quoted(value)
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '"') || is_operator(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                Tok::Word(word)
            }
        };
        tokens.push(Token { tok, pos });
    }

    Ok(tokens)
}

fn lookup_field(name: &str, token: &Token) -> Result<QueryField> {
    QueryField::lookup(name).ok_or_else(|| {
        let names = QueryField::ALL.iter().map(QueryField::as_str);
        let message = match find_similar(&name.to_lowercase(), names, 1).first() {
            Some(similar) => format!("unknown field '{name}', did you mean '{similar}'?"),
            None => format!("unknown field '{name}'"),
        };
        syntax(token.text(), token.pos, message)
    })
}

/// Remove every `sort:[-]field` triple from the token stream.
fn take_sort(tokens: &mut Vec<Token>, end: usize) -> Result<Option<SortKey>> {
    let mut sort = None;
    let mut i = 0;

    while i < tokens.len() {
        let starts_sort = tokens[i].is_keyword("sort")
            && matches!(tokens.get(i + 1).map(|t| &t.tok), Some(Tok::Op(':' | '=')));
        if !starts_sort {
            i += 1;
            continue;
        }

        let Some(key_token) = tokens.get(i + 2) else {
            return Err(syntax("<end>", end, "expected a sort field"));
        };
        let Tok::Word(raw) = &key_token.tok else {
            return Err(syntax(key_token.text(), key_token.pos, "expected a sort field"));
        };
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.as_str()),
        };
        let field = lookup_field(name, key_token)?;

        if sort.is_some() {
            return Err(syntax(tokens[i].text(), tokens[i].pos, "duplicate sort key"));
        }
        sort = Some(SortKey { field, descending });
        tokens.drain(i..i + 3);
    }

    Ok(sort)
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.index + offset)
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        match self.peek() {
            Some(t) => syntax(t.text(), t.pos, message),
            None => syntax("<end>", self.end, message),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek().is_some_and(|t| t.is_keyword(keyword));
        if found {
            self.index += 1;
        }
        found
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        let found = self.peek().is_some_and(|t| &t.tok == tok);
        if found {
            self.index += 1;
        }
        found
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut operands = vec![self.parse_and()?];
        while self.eat_keyword("or") {
            operands.push(self.parse_and()?);
        }
        Ok(Expr::or(operands))
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut operands = vec![self.parse_unary()?];
        loop {
            let Some(token) = self.peek() else { break };
            if token.is_keyword("or") || token.tok == Tok::RParen {
                break;
            }
            self.eat_keyword("and");
            operands.push(self.parse_unary()?);
        }
        Ok(Expr::and(operands))
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_here("expected a filter term"));
        };

        match &token.tok {
            Tok::Word(_) if token.is_keyword("not") => {
                self.index += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Tok::Word(_) if token.is_keyword("and") || token.is_keyword("or") => {
                Err(syntax(token.text(), token.pos, "expected a filter term"))
            }
            Tok::LParen => {
                self.index += 1;
                let inner = self.parse_or()?;
                if self.eat(&Tok::RParen) {
                    Ok(inner)
                } else {
                    Err(self.error_here("expected ')'"))
                }
            }
            Tok::RParen | Tok::Op(_) => Err(syntax(
                token.text(),
                token.pos,
                format!("unexpected '{}'", token.text()),
            )),
            Tok::Quoted(text) => {
                self.index += 1;
                Ok(Expr::Text(text.clone()))
            }
            Tok::Word(word) => self.parse_word(&token, word),
        }
    }

    fn parse_word(&mut self, token: &Token, word: &str) -> Result<Expr> {
        let op = match self.peek_at(1).map(|t| &t.tok) {
            Some(Tok::Op('~')) => Some(MatchOp::Contains),
            Some(Tok::Op(_)) => Some(MatchOp::Equals),
            Some(Tok::Word(w))
                if w.eq_ignore_ascii_case("contains") && QueryField::lookup(word).is_some() =>
            {
                Some(MatchOp::Contains)
            }
            _ => None,
        };

        let Some(op) = op else {
            self.index += 1;
            return Ok(Expr::Text(word.to_string()));
        };

        let field = lookup_field(word, token)?;
        let op_token = self.peek_at(1).cloned();
        self.index += 2;
        self.parse_value(field, op, op_token.as_ref())
    }

    fn parse_value(&mut self, field: QueryField, op: MatchOp, op_token: Option<&Token>) -> Result<Expr> {
        let value_token = match self.peek().cloned() {
            Some(t @ Token { tok: Tok::Word(_) | Tok::Quoted(_), .. }) => t,
            _ => {
                let after = op_token.map_or_else(|| op.symbol().to_string(), Token::text);
                return Err(self.error_here(format!("expected a value after '{after}'")));
            }
        };
        self.index += 1;

        let raw = match &value_token.tok {
            Tok::Word(v) | Tok::Quoted(v) => v.clone(),
            _ => String::new(),
        };

        let value = match (field, op) {
            (QueryField::Id | QueryField::Parent, MatchOp::Contains) => {
                return Err(syntax(
                    value_token.text(),
                    value_token.pos,
                    format!("{field} only supports '='"),
                ));
            }
            (QueryField::Id | QueryField::Parent, MatchOp::Equals) => raw
                .parse::<CaseId>()
                .map(|id| id.to_string())
                .map_err(|_| syntax(value_token.text(), value_token.pos, "expected a case number"))?,
            (QueryField::Status, MatchOp::Equals) => match CaseStatus::parse(&raw) {
                Ok(status) => status.as_str().to_string(),
                Err(Error::InvalidValue {
                    suggestion: Some(s), ..
                }) => {
                    return Err(syntax(
                        value_token.text(),
                        value_token.pos,
                        format!("unknown status, did you mean '{s}'?"),
                    ));
                }
                Err(_) => {
                    return Err(syntax(
                        value_token.text(),
                        value_token.pos,
                        "unknown status (open, resolved, closed)",
                    ));
                }
            },
            _ => raw,
        };

        Ok(Expr::Match(Predicate { field, op, value }))
    }
}

/// Parse a filter string into a [`Query`].
///
/// Errors are `Error::QuerySyntax` carrying the offending token and its
/// 1-based character position (`<end>` when input ran out).
pub fn parse(input: &str) -> Result<Query> {
    let end = input.chars().count() + 1;
    let mut tokens = tokenize(input)?;
    let sort = take_sort(&mut tokens, end)?;

    if tokens.is_empty() {
        return Err(syntax("<end>", end, "empty filter"));
    }

    let mut parser = Parser {
        tokens,
        index: 0,
        end,
    };
    let filter = parser.parse_or()?;
    if let Some(t) = parser.peek() {
        return Err(syntax(t.text(), t.pos, format!("unexpected '{}'", t.text())));
    }

    Ok(Query { filter, sort })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pred(field: QueryField, op: MatchOp, value: &str) -> Expr {
        Expr::Match(Predicate {
            field,
            op,
            value: value.to_string(),
        })
    }

    fn syntax_error(input: &str) -> (String, usize, String) {
        match parse(input) {
            Err(Error::QuerySyntax {
                token,
                position,
                message,
            }) => (token, position, message),
            other => panic!("expected syntax error for {input:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_equality_forms() {
        let expected = pred(QueryField::Assignee, MatchOp::Equals, "alice");
        assert_eq!(parse("assignee=alice").unwrap().filter, expected);
        assert_eq!(parse("assignee:alice").unwrap().filter, expected);
        assert_eq!(parse("AssignedTo = alice").unwrap().filter, expected);
    }

    #[test]
    fn test_contains_forms() {
        let expected = pred(QueryField::Title, MatchOp::Contains, "crash on save");
        assert_eq!(parse("title~\"crash on save\"").unwrap().filter, expected);
        assert_eq!(parse("title CONTAINS \"crash on save\"").unwrap().filter, expected);
    }

    #[test]
    fn test_juxtaposition_is_and() {
        let q = parse("status=open project=Web").unwrap();
        assert_eq!(
            q.filter,
            Expr::And(vec![
                pred(QueryField::Status, MatchOp::Equals, "open"),
                pred(QueryField::Project, MatchOp::Equals, "Web"),
            ])
        );
        assert_eq!(q, parse("status=open and project=Web").unwrap());
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let q = parse("a b OR c").unwrap();
        assert_eq!(
            q.filter,
            Expr::Or(vec![
                Expr::And(vec![Expr::Text("a".into()), Expr::Text("b".into())]),
                Expr::Text("c".into()),
            ])
        );
    }

    #[test]
    fn test_parentheses_and_not() {
        let q = parse("not (status=closed or status=resolved) tag=ui").unwrap();
        assert_eq!(
            q.filter,
            Expr::And(vec![
                Expr::Not(Box::new(Expr::Or(vec![
                    pred(QueryField::Status, MatchOp::Equals, "closed"),
                    pred(QueryField::Status, MatchOp::Equals, "resolved"),
                ]))),
                pred(QueryField::Tag, MatchOp::Equals, "ui"),
            ])
        );
    }

    #[test]
    fn test_status_synonyms_normalized() {
        let q = parse("status=active").unwrap();
        assert_eq!(q.filter, pred(QueryField::Status, MatchOp::Equals, "open"));
        let q = parse("status=fixed").unwrap();
        assert_eq!(q.filter, pred(QueryField::Status, MatchOp::Equals, "resolved"));
    }

    #[test]
    fn test_quoted_escapes_and_keywords_as_text() {
        let q = parse(r#""say \"or\"" "AND""#).unwrap();
        assert_eq!(
            q.filter,
            Expr::And(vec![Expr::Text("say \"or\"".into()), Expr::Text("AND".into())])
        );
    }

    #[test]
    fn test_sort_anywhere() {
        let q = parse("sort:-id status=open").unwrap();
        assert_eq!(
            q.sort,
            Some(SortKey {
                field: QueryField::Id,
                descending: true
            })
        );
        assert_eq!(q.filter, pred(QueryField::Status, MatchOp::Equals, "open"));

        let q = parse("crash SORT:title").unwrap();
        assert_eq!(
            q.sort,
            Some(SortKey {
                field: QueryField::Title,
                descending: false
            })
        );
    }

    #[test]
    fn test_id_values_validated() {
        assert_eq!(
            parse("parent=#42").unwrap().filter,
            pred(QueryField::Parent, MatchOp::Equals, "42")
        );
        let (token, position, _) = syntax_error("id=abc");
        assert_eq!(token, "abc");
        assert_eq!(position, 4);
    }

    #[test]
    fn test_unknown_field_suggests() {
        let (token, position, message) = syntax_error("status=open titel=x");
        assert_eq!(token, "titel");
        assert_eq!(position, 13);
        assert!(message.contains("did you mean 'title'"));
    }

    #[test]
    fn test_unknown_status() {
        let (token, _, message) = syntax_error("status=resovled");
        assert_eq!(token, "resovled");
        assert!(message.contains("resolved"));
    }

    #[test]
    fn test_error_positions() {
        let (token, position, _) = syntax_error("title=x )");
        assert_eq!(token, ")");
        assert_eq!(position, 9);

        let (token, position, message) = syntax_error("(status=open");
        assert_eq!(token, "<end>");
        assert_eq!(position, 13);
        assert!(message.contains("')'"));

        let (token, _, _) = syntax_error("crash AND");
        assert_eq!(token, "<end>");

        let (token, position, _) = syntax_error("a OR OR b");
        assert_eq!(token, "OR");
        assert_eq!(position, 6);
    }

    #[test]
    fn test_missing_value() {
        let (token, _, message) = syntax_error("title=");
        assert_eq!(token, "<end>");
        assert!(message.contains("'='"));
    }

    #[test]
    fn test_unterminated_quote() {
        let (token, position, message) = syntax_error("title=\"oops");
        assert_eq!(token, "\"oops");
        assert_eq!(position, 7);
        assert_eq!(message, "unterminated quote");
    }

    #[test]
    fn test_empty_and_sort_only() {
        assert_eq!(syntax_error("   ").2, "empty filter");
        assert_eq!(syntax_error("sort:id").2, "empty filter");
    }

    #[test]
    fn test_duplicate_sort() {
        let (token, _, message) = syntax_error("crash sort:id sort:-title");
        assert_eq!(token, "sort");
        assert_eq!(message, "duplicate sort key");
    }

    #[test]
    fn test_canonical_form_reparses_to_same_query() {
        let inputs = [
            "status=open",
            "my-word",
            "assignee=@me status=active",
            "title~crash OR title contains \"hang on exit\" sort:-id",
            "not (status=closed or status=resolved) tag=ui",
            "NOT NOT x",
            "(a OR b) (c OR d) OR e",
            r#"title="quote \" and \\ slash" project:Web"#,
            "\"and\" or \"not\"",
            "parent=#7 area=\"Back End\" sort:assignee",
            "a AND (b OR (c AND NOT d))",
        ];
        for input in inputs {
            let first = parse(input).unwrap();
            let canonical = first.to_string();
            let second = parse(&canonical)
                .unwrap_or_else(|e| panic!("canonical {canonical:?} of {input:?} failed: {e}"));
            assert_eq!(first, second, "input {input:?} canonical {canonical:?}");
            assert_eq!(canonical, second.to_string());
        }
    }
}
