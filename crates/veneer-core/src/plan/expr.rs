//! Shared comparison-expression parser.
//!
//! One grammar backs both the permission policy language
//! (`@item.author_id eq @claims.sub and not @item.archived eq true`) and
//! the REST `$filter` OData subset (`year gt 2000 and (price le 20 or
//! featured eq true)`). The two differ only in how bare identifiers
//! resolve, which callers supply through [`OperandResolver`].
//!
//! ```text
//! expr       := or_expr
//! or_expr    := and_expr ( 'or' and_expr )*
//! and_expr   := unary ( 'and' unary )*
//! unary      := 'not' unary | primary
//! primary    := '(' expr ')' | comparison
//! comparison := operand op operand        op ∈ { eq ne gt ge lt le }
//! operand    := literal | identifier
//! ```

use serde_json::Value;
use veneer_error::{Result, VeneerError};

use crate::metadata::DbType;
use super::{CompareOp, Predicate};

/// What an identifier means to the caller's dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A column on the entity being filtered.
    Column(String, DbType),
    /// A resolved constant (literal, or a claim substituted at compile time).
    Literal(Value),
}

/// Resolves bare identifiers to operands.
pub trait OperandResolver {
    /// Resolve `ident` (e.g. `year`, `@item.author_id`, `@claims.sub`).
    ///
    /// # Errors
    ///
    /// Dialect-specific: unknown columns, missing claims.
    fn resolve(&self, ident: &str) -> Result<Operand>;
}

/// Parse an expression into a [`Predicate`].
///
/// # Errors
///
/// `BadRequest` on syntax errors; resolver errors pass through.
pub fn parse(input: &str, resolver: &dyn OperandResolver) -> Result<Predicate> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        resolver,
    };
    let predicate = parser.or_expr()?;
    if parser.position != parser.tokens.len() {
        return Err(VeneerError::bad_request(format!(
            "Unexpected trailing input in expression: {input}"
        )));
    }
    Ok(predicate)
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        // '' is an escaped quote inside the literal
                        Some('\'') => {
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                text.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => text.push(c),
                        None => {
                            return Err(VeneerError::bad_request(
                                "Unterminated string literal in expression",
                            ));
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || d == '+' || d == '-'
                    {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number: serde_json::Number = text.parse().map_err(|_| {
                    VeneerError::bad_request(format!("Invalid number literal '{text}'"))
                })?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphanumeric() || c == '_' || c == '@' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '@' || d == '.' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(VeneerError::bad_request(format!(
                    "Unexpected character '{other}' in expression"
                )));
            }
        }
    }

    Ok(tokens)
}

// =============================================================================
// Parser
// =============================================================================

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    resolver: &'a dyn OperandResolver,
}

impl Parser<'_> {
    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.tokens.get(self.position), Some(Token::Ident(word)) if word == keyword)
    }

    fn next_token(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or_else(|| VeneerError::bad_request("Unexpected end of expression"))?;
        self.position += 1;
        Ok(token)
    }

    fn or_expr(&mut self) -> Result<Predicate> {
        let mut parts = vec![self.and_expr()?];
        while self.peek_keyword("or") {
            self.position += 1;
            parts.push(self.and_expr()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::Or(parts)
        })
    }

    fn and_expr(&mut self) -> Result<Predicate> {
        let mut parts = vec![self.unary()?];
        while self.peek_keyword("and") {
            self.position += 1;
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Predicate::And(parts)
        })
    }

    fn unary(&mut self) -> Result<Predicate> {
        if self.peek_keyword("not") {
            self.position += 1;
            return Ok(Predicate::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Predicate> {
        if matches!(self.tokens.get(self.position), Some(Token::LParen)) {
            self.position += 1;
            let inner = self.or_expr()?;
            match self.next_token()? {
                Token::RParen => return Ok(inner),
                _ => return Err(VeneerError::bad_request("Expected ')' in expression")),
            }
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Predicate> {
        let left = self.operand()?;
        let op = match self.next_token()? {
            Token::Ident(word) => comparison_op(&word)?,
            other => {
                return Err(VeneerError::bad_request(format!(
                    "Expected comparison operator, found {other:?}"
                )));
            }
        };
        let right = self.operand()?;
        combine(left, op, right)
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.next_token()? {
            Token::Str(text) => Ok(Operand::Literal(Value::String(text))),
            Token::Num(number) => Ok(Operand::Literal(Value::Number(number))),
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Operand::Literal(Value::Bool(true))),
                "false" => Ok(Operand::Literal(Value::Bool(false))),
                "null" => Ok(Operand::Literal(Value::Null)),
                ident => self.resolver.resolve(ident),
            },
            other => Err(VeneerError::bad_request(format!(
                "Expected operand, found {other:?}"
            ))),
        }
    }
}

fn comparison_op(word: &str) -> Result<CompareOp> {
    match word {
        "eq" => Ok(CompareOp::Eq),
        "ne" => Ok(CompareOp::Neq),
        "gt" => Ok(CompareOp::Gt),
        "ge" => Ok(CompareOp::Gte),
        "lt" => Ok(CompareOp::Lt),
        "le" => Ok(CompareOp::Lte),
        other => Err(VeneerError::bad_request(format!(
            "Unknown comparison operator '{other}'"
        ))),
    }
}

/// Normalize a comparison into column-vs-value form, folding constant
/// comparisons at compile time.
fn combine(left: Operand, op: CompareOp, right: Operand) -> Result<Predicate> {
    match (left, right) {
        (Operand::Column(column, db_type), Operand::Literal(value)) => {
            column_comparison(column, op, value, db_type)
        }
        (Operand::Literal(value), Operand::Column(column, db_type)) => {
            column_comparison(column, op.mirrored(), value, db_type)
        }
        (Operand::Literal(left), Operand::Literal(right)) => {
            Ok(Predicate::Literal(fold_constant(&left, op, &right)?))
        }
        (Operand::Column(..), Operand::Column(..)) => Err(VeneerError::bad_request(
            "Column-to-column comparisons are not supported in expressions",
        )),
    }
}

fn column_comparison(
    column: String,
    op: CompareOp,
    value: Value,
    db_type: DbType,
) -> Result<Predicate> {
    if value.is_null() {
        return match op {
            CompareOp::Eq => Ok(Predicate::IsNull {
                column,
                negated: false,
            }),
            CompareOp::Neq => Ok(Predicate::IsNull {
                column,
                negated: true,
            }),
            _ => Err(VeneerError::bad_request(
                "null admits only eq and ne comparisons",
            )),
        };
    }
    if !op.admits(db_type) {
        return Err(VeneerError::bad_request(format!(
            "Operator is not valid for column '{column}'"
        )));
    }
    Ok(Predicate::Compare {
        column,
        op,
        value,
        db_type,
    })
}

fn fold_constant(left: &Value, op: CompareOp, right: &Value) -> Result<bool> {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r)),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    };
    match op {
        CompareOp::Eq => Ok(left == right),
        CompareOp::Neq => Ok(left != right),
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => ordering
            .map(|o| match op {
                CompareOp::Gt => o.is_gt(),
                CompareOp::Gte => o.is_ge(),
                CompareOp::Lt => o.is_lt(),
                _ => o.is_le(),
            })
            .ok_or_else(|| {
                VeneerError::bad_request("Operands of an ordering comparison are not comparable")
            }),
        _ => Err(VeneerError::bad_request(
            "Operator is not valid between two literals",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Columns;

    impl OperandResolver for Columns {
        fn resolve(&self, ident: &str) -> Result<Operand> {
            match ident {
                "year" => Ok(Operand::Column("year".to_string(), DbType::Int)),
                "title" => Ok(Operand::Column("title".to_string(), DbType::String)),
                "featured" => Ok(Operand::Column("featured".to_string(), DbType::Boolean)),
                other => Err(VeneerError::bad_request(format!("Unknown column '{other}'"))),
            }
        }
    }

    #[test]
    fn simple_comparison() {
        let predicate = parse("year gt 2000", &Columns).expect("parses");
        assert_eq!(
            predicate,
            Predicate::Compare {
                column: "year".to_string(),
                op: CompareOp::Gt,
                value: json!(2000),
                db_type: DbType::Int,
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let predicate =
            parse("year gt 2000 or year lt 1900 and featured eq true", &Columns).expect("parses");
        match predicate {
            Predicate::Or(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[1], Predicate::And(inner) if inner.len() == 2));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn parens_override_precedence() {
        let predicate =
            parse("(year gt 2000 or year lt 1900) and featured eq true", &Columns).expect("parses");
        assert!(matches!(predicate, Predicate::And(_)));
    }

    #[test]
    fn not_negates() {
        let predicate = parse("not featured eq true", &Columns).expect("parses");
        assert!(matches!(predicate, Predicate::Not(_)));
    }

    #[test]
    fn flipped_comparison_mirrors_operator() {
        let predicate = parse("2000 lt year", &Columns).expect("parses");
        assert!(matches!(
            predicate,
            Predicate::Compare {
                op: CompareOp::Gt,
                ..
            }
        ));
    }

    #[test]
    fn null_comparison_lowers_to_is_null() {
        assert_eq!(
            parse("title eq null", &Columns).expect("parses"),
            Predicate::IsNull {
                column: "title".to_string(),
                negated: false,
            }
        );
        assert_eq!(
            parse("title ne null", &Columns).expect("parses"),
            Predicate::IsNull {
                column: "title".to_string(),
                negated: true,
            }
        );
    }

    #[test]
    fn string_escaping_doubles_quotes() {
        let predicate = parse("title eq 'it''s here'", &Columns).expect("parses");
        assert!(matches!(
            predicate,
            Predicate::Compare { value, .. } if value == json!("it's here")
        ));
    }

    #[test]
    fn constant_comparison_folds() {
        assert_eq!(
            parse("1 lt 2", &Columns).expect("parses"),
            Predicate::Literal(true)
        );
        assert_eq!(
            parse("'a' eq 'b'", &Columns).expect("parses"),
            Predicate::Literal(false)
        );
    }

    #[test]
    fn ordering_on_boolean_column_is_rejected() {
        assert!(parse("featured gt true", &Columns).is_err());
    }

    #[test]
    fn trailing_tokens_are_rejected() {
        assert!(parse("year gt 2000 2000", &Columns).is_err());
    }

    #[test]
    fn unterminated_string_is_rejected() {
        assert!(parse("title eq 'oops", &Columns).is_err());
    }

    #[test]
    fn unknown_column_passes_resolver_error_through() {
        let err = parse("missing eq 1", &Columns).expect_err("must fail");
        assert!(err.to_string().contains("missing"));
    }
}
