//! OData-style query options and their translation into native queries
//!
//! [`ODataQueryOptions`] is the wire shape handed in by calling layers:
//! textual `$filter` predicates, `$orderby`, numeric-string `$top`/`$skip`,
//! plus `$select`/`$expand` which the core carries but does not apply (they
//! are projection/relation markers consumed outside the core).
//!
//! Translation enforces hard ceilings instead of truncating:
//!
//! - combined filter expressions: at most [`MAX_FILTER_NODES`] nodes
//! - `any`/`all` lambda nesting: at most [`MAX_LAMBDA_DEPTH`] levels
//! - `$top` on the count pass: at most [`MAX_COUNT_TOP`]
//!
//! The `$filter` grammar is the usual OData subset:
//!
//! ```text
//! name eq 'pump-4' and reading gt 5
//! status eq 'open' or not (deleted eq true)
//! contains(name, 'press')
//! readings/any(r: r/value gt 100)
//! ```

use serde::{Deserialize, Serialize};

use crate::core::error::QueryError;
use crate::core::query::{CompareOp, FilterExpr, SortDirection, SortSpec, StringFn};

/// Ceiling on the combined node count of all filter expressions in one
/// options struct.
pub const MAX_FILTER_NODES: usize = 1000;

/// Ceiling on nested `any`/`all` lambda depth.
pub const MAX_LAMBDA_DEPTH: usize = 3;

/// Ceiling on `$top` for count queries.
pub const MAX_COUNT_TOP: u32 = 50;

/// OData query options as received from a calling layer.
///
/// All fields are optional; absence means no constraint. `top` and `skip`
/// are numeric strings, as they arrive on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ODataQueryOptions {
    pub filters: Vec<String>,
    pub order_by: Option<String>,
    pub top: Option<String>,
    pub skip: Option<String>,
    pub select: Option<String>,
    pub expand: Option<String>,
}

impl ODataQueryOptions {
    /// Derive the options for the count pass of a paged OData read: same
    /// filters, paging and ordering stripped.
    pub fn count_options(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            ..Self::default()
        }
    }
}

/// A translated OData query, ready for a backend to execute.
#[derive(Debug, Clone)]
pub struct ODataQuery {
    pub filter: Option<FilterExpr>,
    pub order_by: Vec<SortSpec>,
    pub skip: Option<u64>,
    pub top: Option<u32>,
}

/// Translate options for a data query.
///
/// Filters are parsed against a shared node budget and combined with `and`
/// in the order given.
pub fn translate(options: &ODataQueryOptions) -> Result<ODataQuery, QueryError> {
    let mut nodes = 0usize;
    let mut filter: Option<FilterExpr> = None;

    for raw in &options.filters {
        if raw.trim().is_empty() {
            continue;
        }
        let expr = parse_with_budget(raw, &mut nodes)?;
        filter = Some(match filter {
            Some(combined) => combined.and(expr),
            None => expr,
        });
    }

    let order_by = match options.order_by.as_deref() {
        Some(raw) if !raw.trim().is_empty() => parse_order_by(raw)?,
        _ => Vec::new(),
    };

    Ok(ODataQuery {
        filter,
        order_by,
        skip: parse_numeric(options.skip.as_deref())?,
        top: parse_numeric(options.top.as_deref())?,
    })
}

/// Translate options for a count query: identical to [`translate`], plus the
/// counting window ceiling on `$top`.
pub fn translate_for_count(options: &ODataQueryOptions) -> Result<ODataQuery, QueryError> {
    let query = translate(options)?;
    if let Some(top) = query.top
        && top > MAX_COUNT_TOP
    {
        return Err(QueryError::TopExceeded {
            got: top,
            max: MAX_COUNT_TOP,
        });
    }
    Ok(query)
}

/// Parse a single `$filter` expression.
pub fn parse_filter(input: &str) -> Result<FilterExpr, QueryError> {
    let mut nodes = 0usize;
    parse_with_budget(input, &mut nodes)
}

fn parse_with_budget(input: &str, nodes: &mut usize) -> Result<FilterExpr, QueryError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nodes,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(QueryError::UnexpectedToken(token.render())),
    }
}

fn parse_order_by(raw: &str) -> Result<Vec<SortSpec>, QueryError> {
    let mut specs = Vec::new();
    for clause in raw.split(',') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let mut parts = clause.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| QueryError::UnexpectedToken(clause.to_string()))?
            .replace('/', ".");
        let direction = match parts.next() {
            None => SortDirection::Asc,
            Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(other) => return Err(QueryError::UnexpectedToken(other.to_string())),
        };
        if parts.next().is_some() {
            return Err(QueryError::UnexpectedToken(clause.to_string()));
        }
        specs.push(SortSpec {
            field,
            direction,
        });
    }
    Ok(specs)
}

fn parse_numeric<N: std::str::FromStr>(raw: Option<&str>) -> Result<Option<N>, QueryError> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| QueryError::InvalidNumber(s.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    LParen,
    RParen,
    Comma,
    Colon,
    Slash,
}

impl Token {
    fn render(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Str(s) => format!("'{s}'"),
            Token::Num(s) => s.clone(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Comma => ",".to_string(),
            Token::Colon => ":".to_string(),
            Token::Slash => "/".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
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
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            // doubled quote is an escaped quote
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                literal.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => literal.push(c),
                        None => return Err(QueryError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut literal = String::new();
                literal.push(c);
                chars.next();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Num(literal));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(QueryError::UnexpectedToken(other.to_string())),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    nodes: &'a mut usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, QueryError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(QueryError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), QueryError> {
        let token = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(QueryError::UnexpectedToken(token.render()))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if let Some(Token::Ident(word)) = self.peek()
            && word == keyword
        {
            self.pos += 1;
            return true;
        }
        false
    }

    /// Account for `count` new AST nodes, failing once over budget.
    fn charge(&mut self, count: usize) -> Result<(), QueryError> {
        *self.nodes += count;
        if *self.nodes > MAX_FILTER_NODES {
            return Err(QueryError::NodeCountExceeded {
                max: MAX_FILTER_NODES,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<FilterExpr, QueryError> {
        self.parse_or_in(None)
    }

    fn parse_or_in(&mut self, var: Option<&str>) -> Result<FilterExpr, QueryError> {
        let mut left = self.parse_and_in(var)?;
        while self.eat_keyword("or") {
            let right = self.parse_and_in(var)?;
            self.charge(1)?;
            left = left.or(right);
        }
        Ok(left)
    }

    fn parse_and_in(&mut self, var: Option<&str>) -> Result<FilterExpr, QueryError> {
        let mut left = self.parse_unary(var)?;
        while self.eat_keyword("and") {
            let right = self.parse_unary(var)?;
            self.charge(1)?;
            left = left.and(right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self, var: Option<&str>) -> Result<FilterExpr, QueryError> {
        if self.eat_keyword("not") {
            let inner = self.parse_unary(var)?;
            self.charge(1)?;
            return Ok(!inner);
        }
        self.parse_primary(var)
    }

    fn parse_primary(&mut self, var: Option<&str>) -> Result<FilterExpr, QueryError> {
        let token = self.peek().cloned().ok_or(QueryError::UnexpectedEnd)?;
        match token {
            Token::LParen => {
                self.pos += 1;
                let inner = self.parse_or_in(var)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(word) => {
                if let Some(func) = string_function(&word)
                    && self.tokens.get(self.pos + 1) == Some(&Token::LParen)
                {
                    self.pos += 2;
                    return self.parse_text_function(func, var);
                }
                self.parse_path_expression(var)
            }
            other => Err(QueryError::UnexpectedToken(other.render())),
        }
    }

    fn parse_text_function(
        &mut self,
        func: StringFn,
        var: Option<&str>,
    ) -> Result<FilterExpr, QueryError> {
        let field = self.parse_path(var)?;
        self.expect(&Token::Comma)?;
        let needle = match self.next()? {
            Token::Str(s) => s,
            other => return Err(QueryError::UnexpectedToken(other.render())),
        };
        self.expect(&Token::RParen)?;
        self.charge(3)?;
        Ok(FilterExpr::Text {
            field,
            func,
            needle,
        })
    }

    /// A path followed by either a lambda (`any`/`all`) or a comparison.
    fn parse_path_expression(&mut self, var: Option<&str>) -> Result<FilterExpr, QueryError> {
        let mut segments = vec![self.parse_ident()?];

        loop {
            if self.peek() != Some(&Token::Slash) {
                break;
            }
            // peek past the slash for a lambda keyword
            if let Some(Token::Ident(word)) = self.tokens.get(self.pos + 1)
                && (word == "any" || word == "all")
                && self.tokens.get(self.pos + 2) == Some(&Token::LParen)
            {
                let all = word == "all";
                self.pos += 3;
                return self.parse_lambda(segments, all, var);
            }
            self.pos += 1;
            segments.push(self.parse_ident()?);
        }

        let field = resolve_path(segments, var);
        let op = self.parse_compare_op()?;
        let value = self.parse_literal()?;
        self.charge(3)?;
        Ok(FilterExpr::Compare { field, op, value })
    }

    fn parse_lambda(
        &mut self,
        segments: Vec<String>,
        all: bool,
        var: Option<&str>,
    ) -> Result<FilterExpr, QueryError> {
        let field = resolve_path(segments, var);
        self.depth += 1;
        if self.depth > MAX_LAMBDA_DEPTH {
            return Err(QueryError::LambdaDepthExceeded {
                max: MAX_LAMBDA_DEPTH,
            });
        }

        // `any()` with an empty body means "array is non-empty"
        if !all && self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            self.depth -= 1;
            self.charge(2)?;
            return Ok(FilterExpr::any(field, None));
        }

        let lambda_var = self.parse_ident()?;
        self.expect(&Token::Colon)?;
        let predicate = self.parse_or_in(Some(&lambda_var))?;
        self.expect(&Token::RParen)?;
        self.depth -= 1;
        self.charge(2)?;

        Ok(if all {
            FilterExpr::all(field, predicate)
        } else {
            FilterExpr::any(field, Some(predicate))
        })
    }

    fn parse_ident(&mut self) -> Result<String, QueryError> {
        match self.next()? {
            Token::Ident(word) => Ok(word),
            other => Err(QueryError::UnexpectedToken(other.render())),
        }
    }

    fn parse_path(&mut self, var: Option<&str>) -> Result<String, QueryError> {
        let mut segments = vec![self.parse_ident()?];
        while self.peek() == Some(&Token::Slash) {
            self.pos += 1;
            segments.push(self.parse_ident()?);
        }
        Ok(resolve_path(segments, var))
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp, QueryError> {
        let word = self.parse_ident()?;
        match word.as_str() {
            "eq" => Ok(CompareOp::Eq),
            "ne" => Ok(CompareOp::Ne),
            "gt" => Ok(CompareOp::Gt),
            "ge" => Ok(CompareOp::Ge),
            "lt" => Ok(CompareOp::Lt),
            "le" => Ok(CompareOp::Le),
            other => Err(QueryError::UnexpectedToken(other.to_string())),
        }
    }

    fn parse_literal(&mut self) -> Result<crate::core::query::FilterValue, QueryError> {
        use crate::core::query::FilterValue;

        match self.next()? {
            Token::Str(s) => Ok(FilterValue::String(s)),
            Token::Num(raw) => {
                if raw.contains('.') {
                    raw.parse::<f64>()
                        .map(FilterValue::Float)
                        .map_err(|_| QueryError::InvalidNumber(raw))
                } else {
                    raw.parse::<i64>()
                        .map(FilterValue::Integer)
                        .map_err(|_| QueryError::InvalidNumber(raw))
                }
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(FilterValue::Boolean(true)),
                "false" => Ok(FilterValue::Boolean(false)),
                "null" => Ok(FilterValue::Null),
                other => Err(QueryError::UnexpectedToken(other.to_string())),
            },
            other => Err(QueryError::UnexpectedToken(other.render())),
        }
    }
}

fn string_function(word: &str) -> Option<StringFn> {
    match word {
        "contains" => Some(StringFn::Contains),
        "startswith" => Some(StringFn::StartsWith),
        "endswith" => Some(StringFn::EndsWith),
        _ => None,
    }
}

/// Join path segments with dots, stripping the lambda range variable when the
/// path is rooted at it. A bare range variable resolves to the empty path
/// (the array element itself).
fn resolve_path(mut segments: Vec<String>, var: Option<&str>) -> String {
    if let Some(var) = var
        && segments.first().map(String::as_str) == Some(var)
    {
        segments.remove(0);
    }
    segments.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::query::FilterValue;

    fn options_with_filter(filter: &str) -> ODataQueryOptions {
        ODataQueryOptions {
            filters: vec![filter.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn parses_simple_comparison() {
        let expr = parse_filter("name eq 'pump-4'").unwrap();
        assert_eq!(expr, FilterExpr::eq("name", "pump-4"));
    }

    #[test]
    fn parses_numeric_literals() {
        assert_eq!(
            parse_filter("reading gt 5").unwrap(),
            FilterExpr::gt("reading", 5i64)
        );
        assert_eq!(
            parse_filter("reading le 7.5").unwrap(),
            FilterExpr::le("reading", 7.5)
        );
        assert_eq!(
            parse_filter("offset ge -3").unwrap(),
            FilterExpr::ge("offset", -3i64)
        );
    }

    #[test]
    fn parses_bool_and_null_literals() {
        assert_eq!(
            parse_filter("deleted eq false").unwrap(),
            FilterExpr::eq("deleted", false)
        );
        assert_eq!(
            parse_filter("owner eq null").unwrap(),
            FilterExpr::eq("owner", FilterValue::Null)
        );
    }

    #[test]
    fn escaped_quote_in_string_literal() {
        let expr = parse_filter("name eq 'o''brien'").unwrap();
        assert_eq!(expr, FilterExpr::eq("name", "o'brien"));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_filter("a eq 1 or b eq 2 and c eq 3").unwrap();
        assert_eq!(
            expr,
            FilterExpr::eq("a", 1i64).or(FilterExpr::eq("b", 2i64).and(FilterExpr::eq("c", 3i64)))
        );
    }

    #[test]
    fn parens_override_precedence() {
        let expr = parse_filter("(a eq 1 or b eq 2) and c eq 3").unwrap();
        assert_eq!(
            expr,
            FilterExpr::eq("a", 1i64)
                .or(FilterExpr::eq("b", 2i64))
                .and(FilterExpr::eq("c", 3i64))
        );
    }

    #[test]
    fn parses_not() {
        let expr = parse_filter("not deleted eq true").unwrap();
        assert_eq!(expr, !FilterExpr::eq("deleted", true));
    }

    #[test]
    fn parses_text_functions() {
        assert_eq!(
            parse_filter("contains(name, 'press')").unwrap(),
            FilterExpr::contains("name", "press")
        );
        assert_eq!(
            parse_filter("startswith(name, 'comp')").unwrap(),
            FilterExpr::starts_with("name", "comp")
        );
        assert_eq!(
            parse_filter("endswith(name, '-12')").unwrap(),
            FilterExpr::ends_with("name", "-12")
        );
    }

    #[test]
    fn nested_path_uses_dots() {
        let expr = parse_filter("owner/city eq 'Lisbon'").unwrap();
        assert_eq!(expr, FilterExpr::eq("owner.city", "Lisbon"));
    }

    #[test]
    fn parses_any_with_lambda() {
        let expr = parse_filter("readings/any(r: r/value gt 100)").unwrap();
        assert_eq!(
            expr,
            FilterExpr::any("readings", Some(FilterExpr::gt("value", 100i64)))
        );
    }

    #[test]
    fn parses_any_on_scalar_array() {
        let expr = parse_filter("tags/any(t: t eq 'legacy')").unwrap();
        assert_eq!(expr, FilterExpr::any("tags", Some(FilterExpr::eq("", "legacy"))));
    }

    #[test]
    fn parses_empty_any() {
        let expr = parse_filter("tags/any()").unwrap();
        assert_eq!(expr, FilterExpr::any("tags", None));
    }

    #[test]
    fn parses_all() {
        let expr = parse_filter("readings/all(r: r/value ge 0)").unwrap();
        assert_eq!(expr, FilterExpr::all("readings", FilterExpr::ge("value", 0i64)));
    }

    #[test]
    fn lambda_depth_within_ceiling() {
        let expr = parse_filter("a/any(x: x/b/any(y: y/c/any(z: z eq 1)))");
        assert!(expr.is_ok());
    }

    #[test]
    fn lambda_depth_over_ceiling_is_rejected() {
        let err =
            parse_filter("a/any(x: x/b/any(y: y/c/any(z: z/d/any(w: w eq 1))))").unwrap_err();
        assert_eq!(err, QueryError::LambdaDepthExceeded { max: 3 });
    }

    #[test]
    fn node_ceiling_is_enforced_before_execution() {
        // each clause costs 4 nodes (comparison 3 + or 1); 300 clauses > 1000
        let clauses: Vec<String> = (0..300).map(|i| format!("n eq {i}")).collect();
        let err = translate(&options_with_filter(&clauses.join(" or "))).unwrap_err();
        assert_eq!(err, QueryError::NodeCountExceeded { max: 1000 });
    }

    #[test]
    fn node_ceiling_spans_all_filters() {
        let clause = vec!["n eq 1".to_string(); 400];
        let options = ODataQueryOptions {
            filters: clause,
            ..Default::default()
        };
        let err = translate(&options).unwrap_err();
        assert_eq!(err, QueryError::NodeCountExceeded { max: 1000 });
    }

    #[test]
    fn filter_within_bound_translates() {
        let clauses: Vec<String> = (0..100).map(|i| format!("n eq {i}")).collect();
        let query = translate(&options_with_filter(&clauses.join(" or "))).unwrap();
        assert!(query.filter.is_some());
    }

    #[test]
    fn multiple_filters_combine_with_and() {
        let options = ODataQueryOptions {
            filters: vec!["a eq 1".to_string(), "b eq 2".to_string()],
            ..Default::default()
        };
        let query = translate(&options).unwrap();
        assert_eq!(
            query.filter.unwrap(),
            FilterExpr::eq("a", 1i64).and(FilterExpr::eq("b", 2i64))
        );
    }

    #[test]
    fn translates_paging_and_order() {
        let options = ODataQueryOptions {
            order_by: Some("name desc, created_at".to_string()),
            top: Some("25".to_string()),
            skip: Some("50".to_string()),
            ..Default::default()
        };
        let query = translate(&options).unwrap();
        assert_eq!(query.top, Some(25));
        assert_eq!(query.skip, Some(50));
        assert_eq!(
            query.order_by,
            vec![SortSpec::desc("name"), SortSpec::asc("created_at")]
        );
    }

    #[test]
    fn rejects_bad_numeric_strings() {
        let options = ODataQueryOptions {
            top: Some("lots".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            translate(&options),
            Err(QueryError::InvalidNumber(_))
        ));
    }

    #[test]
    fn count_translation_caps_top() {
        let options = ODataQueryOptions {
            top: Some("51".to_string()),
            ..Default::default()
        };
        assert_eq!(
            translate_for_count(&options).unwrap_err(),
            QueryError::TopExceeded { got: 51, max: 50 }
        );

        let options = ODataQueryOptions {
            top: Some("50".to_string()),
            ..Default::default()
        };
        assert!(translate_for_count(&options).is_ok());
    }

    #[test]
    fn count_options_strip_everything_but_filters() {
        let options = ODataQueryOptions {
            filters: vec!["a eq 1".to_string()],
            order_by: Some("a".to_string()),
            top: Some("10".to_string()),
            skip: Some("5".to_string()),
            select: Some("a".to_string()),
            expand: Some("owner".to_string()),
        };
        let count = options.count_options();
        assert_eq!(count.filters, options.filters);
        assert!(count.order_by.is_none());
        assert!(count.top.is_none());
        assert!(count.skip.is_none());
        assert!(count.select.is_none());
        assert!(count.expand.is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_filter("name eq").is_err());
        assert!(parse_filter("eq 'x'").is_err());
        assert!(parse_filter("name ?? 'x'").is_err());
        assert_eq!(
            parse_filter("name eq 'unterminated").unwrap_err(),
            QueryError::UnterminatedString
        );
        assert!(parse_filter("name eq 'x' trailing").is_err());
    }
}
