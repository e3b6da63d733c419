//! SQL text to statements.
//!
//! Text is tokenized once, split on top-level `;`, and each piece is parsed
//! either by `sqlparser` (PostgreSQL dialect) or, for the Postgres forms it
//! does not know, by a small hand-written parser over the same tokens:
//!
//! ```text
//!   "CREATE SEQUENCE s; SELECT nextval('s')"
//!        │ tokenize_with_location
//!        ▼
//!   [CREATE, SEQUENCE, s] ; [SELECT, nextval, (, 's', )]
//!        │ custom                │ sqlparser
//!        ▼                       ▼
//!   Statement::CreateSequence    Statement::Sql(Query)
//! ```
//!
//! Parsed batches are kept in a process-wide LRU cache keyed by a hash of the
//! text, so repeated statements skip tokenizing and parsing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use lru::LruCache;
use parking_lot::Mutex;
use sqlparser::ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, TokenWithLocation, Tokenizer};
use tracing::debug;

use crate::catalog::QName;
use crate::error::{SqlError, SqlResult, StatementLocation};
use crate::storage::SequenceOption;

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// A statement `sqlparser` understands.
    Sql(Box<ast::Statement>),
    /// `CREATE EXTENSION [IF NOT EXISTS] name [WITH SCHEMA s]`.
    CreateExtension {
        /// Extension name.
        name: String,
        /// `IF NOT EXISTS`.
        if_not_exists: bool,
        /// Target schema.
        schema: Option<String>,
    },
    /// `CREATE SEQUENCE [IF NOT EXISTS] name [options]`.
    CreateSequence {
        /// Sequence name.
        name: QName,
        /// `IF NOT EXISTS`.
        if_not_exists: bool,
        /// Clauses, in order.
        options: Vec<SequenceOption>,
    },
    /// `ALTER SEQUENCE [IF EXISTS] name options`.
    AlterSequence {
        /// Sequence name.
        name: QName,
        /// `IF EXISTS`.
        if_exists: bool,
        /// Clauses, in order.
        options: Vec<SequenceOption>,
    },
    /// `CREATE TYPE name AS ENUM (labels)`.
    CreateEnum {
        /// Type name.
        name: QName,
        /// Labels, in declaration order.
        labels: Vec<String>,
    },
    /// `ALTER TABLE name OWNER TO role`: accepted and ignored.
    AlterTableOwner {
        /// Table name.
        table: QName,
    },
}

impl Statement {
    /// Short name of the statement kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateExtension { .. } => "create extension",
            Statement::CreateSequence { .. } => "create sequence",
            Statement::AlterSequence { .. } => "alter sequence",
            Statement::CreateEnum { .. } => "create enum",
            Statement::AlterTableOwner { .. } => "alter table",
            Statement::Sql(s) => match s.as_ref() {
                ast::Statement::Query(_) => "select",
                ast::Statement::Insert { .. } => "insert",
                ast::Statement::Update { .. } => "update",
                ast::Statement::Delete { .. } => "delete",
                ast::Statement::CreateTable { .. } => "create table",
                ast::Statement::CreateIndex { .. } => "create index",
                ast::Statement::CreateSchema { .. } => "create schema",
                ast::Statement::AlterTable { .. } => "alter table",
                ast::Statement::Drop { .. } => "drop",
                ast::Statement::Truncate { .. } => "truncate",
                ast::Statement::StartTransaction { .. } => "begin",
                ast::Statement::Commit { .. } => "commit",
                ast::Statement::Rollback { .. } => "rollback",
                ast::Statement::SetVariable { .. } | ast::Statement::SetTimeZone { .. } => "set",
                ast::Statement::ShowVariable { .. } => "show",
                _ => "other",
            },
        }
    }
}

/// A statement with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    /// The statement.
    pub statement: Statement,
    /// Position of its first token.
    pub location: StatementLocation,
    /// Its text, without the terminating `;`.
    pub sql: String,
}

// ============================================================================
// Cache
// ============================================================================

type Batch = Arc<Vec<ParsedStatement>>;

struct ParseCache {
    entries: LruCache<u64, (String, Batch)>,
}

static CACHE: OnceLock<Mutex<ParseCache>> = OnceLock::new();

fn cache(capacity: usize) -> &'static Mutex<ParseCache> {
    CACHE.get_or_init(|| {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Mutex::new(ParseCache {
            entries: LruCache::new(capacity),
        })
    })
}

/// Parses a batch through the process-wide cache. `capacity` sizes the
/// cache when this is its first use.
pub fn parse_cached(sql: &str, capacity: usize) -> SqlResult<Batch> {
    let mut hasher = DefaultHasher::new();
    sql.hash(&mut hasher);
    let key = hasher.finish();

    {
        let mut cache = cache(capacity).lock();
        if let Some((text, batch)) = cache.entries.get(&key) {
            if text == sql {
                debug!(key, "parse cache hit");
                return Ok(batch.clone());
            }
        }
    }

    debug!(key, "parse cache miss");
    let batch = Arc::new(parse(sql)?);
    cache(capacity)
        .lock()
        .entries
        .put(key, (sql.to_string(), batch.clone()));
    Ok(batch)
}

// ============================================================================
// Splitting
// ============================================================================

/// Parses a batch of `;`-separated statements.
pub fn parse(sql: &str) -> SqlResult<Vec<ParsedStatement>> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    let lines = LineIndex::new(sql);

    let mut statements = Vec::new();
    let mut group: Vec<TokenWithLocation> = Vec::new();
    let mut rest = tokens.into_iter().peekable();
    while let Some(token) = rest.next() {
        let end = match &token.token {
            Token::SemiColon => Some(lines.offset(&token)),
            _ => None,
        };
        if end.is_none() {
            group.push(token);
            if rest.peek().is_some() {
                continue;
            }
        }
        let group = std::mem::take(&mut group);
        if let Some(statement) = parse_group(&dialect, group, sql, &lines, end)? {
            statements.push(statement);
        }
    }
    Ok(statements)
}

/// Parses a standalone expression, such as a generated column default.
pub fn parse_expr(sql: &str) -> SqlResult<ast::Expr> {
    let dialect = PostgreSqlDialect {};
    Ok(Parser::new(&dialect).try_with_sql(sql)?.parse_expr()?)
}

fn parse_group(
    dialect: &PostgreSqlDialect,
    group: Vec<TokenWithLocation>,
    sql: &str,
    lines: &LineIndex,
    end: Option<usize>,
) -> SqlResult<Option<ParsedStatement>> {
    let Some(first) = group.iter().find(|t| !is_trivia(&t.token)) else {
        return Ok(None);
    };
    let location = StatementLocation {
        line: first.location.line,
        column: first.location.column,
    };
    let start = lines.offset(first);
    let end = end.unwrap_or(sql.len());
    let text = sql
        .get(start..end.max(start))
        .map(|s| s.trim_end().to_string())
        .unwrap_or_default();

    let significant: Vec<Token> = group
        .iter()
        .filter(|t| !is_trivia(&t.token))
        .map(|t| t.token.clone())
        .collect();
    let statement = match parse_custom(significant)? {
        Some(custom) => custom,
        None => {
            let mut parser = Parser::new(dialect).with_tokens_with_locations(group);
            let parsed = parser.parse_statement()?;
            let next = parser.peek_token();
            if next.token != Token::EOF {
                return Err(SqlError::Parse(format!(
                    "unexpected {} at line {}, column {}",
                    next.token, next.location.line, next.location.column
                )));
            }
            Statement::Sql(Box::new(parsed))
        }
    };
    Ok(Some(ParsedStatement {
        statement,
        location,
        sql: text,
    }))
}

fn is_trivia(token: &Token) -> bool {
    matches!(token, Token::Whitespace(_))
}

/// Maps token locations (1-based line, 1-based character column) to byte
/// offsets.
struct LineIndex<'a> {
    sql: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self { sql, starts }
    }

    fn offset(&self, token: &TokenWithLocation) -> usize {
        let line = (token.location.line as usize).saturating_sub(1);
        let column = (token.location.column as usize).saturating_sub(1);
        let Some(&start) = self.starts.get(line) else {
            return self.sql.len();
        };
        self.sql[start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| start + i)
            .unwrap_or(self.sql.len())
    }
}

// ============================================================================
// Hand-parsed statements
// ============================================================================

fn parse_custom(tokens: Vec<Token>) -> SqlResult<Option<Statement>> {
    let mut cur = TokenCursor { tokens, pos: 0 };
    if cur.eat_all(&["create", "extension"]) {
        return cur.create_extension().map(Some);
    }
    if cur.eat_all(&["create", "sequence"])
        || cur.eat_all(&["create", "temp", "sequence"])
        || cur.eat_all(&["create", "temporary", "sequence"])
    {
        let if_not_exists = cur.eat_all(&["if", "not", "exists"]);
        let name = cur.qname()?;
        let options = cur.sequence_options()?;
        return Ok(Some(Statement::CreateSequence {
            name,
            if_not_exists,
            options,
        }));
    }
    if cur.eat_all(&["alter", "sequence"]) {
        let if_exists = cur.eat_all(&["if", "exists"]);
        let name = cur.qname()?;
        let options = cur.sequence_options()?;
        return Ok(Some(Statement::AlterSequence {
            name,
            if_exists,
            options,
        }));
    }
    if cur.is_enum_declaration() {
        cur.pos = 2;
        let name = cur.qname()?;
        cur.expect("as")?;
        cur.expect("enum")?;
        let labels = cur.string_list()?;
        cur.done()?;
        return Ok(Some(Statement::CreateEnum { name, labels }));
    }
    if cur.is_owner_change() {
        cur.pos = 2;
        cur.eat_all(&["if", "exists"]);
        cur.eat("only");
        let table = cur.qname()?;
        return Ok(Some(Statement::AlterTableOwner { table }));
    }
    Ok(None)
}

struct TokenCursor {
    tokens: Vec<Token>,
    pos: usize,
}

fn is_word(token: Option<&Token>, word: &str) -> bool {
    matches!(token, Some(Token::Word(w)) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(word))
}

impl TokenCursor {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, word: &str) -> bool {
        if is_word(self.peek(), word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_all(&mut self, words: &[&str]) -> bool {
        let matches = words
            .iter()
            .enumerate()
            .all(|(i, w)| is_word(self.tokens.get(self.pos + i), w));
        if matches {
            self.pos += words.len();
        }
        matches
    }

    fn expect(&mut self, word: &str) -> SqlResult<()> {
        if self.eat(word) {
            Ok(())
        } else {
            Err(self.unexpected(&word.to_uppercase()))
        }
    }

    fn expect_token(&mut self, token: Token) -> SqlResult<()> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected(&token.to_string()))
        }
    }

    fn unexpected(&self, wanted: &str) -> SqlError {
        match self.peek() {
            Some(t) => SqlError::Parse(format!("expected {}, found {}", wanted, t)),
            None => SqlError::Parse(format!("expected {}, found end of statement", wanted)),
        }
    }

    fn done(&self) -> SqlResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(SqlError::Parse(format!("unexpected {}", t))),
        }
    }

    fn ident(&mut self) -> SqlResult<String> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let name = match w.quote_style {
                    Some(_) => w.value.clone(),
                    None => w.value.to_lowercase(),
                };
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn qname(&mut self) -> SqlResult<QName> {
        let mut parts = vec![self.ident()?];
        while self.peek() == Some(&Token::Period) {
            self.pos += 1;
            parts.push(self.ident()?);
        }
        match parts.len() {
            1 => Ok(QName::new(parts.remove(0))),
            2 => Ok(QName::qualified(parts.remove(0), parts.remove(0))),
            _ => Err(SqlError::query(format!(
                "improper qualified name (too many dotted names): {}",
                parts.join(".")
            ))),
        }
    }

    fn integer(&mut self) -> SqlResult<i64> {
        let negative = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                true
            }
            Some(Token::Plus) => {
                self.pos += 1;
                false
            }
            _ => false,
        };
        match self.next() {
            Some(Token::Number(n, _)) => {
                let value: i64 = n
                    .parse()
                    .map_err(|_| SqlError::query(format!("invalid input syntax for type bigint: {}", n)))?;
                Ok(if negative { -value } else { value })
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected("number"))
            }
        }
    }

    fn next_is_number(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Number(..)) | Some(Token::Minus) | Some(Token::Plus)
        )
    }

    fn string_list(&mut self) -> SqlResult<Vec<String>> {
        self.expect_token(Token::LParen)?;
        let mut items = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            match self.next() {
                Some(Token::SingleQuotedString(s)) => items.push(s),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("string literal"));
                }
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(items),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected(")"));
                }
            }
        }
    }

    fn is_enum_declaration(&self) -> bool {
        is_word(self.tokens.first(), "create")
            && is_word(self.tokens.get(1), "type")
            && self
                .tokens
                .windows(2)
                .any(|w| is_word(w.first(), "as") && is_word(w.get(1), "enum"))
    }

    fn is_owner_change(&self) -> bool {
        let n = self.tokens.len();
        n >= 5
            && is_word(self.tokens.first(), "alter")
            && is_word(self.tokens.get(1), "table")
            && is_word(self.tokens.get(n - 3), "owner")
            && is_word(self.tokens.get(n - 2), "to")
    }

    fn create_extension(&mut self) -> SqlResult<Statement> {
        let if_not_exists = self.eat_all(&["if", "not", "exists"]);
        let name = self.ident()?;
        let mut schema = None;
        self.eat("with");
        while !self.at_end() {
            if self.eat("schema") {
                schema = Some(self.ident()?);
            } else if self.eat("version") {
                self.next();
            } else if self.eat("cascade") {
            } else {
                return Err(self.unexpected("SCHEMA"));
            }
        }
        Ok(Statement::CreateExtension {
            name,
            if_not_exists,
            schema,
        })
    }

    fn sequence_options(&mut self) -> SqlResult<Vec<SequenceOption>> {
        let mut options = Vec::new();
        while !self.at_end() {
            let option = if self.eat("as") {
                SequenceOption::As(self.ident()?)
            } else if self.eat("increment") {
                self.eat("by");
                SequenceOption::Increment(self.integer()?)
            } else if self.eat("minvalue") {
                SequenceOption::MinValue(Some(self.integer()?))
            } else if self.eat("maxvalue") {
                SequenceOption::MaxValue(Some(self.integer()?))
            } else if self.eat_all(&["no", "minvalue"]) {
                SequenceOption::MinValue(None)
            } else if self.eat_all(&["no", "maxvalue"]) {
                SequenceOption::MaxValue(None)
            } else if self.eat_all(&["no", "cycle"]) {
                SequenceOption::Cycle(false)
            } else if self.eat("cycle") {
                SequenceOption::Cycle(true)
            } else if self.eat("start") {
                self.eat("with");
                SequenceOption::Start(self.integer()?)
            } else if self.eat("restart") {
                let with = self.eat("with");
                if with || self.next_is_number() {
                    SequenceOption::Restart(Some(self.integer()?))
                } else {
                    SequenceOption::Restart(None)
                }
            } else if self.eat("cache") {
                SequenceOption::Cache(self.integer()?)
            } else if self.eat_all(&["owned", "by"]) {
                if self.eat("none") {
                    SequenceOption::OwnedBy(None)
                } else {
                    let mut parts = vec![self.ident()?];
                    while self.peek() == Some(&Token::Period) {
                        self.pos += 1;
                        parts.push(self.ident()?);
                    }
                    SequenceOption::OwnedBy(Some(parts.join(".")))
                }
            } else {
                return Err(self.unexpected("sequence option"));
            };
            options.push(option);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(sql: &str) -> Statement {
        let mut parsed = parse(sql).unwrap();
        assert_eq!(parsed.len(), 1);
        parsed.remove(0).statement
    }

    #[test]
    fn test_split_with_locations() {
        let parsed = parse("SELECT 1;\n  SELECT 'a;b' ;\n\nSELECT 3").unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].location, StatementLocation { line: 1, column: 1 });
        assert_eq!(parsed[1].location, StatementLocation { line: 2, column: 3 });
        assert_eq!(parsed[1].sql, "SELECT 'a;b'");
        assert_eq!(parsed[2].location.line, 4);
        assert_eq!(parsed[2].sql, "SELECT 3");
    }

    #[test]
    fn test_empty_statements_skipped() {
        assert!(parse("  ;; -- nothing\n").unwrap().is_empty());
        assert_eq!(parse("SELECT 1;;").unwrap().len(), 1);
    }

    #[test]
    fn test_syntax_error() {
        let err = parse("SELEC 1").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
        assert!(parse("SELECT 1 2").is_err());
    }

    #[test]
    fn test_sequence_statements() {
        assert_eq!(
            one("CREATE SEQUENCE IF NOT EXISTS app.ids AS integer INCREMENT BY -2 MINVALUE -10 NO MAXVALUE START WITH 5 CACHE 3 CYCLE OWNED BY t.id"),
            Statement::CreateSequence {
                name: QName::qualified("app", "ids"),
                if_not_exists: true,
                options: vec![
                    SequenceOption::As("integer".into()),
                    SequenceOption::Increment(-2),
                    SequenceOption::MinValue(Some(-10)),
                    SequenceOption::MaxValue(None),
                    SequenceOption::Start(5),
                    SequenceOption::Cache(3),
                    SequenceOption::Cycle(true),
                    SequenceOption::OwnedBy(Some("t.id".into())),
                ],
            }
        );
        assert_eq!(
            one("ALTER SEQUENCE s RESTART"),
            Statement::AlterSequence {
                name: QName::new("s"),
                if_exists: false,
                options: vec![SequenceOption::Restart(None)],
            }
        );
        assert_eq!(
            one("alter sequence if exists s restart 10 no cycle"),
            Statement::AlterSequence {
                name: QName::new("s"),
                if_exists: true,
                options: vec![SequenceOption::Restart(Some(10)), SequenceOption::Cycle(false)],
            }
        );
        assert!(parse("CREATE SEQUENCE s BOGUS 1").is_err());
    }

    #[test]
    fn test_enum_extension_owner() {
        assert_eq!(
            one("CREATE TYPE mood AS ENUM ('sad', 'ok', 'happy')"),
            Statement::CreateEnum {
                name: QName::new("mood"),
                labels: vec!["sad".into(), "ok".into(), "happy".into()],
            }
        );
        assert_eq!(
            one("CREATE EXTENSION IF NOT EXISTS \"uuid-ossp\" WITH SCHEMA ext"),
            Statement::CreateExtension {
                name: "uuid-ossp".into(),
                if_not_exists: true,
                schema: Some("ext".into()),
            }
        );
        assert_eq!(
            one("ALTER TABLE ONLY public.t OWNER TO admin"),
            Statement::AlterTableOwner {
                table: QName::qualified("public", "t"),
            }
        );
    }

    #[test]
    fn test_builtin_forms_go_to_sqlparser() {
        assert_eq!(one("SELECT 1").kind(), "select");
        assert_eq!(one("BEGIN").kind(), "begin");
        assert_eq!(one("SET search_path TO public").kind(), "set");
        assert_eq!(one("TRUNCATE TABLE t").kind(), "truncate");
    }

    #[test]
    fn test_cache_returns_shared_batch() {
        let sql = "SELECT 'parse cache probe 7f3a'";
        let a = parse_cached(sql, 100).unwrap();
        let b = parse_cached(sql, 100).unwrap();
        assert!(Arc::ptr_eq(&a, &b) || a == b);
        assert_eq!(a.len(), 1);
    }
}
