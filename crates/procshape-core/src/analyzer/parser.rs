//! Recursive-descent parser for the T-SQL subset in `ast`.
//!
//! Statements the analyzer does not model (control flow, SET options,
//! transactions, cursors, DDL) are skipped token by token. A grammar error
//! inside a modeled statement is recorded and parsing resumes at the next
//! statement keyword, so one bad statement never hides the rest of a body.

use std::fmt;

use crate::analyzer::ast::*;
use crate::analyzer::lexer::{render, SqlToken, TokenKind};

/// Keywords that begin a new statement when seen outside parentheses.
const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "EXEC", "EXECUTE", "IF", "ELSE", "WHILE",
    "BEGIN", "END", "RETURN", "DECLARE", "SET", "PRINT", "RAISERROR", "THROW", "COMMIT",
    "ROLLBACK", "SAVE", "GOTO", "BREAK", "CONTINUE", "WAITFOR", "OPEN", "CLOSE", "FETCH",
    "DEALLOCATE", "TRUNCATE", "CREATE", "ALTER", "DROP", "GO", "USE", "REVERT", "GRANT",
    "DENY", "REVOKE",
];

/// Words that can never be an implicit alias and end an expression.
const RESERVED: &[&str] = &[
    "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "FOR", "OPTION", "UNION", "EXCEPT",
    "INTERSECT", "INTO", "AS", "ON", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS",
    "OUTER", "APPLY", "THEN", "WHEN", "ELSE", "END", "SELECT", "INSERT", "UPDATE", "DELETE",
    "MERGE", "EXEC", "EXECUTE", "WITH", "IF", "WHILE", "BEGIN", "RETURN", "DECLARE", "SET",
    "PRINT", "RAISERROR", "THROW", "OUTPUT", "VALUES", "USING", "AND", "OR", "NOT", "IS",
    "IN", "LIKE", "BETWEEN", "CASE", "NULL", "COMMIT", "ROLLBACK", "GO", "OFFSET", "FETCH",
    "DEFAULT", "TRUNCATE", "CREATE", "ALTER", "DROP", "PIVOT", "UNPIVOT", "OVER", "ESCAPE",
    "COLLATE", "EXISTS", "TOP", "DISTINCT", "ALL", "ASC", "DESC", "BY", "WAITFOR",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// Unquoted words that may follow an expression or table as an alias
/// without `AS`. A statement keyword starts the next statement instead.
fn is_implicit_alias(word: &str) -> bool {
    !is_reserved(word) && !STATEMENT_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// A grammar error with the token offset it was raised at.
#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (token {})", self.message, self.position)
    }
}

/// Parsed batch plus every recovered error.
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub batch: Batch,
    pub errors: Vec<ParseError>,
}

type PResult<T> = Result<T, ParseError>;

/// Parse a token stream produced by `lexer::tokenize`.
pub fn parse(tokens: &[SqlToken]) -> ParseOutput {
    let mut parser = Parser { tokens, pos: 0 };
    let mut output = ParseOutput::default();
    while !parser.at_end() {
        let start = parser.pos;
        match parser.parse_statement(&mut output.batch) {
            Ok(Some(statement)) => output.batch.statements.push(statement),
            Ok(None) => {}
            Err(error) => {
                output.errors.push(error);
                if parser.pos == start {
                    parser.pos += 1;
                }
                parser.recover();
            }
        }
    }
    output
}

struct Parser<'a> {
    tokens: &'a [SqlToken],
    pos: usize,
}

impl<'a> Parser<'a> {
    // -- cursor helpers ---------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a SqlToken> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a SqlToken> {
        self.tokens.get(self.pos + offset)
    }

    fn peek_kw(&self, keyword: &str) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    fn peek_kw_at(&self, offset: usize, keyword: &str) -> bool {
        self.peek_at(offset).is_some_and(|t| t.is_keyword(keyword))
    }

    fn peek_kind(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    fn peek_kind_at(&self, offset: usize, kind: &TokenKind) -> bool {
        self.peek_at(offset).is_some_and(|t| &t.kind == kind)
    }

    fn advance(&mut self) -> Option<&'a SqlToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_kw(&mut self, keyword: &str) -> bool {
        if self.peek_kw(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kind(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let near = self
            .peek()
            .map(|t| format!(" near '{}'", t.text))
            .unwrap_or_else(|| " at end of input".to_string());
        ParseError {
            position: self.pos,
            message: format!("{}{near}", message.into()),
        }
    }

    fn expect_kw(&mut self, keyword: &str) -> PResult<()> {
        if self.eat_kw(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> PResult<()> {
        if self.eat_kind(&kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek() {
            Some(token) => match &token.kind {
                TokenKind::Word { value, .. } => {
                    self.pos += 1;
                    Ok(value.clone())
                }
                _ => Err(self.error("expected identifier")),
            },
            None => Err(self.error("expected identifier")),
        }
    }

    /// Skip a parenthesized group; the cursor must be on `(`.
    fn skip_group(&mut self) -> PResult<()> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(token) = self.advance() {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        self.pos = start;
        Err(self.error("unbalanced parentheses"))
    }

    fn is_statement_start(&self) -> bool {
        let Some(token) = self.peek() else {
            return false;
        };
        if token.is_keyword("WITH") {
            // `WITH (NOLOCK)` is a table hint, `WITH name AS (` a CTE.
            return self
                .peek_at(1)
                .is_some_and(|next| matches!(next.kind, TokenKind::Word { .. }));
        }
        token
            .keyword()
            .is_some_and(|kw| STATEMENT_KEYWORDS.contains(&kw.as_str()))
    }

    /// Move to the next statement keyword outside parentheses.
    fn recover(&mut self) {
        while !self.at_end() && !self.is_statement_start() {
            if !self.peek_kind(&TokenKind::LParen) {
                self.pos += 1;
            } else if self.skip_group().is_err() {
                self.pos = self.tokens.len();
                return;
            }
        }
    }

    /// Skip the rest of an unmodeled statement, honoring CASE ... END nesting.
    fn skip_statement_tail(&mut self) -> PResult<()> {
        let mut case_depth = 0usize;
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::SemiColon {
                return Ok(());
            }
            if token.kind == TokenKind::LParen {
                self.skip_group()?;
                continue;
            }
            if token.is_keyword("CASE") {
                case_depth += 1;
            } else if token.is_keyword("END") && case_depth > 0 {
                case_depth -= 1;
                self.pos += 1;
                continue;
            } else if case_depth == 0 && self.is_statement_start() {
                return Ok(());
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn render_from(&self, start: usize) -> String {
        render(&self.tokens[start..self.pos.min(self.tokens.len())])
    }

    // -- statements -------------------------------------------------------

    fn parse_statement(&mut self, batch: &mut Batch) -> PResult<Option<Statement>> {
        let Some(token) = self.peek() else {
            return Ok(None);
        };
        if token.kind == TokenKind::SemiColon {
            self.pos += 1;
            return Ok(None);
        }
        if token.kind == TokenKind::LParen {
            self.skip_group()?;
            return Ok(None);
        }
        let Some(keyword) = token.keyword() else {
            self.pos += 1;
            return Ok(None);
        };
        match keyword.as_str() {
            "CREATE" | "ALTER" => {
                self.parse_create_header(batch)?;
                Ok(None)
            }
            "SELECT" => {
                let position = self.pos;
                let query = self.parse_query_expr(Vec::new())?;
                Ok(Some(Statement::Query { position, query }))
            }
            "WITH" if self.is_statement_start() => self.parse_with_statement(),
            "INSERT" => self.parse_insert(Vec::new()).map(|d| Some(Statement::Dml(d))),
            "UPDATE" => self
                .parse_update_or_delete(DmlKind::Update, Vec::new())
                .map(|d| Some(Statement::Dml(d))),
            "DELETE" => self
                .parse_update_or_delete(DmlKind::Delete, Vec::new())
                .map(|d| Some(Statement::Dml(d))),
            "MERGE" => self.parse_merge(Vec::new()).map(|d| Some(Statement::Dml(d))),
            "EXEC" | "EXECUTE" => Ok(self.parse_exec()?.map(Statement::Exec)),
            "RETURN" => self.parse_return(),
            "DECLARE" => self.parse_declare(),
            "SET" => self.parse_set(),
            _ => {
                self.pos += 1;
                Ok(None)
            }
        }
    }

    /// `CREATE [OR ALTER] PROC|PROCEDURE|FUNCTION name params ... AS`.
    fn parse_create_header(&mut self, batch: &mut Batch) -> PResult<()> {
        self.pos += 1;
        if self.eat_kw("OR") {
            self.expect_kw("ALTER")?;
        }
        let is_function = self.peek_kw("FUNCTION");
        if !(self.eat_kw("PROC") || self.eat_kw("PROCEDURE") || self.eat_kw("FUNCTION")) {
            return self.skip_statement_tail();
        }
        self.parse_object_name()?;
        if self.eat_kind(&TokenKind::SemiColon) {
            // Numbered procedure: `name;2`.
            self.advance();
        }
        let parenthesized = self.eat_kind(&TokenKind::LParen);
        while self.peek().is_some_and(|t| t.is_variable()) {
            let name = self.expect_ident()?;
            self.eat_kw("AS");
            let data_type = self.parse_data_type()?;
            if self.eat_kind(&TokenKind::Eq) {
                self.parse_expr()?;
            }
            while self.eat_kw("OUT")
                || self.eat_kw("OUTPUT")
                || self.eat_kw("READONLY")
                || self.eat_kw("VARYING")
            {}
            batch.parameters.push(VariableDecl {
                name,
                data_type,
                initializer: None,
            });
            if !self.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        if parenthesized {
            self.expect_kind(TokenKind::RParen, "')' after parameters")?;
        }
        if is_function && self.eat_kw("RETURNS") && self.peek().is_some_and(|t| t.is_variable()) {
            // Multi-statement TVF: `RETURNS @t TABLE (...)`.
            self.advance();
        }
        // Skip return type and WITH options up to the body's AS.
        while let Some(token) = self.peek() {
            if token.is_keyword("EXEC") || token.is_keyword("EXECUTE") {
                // `WITH EXECUTE AS OWNER` carries its own AS.
                self.pos += 1;
                if self.eat_kw("AS") {
                    self.advance();
                }
                continue;
            }
            if token.is_keyword("AS") {
                self.pos += 1;
                return Ok(());
            }
            if token.kind == TokenKind::LParen {
                self.skip_group()?;
                continue;
            }
            self.pos += 1;
        }
        Err(self.error("expected AS before the object body"))
    }

    fn parse_with_statement(&mut self) -> PResult<Option<Statement>> {
        let position = self.pos;
        let ctes = self.parse_ctes()?;
        let keyword = self.peek().and_then(|t| t.keyword()).unwrap_or_default();
        match keyword.as_str() {
            "SELECT" => {
                let query = self.parse_query_expr(ctes)?;
                Ok(Some(Statement::Query { position, query }))
            }
            "INSERT" => self.parse_insert(ctes).map(|d| Some(Statement::Dml(d))),
            "UPDATE" => self
                .parse_update_or_delete(DmlKind::Update, ctes)
                .map(|d| Some(Statement::Dml(d))),
            "DELETE" => self
                .parse_update_or_delete(DmlKind::Delete, ctes)
                .map(|d| Some(Statement::Dml(d))),
            "MERGE" => self.parse_merge(ctes).map(|d| Some(Statement::Dml(d))),
            _ => Err(self.error("expected statement after WITH")),
        }
    }

    fn parse_ctes(&mut self) -> PResult<Vec<Cte>> {
        self.expect_kw("WITH")?;
        let mut ctes = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let column_aliases = if self.peek_kind(&TokenKind::LParen) {
                self.parse_ident_list()?
            } else {
                Vec::new()
            };
            self.expect_kw("AS")?;
            self.expect_kind(TokenKind::LParen, "'(' before CTE body")?;
            let query = self.parse_query_expr_full()?;
            self.expect_kind(TokenKind::RParen, "')' after CTE body")?;
            ctes.push(Cte {
                name,
                column_aliases,
                query,
            });
            if !self.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        Ok(ctes)
    }

    fn parse_ident_list(&mut self) -> PResult<Vec<String>> {
        self.expect_kind(TokenKind::LParen, "'('")?;
        let mut names = vec![self.expect_ident()?];
        while self.eat_kind(&TokenKind::Comma) {
            names.push(self.expect_ident()?);
        }
        self.expect_kind(TokenKind::RParen, "')'")?;
        Ok(names)
    }

    fn eat_top_clause(&mut self) -> PResult<()> {
        if self.eat_kw("TOP") {
            if self.peek_kind(&TokenKind::LParen) {
                self.skip_group()?;
            } else {
                self.advance();
            }
            self.eat_kw("PERCENT");
            if self.peek_kw("WITH") && self.peek_kw_at(1, "TIES") {
                self.pos += 2;
            }
        }
        Ok(())
    }

    fn eat_table_hints(&mut self) -> PResult<()> {
        if self.peek_kw("WITH") && self.peek_kind_at(1, &TokenKind::LParen) {
            self.pos += 1;
            self.skip_group()?;
        }
        Ok(())
    }

    fn parse_insert(&mut self, ctes: Vec<Cte>) -> PResult<DmlStatement> {
        let position = self.pos;
        self.expect_kw("INSERT")?;
        self.eat_top_clause()?;
        self.eat_kw("INTO");
        let target = self.parse_object_name()?;
        self.eat_table_hints()?;
        let mut dml = DmlStatement {
            kind: DmlKind::Insert,
            position,
            ctes,
            target: Some(target),
            output: Vec::new(),
            output_into: false,
            source_query: None,
            source_exec: None,
        };
        if self.peek_kind(&TokenKind::LParen) && !self.peek_kw_at(1, "SELECT") {
            self.skip_group()?;
        }
        if self.peek_kw("OUTPUT") {
            self.parse_output_clause(&mut dml)?;
        }
        let keyword = self.peek().and_then(|t| t.keyword()).unwrap_or_default();
        match keyword.as_str() {
            "VALUES" => {
                self.pos += 1;
                loop {
                    if self.peek_kind(&TokenKind::LParen) {
                        self.skip_group()?;
                    } else {
                        return Err(self.error("expected '(' after VALUES"));
                    }
                    if !self.eat_kind(&TokenKind::Comma) {
                        break;
                    }
                }
            }
            "SELECT" | "WITH" => {
                dml.source_query = Some(Box::new(self.parse_query_expr_full()?));
            }
            "EXEC" | "EXECUTE" => {
                dml.source_exec = self.parse_exec()?;
            }
            "DEFAULT" => {
                self.pos += 1;
                self.expect_kw("VALUES")?;
            }
            _ if self.peek_kind(&TokenKind::LParen) => {
                self.pos += 1;
                dml.source_query = Some(Box::new(self.parse_query_expr_full()?));
                self.expect_kind(TokenKind::RParen, "')'")?;
            }
            _ => return Err(self.error("expected VALUES, SELECT or EXEC in INSERT")),
        }
        Ok(dml)
    }

    fn parse_update_or_delete(&mut self, kind: DmlKind, ctes: Vec<Cte>) -> PResult<DmlStatement> {
        let position = self.pos;
        self.pos += 1;
        self.eat_top_clause()?;
        if kind == DmlKind::Delete {
            self.eat_kw("FROM");
        }
        let target = self.parse_object_name()?;
        self.eat_table_hints()?;
        let mut dml = DmlStatement {
            kind: kind.clone(),
            position,
            ctes,
            target: Some(target),
            output: Vec::new(),
            output_into: false,
            source_query: None,
            source_exec: None,
        };
        if kind == DmlKind::Update {
            self.expect_kw("SET")?;
        }
        self.scan_dml_tail(&mut dml, false)?;
        Ok(dml)
    }

    fn parse_merge(&mut self, ctes: Vec<Cte>) -> PResult<DmlStatement> {
        let position = self.pos;
        self.expect_kw("MERGE")?;
        self.eat_top_clause()?;
        self.eat_kw("INTO");
        let target = self.parse_object_name()?;
        self.eat_table_hints()?;
        let mut dml = DmlStatement {
            kind: DmlKind::Merge,
            position,
            ctes,
            target: Some(target),
            output: Vec::new(),
            output_into: false,
            source_query: None,
            source_exec: None,
        };
        while !self.at_end() && !self.peek_kw("USING") {
            self.pos += 1;
        }
        self.expect_kw("USING")?;
        if self.peek_kind(&TokenKind::LParen)
            && (self.peek_kw_at(1, "SELECT") || self.peek_kw_at(1, "WITH"))
        {
            self.pos += 1;
            dml.source_query = Some(Box::new(self.parse_query_expr_full()?));
            self.expect_kind(TokenKind::RParen, "')' after MERGE source")?;
        }
        self.scan_dml_tail(&mut dml, true)?;
        Ok(dml)
    }

    /// Walk the remainder of a DML statement, capturing its OUTPUT clause.
    /// MERGE runs to its mandatory terminating semicolon.
    fn scan_dml_tail(&mut self, dml: &mut DmlStatement, until_semicolon: bool) -> PResult<()> {
        let mut case_depth = 0usize;
        while let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::SemiColon => return Ok(()),
                TokenKind::LParen => {
                    self.skip_group()?;
                    continue;
                }
                _ => {}
            }
            if token.is_keyword("OUTPUT") && case_depth == 0 {
                self.parse_output_clause(dml)?;
                continue;
            }
            if token.is_keyword("CASE") {
                case_depth += 1;
            } else if token.is_keyword("END") && case_depth > 0 {
                case_depth -= 1;
            } else if !until_semicolon && case_depth == 0 && self.is_statement_start() {
                return Ok(());
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn parse_output_clause(&mut self, dml: &mut DmlStatement) -> PResult<()> {
        self.expect_kw("OUTPUT")?;
        dml.output = self.parse_select_items()?;
        if self.eat_kw("INTO") {
            dml.output_into = true;
            if self.peek().is_some_and(|t| t.is_variable()) {
                self.advance();
            } else {
                self.parse_object_name()?;
            }
            if self.peek_kind(&TokenKind::LParen) {
                self.skip_group()?;
            }
        }
        Ok(())
    }

    fn parse_exec(&mut self) -> PResult<Option<ExecStatement>> {
        let position = self.pos;
        self.pos += 1;
        if self.eat_kw("AS") {
            // EXECUTE AS USER = '...' switches context; it calls nothing.
            self.skip_statement_tail()?;
            return Ok(None);
        }
        let target = if self.peek_kind(&TokenKind::LParen) {
            let start = self.pos;
            self.skip_group()?;
            ExecTarget::Dynamic(format!("EXEC {}", self.render_from(start)))
        } else if self.peek().is_some_and(|t| t.is_variable()) {
            if self.peek_kind_at(1, &TokenKind::Eq) {
                // `EXEC @rc = proc`
                self.pos += 2;
                self.parse_exec_name()?
            } else {
                let variable = self.expect_ident()?;
                ExecTarget::Dynamic(format!("EXEC {variable}"))
            }
        } else {
            self.parse_exec_name()?
        };
        if self.peek_kind(&TokenKind::SemiColon)
            && self
                .peek_at(1)
                .is_some_and(|t| matches!(t.kind, TokenKind::Number(_)))
        {
            self.pos += 2;
        }
        self.skip_exec_arguments()?;
        Ok(Some(ExecStatement { position, target }))
    }

    fn parse_exec_name(&mut self) -> PResult<ExecTarget> {
        let name = self.parse_object_name()?;
        if name.name().eq_ignore_ascii_case("sp_executesql") {
            return Ok(ExecTarget::Dynamic(name.qualified()));
        }
        Ok(ExecTarget::Procedure(name))
    }

    fn skip_exec_arguments(&mut self) -> PResult<()> {
        while let Some(token) = self.peek() {
            if token.kind == TokenKind::SemiColon {
                return Ok(());
            }
            if token.is_keyword("WITH") && self.peek_kw_at(1, "RESULT") {
                self.pos += 3;
                if self.peek_kind(&TokenKind::LParen) {
                    self.skip_group()?;
                }
                continue;
            }
            if token.kind == TokenKind::LParen {
                self.skip_group()?;
                continue;
            }
            if self.is_statement_start() {
                return Ok(());
            }
            self.pos += 1;
        }
        Ok(())
    }

    fn parse_return(&mut self) -> PResult<Option<Statement>> {
        let position = self.pos;
        self.pos += 1;
        if self.peek_kind(&TokenKind::LParen)
            && (self.peek_kw_at(1, "SELECT") || self.peek_kw_at(1, "WITH"))
        {
            self.pos += 1;
            let query = self.parse_query_expr_full()?;
            self.expect_kind(TokenKind::RParen, "')' after RETURN query")?;
            return Ok(Some(Statement::Return { position, query }));
        }
        if self.peek_kw("SELECT") || self.peek_kw("WITH") {
            let query = self.parse_query_expr_full()?;
            return Ok(Some(Statement::Return { position, query }));
        }
        // RETURN without a value is followed directly by the next statement.
        let has_value = self.peek().is_some_and(|t| match &t.kind {
            TokenKind::Word { .. } if t.is_variable() => true,
            TokenKind::Word { .. } => !t.keyword().is_some_and(|kw| {
                is_reserved(&kw) || STATEMENT_KEYWORDS.contains(&kw.as_str())
            }),
            TokenKind::SemiColon | TokenKind::RParen | TokenKind::Comma => false,
            _ => true,
        });
        if has_value {
            self.parse_expr()?;
        }
        Ok(None)
    }

    fn parse_declare(&mut self) -> PResult<Option<Statement>> {
        self.expect_kw("DECLARE")?;
        let mut decls = Vec::new();
        loop {
            if self.peek().is_some_and(|t| t.is_variable()) {
                let name = self.expect_ident()?;
                self.eat_kw("AS");
                let data_type = self.parse_data_type()?;
                if data_type.name.eq_ignore_ascii_case("TABLE") && self.peek_kind(&TokenKind::LParen) {
                    self.skip_group()?;
                }
                let initializer = if self.eat_kind(&TokenKind::Eq) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                decls.push(VariableDecl {
                    name,
                    data_type,
                    initializer,
                });
            } else if self.peek_kw_at(1, "CURSOR") {
                self.pos += 1;
                self.skip_cursor_definition()?;
                break;
            } else {
                return Err(self.error("expected variable or cursor declaration"));
            }
            if !self.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        if decls.is_empty() {
            return Ok(None);
        }
        Ok(Some(Statement::Declare(decls)))
    }

    /// `CURSOR [options] FOR select [FOR UPDATE [OF cols] | FOR READ ONLY]`.
    /// The cursor query feeds FETCH, not the caller, so it is discarded.
    fn skip_cursor_definition(&mut self) -> PResult<()> {
        self.expect_kw("CURSOR")?;
        while !self.at_end() && !self.peek_kw("FOR") {
            self.pos += 1;
        }
        self.expect_kw("FOR")?;
        self.parse_query_expr_full()?;
        if self.peek_kw("FOR") && (self.peek_kw_at(1, "UPDATE") || self.peek_kw_at(1, "READ")) {
            self.pos += 2;
            self.eat_kw("ONLY");
            if self.eat_kw("OF") {
                self.expect_ident()?;
                while self.eat_kind(&TokenKind::Comma) {
                    self.expect_ident()?;
                }
            }
        }
        Ok(())
    }

    fn parse_set(&mut self) -> PResult<Option<Statement>> {
        self.expect_kw("SET")?;
        let is_assignment = self.peek().is_some_and(|t| t.is_variable())
            && self.peek_at(1).is_some_and(|t| match &t.kind {
                TokenKind::Eq => true,
                TokenKind::Op(op) => op.ends_with('='),
                _ => false,
            });
        if !is_assignment {
            // SET NOCOUNT ON, SET XACT_ABORT ON, cursor variables, ...
            self.skip_statement_tail()?;
            return Ok(None);
        }
        let variable = self.expect_ident()?;
        self.pos += 1;
        if self.peek_kw("CURSOR") {
            self.skip_cursor_definition()?;
            return Ok(None);
        }
        let value = self.parse_expr()?;
        Ok(Some(Statement::Set { variable, value }))
    }

    // -- queries ----------------------------------------------------------

    fn parse_query_expr_full(&mut self) -> PResult<QueryExpr> {
        let ctes = if self.peek_kw("WITH") {
            self.parse_ctes()?
        } else {
            Vec::new()
        };
        self.parse_query_expr(ctes)
    }

    fn parse_query_expr(&mut self, ctes: Vec<Cte>) -> PResult<QueryExpr> {
        let start = self.pos;
        let mut body = self.parse_query_term()?;
        let mut set_operands = Vec::new();
        loop {
            if self.eat_kw("UNION") {
                self.eat_kw("ALL");
            } else if !(self.eat_kw("EXCEPT") || self.eat_kw("INTERSECT")) {
                break;
            }
            set_operands.push(self.parse_query_term()?);
        }
        if self.peek_kw("ORDER") && self.peek_kw_at(1, "BY") {
            self.pos += 2;
            self.parse_order_by_list()?;
        }
        if self.peek_kw("FOR") {
            if let Some(for_json) = self.parse_for_clause()? {
                body.for_json = Some(for_json);
            }
        }
        if self.peek_kw("OPTION") && self.peek_kind_at(1, &TokenKind::LParen) {
            self.pos += 1;
            self.skip_group()?;
        }
        body.text = self.render_from(start.max(body.position));
        Ok(QueryExpr {
            ctes,
            body,
            set_operands,
        })
    }

    fn parse_query_term(&mut self) -> PResult<QuerySpec> {
        if self.eat_kind(&TokenKind::LParen) {
            let inner = self.parse_query_expr_full()?;
            self.expect_kind(TokenKind::RParen, "')'")?;
            return Ok(inner.body);
        }
        self.parse_query_spec()
    }

    fn parse_order_by_list(&mut self) -> PResult<()> {
        loop {
            self.parse_expr()?;
            let _ = self.eat_kw("ASC") || self.eat_kw("DESC");
            if !self.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        if self.eat_kw("OFFSET") {
            self.parse_expr()?;
            let _ = self.eat_kw("ROW") || self.eat_kw("ROWS");
            if self.eat_kw("FETCH") {
                let _ = self.eat_kw("FIRST") || self.eat_kw("NEXT");
                self.parse_expr()?;
                let _ = self.eat_kw("ROW") || self.eat_kw("ROWS");
                self.expect_kw("ONLY")?;
            }
        }
        Ok(())
    }

    /// `FOR JSON ...`, `FOR XML ...` or `FOR BROWSE`. Returns the JSON options.
    fn parse_for_clause(&mut self) -> PResult<Option<ForJson>> {
        if self.peek_kw_at(1, "JSON") {
            self.pos += 2;
            let mut for_json = ForJson::default();
            if self.eat_kw("PATH") {
                for_json.path_mode = true;
            } else if !self.eat_kw("AUTO") {
                return Err(self.error("expected PATH or AUTO after FOR JSON"));
            }
            while self.eat_kind(&TokenKind::Comma) {
                let option = self.expect_ident()?.to_ascii_uppercase();
                match option.as_str() {
                    "ROOT" => {
                        for_json.root = Some("root".to_string());
                        if self.eat_kind(&TokenKind::LParen) {
                            if let Some(TokenKind::Str { value, .. }) = self.peek().map(|t| &t.kind) {
                                for_json.root = Some(value.clone());
                                self.pos += 1;
                            }
                            self.expect_kind(TokenKind::RParen, "')' after ROOT name")?;
                        }
                    }
                    "INCLUDE_NULL_VALUES" => for_json.include_null_values = true,
                    "WITHOUT_ARRAY_WRAPPER" => for_json.without_array_wrapper = true,
                    _ => return Err(self.error(format!("unknown FOR JSON option {option}"))),
                }
            }
            return Ok(Some(for_json));
        }
        if self.peek_kw_at(1, "XML") {
            self.pos += 2;
            loop {
                self.expect_ident()?;
                if self.peek_kind(&TokenKind::LParen) {
                    self.skip_group()?;
                }
                if !self.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
            return Ok(None);
        }
        if self.peek_kw_at(1, "BROWSE") {
            self.pos += 2;
        }
        Ok(None)
    }

    fn parse_query_spec(&mut self) -> PResult<QuerySpec> {
        let position = self.pos;
        self.expect_kw("SELECT")?;
        let _ = self.eat_kw("DISTINCT") || self.eat_kw("ALL");
        self.eat_top_clause()?;
        let items = self.parse_select_items()?;
        let mut spec = QuerySpec {
            position,
            items,
            ..QuerySpec::default()
        };
        if self.eat_kw("INTO") {
            spec.into = Some(self.parse_object_name()?);
        }
        if self.eat_kw("FROM") {
            spec.from = self.parse_from(&mut spec.predicates)?;
        }
        if self.eat_kw("WHERE") {
            let predicate = self.parse_expr()?;
            spec.predicates.push(predicate);
        }
        if self.peek_kw("GROUP") && self.peek_kw_at(1, "BY") {
            self.pos += 2;
            self.eat_kw("ALL");
            self.parse_expr_list()?;
            if self.peek_kw("WITH") && (self.peek_kw_at(1, "ROLLUP") || self.peek_kw_at(1, "CUBE")) {
                self.pos += 2;
            }
        }
        if self.eat_kw("HAVING") {
            let predicate = self.parse_expr()?;
            spec.predicates.push(predicate);
        }
        spec.text = self.render_from(position);
        Ok(spec)
    }

    fn parse_select_items(&mut self) -> PResult<Vec<SelectItem>> {
        let mut items = vec![self.parse_select_item()?];
        while self.eat_kind(&TokenKind::Comma) {
            items.push(self.parse_select_item()?);
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> PResult<SelectItem> {
        let Some(token) = self.peek() else {
            return Err(self.error("expected select item"));
        };
        let next_is_assign = self.peek_at(1).is_some_and(|t| match &t.kind {
            TokenKind::Eq => true,
            TokenKind::Op(op) => token.is_variable() && op.ends_with('=') && op.len() == 2,
            _ => false,
        });
        if token.is_variable() && next_is_assign {
            self.pos += 2;
            let expr = self.parse_expr()?;
            return Ok(SelectItem {
                expr,
                alias: None,
                assigns_variable: true,
            });
        }
        // T-SQL `Alias = expr` and `'Alias' = expr`.
        let alias_first = match &token.kind {
            TokenKind::Word { value, quoted } if (*quoted || !is_reserved(value)) && !token.is_variable() => {
                Some(value.clone())
            }
            TokenKind::Str { value, .. } => Some(value.clone()),
            _ => None,
        };
        if let Some(alias) = alias_first {
            if self.peek_kind_at(1, &TokenKind::Eq) {
                self.pos += 2;
                let expr = self.parse_expr()?;
                return Ok(SelectItem {
                    expr,
                    alias: Some(alias),
                    assigns_variable: false,
                });
            }
        }
        let expr = self.parse_expr()?;
        let alias = self.parse_column_alias()?;
        Ok(SelectItem {
            expr,
            alias,
            assigns_variable: false,
        })
    }

    fn parse_column_alias(&mut self) -> PResult<Option<String>> {
        if self.eat_kw("AS") {
            return match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Word { value, .. }) | Some(TokenKind::Str { value, .. }) => {
                    let alias = value.clone();
                    self.pos += 1;
                    Ok(Some(alias))
                }
                _ => Err(self.error("expected alias after AS")),
            };
        }
        match self.peek() {
            Some(token) => match &token.kind {
                TokenKind::Word { value, quoted }
                    if (*quoted || is_implicit_alias(value)) && !token.is_variable() =>
                {
                    let alias = value.clone();
                    self.pos += 1;
                    Ok(Some(alias))
                }
                TokenKind::Str { value, .. } => {
                    let alias = value.clone();
                    self.pos += 1;
                    Ok(Some(alias))
                }
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn parse_table_alias(&mut self) -> PResult<Option<String>> {
        if self.eat_kw("AS") {
            return self.expect_ident().map(Some);
        }
        match self.peek() {
            Some(token) => match &token.kind {
                TokenKind::Word { value, quoted }
                    if (*quoted || is_implicit_alias(value)) && !token.is_variable() =>
                {
                    let alias = value.clone();
                    self.pos += 1;
                    Ok(Some(alias))
                }
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn parse_from(&mut self, predicates: &mut Vec<Expr>) -> PResult<Vec<TableFactor>> {
        let mut factors = Vec::new();
        loop {
            self.parse_table_factor(&mut factors, predicates)?;
            loop {
                if self.peek_kw("CROSS") && (self.peek_kw_at(1, "JOIN") || self.peek_kw_at(1, "APPLY")) {
                    self.pos += 2;
                    self.parse_table_factor(&mut factors, predicates)?;
                } else if self.peek_kw("OUTER") && self.peek_kw_at(1, "APPLY") {
                    self.pos += 2;
                    self.parse_table_factor(&mut factors, predicates)?;
                } else if self.eat_join_keywords() {
                    self.parse_table_factor(&mut factors, predicates)?;
                    self.expect_kw("ON")?;
                    let condition = self.parse_expr()?;
                    predicates.push(condition);
                } else {
                    break;
                }
            }
            if !self.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
        Ok(factors)
    }

    /// `[INNER | {LEFT|RIGHT|FULL} [OUTER]] [HASH|LOOP|MERGE|REMOTE] JOIN`.
    fn eat_join_keywords(&mut self) -> bool {
        const JOIN_WORDS: &[&str] = &["INNER", "LEFT", "RIGHT", "FULL", "OUTER", "HASH", "LOOP", "MERGE", "REMOTE"];
        let mut offset = 0;
        while let Some(token) = self.peek_at(offset) {
            if token.is_keyword("JOIN") {
                self.pos += offset + 1;
                return true;
            }
            let is_join_word = token
                .keyword()
                .is_some_and(|kw| JOIN_WORDS.contains(&kw.as_str()));
            if !is_join_word || offset >= 3 {
                return false;
            }
            offset += 1;
        }
        false
    }

    fn parse_table_factor(
        &mut self,
        factors: &mut Vec<TableFactor>,
        predicates: &mut Vec<Expr>,
    ) -> PResult<()> {
        let Some(token) = self.peek() else {
            return Err(self.error("expected table source"));
        };
        if token.kind == TokenKind::LParen {
            if self.peek_kw_at(1, "SELECT") || self.peek_kw_at(1, "WITH") {
                self.pos += 1;
                let query = self.parse_query_expr_full()?;
                self.expect_kind(TokenKind::RParen, "')' after derived table")?;
                let alias = self.parse_table_alias()?;
                let column_aliases = if self.peek_kind(&TokenKind::LParen) {
                    self.parse_ident_list()?
                } else {
                    Vec::new()
                };
                factors.push(TableFactor::Derived {
                    query: Box::new(query),
                    alias,
                    column_aliases,
                });
                return Ok(());
            }
            // Parenthesized join tree.
            self.pos += 1;
            let inner = self.parse_from(predicates)?;
            self.expect_kind(TokenKind::RParen, "')' after joined tables")?;
            factors.extend(inner);
            return Ok(());
        }
        if token.is_variable() {
            let name = self.expect_ident()?;
            let alias = self.parse_table_alias()?;
            factors.push(TableFactor::TableVariable { name, alias });
            return Ok(());
        }
        if token.is_keyword("OPENJSON") && self.peek_kind_at(1, &TokenKind::LParen) {
            self.pos += 2;
            let args = self.parse_expr_list()?;
            self.expect_kind(TokenKind::RParen, "')' after OPENJSON arguments")?;
            let mut columns = Vec::new();
            if self.peek_kw("WITH") && self.peek_kind_at(1, &TokenKind::LParen) {
                self.pos += 2;
                loop {
                    let name = self.expect_ident()?;
                    let data_type = self.parse_data_type()?;
                    if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Str { .. })) {
                        self.pos += 1;
                    }
                    let as_json = self.peek_kw("AS") && self.peek_kw_at(1, "JSON");
                    if as_json {
                        self.pos += 2;
                    }
                    columns.push(OpenJsonColumn {
                        name,
                        data_type,
                        as_json,
                    });
                    if !self.eat_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_kind(TokenKind::RParen, "')' after OPENJSON columns")?;
            }
            let alias = self.parse_table_alias()?;
            factors.push(TableFactor::OpenJson {
                args,
                columns,
                alias,
            });
            return Ok(());
        }
        let name = self.parse_object_name()?;
        if self.eat_kind(&TokenKind::LParen) {
            let args = if self.peek_kind(&TokenKind::RParen) {
                Vec::new()
            } else {
                self.parse_expr_list()?
            };
            self.expect_kind(TokenKind::RParen, "')' after function arguments")?;
            let alias = self.parse_table_alias()?;
            factors.push(TableFactor::TableFunction { name, args, alias });
            return Ok(());
        }
        self.eat_table_hints()?;
        let alias = self.parse_table_alias()?;
        self.eat_table_hints()?;
        factors.push(TableFactor::Table { name, alias });
        Ok(())
    }

    fn parse_object_name(&mut self) -> PResult<ObjectName> {
        let mut parts = vec![self.expect_ident()?];
        while self.eat_kind(&TokenKind::Period) {
            if self.peek_kind(&TokenKind::Period) {
                // `db..table` skips the default schema.
                continue;
            }
            parts.push(self.expect_ident()?);
        }
        Ok(ObjectName(parts))
    }

    fn parse_data_type(&mut self) -> PResult<DataType> {
        let first = self.expect_ident()?;
        let (schema, mut name) = if self.eat_kind(&TokenKind::Period) {
            (Some(first), self.expect_ident()?)
        } else {
            (None, first)
        };
        if name.eq_ignore_ascii_case("DOUBLE") && self.eat_kw("PRECISION") {
            name = "float".to_string();
        }
        let mut data_type = DataType {
            schema,
            name,
            ..DataType::default()
        };
        if data_type.name.eq_ignore_ascii_case("TABLE") {
            return Ok(data_type);
        }
        if self.eat_kind(&TokenKind::LParen) {
            let first_arg = self.parse_type_argument()?;
            let second_arg = if self.eat_kind(&TokenKind::Comma) {
                self.parse_type_argument()?
            } else {
                None
            };
            self.expect_kind(TokenKind::RParen, "')' after type arguments")?;
            match data_type.name.to_ascii_lowercase().as_str() {
                "char" | "varchar" | "nchar" | "nvarchar" | "binary" | "varbinary" => {
                    data_type.length = first_arg;
                }
                "decimal" | "numeric" => {
                    data_type.precision = first_arg.and_then(|v| u8::try_from(v).ok());
                    data_type.scale = second_arg.and_then(|v| u8::try_from(v).ok());
                }
                "datetime2" | "time" | "datetimeoffset" => {
                    data_type.scale = first_arg.and_then(|v| u8::try_from(v).ok());
                }
                _ => {
                    data_type.precision = first_arg.and_then(|v| u8::try_from(v).ok());
                }
            }
        }
        Ok(data_type)
    }

    fn parse_type_argument(&mut self) -> PResult<Option<i32>> {
        let Some(token) = self.advance() else {
            return Err(self.error("expected type argument"));
        };
        match &token.kind {
            TokenKind::Word { value, .. } if value.eq_ignore_ascii_case("MAX") => Ok(Some(-1)),
            TokenKind::Number(value) => Ok(value.parse::<i32>().ok()),
            _ => Err(self.error("expected type length")),
        }
    }

    // -- expressions ------------------------------------------------------

    fn parse_expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr()?];
        while self.eat_kind(&TokenKind::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        let mut operands = vec![self.parse_unary()?];
        loop {
            let Some(token) = self.peek() else {
                break;
            };
            let is_operator = match &token.kind {
                TokenKind::Op(_) | TokenKind::Star | TokenKind::Eq => true,
                TokenKind::Word { quoted: false, .. } => {
                    let kw = token.keyword().unwrap_or_default();
                    match kw.as_str() {
                        "AND" | "OR" | "LIKE" | "IN" | "BETWEEN" | "ESCAPE" => true,
                        "IS" => {
                            self.pos += 1;
                            self.eat_kw("NOT");
                            operands.push(self.parse_unary()?);
                            continue;
                        }
                        "NOT" => {
                            self.pos += 1;
                            if !(self.eat_kw("IN") || self.eat_kw("LIKE") || self.eat_kw("BETWEEN")) {
                                return Err(self.error("expected IN, LIKE or BETWEEN after NOT"));
                            }
                            operands.push(self.parse_unary()?);
                            continue;
                        }
                        "COLLATE" => {
                            self.pos += 1;
                            self.expect_ident()?;
                            continue;
                        }
                        "AT" if self.peek_kw_at(1, "TIME") && self.peek_kw_at(2, "ZONE") => {
                            self.pos += 3;
                            operands.push(self.parse_unary()?);
                            continue;
                        }
                        _ => false,
                    }
                }
                _ => false,
            };
            if !is_operator {
                break;
            }
            self.pos += 1;
            operands.push(self.parse_unary()?);
        }
        if operands.len() == 1 {
            Ok(operands.remove(0))
        } else {
            Ok(Expr::Compound(operands))
        }
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if let Some(token) = self.peek() {
            let is_prefix = match &token.kind {
                TokenKind::Op(op) => matches!(op.as_str(), "-" | "+" | "~"),
                _ => token.is_keyword("NOT") || token.is_keyword("EXISTS"),
            };
            if is_prefix {
                self.pos += 1;
                return self.parse_unary();
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let Some(token) = self.peek() else {
            return Err(self.error("expected expression"));
        };
        match &token.kind {
            TokenKind::LParen => {
                self.pos += 1;
                if self.peek_kw("SELECT") || self.peek_kw("WITH") {
                    let query = self.parse_query_expr_full()?;
                    self.expect_kind(TokenKind::RParen, "')' after subquery")?;
                    return Ok(Expr::Subquery(Box::new(query)));
                }
                let mut list = self.parse_expr_list()?;
                self.expect_kind(TokenKind::RParen, "')'")?;
                if list.len() == 1 {
                    Ok(list.remove(0))
                } else {
                    Ok(Expr::Compound(list))
                }
            }
            TokenKind::Number(value) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Number(value.clone())))
            }
            TokenKind::Str { value, national } => {
                self.pos += 1;
                Ok(Expr::Literal(if *national {
                    Literal::NationalString(value.clone())
                } else {
                    Literal::String(value.clone())
                }))
            }
            TokenKind::Star => {
                self.pos += 1;
                Ok(Expr::Star(Vec::new()))
            }
            // MERGE ... OUTPUT $action
            TokenKind::Op(text) if text.starts_with('$') => {
                self.pos += 1;
                Ok(Expr::Column(vec![text.clone()]))
            }
            TokenKind::Word { value, quoted } => {
                if token.is_variable() {
                    self.pos += 1;
                    return Ok(Expr::Variable(value.clone()));
                }
                if !quoted {
                    let kw = value.to_ascii_uppercase();
                    match kw.as_str() {
                        "NULL" => {
                            self.pos += 1;
                            return Ok(Expr::Literal(Literal::Null));
                        }
                        "CASE" => return self.parse_case(),
                        "CAST" | "TRY_CAST" | "PARSE" | "TRY_PARSE" => return self.parse_cast(),
                        "CONVERT" | "TRY_CONVERT" => return self.parse_convert(),
                        "CURRENT_TIMESTAMP" | "CURRENT_USER" | "SESSION_USER" | "SYSTEM_USER" => {
                            self.pos += 1;
                            return Ok(Expr::Function {
                                name: ObjectName(vec![kw]),
                                args: Vec::new(),
                            });
                        }
                        "LEFT" | "RIGHT" if self.peek_kind_at(1, &TokenKind::LParen) => {}
                        _ if is_reserved(&kw) => {
                            return Err(self.error("expected expression"));
                        }
                        _ => {}
                    }
                }
                self.parse_name_expr()
            }
            _ => Err(self.error("unexpected token in expression")),
        }
    }

    fn parse_name_expr(&mut self) -> PResult<Expr> {
        let mut parts = vec![self.expect_ident()?];
        while self.eat_kind(&TokenKind::Period) {
            if self.eat_kind(&TokenKind::Star) {
                return Ok(Expr::Star(parts));
            }
            parts.push(self.expect_ident()?);
        }
        if !self.eat_kind(&TokenKind::LParen) {
            return Ok(Expr::Column(parts));
        }
        let mut args = Vec::new();
        if !self.peek_kind(&TokenKind::RParen) {
            let _ = self.eat_kw("DISTINCT") || self.eat_kw("ALL");
            if self.peek_kind(&TokenKind::Star) && self.peek_kind_at(1, &TokenKind::RParen) {
                self.pos += 1;
                args.push(Expr::Star(Vec::new()));
            } else {
                args = self.parse_expr_list()?;
            }
        }
        self.expect_kind(TokenKind::RParen, "')' after function arguments")?;
        if self.peek_kw("WITHIN") && self.peek_kw_at(1, "GROUP") {
            self.pos += 2;
            self.skip_group()?;
        }
        if self.eat_kw("OVER") {
            if self.peek_kind(&TokenKind::LParen) {
                self.skip_group()?;
            } else {
                self.expect_ident()?;
            }
        }
        Ok(Expr::Function {
            name: ObjectName(parts),
            args,
        })
    }

    fn parse_case(&mut self) -> PResult<Expr> {
        self.expect_kw("CASE")?;
        if !self.peek_kw("WHEN") {
            self.parse_expr()?;
        }
        let mut results = Vec::new();
        while self.eat_kw("WHEN") {
            self.parse_expr()?;
            self.expect_kw("THEN")?;
            results.push(self.parse_expr()?);
        }
        if self.eat_kw("ELSE") {
            results.push(self.parse_expr()?);
        }
        self.expect_kw("END")?;
        Ok(Expr::Case { results })
    }

    /// `CAST(expr AS type)`; `PARSE(expr AS type [USING culture])`.
    fn parse_cast(&mut self) -> PResult<Expr> {
        self.pos += 1;
        self.expect_kind(TokenKind::LParen, "'(' after CAST")?;
        let expr = self.parse_expr()?;
        self.expect_kw("AS")?;
        let data_type = self.parse_data_type()?;
        if self.eat_kw("USING") {
            self.parse_expr()?;
        }
        self.expect_kind(TokenKind::RParen, "')' after CAST")?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type,
        })
    }

    /// `CONVERT(type, expr [, style])`.
    fn parse_convert(&mut self) -> PResult<Expr> {
        self.pos += 1;
        self.expect_kind(TokenKind::LParen, "'(' after CONVERT")?;
        let data_type = self.parse_data_type()?;
        self.expect_kind(TokenKind::Comma, "',' in CONVERT")?;
        let expr = self.parse_expr()?;
        if self.eat_kind(&TokenKind::Comma) {
            self.parse_expr()?;
        }
        self.expect_kind(TokenKind::RParen, "')' after CONVERT")?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::lexer::tokenize;

    fn parse_sql(sql: &str) -> ParseOutput {
        parse(&tokenize(sql).unwrap())
    }

    fn first_query(output: &ParseOutput) -> &QueryExpr {
        output
            .batch
            .statements
            .iter()
            .find_map(|s| match s {
                Statement::Query { query, .. } => Some(query),
                _ => None,
            })
            .expect("query statement")
    }

    #[test]
    fn parses_procedure_header_and_body() {
        let output = parse_sql(
            "CREATE PROCEDURE dbo.GetUser @Id INT, @Name NVARCHAR(50) = NULL OUTPUT AS
             BEGIN
               SET NOCOUNT ON;
               SELECT u.Id, u.Name FROM dbo.Users u WHERE u.Id = @Id;
             END",
        );
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        assert_eq!(output.batch.parameters.len(), 2);
        assert_eq!(output.batch.parameters[1].data_type.length, Some(50));
        let query = first_query(&output);
        assert_eq!(query.body.items.len(), 2);
        assert_eq!(query.body.from.len(), 1);
        assert_eq!(query.body.from[0].alias(), Some("u"));
    }

    #[test]
    fn parses_for_json_options() {
        let output = parse_sql(
            "SELECT Id FROM dbo.Users ORDER BY Id FOR JSON PATH, ROOT('users'), WITHOUT_ARRAY_WRAPPER",
        );
        let for_json = first_query(&output).body.for_json.clone().unwrap();
        assert!(for_json.path_mode);
        assert!(for_json.without_array_wrapper);
        assert_eq!(for_json.root.as_deref(), Some("users"));
        assert!(first_query(&output).body.text.contains("WITHOUT_ARRAY_WRAPPER"));
    }

    #[test]
    fn parses_aliases_in_all_forms() {
        let output = parse_sql("SELECT a AS x, b y, Total = c + 1, 'Label' = d, e 'quoted' FROM t");
        let aliases: Vec<_> = first_query(&output)
            .body
            .items
            .iter()
            .map(|i| i.alias.clone())
            .collect();
        assert_eq!(
            aliases,
            vec![
                Some("x".to_string()),
                Some("y".to_string()),
                Some("Total".to_string()),
                Some("Label".to_string()),
                Some("quoted".to_string()),
            ]
        );
    }

    #[test]
    fn statement_keyword_is_not_an_implicit_alias() {
        let output = parse_sql("SELECT Users.Id FROM dbo.Users\nCLOSE c\nSELECT Name\nDEALLOCATE c");
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let queries: Vec<_> = output
            .batch
            .statements
            .iter()
            .filter_map(|s| match s {
                Statement::Query { query, .. } => Some(query),
                _ => None,
            })
            .collect();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].body.from[0].alias(), None);
        assert_eq!(queries[1].body.items[0].alias, None);
    }

    #[test]
    fn variable_assignment_select_is_flagged() {
        let output = parse_sql("SELECT @Count = COUNT(*) FROM dbo.Users");
        assert!(!first_query(&output).returns_rows());
    }

    #[test]
    fn exec_targets_and_dynamic_sql() {
        let output = parse_sql(
            "EXEC sales.GetOrders @CustomerId = 1;
             EXECUTE @rc = [dbo].[Audit] 'x';
             EXEC (@sql);
             EXEC sp_executesql @sql;
             EXECUTE AS USER = 'app';",
        );
        let targets: Vec<_> = output
            .batch
            .statements
            .iter()
            .filter_map(|s| match s {
                Statement::Exec(exec) => Some(exec.target.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(targets.len(), 4);
        assert_eq!(
            targets[0],
            ExecTarget::Procedure(ObjectName(vec!["sales".into(), "GetOrders".into()]))
        );
        assert_eq!(
            targets[1],
            ExecTarget::Procedure(ObjectName(vec!["dbo".into(), "Audit".into()]))
        );
        assert!(matches!(targets[2], ExecTarget::Dynamic(_)));
        assert!(matches!(targets[3], ExecTarget::Dynamic(_)));
    }

    #[test]
    fn insert_exec_and_output_clause() {
        let output = parse_sql(
            "INSERT INTO #t (Id) EXEC dbo.Load;
             INSERT INTO dbo.Users (Name) OUTPUT inserted.Id VALUES (N'x');",
        );
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let dmls: Vec<_> = output
            .batch
            .statements
            .iter()
            .filter_map(|s| match s {
                Statement::Dml(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(dmls.len(), 2);
        assert!(dmls[0].source_exec.is_some());
        assert_eq!(dmls[1].output.len(), 1);
        assert!(!dmls[1].output_into);
    }

    #[test]
    fn update_with_case_does_not_split_on_end() {
        let output = parse_sql(
            "UPDATE dbo.Users SET Status = CASE WHEN Active = 1 THEN 'A' ELSE 'I' END WHERE Id = 1
             SELECT 1 AS One",
        );
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        assert_eq!(output.batch.statements.len(), 2);
    }

    #[test]
    fn cursor_query_is_not_a_statement() {
        let output = parse_sql(
            "DECLARE c CURSOR LOCAL FOR SELECT Id FROM dbo.Users FOR UPDATE OF Name
             OPEN c",
        );
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        assert!(output.batch.statements.is_empty());
    }

    #[test]
    fn ctes_joins_and_openjson() {
        let output = parse_sql(
            "WITH active AS (SELECT Id, Name FROM dbo.Users WHERE Active = 1)
             SELECT a.Id, j.Qty
             FROM active a
             LEFT OUTER JOIN dbo.Orders o WITH (NOLOCK) ON o.UserId = a.Id
             CROSS APPLY OPENJSON(@json) WITH (Qty INT '$.qty', Meta NVARCHAR(MAX) AS JSON) j",
        );
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        let query = first_query(&output);
        assert_eq!(query.ctes.len(), 1);
        assert_eq!(query.body.from.len(), 3);
        match &query.body.from[2] {
            TableFactor::OpenJson { columns, alias, .. } => {
                assert_eq!(columns.len(), 2);
                assert!(columns[1].as_json);
                assert_eq!(alias.as_deref(), Some("j"));
            }
            other => panic!("unexpected factor {other:?}"),
        }
    }

    #[test]
    fn grammar_error_recovers_at_next_statement() {
        let output = parse_sql("SELECT FROM dbo.Users; SELECT Id FROM dbo.Users");
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.batch.statements.len(), 1);
    }

    #[test]
    fn scalar_function_return_query() {
        let output = parse_sql(
            "CREATE FUNCTION dbo.UserJson(@Id INT) RETURNS NVARCHAR(MAX) WITH SCHEMABINDING AS
             BEGIN
               RETURN (SELECT Id, Name FROM dbo.Users WHERE Id = @Id FOR JSON PATH, WITHOUT_ARRAY_WRAPPER)
             END",
        );
        assert!(output.errors.is_empty(), "{:?}", output.errors);
        assert_eq!(output.batch.parameters.len(), 1);
        assert!(matches!(output.batch.statements[0], Statement::Return { .. }));
    }
}
