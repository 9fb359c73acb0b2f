//! Turns raw engine responses into result tables.

use crate::codec::CommandKind;
use crate::constants::{TAPI_ANSWER, TAPI_DELIMITER, TAPI_EOT, TAPI_ERROR, TAPI_NULL};
use crate::error::{Error, Result};
use crate::schema;
use crate::table::{Column, ResultTable};

/// What a command produced
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Row-returning query or catalog listing
    Rows(ResultTable),
    /// DDL/DML, with the number of rows the engine reported as affected
    Affected(u64),
    /// Plain-text response of a session or batch command
    Text(String),
}

impl Outcome {
    pub fn into_table(self) -> ResultTable {
        match self {
            Outcome::Rows(table) => table,
            Outcome::Affected(_) | Outcome::Text(_) => ResultTable::no_result(),
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            Outcome::Affected(n) => Some(*n),
            _ => None,
        }
    }
}

/// Line cursor that remembers 1-based line numbers for error messages
pub(crate) struct ResponseLines<'a> {
    lines: std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>,
    last: usize,
}

impl<'a> ResponseLines<'a> {
    pub(crate) fn new(raw: &'a str) -> Self {
        Self {
            lines: raw.lines().enumerate().peekable(),
            last: 0,
        }
    }

    pub(crate) fn line_number(&self) -> usize {
        self.last
    }

    pub(crate) fn peek(&mut self) -> Option<&'a str> {
        self.lines.peek().map(|&(_, line)| line.trim_end_matches('\r'))
    }

    /// Next line, or a parse error naming what was expected
    pub(crate) fn expect(&mut self, what: &str) -> Result<&'a str> {
        self.next()
            .ok_or_else(|| Error::parse(self.last + 1, format!("response ended, expected {}", what)))
    }

    pub(crate) fn skip_blank(&mut self) {
        while matches!(self.peek(), Some(line) if line.trim().is_empty()) {
            self.next();
        }
    }
}

impl<'a> Iterator for ResponseLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let (index, line) = self.lines.next()?;
        self.last = index + 1;
        Some(line.trim_end_matches('\r'))
    }
}

/// Parses engine responses according to the command that produced them
pub struct ResultSetBuilder;

impl ResultSetBuilder {
    pub fn build(kind: CommandKind, raw: &str) -> Result<Outcome> {
        match kind {
            CommandKind::Query => Self::build_query(raw),
            CommandKind::Schema => {
                let relations = schema::parse_schema(raw)?;
                Ok(Outcome::Rows(crate::catalog::columns_table(&relations)?))
            }
            CommandKind::Batch | CommandKind::Plain => {
                check_plain_error(raw)?;
                Ok(Outcome::Text(raw.to_string()))
            }
            CommandKind::Quit => Ok(Outcome::Text(String::new())),
        }
    }

    /// Parse a TAPI response to a query
    pub fn build_query(raw: &str) -> Result<Outcome> {
        let mut lines = ResponseLines::new(raw);
        lines.skip_blank();
        let status = lines.expect("a status line")?.trim();

        if status == TAPI_ANSWER {
            return Self::parse_answer(&mut lines).map(Outcome::Rows);
        }
        if status == TAPI_ERROR || status.starts_with("Error:") {
            return Err(Error::Engine(error_message(status, &mut lines)));
        }
        Ok(Outcome::Affected(affected_rows(status, lines)))
    }

    /// Convenience for callers that only accept row results
    pub fn build_table(raw: &str) -> Result<ResultTable> {
        Self::build_query(raw).map(Outcome::into_table)
    }

    fn parse_answer(lines: &mut ResponseLines<'_>) -> Result<ResultTable> {
        let mut columns = Vec::new();
        loop {
            let qualified = lines.expect("a column name or $")?.trim();
            if qualified == TAPI_DELIMITER {
                break;
            }
            if qualified == TAPI_EOT {
                return Err(Error::parse(lines.line_number(), "$eot inside the column header"));
            }
            let type_token = lines.expect("a column type")?.trim();
            columns.push(Column::from_header(qualified, type_token));
        }

        let mut table = ResultTable::new(columns);
        let width = table.columns().len();

        loop {
            let first = lines.expect("a row or $eot")?;
            if first.trim() == TAPI_EOT {
                break;
            }
            if width == 0 {
                return Err(Error::parse(lines.line_number(), "row data without columns"));
            }

            let mut row = Vec::with_capacity(width);
            row.push(parse_cell(first));
            for _ in 1..width {
                let cell = lines.expect("a cell")?;
                if cell.trim() == TAPI_DELIMITER {
                    return Err(Error::parse(
                        lines.line_number(),
                        format!("row has {} cells, expected {}", row.len(), width),
                    ));
                }
                row.push(parse_cell(cell));
            }

            let end = lines.expect("$ after a row")?;
            if end.trim() != TAPI_DELIMITER {
                return Err(Error::parse(
                    lines.line_number(),
                    format!("row has more than {} cells", width),
                ));
            }
            table.push_row(row)?;
        }

        Ok(table)
    }
}

/// `null` is a null cell; quoted literals lose their quotes
pub(crate) fn parse_cell(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value == TAPI_NULL {
        return None;
    }
    Some(unquote(value))
}

pub(crate) fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        value[1..value.len() - 1].replace("''", "'")
    } else {
        value.to_string()
    }
}

fn error_message(status: &str, lines: &mut ResponseLines<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if status != TAPI_ERROR {
        parts.push(status);
    }
    for line in lines {
        let line = line.trim();
        if line == TAPI_EOT {
            break;
        }
        if !line.is_empty() && line != TAPI_DELIMITER {
            parts.push(line);
        }
    }
    if parts.is_empty() {
        "unspecified engine error".to_string()
    } else {
        parts.join(" ")
    }
}

// Affected-row count from a non-answer response: either a bare number on
// its own line or an "Info: <n> tuple(s) ..." message.
fn affected_rows<'a>(status: &'a str, rest: impl Iterator<Item = &'a str>) -> u64 {
    std::iter::once(status)
        .chain(rest)
        .map(str::trim)
        .take_while(|line| *line != TAPI_EOT)
        .find_map(|line| {
            if let Ok(n) = line.parse::<u64>() {
                return Some(n);
            }
            let info = line.strip_prefix("Info:")?.trim();
            let mut words = info.split_whitespace();
            let n = words.next()?.parse::<u64>().ok()?;
            words.next()?.starts_with("tuple").then_some(n)
        })
        .unwrap_or(0)
}

fn check_plain_error(raw: &str) -> Result<()> {
    match raw.lines().map(str::trim).find(|l| l.starts_with("Error:")) {
        Some(line) => Err(Error::Engine(line.trim_start_matches("Error:").trim().to_string())),
        None => Ok(()),
    }
}
