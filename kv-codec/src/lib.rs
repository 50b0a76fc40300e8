//! # Textual Record Codec
//!
//! Whitespace-delimited import/export format used by the `UPLOAD`/`EXPORT`
//! REPL commands: one record per line, `key "lastname" "name" year "city"
//! coins`. Quotes may wrap any of the six fields and are stripped on read;
//! fields that need a literal space (names, cities) use them on write.
//!
//! Ported field-for-field from the original tokenizer
//! (`Data::tokenizer`/`Data::eraseOneWord`/`Data::parseOneStr`): a field may
//! start with `"` without closing on the same whitespace-delimited token, in
//! which case subsequent tokens are rejoined with single spaces until one of
//! them contains the closing `"`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use kv_common::{Key, StoreError, StoreResult, Value};

/// Loads every record from `path`.
///
/// Empty lines are skipped. Fewer than six whitespace-delimited fields on a
/// line, an unterminated quoted field, or a non-integer `birth_year`/`coins`
/// all fail the whole load with [`StoreError::CorruptedFile`]. A file that
/// yields zero records (including an empty file) is also corrupted: there is
/// no such thing as a successful empty import.
pub fn load(path: &Path) -> StoreResult<Vec<(Key, Value)>> {
    let file = File::open(path).map_err(|_| StoreError::CannotOpenFile)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|_| StoreError::CannotOpenFile)?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(parse_record(&line)?);
    }

    if records.is_empty() {
        return Err(StoreError::corrupted("file contained no records"));
    }

    tracing::debug!(count = records.len(), path = %path.display(), "loaded records");
    Ok(records)
}

/// Writes `records` to `path`, one per line, quoting the three text fields.
///
/// Returns the number of records written. Deadlines are never part of the
/// textual format and are not preserved across a save/load round trip.
pub fn save(path: &Path, records: &[(Key, Value)]) -> StoreResult<usize> {
    let file = File::create(path).map_err(|_| StoreError::CannotOpenFile)?;
    let mut writer = BufWriter::new(file);

    for (key, value) in records {
        writeln!(
            writer,
            "{} \"{}\" \"{}\" {} \"{}\" {}",
            key, value.lastname, value.name, value.birth_year, value.city, value.coins
        )
        .map_err(|_| StoreError::CannotOpenFile)?;
    }
    writer.flush().map_err(|_| StoreError::CannotOpenFile)?;

    tracing::debug!(count = records.len(), path = %path.display(), "saved records");
    Ok(records.len())
}

fn parse_record(line: &str) -> StoreResult<(Key, Value)> {
    let raw: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    if raw.len() < 6 {
        return Err(StoreError::corrupted("line has fewer than six fields"));
    }
    let mut tokens: VecDeque<String> = raw.into();

    let key = take_field(&mut tokens)?;
    let lastname = take_field(&mut tokens)?;
    let name = take_field(&mut tokens)?;
    let birth_year = take_field(&mut tokens)?
        .parse()
        .map_err(|_| StoreError::corrupted("birth year is not an integer"))?;
    let city = take_field(&mut tokens)?;
    let coins = take_field(&mut tokens)?
        .parse()
        .map_err(|_| StoreError::corrupted("coins is not an integer"))?;

    Ok((key, Value::new(lastname, name, birth_year, city, coins)))
}

/// Pops one logical field off `tokens`, rejoining a multi-token quoted run.
fn take_field(tokens: &mut VecDeque<String>) -> StoreResult<String> {
    let first = tokens
        .pop_front()
        .ok_or_else(|| StoreError::corrupted("missing field"))?;

    let unterminated_quote = first.starts_with('"') && (!first.ends_with('"') || first.len() == 1);
    if !unterminated_quote {
        return Ok(first.replace('"', ""));
    }

    let mut combined = first;
    loop {
        let next = tokens
            .pop_front()
            .ok_or_else(|| StoreError::corrupted("unterminated quoted field"))?;
        let closes_quote = next.contains('"');
        combined.push(' ');
        combined.push_str(&next);
        if closes_quote {
            break;
        }
    }
    Ok(combined.replace('"', ""))
}
