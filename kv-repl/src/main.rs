//! # Record Store REPL
//!
//! A synchronous stdin/stdout command loop exercising [`kv_engine`]'s two
//! storage engines. No networking: the teacher's TCP/RESP front end in
//! `hkv-server` is generalized down to a plain REPL since this system has no
//! network surface to build.
//!
//! Session shape: pick an engine, then issue commands until `RETURN` (back
//! to the engine menu) or end-of-input (process exit).

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use kv_common::{ParamMask, StoreError, Value};
use kv_engine::{HashEngine, RbTreeEngine, StorageEngine};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut stdout = io::stdout();

    loop {
        writeln!(stdout, "Select engine: 1) hash table  2) red-black tree")?;
        stdout.flush()?;

        let Some(choice) = next_line(&mut lines)? else {
            break;
        };
        let engine: Arc<dyn StorageEngine> = match choice.trim() {
            "1" => HashEngine::new(),
            "2" => RbTreeEngine::new(),
            other => {
                writeln!(stdout, "unknown engine choice: {other}")?;
                continue;
            }
        };
        tracing::info!(choice = choice.trim(), "engine selected");

        if !run_session(&engine, &mut lines, &mut stdout)? {
            break;
        }
    }
    Ok(())
}

fn next_line(lines: &mut impl Iterator<Item = io::Result<String>>) -> Result<Option<String>> {
    match lines.next() {
        Some(line) => Ok(Some(line.context("reading from stdin")?)),
        None => Ok(None),
    }
}

/// Runs one engine session. Returns `false` on end-of-input (the whole
/// process should exit) and `true` on `RETURN` (back to the engine menu).
fn run_session(
    engine: &Arc<dyn StorageEngine>,
    lines: &mut impl Iterator<Item = io::Result<String>>,
    out: &mut impl Write,
) -> Result<bool> {
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = next_line(lines)? else {
            return Ok(false);
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let tokens = match tokenize_line(line) {
            Ok(tokens) => tokens,
            Err(reason) => {
                writeln!(out, "error: {reason}")?;
                continue;
            }
        };
        let Some((command, args)) = tokens.split_first() else {
            continue;
        };

        match command.to_ascii_uppercase().as_str() {
            "RETURN" => return Ok(true),
            "HELP" => print_help(out)?,
            "SET" => cmd_set(engine, args, out)?,
            "GET" => cmd_get(engine, args, out)?,
            "EXISTS" => cmd_exists(engine, args, out)?,
            "DEL" => cmd_del(engine, args, out)?,
            "UPDATE" => cmd_update(engine, args, out)?,
            "KEYS" => cmd_keys(engine, out)?,
            "RENAME" => cmd_rename(engine, args, out)?,
            "TTL" => cmd_ttl(engine, args, out)?,
            "FIND" => cmd_find(engine, args, out)?,
            "SHOWALL" => cmd_showall(engine, out)?,
            "UPLOAD" => cmd_upload(engine, args, out)?,
            "EXPORT" => cmd_export(engine, args, out)?,
            other => writeln!(out, "unknown command: {other}")?,
        }
    }
}

/// Splits a trailing `EX <seconds>` pair off the end of `args`, if present.
fn split_ex(args: &[String]) -> (Vec<String>, Option<i64>) {
    if args.len() >= 2 && args[args.len() - 2].eq_ignore_ascii_case("EX") {
        let ttl = args[args.len() - 1].parse().ok();
        (args[..args.len() - 2].to_vec(), ttl)
    } else {
        (args.to_vec(), None)
    }
}

fn contract_error_message(err: &StoreError) -> String {
    match err {
        StoreError::KeyNotFound => "KeyNotFound".to_string(),
        StoreError::KeyAlreadyExists => "KeyAlreadyExists".to_string(),
        StoreError::HasNoTtl => "HasNoTtl".to_string(),
        other => other.code().to_string(),
    }
}

fn format_fields(value: &Value) -> String {
    format!(
        "{} {} {} {} {}",
        value.lastname, value.name, value.birth_year, value.city, value.coins
    )
}

fn cmd_set(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let (fields, ttl) = split_ex(args);
    if fields.len() != 6 {
        writeln!(out, "usage: SET key lastname name year city coins [EX seconds]")?;
        return Ok(());
    }
    let Ok(birth_year) = fields[3].parse::<i64>() else {
        writeln!(out, "year must be an integer")?;
        return Ok(());
    };
    let Ok(coins) = fields[5].parse::<i64>() else {
        writeln!(out, "coins must be an integer")?;
        return Ok(());
    };
    let value = Value::new(fields[1].clone(), fields[2].clone(), birth_year, fields[4].clone(), coins);
    match engine.set(fields[0].clone(), value, ttl.unwrap_or(0)) {
        Ok(()) => writeln!(out, "OK")?,
        Err(e) => writeln!(out, "{}", contract_error_message(&e))?,
    }
    Ok(())
}

fn cmd_get(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let [key] = args else {
        writeln!(out, "usage: GET key")?;
        return Ok(());
    };
    match engine.get(key) {
        Some(value) => writeln!(out, "{}", format_fields(&value))?,
        None => writeln!(out, "(null)")?,
    }
    Ok(())
}

fn cmd_exists(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let [key] = args else {
        writeln!(out, "usage: EXISTS key")?;
        return Ok(());
    };
    writeln!(out, "{}", engine.exists(key))?;
    Ok(())
}

fn cmd_del(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let [key] = args else {
        writeln!(out, "usage: DEL key")?;
        return Ok(());
    };
    match engine.del(key) {
        Ok(()) => writeln!(out, "OK")?,
        Err(e) => writeln!(out, "{}", contract_error_message(&e))?,
    }
    Ok(())
}

fn cmd_update(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let (fields, ttl) = split_ex(args);
    if fields.len() != 6 {
        writeln!(out, "usage: UPDATE key lastname name year city coins [EX seconds]")?;
        return Ok(());
    }
    let key = &fields[0];
    let mut mask = ParamMask::NONE;
    let mut value = Value::default();

    if fields[1] != "-" {
        mask |= ParamMask::LASTNAME;
        value.lastname = fields[1].clone();
    }
    if fields[2] != "-" {
        mask |= ParamMask::NAME;
        value.name = fields[2].clone();
    }
    if fields[3] != "-" {
        let Ok(year) = fields[3].parse::<i64>() else {
            writeln!(out, "year must be an integer or -")?;
            return Ok(());
        };
        mask |= ParamMask::BIRTH_YEAR;
        value.birth_year = year;
    }
    if fields[4] != "-" {
        mask |= ParamMask::CITY;
        value.city = fields[4].clone();
    }
    if fields[5] != "-" {
        let Ok(coins) = fields[5].parse::<i64>() else {
            writeln!(out, "coins must be an integer or -")?;
            return Ok(());
        };
        mask |= ParamMask::COINS;
        value.coins = coins;
    }
    let ttl_arg = if ttl.is_some() {
        mask |= ParamMask::TTL;
        ttl.unwrap()
    } else {
        0
    };

    match engine.update(key, &value, ttl_arg, mask) {
        Ok(()) => writeln!(out, "OK")?,
        Err(e) => writeln!(out, "{}", contract_error_message(&e))?,
    }
    Ok(())
}

fn cmd_keys(engine: &Arc<dyn StorageEngine>, out: &mut impl Write) -> Result<()> {
    let keys = engine.keys();
    if keys.is_empty() {
        writeln!(out, "(empty)")?;
    } else {
        for key in keys {
            writeln!(out, "{key}")?;
        }
    }
    Ok(())
}

fn cmd_rename(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let [old, new] = args else {
        writeln!(out, "usage: RENAME old new")?;
        return Ok(());
    };
    match engine.rename(old, new) {
        Ok(()) => writeln!(out, "OK")?,
        Err(e) => writeln!(out, "{}", contract_error_message(&e))?,
    }
    Ok(())
}

fn cmd_ttl(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let [key] = args else {
        writeln!(out, "usage: TTL key")?;
        return Ok(());
    };
    match engine.ttl(key) {
        Ok(secs) => writeln!(out, "{secs}")?,
        Err(e) => writeln!(out, "{}", e.code())?,
    }
    Ok(())
}

fn cmd_find(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let (fields, ttl) = split_ex(args);
    if fields.len() != 5 {
        writeln!(out, "usage: FIND lastname name year city coins [EX seconds]")?;
        return Ok(());
    }
    let mut mask = ParamMask::NONE;
    let mut value = Value::default();

    if fields[0] != "-" {
        mask |= ParamMask::LASTNAME;
        value.lastname = fields[0].clone();
    }
    if fields[1] != "-" {
        mask |= ParamMask::NAME;
        value.name = fields[1].clone();
    }
    if fields[2] != "-" {
        let Ok(year) = fields[2].parse::<i64>() else {
            writeln!(out, "year must be an integer or -")?;
            return Ok(());
        };
        mask |= ParamMask::BIRTH_YEAR;
        value.birth_year = year;
    }
    if fields[3] != "-" {
        mask |= ParamMask::CITY;
        value.city = fields[3].clone();
    }
    if fields[4] != "-" {
        let Ok(coins) = fields[4].parse::<i64>() else {
            writeln!(out, "coins must be an integer or -")?;
            return Ok(());
        };
        mask |= ParamMask::COINS;
        value.coins = coins;
    }
    let ttl_arg = if ttl.is_some() {
        mask |= ParamMask::TTL;
        ttl.unwrap()
    } else {
        0
    };

    let found = engine.find(&value, ttl_arg, mask);
    if found.is_empty() {
        writeln!(out, "(empty)")?;
    } else {
        for key in found {
            writeln!(out, "{key}")?;
        }
    }
    Ok(())
}

fn cmd_showall(engine: &Arc<dyn StorageEngine>, out: &mut impl Write) -> Result<()> {
    let records = engine.showall();
    if records.is_empty() {
        writeln!(out, "(empty)")?;
    } else {
        for (key, value) in records {
            writeln!(out, "{key} {}", format_fields(&value))?;
        }
    }
    Ok(())
}

fn cmd_upload(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let [path] = args else {
        writeln!(out, "usage: UPLOAD path")?;
        return Ok(());
    };
    match engine.import(Path::new(path)) {
        Ok(count) => writeln!(out, "{count}")?,
        Err(e) => writeln!(out, "{}", e.code())?,
    }
    Ok(())
}

fn cmd_export(engine: &Arc<dyn StorageEngine>, args: &[String], out: &mut impl Write) -> Result<()> {
    let [path] = args else {
        writeln!(out, "usage: EXPORT path")?;
        return Ok(());
    };
    match engine.export(Path::new(path)) {
        Ok(count) => writeln!(out, "{count}")?,
        Err(e) => writeln!(out, "{}", e.code())?,
    }
    Ok(())
}

fn print_help(out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "\
SET key lastname name year city coins [EX seconds]
GET key
EXISTS key
DEL key
UPDATE key lastname name year city coins [EX seconds]   (- skips a field)
KEYS
RENAME old new
TTL key
FIND lastname name year city coins [EX seconds]         (- skips a field)
SHOWALL
UPLOAD path
EXPORT path
HELP
RETURN"
    )?;
    Ok(())
}

/// Whitespace tokenizer honoring double-quoted multi-word fields, the same
/// quoting rule the textual codec applies to file records (see
/// `kv_codec::load`), applied here to one command line instead of one
/// record line.
fn tokenize_line(line: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut tokens: VecDeque<String> = line.split_whitespace().map(str::to_string).collect();
    let mut fields = Vec::new();

    while let Some(first) = tokens.pop_front() {
        let unterminated_quote = first.starts_with('"') && (!first.ends_with('"') || first.len() == 1);
        if !unterminated_quote {
            fields.push(first.replace('"', ""));
            continue;
        }

        let mut combined = first;
        loop {
            let Some(next) = tokens.pop_front() else {
                return Err("unterminated quoted field");
            };
            let closes_quote = next.contains('"');
            combined.push(' ');
            combined.push_str(&next);
            if closes_quote {
                break;
            }
        }
        fields.push(combined.replace('"', ""));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_plain_command() {
        let tokens = tokenize_line("SET user1 Smith John 1990 NYC 100").unwrap();
        assert_eq!(
            tokens,
            vec!["SET", "user1", "Smith", "John", "1990", "NYC", "100"]
        );
    }

    #[test]
    fn tokenizes_quoted_city() {
        let tokens = tokenize_line(r#"SET user2 Doe Jane 1985 "Los Angeles" 50"#).unwrap();
        assert_eq!(tokens[5], "Los Angeles");
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(tokenize_line(r#"SET user2 Doe Jane 1985 "Los Angeles 50"#).is_err());
    }

    #[test]
    fn split_ex_extracts_trailing_pair() {
        let args: Vec<String> = ["k", "l", "n", "1", "c", "5", "EX", "10"]
            .into_iter()
            .map(String::from)
            .collect();
        let (fields, ttl) = split_ex(&args);
        assert_eq!(fields, vec!["k", "l", "n", "1", "c", "5"]);
        assert_eq!(ttl, Some(10));
    }

    #[test]
    fn split_ex_leaves_args_untouched_without_ex() {
        let args: Vec<String> = ["k", "l", "n", "1", "c", "5"].into_iter().map(String::from).collect();
        let (fields, ttl) = split_ex(&args);
        assert_eq!(fields, args);
        assert_eq!(ttl, None);
    }
}
