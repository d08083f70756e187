//! Line-oriented database description loader.
//!
//! The accepted surface is the classic control-system database format:
//! whitespace-separated tokens `name superclass class type value...`,
//! `#` comment lines, and the `!include` / `!return` / `!load` directives.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::database::Database;
use super::driver::{Driver, DriverTable, FieldTemplate};
use super::error::{Error, Result};
use super::field::{DataType, FieldFlags, FieldRef, FieldValue, ValueData};
use super::record::RecordFlags;
use super::RecordId;
use super::Superclass;

/// Split one description line into tokens.
///
/// Double quotes group a token that contains whitespace; `""` produces an
/// empty token. There is no escape syntax.
pub fn split_tokens(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut token_started = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                token_started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if token_started {
                    tokens.push(std::mem::take(&mut current));
                    token_started = false;
                }
            }
            c => {
                current.push(c);
                token_started = true;
            }
        }
    }
    if in_quotes {
        return Err(Error::Syntax(format!("unterminated quote in '{line}'")));
    }
    if token_started {
        tokens.push(current);
    }
    Ok(tokens)
}

impl Database {
    /// Load a description from an in-memory sequence of lines.
    ///
    /// Parsing only; call [`Database::finish_load`] afterwards to run the
    /// fixup pass and late initialization.
    pub fn load_lines<'a, I>(&mut self, drivers: &DriverTable, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in lines {
            if !self.load_line(drivers, line, None)? {
                break;
            }
        }
        Ok(())
    }

    /// Load a description file, following `!include` directives.
    pub fn load_file(&mut self, drivers: &DriverTable, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)?;
        let base_dir = path.parent().map(Path::to_path_buf);
        for line in text.lines() {
            if !self.load_line(drivers, line, base_dir.as_deref())? {
                break;
            }
        }
        Ok(())
    }

    /// Process one line. Returns `false` when a `!return` directive ends
    /// the current file.
    fn load_line(
        &mut self,
        drivers: &DriverTable,
        line: &str,
        base_dir: Option<&Path>,
    ) -> Result<bool> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(true);
        }
        if let Some(rest) = trimmed.strip_prefix('!') {
            return self.load_directive(drivers, rest.trim(), base_dir);
        }
        let tokens = split_tokens(trimmed)?;
        match self.parse_record_description(drivers, &tokens) {
            Ok(id) => {
                debug!(record = self.record(id)?.name(), "parsed record description");
                Ok(true)
            }
            Err(err) => {
                if self.delete_broken_on_load() {
                    warn!(%err, line = trimmed, "skipping malformed record description");
                    Ok(true)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn load_directive(
        &mut self,
        drivers: &DriverTable,
        directive: &str,
        base_dir: Option<&Path>,
    ) -> Result<bool> {
        if directive == "return" {
            return Ok(false);
        }
        if let Some(target) = directive.strip_prefix("include") {
            let target = target.trim().trim_matches('"');
            if target.is_empty() {
                return Err(Error::Syntax("!include requires a file name".into()));
            }
            let mut path = PathBuf::from(target);
            if path.is_relative() {
                if let Some(base) = base_dir {
                    path = base.join(path);
                }
            }
            self.load_file(drivers, &path)?;
            return Ok(true);
        }
        if directive.starts_with("load") {
            // Dynamic module loading lives outside this core.
            warn!(directive, "ignoring !load directive");
            return Ok(true);
        }
        if directive.starts_with("setenv") || directive.starts_with("getenv") {
            warn!(directive, "ignoring environment directive");
            return Ok(true);
        }
        Err(Error::Syntax(format!("unknown directive '!{directive}'")))
    }

    /// Parse `name superclass class type value...` into a new record.
    fn parse_record_description(
        &mut self,
        drivers: &DriverTable,
        tokens: &[String],
    ) -> Result<RecordId> {
        if tokens.len() < 4 {
            return Err(Error::Syntax(format!(
                "record description needs at least 4 tokens, got {}",
                tokens.len()
            )));
        }
        let name = &tokens[0];
        let superclass = Superclass::from_token(&tokens[1]).ok_or_else(|| {
            Error::Syntax(format!("unknown superclass token '{}'", tokens[1]))
        })?;
        let driver = drivers.lookup(&tokens[3])?;
        if driver.superclass() != superclass {
            return Err(Error::Syntax(format!(
                "driver '{}' belongs to superclass '{}', description says '{}'",
                driver.type_name(),
                driver.superclass().token(),
                tokens[1]
            )));
        }
        if driver.class_name() != tokens[2] {
            return Err(Error::Syntax(format!(
                "driver '{}' belongs to class '{}', description says '{}'",
                driver.type_name(),
                driver.class_name(),
                tokens[2]
            )));
        }

        let id = self.create_record(name, &driver)?;
        match self.parse_description_fields(&driver, id, &tokens[4..]) {
            Ok(()) => Ok(id),
            Err(err) => {
                // Leave no half-parsed record behind.
                self.record_mut(id)?.flags.set(RecordFlags::BROKEN);
                self.force_delete(id)?;
                Err(err)
            }
        }
    }

    fn parse_description_fields(
        &mut self,
        driver: &Arc<Driver>,
        id: RecordId,
        value_tokens: &[String],
    ) -> Result<()> {
        let mut cursor = 0usize;
        for (field_index, template) in driver.fields().iter().enumerate() {
            if !template.flags.has(FieldFlags::IN_DESCRIPTION) {
                continue;
            }
            let value = self.parse_field_value(template, id, field_index, value_tokens, &mut cursor)?;
            self.record_mut(id)?.store_value(field_index, value)?;
        }
        if cursor != value_tokens.len() {
            return Err(Error::Syntax(format!(
                "{} trailing token(s) after the last field value",
                value_tokens.len() - cursor
            )));
        }
        Ok(())
    }

    fn parse_field_value(
        &mut self,
        template: &FieldTemplate,
        id: RecordId,
        field_index: usize,
        tokens: &[String],
        cursor: &mut usize,
    ) -> Result<FieldValue> {
        let dims: Vec<u32> = if template.flags.has(FieldFlags::VARARGS) {
            let count: u32 = next_token(tokens, cursor, &template.name)?
                .parse()
                .map_err(|_| {
                    Error::Syntax(format!(
                        "field '{}' needs an element count before its values",
                        template.name
                    ))
                })?;
            vec![count]
        } else {
            template.dims.clone()
        };
        let count = if dims.is_empty() {
            1
        } else {
            dims.iter().map(|d| *d as usize).product()
        };

        if template.datatype.is_reference() {
            let mut refs = Vec::with_capacity(count);
            for element in 0..count {
                let token = next_token(tokens, cursor, &template.name)?;
                refs.push(self.reference_for(id, field_index, element, token));
            }
            return FieldValue::new(template.datatype, dims, ValueData::Record(refs));
        }

        let mut scalars = Vec::with_capacity(count);
        for _ in 0..count {
            scalars.push(next_token(tokens, cursor, &template.name)?.to_owned());
        }
        parse_elements(template.datatype, dims, &scalars, &template.name)
    }

    /// Resolve a referenced record name, or register a fixup entry for a
    /// forward reference.
    fn reference_for(
        &mut self,
        id: RecordId,
        field_index: usize,
        element: usize,
        target_name: &str,
    ) -> FieldRef {
        match self.lookup(target_name) {
            Ok(target) => FieldRef::Resolved(target),
            Err(_) => {
                let index = self.register_fixup(id, field_index, element, target_name);
                FieldRef::Pending(index)
            }
        }
    }

    fn delete_broken_on_load(&self) -> bool {
        self.load_policy().delete_broken_records
    }
}

fn next_token<'a>(tokens: &'a [String], cursor: &mut usize, field: &str) -> Result<&'a str> {
    let token = tokens.get(*cursor).ok_or_else(|| {
        Error::Syntax(format!("description ended before field '{field}'"))
    })?;
    *cursor += 1;
    Ok(token)
}

/// Parse textual elements into a typed value.
pub(crate) fn parse_elements(
    datatype: DataType,
    dims: Vec<u32>,
    tokens: &[String],
    context: &str,
) -> Result<FieldValue> {
    fn bad(context: &str, token: &str, datatype: DataType) -> Error {
        Error::Syntax(format!("'{token}' is not a valid {datatype} for '{context}'"))
    }
    macro_rules! numbers {
        ($ty:ty, $variant:ident, $map:expr) => {{
            let mut out = Vec::with_capacity(tokens.len());
            for token in tokens {
                let parsed: $ty = token
                    .parse()
                    .map_err(|_| bad(context, token, datatype))?;
                out.push($map(parsed));
            }
            ValueData::$variant(out)
        }};
    }
    let data = match datatype {
        DataType::String => ValueData::String(tokens.to_vec()),
        DataType::Char => numbers!(i8, Char, |v| v),
        DataType::UChar => numbers!(u8, UChar, |v| v),
        DataType::Short => numbers!(i16, Short, |v| v),
        DataType::UShort => numbers!(u16, UShort, |v| v),
        DataType::Bool => {
            let mut out = Vec::with_capacity(tokens.len());
            for token in tokens {
                out.push(match token.as_str() {
                    "0" | "false" => false,
                    "1" | "true" => true,
                    other => return Err(bad(context, other, datatype)),
                });
            }
            ValueData::Bool(out)
        }
        DataType::Long | DataType::Int64 => numbers!(i64, Long, |v| v),
        DataType::ULong | DataType::UInt64 => numbers!(u64, ULong, |v| v),
        DataType::Hex => {
            let mut out = Vec::with_capacity(tokens.len());
            for token in tokens {
                let digits = token
                    .strip_prefix("0x")
                    .or_else(|| token.strip_prefix("0X"))
                    .unwrap_or(token);
                let parsed = u64::from_str_radix(digits, 16)
                    .map_err(|_| bad(context, token, datatype))?;
                out.push(parsed);
            }
            ValueData::ULong(out)
        }
        DataType::Float => numbers!(f32, Float, |v| v),
        DataType::Double => numbers!(f64, Double, |v| v),
        other => {
            return Err(Error::Unsupported(format!(
                "datatype {other} cannot be parsed from text"
            )))
        }
    };
    FieldValue::new(datatype, dims, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_on_whitespace() {
        let tokens = split_tokens("motor1  device motor soft_motor 0.5").unwrap();
        assert_eq!(tokens, ["motor1", "device", "motor", "soft_motor", "0.5"]);
    }

    #[test]
    fn quoted_tokens_keep_spaces() {
        let tokens = split_tokens(r#"v1 variable string str_var "two words" """#).unwrap();
        assert_eq!(
            tokens,
            ["v1", "variable", "string", "str_var", "two words", ""]
        );
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(matches!(
            split_tokens(r#"v1 "oops"#),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn hex_tokens_accept_both_spellings() {
        let value = parse_elements(
            DataType::Hex,
            vec![2],
            &["0xff".into(), "FF".into()],
            "mask",
        )
        .unwrap();
        assert_eq!(value.data(), &ValueData::ULong(vec![255, 255]));
    }
}
