//! Named field-type constructors.
//!
//! A field descriptor such as `Varchar(100)` or `Enum('Draft,Published', 'Draft')`
//! is resolved to a [`FieldSpec`] by static lookup of its type name. Descriptors
//! whose name is not a registered, capitalised type (`int(11) not null`,
//! `INTEGER PRIMARY KEY`) are raw backend specs and pass through unchanged.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, SchemaError};
use crate::spec::FieldSpec;

static DESCRIPTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*$").expect("valid descriptor regex")
});

/// Builds a spec from the descriptor's arguments.
pub type FieldConstructor = fn(&[String]) -> Result<FieldSpec>;

const UTF8: &str = "character set utf8 collate utf8_general_ci";

/// Registry mapping type names to spec constructors.
#[derive(Debug, Clone)]
pub struct FieldTypeRegistry {
    constructors: HashMap<String, FieldConstructor>,
}

impl Default for FieldTypeRegistry {
    fn default() -> Self {
        Self::with_builtin_types()
    }
}

impl FieldTypeRegistry {
    /// Creates a registry with no types.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in types.
    #[must_use]
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::empty();
        registry.register("Int", int);
        registry.register("Boolean", boolean);
        registry.register("Varchar", varchar);
        registry.register("Text", text);
        registry.register("Decimal", decimal);
        registry.register("Double", double);
        registry.register("Date", date);
        registry.register("Datetime", datetime);
        registry.register("Enum", enumeration);
        registry.register("PrimaryKey", primary_key);
        registry.register("ForeignKey", foreign_key);
        registry
    }

    /// Registers (or replaces) a type constructor.
    pub fn register(&mut self, name: impl Into<String>, constructor: FieldConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Returns `true` if the type name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Resolves a field descriptor to a spec.
    ///
    /// # Errors
    ///
    /// Fails with [`SchemaError::Configuration`] when the descriptor names an
    /// unregistered capitalised type, or when the constructor rejects its
    /// arguments.
    pub fn resolve(&self, descriptor: &str) -> Result<FieldSpec> {
        let Some(caps) = DESCRIPTOR.captures(descriptor) else {
            return Ok(FieldSpec::new(descriptor));
        };
        let name = &caps[1];
        if let Some(constructor) = self.constructors.get(name) {
            let args = caps.get(2).map_or_else(Vec::new, |m| split_args(m.as_str()));
            return constructor(&args);
        }
        if is_type_name(name) {
            return Err(SchemaError::Configuration(format!(
                "Unknown field type '{name}' in descriptor '{descriptor}'"
            )));
        }
        Ok(FieldSpec::new(descriptor))
    }
}

/// Capitalised with at least one lowercase letter: `Varchar`, not `INTEGER`.
fn is_type_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_uppercase())
        && name.chars().any(|c| c.is_ascii_lowercase())
}

/// Splits on commas outside quotes; trims and unquotes each argument.
fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in args.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => quote = Some(ch),
            (None, ',') => out.push(std::mem::take(&mut current).trim().to_string()),
            (None, c) => current.push(c),
        }
    }
    let last = current.trim().to_string();
    if !last.is_empty() || !out.is_empty() {
        out.push(last);
    }
    out
}

fn arg_or<'a>(args: &'a [String], index: usize, default: &'a str) -> &'a str {
    args.get(index)
        .map(String::as_str)
        .filter(|a| !a.is_empty())
        .unwrap_or(default)
}

fn parse_number<T: std::str::FromStr>(type_name: &str, arg: &str) -> Result<T> {
    arg.parse().map_err(|_| {
        SchemaError::Configuration(format!("{type_name}: '{arg}' is not a valid number"))
    })
}

fn at_most(type_name: &str, args: &[String], max: usize) -> Result<()> {
    if args.len() > max {
        return Err(SchemaError::Configuration(format!(
            "{type_name}: takes at most {max} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn int(args: &[String]) -> Result<FieldSpec> {
    let default: i64 = parse_number("Int", arg_or(args, 0, "0"))?;
    Ok(FieldSpec::new(format!("int(11) not null default {default}")))
}

fn boolean(args: &[String]) -> Result<FieldSpec> {
    let default = match arg_or(args, 0, "0").to_ascii_lowercase().as_str() {
        "1" | "true" => 1,
        "0" | "false" => 0,
        other => {
            return Err(SchemaError::Configuration(format!(
                "Boolean: '{other}' is not a valid default"
            )))
        }
    };
    Ok(FieldSpec::new(format!(
        "tinyint(1) unsigned not null default {default}"
    )))
}

fn varchar(args: &[String]) -> Result<FieldSpec> {
    let size: u32 = parse_number("Varchar", arg_or(args, 0, "50"))?;
    Ok(FieldSpec::new(format!("varchar({size}) {UTF8}")))
}

fn text(args: &[String]) -> Result<FieldSpec> {
    at_most("Text", args, 0)?;
    Ok(FieldSpec::new(format!("mediumtext {UTF8}")))
}

fn decimal(args: &[String]) -> Result<FieldSpec> {
    let whole: u32 = parse_number("Decimal", arg_or(args, 0, "9"))?;
    let fraction: u32 = parse_number("Decimal", arg_or(args, 1, "2"))?;
    if fraction > whole {
        return Err(SchemaError::Configuration(format!(
            "Decimal: scale {fraction} exceeds precision {whole}"
        )));
    }
    Ok(FieldSpec::new(format!(
        "decimal({whole},{fraction}) not null default 0"
    )))
}

fn double(args: &[String]) -> Result<FieldSpec> {
    at_most("Double", args, 0)?;
    Ok(FieldSpec::new("double not null default 0"))
}

fn date(args: &[String]) -> Result<FieldSpec> {
    at_most("Date", args, 0)?;
    Ok(FieldSpec::new("date"))
}

fn datetime(args: &[String]) -> Result<FieldSpec> {
    at_most("Datetime", args, 0)?;
    Ok(FieldSpec::new("datetime"))
}

fn enumeration(args: &[String]) -> Result<FieldSpec> {
    let values: Vec<&str> = arg_or(args, 0, "")
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    let Some(first) = values.first() else {
        return Err(SchemaError::Configuration(
            "Enum: at least one value is required".into(),
        ));
    };
    let default = arg_or(args, 1, first);
    if !values.contains(&default) {
        return Err(SchemaError::Configuration(format!(
            "Enum: default '{default}' is not one of the values"
        )));
    }
    let list: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
    Ok(FieldSpec::new(format!(
        "enum({}) {UTF8} default {}",
        list.join(","),
        quote_literal(default)
    )))
}

fn primary_key(args: &[String]) -> Result<FieldSpec> {
    at_most("PrimaryKey", args, 0)?;
    Ok(FieldSpec::new("int(11) not null auto_increment"))
}

/// The optional argument names the referenced table; it doesn't change the spec.
fn foreign_key(args: &[String]) -> Result<FieldSpec> {
    at_most("ForeignKey", args, 1)?;
    Ok(FieldSpec::new("int(11) not null default 0"))
}
