use std::sync::OnceLock;

use regex::Regex;

use crate::core::error::{Error, Result};

const NUMBER_TYPES: &[&str] = &[
    "int2",
    "smallint",
    "smallserial",
    "serial2",
    "int4",
    "int",
    "integer",
    "serial",
    "serial4",
    "int8",
    "bigint",
    "bigserial",
    "serial8",
    "numeric",
    "decimal",
    "float4",
    "real",
    "float8",
    "double precision",
];

const OTHER_TYPES: &[&str] = &[
    "boolean",
    "bool",
    "text",
    "char",
    "character",
    "character varying",
    "varchar",
    "json",
    "jsonb",
    "xml",
    "date",
    "interval",
    "time",
    "time without time zone",
    "time with time zone",
    "timetz",
    "timestamp",
    "timestamp without time zone",
    "timestamp with time zone",
    "timestamptz",
    "bytea",
    "bit",
    "bit varying",
    "varbit",
    "point",
    "line",
    "lseg",
    "path",
    "box",
    "polygon",
    "circle",
    "tsquery",
    "tsvector",
    "txid_snapshot",
    "uuid",
    "cidr",
    "inet",
    "macaddr",
    "money",
    "pg_lsn",
];

pub const INDEX_TYPES: &[&str] = &["btree", "gin", "gist", "hash", "brin", "spgist"];

pub const ORDER_MODIFIERS: &[&str] = &["asc", "desc", "nulls first", "nulls last"];

pub const CONSTRAINT_TYPES: &[&str] = &["UNIQUE", "CHECK", "NOT NULL"];

/// Operator classes accepted as index modifiers, per index type.
pub fn operator_classes(index_type: &str) -> &'static [&'static str] {
    match index_type {
        "brin" => &["inet_minmax_ops"],
        "btree" => &[
            "bpchar_pattern_ops",
            "cidr_ops",
            "record_image_ops",
            "text_pattern_ops",
            "varchar_ops",
            "varchar_pattern_ops",
        ],
        "gin" => &["jsonb_path_ops", "array_ops"],
        "gist" => &["inet_ops"],
        "hash" => &[
            "bpchar_pattern_ops",
            "cidr_ops",
            "text_pattern_ops",
            "varchar_ops",
            "varchar_pattern_ops",
        ],
        "spgist" => &["kd_point_ops"],
        _ => &[],
    }
}

/// Storage parameters accepted in `WITH (...)`, per index type.
pub fn storage_params(index_type: &str) -> &'static [&'static str] {
    match index_type {
        "brin" => &["pages_per_range", "autosummarize"],
        "btree" | "hash" | "spgist" => &["fillfactor"],
        "gin" => &["fastupdate", "gin_pending_list_limit"],
        "gist" => &["fillfactor", "buffering"],
        _ => &[],
    }
}

fn param_types() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^(bit( varying)?|varbit)\s*\([1-9][0-9]*\)$",
            r#"^(text|(char(acter)?|character varying|varchar)(\s*\([1-9][0-9]*\))?)(\s+collate\s+"(c|posix|[a-z][a-z]_[a-z][a-z](\.[a-z0-9-]+)?)")?$"#,
            r"^interval(\s+year|\s+month|\s+day|\s+hour|\s+minute|\s+second|\s+year to month|\s+day to hour|\s+day to minute|\s+day to second|\s+hour to minute|\s+hour to second|\s+minute to second)?(\s*\([0-6]\))?$",
            r"^timestamp\s*\([0-6]\)(\s+with(out)? time zone)?$",
            r"^time\s*\(([0-9]|10)\)(\s+with(out)? time zone)?$",
            r"^(numeric|decimal)\s*\([1-9][0-9]*(,\s*(0|[1-9][0-9]*))?\)$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    })
}

fn plain_type(name: &str) -> bool {
    NUMBER_TYPES.contains(&name) || OTHER_TYPES.contains(&name)
}

/// Whether `declared` is a column type new columns may use.
pub fn is_valid_type(declared: &str) -> bool {
    let name = declared.trim().to_lowercase();
    let base = name.strip_suffix("[]").map(str::trim_end).unwrap_or(&name);
    plain_type(base) || param_types().iter().any(|re| re.is_match(base))
}

pub fn check_type(declared: &str) -> Result<()> {
    if is_valid_type(declared) {
        Ok(())
    } else {
        Err(Error::configuration(format!("{} is not a valid type", declared)))
    }
}

pub fn check_index_type(index_type: &str) -> Result<()> {
    if INDEX_TYPES.contains(&index_type) {
        Ok(())
    } else {
        Err(Error::configuration(format!("Unrecognized index type {}", index_type)))
    }
}

/// Modifiers on one indexed column: an optional operator class of the index
/// type followed by ordering keywords.
pub fn check_modifiers(index_type: &str, modifiers: &[String]) -> Result<()> {
    let classes = operator_classes(index_type);
    for modifier in modifiers {
        let lower = modifier.to_lowercase();
        if !ORDER_MODIFIERS.contains(&lower.as_str()) && !classes.contains(&lower.as_str()) {
            return Err(Error::configuration(format!(
                "Invalid modifier {} for {} index",
                modifier, index_type
            )));
        }
    }
    Ok(())
}

pub fn check_storage_param(index_type: &str, param: &str) -> Result<()> {
    if storage_params(index_type).contains(&param) {
        Ok(())
    } else {
        Err(Error::configuration(format!(
            "Invalid storage parameter {} for {} index",
            param, index_type
        )))
    }
}

pub fn check_constraint_type(constraint_type: &str) -> Result<()> {
    if CONSTRAINT_TYPES.contains(&constraint_type) {
        Ok(())
    } else {
        Err(Error::configuration(format!("Unrecognized constraint type {}", constraint_type)))
    }
}

pub fn check_function(allowed: &[String], func: &str) -> Result<()> {
    if allowed.iter().any(|f| f == func) {
        Ok(())
    } else {
        Err(Error::configuration(format!("{} is not an allowed check function", func)))
    }
}

fn restricted_suffixes() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"_old\d+$", r"_tmp$", r"_pkey$", r"_dep\d+_$"]
            .iter()
            .map(|p| Regex::new(p).expect("static regex"))
            .collect()
    })
}

/// Index and constraint names may not end in suffixes used by reload and deprecation.
pub fn check_restricted_suffix(name: &str, kind: &str, skip_dep: bool) -> Result<()> {
    for (i, re) in restricted_suffixes().iter().enumerate() {
        if skip_dep && i == 3 {
            continue;
        }
        if re.is_match(name) {
            return Err(Error::invalid_argument(format!(
                "{} name {} is invalid: it ends with a reserved suffix",
                kind, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_array_types() {
        for ty in ["smallint", "double precision", "jsonb", "numeric[]", "Timestamp With Time Zone", "text []"] {
            assert!(is_valid_type(ty), "{}", ty);
        }
        for ty in ["int; DROP TABLE x", "serial9", "", "jsonb[][]", "money2"] {
            assert!(!is_valid_type(ty), "{}", ty);
        }
    }

    #[test]
    fn parameterized_types() {
        for ty in [
            "numeric(10)",
            "decimal(10, 2)",
            "varchar(12)",
            "text collate \"C\"",
            "character varying(5) collate \"en_US.utf8\"",
            "bit varying(8)",
            "interval day to second(3)",
            "timestamp(6) with time zone",
            "time(10)",
            "numeric(10,2)[]",
        ] {
            assert!(is_valid_type(ty), "{}", ty);
        }
        for ty in ["numeric(0)", "timestamp(7)", "varchar(x)", "bit()", "interval week"] {
            assert!(!is_valid_type(ty), "{}", ty);
        }
        assert_eq!(
            check_type("geometry").unwrap_err().kind,
            crate::core::error::ErrorKind::Configuration
        );
    }

    #[test]
    fn index_whitelists() {
        assert!(check_index_type("gin").is_ok());
        assert!(check_index_type("rtree").is_err());
        assert!(check_modifiers("btree", &["DESC".into(), "nulls last".into()]).is_ok());
        assert!(check_modifiers("gin", &["jsonb_path_ops".into()]).is_ok());
        assert!(check_modifiers("btree", &["jsonb_path_ops".into()]).is_err());
        assert!(check_storage_param("brin", "pages_per_range").is_ok());
        assert!(check_storage_param("gin", "fillfactor").is_err());
    }

    #[test]
    fn restricted_names() {
        assert!(check_restricted_suffix("nf_degree_old2", "Index", false).is_err());
        assert!(check_restricted_suffix("nf_degree_tmp", "Index", false).is_err());
        assert!(check_restricted_suffix("nf_pkey", "Constraint", false).is_err());
        assert!(check_restricted_suffix("nf_degree_dep1_", "Index", false).is_err());
        assert!(check_restricted_suffix("nf_degree_dep1_", "Index", true).is_ok());
        assert!(check_restricted_suffix("nf_degree_oldest", "Index", false).is_ok());
        assert!(check_function(&["is_prime".into()], "is_prime").is_ok());
        assert!(check_function(&[], "is_prime").is_err());
    }
}
